//! Graph model for the buffer-fusing compiler.
//!
//! The graph is a DAG of single-output nodes stored in a petgraph
//! `StableGraph`, so node ids stay valid when nodes are removed. Each node
//! keeps its ordered input list; petgraph edges (weighted by the consumer's
//! input slot) exist for traversal and reachability queries.

use crate::dependency::{BufferDependencies, BufferDependencyEdge};
use crate::layout::{Format, Layout};
use crate::state::{Assumption, OptimizationState};
use crate::types::DataType;
use crate::{Error, Result};
use petgraph::Direction;
use petgraph::algo::has_path_connecting;
use petgraph::graph::NodeIndex;
use petgraph::stable_graph::StableGraph;
use petgraph::visit::Topo;
use std::collections::HashMap;
use std::fmt;

/// Node identifier (backed by petgraph `NodeIndex`).
pub type NodeId = NodeIndex;

// ──────────────────────────────── OpKind ─────────────────────────────────

/// Target shape of a reshape.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReshapeTarget {
    /// Pattern known when the graph is built. `-1` marks the inferred dim,
    /// `0` copies the input dim when `special_zero` is set.
    Static(Vec<i64>),
    /// Pattern read from the node's second input.
    FromInput { rank: usize },
}

/// Operation performed by a node.
#[derive(Debug, Clone, PartialEq)]
pub enum OpKind {
    InputPlaceholder {
        layout: Layout,
    },
    ConstantData {
        layout: Layout,
        values: Vec<f64>,
    },
    /// Output dim `i` is input dim `order[i]`.
    Permute {
        order: Vec<usize>,
    },
    Reshape {
        target: ReshapeTarget,
        special_zero: bool,
    },
    Concatenation {
        axis: usize,
    },
    Crop {
        offsets: Vec<usize>,
        sizes: Vec<usize>,
    },
    Reorder {
        format: Format,
        dtype: DataType,
    },
    /// Inputs: data `[.., K]`, weights `[N, K]`, optional bias `[N]`.
    FullyConnected,
}

/// Fieldless discriminant of [`OpKind`], used as a dispatch table key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum OpTag {
    InputPlaceholder,
    ConstantData,
    Permute,
    Reshape,
    Concatenation,
    Crop,
    Reorder,
    FullyConnected,
}

impl OpTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpTag::InputPlaceholder => "input",
            OpTag::ConstantData => "constant",
            OpTag::Permute => "permute",
            OpTag::Reshape => "reshape",
            OpTag::Concatenation => "concatenation",
            OpTag::Crop => "crop",
            OpTag::Reorder => "reorder",
            OpTag::FullyConnected => "fully_connected",
        }
    }
}

impl fmt::Display for OpTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl OpKind {
    pub fn tag(&self) -> OpTag {
        match self {
            OpKind::InputPlaceholder { .. } => OpTag::InputPlaceholder,
            OpKind::ConstantData { .. } => OpTag::ConstantData,
            OpKind::Permute { .. } => OpTag::Permute,
            OpKind::Reshape { .. } => OpTag::Reshape,
            OpKind::Concatenation { .. } => OpTag::Concatenation,
            OpKind::Crop { .. } => OpTag::Crop,
            OpKind::Reorder { .. } => OpTag::Reorder,
            OpKind::FullyConnected => OpTag::FullyConnected,
        }
    }

    /// Layout declared by the graph builder, for source nodes.
    pub fn declared_layout(&self) -> Option<&Layout> {
        match self {
            OpKind::InputPlaceholder { layout } | OpKind::ConstantData { layout, .. } => {
                Some(layout)
            }
            _ => None,
        }
    }

    fn check_arity(&self, count: usize) -> std::result::Result<(), String> {
        let ok = match self {
            OpKind::InputPlaceholder { .. } | OpKind::ConstantData { .. } => count == 0,
            OpKind::Permute { .. } | OpKind::Crop { .. } | OpKind::Reorder { .. } => count == 1,
            OpKind::Reshape { target, .. } => match target {
                ReshapeTarget::Static(_) => count == 1,
                ReshapeTarget::FromInput { .. } => count == 2,
            },
            OpKind::Concatenation { .. } => count >= 1,
            OpKind::FullyConnected => count == 2 || count == 3,
        };
        if ok {
            Ok(())
        } else {
            Err(format!("{} does not take {count} inputs", self.tag()))
        }
    }
}

// ───────────────────────────────── Node ──────────────────────────────────

/// A single-output operation in the graph.
#[derive(Debug, Clone)]
pub struct Node {
    pub id: NodeId,
    pub name: String,
    pub kind: OpKind,
    /// Producers, in input slot order.
    pub inputs: Vec<NodeId>,
    /// `None` until shape inference has run for this node.
    pub output_layout: Option<Layout>,
    pub state: OptimizationState,
    /// Condition to recheck at execution time, if the node was optimized
    /// while some dims were unknown.
    pub assumption: Option<Assumption>,
}

impl Node {
    pub fn tag(&self) -> OpTag {
        self.kind.tag()
    }

    pub fn can_be_optimized(&self) -> bool {
        self.state.is_optimized()
    }
}

// ──────────────────────────────── Graph ──────────────────────────────────

/// Dataflow graph of tensor operations.
#[derive(Debug, Clone, Default)]
pub struct Graph {
    graph: StableGraph<Node, usize>,
    by_name: HashMap<String, NodeId>,
    outputs: Vec<NodeId>,
    dependencies: BufferDependencies,
}

impl Graph {
    pub fn new() -> Self {
        Self::default()
    }

    // ── Construction ──

    /// Add a node consuming the outputs of `inputs` (in slot order).
    ///
    /// Every input must already exist, which keeps the graph acyclic.
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        kind: OpKind,
        inputs: &[NodeId],
    ) -> Result<NodeId> {
        let name = name.into();
        if self.by_name.contains_key(&name) {
            return Err(Error::InvalidGraph(format!("duplicate node name '{name}'")));
        }
        kind.check_arity(inputs.len())
            .map_err(|msg| Error::InvalidGraph(format!("node '{name}': {msg}")))?;
        for &input in inputs {
            if !self.graph.contains_node(input) {
                return Err(Error::NodeNotFound(format!(
                    "input {input:?} of node '{name}'"
                )));
            }
        }
        if let OpKind::ConstantData { layout, values } = &kind {
            layout.validate()?;
            if layout.element_count() != Some(values.len()) {
                return Err(Error::InvalidGraph(format!(
                    "constant '{name}' has {} values for shape {}",
                    values.len(),
                    layout.shape
                )));
            }
        }
        if let OpKind::InputPlaceholder { layout } = &kind {
            layout.validate()?;
        }

        let id = self.graph.add_node(Node {
            id: NodeId::default(),
            name: name.clone(),
            kind,
            inputs: inputs.to_vec(),
            output_layout: None,
            state: OptimizationState::Unanalyzed,
            assumption: None,
        });
        if let Some(node) = self.graph.node_weight_mut(id) {
            node.id = id;
        }
        for (slot, &input) in inputs.iter().enumerate() {
            self.graph.add_edge(input, id, slot);
        }
        self.by_name.insert(name, id);
        Ok(id)
    }

    /// Add an input placeholder with a declared (possibly partial) layout.
    pub fn add_input(&mut self, name: impl Into<String>, layout: Layout) -> Result<NodeId> {
        self.add_node(name, OpKind::InputPlaceholder { layout }, &[])
    }

    /// Add constant data, values in logical row-major order.
    pub fn add_constant(
        &mut self,
        name: impl Into<String>,
        layout: Layout,
        values: Vec<f64>,
    ) -> Result<NodeId> {
        self.add_node(name, OpKind::ConstantData { layout, values }, &[])
    }

    /// Split `input` along `axis` into crops of the given sizes.
    ///
    /// The input shape must already be known, either declared or inferred.
    pub fn add_split(
        &mut self,
        name: &str,
        input: NodeId,
        axis: usize,
        sizes: &[usize],
    ) -> Result<Vec<NodeId>> {
        let node = self.get_node(input)?;
        let shape = node
            .output_layout
            .as_ref()
            .or(node.kind.declared_layout())
            .and_then(|layout| layout.shape.to_static())
            .ok_or_else(|| {
                Error::ShapeInference(format!(
                    "split '{name}' needs a static shape for '{}'",
                    node.name
                ))
            })?;
        if axis >= shape.len() || sizes.iter().sum::<usize>() != shape[axis] {
            return Err(Error::ShapeInference(format!(
                "split '{name}' sizes {sizes:?} do not cover axis {axis} of {shape:?}"
            )));
        }

        let mut crops = Vec::with_capacity(sizes.len());
        let mut start = 0;
        for (i, &size) in sizes.iter().enumerate() {
            let mut offsets = vec![0; shape.len()];
            offsets[axis] = start;
            let mut window = shape.clone();
            window[axis] = size;
            crops.push(self.add_node(
                format!("{name}:{i}"),
                OpKind::Crop {
                    offsets,
                    sizes: window,
                },
                &[input],
            )?);
            start += size;
        }
        Ok(crops)
    }

    /// Mark a node as a graph output.
    pub fn mark_output(&mut self, id: NodeId) -> Result<()> {
        self.get_node(id)?;
        if !self.outputs.contains(&id) {
            self.outputs.push(id);
        }
        Ok(())
    }

    // ── Node access ──

    pub fn get_node(&self, id: NodeId) -> Result<&Node> {
        self.graph
            .node_weight(id)
            .ok_or_else(|| Error::NodeNotFound(format!("{id:?}")))
    }

    pub fn node_mut(&mut self, id: NodeId) -> Result<&mut Node> {
        self.graph
            .node_weight_mut(id)
            .ok_or_else(|| Error::NodeNotFound(format!("{id:?}")))
    }

    pub fn contains(&self, id: NodeId) -> bool {
        self.graph.contains_node(id)
    }

    pub fn find_node(&self, name: &str) -> Result<NodeId> {
        self.by_name
            .get(name)
            .copied()
            .ok_or_else(|| Error::NodeNotFound(format!("'{name}'")))
    }

    /// Iterate over all nodes, in id order.
    pub fn nodes(&self) -> impl Iterator<Item = &Node> {
        self.graph
            .node_indices()
            .filter_map(|id| self.graph.node_weight(id))
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn inputs(&self, id: NodeId) -> Result<&[NodeId]> {
        Ok(&self.get_node(id)?.inputs)
    }

    /// Producer feeding input `slot` of `id`.
    pub fn input(&self, id: NodeId, slot: usize) -> Result<NodeId> {
        let node = self.get_node(id)?;
        node.inputs.get(slot).copied().ok_or_else(|| {
            Error::InvalidGraph(format!("node '{}' has no input {slot}", node.name))
        })
    }

    /// Distinct consumers of a node's output, in id order.
    pub fn consumers(&self, id: NodeId) -> Vec<NodeId> {
        let mut consumers: Vec<NodeId> = self
            .graph
            .neighbors_directed(id, Direction::Outgoing)
            .collect();
        consumers.sort();
        consumers.dedup();
        consumers
    }

    /// Graph outputs: marked nodes, or every sink when none are marked.
    pub fn outputs(&self) -> Vec<NodeId> {
        if !self.outputs.is_empty() {
            return self.outputs.clone();
        }
        self.topological_order()
            .into_iter()
            .filter(|&id| {
                self.graph
                    .neighbors_directed(id, Direction::Outgoing)
                    .next()
                    .is_none()
            })
            .collect()
    }

    pub fn is_output(&self, id: NodeId) -> bool {
        self.outputs().contains(&id)
    }

    // ── Layouts and state ──

    /// Resolved output layout of a node.
    pub fn output_layout(&self, id: NodeId) -> Result<&Layout> {
        let node = self.get_node(id)?;
        node.output_layout
            .as_ref()
            .ok_or_else(|| Error::LayoutNotResolved(format!("node '{}'", node.name)))
    }

    /// Resolved layout of the producer feeding input `slot` of `id`.
    pub fn input_layout(&self, id: NodeId, slot: usize) -> Result<&Layout> {
        self.output_layout(self.input(id, slot)?)
    }

    pub fn set_output_layout(&mut self, id: NodeId, layout: Layout) -> Result<()> {
        self.node_mut(id)?.output_layout = Some(layout);
        Ok(())
    }

    pub fn set_state(&mut self, id: NodeId, state: OptimizationState) -> Result<()> {
        self.node_mut(id)?.state = state;
        Ok(())
    }

    pub fn set_assumption(&mut self, id: NodeId, assumption: Option<Assumption>) -> Result<()> {
        self.node_mut(id)?.assumption = assumption;
        Ok(())
    }

    // ── Buffer dependencies ──

    pub fn dependencies(&self) -> &BufferDependencies {
        &self.dependencies
    }

    pub fn dependencies_mut(&mut self) -> &mut BufferDependencies {
        &mut self.dependencies
    }

    /// Validate and commit a set of buffer-sharing edges as one transaction.
    ///
    /// On conflict nothing is recorded.
    pub fn propose_buffer_edges(&mut self, edges: Vec<BufferDependencyEdge>) -> Result<()> {
        self.dependencies.validate(self, &edges)?;
        self.dependencies.commit(edges);
        Ok(())
    }

    // ── Mutation ──

    /// Remove `old`, optionally redirecting its consumers to `new`.
    ///
    /// Rewired consumers keep their input slot positions. Without rewiring,
    /// `old` must have no consumers and must not be a graph output.
    pub fn replace_node(&mut self, old: NodeId, new: NodeId, rewire_consumers: bool) -> Result<()> {
        let old_name = self.get_node(old)?.name.clone();
        self.get_node(new)?;
        if old == new {
            return Err(Error::InvalidGraph(format!(
                "cannot replace '{old_name}' with itself"
            )));
        }
        if self.has_path(old, new) {
            return Err(Error::InvalidGraph(format!(
                "replacing '{old_name}' would create a cycle"
            )));
        }

        let consumers = self.consumers(old);
        if !rewire_consumers {
            if !consumers.is_empty() {
                return Err(Error::InvalidGraph(format!(
                    "'{old_name}' still has {} consumers",
                    consumers.len()
                )));
            }
            if self.outputs.contains(&old) {
                return Err(Error::InvalidGraph(format!(
                    "'{old_name}' is a graph output"
                )));
            }
        }

        for consumer in consumers {
            let node = self.node_mut(consumer)?;
            let mut slots = Vec::new();
            for (slot, input) in node.inputs.iter_mut().enumerate() {
                if *input == old {
                    *input = new;
                    slots.push(slot);
                }
            }
            for slot in slots {
                self.graph.add_edge(new, consumer, slot);
            }
        }

        let mut outputs = Vec::with_capacity(self.outputs.len());
        for &id in &self.outputs {
            let id = if id == old { new } else { id };
            if !outputs.contains(&id) {
                outputs.push(id);
            }
        }
        self.outputs = outputs;

        self.dependencies.remove_node_edges(old);
        self.graph.remove_node(old);
        self.by_name.remove(&old_name);
        Ok(())
    }

    // ── Traversal ──

    /// Nodes ordered so that every producer precedes its consumers.
    pub fn topological_order(&self) -> Vec<NodeId> {
        let mut topo = Topo::new(&self.graph);
        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(id) = topo.next(&self.graph) {
            order.push(id);
        }
        order
    }

    /// Visit every node in topological order.
    ///
    /// The order is fixed before the first visit; the visitor may update node
    /// annotations and buffer dependencies but must not change topology.
    pub fn for_each_node_topological<F>(&mut self, mut visit: F) -> Result<()>
    where
        F: FnMut(&mut Graph, NodeId) -> Result<()>,
    {
        for id in self.topological_order() {
            if self.graph.contains_node(id) {
                visit(self, id)?;
            }
        }
        Ok(())
    }

    /// Whether `to` is reachable from `from` along data edges.
    pub fn has_path(&self, from: NodeId, to: NodeId) -> bool {
        has_path_connecting(&self.graph, from, to, None)
    }

    /// Data edges as `(producer, consumer, slot)`.
    pub fn edges(&self) -> Vec<(NodeId, NodeId, usize)> {
        let mut edges = Vec::new();
        for node in self.nodes() {
            for (slot, &input) in node.inputs.iter().enumerate() {
                edges.push((input, node.id, slot));
            }
        }
        edges
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn f32_input(graph: &mut Graph, name: &str, shape: &[usize]) -> NodeId {
        graph
            .add_input(name, Layout::plain(shape, DataType::F32))
            .unwrap()
    }

    #[test]
    fn test_add_node_requires_existing_inputs() {
        let mut graph = Graph::new();
        let result = graph.add_node(
            "p",
            OpKind::Permute { order: vec![1, 0] },
            &[NodeId::new(7)],
        );
        assert!(matches!(result, Err(Error::NodeNotFound(_))));
    }

    #[test]
    fn test_add_node_checks_arity_and_names() {
        let mut graph = Graph::new();
        let x = f32_input(&mut graph, "x", &[2, 2]);
        assert!(graph.add_node("fc", OpKind::FullyConnected, &[x]).is_err());
        assert!(graph.add_input("x", Layout::plain(&[1][..], DataType::F32)).is_err());
    }

    #[test]
    fn test_topological_order() {
        let mut graph = Graph::new();
        let a = f32_input(&mut graph, "a", &[1, 2]);
        let b = f32_input(&mut graph, "b", &[1, 2]);
        let c = graph
            .add_node("c", OpKind::Concatenation { axis: 1 }, &[a, b])
            .unwrap();
        let p = graph
            .add_node("p", OpKind::Permute { order: vec![1, 0] }, &[c])
            .unwrap();

        let order = graph.topological_order();
        let pos = |id| order.iter().position(|&n| n == id).unwrap();
        assert!(pos(a) < pos(c));
        assert!(pos(b) < pos(c));
        assert!(pos(c) < pos(p));
        assert_eq!(graph.outputs(), vec![p]);
    }

    #[test]
    fn test_replace_node_preserves_slots() {
        let mut graph = Graph::new();
        let x = f32_input(&mut graph, "x", &[1, 2]);
        let y = f32_input(&mut graph, "y", &[1, 2]);
        let r = graph
            .add_node(
                "r",
                OpKind::Reorder {
                    format: Format::Bfyx,
                    dtype: DataType::F32,
                },
                &[x],
            )
            .unwrap();
        let c = graph
            .add_node("c", OpKind::Concatenation { axis: 1 }, &[y, r, y])
            .unwrap();

        graph.replace_node(r, x, true).unwrap();

        assert_eq!(graph.inputs(c).unwrap(), &[y, x, y]);
        assert!(graph.get_node(r).is_err());
        assert!(graph.find_node("r").is_err());
        assert_eq!(graph.consumers(x), vec![c]);
    }

    #[test]
    fn test_replace_node_rejects_cycles_and_dangling_consumers() {
        let mut graph = Graph::new();
        let x = f32_input(&mut graph, "x", &[2, 3]);
        let p = graph
            .add_node("p", OpKind::Permute { order: vec![1, 0] }, &[x])
            .unwrap();
        let q = graph
            .add_node("q", OpKind::Permute { order: vec![1, 0] }, &[p])
            .unwrap();

        assert!(graph.replace_node(p, q, true).is_err());
        assert!(graph.replace_node(p, x, false).is_err());
        graph.mark_output(q).unwrap();
        assert!(graph.replace_node(q, x, false).is_err());
    }

    #[test]
    fn test_add_split_builds_crops() {
        let mut graph = Graph::new();
        let x = f32_input(&mut graph, "x", &[1, 4, 3, 3]);
        let crops = graph.add_split("split", x, 1, &[2, 2]).unwrap();
        assert_eq!(crops.len(), 2);
        match &graph.get_node(crops[1]).unwrap().kind {
            OpKind::Crop { offsets, sizes } => {
                assert_eq!(offsets, &vec![0, 2, 0, 0]);
                assert_eq!(sizes, &vec![1, 2, 3, 3]);
            }
            other => panic!("expected crop, got {other:?}"),
        }
        assert!(graph.add_split("bad", x, 1, &[3, 2]).is_err());
    }

    #[test]
    fn test_has_path() {
        let mut graph = Graph::new();
        let x = f32_input(&mut graph, "x", &[2, 3]);
        let y = f32_input(&mut graph, "y", &[2, 3]);
        let p = graph
            .add_node("p", OpKind::Permute { order: vec![1, 0] }, &[x])
            .unwrap();
        assert!(graph.has_path(x, p));
        assert!(!graph.has_path(p, x));
        assert!(!graph.has_path(y, p));
    }
}
