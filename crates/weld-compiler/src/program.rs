//! Compiled program: the fused graph plus the context it was built with.

use crate::fusion::FusionStats;
use crate::inference::{InferenceCtx, InferenceTable};
use weld_core::{
    CompileCtx, Error, Graph, Layout, Node, NodeId, OpTag, OptimizationState, Pass, Result,
};

/// A graph after compilation, ready to be handed to an executor.
#[derive(Debug, Clone)]
pub struct Program {
    graph: Graph,
    ctx: CompileCtx,
}

impl Program {
    pub fn new(graph: Graph, ctx: CompileCtx) -> Self {
        Self { graph, ctx }
    }

    pub fn graph(&self) -> &Graph {
        &self.graph
    }

    pub fn ctx(&self) -> &CompileCtx {
        &self.ctx
    }

    pub fn into_graph(self) -> Graph {
        self.graph
    }

    pub fn node_id(&self, name: &str) -> Result<NodeId> {
        self.graph.find_node(name)
    }

    pub fn get_node(&self, name: &str) -> Result<&Node> {
        self.graph.get_node(self.node_id(name)?)
    }

    pub fn state(&self, name: &str) -> Result<OptimizationState> {
        Ok(self.get_node(name)?.state)
    }

    /// Whether the node was optimized out of its own buffer.
    pub fn can_be_optimized(&self, name: &str) -> Result<bool> {
        Ok(self.get_node(name)?.can_be_optimized())
    }

    pub fn has_node_with_type(&self, tag: OpTag) -> bool {
        self.graph.nodes().any(|node| node.tag() == tag)
    }

    pub fn fusion_stats(&self) -> FusionStats {
        FusionStats::collect(&self.graph)
    }

    /// Output layout of a node.
    ///
    /// With `force_resolve`, a missing layout is inferred on demand together
    /// with any missing layouts of its ancestors, and cached.
    pub fn get_output_layout(&mut self, name: &str, force_resolve: bool) -> Result<Layout> {
        let id = self.node_id(name)?;
        if let Some(layout) = &self.graph.get_node(id)?.output_layout {
            return Ok(layout.clone());
        }
        if !force_resolve {
            return Err(Error::LayoutNotResolved(format!("node '{name}'")));
        }

        let table = InferenceTable::with_defaults();
        for node_id in self.graph.topological_order() {
            if node_id != id && !self.graph.has_path(node_id, id) {
                continue;
            }
            if self.graph.get_node(node_id)?.output_layout.is_some() {
                continue;
            }
            let layout = table.infer(&InferenceCtx::new(
                self.graph.get_node(node_id)?,
                &self.graph,
            ))?;
            self.graph.set_output_layout(node_id, layout)?;
        }
        self.graph.output_layout(id).cloned()
    }

    /// Run a single pass on the compiled graph.
    pub fn apply_pass(&mut self, pass: &dyn Pass) -> Result<bool> {
        let _span =
            tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();
        pass.run(&mut self.graph, &self.ctx)
    }
}
