//! Fusion rules: pure eligibility checks shared by compile-time fusing and
//! execution-time revalidation.
//!
//! A rule looks at one node and the current layouts of its neighbours and
//! returns a [`Decision`]. It never mutates the graph; the caller commits an
//! eligible [`Proposal`] through the buffer dependency resolver and applies
//! its padded layouts.

mod concat;
mod crop;
mod view;

pub use concat::concatenation_rule;
pub use crop::crop_rule;
pub use view::{permute_rule, reorder_rule, reshape_rule};

use std::collections::HashMap;
use std::fmt;
use weld_core::{
    Assumption, BufferDependencyEdge, Error, Graph, Layout, MemoryAllocator, Node, NodeId,
    OpTag, OptimizationState, RejectReason, Result,
};

/// Everything a rule may look at.
pub struct FusionCtx<'a> {
    pub node: &'a Node,
    pub graph: &'a Graph,
    pub allocator: &'a dyn MemoryAllocator,
}

impl<'a> FusionCtx<'a> {
    pub fn output_layout(&self) -> Result<&'a Layout> {
        self.graph.output_layout(self.node.id)
    }

    pub fn input_layout(&self, slot: usize) -> Result<&'a Layout> {
        self.graph.input_layout(self.node.id, slot)
    }

    pub fn producer(&self, slot: usize) -> Result<NodeId> {
        self.graph.input(self.node.id, slot)
    }
}

/// What committing an eligible optimization involves.
#[derive(Debug, Clone)]
pub struct Proposal {
    /// Node whose buffer the optimized node lives in.
    pub aliased_to: NodeId,
    /// Element offset of the node's first element relative to `aliased_to`.
    pub offset: usize,
    /// Buffer dependency edges to add, as one transaction.
    pub edges: Vec<BufferDependencyEdge>,
    /// Padded layouts to install once the edges are accepted.
    pub layouts: Vec<(NodeId, Layout)>,
    /// Condition left to check at execution time.
    pub assumption: Option<Assumption>,
}

impl Proposal {
    pub fn state(&self) -> OptimizationState {
        OptimizationState::Optimized {
            aliased_to: self.aliased_to,
            offset: self.offset,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Decision {
    Eligible(Proposal),
    Rejected(RejectReason),
}

/// Signature of a per-kind fusion rule.
pub type FusionRule = fn(&FusionCtx) -> Result<Decision>;

/// Dispatch table from node kind to fusion rule.
#[derive(Clone)]
pub struct FusionRules {
    rules: HashMap<OpTag, FusionRule>,
}

impl FusionRules {
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// Table with the built-in rules: view elimination for reshape, permute
    /// and reorder, padding propagation for crop, in-place concatenation.
    pub fn with_defaults() -> Self {
        let mut rules = Self::new();
        rules
            .register(OpTag::Reshape, reshape_rule)
            .register(OpTag::Permute, permute_rule)
            .register(OpTag::Reorder, reorder_rule)
            .register(OpTag::Crop, crop_rule)
            .register(OpTag::Concatenation, concatenation_rule);
        rules
    }

    pub fn register(&mut self, tag: OpTag, rule: FusionRule) -> &mut Self {
        self.rules.insert(tag, rule);
        self
    }

    pub fn has_rule(&self, tag: OpTag) -> bool {
        self.rules.contains_key(&tag)
    }

    /// Evaluate the rule for node `id`; kinds without a rule are rejected.
    pub fn evaluate(
        &self,
        graph: &Graph,
        id: NodeId,
        allocator: &dyn MemoryAllocator,
    ) -> Result<Decision> {
        let node = graph.get_node(id)?;
        let Some(rule) = self.rules.get(&node.tag()) else {
            return Ok(Decision::Rejected(RejectReason::NoFusionRule));
        };
        rule(&FusionCtx {
            node,
            graph,
            allocator,
        })
    }
}

impl Default for FusionRules {
    fn default() -> Self {
        Self::with_defaults()
    }
}

/// Summary of fusion decisions over a graph.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FusionStats {
    pub optimized: usize,
    /// Optimized nodes carrying an assumption to recheck at execution.
    pub pending: usize,
    pub rejected: usize,
    pub conflicts: usize,
    pub unanalyzed: usize,
}

impl FusionStats {
    pub fn collect(graph: &Graph) -> Self {
        let mut stats = Self::default();
        for node in graph.nodes() {
            match node.state {
                OptimizationState::Optimized { .. } => {
                    stats.optimized += 1;
                    if node.assumption.is_some() {
                        stats.pending += 1;
                    }
                }
                OptimizationState::Rejected(reason) => {
                    stats.rejected += 1;
                    if reason == RejectReason::BufferConflict {
                        stats.conflicts += 1;
                    }
                }
                OptimizationState::Unanalyzed | OptimizationState::Eligible => {
                    stats.unanalyzed += 1
                }
            }
        }
        stats
    }
}

impl fmt::Display for FusionStats {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} optimized ({} pending), {} rejected ({} conflicts)",
            self.optimized, self.pending, self.rejected, self.conflicts
        )
    }
}

/// Error for a rule dispatched on the wrong node kind.
pub(crate) fn wrong_kind(node: &Node, expected: OpTag) -> Error {
    Error::InvalidGraph(format!(
        "fusion rule for {expected} called on {} '{}'",
        node.tag(),
        node.name
    ))
}
