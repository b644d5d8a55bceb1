//! Execution-time revalidation of fused buffers.
//!
//! Fusion decisions taken on partial shapes are only conditionally valid.
//! Once every shape is concrete, each optimized node runs its fusion rule
//! again: the rule recomputes the padded layouts the buffer sharing relies
//! on, and a node whose rule no longer accepts the concrete layouts is
//! demoted to a real kernel. Offsets recorded on its buffer dependency edges
//! are refreshed to the concrete values.

use crate::error::Result;
use weld_compiler::{Decision, FusionRules};
use weld_core::{Graph, MemoryAllocator, NodeId, OptimizationState, RejectReason};

/// Outcome of one revalidation run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RevalidationReport {
    /// Optimized nodes whose decision was recomputed.
    pub checked: usize,
    /// Nodes demoted to `Rejected(RuntimeShapeMismatch)`.
    pub demoted: Vec<NodeId>,
}

impl RevalidationReport {
    pub fn is_clean(&self) -> bool {
        self.demoted.is_empty()
    }
}

pub struct Revalidator {
    rules: FusionRules,
}

impl Revalidator {
    pub fn new() -> Self {
        Self::with_rules(FusionRules::with_defaults())
    }

    pub fn with_rules(rules: FusionRules) -> Self {
        Self { rules }
    }

    /// Revalidate every optimized node of a shape-resolved graph.
    ///
    /// Never fails because of a rejected decision; errors only come from a
    /// graph that is not fully resolved.
    #[tracing::instrument(skip_all)]
    pub fn run(
        &self,
        graph: &mut Graph,
        allocator: &dyn MemoryAllocator,
    ) -> Result<RevalidationReport> {
        let mut report = RevalidationReport::default();
        for id in graph.topological_order() {
            if !graph.get_node(id)?.state.is_optimized() {
                continue;
            }
            report.checked += 1;

            match self.rules.evaluate(graph, id, allocator)? {
                Decision::Eligible(proposal) => {
                    let state = proposal.state();
                    let refreshed = graph.dependencies_mut().refresh(&proposal.edges);
                    if refreshed > 0 {
                        tracing::trace!(node = ?id, refreshed, "placement refreshed");
                    }
                    for (target, layout) in proposal.layouts {
                        tracing::trace!(node = ?target, %layout, "padded");
                        graph.set_output_layout(target, layout)?;
                    }
                    graph.set_state(id, state)?;
                }
                Decision::Rejected(reason) => {
                    demote(graph, id, reason)?;
                    report.demoted.push(id);
                }
            }
        }
        Ok(report)
    }
}

impl Default for Revalidator {
    fn default() -> Self {
        Self::new()
    }
}

fn demote(graph: &mut Graph, id: NodeId, reason: RejectReason) -> Result<()> {
    let removed = graph.dependencies_mut().detach(id);
    graph.set_state(
        id,
        OptimizationState::Rejected(RejectReason::RuntimeShapeMismatch),
    )?;
    graph.set_assumption(id, None)?;
    tracing::debug!(
        node = %graph.get_node(id)?.name,
        %reason,
        edges_removed = removed,
        "demoted"
    );
    Ok(())
}
