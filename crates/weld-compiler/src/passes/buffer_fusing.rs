//! Buffer-fusing pass.
//!
//! Walks the graph producer-first and asks the fusion rule of each node
//! whether it can live inside a neighbour's buffer. The first eligible
//! decision wins and is never revisited, so a producer optimized as a view
//! cannot later become a concatenation slice.

use crate::fusion::{Decision, FusionRules, FusionStats};
use weld_core::{
    CompileCtx, Error, Graph, NodeId, OptimizationState, Pass, RejectReason, Result, Stage,
};

pub struct BufferFusingPass {
    rules: FusionRules,
}

impl BufferFusingPass {
    pub fn new() -> Self {
        Self::with_rules(FusionRules::with_defaults())
    }

    pub fn with_rules(rules: FusionRules) -> Self {
        Self { rules }
    }

    fn fuse_node(&self, graph: &mut Graph, id: NodeId, ctx: &CompileCtx) -> Result<()> {
        let decision = self.rules.evaluate(graph, id, ctx.allocator.as_ref())?;
        let name = graph.get_node(id)?.name.clone();

        let proposal = match decision {
            Decision::Rejected(reason) => {
                tracing::debug!(node = %name, %reason, "rejected");
                return graph.set_state(id, OptimizationState::Rejected(reason));
            }
            Decision::Eligible(proposal) => proposal,
        };

        graph.set_state(id, OptimizationState::Eligible)?;
        match graph.propose_buffer_edges(proposal.edges.clone()) {
            Ok(()) => {}
            Err(Error::BufferConflict(msg)) => {
                tracing::debug!(node = %name, conflict = %msg, "rejected");
                return graph.set_state(
                    id,
                    OptimizationState::Rejected(RejectReason::BufferConflict),
                );
            }
            Err(e) => return Err(e),
        }

        for (target, layout) in &proposal.layouts {
            tracing::trace!(node = ?target, %layout, "padded");
            graph.set_output_layout(*target, layout.clone())?;
        }
        graph.set_assumption(id, proposal.assumption)?;
        graph.set_state(id, proposal.state())?;
        tracing::debug!(
            node = %name,
            aliased_to = ?proposal.aliased_to,
            assumption = ?proposal.assumption,
            "optimized"
        );
        Ok(())
    }
}

impl Pass for BufferFusingPass {
    fn name(&self) -> &str {
        "buffer_fusing"
    }

    fn stage(&self) -> Stage {
        Stage::Fusion
    }

    fn run(&self, graph: &mut Graph, ctx: &CompileCtx) -> Result<bool> {
        let mut changed = false;
        graph.for_each_node_topological(|graph, id| {
            if graph.get_node(id)?.state.is_terminal() {
                return Ok(());
            }
            self.fuse_node(graph, id, ctx)?;
            changed = true;
            Ok(())
        })?;

        if changed {
            tracing::info!(stats = %FusionStats::collect(graph), "buffer fusing done");
        }
        Ok(changed)
    }
}

impl Default for BufferFusingPass {
    fn default() -> Self {
        Self::new()
    }
}
