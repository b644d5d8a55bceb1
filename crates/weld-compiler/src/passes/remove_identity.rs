//! Removal of nodes that do nothing.
//!
//! A reorder to the layout it already has, a reshape to the shape it already
//! has, or a permute with the identity order is bypassed: its consumers are
//! rewired to its producer and the node is deleted.

use weld_core::{CompileCtx, Graph, OpKind, Pass, ReshapeTarget, Result, Stage};

pub struct RemoveIdentityPass;

impl RemoveIdentityPass {
    pub fn new() -> Self {
        Self
    }

    fn is_identity(graph: &Graph, id: weld_core::NodeId) -> Result<bool> {
        let node = graph.get_node(id)?;
        let kind_allows = match &node.kind {
            OpKind::Reorder { .. } => true,
            OpKind::Reshape { target, .. } => matches!(target, ReshapeTarget::Static(_)),
            OpKind::Permute { order } => order.iter().enumerate().all(|(i, &axis)| i == axis),
            _ => false,
        };
        if !kind_allows || graph.is_output(id) {
            return Ok(false);
        }
        let (Some(output), Ok(input)) = (&node.output_layout, graph.input_layout(id, 0)) else {
            return Ok(false);
        };
        Ok(output.is_static() && output == input)
    }
}

impl Pass for RemoveIdentityPass {
    fn name(&self) -> &str {
        "remove_identity"
    }

    fn stage(&self) -> Stage {
        Stage::Optimization
    }

    fn run(&self, graph: &mut Graph, _ctx: &CompileCtx) -> Result<bool> {
        let mut changed = false;
        for id in graph.topological_order() {
            if !Self::is_identity(graph, id)? {
                continue;
            }
            let producer = graph.input(id, 0)?;
            tracing::debug!(
                node = %graph.get_node(id)?.name,
                into = %graph.get_node(producer)?.name,
                "removing identity"
            );
            graph.replace_node(id, producer, true)?;
            changed = true;
        }
        Ok(changed)
    }
}

impl Default for RemoveIdentityPass {
    fn default() -> Self {
        Self::new()
    }
}
