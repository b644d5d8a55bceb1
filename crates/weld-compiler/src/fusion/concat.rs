//! In-place concatenation: every producer writes straight into its slice of
//! the concatenated buffer, so the concatenation itself copies nothing.
//!
//! Slice `i` is expressed as padding on the producer's output layout:
//! the lower padding on the concatenation axis covers the slices before it,
//! the upper padding the slices after it.

use super::{Decision, FusionCtx, Proposal, wrong_kind};
use weld_core::{
    Assumption, BufferDependencyEdge, Dim, OpKind, OpTag, Padding, RejectReason, Result,
};

/// Kinds whose kernel can write into a padded slice of a larger buffer.
fn writes_padded_output(kind: &OpKind) -> bool {
    matches!(
        kind,
        OpKind::Permute { .. }
            | OpKind::Reorder { .. }
            | OpKind::FullyConnected
            | OpKind::Concatenation { .. }
    )
}

pub fn concatenation_rule(ctx: &FusionCtx) -> Result<Decision> {
    let OpKind::Concatenation { axis } = &ctx.node.kind else {
        return Err(wrong_kind(ctx.node, OpTag::Concatenation));
    };
    let axis = *axis;
    let output = ctx.output_layout()?;
    let graph = ctx.graph;

    let mut producer_layouts = Vec::with_capacity(ctx.node.inputs.len());
    for &producer in &ctx.node.inputs {
        let node = graph.get_node(producer)?;
        let aliased_elsewhere = graph
            .dependencies()
            .edge_for_member(producer)
            .is_some_and(|edge| edge.owner != ctx.node.id);
        if node.state.is_optimized() || aliased_elsewhere {
            return Ok(Decision::Rejected(RejectReason::ProducerAliased));
        }
        if !writes_padded_output(&node.kind) {
            return Ok(Decision::Rejected(RejectReason::ProducerNotWritable));
        }
        if graph.consumers(producer) != [ctx.node.id] || graph.is_output(producer) {
            return Ok(Decision::Rejected(RejectReason::SharedProducer));
        }
        let layout = graph.output_layout(producer)?;
        if layout.dtype != output.dtype || layout.format != output.format {
            return Ok(Decision::Rejected(RejectReason::LayoutMismatch));
        }
        if !layout.padding.is_zero() {
            return Ok(Decision::Rejected(RejectReason::PaddedInput));
        }
        producer_layouts.push(layout);
    }

    let extents: Vec<Dim> = producer_layouts.iter().map(|l| l.shape[axis]).collect();
    let mut after = vec![Dim::Known(0); extents.len()];
    for i in (0..extents.len().saturating_sub(1)).rev() {
        after[i] = after[i + 1].add(extents[i + 1]);
    }

    let mut edges = Vec::with_capacity(extents.len());
    let mut layouts = Vec::with_capacity(extents.len());
    let mut before = Dim::Known(0);
    let mut pending = false;
    for (index, (&producer, layout)) in ctx.node.inputs.iter().zip(&producer_layouts).enumerate() {
        let mut padding = Padding::zero(layout.rank());
        match (before, after[index]) {
            (Dim::Known(lower), Dim::Known(upper)) => padding.set(axis, lower, upper),
            _ => {
                padding.set_dynamic(axis);
                pending = true;
            }
        }
        let slice = (*layout).clone().with_padding(padding);
        if !ctx.allocator.is_format_layout_valid(&slice) {
            return Ok(Decision::Rejected(RejectReason::InvalidLayout));
        }

        edges.push(BufferDependencyEdge::slice(
            ctx.node.id,
            producer,
            index,
            axis,
            before,
            extents[index],
        ));
        layouts.push((producer, slice));
        before = before.add(extents[index]);
    }

    Ok(Decision::Eligible(Proposal {
        aliased_to: ctx.node.id,
        offset: 0,
        edges,
        layouts,
        assumption: pending.then_some(Assumption::SliceLayout { axis }),
    }))
}
