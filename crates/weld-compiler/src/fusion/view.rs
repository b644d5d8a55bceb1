//! Metadata-only eliminations: a reshape, an order-preserving permute or a
//! no-op reorder reads its input buffer in place.

use super::{Decision, FusionCtx, Proposal, wrong_kind};
use weld_core::{
    Assumption, BufferDependencyEdge, Compatibility, Dim, Layout, OpKind, OpTag, RejectReason,
    Result,
};

/// Conditions every view shares: plain row-major layouts, no input padding,
/// no element conversion.
fn view_preconditions(input: &Layout, output: &Layout) -> Option<RejectReason> {
    if !input.padding.is_zero() {
        return Some(RejectReason::PaddedInput);
    }
    if input.format.is_blocked() || output.format.is_blocked() {
        return Some(RejectReason::NotMetadataOnly);
    }
    if input.dtype != output.dtype {
        return Some(RejectReason::LayoutMismatch);
    }
    None
}

fn view_decision(
    ctx: &FusionCtx,
    compatibility: Compatibility,
    assumption: Assumption,
) -> Result<Decision> {
    if !compatibility.is_compatible() {
        return Ok(Decision::Rejected(RejectReason::LayoutMismatch));
    }
    let producer = ctx.producer(0)?;
    Ok(Decision::Eligible(Proposal {
        aliased_to: producer,
        offset: 0,
        edges: vec![BufferDependencyEdge::view(producer, ctx.node.id, 0)],
        layouts: Vec::new(),
        assumption: compatibility.is_pending().then_some(assumption),
    }))
}

pub fn reshape_rule(ctx: &FusionCtx) -> Result<Decision> {
    if !matches!(ctx.node.kind, OpKind::Reshape { .. }) {
        return Err(wrong_kind(ctx.node, OpTag::Reshape));
    }
    let input = ctx.input_layout(0)?;
    let output = ctx.output_layout()?;
    if let Some(reason) = view_preconditions(input, output) {
        return Ok(Decision::Rejected(reason));
    }
    let compatibility = input.flattened().compatibility(&output.flattened());
    view_decision(ctx, compatibility, Assumption::ElementCount)
}

/// A permute is a view when every axis that may be larger than one keeps its
/// relative position.
pub fn permute_rule(ctx: &FusionCtx) -> Result<Decision> {
    let OpKind::Permute { order } = &ctx.node.kind else {
        return Err(wrong_kind(ctx.node, OpTag::Permute));
    };
    let input = ctx.input_layout(0)?;
    let output = ctx.output_layout()?;
    if let Some(reason) = view_preconditions(input, output) {
        return Ok(Decision::Rejected(reason));
    }

    let mut previous = None;
    let mut saw_unknown = false;
    for &axis in order {
        let dim = input.shape[axis];
        if dim.is_unit() {
            continue;
        }
        saw_unknown |= dim == Dim::Unknown;
        if previous.is_some_and(|prev| axis < prev) {
            let reason = if saw_unknown {
                RejectReason::DynamicShape
            } else {
                RejectReason::NotMetadataOnly
            };
            return Ok(Decision::Rejected(reason));
        }
        previous = Some(axis);
    }

    let compatibility = input.flattened().compatibility(&output.flattened());
    view_decision(ctx, compatibility, Assumption::ElementCount)
}

/// A reorder whose output layout equals its input layout moves nothing.
pub fn reorder_rule(ctx: &FusionCtx) -> Result<Decision> {
    if !matches!(ctx.node.kind, OpKind::Reorder { .. }) {
        return Err(wrong_kind(ctx.node, OpTag::Reorder));
    }
    let input = ctx.input_layout(0)?;
    let output = ctx.output_layout()?;
    if !input.padding.is_zero() {
        return Ok(Decision::Rejected(RejectReason::PaddedInput));
    }
    view_decision(ctx, input.compatibility(output), Assumption::SameLayout)
}
