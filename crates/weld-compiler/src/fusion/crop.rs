//! Padding propagation: a crop reads a window of its input buffer by
//! describing everything outside the window as padding.

use super::{Decision, FusionCtx, Proposal, wrong_kind};
use weld_core::{Assumption, BufferDependencyEdge, Dim, OpKind, OpTag, RejectReason, Result};

pub fn crop_rule(ctx: &FusionCtx) -> Result<Decision> {
    let OpKind::Crop { offsets, sizes } = &ctx.node.kind else {
        return Err(wrong_kind(ctx.node, OpTag::Crop));
    };
    let input = ctx.input_layout(0)?;
    let output = ctx.output_layout()?;
    if input.dtype != output.dtype || input.format != output.format {
        return Ok(Decision::Rejected(RejectReason::LayoutMismatch));
    }
    if input.padding.has_dynamic() {
        return Ok(Decision::Rejected(RejectReason::DynamicShape));
    }

    let mut padding = input.padding.clone();
    let mut pending = false;
    for (axis, dim) in input.shape.iter().enumerate() {
        match dim {
            Dim::Known(n) => {
                let lower = input.padding.lower()[axis] + offsets[axis];
                let upper =
                    input.padding.upper()[axis] + n.saturating_sub(offsets[axis] + sizes[axis]);
                padding.set(axis, lower, upper);
            }
            Dim::Unknown => {
                padding.set_dynamic(axis);
                pending = true;
            }
        }
    }

    let layout = output.clone().with_padding(padding);
    if !ctx.allocator.is_format_layout_valid(&layout) {
        return Ok(Decision::Rejected(RejectReason::InvalidLayout));
    }

    let offset = if pending {
        0
    } else {
        let origin = vec![0; input.rank()];
        match (input.offset_of(offsets), input.offset_of(&origin)) {
            (Ok(start), Ok(base)) => start - base,
            _ => 0,
        }
    };

    let producer = ctx.producer(0)?;
    Ok(Decision::Eligible(Proposal {
        aliased_to: producer,
        offset,
        edges: vec![BufferDependencyEdge::view(producer, ctx.node.id, offset)],
        layouts: vec![(ctx.node.id, layout)],
        assumption: pending.then_some(Assumption::CropWindow),
    }))
}
