//! Shape and layout inference.
//!
//! Each node kind has an inference function registered in an
//! [`InferenceTable`]. Inference runs at compile time over partially known
//! shapes and again at execution time with concrete input shapes, so every
//! function must accept unknown dims and propagate them.
//!
//! Inferred layouts never carry padding; the buffer-fusing pass adds it.

use std::collections::HashMap;
use weld_core::{
    DataType, Dim, Error, Format, Graph, Layout, Node, NodeId, OpKind, OpTag, PartialShape,
    ReshapeTarget, Result,
};

/// Signature of a per-kind inference function.
pub type InferFn = fn(&InferenceCtx) -> Result<Layout>;

/// Read-only view of a node and its producers during inference.
pub struct InferenceCtx<'a> {
    /// The node being processed.
    pub node: &'a Node,

    /// The graph containing the node.
    pub graph: &'a Graph,

    /// Values of runtime inputs, available during execution only.
    runtime_values: Option<&'a HashMap<NodeId, Vec<f64>>>,
}

impl<'a> InferenceCtx<'a> {
    pub fn new(node: &'a Node, graph: &'a Graph) -> Self {
        Self {
            node,
            graph,
            runtime_values: None,
        }
    }

    pub fn with_runtime_values(mut self, values: &'a HashMap<NodeId, Vec<f64>>) -> Self {
        self.runtime_values = Some(values);
        self
    }

    /// Layout of the producer feeding input `slot`.
    pub fn input_layout(&self, slot: usize) -> Result<&'a Layout> {
        let producer = self.node.inputs.get(slot).ok_or_else(|| {
            Error::ShapeInference(format!("node '{}' has no input {slot}", self.node.name))
        })?;
        let node = self.graph.get_node(*producer)?;
        node.output_layout.as_ref().ok_or_else(|| {
            Error::ShapeInference(format!(
                "input {slot} ('{}') of '{}' has no layout yet",
                node.name, self.node.name
            ))
        })
    }

    /// Values of the producer feeding input `slot`, if known.
    ///
    /// Constant data is always known; placeholders only during execution.
    pub fn input_values(&self, slot: usize) -> Option<&'a [f64]> {
        let producer = *self.node.inputs.get(slot)?;
        match &self.graph.get_node(producer).ok()?.kind {
            OpKind::ConstantData { values, .. } => Some(values),
            _ => self
                .runtime_values
                .and_then(|values| values.get(&producer))
                .map(Vec::as_slice),
        }
    }

    fn error(&self, msg: impl std::fmt::Display) -> Error {
        Error::ShapeInference(format!("{} '{}': {msg}", self.node.tag(), self.node.name))
    }
}

/// Dispatch table from node kind to inference function.
#[derive(Clone)]
pub struct InferenceTable {
    rules: HashMap<OpTag, InferFn>,
}

impl InferenceTable {
    /// An empty table.
    pub fn new() -> Self {
        Self {
            rules: HashMap::new(),
        }
    }

    /// A table with every built-in node kind registered.
    pub fn with_defaults() -> Self {
        let mut table = Self::new();
        table
            .register(OpTag::InputPlaceholder, infer_source)
            .register(OpTag::ConstantData, infer_source)
            .register(OpTag::Permute, infer_permute)
            .register(OpTag::Reshape, infer_reshape)
            .register(OpTag::Concatenation, infer_concatenation)
            .register(OpTag::Crop, infer_crop)
            .register(OpTag::Reorder, infer_reorder)
            .register(OpTag::FullyConnected, infer_fully_connected);
        table
    }

    pub fn register(&mut self, tag: OpTag, rule: InferFn) -> &mut Self {
        self.rules.insert(tag, rule);
        self
    }

    pub fn get(&self, tag: OpTag) -> Option<InferFn> {
        self.rules.get(&tag).copied()
    }

    /// Infer the output layout of the node in `ctx`.
    pub fn infer(&self, ctx: &InferenceCtx) -> Result<Layout> {
        let rule = self.get(ctx.node.tag()).ok_or_else(|| {
            Error::ShapeInference(format!("no inference rule for {}", ctx.node.tag()))
        })?;
        let layout = rule(ctx)?;
        layout.validate().map_err(|e| ctx.error(e))?;
        Ok(layout)
    }

    /// Infer every node of `graph` in topological order.
    ///
    /// Returns `true` if any layout changed.
    pub fn infer_graph(
        &self,
        graph: &mut Graph,
        runtime_values: Option<&HashMap<NodeId, Vec<f64>>>,
    ) -> Result<bool> {
        let mut changed = false;
        for id in graph.topological_order() {
            let layout = {
                let node = graph.get_node(id)?;
                let mut ctx = InferenceCtx::new(node, graph);
                if let Some(values) = runtime_values {
                    ctx = ctx.with_runtime_values(values);
                }
                self.infer(&ctx)?
            };
            tracing::trace!(node = ?id, %layout, "inferred");
            if graph.get_node(id)?.output_layout.as_ref() != Some(&layout) {
                graph.set_output_layout(id, layout)?;
                changed = true;
            }
        }
        Ok(changed)
    }
}

impl Default for InferenceTable {
    fn default() -> Self {
        Self::with_defaults()
    }
}

// ───────────────────────────── Inference rules ────────────────────────────

fn infer_source(ctx: &InferenceCtx) -> Result<Layout> {
    let layout = ctx
        .node
        .kind
        .declared_layout()
        .ok_or_else(|| ctx.error("not a source node"))?;
    Ok(Layout::new(layout.shape.clone(), layout.dtype, layout.format))
}

fn infer_permute(ctx: &InferenceCtx) -> Result<Layout> {
    let OpKind::Permute { order } = &ctx.node.kind else {
        return Err(ctx.error("expected permute"));
    };
    let input = ctx.input_layout(0)?;
    if order.len() != input.rank() {
        return Err(ctx.error(format!(
            "order {order:?} does not match input rank {}",
            input.rank()
        )));
    }
    let mut seen = vec![false; order.len()];
    for &axis in order {
        if axis >= order.len() || std::mem::replace(&mut seen[axis], true) {
            return Err(ctx.error(format!("order {order:?} is not a permutation")));
        }
    }
    let shape = PartialShape::new(order.iter().map(|&axis| input.shape[axis]).collect());
    Ok(Layout::plain(shape, input.dtype))
}

fn infer_reshape(ctx: &InferenceCtx) -> Result<Layout> {
    let OpKind::Reshape {
        target,
        special_zero,
    } = &ctx.node.kind
    else {
        return Err(ctx.error("expected reshape"));
    };
    let input = ctx.input_layout(0)?;

    let pattern: Option<Vec<i64>> = match target {
        ReshapeTarget::Static(pattern) => Some(pattern.clone()),
        ReshapeTarget::FromInput { rank } => match ctx.input_values(1) {
            Some(values) => {
                if values.len() != *rank {
                    return Err(ctx.error(format!(
                        "pattern has {} values, expected {rank}",
                        values.len()
                    )));
                }
                Some(values.iter().map(|&v| v as i64).collect())
            }
            None => None,
        },
    };

    let shape = match pattern {
        Some(pattern) => resolve_reshape(&input.shape, &pattern, *special_zero)
            .map_err(|msg| ctx.error(msg))?,
        None => match target {
            ReshapeTarget::FromInput { rank } => PartialShape::dynamic(*rank),
            ReshapeTarget::Static(pattern) => PartialShape::dynamic(pattern.len()),
        },
    };
    Ok(Layout::plain(shape, input.dtype))
}

/// Resolve a reshape pattern against a partially known input shape.
pub fn resolve_reshape(
    input: &PartialShape,
    pattern: &[i64],
    special_zero: bool,
) -> std::result::Result<PartialShape, String> {
    let mut dims = Vec::with_capacity(pattern.len());
    let mut inferred = None;
    for (axis, &value) in pattern.iter().enumerate() {
        let dim = match value {
            -1 => {
                if inferred.replace(axis).is_some() {
                    return Err(format!("pattern {pattern:?} has more than one -1"));
                }
                Dim::Unknown
            }
            0 if special_zero => *input
                .dims()
                .get(axis)
                .ok_or_else(|| format!("pattern {pattern:?} copies missing dim {axis}"))?,
            v if v < 0 => return Err(format!("pattern {pattern:?} has invalid value {v}")),
            v => Dim::Known(v as usize),
        };
        dims.push(dim);
    }

    let input_count = input.element_count();
    let known_product = dims
        .iter()
        .enumerate()
        .filter(|(axis, _)| Some(*axis) != inferred)
        .try_fold(1usize, |acc, (_, d)| d.as_known().map(|n| acc * n));

    match (inferred, input_count, known_product) {
        (Some(axis), Some(count), Some(product)) => {
            if product == 0 || count % product != 0 {
                return Err(format!(
                    "cannot reshape {input} ({count} elements) with pattern {pattern:?}"
                ));
            }
            dims[axis] = Dim::Known(count / product);
        }
        (None, Some(count), Some(product)) if count != product => {
            return Err(format!(
                "cannot reshape {input} ({count} elements) into {product} elements"
            ));
        }
        _ => {}
    }
    Ok(PartialShape::new(dims))
}

fn infer_concatenation(ctx: &InferenceCtx) -> Result<Layout> {
    let OpKind::Concatenation { axis } = &ctx.node.kind else {
        return Err(ctx.error("expected concatenation"));
    };
    let axis = *axis;
    let first = ctx.input_layout(0)?;
    if axis >= first.rank() {
        return Err(ctx.error(format!("axis {axis} out of range for {}", first.shape)));
    }

    let mut dims = first.shape.dims().to_vec();
    for slot in 1..ctx.node.inputs.len() {
        let layout = ctx.input_layout(slot)?;
        if layout.rank() != first.rank()
            || layout.dtype != first.dtype
            || layout.format != first.format
        {
            return Err(ctx.error(format!("input {slot} {layout} does not match {first}")));
        }
        for (i, dim) in dims.iter_mut().enumerate() {
            if i == axis {
                *dim = dim.add(layout.shape[i]);
            } else {
                *dim = dim.merge(layout.shape[i]).ok_or_else(|| {
                    ctx.error(format!(
                        "dim {i} of input {slot} ({}) conflicts with {}",
                        layout.shape, first.shape
                    ))
                })?;
            }
        }
    }
    Ok(Layout::new(PartialShape::new(dims), first.dtype, first.format))
}

fn infer_crop(ctx: &InferenceCtx) -> Result<Layout> {
    let OpKind::Crop { offsets, sizes } = &ctx.node.kind else {
        return Err(ctx.error("expected crop"));
    };
    let input = ctx.input_layout(0)?;
    if offsets.len() != input.rank() || sizes.len() != input.rank() {
        return Err(ctx.error(format!("window rank does not match {}", input.shape)));
    }
    for (axis, dim) in input.shape.iter().enumerate() {
        if let Dim::Known(n) = dim
            && offsets[axis] + sizes[axis] > *n
        {
            return Err(ctx.error(format!(
                "window {:?}+{:?} exceeds {}",
                offsets, sizes, input.shape
            )));
        }
    }
    Ok(Layout::new(
        PartialShape::from_static(sizes),
        input.dtype,
        input.format,
    ))
}

fn infer_reorder(ctx: &InferenceCtx) -> Result<Layout> {
    let OpKind::Reorder { format, dtype } = &ctx.node.kind else {
        return Err(ctx.error("expected reorder"));
    };
    let input = ctx.input_layout(0)?;
    let shape = convert_rank(&input.shape, *format).map_err(|msg| ctx.error(msg))?;
    Ok(Layout::new(shape, *dtype, *format))
}

/// Adapt a shape to the rank a format stores.
///
/// Plain formats of higher rank gain unit spatial dims at axis 2; lower
/// ranks drop unit dims from the same place.
pub fn convert_rank(shape: &PartialShape, format: Format) -> std::result::Result<PartialShape, String> {
    let target = match format {
        Format::Bfyx => shape.rank().min(4),
        Format::Bfzyx | Format::Bfwzyx | Format::BFsYxFsv16 => format.max_rank(),
    };
    let mut shape = shape.clone();
    while shape.rank() < target {
        let axis = shape.rank().min(2);
        shape.insert(axis, Dim::Known(1));
    }
    while shape.rank() > target {
        match shape[2] {
            Dim::Known(1) => {
                shape.remove(2);
            }
            other => {
                return Err(format!(
                    "cannot drop dim {other} of {shape} to fit {format}"
                ));
            }
        }
    }
    Ok(shape)
}

fn infer_fully_connected(ctx: &InferenceCtx) -> Result<Layout> {
    let data = ctx.input_layout(0)?;
    let weights = ctx.input_layout(1)?;
    if data.rank() == 0 {
        return Err(ctx.error("data must have rank 1 or more"));
    }
    if weights.rank() != 2 {
        return Err(ctx.error(format!("weights {} must be rank 2", weights.shape)));
    }
    let k = data.shape[data.rank() - 1];
    let (n, weights_k) = (weights.shape[0], weights.shape[1]);
    if k.merge(weights_k).is_none() {
        return Err(ctx.error(format!(
            "data {} does not match weights {}",
            data.shape, weights.shape
        )));
    }
    if ctx.node.inputs.len() == 3 {
        let bias = ctx.input_layout(2)?;
        let bias_n = bias.shape.dims().last().copied().unwrap_or(Dim::Known(1));
        if n.merge(bias_n).is_none() {
            return Err(ctx.error(format!("bias {} does not match {n} outputs", bias.shape)));
        }
    }

    let mut dims = data.shape.dims()[..data.rank() - 1].to_vec();
    dims.push(n);
    let dtype = if data.dtype.is_float() {
        data.dtype
    } else {
        DataType::F32
    };
    Ok(Layout::plain(PartialShape::new(dims), dtype))
}
