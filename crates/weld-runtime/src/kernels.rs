//! Host reference kernels.
//!
//! Every kernel computes its output in logical row-major order from the
//! logical values of its inputs. Reads and writes go through the node's
//! resolved layout, so padded and blocked buffers shared by fused nodes are
//! addressed the same way the fusion decision described them.

use crate::error::{Result, RuntimeError};
use crate::resolve::InputValues;
use std::collections::HashMap;
use weld_core::{Graph, Layout, Memory, MemoryRef, NodeId, OpKind};

/// Logical values of one node together with their concrete shape.
struct Logical {
    values: Vec<f64>,
    dims: Vec<usize>,
}

/// Read the logical contents of `memory` as described by `layout`.
pub fn read_logical(memory: &Memory, layout: &Layout) -> Result<Vec<f64>> {
    let dims = static_dims(layout)?;
    let addressing = layout.addressing()?;
    let data = memory.read();
    let count: usize = dims.iter().product();
    let mut index = vec![0; dims.len()];
    let mut values = Vec::with_capacity(count);
    for linear in 0..count {
        unravel(linear, &dims, &mut index);
        let offset = addressing.offset(&index);
        let value = data.get(offset).copied().ok_or_else(|| out_of_bounds(offset, data.len()))?;
        values.push(value);
    }
    Ok(values)
}

/// Write logical `values` into `memory` as described by `layout`.
pub fn write_logical(memory: &Memory, layout: &Layout, values: &[f64]) -> Result<()> {
    let dims = static_dims(layout)?;
    let count: usize = dims.iter().product();
    if values.len() != count {
        return Err(RuntimeError::ExecutionError(format!(
            "{} values for layout {layout}",
            values.len()
        )));
    }
    let addressing = layout.addressing()?;
    let mut data = memory.write();
    let len = data.len();
    let mut index = vec![0; dims.len()];
    for (linear, &value) in values.iter().enumerate() {
        unravel(linear, &dims, &mut index);
        let offset = addressing.offset(&index);
        *data.get_mut(offset).ok_or_else(|| out_of_bounds(offset, len))? = value;
    }
    Ok(())
}

/// Run the kernel of every node that is not optimized, producers first.
#[tracing::instrument(skip_all)]
pub fn execute_graph(
    graph: &Graph,
    memories: &HashMap<NodeId, MemoryRef>,
    inputs: &InputValues,
) -> Result<()> {
    for id in graph.topological_order() {
        run_node(graph, id, memories, inputs)?;
    }
    Ok(())
}

fn run_node(
    graph: &Graph,
    id: NodeId,
    memories: &HashMap<NodeId, MemoryRef>,
    inputs: &InputValues,
) -> Result<()> {
    let node = graph.get_node(id)?;
    if node.state.is_optimized() {
        tracing::trace!(node = %node.name, "skipped");
        return Ok(());
    }
    let layout = graph.output_layout(id)?;
    let input = |slot: usize| read_input(graph, id, slot, memories);

    let values = match &node.kind {
        OpKind::InputPlaceholder { .. } => inputs
            .get(&id)
            .cloned()
            .ok_or_else(|| RuntimeError::InputNotSet(node.name.clone()))?,
        OpKind::ConstantData { values, .. } => values.clone(),
        OpKind::Permute { order } => permute(&input(0)?, order),
        OpKind::Reshape { .. } => input(0)?.values,
        OpKind::Concatenation { axis } => {
            let parts = (0..node.inputs.len())
                .map(input)
                .collect::<Result<Vec<_>>>()?;
            concatenate(&parts, *axis, &static_dims(layout)?)
        }
        OpKind::Crop { offsets, sizes } => crop(&input(0)?, offsets, sizes),
        OpKind::Reorder { dtype, .. } => input(0)?
            .values
            .into_iter()
            .map(|v| dtype.convert(v))
            .collect(),
        OpKind::FullyConnected => {
            let bias = if node.inputs.len() > 2 {
                Some(input(2)?.values)
            } else {
                None
            };
            fully_connected(&input(0)?, &input(1)?, bias.as_deref())?
        }
    };

    let memory = memories.get(&id).ok_or_else(|| {
        RuntimeError::ExecutionError(format!("no memory bound to '{}'", node.name))
    })?;
    tracing::trace!(node = %node.name, %layout, memory = memory.id(), "run");
    write_logical(memory, layout, &values)
}

fn read_input(
    graph: &Graph,
    id: NodeId,
    slot: usize,
    memories: &HashMap<NodeId, MemoryRef>,
) -> Result<Logical> {
    let producer = graph.input(id, slot)?;
    let layout = graph.output_layout(producer)?;
    let memory = memories.get(&producer).ok_or_else(|| {
        RuntimeError::ExecutionError(format!("no memory bound to input {slot} of {id:?}"))
    })?;
    Ok(Logical {
        values: read_logical(memory, layout)?,
        dims: static_dims(layout)?,
    })
}

fn permute(input: &Logical, order: &[usize]) -> Vec<f64> {
    let out_dims: Vec<usize> = order.iter().map(|&axis| input.dims[axis]).collect();
    let count: usize = out_dims.iter().product();
    let mut out_index = vec![0; out_dims.len()];
    let mut in_index = vec![0; input.dims.len()];
    (0..count)
        .map(|linear| {
            unravel(linear, &out_dims, &mut out_index);
            for (i, &axis) in order.iter().enumerate() {
                in_index[axis] = out_index[i];
            }
            input.values[ravel(&in_index, &input.dims)]
        })
        .collect()
}

fn concatenate(parts: &[Logical], axis: usize, out_dims: &[usize]) -> Vec<f64> {
    let count: usize = out_dims.iter().product();
    let mut index = vec![0; out_dims.len()];
    let mut values = Vec::with_capacity(count);
    for linear in 0..count {
        unravel(linear, out_dims, &mut index);
        let mut coord = index[axis];
        for part in parts {
            if coord < part.dims[axis] {
                index[axis] = coord;
                values.push(part.values[ravel(&index, &part.dims)]);
                break;
            }
            coord -= part.dims[axis];
        }
    }
    values
}

fn crop(input: &Logical, offsets: &[usize], sizes: &[usize]) -> Vec<f64> {
    let count: usize = sizes.iter().product();
    let mut index = vec![0; sizes.len()];
    (0..count)
        .map(|linear| {
            unravel(linear, sizes, &mut index);
            for (i, offset) in index.iter_mut().zip(offsets) {
                *i += offset;
            }
            input.values[ravel(&index, &input.dims)]
        })
        .collect()
}

/// `out[m, n] = Σ_k data[m, k] * weights[n, k] + bias[n]`.
fn fully_connected(data: &Logical, weights: &Logical, bias: Option<&[f64]>) -> Result<Vec<f64>> {
    let (&k, _) = data
        .dims
        .split_last()
        .ok_or_else(|| RuntimeError::ExecutionError("fully connected on a scalar".into()))?;
    let [n, wk] = weights.dims[..] else {
        return Err(RuntimeError::ExecutionError(format!(
            "fully connected weights must be rank 2, got {:?}",
            weights.dims
        )));
    };
    if wk != k {
        return Err(RuntimeError::ExecutionError(format!(
            "fully connected K mismatch: {k} vs {wk}"
        )));
    }

    let rows = if k == 0 { 0 } else { data.values.len() / k };
    let mut out = Vec::with_capacity(rows * n);
    for row in data.values.chunks_exact(k.max(1)).take(rows) {
        for (j, w) in weights.values.chunks_exact(k.max(1)).take(n).enumerate() {
            let dot: f64 = row.iter().zip(w).map(|(a, b)| a * b).sum();
            out.push(dot + bias.map_or(0.0, |b| b[j]));
        }
    }
    Ok(out)
}

fn static_dims(layout: &Layout) -> Result<Vec<usize>> {
    layout.shape.to_static().ok_or_else(|| {
        RuntimeError::ExecutionError(format!("layout {layout} is not resolved"))
    })
}

fn unravel(mut linear: usize, dims: &[usize], index: &mut [usize]) {
    for axis in (0..dims.len()).rev() {
        index[axis] = linear % dims[axis];
        linear /= dims[axis];
    }
}

fn ravel(index: &[usize], dims: &[usize]) -> usize {
    index
        .iter()
        .zip(dims)
        .fold(0, |acc, (&i, &d)| acc * d + i)
}

fn out_of_bounds(offset: usize, len: usize) -> RuntimeError {
    RuntimeError::ExecutionError(format!("offset {offset} outside buffer of {len} elements"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_core::{DataType, Format, Padding};

    fn logical(values: Vec<f64>, dims: &[usize]) -> Logical {
        Logical {
            values,
            dims: dims.to_vec(),
        }
    }

    #[test]
    fn test_padded_write_then_read() {
        let padding = Padding::new(vec![0, 1], vec![0, 2]).unwrap();
        let layout = Layout::plain(&[2, 2][..], DataType::F32).with_padding(padding);
        let memory = Memory::zeroed(layout.buffer_elements().unwrap(), DataType::F32);

        write_logical(&memory, &layout, &[1.0, 2.0, 3.0, 4.0]).unwrap();
        assert_eq!(
            memory.to_vec(),
            vec![0.0, 1.0, 2.0, 0.0, 0.0, 0.0, 3.0, 4.0, 0.0, 0.0]
        );
        assert_eq!(read_logical(&memory, &layout).unwrap(), vec![1.0, 2.0, 3.0, 4.0]);
    }

    #[test]
    fn test_blocked_layout_round_trips() {
        let layout = Layout::new(&[1, 3, 2, 2][..], DataType::F32, Format::BFsYxFsv16);
        let memory = Memory::zeroed(layout.buffer_elements().unwrap(), DataType::F32);
        let values: Vec<f64> = (0..12).map(|v| v as f64).collect();

        write_logical(&memory, &layout, &values).unwrap();
        // Feature 1 of spatial position (1, 0) lives in lane 1 of block row 2.
        assert_eq!(memory.read()[2 * 16 + 1], 6.0);
        assert_eq!(read_logical(&memory, &layout).unwrap(), values);
    }

    #[test]
    fn test_permute_and_crop() {
        let input = logical((0..6).map(|v| v as f64).collect(), &[2, 3]);
        assert_eq!(permute(&input, &[1, 0]), vec![0.0, 3.0, 1.0, 4.0, 2.0, 5.0]);
        assert_eq!(crop(&input, &[1, 1], &[1, 2]), vec![4.0, 5.0]);
    }

    #[test]
    fn test_concatenate_middle_axis() {
        let a = logical(vec![1.0, 2.0], &[2, 1]);
        let b = logical(vec![3.0, 4.0, 5.0, 6.0], &[2, 2]);
        assert_eq!(
            concatenate(&[a, b], 1, &[2, 3]),
            vec![1.0, 3.0, 4.0, 2.0, 5.0, 6.0]
        );
    }

    #[test]
    fn test_fully_connected_with_bias() {
        let data = logical(vec![1.0, 2.0, 3.0, 4.0], &[2, 2]);
        let weights = logical(vec![1.0, 0.0, 1.0, 1.0], &[2, 2]);
        let out = fully_connected(&data, &weights, Some(&[0.5, -1.0][..])).unwrap();
        assert_eq!(out, vec![1.5, 2.0, 3.5, 6.0]);

        let bad = logical(vec![1.0; 3], &[1, 3]);
        assert!(fully_connected(&data, &bad, None).is_err());
    }
}
