//! Runtime shape resolution.
//!
//! Substitutes the shapes of the bound input tensors into the declared input
//! layouts and re-runs layout inference over the whole graph, with input
//! values available to data-dependent nodes such as a reshape whose pattern
//! is a graph input.

use crate::error::{Result, RuntimeError};
use crate::tensor::Tensor;
use std::collections::HashMap;
use weld_compiler::InferenceTable;
use weld_core::{Graph, NodeId, OpKind};

/// Values of every input placeholder, as `f64` lanes in logical order.
pub type InputValues = HashMap<NodeId, Vec<f64>>;

/// Resolve every layout of `graph` against the bound inputs.
///
/// Layouts are recomputed from scratch, so padding installed by fusion is
/// dropped and must be recomputed by revalidation.
#[tracing::instrument(skip_all)]
pub fn resolve_shapes(graph: &mut Graph, inputs: &HashMap<NodeId, Tensor>) -> Result<InputValues> {
    let placeholders: Vec<NodeId> = graph
        .nodes()
        .filter(|node| matches!(node.kind, OpKind::InputPlaceholder { .. }))
        .map(|node| node.id)
        .collect();

    let mut values = InputValues::with_capacity(placeholders.len());
    for id in placeholders {
        let node = graph.get_node(id)?;
        let tensor = inputs
            .get(&id)
            .ok_or_else(|| RuntimeError::InputNotSet(node.name.clone()))?;
        let OpKind::InputPlaceholder { layout } = &node.kind else {
            continue;
        };
        if tensor.dtype() != layout.dtype {
            return Err(RuntimeError::TensorError(format!(
                "input '{}' expects {}, got {}",
                node.name,
                layout.dtype,
                tensor.dtype()
            )));
        }
        let realized = layout.realize(tensor.shape())?;
        tracing::debug!(input = %node.name, layout = %realized, "realized");

        values.insert(id, tensor.to_lanes()?);
        graph.node_mut(id)?.kind = OpKind::InputPlaceholder { layout: realized };
    }

    InferenceTable::with_defaults().infer_graph(graph, Some(&values))?;

    if let Some(node) = graph
        .nodes()
        .find(|node| node.output_layout.as_ref().is_none_or(|l| !l.is_static()))
    {
        return Err(RuntimeError::ExecutionError(format!(
            "shape of '{}' is still unknown after resolution",
            node.name
        )));
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_core::{DataType, Dim, Error, Layout, PartialShape, ReshapeTarget};

    fn dynamic_reshape_graph() -> (Graph, NodeId, NodeId, NodeId) {
        let mut graph = Graph::new();
        let x = graph
            .add_input(
                "x",
                Layout::plain(
                    PartialShape::new(vec![Dim::Known(2), Dim::Unknown]),
                    DataType::F32,
                ),
            )
            .unwrap();
        let pattern = graph
            .add_input("pattern", Layout::plain(PartialShape::dynamic(1), DataType::I64))
            .unwrap();
        let r = graph
            .add_node(
                "r",
                OpKind::Reshape {
                    target: ReshapeTarget::FromInput { rank: 2 },
                    special_zero: false,
                },
                &[x, pattern],
            )
            .unwrap();
        (graph, x, pattern, r)
    }

    #[test]
    fn test_pattern_values_drive_reshape() {
        let (mut graph, x, pattern, r) = dynamic_reshape_graph();
        let inputs = HashMap::from([
            (x, Tensor::from_vec(vec![0.0f32; 6], &[2, 3])),
            (pattern, Tensor::from_vec(vec![3i64, -1], &[2])),
        ]);

        let values = resolve_shapes(&mut graph, &inputs).unwrap();
        assert_eq!(values[&pattern], vec![3.0, -1.0]);
        assert_eq!(
            graph.output_layout(r).unwrap().shape,
            PartialShape::from_static(&[3, 2])
        );
    }

    #[test]
    fn test_missing_and_mismatched_inputs() {
        let (mut graph, x, pattern, _) = dynamic_reshape_graph();
        let only_x = HashMap::from([(x, Tensor::from_vec(vec![0.0f32; 6], &[2, 3]))]);
        assert!(matches!(
            resolve_shapes(&mut graph.clone(), &only_x),
            Err(RuntimeError::InputNotSet(name)) if name == "pattern"
        ));

        let wrong_dim = HashMap::from([
            (x, Tensor::from_vec(vec![0.0f32; 6], &[3, 2])),
            (pattern, Tensor::from_vec(vec![3i64, -1], &[2])),
        ]);
        assert!(matches!(
            resolve_shapes(&mut graph, &wrong_dim),
            Err(RuntimeError::Core(Error::ShapeMismatch(_)))
        ));
    }
}
