//! Fused execution must match unfused execution, including when a fusion
//! decision taken on partial shapes does not survive the concrete shapes.

mod common;

use common::*;
use rand::SeedableRng;
use rand::rngs::StdRng;
use weld_core::{
    DataType, Graph, Layout, Memory, OpKind, OptimizationState, RejectReason, ReshapeTarget,
};
use weld_runtime::Tensor;

fn blocked_inputs(rng: &mut StdRng, features: [usize; 2]) -> Vec<(String, Tensor)> {
    features
        .iter()
        .enumerate()
        .map(|(i, &f)| {
            let values = random_values(rng, f * 4);
            (format!("x{i}"), Tensor::from_vec(values, &[1, f, 2, 2]))
        })
        .collect()
}

fn as_refs(inputs: &[(String, Tensor)]) -> Vec<(&str, Tensor)> {
    inputs
        .iter()
        .map(|(name, tensor)| (name.as_str(), tensor.clone()))
        .collect()
}

#[test]
fn test_unaligned_blocked_concat_is_demoted() {
    let mut rng = StdRng::seed_from_u64(11);
    let inputs = blocked_inputs(&mut rng, [3, 5]);
    let inputs = as_refs(&inputs);

    let program = compile(blocked_concat_graph(), true);
    assert!(program.can_be_optimized("concat").unwrap());

    let (network, outputs) = run(program, &inputs);
    let report = network.last_report().unwrap();
    assert_eq!(report.demoted.len(), 1);
    assert_eq!(
        network.state("concat").unwrap(),
        OptimizationState::Rejected(RejectReason::RuntimeShapeMismatch)
    );
    // The compiled decision is untouched; only this execution was demoted.
    assert!(network.program().can_be_optimized("concat").unwrap());
    assert!(!Memory::same(
        &network.memory_of("concat").unwrap(),
        &network.memory_of("to_blocked1").unwrap()
    ));

    let (_, reference) = run(compile(blocked_concat_graph(), false), &inputs);
    assert_eq!(outputs["output"].shape(), vec![1, 8, 2, 2]);
    assert_close(
        &outputs["output"].to_vec::<f32>().unwrap(),
        &reference["output"].to_vec::<f32>().unwrap(),
    );
}

#[test]
fn test_aligned_blocked_concat_stays_fused() {
    let mut rng = StdRng::seed_from_u64(12);
    let inputs = blocked_inputs(&mut rng, [16, 5]);
    let inputs = as_refs(&inputs);

    let (network, outputs) = run(compile(blocked_concat_graph(), true), &inputs);
    assert!(network.last_report().unwrap().is_clean());
    assert!(network.state("concat").unwrap().is_optimized());
    assert!(Memory::same(
        &network.memory_of("concat").unwrap(),
        &network.memory_of("to_blocked1").unwrap()
    ));

    let (_, reference) = run(compile(blocked_concat_graph(), false), &inputs);
    assert_close(
        &outputs["output"].to_vec::<f32>().unwrap(),
        &reference["output"].to_vec::<f32>().unwrap(),
    );
}

#[test]
fn test_network_reexecutes_with_new_shapes() {
    let mut rng = StdRng::seed_from_u64(13);
    let mut network = weld_runtime::Network::new(compile(blocked_concat_graph(), true));

    for features in [[3, 5], [16, 5], [32, 1]] {
        for (name, tensor) in blocked_inputs(&mut rng, features) {
            network.set_input_data(&name, tensor).unwrap();
        }
        let outputs = network.execute().unwrap();
        let aligned = features[0] % 16 == 0;
        assert_eq!(network.state("concat").unwrap().is_optimized(), aligned);
        assert_eq!(
            outputs["output"].shape(),
            vec![1, features[0] + features[1], 2, 2]
        );
    }
}

#[test]
fn test_permute_reshape_chain_matches_unfused() {
    let mut rng = StdRng::seed_from_u64(21);
    for (shape, pattern) in [
        ([1, 2, 2, 4], vec![1i64, 4, 1, -1]),
        ([2, 3, 1, 4], vec![2, 2, -1, 3]),
        ([1, 1, 5, 2], vec![1, 2, 5, 1]),
    ] {
        let len = shape.iter().product();
        let input = Tensor::from_vec(random_values(&mut rng, len), &shape);
        let pattern = Tensor::from_vec(pattern.clone(), &[pattern.len()]);
        let (fused, reference) = fused_and_reference(
            &permute_reshape_graph(),
            &[("input", input), ("pattern", pattern)],
            "reorder",
        );
        assert_close(&fused, &reference);
    }
}

#[test]
fn test_static_view_chain_matches_unfused() {
    let mut graph = Graph::new();
    let x = graph
        .add_input("x", Layout::plain(&[2, 1, 3, 4][..], DataType::F32))
        .unwrap();
    let p = graph
        .add_node("p", OpKind::Permute { order: vec![1, 0, 2, 3] }, &[x])
        .unwrap();
    let r = graph
        .add_node(
            "r",
            OpKind::Reshape {
                target: ReshapeTarget::Static(vec![6, -1]),
                special_zero: false,
            },
            &[p],
        )
        .unwrap();
    let t = graph
        .add_node("t", OpKind::Permute { order: vec![1, 0] }, &[r])
        .unwrap();
    graph
        .add_node(
            "out",
            OpKind::Reorder {
                format: weld_core::Format::Bfyx,
                dtype: DataType::I32,
            },
            &[t],
        )
        .unwrap();

    let program = compile(graph.clone(), true);
    assert!(program.can_be_optimized("p").unwrap());
    assert!(program.can_be_optimized("r").unwrap());
    assert!(!program.can_be_optimized("t").unwrap());

    let mut rng = StdRng::seed_from_u64(22);
    for _ in 0..4 {
        let input = Tensor::from_vec(random_values(&mut rng, 24), &[2, 1, 3, 4]);
        let (fused, reference) = fused_and_reference(&graph, &[("x", input)], "out");
        assert_eq!(fused, reference);
        assert!(fused.iter().all(|v| v.fract() == 0.0));
    }
}

fn blocked_crop_graph() -> Graph {
    let mut graph = Graph::new();
    let shape = weld_core::PartialShape::new(vec![
        weld_core::Dim::Known(1),
        weld_core::Dim::Unknown,
        weld_core::Dim::Known(2),
        weld_core::Dim::Known(2),
    ]);
    let x = graph
        .add_input("x", Layout::plain(shape, DataType::F32))
        .unwrap();
    let blocked = graph
        .add_node(
            "to_blocked",
            OpKind::Reorder {
                format: weld_core::Format::BFsYxFsv16,
                dtype: DataType::F32,
            },
            &[x],
        )
        .unwrap();
    let crop = graph
        .add_node(
            "crop",
            OpKind::Crop {
                offsets: vec![0, 3, 0, 0],
                sizes: vec![1, 4, 2, 2],
            },
            &[blocked],
        )
        .unwrap();
    graph
        .add_node(
            "output",
            OpKind::Reorder {
                format: weld_core::Format::Bfyx,
                dtype: DataType::F32,
            },
            &[crop],
        )
        .unwrap();
    graph
}

#[test]
fn test_unaligned_blocked_crop_is_demoted() {
    let program = compile(blocked_crop_graph(), true);
    assert!(program.can_be_optimized("crop").unwrap());
    assert!(program.get_node("crop").unwrap().assumption.is_some());

    let mut rng = StdRng::seed_from_u64(14);
    let values = random_values(&mut rng, 80);
    let inputs = [("x", Tensor::from_vec(values.clone(), &[1, 20, 2, 2]))];
    let (network, outputs) = run(program, &inputs);

    assert_eq!(
        network.state("crop").unwrap(),
        OptimizationState::Rejected(RejectReason::RuntimeShapeMismatch)
    );
    assert_eq!(network.last_report().unwrap().demoted.len(), 1);
    assert!(!Memory::same(
        &network.memory_of("crop").unwrap(),
        &network.memory_of("to_blocked").unwrap()
    ));

    let output = outputs["output"].to_vec::<f32>().unwrap();
    assert_eq!(outputs["output"].shape(), vec![1, 4, 2, 2]);
    assert_close(&output, &values[12..28]);

    let (_, reference) = run(compile(blocked_crop_graph(), false), &inputs);
    assert_close(&output, &reference["output"].to_vec::<f32>().unwrap());
}
