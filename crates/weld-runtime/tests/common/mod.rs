//! Shared graph builders and helpers for the runtime integration tests.

#![allow(dead_code)]

use rand::Rng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use weld_compiler::{Program, build_program};
use weld_core::{
    BuildConfig, DataType, Dim, Format, Graph, Layout, NodeId, OpKind, PartialShape,
    ReshapeTarget,
};
use weld_runtime::{Network, NetworkOutput, Tensor};

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_target(false)
        .with_test_writer()
        .try_init();
}

pub fn random_values(rng: &mut StdRng, len: usize) -> Vec<f32> {
    (0..len).map(|_| rng.gen_range(-10.0..10.0)).collect()
}

pub fn assert_close<T: Copy + Into<f64>>(actual: &[T], expected: &[T]) {
    assert_eq!(actual.len(), expected.len(), "length mismatch");
    for (i, (&a, &e)) in actual.iter().zip(expected).enumerate() {
        let (a, e): (f64, f64) = (a.into(), e.into());
        assert!(
            (a - e).abs() <= 1e-5 * e.abs().max(1.0),
            "element {i}: got {a}, expected {e}"
        );
    }
}

pub fn compile(graph: Graph, optimize: bool) -> Program {
    init_tracing();
    build_program(graph, BuildConfig::default().with_optimize_data(optimize))
        .expect("graph should compile")
}

/// Bind `inputs`, execute and return the network with its outputs.
pub fn run(program: Program, inputs: &[(&str, Tensor)]) -> (Network, HashMap<String, NetworkOutput>) {
    let mut network = Network::new(program);
    for (name, tensor) in inputs {
        network
            .set_input_data(name, tensor.clone())
            .expect("input should bind");
    }
    let outputs = network.execute().expect("execution should succeed");
    (network, outputs)
}

/// Execute `graph` once fused and once unfused and return the host lanes of
/// output `name` from both runs.
pub fn fused_and_reference(graph: &Graph, inputs: &[(&str, Tensor)], name: &str) -> (Vec<f64>, Vec<f64>) {
    let (_, fused) = run(compile(graph.clone(), true), inputs);
    let (_, reference) = run(compile(graph.clone(), false), inputs);
    (
        fused[name].to_lanes().unwrap(),
        reference[name].to_lanes().unwrap(),
    )
}

fn reorder(graph: &mut Graph, name: &str, input: NodeId, format: Format) -> NodeId {
    graph
        .add_node(
            name,
            OpKind::Reorder {
                format,
                dtype: DataType::F32,
            },
            &[input],
        )
        .unwrap()
}

fn permute(graph: &mut Graph, name: &str, input: NodeId, order: &[usize]) -> NodeId {
    graph
        .add_node(
            name,
            OpKind::Permute {
                order: order.to_vec(),
            },
            &[input],
        )
        .unwrap()
}

/// `input → permute(0,2,3,1) → reshape(pattern) → permute(0,3,2,1) → reorder`
/// with the reshape pattern supplied as the runtime input `pattern`.
pub fn permute_reshape_graph() -> Graph {
    let mut graph = Graph::new();
    let input = graph
        .add_input("input", Layout::plain(PartialShape::dynamic(4), DataType::F32))
        .unwrap();
    let pattern = graph
        .add_input("pattern", Layout::plain(PartialShape::dynamic(1), DataType::I64))
        .unwrap();
    let p1 = permute(&mut graph, "permute1", input, &[0, 2, 3, 1]);
    let reshape = graph
        .add_node(
            "reshape",
            OpKind::Reshape {
                target: ReshapeTarget::FromInput { rank: 4 },
                special_zero: false,
            },
            &[p1, pattern],
        )
        .unwrap();
    let p2 = permute(&mut graph, "permute2", reshape, &[0, 3, 2, 1]);
    reorder(&mut graph, "reorder", p2, Format::Bfyx);
    graph
}

/// `[1,2,?] → permute(0,2,1) → reshape[2,4] → fully_connected(ones[2,4]) → reorder`.
pub fn fc_after_dynamic_reshape_graph() -> Graph {
    let mut graph = Graph::new();
    let shape = PartialShape::new(vec![Dim::Known(1), Dim::Known(2), Dim::Unknown]);
    let input = graph
        .add_input("input", Layout::plain(shape, DataType::F32))
        .unwrap();
    let weights = graph
        .add_constant("weights", Layout::plain(&[2, 4][..], DataType::F32), vec![1.0; 8])
        .unwrap();
    let p = permute(&mut graph, "permute1", input, &[0, 2, 1]);
    let reshape = graph
        .add_node(
            "reshape",
            OpKind::Reshape {
                target: ReshapeTarget::Static(vec![2, 4]),
                special_zero: false,
            },
            &[p],
        )
        .unwrap();
    let fc = graph
        .add_node("fc", OpKind::FullyConnected, &[reshape, weights])
        .unwrap();
    reorder(&mut graph, "reorder", fc, Format::Bfyx);
    graph
}

/// `[1,4,3,3] → split(axis 1, [2,2]) → reorder(bfzyx) each → concat(axis 1) → reorder(bfyx)`.
pub fn split_concat_graph() -> Graph {
    let mut graph = Graph::new();
    let input = graph
        .add_input("input", Layout::plain(&[1, 4, 3, 3][..], DataType::F32))
        .unwrap();
    let crops = graph.add_split("split", input, 1, &[2, 2]).unwrap();
    let reorders: Vec<NodeId> = crops
        .iter()
        .enumerate()
        .map(|(i, &crop)| reorder(&mut graph, &format!("crop_{i}_reorder"), crop, Format::Bfzyx))
        .collect();
    let concat = graph
        .add_node("concat", OpKind::Concatenation { axis: 1 }, &reorders)
        .unwrap();
    reorder(&mut graph, "output", concat, Format::Bfyx);
    graph
}

/// `input1[1,2,3,4] → permute(0,3,2,1)` and `input2[1,2,4,1] → permute(3,2,0,1)`,
/// concatenated on axis 2, then `permute(0,2,3,1)`.
pub fn in_place_concat_graph(dynamic: bool) -> Graph {
    let declare = |dims: &[usize]| {
        if dynamic {
            Layout::plain(PartialShape::dynamic(dims.len()), DataType::F32)
        } else {
            Layout::plain(dims, DataType::F32)
        }
    };
    let mut graph = Graph::new();
    let input1 = graph.add_input("input1", declare(&[1, 2, 3, 4])).unwrap();
    let input2 = graph.add_input("input2", declare(&[1, 2, 4, 1])).unwrap();
    let p1 = permute(&mut graph, "permute1", input1, &[0, 3, 2, 1]);
    let p2 = permute(&mut graph, "permute2", input2, &[3, 2, 0, 1]);
    let concat = graph
        .add_node("concat", OpKind::Concatenation { axis: 2 }, &[p1, p2])
        .unwrap();
    permute(&mut graph, "output", concat, &[0, 2, 3, 1]);
    graph
}

/// Two `[1,?,2,2]` inputs reordered to the blocked format and concatenated on
/// the feature axis.
pub fn blocked_concat_graph() -> Graph {
    let mut graph = Graph::new();
    let mut producers = Vec::new();
    for i in 0..2 {
        let shape = PartialShape::new(vec![Dim::Known(1), Dim::Unknown, Dim::Known(2), Dim::Known(2)]);
        let input = graph
            .add_input(format!("x{i}"), Layout::plain(shape, DataType::F32))
            .unwrap();
        producers.push(reorder(
            &mut graph,
            &format!("to_blocked{i}"),
            input,
            Format::BFsYxFsv16,
        ));
    }
    let concat = graph
        .add_node("concat", OpKind::Concatenation { axis: 1 }, &producers)
        .unwrap();
    reorder(&mut graph, "output", concat, Format::Bfyx);
    graph
}
