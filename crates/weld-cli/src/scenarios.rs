//! Built-in graphs that exercise each fusion.

use rand::Rng;
use rand::rngs::StdRng;
use weld_core::{
    DataType, Dim, Format, Graph, Layout, NodeId, OpKind, PartialShape, ReshapeTarget, Result,
};
use weld_runtime::Tensor;

/// A named graph plus a generator for matching inputs.
#[derive(Clone, Copy)]
pub struct Scenario {
    pub name: &'static str,
    pub description: &'static str,
    build: fn() -> Result<Graph>,
    inputs: fn(&mut StdRng) -> Vec<(&'static str, Tensor)>,
}

impl Scenario {
    pub fn graph(&self) -> Result<Graph> {
        (self.build)()
    }

    /// Random inputs for one execution.
    pub fn inputs(&self, rng: &mut StdRng) -> Vec<(&'static str, Tensor)> {
        (self.inputs)(rng)
    }
}

pub fn catalog() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "permute-reshape",
            description: "permute, reshape with a runtime pattern, permute, reorder",
            build: permute_reshape,
            inputs: |rng| {
                vec![
                    ("input", random_tensor(rng, &[1, 2, 2, 4])),
                    ("pattern", Tensor::from_vec(vec![1i64, 4, 1, -1], &[4])),
                ]
            },
        },
        Scenario {
            name: "fc-after-reshape",
            description: "fully connected layer after a reshape of a partially known shape",
            build: fc_after_reshape,
            inputs: |rng| vec![("input", random_tensor(rng, &[1, 2, 4]))],
        },
        Scenario {
            name: "split-concat",
            description: "split into crops, reorder each, concatenate back",
            build: split_concat,
            inputs: |rng| vec![("input", random_tensor(rng, &[1, 4, 3, 3]))],
        },
        Scenario {
            name: "in-place-concat",
            description: "two permuted inputs concatenated in place",
            build: || in_place_concat(false),
            inputs: in_place_concat_inputs,
        },
        Scenario {
            name: "in-place-concat-dynamic",
            description: "in-place concatenation declared with unknown shapes",
            build: || in_place_concat(true),
            inputs: in_place_concat_inputs,
        },
        Scenario {
            name: "blocked-concat",
            description: "blocked-format concatenation that revalidation must demote",
            build: blocked_concat,
            inputs: |rng| {
                vec![
                    ("x0", random_tensor(rng, &[1, 3, 2, 2])),
                    ("x1", random_tensor(rng, &[1, 5, 2, 2])),
                ]
            },
        },
        Scenario {
            name: "blocked-concat-aligned",
            description: "blocked-format concatenation with block-aligned slices",
            build: blocked_concat,
            inputs: |rng| {
                vec![
                    ("x0", random_tensor(rng, &[1, 16, 2, 2])),
                    ("x1", random_tensor(rng, &[1, 5, 2, 2])),
                ]
            },
        },
    ]
}

pub fn find(name: &str) -> Option<Scenario> {
    catalog().into_iter().find(|s| s.name == name)
}

fn random_tensor(rng: &mut StdRng, shape: &[usize]) -> Tensor {
    let len: usize = shape.iter().product();
    let values: Vec<f32> = (0..len).map(|_| rng.gen_range(-10.0..10.0)).collect();
    Tensor::from_vec(values, shape)
}

fn permute(graph: &mut Graph, name: &str, input: NodeId, order: &[usize]) -> Result<NodeId> {
    graph.add_node(
        name,
        OpKind::Permute {
            order: order.to_vec(),
        },
        &[input],
    )
}

fn reorder(graph: &mut Graph, name: &str, input: NodeId, format: Format) -> Result<NodeId> {
    graph.add_node(
        name,
        OpKind::Reorder {
            format,
            dtype: DataType::F32,
        },
        &[input],
    )
}

fn permute_reshape() -> Result<Graph> {
    let mut graph = Graph::new();
    let input = graph.add_input("input", Layout::plain(PartialShape::dynamic(4), DataType::F32))?;
    let pattern =
        graph.add_input("pattern", Layout::plain(PartialShape::dynamic(1), DataType::I64))?;
    let p1 = permute(&mut graph, "permute1", input, &[0, 2, 3, 1])?;
    let reshape = graph.add_node(
        "reshape",
        OpKind::Reshape {
            target: ReshapeTarget::FromInput { rank: 4 },
            special_zero: false,
        },
        &[p1, pattern],
    )?;
    let p2 = permute(&mut graph, "permute2", reshape, &[0, 3, 2, 1])?;
    reorder(&mut graph, "reorder", p2, Format::Bfyx)?;
    Ok(graph)
}

fn fc_after_reshape() -> Result<Graph> {
    let mut graph = Graph::new();
    let shape = PartialShape::new(vec![Dim::Known(1), Dim::Known(2), Dim::Unknown]);
    let input = graph.add_input("input", Layout::plain(shape, DataType::F32))?;
    let weights = graph.add_constant(
        "weights",
        Layout::plain(&[2, 4][..], DataType::F32),
        vec![1.0; 8],
    )?;
    let p = permute(&mut graph, "permute1", input, &[0, 2, 1])?;
    let reshape = graph.add_node(
        "reshape",
        OpKind::Reshape {
            target: ReshapeTarget::Static(vec![2, 4]),
            special_zero: false,
        },
        &[p],
    )?;
    let fc = graph.add_node("fc", OpKind::FullyConnected, &[reshape, weights])?;
    reorder(&mut graph, "reorder", fc, Format::Bfyx)?;
    Ok(graph)
}

fn split_concat() -> Result<Graph> {
    let mut graph = Graph::new();
    let input = graph.add_input("input", Layout::plain(&[1, 4, 3, 3][..], DataType::F32))?;
    let crops = graph.add_split("split", input, 1, &[2, 2])?;
    let mut reorders = Vec::with_capacity(crops.len());
    for (i, crop) in crops.into_iter().enumerate() {
        reorders.push(reorder(
            &mut graph,
            &format!("crop_{i}_reorder"),
            crop,
            Format::Bfzyx,
        )?);
    }
    let concat = graph.add_node("concat", OpKind::Concatenation { axis: 1 }, &reorders)?;
    reorder(&mut graph, "output", concat, Format::Bfyx)?;
    Ok(graph)
}

fn in_place_concat(dynamic: bool) -> Result<Graph> {
    let declare = |dims: &[usize]| {
        if dynamic {
            Layout::plain(PartialShape::dynamic(dims.len()), DataType::F32)
        } else {
            Layout::plain(dims, DataType::F32)
        }
    };
    let mut graph = Graph::new();
    let input1 = graph.add_input("input1", declare(&[1, 2, 3, 4]))?;
    let input2 = graph.add_input("input2", declare(&[1, 2, 4, 1]))?;
    let p1 = permute(&mut graph, "permute1", input1, &[0, 3, 2, 1])?;
    let p2 = permute(&mut graph, "permute2", input2, &[3, 2, 0, 1])?;
    let concat = graph.add_node("concat", OpKind::Concatenation { axis: 2 }, &[p1, p2])?;
    permute(&mut graph, "output", concat, &[0, 2, 3, 1])?;
    Ok(graph)
}

fn in_place_concat_inputs(rng: &mut StdRng) -> Vec<(&'static str, Tensor)> {
    vec![
        ("input1", random_tensor(rng, &[1, 2, 3, 4])),
        ("input2", random_tensor(rng, &[1, 2, 4, 1])),
    ]
}

fn blocked_concat() -> Result<Graph> {
    let mut graph = Graph::new();
    let mut producers = Vec::with_capacity(2);
    for i in 0..2 {
        let shape = PartialShape::new(vec![
            Dim::Known(1),
            Dim::Unknown,
            Dim::Known(2),
            Dim::Known(2),
        ]);
        let input = graph.add_input(format!("x{i}"), Layout::plain(shape, DataType::F32))?;
        producers.push(reorder(
            &mut graph,
            &format!("to_blocked{i}"),
            input,
            Format::BFsYxFsv16,
        )?);
    }
    let concat = graph.add_node("concat", OpKind::Concatenation { axis: 1 }, &producers)?;
    reorder(&mut graph, "output", concat, Format::Bfyx)?;
    Ok(graph)
}
