//! End-to-end execution of fused programs on the host engine.

mod common;

use common::*;
use weld_compiler::BufferFusingPass;
use weld_core::{BuildConfig, Memory, OpTag, OptimizationState, RejectReason};
use weld_runtime::{Network, RuntimeError, Tensor};

const IN_PLACE_INPUT1: [f32; 24] = [
    1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 11.0, 22.0, 33.0, 44.0, 55.0, 66.0, 111.0, 222.0, 333.0, 444.0,
    555.0, 666.0, 1111.0, 2222.0, 3333.0, 4444.0, 5555.0, 6666.0,
];
const IN_PLACE_INPUT2: [f32; 8] = [
    1234.0, 2345.0, 3456.0, 4567.0, 5678.0, 6789.0, 9012.0, 9999.0,
];
const IN_PLACE_REFERENCE: [f32; 32] = [
    1.0, 2.0, 3.0, 4.0, 111.0, 222.0, 333.0, 444.0, 5.0, 6.0, 11.0, 22.0, 555.0, 666.0, 1111.0,
    2222.0, 33.0, 44.0, 55.0, 66.0, 3333.0, 4444.0, 5555.0, 6666.0, 1234.0, 2345.0, 3456.0,
    4567.0, 5678.0, 6789.0, 9012.0, 9999.0,
];

#[test]
fn test_optimize_dynamic_reshape() {
    init_tracing();
    let mut program = weld_compiler::build_program(
        permute_reshape_graph(),
        BuildConfig::default().with_optimize_data(false),
    )
    .unwrap();
    program.apply_pass(&BufferFusingPass::new()).unwrap();
    assert!(program.has_node_with_type(OpTag::Reshape));
    assert!(program.can_be_optimized("reshape").unwrap());
    assert!(program.can_be_optimized("reorder").unwrap());
    assert_eq!(
        program.state("permute1").unwrap(),
        OptimizationState::Rejected(RejectReason::DynamicShape)
    );

    let input = Tensor::from_vec(
        vec![
            0.1f32, 1.1, 2.2, 3.0, 4.0, -5.0, 0.1, 0.7, 4.8, 19.2, -10.1, 8.1, 10.2, 1.3, 1.44,
            1.5,
        ],
        &[1, 2, 2, 4],
    );
    let pattern = Tensor::from_vec(vec![1i64, 4, 1, -1], &[4]);
    let (network, outputs) = run(program, &[("input", input), ("pattern", pattern)]);

    let expected = [
        0.1, 2.2, 4.0, 0.1, 4.8, -10.1, 10.2, 1.44, 1.1, 3.0, -5.0, 0.7, 19.2, 8.1, 1.3, 1.5,
    ];
    let output = &outputs["reorder"];
    assert_eq!(output.shape(), vec![1, 4, 1, 4]);
    assert_close(&output.to_vec::<f32>().unwrap(), &expected);
    assert!(network.last_report().unwrap().is_clean());
    assert!(Memory::same(
        &network.memory_of("permute1").unwrap(),
        &network.memory_of("reshape").unwrap()
    ));
}

#[test]
fn test_static_node_after_optimized_out_dynamic_reshape() {
    init_tracing();
    let mut program = weld_compiler::build_program(
        fc_after_dynamic_reshape_graph(),
        BuildConfig::default().with_optimize_data(true),
    )
    .unwrap();
    program.get_output_layout("reorder", true).unwrap();
    assert!(program.can_be_optimized("reshape").unwrap());

    let input = Tensor::from_vec(vec![0.1f32, 1.1, 2.2, 3.0, 4.0, -5.0, 0.1, 0.7], &[1, 2, 4]);
    let (network, outputs) = run(program, &[("input", input)]);

    let output = &outputs["reorder"];
    assert_eq!(output.shape(), vec![2, 2]);
    assert_close(&output.to_vec::<f32>().unwrap(), &[0.2, 0.2, 6.0, 6.0]);
    assert_eq!(
        network.get_output_layout("reshape").unwrap().shape.to_static(),
        Some(vec![2, 4])
    );
}

#[test]
fn test_propagate_data_padding() {
    use rand::SeedableRng;
    let mut rng = rand::rngs::StdRng::seed_from_u64(7);
    let values = random_values(&mut rng, 36);

    let program = compile(split_concat_graph(), true);
    for name in ["split:0", "split:1", "concat"] {
        assert!(program.can_be_optimized(name).unwrap(), "{name} should be fused");
    }

    let input = Tensor::from_vec(values.clone(), &[1, 4, 3, 3]);
    let (network, outputs) = run(program, &[("input", input)]);
    assert_eq!(outputs["output"].shape(), vec![1, 4, 3, 3]);
    assert_close(&outputs["output"].to_vec::<f32>().unwrap(), &values);

    let input_memory = network.memory_of("input").unwrap();
    assert!(Memory::same(&input_memory, &network.memory_of("split:1").unwrap()));
    assert!(!Memory::same(
        &input_memory,
        &network.memory_of("crop_0_reorder").unwrap()
    ));
}

fn check_in_place_concat(dynamic: bool) {
    let program = compile(in_place_concat_graph(dynamic), true);
    assert!(program.can_be_optimized("concat").unwrap());

    let (network, outputs) = run(
        program,
        &[
            ("input1", Tensor::from_vec(IN_PLACE_INPUT1.to_vec(), &[1, 2, 3, 4])),
            ("input2", Tensor::from_vec(IN_PLACE_INPUT2.to_vec(), &[1, 2, 4, 1])),
        ],
    );

    assert!(network.state("concat").unwrap().is_optimized());
    let concat = network.memory_of("concat").unwrap();
    assert!(Memory::same(&concat, &network.memory_of("permute1").unwrap()));
    assert!(Memory::same(&concat, &network.memory_of("permute2").unwrap()));

    let output = &outputs["output"];
    assert_eq!(output.shape(), vec![1, 4, 2, 4]);
    assert_eq!(output.to_vec::<f32>().unwrap(), IN_PLACE_REFERENCE.to_vec());
}

#[test]
fn test_in_place_concat_static() {
    check_in_place_concat(false);
}

#[test]
fn test_in_place_concat_dynamic() {
    check_in_place_concat(true);
}

#[test]
fn test_execution_leaves_program_untouched() {
    let program = compile(in_place_concat_graph(true), true);
    let before = program.get_node("permute2").unwrap().output_layout.clone();

    let (network, _) = run(
        program,
        &[
            ("input1", Tensor::from_vec(IN_PLACE_INPUT1.to_vec(), &[1, 2, 3, 4])),
            ("input2", Tensor::from_vec(IN_PLACE_INPUT2.to_vec(), &[1, 2, 4, 1])),
        ],
    );
    let compiled = network.program().get_node("permute2").unwrap();
    assert_eq!(compiled.output_layout, before);
    assert!(compiled.output_layout.as_ref().unwrap().padding.has_dynamic());

    let resolved = network.get_output_layout("permute2").unwrap();
    assert_eq!(resolved.padding.lower()[2], 3);
    assert!(!resolved.padding.has_dynamic());
}

#[test]
fn test_input_binding_errors() {
    let program = compile(in_place_concat_graph(false), true);
    let mut network = Network::new(program);

    assert!(
        network
            .set_input_data("permute1", Tensor::from_vec(vec![0.0f32; 24], &[1, 2, 3, 4]))
            .is_err()
    );
    assert!(
        network
            .set_input_data("input1", Tensor::from_vec(vec![0i32; 24], &[1, 2, 3, 4]))
            .is_err()
    );
    assert!(matches!(
        network.set_input_data("input1", Tensor::from_vec(vec![0.0f32; 24], &[1, 3, 2, 4])),
        Err(RuntimeError::Core(weld_core::Error::ShapeMismatch(_)))
    ));

    network
        .set_input_data("input1", Tensor::from_vec(IN_PLACE_INPUT1.to_vec(), &[1, 2, 3, 4]))
        .unwrap();
    assert!(matches!(
        network.execute(),
        Err(RuntimeError::InputNotSet(name)) if name == "input2"
    ));
    assert!(network.last_report().is_none());
}

#[test]
fn test_wide_integers_survive_fused_execution() {
    let mut graph = weld_core::Graph::new();
    let x = graph
        .add_input(
            "x",
            weld_core::Layout::plain(&[1, 2][..], weld_core::DataType::I64),
        )
        .unwrap();
    graph
        .add_node("t", weld_core::OpKind::Permute { order: vec![1, 0] }, &[x])
        .unwrap();

    let program = compile(graph, true);
    assert!(program.can_be_optimized("t").unwrap());

    let input = Tensor::from_vec(vec![16_777_217i64, 3], &[1, 2]);
    let (_, outputs) = run(program, &[("x", input)]);
    assert_eq!(outputs["t"].shape(), vec![2, 1]);
    assert_eq!(outputs["t"].to_vec::<i64>().unwrap(), vec![16_777_217, 3]);
}
