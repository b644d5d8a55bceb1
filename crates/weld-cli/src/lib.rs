//! Weld CLI library - shared functionality for testing and binary.

pub mod inspect;
pub mod scenarios;

use anyhow::{Context, Result};
use rand::SeedableRng;
use rand::rngs::StdRng;
use std::collections::HashMap;
use weld_compiler::{Program, build_program};
use weld_core::BuildConfig;
use weld_runtime::{Network, NetworkOutput};

use scenarios::Scenario;

/// Compile a scenario with `config`.
pub fn compile_scenario(scenario: &Scenario, config: BuildConfig) -> Result<Program> {
    let graph = scenario
        .graph()
        .with_context(|| format!("Failed to build scenario '{}'", scenario.name))?;
    build_program(graph, config)
        .with_context(|| format!("Failed to compile scenario '{}'", scenario.name))
}

/// Compile and execute a scenario on seeded random inputs.
pub fn run_scenario(
    scenario: &Scenario,
    config: BuildConfig,
    seed: u64,
) -> Result<(Network, HashMap<String, NetworkOutput>)> {
    let program = compile_scenario(scenario, config)?;
    let mut network = Network::new(program);
    let mut rng = StdRng::seed_from_u64(seed);
    for (name, tensor) in scenario.inputs(&mut rng) {
        network
            .set_input_data(name, tensor)
            .with_context(|| format!("Failed to bind input '{name}'"))?;
    }
    let outputs = network
        .execute()
        .with_context(|| format!("Failed to execute scenario '{}'", scenario.name))?;
    Ok((network, outputs))
}

/// Largest absolute difference between fused and unfused outputs.
pub fn compare_with_unfused(scenario: &Scenario, config: BuildConfig, seed: u64) -> Result<f64> {
    let (_, fused) = run_scenario(scenario, config, seed)?;
    let (_, reference) = run_scenario(scenario, config.with_optimize_data(false), seed)?;

    let mut max_diff = 0.0f64;
    for (name, output) in &fused {
        let expected = reference
            .get(name)
            .with_context(|| format!("Unfused run has no output '{name}'"))?;
        let actual = output.to_lanes()?;
        let expected = expected.to_lanes()?;
        anyhow::ensure!(
            actual.len() == expected.len(),
            "Output '{name}' has {} values, unfused has {}",
            actual.len(),
            expected.len()
        );
        for (a, e) in actual.iter().zip(&expected) {
            max_diff = max_diff.max((a - e).abs());
        }
    }
    tracing::info!(scenario = scenario.name, max_diff, "compared with unfused run");
    Ok(max_diff)
}
