//! Text reports for compiled programs and executions.

use std::collections::HashMap;
use std::fmt::Write;
use weld_compiler::Program;
use weld_core::Graph;
use weld_runtime::{Network, NetworkOutput};

/// One line per node in topological order: name, kind, layout, state.
pub fn describe_graph(graph: &Graph) -> String {
    let mut out = String::new();
    for id in graph.topological_order() {
        let Ok(node) = graph.get_node(id) else {
            continue;
        };
        let layout = node
            .output_layout
            .as_ref()
            .map_or_else(|| "?".to_string(), |l| l.to_string());
        let _ = write!(
            out,
            "  {:<18} {:<14} {:<36} {}",
            node.name,
            node.tag(),
            layout,
            node.state
        );
        if let Some(assumption) = node.assumption {
            let _ = write!(out, "  [assumes {assumption:?}]");
        }
        out.push('\n');
    }
    out
}

/// Node table, fusion summary and buffer groups of a compiled program.
pub fn describe_program(program: &Program) -> String {
    let graph = program.graph();
    let mut out = String::new();
    let _ = writeln!(out, "Nodes ({}):", graph.node_count());
    out.push_str(&describe_graph(graph));
    let _ = writeln!(out);
    let _ = writeln!(out, "Fusion: {}", program.fusion_stats());

    let groups = graph.dependencies().groups();
    let _ = writeln!(out, "Buffer groups ({}):", groups.len());
    for group in groups {
        let names: Vec<&str> = group
            .iter()
            .filter_map(|&id| graph.get_node(id).ok())
            .map(|node| node.name.as_str())
            .collect();
        let _ = writeln!(out, "  {}", names.join(", "));
    }
    out
}

/// Revalidation outcome and output values of the last execution.
pub fn describe_execution(network: &Network, outputs: &HashMap<String, NetworkOutput>) -> String {
    let mut out = String::new();
    if let Some(report) = network.last_report() {
        let _ = writeln!(
            out,
            "Revalidation: {} checked, {} demoted",
            report.checked,
            report.demoted.len()
        );
    }

    let mut names: Vec<&String> = outputs.keys().collect();
    names.sort();
    for name in names {
        let output = &outputs[name];
        match output.to_lanes() {
            Ok(values) => {
                let _ = writeln!(out, "{name} {:?} = {values:?}", output.shape());
            }
            Err(e) => {
                let _ = writeln!(out, "{name}: {e}");
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use weld_compiler::build_program;
    use weld_core::BuildConfig;

    #[test]
    fn test_describe_program_lists_groups() {
        let graph = crate::scenarios::find("split-concat").unwrap().graph().unwrap();
        let program = build_program(graph, BuildConfig::default()).unwrap();

        let text = describe_program(&program);
        assert!(text.contains("Nodes (7):"));
        assert!(text.contains("split:1"));
        assert!(text.contains("Buffer groups (2):"));
        assert!(text.contains("input, split:0, split:1"));
    }
}
