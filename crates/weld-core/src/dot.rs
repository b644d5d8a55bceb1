//! Graphviz DOT output for fused graphs.
//!
//! Data edges are solid and labelled with the consumer's input slot. Buffer
//! dependency edges are dashed. Optimized nodes are filled green, rejected
//! nodes grey.

use crate::dependency::AliasKind;
use crate::ir::Graph;
use crate::state::OptimizationState;

/// Generate a DOT graph from a graph and its buffer dependencies.
///
/// ```ignore
/// let dot = to_dot(program.graph());
/// std::fs::write("fused.dot", dot)?;
/// // Render with: dot -Tsvg fused.dot -o fused.svg
/// ```
pub fn to_dot(graph: &Graph) -> String {
    let mut dot = String::new();
    dot.push_str("digraph weld {\n");
    dot.push_str("  rankdir=TB;\n");
    dot.push_str("  node [shape=box, style=\"rounded,filled\", fillcolor=white];\n\n");

    for id in graph.topological_order() {
        let Ok(node) = graph.get_node(id) else {
            continue;
        };
        let layout = node
            .output_layout
            .as_ref()
            .map_or_else(|| "?".to_string(), |l| l.to_string());
        let fill = match node.state {
            OptimizationState::Optimized { .. } => "palegreen",
            OptimizationState::Rejected(_) => "lightgrey",
            _ => "white",
        };
        dot.push_str(&format!(
            "  n{} [label=\"{}\\n{}\\n{}\\n{}\", fillcolor={}];\n",
            id.index(),
            escape(&node.name),
            node.tag(),
            escape(&layout),
            node.state,
            fill
        ));
    }

    dot.push('\n');
    for (producer, consumer, slot) in graph.edges() {
        dot.push_str(&format!(
            "  n{} -> n{} [label=\"{}\"];\n",
            producer.index(),
            consumer.index(),
            slot
        ));
    }

    for edge in graph.dependencies().edges() {
        let label = match edge.kind {
            AliasKind::View { offset } => format!("view+{offset}"),
            AliasKind::Slice { index, axis, .. } => format!("slice {index} @{axis}"),
        };
        dot.push_str(&format!(
            "  n{} -> n{} [style=dashed, color=blue, label=\"{}\", constraint=false];\n",
            edge.owner.index(),
            edge.member.index(),
            label
        ));
    }

    dot.push_str("}\n");
    dot
}

fn escape(text: &str) -> String {
    text.replace('\\', "\\\\").replace('"', "\\\"")
}
