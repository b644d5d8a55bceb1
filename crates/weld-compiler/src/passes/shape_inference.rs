//! Shape inference pass.
//!
//! Forward pass in topological order that runs the registered inference
//! function of every node.

use crate::inference::InferenceTable;
use weld_core::{CompileCtx, Error, Graph, Pass, Result, Stage};

/// Pass that infers output layouts for all nodes in the graph.
///
/// Dims that cannot be known before execution stay unknown, unless the build
/// configuration disallows dynamic shapes, in which case they are an error.
pub struct ShapeInferencePass {
    table: InferenceTable,
}

impl ShapeInferencePass {
    /// Create a new shape inference pass with the built-in rules.
    pub fn new() -> Self {
        Self::with_table(InferenceTable::with_defaults())
    }

    /// Create a pass using a custom inference table.
    pub fn with_table(table: InferenceTable) -> Self {
        Self { table }
    }
}

impl Pass for ShapeInferencePass {
    fn name(&self) -> &str {
        "shape_inference"
    }

    fn stage(&self) -> Stage {
        Stage::Inference
    }

    fn run(&self, graph: &mut Graph, ctx: &CompileCtx) -> Result<bool> {
        let changed = self.table.infer_graph(graph, None)?;

        if !ctx.config.allow_dynamic_shapes {
            for node in graph.nodes() {
                if let Some(layout) = &node.output_layout
                    && !layout.is_static()
                {
                    return Err(Error::ShapeInference(format!(
                        "node '{}' has dynamic shape {} but dynamic shapes are disabled",
                        node.name, layout.shape
                    )));
                }
            }
        }

        Ok(changed)
    }
}

impl Default for ShapeInferencePass {
    fn default() -> Self {
        Self::new()
    }
}
