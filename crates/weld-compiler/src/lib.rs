//! Compiler for weld graphs.
//!
//! This crate takes a [`Graph`] and runs it through a pipeline of passes:
//! 1. **Inference** - Propagate layouts (possibly with unknown dims)
//! 2. **Optimization** - Remove nodes that do nothing
//! 3. **Fusion** - Decide which nodes share a buffer with a neighbour
//!
//! The result is a [`Program`] whose nodes carry an optimization state and
//! whose graph records the buffer dependencies the executor must honour.
//!
//! # Example
//!
//! ```no_run
//! use weld_compiler::build_program;
//! use weld_core::{BuildConfig, DataType, Graph, Layout, OpKind};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new();
//! let x = graph.add_input("x", Layout::plain(&[1, 2, 3, 4][..], DataType::F32))?;
//! graph.add_node("p", OpKind::Permute { order: vec![0, 2, 1, 3] }, &[x])?;
//!
//! let program = build_program(graph, BuildConfig::default())?;
//! println!("{}", program.fusion_stats());
//! # Ok(())
//! # }
//! ```

pub mod fusion;
pub mod inference;
pub mod passes;
pub mod program;

pub use fusion::{Decision, FusionRules, FusionStats, Proposal};
pub use inference::{InferenceCtx, InferenceTable};
pub use passes::{BufferFusingPass, RemoveIdentityPass, ShapeInferencePass};
pub use program::Program;

pub use weld_core::{BuildConfig, CompileCtx, Graph, Pass, Result, Stage};

/// Compiler pipeline with pluggable passes.
///
/// The pipeline runs in fixed stages: Inference → Optimization → Fusion.
/// Built-in passes are registered according to the build configuration and
/// custom passes can be added via `add_pass()`.
pub struct CompilerPipeline {
    /// All passes to run, ordered by (stage, registration order).
    passes: Vec<Box<dyn Pass>>,

    ctx: CompileCtx,
}

impl CompilerPipeline {
    /// Create a pipeline with built-in passes.
    ///
    /// - `ShapeInferencePass` (Inference stage, always)
    /// - `RemoveIdentityPass` (Optimization stage, with `optimize_data` and
    ///   `remove_identities`)
    /// - `BufferFusingPass` (Fusion stage, with `optimize_data`)
    pub fn new(ctx: CompileCtx) -> Self {
        let mut pipeline = Self {
            passes: Vec::new(),
            ctx,
        };

        pipeline.add_pass(ShapeInferencePass::new());
        if pipeline.ctx.config.optimize_data {
            if pipeline.ctx.config.remove_identities {
                pipeline.add_pass(RemoveIdentityPass::new());
            }
            pipeline.add_pass(BufferFusingPass::new());
        }

        pipeline
    }

    /// Add a custom pass to the pipeline.
    ///
    /// The pass will be inserted into the stage reported by `pass.stage()`.
    /// Within a stage, passes run in the order they were registered.
    pub fn add_pass(&mut self, pass: impl Pass + 'static) -> &mut Self {
        self.passes.push(Box::new(pass));
        self
    }

    /// Run every pass on `graph` and wrap the result in a [`Program`].
    #[tracing::instrument(skip_all, fields(num_nodes = graph.node_count()))]
    pub fn compile(&mut self, mut graph: Graph) -> Result<Program> {
        self.passes.sort_by_key(|p| p.stage());

        for pass in &self.passes {
            let _span =
                tracing::debug_span!("pass", name = pass.name(), stage = ?pass.stage()).entered();
            pass.run(&mut graph, &self.ctx)?;
        }

        Ok(Program::new(graph, self.ctx.clone()))
    }
}

/// Convenience function: compile with the default host allocator.
#[tracing::instrument(skip_all)]
pub fn build_program(graph: Graph, config: BuildConfig) -> Result<Program> {
    let ctx = CompileCtx {
        config,
        ..CompileCtx::default()
    };
    CompilerPipeline::new(ctx).compile(graph)
}
