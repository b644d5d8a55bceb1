//! Compiler pass trait and stage definitions.

use crate::Result;
use crate::context::CompileCtx;
use crate::ir::Graph;

/// Compilation stage for organizing passes.
///
/// Passes are grouped into stages and run in a fixed order. Within each stage,
/// passes run in the order they were registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Stage {
    /// Shape and layout inference (earliest stage).
    ///
    /// Every node gets an output layout, possibly with unknown dims.
    Inference,

    /// Graph rewriting that removes nodes (e.g. identity reorders).
    Optimization,

    /// Buffer fusing: decides which nodes share a buffer with a neighbour.
    ///
    /// Runs last because it relies on final layouts and never changes
    /// topology.
    Fusion,
}

/// Trait for implementing compiler passes.
///
/// A pass is a graph transformation that runs during a specific compilation
/// stage. The `run()` method returns `Ok(true)` if the pass changed the graph
/// and `Ok(false)` otherwise, so running a pass twice can be checked for
/// idempotence.
pub trait Pass: Send + Sync {
    /// Get the pass name (used for logging and debugging).
    fn name(&self) -> &str;

    /// Get the compilation stage this pass belongs to.
    fn stage(&self) -> Stage;

    /// Run the pass on the given graph.
    fn run(&self, graph: &mut Graph, ctx: &CompileCtx) -> Result<bool>;
}
