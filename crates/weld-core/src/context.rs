//! Build configuration and the compile-time context handed to passes.

use crate::allocator::{HostAllocator, MemoryAllocator};
use std::fmt;
use std::sync::Arc;

/// Options controlling compilation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BuildConfig {
    /// Run the buffer-fusing pass.
    pub optimize_data: bool,
    /// Accept dims that stay unknown after compile-time inference.
    pub allow_dynamic_shapes: bool,
    /// Remove reorders, reshapes and permutes that do nothing.
    pub remove_identities: bool,
}

impl Default for BuildConfig {
    fn default() -> Self {
        Self {
            optimize_data: true,
            allow_dynamic_shapes: true,
            remove_identities: true,
        }
    }
}

impl BuildConfig {
    pub fn with_optimize_data(mut self, enabled: bool) -> Self {
        self.optimize_data = enabled;
        self
    }

    pub fn with_dynamic_shapes(mut self, enabled: bool) -> Self {
        self.allow_dynamic_shapes = enabled;
        self
    }

    pub fn without_identity_removal(mut self) -> Self {
        self.remove_identities = false;
        self
    }
}

/// Immutable context shared by every pass of one compilation.
#[derive(Clone)]
pub struct CompileCtx {
    pub config: BuildConfig,
    pub allocator: Arc<dyn MemoryAllocator>,
}

impl CompileCtx {
    pub fn new(config: BuildConfig, allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self { config, allocator }
    }
}

impl Default for CompileCtx {
    fn default() -> Self {
        Self::new(BuildConfig::default(), Arc::new(HostAllocator::new()))
    }
}

impl fmt::Debug for CompileCtx {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompileCtx")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}
