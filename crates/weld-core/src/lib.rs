//! Core data model for the weld buffer-fusing compiler.
//!
//! This crate provides the foundational abstractions the other weld crates
//! depend on:
//! - Layout model (`Layout`, `PartialShape`, `Format`, `Padding`)
//! - Graph IR (`Graph`, `Node`, `OpKind`) with per-node optimization state
//! - Buffer dependency resolver (`BufferDependencies`)
//! - Allocator interface, pass trait and compile context

pub mod allocator;
pub mod context;
pub mod dependency;
pub mod dot;
pub mod ir;
pub mod layout;
pub mod memory;
pub mod pass;
pub mod state;
pub mod types;

// Re-export commonly used types
pub use allocator::{AllocationRequest, HostAllocator, MemoryAllocator};
pub use context::{BuildConfig, CompileCtx};
pub use dependency::{AliasKind, BufferDependencies, BufferDependencyEdge};
pub use ir::{Graph, Node, NodeId, OpKind, OpTag, ReshapeTarget};
pub use layout::{Compatibility, Format, Layout, Padding, is_compatible, realize};
pub use memory::{Memory, MemoryRef};
pub use pass::{Pass, Stage};
pub use state::{Assumption, OptimizationState, RejectReason};
pub use types::{DataType, Dim, PartialShape};

/// Result type using the crate's error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Core error type for weld-core operations.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Shape inference error: {0}")]
    ShapeInference(String),

    #[error("Shape mismatch: {0}")]
    ShapeMismatch(String),

    #[error("Buffer conflict: {0}")]
    BufferConflict(String),

    #[error("Invalid graph structure: {0}")]
    InvalidGraph(String),

    #[error("Node not found: {0}")]
    NodeNotFound(String),

    #[error("Layout not resolved: {0}")]
    LayoutNotResolved(String),

    #[error("Allocation error: {0}")]
    Allocation(String),
}
