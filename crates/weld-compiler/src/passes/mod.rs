//! Compiler passes for layout inference, graph cleanup and buffer fusing.

mod buffer_fusing;
mod remove_identity;
mod shape_inference;

pub use buffer_fusing::BufferFusingPass;
pub use remove_identity::RemoveIdentityPass;
pub use shape_inference::ShapeInferencePass;
