//! Host executor for compiled weld programs.
//!
//! This crate runs a [`Program`](weld_compiler::Program) on host memory and
//! is where fusion decisions taken on partial shapes are settled:
//!
//! 1. **Shape resolution** - substitute input shapes, infer every layout again
//! 2. **Revalidation** - re-run the fusion rule of every optimized node on the
//!    concrete layouts, demoting the ones that no longer hold
//! 3. **Binding** - one allocation per buffer group, one per remaining node
//! 4. **Execution** - reference kernels for every node that was not fused
//!
//! # Example
//!
//! ```no_run
//! use weld_compiler::build_program;
//! use weld_core::{BuildConfig, DataType, Graph, Layout, OpKind};
//! use weld_runtime::{Network, Tensor};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let mut graph = Graph::new();
//! let x = graph.add_input("x", Layout::plain(&[2, 2][..], DataType::F32))?;
//! graph.add_node("t", OpKind::Permute { order: vec![1, 0] }, &[x])?;
//!
//! let mut network = Network::new(build_program(graph, BuildConfig::default())?);
//! network.set_input_data("x", Tensor::from_vec(vec![1.0f32, 2.0, 3.0, 4.0], &[2, 2]))?;
//! let outputs = network.execute()?;
//! println!("{:?}", outputs["t"].to_vec::<f32>()?);
//! # Ok(())
//! # }
//! ```

pub mod binding;
mod error;
pub mod kernels;
mod network;
pub mod resolve;
pub mod revalidate;
mod tensor;

pub use binding::{BindingPlan, LogicalBuffer};
pub use error::{Result, RuntimeError};
pub use network::{Network, NetworkOutput};
pub use revalidate::{RevalidationReport, Revalidator};
pub use tensor::{Element, MAX_EXACT_LANE, Tensor};
