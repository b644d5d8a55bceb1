//! Executor for compiled weld programs.

use crate::binding::BindingPlan;
use crate::error::{Result, RuntimeError};
use crate::kernels::{execute_graph, read_logical};
use crate::resolve::resolve_shapes;
use crate::revalidate::{RevalidationReport, Revalidator};
use crate::tensor::{Element, Tensor};
use std::collections::HashMap;
use std::sync::Arc;
use weld_compiler::Program;
use weld_core::{
    Graph, Layout, MemoryAllocator, MemoryRef, NodeId, OpKind, OptimizationState,
};

/// One graph output after execution: the memory it lives in and the layout
/// to read it through.
#[derive(Debug, Clone)]
pub struct NetworkOutput {
    pub memory: MemoryRef,
    pub layout: Layout,
}

impl NetworkOutput {
    /// Concrete output shape.
    pub fn shape(&self) -> Vec<usize> {
        self.layout.shape.to_static().unwrap_or_default()
    }

    /// Logical values in row-major order, as host lanes.
    pub fn to_lanes(&self) -> Result<Vec<f64>> {
        read_logical(&self.memory, &self.layout)
    }

    /// Logical values as the output's element type.
    ///
    /// # Errors
    /// Returns an error if `T` is not the output's element type.
    pub fn to_vec<T: Element>(&self) -> Result<Vec<T>> {
        self.to_tensor()?.to_vec()
    }

    pub fn to_tensor(&self) -> Result<Tensor> {
        Tensor::from_lanes(&self.to_lanes()?, &self.shape(), self.layout.dtype)
    }
}

/// State of the most recent execution.
struct Execution {
    graph: Graph,
    memories: HashMap<NodeId, MemoryRef>,
    report: RevalidationReport,
}

/// Executes a compiled program on host memory.
///
/// The compiled program is never modified. Each execution works on a copy
/// of its graph: input shapes are substituted, layouts are inferred again,
/// fused nodes are revalidated against the concrete layouts and a fresh set
/// of buffers is allocated.
pub struct Network {
    program: Program,
    allocator: Arc<dyn MemoryAllocator>,
    revalidator: Revalidator,
    inputs: HashMap<NodeId, Tensor>,
    last: Option<Execution>,
}

impl Network {
    /// Create a network that allocates through the program's allocator.
    pub fn new(program: Program) -> Self {
        let allocator = Arc::clone(&program.ctx().allocator);
        Self::with_allocator(program, allocator)
    }

    pub fn with_allocator(program: Program, allocator: Arc<dyn MemoryAllocator>) -> Self {
        Self {
            program,
            allocator,
            revalidator: Revalidator::new(),
            inputs: HashMap::new(),
            last: None,
        }
    }

    pub fn program(&self) -> &Program {
        &self.program
    }

    /// Bind data to the input placeholder called `name`.
    pub fn set_input_data(&mut self, name: &str, tensor: Tensor) -> Result<()> {
        let id = self.program.node_id(name)?;
        let node = self.program.graph().get_node(id)?;
        let OpKind::InputPlaceholder { layout } = &node.kind else {
            return Err(RuntimeError::TensorError(format!(
                "'{name}' is a {}, not an input",
                node.tag()
            )));
        };
        if tensor.dtype() != layout.dtype {
            return Err(RuntimeError::TensorError(format!(
                "input '{name}' expects {}, got {}",
                layout.dtype,
                tensor.dtype()
            )));
        }
        layout.realize(tensor.shape())?;
        self.inputs.insert(id, tensor);
        Ok(())
    }

    /// Run the program on the bound inputs.
    #[tracing::instrument(skip_all)]
    pub fn execute(&mut self) -> Result<HashMap<String, NetworkOutput>> {
        let mut graph = self.program.graph().clone();
        let values = resolve_shapes(&mut graph, &self.inputs)?;
        let report = self.revalidator.run(&mut graph, self.allocator.as_ref())?;
        if !report.is_clean() {
            tracing::debug!(
                checked = report.checked,
                demoted = report.demoted.len(),
                "revalidation demoted fused nodes"
            );
        }

        let plan = BindingPlan::build(&graph)?;
        let memories = plan.allocate(self.allocator.as_ref())?;
        execute_graph(&graph, &memories, &values)?;

        let execution = Execution {
            graph,
            memories,
            report,
        };
        let outputs = execution.outputs()?;
        self.last = Some(execution);
        Ok(outputs)
    }

    fn last(&self) -> Result<&Execution> {
        self.last
            .as_ref()
            .ok_or_else(|| RuntimeError::ExecutionError("network has not been executed".into()))
    }

    /// Memory backing node `name` in the last execution.
    pub fn memory_of(&self, name: &str) -> Result<MemoryRef> {
        let last = self.last()?;
        let id = last.graph.find_node(name)?;
        last.memories
            .get(&id)
            .cloned()
            .ok_or_else(|| RuntimeError::ExecutionError(format!("no memory bound to '{name}'")))
    }

    /// Memory of output `name` in the last execution.
    pub fn output_memory(&self, name: &str) -> Result<MemoryRef> {
        let last = self.last()?;
        let id = last.graph.find_node(name)?;
        if !last.graph.is_output(id) {
            return Err(RuntimeError::ExecutionError(format!(
                "'{name}' is not a graph output"
            )));
        }
        self.memory_of(name)
    }

    /// Resolved layout of node `name` in the last execution.
    pub fn get_output_layout(&self, name: &str) -> Result<Layout> {
        let last = self.last()?;
        let id = last.graph.find_node(name)?;
        Ok(last.graph.output_layout(id)?.clone())
    }

    /// State of node `name` after revalidation in the last execution.
    pub fn state(&self, name: &str) -> Result<OptimizationState> {
        let last = self.last()?;
        Ok(last.graph.get_node(last.graph.find_node(name)?)?.state)
    }

    pub fn last_report(&self) -> Option<&RevalidationReport> {
        self.last.as_ref().map(|last| &last.report)
    }
}

impl Execution {
    fn outputs(&self) -> Result<HashMap<String, NetworkOutput>> {
        let mut outputs = HashMap::new();
        for id in self.graph.outputs() {
            let node = self.graph.get_node(id)?;
            let memory = self.memories.get(&id).cloned().ok_or_else(|| {
                RuntimeError::ExecutionError(format!("no memory bound to '{}'", node.name))
            })?;
            outputs.insert(
                node.name.clone(),
                NetworkOutput {
                    memory,
                    layout: self.graph.output_layout(id)?.clone(),
                },
            );
        }
        Ok(outputs)
    }
}
