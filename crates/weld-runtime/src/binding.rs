//! Binding plan: which nodes share which allocation.

use crate::error::Result;
use std::collections::HashMap;
use weld_core::{AllocationRequest, DataType, Graph, MemoryAllocator, MemoryRef, NodeId};

/// One allocation of the plan.
#[derive(Debug, Clone)]
pub struct LogicalBuffer {
    pub label: String,
    /// Every node bound to this buffer, in ascending id order.
    pub members: Vec<NodeId>,
    /// Largest `buffer_elements()` over the members.
    pub elements: usize,
    pub dtype: DataType,
}

/// Assignment of every node to exactly one logical buffer.
///
/// Each resolver group becomes one buffer; every other node gets its own.
#[derive(Debug, Clone, Default)]
pub struct BindingPlan {
    buffers: Vec<LogicalBuffer>,
    by_node: HashMap<NodeId, usize>,
}

impl BindingPlan {
    /// Plan the buffers of a fully resolved and revalidated graph.
    pub fn build(graph: &Graph) -> Result<Self> {
        let mut plan = Self::default();

        for group in graph.dependencies().groups() {
            plan.push(graph, group.into_iter().collect())?;
        }
        for id in graph.topological_order() {
            if !plan.by_node.contains_key(&id) {
                plan.push(graph, vec![id])?;
            }
        }

        tracing::debug!(
            buffers = plan.buffers.len(),
            nodes = plan.by_node.len(),
            "binding plan"
        );
        Ok(plan)
    }

    fn push(&mut self, graph: &Graph, members: Vec<NodeId>) -> Result<()> {
        let mut elements = 0;
        let mut names = Vec::with_capacity(members.len());
        for &id in &members {
            elements = elements.max(graph.output_layout(id)?.buffer_elements()?);
            names.push(graph.get_node(id)?.name.as_str());
        }
        let dtype = match members.first() {
            Some(&first) => graph.output_layout(first)?.dtype,
            None => return Ok(()),
        };

        let index = self.buffers.len();
        for &id in &members {
            self.by_node.insert(id, index);
        }
        self.buffers.push(LogicalBuffer {
            label: names.join("+"),
            members,
            elements,
            dtype,
        });
        Ok(())
    }

    pub fn buffers(&self) -> &[LogicalBuffer] {
        &self.buffers
    }

    /// Buffer a node is bound to.
    pub fn buffer_of(&self, id: NodeId) -> Option<&LogicalBuffer> {
        self.by_node.get(&id).map(|&index| &self.buffers[index])
    }

    /// Allocate every buffer and hand each node its memory.
    pub fn allocate(&self, allocator: &dyn MemoryAllocator) -> Result<HashMap<NodeId, MemoryRef>> {
        let mut memories = HashMap::with_capacity(self.by_node.len());
        for buffer in &self.buffers {
            let memory = allocator.allocate(&AllocationRequest {
                label: buffer.label.clone(),
                elements: buffer.elements,
                dtype: buffer.dtype,
            })?;
            for &id in &buffer.members {
                memories.insert(id, MemoryRef::clone(&memory));
            }
        }
        Ok(memories)
    }
}
