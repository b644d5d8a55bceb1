//! Allocator interface used by fusion decisions and buffer binding.

use crate::layout::{Layout, default_layout_validity};
use crate::memory::{Memory, MemoryRef};
use crate::types::DataType;
use crate::{Error, Result};
use std::sync::atomic::{AtomicUsize, Ordering};

/// Request for one logical buffer.
#[derive(Debug, Clone)]
pub struct AllocationRequest {
    pub label: String,
    pub elements: usize,
    pub dtype: DataType,
}

/// Source of memory objects and judge of which layouts can back them.
pub trait MemoryAllocator: Send + Sync {
    /// Whether a buffer with this format and padding can be allocated.
    fn is_format_layout_valid(&self, layout: &Layout) -> bool {
        default_layout_validity(layout)
    }

    fn allocate(&self, request: &AllocationRequest) -> Result<MemoryRef>;
}

/// Allocator backed by host memory.
#[derive(Debug, Default)]
pub struct HostAllocator {
    /// Upper bound on elements per allocation, if any.
    max_elements: Option<usize>,
    allocations: AtomicUsize,
}

impl HostAllocator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_limit(max_elements: usize) -> Self {
        Self {
            max_elements: Some(max_elements),
            allocations: AtomicUsize::new(0),
        }
    }

    /// Number of allocations served so far.
    pub fn allocation_count(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }
}

impl MemoryAllocator for HostAllocator {
    fn allocate(&self, request: &AllocationRequest) -> Result<MemoryRef> {
        if let Some(limit) = self.max_elements
            && request.elements > limit
        {
            return Err(Error::Allocation(format!(
                "'{}' needs {} elements, limit is {limit}",
                request.label, request.elements
            )));
        }
        self.allocations.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(
            label = %request.label,
            elements = request.elements,
            dtype = %request.dtype,
            "allocate"
        );
        Ok(Memory::zeroed(request.elements, request.dtype))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_host_allocator_limit() {
        let allocator = HostAllocator::with_limit(8);
        let request = |elements| AllocationRequest {
            label: "buf".to_string(),
            elements,
            dtype: DataType::F32,
        };
        assert_eq!(allocator.allocate(&request(8)).unwrap().len(), 8);
        assert!(matches!(
            allocator.allocate(&request(9)),
            Err(Error::Allocation(_))
        ));
        assert_eq!(allocator.allocation_count(), 1);
    }
}
