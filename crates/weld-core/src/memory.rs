//! Host memory objects handed out by an allocator.

use crate::types::DataType;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};

static NEXT_MEMORY_ID: AtomicUsize = AtomicUsize::new(0);

/// Shared handle to a memory object.
pub type MemoryRef = Arc<Memory>;

/// A host allocation holding one `f64` lane per element.
///
/// `f64` lanes hold every `f32`, `i32` and `u8` value exactly, and `i64`
/// values up to 2^53 in magnitude.
///
/// Nodes fused into one logical buffer hold clones of the same `MemoryRef`,
/// so buffer identity can be checked with [`Memory::same`].
#[derive(Debug)]
pub struct Memory {
    id: usize,
    dtype: DataType,
    data: RwLock<Vec<f64>>,
}

impl Memory {
    /// Zero-initialised allocation of `elements` elements.
    pub fn zeroed(elements: usize, dtype: DataType) -> MemoryRef {
        Arc::new(Self {
            id: NEXT_MEMORY_ID.fetch_add(1, Ordering::Relaxed),
            dtype,
            data: RwLock::new(vec![0.0; elements]),
        })
    }

    pub fn id(&self) -> usize {
        self.id
    }

    pub fn dtype(&self) -> DataType {
        self.dtype
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn read(&self) -> RwLockReadGuard<'_, Vec<f64>> {
        self.data.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn write(&self) -> RwLockWriteGuard<'_, Vec<f64>> {
        self.data
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Copy of the raw buffer contents, padding included.
    pub fn to_vec(&self) -> Vec<f64> {
        self.read().clone()
    }

    /// Whether two handles refer to the same allocation.
    pub fn same(a: &MemoryRef, b: &MemoryRef) -> bool {
        Arc::ptr_eq(a, b)
    }
}
