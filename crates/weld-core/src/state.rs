//! Per-node optimization state recorded by the buffer-fusing pass.

use crate::ir::NodeId;
use std::fmt;

/// Where a node stands with respect to buffer fusing.
///
/// Transitions only move forward during a pass run:
/// `Unanalyzed -> Eligible -> Optimized | Rejected`. The one exception is
/// execution-time revalidation, which may turn `Optimized` into
/// `Rejected(RuntimeShapeMismatch)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OptimizationState {
    #[default]
    Unanalyzed,
    Eligible,
    /// The node runs no kernel. Its output lives inside the buffer of
    /// `aliased_to`, starting `offset` elements in. An in-place
    /// concatenation names itself: it owns the buffer its producers write
    /// their slices into.
    Optimized { aliased_to: NodeId, offset: usize },
    Rejected(RejectReason),
}

impl OptimizationState {
    pub fn is_optimized(&self) -> bool {
        matches!(self, OptimizationState::Optimized { .. })
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            OptimizationState::Optimized { .. } | OptimizationState::Rejected(_)
        )
    }

    pub fn reject_reason(&self) -> Option<RejectReason> {
        match self {
            OptimizationState::Rejected(reason) => Some(*reason),
            _ => None,
        }
    }
}

impl fmt::Display for OptimizationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OptimizationState::Unanalyzed => f.write_str("unanalyzed"),
            OptimizationState::Eligible => f.write_str("eligible"),
            OptimizationState::Optimized { aliased_to, offset } => {
                write!(f, "optimized(into {}+{offset})", aliased_to.index())
            }
            OptimizationState::Rejected(reason) => write!(f, "rejected({reason})"),
        }
    }
}

/// Why a node keeps its own buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RejectReason {
    /// No fusion rule exists for the node kind.
    NoFusionRule,
    /// The operation moves data and cannot be expressed as a view.
    NotMetadataOnly,
    /// Input and output layouts differ in dtype, format or shape.
    LayoutMismatch,
    /// The input buffer carries padding.
    PaddedInput,
    /// An unknown dimension prevents proving the optimization safe.
    DynamicShape,
    /// A producer cannot write into a padded output.
    ProducerNotWritable,
    /// A producer already lives inside another buffer.
    ProducerAliased,
    /// A producer has consumers other than this node, or is a graph output.
    SharedProducer,
    /// The allocator rejected a required padded layout.
    InvalidLayout,
    /// The buffer dependency resolver found overlapping writers.
    BufferConflict,
    /// Revalidation against concrete shapes failed.
    RuntimeShapeMismatch,
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RejectReason::NoFusionRule => "no_fusion_rule",
            RejectReason::NotMetadataOnly => "not_metadata_only",
            RejectReason::LayoutMismatch => "layout_mismatch",
            RejectReason::PaddedInput => "padded_input",
            RejectReason::DynamicShape => "dynamic_shape",
            RejectReason::ProducerNotWritable => "producer_not_writable",
            RejectReason::ProducerAliased => "producer_aliased",
            RejectReason::SharedProducer => "shared_producer",
            RejectReason::InvalidLayout => "invalid_layout",
            RejectReason::BufferConflict => "buffer_conflict",
            RejectReason::RuntimeShapeMismatch => "runtime_shape_mismatch",
        };
        f.write_str(name)
    }
}

/// A condition an optimization relies on that could only be checked
/// partially at compile time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Assumption {
    /// Input and output element counts match.
    ElementCount,
    /// Input and output layouts are identical.
    SameLayout,
    /// Every slice of a concatenation along `axis` is a valid padded layout.
    SliceLayout { axis: usize },
    /// The crop window fits the input and its padding is valid.
    CropWindow,
}
