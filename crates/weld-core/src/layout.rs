//! Memory layouts: logical shape, element type, physical format and padding.
//!
//! A [`Layout`] describes how a tensor is stored in its backing allocation.
//! Fusion works by rewriting padding: a producer that writes into a slice of
//! a larger buffer sees its own shape surrounded by the other slices, which
//! are expressed as lower/upper padding on the concatenation axis.

use crate::types::{DataType, Dim, PartialShape};
use crate::{Error, Result};
use std::fmt;

/// Physical element order of a buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Format {
    /// Row-major batch, feature, y, x (rank 4 or lower).
    Bfyx,
    /// Row-major with a z spatial axis (rank 5).
    Bfzyx,
    /// Row-major with w and z spatial axes (rank 6).
    Bfwzyx,
    /// Rank 4, features stored in blocks of 16 innermost.
    BFsYxFsv16,
}

impl Format {
    /// Plain row-major format matching a rank.
    pub fn default_for_rank(rank: usize) -> Format {
        match rank {
            0..=4 => Format::Bfyx,
            5 => Format::Bfzyx,
            _ => Format::Bfwzyx,
        }
    }

    pub fn max_rank(&self) -> usize {
        match self {
            Format::Bfyx | Format::BFsYxFsv16 => 4,
            Format::Bfzyx => 5,
            Format::Bfwzyx => 6,
        }
    }

    /// Whether a tensor of `rank` can be stored in this format.
    pub fn supports_rank(&self, rank: usize) -> bool {
        match self {
            Format::Bfyx => rank <= 4,
            Format::BFsYxFsv16 => rank == 4,
            Format::Bfzyx | Format::Bfwzyx => rank == self.max_rank(),
        }
    }

    pub fn is_blocked(&self) -> bool {
        self.block().is_some()
    }

    /// The blocked axis and its block size.
    pub fn block(&self) -> Option<(usize, usize)> {
        match self {
            Format::BFsYxFsv16 => Some((1, 16)),
            _ => None,
        }
    }
}

impl fmt::Display for Format {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Format::Bfyx => "bfyx",
            Format::Bfzyx => "bfzyx",
            Format::Bfwzyx => "bfwzyx",
            Format::BFsYxFsv16 => "b_fs_yx_fsv16",
        };
        f.write_str(name)
    }
}

/// Per-dimension padding around the logical tensor.
///
/// An axis marked dynamic has padding that is only known once the shapes of
/// the surrounding slices are resolved at execution time.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct Padding {
    lower: Vec<usize>,
    upper: Vec<usize>,
    dynamic: Vec<bool>,
}

impl Padding {
    pub fn zero(rank: usize) -> Self {
        Self {
            lower: vec![0; rank],
            upper: vec![0; rank],
            dynamic: vec![false; rank],
        }
    }

    pub fn new(lower: Vec<usize>, upper: Vec<usize>) -> Result<Self> {
        if lower.len() != upper.len() {
            return Err(Error::ShapeMismatch(format!(
                "padding lower rank {} differs from upper rank {}",
                lower.len(),
                upper.len()
            )));
        }
        let dynamic = vec![false; lower.len()];
        Ok(Self {
            lower,
            upper,
            dynamic,
        })
    }

    pub fn rank(&self) -> usize {
        self.lower.len()
    }

    pub fn lower(&self) -> &[usize] {
        &self.lower
    }

    pub fn upper(&self) -> &[usize] {
        &self.upper
    }

    pub fn is_dynamic(&self, axis: usize) -> bool {
        self.dynamic.get(axis).copied().unwrap_or(false)
    }

    pub fn has_dynamic(&self) -> bool {
        self.dynamic.iter().any(|&d| d)
    }

    pub fn is_zero(&self) -> bool {
        !self.has_dynamic() && self.lower.iter().chain(&self.upper).all(|&p| p == 0)
    }

    /// Set static padding on one axis.
    pub fn set(&mut self, axis: usize, lower: usize, upper: usize) {
        self.lower[axis] = lower;
        self.upper[axis] = upper;
        self.dynamic[axis] = false;
    }

    /// Mark one axis as padded by amounts resolved at execution time.
    pub fn set_dynamic(&mut self, axis: usize) {
        self.lower[axis] = 0;
        self.upper[axis] = 0;
        self.dynamic[axis] = true;
    }

    /// Entrywise sum with extra padding.
    pub fn grow(&self, lower: &[usize], upper: &[usize]) -> Padding {
        let mut out = self.clone();
        for (axis, (l, u)) in lower.iter().zip(upper).enumerate() {
            out.lower[axis] += l;
            out.upper[axis] += u;
        }
        out
    }
}

/// Result of comparing two layouts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Compatibility {
    /// Byte-for-byte identical on every known quantity.
    Compatible,
    /// Compatible as far as known; unknown dims have to be rechecked.
    Pending,
    Incompatible,
}

impl Compatibility {
    pub fn is_compatible(self) -> bool {
        self != Compatibility::Incompatible
    }

    pub fn is_pending(self) -> bool {
        self == Compatibility::Pending
    }

    /// Combine two checks; the weakest result wins.
    pub fn and(self, other: Compatibility) -> Compatibility {
        use Compatibility::*;
        match (self, other) {
            (Incompatible, _) | (_, Incompatible) => Incompatible,
            (Pending, _) | (_, Pending) => Pending,
            (Compatible, Compatible) => Compatible,
        }
    }
}

/// Shape, element type, format and padding of a buffer.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Layout {
    pub shape: PartialShape,
    pub dtype: DataType,
    pub format: Format,
    pub padding: Padding,
}

impl Layout {
    /// Unpadded layout with an explicit format.
    pub fn new(shape: impl Into<PartialShape>, dtype: DataType, format: Format) -> Self {
        let shape = shape.into();
        let padding = Padding::zero(shape.rank());
        Self {
            shape,
            dtype,
            format,
            padding,
        }
    }

    /// Unpadded layout in the plain format for its rank.
    pub fn plain(shape: impl Into<PartialShape>, dtype: DataType) -> Self {
        let shape = shape.into();
        let format = Format::default_for_rank(shape.rank());
        Self::new(shape, dtype, format)
    }

    pub fn with_padding(mut self, padding: Padding) -> Self {
        self.padding = padding;
        self
    }

    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn is_static(&self) -> bool {
        self.shape.is_static()
    }

    pub fn element_count(&self) -> Option<usize> {
        self.shape.element_count()
    }

    /// Check that format and padding fit the shape.
    pub fn validate(&self) -> Result<()> {
        if !self.format.supports_rank(self.rank()) {
            return Err(Error::ShapeMismatch(format!(
                "format {} cannot hold a rank {} tensor",
                self.format,
                self.rank()
            )));
        }
        if self.padding.rank() != self.rank() {
            return Err(Error::ShapeMismatch(format!(
                "padding rank {} differs from shape rank {}",
                self.padding.rank(),
                self.rank()
            )));
        }
        Ok(())
    }

    /// Rank-1 view of the same elements.
    ///
    /// Only meaningful for unpadded layouts; padding is not carried over.
    pub fn flattened(&self) -> Layout {
        let count = self.element_count().map_or(Dim::Unknown, Dim::Known);
        let format = if self.format.is_blocked() {
            self.format
        } else {
            Format::Bfyx
        };
        Layout {
            shape: PartialShape::new(vec![count]),
            dtype: self.dtype,
            format,
            padding: Padding::zero(1),
        }
    }

    pub fn compatibility(&self, other: &Layout) -> Compatibility {
        if self.rank() != other.rank()
            || self.dtype != other.dtype
            || self.format != other.format
            || self.padding != other.padding
        {
            return Compatibility::Incompatible;
        }

        let mut result = if self.padding.has_dynamic() {
            Compatibility::Pending
        } else {
            Compatibility::Compatible
        };
        for (a, b) in self.shape.iter().zip(other.shape.iter()) {
            match (a, b) {
                (Dim::Known(x), Dim::Known(y)) if x != y => return Compatibility::Incompatible,
                (Dim::Known(_), Dim::Known(_)) => {}
                _ => result = Compatibility::Pending,
            }
        }
        result
    }

    pub fn is_compatible(&self, other: &Layout) -> bool {
        self.compatibility(other).is_compatible()
    }

    /// Substitute concrete sizes for unknown dims.
    pub fn realize(&self, concrete: &[usize]) -> Result<Layout> {
        if concrete.len() != self.rank() {
            return Err(Error::ShapeMismatch(format!(
                "cannot realize {} with rank {} shape {:?}",
                self.shape,
                concrete.len(),
                concrete
            )));
        }
        for (axis, (dim, &value)) in self.shape.iter().zip(concrete).enumerate() {
            if let Dim::Known(n) = dim
                && *n != value
            {
                return Err(Error::ShapeMismatch(format!(
                    "dim {axis} of {} is {n}, got {value}",
                    self.shape
                )));
            }
        }
        Ok(Layout {
            shape: PartialShape::from_static(concrete),
            ..self.clone()
        })
    }

    /// Dimensions of the backing allocation, padding and block rounding included.
    pub fn padded_dims(&self) -> Result<Vec<usize>> {
        let dims = self.shape.to_static().ok_or_else(|| {
            Error::LayoutNotResolved(format!("shape {} is not static", self.shape))
        })?;
        if self.padding.has_dynamic() {
            return Err(Error::LayoutNotResolved(format!(
                "padding of {} is not resolved",
                self
            )));
        }
        let mut padded: Vec<usize> = dims
            .iter()
            .enumerate()
            .map(|(axis, d)| d + self.padding.lower[axis] + self.padding.upper[axis])
            .collect();
        if let Some((axis, block)) = self.format.block()
            && axis < padded.len()
        {
            padded[axis] = padded[axis].div_ceil(block) * block;
        }
        Ok(padded)
    }

    /// Number of elements the backing allocation must hold.
    pub fn buffer_elements(&self) -> Result<usize> {
        Ok(self.padded_dims()?.iter().product())
    }

    /// Precomputed index-to-offset mapping for a resolved layout.
    pub fn addressing(&self) -> Result<Addressing> {
        let padded = self.padded_dims()?;
        let block = self.format.block().filter(|(axis, _)| *axis < padded.len());

        let mut outer = padded.clone();
        let inner = match block {
            Some((axis, size)) => {
                outer[axis] /= size;
                size
            }
            None => 1,
        };

        let mut strides = vec![0; outer.len()];
        let mut stride = inner;
        for axis in (0..outer.len()).rev() {
            strides[axis] = stride;
            stride *= outer[axis];
        }

        Ok(Addressing {
            lower: self.padding.lower.clone(),
            strides,
            block,
        })
    }

    /// Element offset of a logical index inside the backing allocation.
    pub fn offset_of(&self, index: &[usize]) -> Result<usize> {
        Ok(self.addressing()?.offset(index))
    }
}

impl fmt::Display for Layout {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}{}", self.dtype, self.format, self.shape)?;
        if !self.padding.is_zero() {
            f.write_str(" pad(")?;
            for axis in 0..self.padding.rank() {
                if axis > 0 {
                    f.write_str(",")?;
                }
                if self.padding.is_dynamic(axis) {
                    f.write_str("?")?;
                } else {
                    write!(
                        f,
                        "{}:{}",
                        self.padding.lower[axis], self.padding.upper[axis]
                    )?;
                }
            }
            f.write_str(")")?;
        }
        Ok(())
    }
}

/// Maps logical indices of a resolved layout to buffer offsets.
#[derive(Debug, Clone)]
pub struct Addressing {
    lower: Vec<usize>,
    strides: Vec<usize>,
    block: Option<(usize, usize)>,
}

impl Addressing {
    pub fn offset(&self, index: &[usize]) -> usize {
        let mut offset = 0;
        for (axis, &i) in index.iter().enumerate() {
            let coord = i + self.lower[axis];
            match self.block {
                Some((block_axis, size)) if block_axis == axis => {
                    offset += (coord / size) * self.strides[axis] + coord % size;
                }
                _ => offset += coord * self.strides[axis],
            }
        }
        offset
    }
}

/// Whether two layouts describe the same bytes, pending unknown dims.
pub fn is_compatible(a: &Layout, b: &Layout) -> bool {
    a.is_compatible(b)
}

/// Substitute concrete sizes for the unknown dims of `layout`.
pub fn realize(layout: &Layout, concrete: &[usize]) -> Result<Layout> {
    layout.realize(concrete)
}

/// Standard allocator acceptance rule.
///
/// Plain formats accept any padding. Blocked formats need the lower padding of
/// the blocked axis to start on a block boundary; dynamic entries cannot be
/// judged yet and are accepted.
pub fn default_layout_validity(layout: &Layout) -> bool {
    if layout.validate().is_err() {
        return false;
    }
    match layout.format.block() {
        Some((axis, size)) => {
            layout.padding.is_dynamic(axis) || layout.padding.lower()[axis] % size == 0
        }
        None => true,
    }
}
