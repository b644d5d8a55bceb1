//! Element types and partially known tensor shapes.

use std::fmt;
use std::ops::Index;

/// Element type of a tensor buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataType {
    F32,
    F16,
    I64,
    I32,
    U8,
}

impl DataType {
    /// Size of one element in bytes.
    pub fn size(&self) -> usize {
        match self {
            DataType::F32 | DataType::I32 => 4,
            DataType::F16 => 2,
            DataType::I64 => 8,
            DataType::U8 => 1,
        }
    }

    /// Whether this is a floating point type.
    pub fn is_float(&self) -> bool {
        matches!(self, DataType::F32 | DataType::F16)
    }

    /// Convert a value into the representable range of this type.
    ///
    /// Values are carried as `f64` lanes on the host. Integer types truncate
    /// toward zero, `U8` saturates to `0..=255`, `F32` rounds to single
    /// precision.
    pub fn convert(&self, value: f64) -> f64 {
        match self {
            DataType::F32 => f64::from(value as f32),
            DataType::F16 => value,
            DataType::I64 | DataType::I32 => value.trunc(),
            DataType::U8 => value.trunc().clamp(0.0, 255.0),
        }
    }
}

impl fmt::Display for DataType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            DataType::F32 => "f32",
            DataType::F16 => "f16",
            DataType::I64 => "i64",
            DataType::I32 => "i32",
            DataType::U8 => "u8",
        };
        f.write_str(name)
    }
}

/// A single dimension that may not be known until execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dim {
    Known(usize),
    Unknown,
}

impl Dim {
    pub fn is_known(&self) -> bool {
        matches!(self, Dim::Known(_))
    }

    /// Get the value if known.
    pub fn as_known(&self) -> Option<usize> {
        match self {
            Dim::Known(n) => Some(*n),
            Dim::Unknown => None,
        }
    }

    /// Whether this dimension is known to be 1.
    pub fn is_unit(&self) -> bool {
        matches!(self, Dim::Known(1))
    }

    /// Merge two views of the same dimension.
    ///
    /// Returns `None` when both are known and disagree.
    pub fn merge(self, other: Dim) -> Option<Dim> {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) if a != b => None,
            (Dim::Known(a), _) | (_, Dim::Known(a)) => Some(Dim::Known(a)),
            (Dim::Unknown, Dim::Unknown) => Some(Dim::Unknown),
        }
    }

    /// Sum of two dimensions; unknown if either side is.
    pub fn add(self, other: Dim) -> Dim {
        match (self, other) {
            (Dim::Known(a), Dim::Known(b)) => Dim::Known(a + b),
            _ => Dim::Unknown,
        }
    }
}

impl From<usize> for Dim {
    fn from(value: usize) -> Self {
        Dim::Known(value)
    }
}

impl fmt::Display for Dim {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Dim::Known(n) => write!(f, "{n}"),
            Dim::Unknown => f.write_str("?"),
        }
    }
}

/// Ordered sequence of dimensions, some of which may be unknown.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Default)]
pub struct PartialShape(Vec<Dim>);

impl PartialShape {
    pub fn new(dims: Vec<Dim>) -> Self {
        Self(dims)
    }

    /// Shape with every dimension known.
    pub fn from_static(dims: &[usize]) -> Self {
        Self(dims.iter().map(|&d| Dim::Known(d)).collect())
    }

    /// Shape of the given rank with every dimension unknown.
    pub fn dynamic(rank: usize) -> Self {
        Self(vec![Dim::Unknown; rank])
    }

    pub fn rank(&self) -> usize {
        self.0.len()
    }

    pub fn dims(&self) -> &[Dim] {
        &self.0
    }

    pub fn dims_mut(&mut self) -> &mut [Dim] {
        &mut self.0
    }

    pub fn iter(&self) -> impl Iterator<Item = &Dim> {
        self.0.iter()
    }

    pub fn is_static(&self) -> bool {
        self.0.iter().all(Dim::is_known)
    }

    /// Concrete dimensions, if every dimension is known.
    pub fn to_static(&self) -> Option<Vec<usize>> {
        self.0.iter().map(Dim::as_known).collect()
    }

    /// Total number of elements, if every dimension is known.
    pub fn element_count(&self) -> Option<usize> {
        self.0
            .iter()
            .try_fold(1usize, |acc, d| d.as_known().map(|n| acc * n))
    }

    /// Insert a dimension at `axis`.
    pub fn insert(&mut self, axis: usize, dim: Dim) {
        self.0.insert(axis, dim);
    }

    /// Remove the dimension at `axis`.
    pub fn remove(&mut self, axis: usize) -> Dim {
        self.0.remove(axis)
    }
}

impl Index<usize> for PartialShape {
    type Output = Dim;

    fn index(&self, index: usize) -> &Dim {
        &self.0[index]
    }
}

impl From<Vec<Dim>> for PartialShape {
    fn from(dims: Vec<Dim>) -> Self {
        Self(dims)
    }
}

impl From<&[usize]> for PartialShape {
    fn from(dims: &[usize]) -> Self {
        Self::from_static(dims)
    }
}

impl fmt::Display for PartialShape {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_element_count() {
        assert_eq!(PartialShape::from_static(&[1, 2, 3]).element_count(), Some(6));
        assert_eq!(PartialShape::from_static(&[]).element_count(), Some(1));
        let shape = PartialShape::new(vec![Dim::Known(2), Dim::Unknown]);
        assert_eq!(shape.element_count(), None);
        assert!(!shape.is_static());
    }

    #[test]
    fn test_dim_merge() {
        assert_eq!(Dim::Known(3).merge(Dim::Unknown), Some(Dim::Known(3)));
        assert_eq!(Dim::Unknown.merge(Dim::Known(4)), Some(Dim::Known(4)));
        assert_eq!(Dim::Known(3).merge(Dim::Known(4)), None);
        assert_eq!(Dim::Unknown.merge(Dim::Unknown), Some(Dim::Unknown));
    }

    #[test]
    fn test_convert_saturates_u8() {
        assert_eq!(DataType::U8.convert(300.7), 255.0);
        assert_eq!(DataType::U8.convert(-2.0), 0.0);
        assert_eq!(DataType::I32.convert(-2.7), -2.0);
        assert_eq!(DataType::F32.convert(1.5), 1.5);
        assert_eq!(DataType::F32.convert(0.1), f64::from(0.1f32));
        assert_eq!(DataType::I64.convert(16_777_217.0), 16_777_217.0);
    }

    #[test]
    fn test_display() {
        let shape = PartialShape::new(vec![Dim::Known(1), Dim::Unknown, Dim::Known(4)]);
        assert_eq!(shape.to_string(), "[1,?,4]");
    }
}
