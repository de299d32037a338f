use serde::{Deserialize, Serialize};

/// Element type of an array value.
///
/// Ordering follows the promotion lattice: `Bool < I32 < I64 < F16 < F32 <
/// F64 < Complex64`. `promote` is the join (max) of two dtypes.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum DType {
    Bool,
    I32,
    I64,
    F16,
    F32,
    F64,
    Complex64,
}

impl DType {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Bool => "bool",
            Self::I32 => "i32",
            Self::I64 => "i64",
            Self::F16 => "f16",
            Self::F32 => "f32",
            Self::F64 => "f64",
            Self::Complex64 => "c64",
        }
    }

    #[must_use]
    pub fn is_float(self) -> bool {
        matches!(self, Self::F16 | Self::F32 | Self::F64)
    }

    #[must_use]
    pub fn is_integer(self) -> bool {
        matches!(self, Self::I32 | Self::I64)
    }

    #[must_use]
    pub fn is_complex(self) -> bool {
        matches!(self, Self::Complex64)
    }

    /// Join on the promotion lattice.
    #[must_use]
    pub fn promote(self, other: Self) -> Self {
        self.max(other)
    }
}

impl std::fmt::Display for DType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Shape {
    pub dims: Vec<u32>,
}

impl Shape {
    #[must_use]
    pub fn scalar() -> Self {
        Self { dims: Vec::new() }
    }

    #[must_use]
    pub fn vector(len: u32) -> Self {
        Self { dims: vec![len] }
    }

    #[must_use]
    pub fn from_dims(dims: &[u32]) -> Self {
        Self {
            dims: dims.to_vec(),
        }
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.dims.len()
    }

    #[must_use]
    pub fn is_scalar(&self) -> bool {
        self.dims.is_empty()
    }

    /// Total element count, or `None` on overflow.
    #[must_use]
    pub fn element_count(&self) -> Option<u64> {
        self.dims
            .iter()
            .try_fold(1_u64, |acc, dim| acc.checked_mul(u64::from(*dim)))
    }

    /// Result shape of trailing-axis-aligned broadcasting, or `None` when the
    /// shapes are incompatible. Equal extents match; an extent of 1 stretches.
    #[must_use]
    pub fn broadcast_with(&self, other: &Self) -> Option<Self> {
        let max_rank = self.rank().max(other.rank());
        let mut dims = Vec::with_capacity(max_rank);
        for offset in 0..max_rank {
            let lhs = if offset < self.rank() {
                self.dims[self.rank() - 1 - offset]
            } else {
                1
            };
            let rhs = if offset < other.rank() {
                other.dims[other.rank() - 1 - offset]
            } else {
                1
            };
            let out = if lhs == rhs {
                lhs
            } else if lhs == 1 {
                rhs
            } else if rhs == 1 {
                lhs
            } else {
                return None;
            };
            dims.push(out);
        }
        dims.reverse();
        Some(Self { dims })
    }
}

impl std::fmt::Display for Shape {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("[")?;
        for (i, dim) in self.dims.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{dim}")?;
        }
        f.write_str("]")
    }
}
