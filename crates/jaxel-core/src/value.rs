use serde::{Deserialize, Serialize};

use crate::dtype::{DType, Shape};
use crate::error::CoreError;

/// A single element, stored in widest form. Float and complex payloads are
/// kept as bit patterns so `Eq` and `Hash` stay exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Literal {
    I64(i64),
    Bool(bool),
    F64Bits(u64),
    Complex64Bits(u32, u32),
}

impl Literal {
    #[must_use]
    pub fn from_f64(value: f64) -> Self {
        Self::F64Bits(value.to_bits())
    }

    #[must_use]
    pub fn from_complex64(re: f32, im: f32) -> Self {
        Self::Complex64Bits(re.to_bits(), im.to_bits())
    }

    #[must_use]
    pub fn as_f64(self) -> Option<f64> {
        match self {
            Self::F64Bits(bits) => Some(f64::from_bits(bits)),
            Self::I64(value) => Some(value as f64),
            Self::Bool(_) | Self::Complex64Bits(..) => None,
        }
    }

    #[must_use]
    pub fn as_i64(self) -> Option<i64> {
        match self {
            Self::I64(value) => Some(value),
            Self::Bool(_) | Self::F64Bits(_) | Self::Complex64Bits(..) => None,
        }
    }

    #[must_use]
    pub fn as_complex64(self) -> Option<(f32, f32)> {
        match self {
            Self::Complex64Bits(re, im) => Some((f32::from_bits(re), f32::from_bits(im))),
            Self::F64Bits(bits) => Some((f64::from_bits(bits) as f32, 0.0)),
            Self::I64(value) => Some((value as f32, 0.0)),
            Self::Bool(_) => None,
        }
    }

    #[must_use]
    pub fn is_integral(self) -> bool {
        matches!(self, Self::I64(_))
    }

    /// The natural dtype of a bare literal (weakly typed: integers are I64,
    /// floats F64). Declared tensor dtypes may be narrower.
    #[must_use]
    pub fn natural_dtype(self) -> DType {
        match self {
            Self::I64(_) => DType::I64,
            Self::Bool(_) => DType::Bool,
            Self::F64Bits(_) => DType::F64,
            Self::Complex64Bits(..) => DType::Complex64,
        }
    }

    /// Zero of the given dtype.
    #[must_use]
    pub fn zero(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Bool(false),
            DType::I32 | DType::I64 => Self::I64(0),
            DType::F16 | DType::F32 | DType::F64 => Self::from_f64(0.0),
            DType::Complex64 => Self::from_complex64(0.0, 0.0),
        }
    }

    /// One of the given dtype.
    #[must_use]
    pub fn one(dtype: DType) -> Self {
        match dtype {
            DType::Bool => Self::Bool(true),
            DType::I32 | DType::I64 => Self::I64(1),
            DType::F16 | DType::F32 | DType::F64 => Self::from_f64(1.0),
            DType::Complex64 => Self::from_complex64(1.0, 0.0),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Value {
    Scalar(Literal),
    Tensor(TensorValue),
}

impl Value {
    #[must_use]
    pub fn scalar_i64(value: i64) -> Self {
        Self::Scalar(Literal::I64(value))
    }

    #[must_use]
    pub fn scalar_f64(value: f64) -> Self {
        Self::Scalar(Literal::from_f64(value))
    }

    #[must_use]
    pub fn scalar_bool(value: bool) -> Self {
        Self::Scalar(Literal::Bool(value))
    }

    #[must_use]
    pub fn scalar_complex64(re: f32, im: f32) -> Self {
        Self::Scalar(Literal::from_complex64(re, im))
    }

    pub fn vector_i64(values: &[i64]) -> Result<Self, ValueError> {
        let elements = values.iter().copied().map(Literal::I64).collect::<Vec<_>>();
        Ok(Self::Tensor(TensorValue::new(
            DType::I64,
            Shape::vector(values.len() as u32),
            elements,
        )?))
    }

    pub fn vector_f64(values: &[f64]) -> Result<Self, ValueError> {
        let elements = values
            .iter()
            .copied()
            .map(Literal::from_f64)
            .collect::<Vec<_>>();
        Ok(Self::Tensor(TensorValue::new(
            DType::F64,
            Shape::vector(values.len() as u32),
            elements,
        )?))
    }

    /// Row-major tensor from f64 values with a declared float dtype.
    pub fn tensor_f64(dtype: DType, dims: &[u32], values: &[f64]) -> Result<Self, ValueError> {
        let elements = values
            .iter()
            .copied()
            .map(Literal::from_f64)
            .collect::<Vec<_>>();
        Ok(Self::Tensor(TensorValue::new(
            dtype,
            Shape::from_dims(dims),
            elements,
        )?))
    }

    #[must_use]
    pub fn as_scalar_literal(&self) -> Option<Literal> {
        match self {
            Self::Scalar(lit) => Some(*lit),
            Self::Tensor(_) => None,
        }
    }

    #[must_use]
    pub fn as_f64_scalar(&self) -> Option<f64> {
        self.as_scalar_literal().and_then(Literal::as_f64)
    }

    #[must_use]
    pub fn as_i64_scalar(&self) -> Option<i64> {
        self.as_scalar_literal().and_then(Literal::as_i64)
    }

    #[must_use]
    pub fn as_bool_scalar(&self) -> Option<bool> {
        match self.as_scalar_literal() {
            Some(Literal::Bool(b)) => Some(b),
            _ => None,
        }
    }

    #[must_use]
    pub fn as_tensor(&self) -> Option<&TensorValue> {
        match self {
            Self::Scalar(_) => None,
            Self::Tensor(tensor) => Some(tensor),
        }
    }

    #[must_use]
    pub fn dtype(&self) -> DType {
        match self {
            Self::Scalar(lit) => lit.natural_dtype(),
            Self::Tensor(t) => t.dtype,
        }
    }

    #[must_use]
    pub fn shape(&self) -> Shape {
        match self {
            Self::Scalar(_) => Shape::scalar(),
            Self::Tensor(t) => t.shape.clone(),
        }
    }

    /// All elements in row-major order, one for scalars.
    #[must_use]
    pub fn elements(&self) -> Vec<Literal> {
        match self {
            Self::Scalar(lit) => vec![*lit],
            Self::Tensor(t) => t.elements.clone(),
        }
    }

    /// Zero value of the same shape and dtype.
    #[must_use]
    pub fn zeros_like(&self) -> Self {
        match self {
            Self::Scalar(lit) => Self::Scalar(Literal::zero(lit.natural_dtype())),
            Self::Tensor(t) => Self::Tensor(TensorValue {
                dtype: t.dtype,
                shape: t.shape.clone(),
                elements: vec![Literal::zero(t.dtype); t.elements.len()],
            }),
        }
    }

    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        match self {
            Self::Scalar(lit) => lit.as_f64().map(|v| vec![v]),
            Self::Tensor(t) => t.to_f64_vec(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TensorValue {
    pub dtype: DType,
    pub shape: Shape,
    pub elements: Vec<Literal>,
}

impl TensorValue {
    pub fn new(dtype: DType, shape: Shape, elements: Vec<Literal>) -> Result<Self, ValueError> {
        let expected_count = shape.element_count().ok_or(ValueError::ShapeOverflow {
            shape: shape.clone(),
        })?;

        if expected_count != elements.len() as u64 {
            return Err(ValueError::ElementCountMismatch {
                shape,
                expected_count,
                actual_count: elements.len(),
            });
        }

        Ok(Self {
            dtype,
            shape,
            elements,
        })
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.elements.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.elements.is_empty()
    }

    #[must_use]
    pub fn rank(&self) -> usize {
        self.shape.rank()
    }

    pub fn to_f64_vec(&self) -> Option<Vec<f64>> {
        self.elements.iter().copied().map(Literal::as_f64).collect()
    }

    pub fn to_i64_vec(&self) -> Option<Vec<i64>> {
        self.elements.iter().copied().map(Literal::as_i64).collect()
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ValueError {
    ShapeOverflow {
        shape: Shape,
    },
    ElementCountMismatch {
        shape: Shape,
        expected_count: u64,
        actual_count: usize,
    },
}

impl std::fmt::Display for ValueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ShapeOverflow { shape } => {
                write!(f, "shape element count overflowed: {shape}")
            }
            Self::ElementCountMismatch {
                shape,
                expected_count,
                actual_count,
            } => {
                write!(
                    f,
                    "tensor element count mismatch for shape {shape}: expected {expected_count}, got {actual_count}"
                )
            }
        }
    }
}

impl std::error::Error for ValueError {}

impl From<ValueError> for CoreError {
    fn from(value: ValueError) -> Self {
        CoreError::ShapeMismatch {
            primitive: "tensor".to_owned(),
            detail: value.to_string(),
        }
    }
}
