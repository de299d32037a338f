use serde::{Deserialize, Serialize};

use crate::dtype::{DType, Shape};
use crate::value::{Literal, TensorValue, Value, ValueError};

/// The static type of a value in the IR: shape and dtype.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ShapedArray {
    pub dtype: DType,
    pub shape: Shape,
}

impl ShapedArray {
    #[must_use]
    pub fn new(dtype: DType, shape: Shape) -> Self {
        Self { dtype, shape }
    }

    #[must_use]
    pub fn scalar(dtype: DType) -> Self {
        Self {
            dtype,
            shape: Shape::scalar(),
        }
    }

    #[must_use]
    pub fn of_value(value: &Value) -> Self {
        Self {
            dtype: value.dtype(),
            shape: value.shape(),
        }
    }

    /// A zero-filled concrete value of this type.
    pub fn zeros_value(&self) -> Result<Value, ValueError> {
        self.filled_value(Literal::zero(self.dtype))
    }

    /// A one-filled concrete value of this type.
    pub fn ones_value(&self) -> Result<Value, ValueError> {
        self.filled_value(Literal::one(self.dtype))
    }

    fn filled_value(&self, fill: Literal) -> Result<Value, ValueError> {
        if self.shape.is_scalar() {
            return Ok(Value::Scalar(fill));
        }
        let count = self
            .shape
            .element_count()
            .ok_or(ValueError::ShapeOverflow {
                shape: self.shape.clone(),
            })? as usize;
        Ok(Value::Tensor(TensorValue::new(
            self.dtype,
            self.shape.clone(),
            vec![fill; count],
        )?))
    }
}

impl std::fmt::Display for ShapedArray {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}{}", self.dtype, self.shape)
    }
}

/// An abstract value: a shaped type, optionally refined by a captured
/// concrete value. Concrete avals drive constant folding during staging.
///
/// Equality is structural on the shaped part only.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Aval {
    pub shaped: ShapedArray,
    pub concrete: Option<Value>,
}

impl Aval {
    #[must_use]
    pub fn shaped(shaped: ShapedArray) -> Self {
        Self {
            shaped,
            concrete: None,
        }
    }

    #[must_use]
    pub fn concrete(value: Value) -> Self {
        Self {
            shaped: ShapedArray::of_value(&value),
            concrete: Some(value),
        }
    }

    #[must_use]
    pub fn is_concrete(&self) -> bool {
        self.concrete.is_some()
    }
}

impl PartialEq for Aval {
    fn eq(&self, other: &Self) -> bool {
        self.shaped == other.shaped
    }
}

impl Eq for Aval {}

#[cfg(test)]
mod tests {
    use super::{Aval, ShapedArray};
    use crate::dtype::{DType, Shape};
    use crate::value::Value;

    #[test]
    fn aval_equality_ignores_concrete_payload() {
        let shaped = Aval::shaped(ShapedArray::scalar(DType::I64));
        let concrete = Aval::concrete(Value::scalar_i64(7));
        assert_eq!(shaped, concrete);

        let other = Aval::shaped(ShapedArray::new(DType::I64, Shape::vector(2)));
        assert_ne!(shaped, other);
    }

    #[test]
    fn shaped_array_display_is_type_annotation() {
        let aval = ShapedArray::new(DType::F32, Shape::from_dims(&[2, 3]));
        assert_eq!(aval.to_string(), "f32[2,3]");
    }
}
