//! Elementwise kernels with full trailing-axis broadcasting.

use jaxel_core::{DType, Literal, Shape, TensorValue, Value};
use jaxel_runtime::BackendError;

/// A binary numeric operation with per-dtype paths. Operations without an
/// integer path (true division) promote to the float path.
#[derive(Clone, Copy)]
pub(crate) struct BinaryOp {
    pub name: &'static str,
    pub int_op: Option<fn(i64, i64) -> i64>,
    pub float_op: fn(f64, f64) -> f64,
    pub complex_op: Option<fn((f32, f32), (f32, f32)) -> (f32, f32)>,
}

pub(crate) const ADD: BinaryOp = BinaryOp {
    name: "add",
    int_op: Some(|a, b| a.wrapping_add(b)),
    float_op: |a, b| a + b,
    complex_op: Some(|(ar, ai), (br, bi)| (ar + br, ai + bi)),
};

pub(crate) const SUB: BinaryOp = BinaryOp {
    name: "sub",
    int_op: Some(|a, b| a.wrapping_sub(b)),
    float_op: |a, b| a - b,
    complex_op: Some(|(ar, ai), (br, bi)| (ar - br, ai - bi)),
};

pub(crate) const MUL: BinaryOp = BinaryOp {
    name: "mul",
    int_op: Some(|a, b| a.wrapping_mul(b)),
    float_op: |a, b| a * b,
    complex_op: Some(|(ar, ai), (br, bi)| (ar * br - ai * bi, ar * bi + ai * br)),
};

pub(crate) const DIV: BinaryOp = BinaryOp {
    name: "div",
    int_op: None,
    float_op: |a, b| a / b,
    complex_op: Some(|(ar, ai), (br, bi)| {
        let denom = br * br + bi * bi;
        ((ar * br + ai * bi) / denom, (ai * br - ar * bi) / denom)
    }),
};

pub(crate) fn apply_binary_literal(
    op: BinaryOp,
    lhs: Literal,
    rhs: Literal,
) -> Result<Literal, BackendError> {
    if matches!(lhs, Literal::Bool(_)) || matches!(rhs, Literal::Bool(_)) {
        return Err(BackendError::ExecutionFailed {
            primitive: op.name.to_owned(),
            detail: "boolean operand in arithmetic".to_owned(),
        });
    }

    if matches!(lhs, Literal::Complex64Bits(..)) || matches!(rhs, Literal::Complex64Bits(..)) {
        let complex_op = op.complex_op.ok_or_else(|| BackendError::ExecutionFailed {
            primitive: op.name.to_owned(),
            detail: "complex operands unsupported".to_owned(),
        })?;
        let a = lhs.as_complex64().ok_or_else(|| bad_operand(op.name))?;
        let b = rhs.as_complex64().ok_or_else(|| bad_operand(op.name))?;
        let (re, im) = complex_op(a, b);
        return Ok(Literal::from_complex64(re, im));
    }

    if let (Literal::I64(a), Literal::I64(b)) = (lhs, rhs)
        && let Some(int_op) = op.int_op
    {
        return Ok(Literal::I64(int_op(a, b)));
    }

    let a = lhs.as_f64().ok_or_else(|| bad_operand(op.name))?;
    let b = rhs.as_f64().ok_or_else(|| bad_operand(op.name))?;
    Ok(Literal::from_f64((op.float_op)(a, b)))
}

fn bad_operand(primitive: &str) -> BackendError {
    BackendError::ExecutionFailed {
        primitive: primitive.to_owned(),
        detail: "non-numeric operand".to_owned(),
    }
}

fn result_dtype(op: BinaryOp, lhs: DType, rhs: DType) -> DType {
    let promoted = lhs.promote(rhs);
    if op.int_op.is_none() && !promoted.is_float() && !promoted.is_complex() {
        // True division of integers yields floats.
        DType::F64
    } else {
        promoted
    }
}

pub(crate) fn binary(op: BinaryOp, inputs: &[Value]) -> Result<Value, BackendError> {
    let [lhs, rhs] = inputs else {
        return Err(arity(op.name, 2, inputs.len()));
    };
    let dtype = result_dtype(op, lhs.dtype(), rhs.dtype());
    broadcast_zip(op.name, lhs, rhs, dtype, |a, b| {
        apply_binary_literal(op, a, b)
    })
}

/// A comparison producing booleans. Complex operands only support equality.
#[derive(Clone, Copy)]
pub(crate) struct CompareOp {
    pub name: &'static str,
    pub int_cmp: fn(i64, i64) -> bool,
    pub float_cmp: fn(f64, f64) -> bool,
    pub equality: bool,
}

pub(crate) const GREATER: CompareOp = CompareOp {
    name: "greater",
    int_cmp: |a, b| a > b,
    float_cmp: |a, b| a > b,
    equality: false,
};

pub(crate) const LESS: CompareOp = CompareOp {
    name: "less",
    int_cmp: |a, b| a < b,
    float_cmp: |a, b| a < b,
    equality: false,
};

pub(crate) const EQUAL: CompareOp = CompareOp {
    name: "equal",
    int_cmp: |a, b| a == b,
    float_cmp: |a, b| a == b,
    equality: true,
};

pub(crate) fn compare(op: CompareOp, inputs: &[Value]) -> Result<Value, BackendError> {
    let [lhs, rhs] = inputs else {
        return Err(arity(op.name, 2, inputs.len()));
    };
    broadcast_zip(op.name, lhs, rhs, DType::Bool, |a, b| {
        let flag = match (a, b) {
            (Literal::I64(x), Literal::I64(y)) => (op.int_cmp)(x, y),
            (Literal::Bool(x), Literal::Bool(y)) => (op.int_cmp)(i64::from(x), i64::from(y)),
            (Literal::Complex64Bits(..), _) | (_, Literal::Complex64Bits(..)) => {
                if !op.equality {
                    return Err(BackendError::ExecutionFailed {
                        primitive: op.name.to_owned(),
                        detail: "complex operands are unordered".to_owned(),
                    });
                }
                a.as_complex64() == b.as_complex64()
            }
            _ => {
                let x = a.as_f64().ok_or_else(|| bad_operand(op.name))?;
                let y = b.as_f64().ok_or_else(|| bad_operand(op.name))?;
                (op.float_cmp)(x, y)
            }
        };
        Ok(Literal::Bool(flag))
    })
}

/// A unary numeric operation.
#[derive(Clone, Copy)]
pub(crate) struct UnaryOp {
    pub name: &'static str,
    pub int_op: Option<fn(i64) -> i64>,
    pub float_op: fn(f64) -> f64,
    pub complex_op: Option<fn((f32, f32)) -> (f32, f32)>,
}

pub(crate) const NEG: UnaryOp = UnaryOp {
    name: "neg",
    int_op: Some(|x| x.wrapping_neg()),
    float_op: |x| -x,
    complex_op: Some(|(re, im)| (-re, -im)),
};

pub(crate) const EXP: UnaryOp = float_unary("exp", f64::exp);
pub(crate) const LOG: UnaryOp = float_unary("log", f64::ln);
pub(crate) const SQRT: UnaryOp = float_unary("sqrt", f64::sqrt);
pub(crate) const SIN: UnaryOp = float_unary("sin", f64::sin);
pub(crate) const COS: UnaryOp = float_unary("cos", f64::cos);

const fn float_unary(name: &'static str, float_op: fn(f64) -> f64) -> UnaryOp {
    UnaryOp {
        name,
        int_op: None,
        float_op,
        complex_op: None,
    }
}

pub(crate) fn unary(op: UnaryOp, inputs: &[Value]) -> Result<Value, BackendError> {
    let [input] = inputs else {
        return Err(arity(op.name, 1, inputs.len()));
    };

    let in_dtype = input.dtype();
    let out_dtype = if op.int_op.is_some() || in_dtype.is_float() || in_dtype.is_complex() {
        in_dtype
    } else {
        // Transcendentals promote integer inputs to floats.
        DType::F64
    };

    let apply = |lit: Literal| -> Result<Literal, BackendError> {
        match lit {
            Literal::Bool(_) => Err(BackendError::ExecutionFailed {
                primitive: op.name.to_owned(),
                detail: "boolean operand in arithmetic".to_owned(),
            }),
            Literal::I64(x) => match op.int_op {
                Some(int_op) => Ok(Literal::I64(int_op(x))),
                None => Ok(Literal::from_f64((op.float_op)(x as f64))),
            },
            Literal::F64Bits(bits) => Ok(Literal::from_f64((op.float_op)(f64::from_bits(bits)))),
            Literal::Complex64Bits(..) => {
                let complex_op = op.complex_op.ok_or_else(|| BackendError::ExecutionFailed {
                    primitive: op.name.to_owned(),
                    detail: "complex operands unsupported".to_owned(),
                })?;
                let value = lit.as_complex64().ok_or_else(|| bad_operand(op.name))?;
                let (re, im) = complex_op(value);
                Ok(Literal::from_complex64(re, im))
            }
        }
    };

    match input {
        Value::Scalar(lit) => Ok(Value::Scalar(apply(*lit)?)),
        Value::Tensor(tensor) => {
            let elements = tensor
                .elements
                .iter()
                .copied()
                .map(apply)
                .collect::<Result<Vec<_>, _>>()?;
            TensorValue::new(out_dtype, tensor.shape.clone(), elements)
                .map(Value::Tensor)
                .map_err(|err| execution(op.name, err))
        }
    }
}

/// Broadcast two values to their joint shape and combine elementwise.
fn broadcast_zip(
    name: &str,
    lhs: &Value,
    rhs: &Value,
    out_dtype: DType,
    combine: impl Fn(Literal, Literal) -> Result<Literal, BackendError>,
) -> Result<Value, BackendError> {
    let lhs_shape = lhs.shape();
    let rhs_shape = rhs.shape();
    let out_shape = lhs_shape
        .broadcast_with(&rhs_shape)
        .ok_or_else(|| BackendError::ExecutionFailed {
            primitive: name.to_owned(),
            detail: format!("cannot broadcast {lhs_shape} with {rhs_shape}"),
        })?;

    if out_shape.is_scalar() {
        let a = lhs.as_scalar_literal().ok_or_else(|| bad_operand(name))?;
        let b = rhs.as_scalar_literal().ok_or_else(|| bad_operand(name))?;
        return Ok(Value::Scalar(combine(a, b)?));
    }

    let out_count = out_shape
        .element_count()
        .ok_or_else(|| execution_str(name, "output element count overflow"))?
        as usize;
    let out_strides = compute_strides(&out_shape.dims);
    let lhs_elems = lhs.elements();
    let rhs_elems = rhs.elements();
    let lhs_strides = broadcast_strides(&lhs_shape, &out_shape);
    let rhs_strides = broadcast_strides(&rhs_shape, &out_shape);

    let mut elements = Vec::with_capacity(out_count);
    for flat in 0..out_count {
        let multi = flat_to_multi(flat, &out_strides);
        let a = lhs_elems[broadcast_flat_index(&multi, &lhs_strides)];
        let b = rhs_elems[broadcast_flat_index(&multi, &rhs_strides)];
        elements.push(combine(a, b)?);
    }

    TensorValue::new(out_dtype, out_shape, elements)
        .map(Value::Tensor)
        .map_err(|err| execution(name, err))
}

pub(crate) fn compute_strides(dims: &[u32]) -> Vec<usize> {
    let mut strides = vec![1_usize; dims.len()];
    for i in (0..dims.len().saturating_sub(1)).rev() {
        strides[i] = strides[i + 1] * dims[i + 1] as usize;
    }
    strides
}

pub(crate) fn flat_to_multi(flat: usize, strides: &[usize]) -> Vec<usize> {
    let mut multi = Vec::with_capacity(strides.len());
    let mut remainder = flat;
    for &stride in strides {
        multi.push(remainder / stride);
        remainder %= stride;
    }
    multi
}

/// Strides of a value being broadcast to `out_shape`: size-1 axes and
/// left-padded axes get stride 0.
pub(crate) fn broadcast_strides(shape: &Shape, out_shape: &Shape) -> Vec<usize> {
    let rank = shape.rank();
    let out_rank = out_shape.rank();
    let real_strides = compute_strides(&shape.dims);

    let mut result = vec![0_usize; out_rank];
    for (i, &stride) in real_strides.iter().enumerate().take(rank) {
        let out_axis = out_rank - rank + i;
        if shape.dims[i] != 1 {
            result[out_axis] = stride;
        }
    }
    result
}

pub(crate) fn broadcast_flat_index(multi: &[usize], strides: &[usize]) -> usize {
    multi.iter().zip(strides.iter()).map(|(&m, &s)| m * s).sum()
}

pub(crate) fn arity(primitive: &str, expected: usize, actual: usize) -> BackendError {
    BackendError::ExecutionFailed {
        primitive: primitive.to_owned(),
        detail: format!("arity mismatch: expected {expected}, got {actual}"),
    }
}

pub(crate) fn execution(primitive: &str, err: impl std::fmt::Display) -> BackendError {
    BackendError::ExecutionFailed {
        primitive: primitive.to_owned(),
        detail: err.to_string(),
    }
}

pub(crate) fn execution_str(primitive: &str, detail: &str) -> BackendError {
    BackendError::ExecutionFailed {
        primitive: primitive.to_owned(),
        detail: detail.to_owned(),
    }
}

#[cfg(test)]
mod tests {
    use super::{ADD, DIV, GREATER, MUL, NEG, SIN, binary, compare, unary};
    use jaxel_core::{DType, Value};

    #[test]
    fn add_scalars_stays_integral() {
        let out = binary(ADD, &[Value::scalar_i64(2), Value::scalar_i64(5)]).unwrap();
        assert_eq!(out, Value::scalar_i64(7));
    }

    #[test]
    fn add_broadcasts_scalar_over_vector() {
        let v = Value::vector_i64(&[1, 2, 3]).unwrap();
        let out = binary(ADD, &[v, Value::scalar_i64(2)]).unwrap();
        assert_eq!(out, Value::vector_i64(&[3, 4, 5]).unwrap());
    }

    #[test]
    fn mul_broadcasts_row_against_matrix() {
        let matrix = Value::tensor_f64(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let row = Value::tensor_f64(DType::F64, &[1, 3], &[10.0, 20.0, 30.0]).unwrap();
        let out = binary(MUL, &[matrix, row]).unwrap();
        assert_eq!(
            out.to_f64_vec().unwrap(),
            vec![10.0, 40.0, 90.0, 40.0, 100.0, 180.0]
        );
    }

    #[test]
    fn integer_division_promotes_to_float() {
        let out = binary(DIV, &[Value::scalar_i64(3), Value::scalar_i64(2)]).unwrap();
        assert_eq!(out.as_f64_scalar(), Some(1.5));
    }

    #[test]
    fn complex_mul_follows_field_rules() {
        let lhs = Value::scalar_complex64(1.0, 2.0);
        let rhs = Value::scalar_complex64(3.0, -1.0);
        let out = binary(MUL, &[lhs, rhs]).unwrap();
        // (1+2i)(3-i) = 5 + 5i
        assert_eq!(
            out.as_scalar_literal().unwrap().as_complex64(),
            Some((5.0, 5.0))
        );
    }

    #[test]
    fn incompatible_shapes_are_rejected() {
        let a = Value::vector_i64(&[1, 2, 3]).unwrap();
        let b = Value::vector_i64(&[1, 2]).unwrap();
        binary(ADD, &[a, b]).expect_err("broadcast should fail");
    }

    #[test]
    fn greater_returns_bools_elementwise() {
        let a = Value::vector_i64(&[1, 5, 3]).unwrap();
        let b = Value::vector_i64(&[2, 2, 3]).unwrap();
        let out = compare(GREATER, &[a, b]).unwrap();
        let tensor = out.as_tensor().unwrap();
        assert_eq!(tensor.dtype, DType::Bool);
        let flags: Vec<bool> = tensor
            .elements
            .iter()
            .map(|lit| matches!(lit, jaxel_core::Literal::Bool(true)))
            .collect();
        assert_eq!(flags, vec![false, true, false]);
    }

    #[test]
    fn neg_preserves_integer_dtype() {
        let out = unary(NEG, &[Value::scalar_i64(7)]).unwrap();
        assert_eq!(out, Value::scalar_i64(-7));
    }

    #[test]
    fn sin_promotes_integers_to_float() {
        let out = unary(SIN, &[Value::scalar_i64(0)]).unwrap();
        assert_eq!(out.as_f64_scalar(), Some(0.0));
    }
}
