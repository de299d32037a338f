//! Contraction kernels: dot and matmul.

use jaxel_core::{Literal, Shape, TensorValue, Value};
use jaxel_runtime::BackendError;

use crate::elementwise::{
    ADD, MUL, apply_binary_literal, arity, broadcast_strides, compute_strides, execution,
    execution_str, flat_to_multi,
};

/// Rank-1 inner product.
pub(crate) fn dot(inputs: &[Value]) -> Result<Value, BackendError> {
    let [lhs, rhs] = inputs else {
        return Err(arity("dot", 2, inputs.len()));
    };

    let (Some(a), Some(b)) = (lhs.as_tensor(), rhs.as_tensor()) else {
        return Err(execution_str("dot", "expected two rank-1 tensors"));
    };
    if a.rank() != 1 || b.rank() != 1 {
        return Err(execution_str("dot", "expected two rank-1 tensors"));
    }
    if a.shape != b.shape {
        return Err(execution_str("dot", "operand lengths differ"));
    }

    let mut acc = Literal::zero(accumulate_dtype(a, b));
    for (left, right) in a.elements.iter().zip(b.elements.iter()) {
        let product = apply_binary_literal(MUL, *left, *right)?;
        acc = apply_binary_literal(ADD, acc, product)?;
    }
    Ok(Value::Scalar(acc))
}

/// Batched matrix product with numpy-style broadcasting of the leading
/// (stacked) dimensions. Both operands must have rank >= 2.
pub(crate) fn matmul(inputs: &[Value]) -> Result<Value, BackendError> {
    let [lhs, rhs] = inputs else {
        return Err(arity("matmul", 2, inputs.len()));
    };

    let (Some(a), Some(b)) = (lhs.as_tensor(), rhs.as_tensor()) else {
        return Err(execution_str("matmul", "expected tensors of rank >= 2"));
    };
    if a.rank() < 2 || b.rank() < 2 {
        return Err(execution_str("matmul", "expected tensors of rank >= 2"));
    }

    let (a_batch, a_mat) = a.shape.dims.split_at(a.rank() - 2);
    let (b_batch, b_mat) = b.shape.dims.split_at(b.rank() - 2);
    let (n, k) = (a_mat[0] as usize, a_mat[1] as usize);
    let (k2, m) = (b_mat[0] as usize, b_mat[1] as usize);
    if k != k2 {
        return Err(execution_str("matmul", "contracted extents differ"));
    }

    let a_batch_shape = Shape {
        dims: a_batch.to_vec(),
    };
    let b_batch_shape = Shape {
        dims: b_batch.to_vec(),
    };
    let batch_shape = a_batch_shape
        .broadcast_with(&b_batch_shape)
        .ok_or_else(|| execution_str("matmul", "stacked dimensions do not broadcast"))?;
    let batch_count = batch_shape
        .element_count()
        .ok_or_else(|| execution_str("matmul", "batch element count overflow"))?
        as usize;

    let batch_strides = compute_strides(&batch_shape.dims);
    // Per-batch-cell strides: zero on broadcast axes.
    let a_cell_strides = broadcast_strides(&a_batch_shape, &batch_shape);
    let b_cell_strides = broadcast_strides(&b_batch_shape, &batch_shape);

    let out_dtype = a.dtype.promote(b.dtype);
    let zero = Literal::zero(accumulate_dtype(a, b));
    let mut elements = Vec::with_capacity(batch_count * n * m);

    for batch_flat in 0..batch_count {
        let multi = flat_to_multi(batch_flat, &batch_strides);
        let a_cell: usize = multi
            .iter()
            .zip(a_cell_strides.iter())
            .map(|(&index, &stride)| index * stride)
            .sum();
        let b_cell: usize = multi
            .iter()
            .zip(b_cell_strides.iter())
            .map(|(&index, &stride)| index * stride)
            .sum();
        let a_base = a_cell * n * k;
        let b_base = b_cell * k * m;

        for i in 0..n {
            for j in 0..m {
                let mut acc = zero;
                for l in 0..k {
                    let left = a.elements[a_base + i * k + l];
                    let right = b.elements[b_base + l * m + j];
                    let product = apply_binary_literal(MUL, left, right)?;
                    acc = apply_binary_literal(ADD, acc, product)?;
                }
                elements.push(acc);
            }
        }
    }

    let mut out_dims = batch_shape.dims;
    out_dims.push(n as u32);
    out_dims.push(m as u32);
    TensorValue::new(out_dtype, Shape { dims: out_dims }, elements)
        .map(Value::Tensor)
        .map_err(|err| execution("matmul", err))
}

fn accumulate_dtype(a: &TensorValue, b: &TensorValue) -> jaxel_core::DType {
    use jaxel_core::DType;
    let promoted = a.dtype.promote(b.dtype);
    if promoted.is_complex() {
        DType::Complex64
    } else if promoted.is_float() {
        DType::F64
    } else {
        DType::I64
    }
}
