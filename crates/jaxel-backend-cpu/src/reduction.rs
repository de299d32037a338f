//! Reduction kernels.

use jaxel_core::{DType, Literal, Params, Shape, TensorValue, Value, decode_usize_list};
use jaxel_runtime::BackendError;

use crate::elementwise::{ADD, apply_binary_literal, arity, compute_strides, execution, execution_str, flat_to_multi};

/// Sum over the given axes. `axes` absent means all axes; an empty list is
/// the identity.
pub(crate) fn reduce_sum(inputs: &[Value], params: &Params) -> Result<Value, BackendError> {
    let [input] = inputs else {
        return Err(arity("reduce_sum", 1, inputs.len()));
    };

    let shape = input.shape();
    let axes = match params.get("axes") {
        Some(raw) => decode_usize_list(raw)
            .ok_or_else(|| execution_str("reduce_sum", "malformed axes parameter"))?,
        None => (0..shape.rank()).collect(),
    };

    if axes.iter().any(|axis| *axis >= shape.rank()) {
        return Err(execution_str("reduce_sum", "axis out of bounds"));
    }

    if axes.is_empty() {
        return Ok(input.clone());
    }

    let tensor = match input {
        Value::Scalar(_) => return Ok(input.clone()),
        Value::Tensor(t) => t,
    };

    let mut reduce_mask = vec![false; shape.rank()];
    for axis in &axes {
        reduce_mask[*axis] = true;
    }
    let out_dims: Vec<u32> = shape
        .dims
        .iter()
        .zip(reduce_mask.iter())
        .filter(|(_, reduced)| !**reduced)
        .map(|(dim, _)| *dim)
        .collect();
    let out_shape = Shape { dims: out_dims };

    let out_count = out_shape
        .element_count()
        .ok_or_else(|| execution_str("reduce_sum", "output element count overflow"))?
        as usize;
    let in_strides = compute_strides(&shape.dims);
    let out_strides = compute_strides(&out_shape.dims);

    let zero = Literal::zero(accumulator_dtype(tensor.dtype));
    let mut accumulators = vec![zero; out_count.max(1)];

    for (flat, element) in tensor.elements.iter().enumerate() {
        let multi = flat_to_multi(flat, &in_strides);
        let out_multi: Vec<usize> = multi
            .iter()
            .zip(reduce_mask.iter())
            .filter(|(_, reduced)| !**reduced)
            .map(|(index, _)| *index)
            .collect();
        let out_flat: usize = out_multi
            .iter()
            .zip(out_strides.iter())
            .map(|(&index, &stride)| index * stride)
            .sum();
        accumulators[out_flat] = apply_binary_literal(ADD, accumulators[out_flat], *element)?;
    }

    if out_shape.is_scalar() {
        return Ok(Value::Scalar(accumulators[0]));
    }

    TensorValue::new(tensor.dtype, out_shape, accumulators)
        .map(Value::Tensor)
        .map_err(|err| execution("reduce_sum", err))
}

fn accumulator_dtype(dtype: DType) -> DType {
    if dtype.is_complex() {
        DType::Complex64
    } else if dtype.is_float() {
        DType::F64
    } else {
        DType::I64
    }
}

#[cfg(test)]
mod tests {
    use super::reduce_sum;
    use jaxel_core::{DType, Params, Value};

    fn axes(raw: &str) -> Params {
        let mut params = Params::new();
        params.insert("axes".to_owned(), raw.to_owned());
        params
    }

    #[test]
    fn sum_all_axes_by_default() {
        let input = Value::vector_i64(&[1, 2, 3]).unwrap();
        let out = reduce_sum(&[input], &Params::new()).unwrap();
        assert_eq!(out, Value::scalar_i64(6));
    }

    #[test]
    fn empty_axes_is_identity() {
        let input = Value::vector_i64(&[1, 2, 3]).unwrap();
        let out = reduce_sum(&[input.clone()], &axes("")).unwrap();
        assert_eq!(out, input);
    }

    #[test]
    fn sum_along_leading_axis() {
        let input =
            Value::tensor_f64(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = reduce_sum(&[input], &axes("0")).unwrap();
        assert_eq!(out.to_f64_vec().unwrap(), vec![5.0, 7.0, 9.0]);
    }

    #[test]
    fn sum_along_trailing_axis() {
        let input =
            Value::tensor_f64(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap();
        let out = reduce_sum(&[input], &axes("1")).unwrap();
        assert_eq!(out.to_f64_vec().unwrap(), vec![6.0, 15.0]);
    }

    #[test]
    fn out_of_bounds_axis_is_rejected() {
        let input = Value::vector_i64(&[1, 2, 3]).unwrap();
        reduce_sum(&[input], &axes("1")).expect_err("axis 1 exceeds rank 1");
    }
}
