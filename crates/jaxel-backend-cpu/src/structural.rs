//! Shape-manipulation kernels: broadcast_in_dim and transpose.

use jaxel_core::{Params, Shape, TensorValue, Value, decode_u32_list, decode_usize_list};
use jaxel_runtime::BackendError;

use crate::elementwise::{arity, compute_strides, execution, execution_str, flat_to_multi};

/// Materialise a value into a larger shape. `broadcast_dimensions[i]` names
/// the output axis that input axis `i` maps to; unmapped output axes repeat.
pub(crate) fn broadcast_in_dim(inputs: &[Value], params: &Params) -> Result<Value, BackendError> {
    let [input] = inputs else {
        return Err(arity("broadcast_in_dim", 1, inputs.len()));
    };

    let out_dims = params
        .get("shape")
        .and_then(|raw| decode_u32_list(raw))
        .ok_or_else(|| execution_str("broadcast_in_dim", "missing or malformed shape parameter"))?;
    let out_shape = Shape { dims: out_dims };
    let mapping = match params.get("broadcast_dimensions") {
        Some(raw) => decode_usize_list(raw)
            .ok_or_else(|| execution_str("broadcast_in_dim", "malformed broadcast_dimensions"))?,
        None => Vec::new(),
    };

    let in_shape = input.shape();
    if mapping.len() != in_shape.rank() {
        return Err(execution_str(
            "broadcast_in_dim",
            "broadcast_dimensions length must equal input rank",
        ));
    }
    for (axis, &out_axis) in mapping.iter().enumerate() {
        if out_axis >= out_shape.rank() {
            return Err(execution_str("broadcast_in_dim", "mapped axis out of bounds"));
        }
        let in_dim = in_shape.dims[axis];
        let out_dim = out_shape.dims[out_axis];
        if in_dim != out_dim && in_dim != 1 {
            return Err(execution_str(
                "broadcast_in_dim",
                "input extent must match output extent or be 1",
            ));
        }
    }

    let out_count = out_shape
        .element_count()
        .ok_or_else(|| execution_str("broadcast_in_dim", "output element count overflow"))?
        as usize;
    let elements_in = input.elements();
    let out_strides = compute_strides(&out_shape.dims);
    let in_strides = compute_strides(&in_shape.dims);

    let mut elements = Vec::with_capacity(out_count);
    for flat in 0..out_count {
        let multi = flat_to_multi(flat, &out_strides);
        let mut in_flat = 0_usize;
        for (axis, &out_axis) in mapping.iter().enumerate() {
            let index = if in_shape.dims[axis] == 1 {
                0
            } else {
                multi[out_axis]
            };
            in_flat += index * in_strides[axis];
        }
        elements.push(elements_in[in_flat]);
    }

    if out_shape.is_scalar() {
        return Ok(Value::Scalar(elements[0]));
    }
    TensorValue::new(input.dtype(), out_shape, elements)
        .map(Value::Tensor)
        .map_err(|err| execution("broadcast_in_dim", err))
}

/// Permute axes. `permutation[i]` names the input axis that output axis `i`
/// reads from; absent permutation reverses the axes.
pub(crate) fn transpose(inputs: &[Value], params: &Params) -> Result<Value, BackendError> {
    let [input] = inputs else {
        return Err(arity("transpose", 1, inputs.len()));
    };

    let tensor = match input {
        Value::Scalar(_) => return Ok(input.clone()),
        Value::Tensor(t) => t,
    };
    let rank = tensor.rank();

    let permutation = match params.get("permutation") {
        Some(raw) => decode_usize_list(raw)
            .ok_or_else(|| execution_str("transpose", "malformed permutation"))?,
        None => (0..rank).rev().collect(),
    };
    if permutation.len() != rank {
        return Err(execution_str(
            "transpose",
            "permutation length must equal rank",
        ));
    }
    let mut seen = vec![false; rank];
    for &axis in &permutation {
        if axis >= rank || seen[axis] {
            return Err(execution_str("transpose", "invalid permutation"));
        }
        seen[axis] = true;
    }

    let out_dims: Vec<u32> = permutation.iter().map(|&axis| tensor.shape.dims[axis]).collect();
    let out_shape = Shape { dims: out_dims };
    let out_strides = compute_strides(&out_shape.dims);
    let in_strides = compute_strides(&tensor.shape.dims);

    let mut elements = Vec::with_capacity(tensor.elements.len());
    for flat in 0..tensor.elements.len() {
        let multi = flat_to_multi(flat, &out_strides);
        let in_flat: usize = multi
            .iter()
            .zip(permutation.iter())
            .map(|(&index, &axis)| index * in_strides[axis])
            .sum();
        elements.push(tensor.elements[in_flat]);
    }

    TensorValue::new(tensor.dtype, out_shape, elements)
        .map(Value::Tensor)
        .map_err(|err| execution("transpose", err))
}
