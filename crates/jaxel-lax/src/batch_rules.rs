//! Batching rules.
//!
//! A rule receives unwrapped values with their batch axes and produces
//! outputs with output batch axes. Elementwise rules align every batched
//! operand at axis 0 and materialise unbatched operands across the batch;
//! reductions and structural primitives shift their axis parameters past the
//! batch axis; contractions move the batch to the leading stacked position.

use jaxel_core::{CoreError, Jaxpr, Params, Primitive, Shape};
use jaxel_trace::{Tracer, bind};

use crate::abstract_rules::{broadcast_params, reduce_axes, transpose_permutation};
use crate::ops;

type BatchOut = Result<(Vec<Tracer>, Vec<Option<usize>>), CoreError>;

fn example_shape(value: &Tracer, bdim: Option<usize>) -> Result<Shape, CoreError> {
    let mut shape = value.aval()?.shape;
    if let Some(axis) = bdim {
        if axis >= shape.rank() {
            return Err(CoreError::shape("vmap", "batch axis out of bounds"));
        }
        shape.dims.remove(axis);
    }
    Ok(shape)
}

/// Align one operand to the common batched shape `[axis_size] ++ target`.
fn align_to_batched(
    value: &Tracer,
    bdim: Option<usize>,
    target: &Shape,
    axis_size: usize,
) -> Result<Tracer, CoreError> {
    let example = example_shape(value, bdim)?;
    let front = match bdim {
        Some(axis) if axis != 0 => ops::moveaxis(value, axis, 0)?,
        _ => value.clone(),
    };

    let mut full_dims = Vec::with_capacity(target.rank() + 1);
    full_dims.push(axis_size as u32);
    full_dims.extend_from_slice(&target.dims);

    let offset = 1 + target.rank() - example.rank();
    let mut mapping: Vec<usize> = Vec::with_capacity(example.rank() + 1);
    if bdim.is_some() {
        mapping.push(0);
    }
    mapping.extend((0..example.rank()).map(|axis| offset + axis));

    ops::broadcast_in_dim(&front, &full_dims, &mapping)
}

pub(crate) fn binary_elementwise(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    if dims.iter().all(Option::is_none) {
        let outputs = bind(primitive, values, params, &[])?;
        let out_dims = vec![None; outputs.len()];
        return Ok((outputs, out_dims));
    }

    let lhs_example = example_shape(&values[0], dims[0])?;
    let rhs_example = example_shape(&values[1], dims[1])?;
    let target = lhs_example.broadcast_with(&rhs_example).ok_or_else(|| {
        CoreError::shape(
            primitive.name(),
            format!("cannot broadcast {lhs_example} with {rhs_example}"),
        )
    })?;

    let lhs = align_to_batched(&values[0], dims[0], &target, axis_size)?;
    let rhs = align_to_batched(&values[1], dims[1], &target, axis_size)?;
    let outputs = bind(primitive, &[lhs, rhs], params, &[])?;
    let out_dims = vec![Some(0); outputs.len()];
    Ok((outputs, out_dims))
}

pub(crate) fn unary_elementwise(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    _axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    let outputs = bind(primitive, values, params, &[])?;
    let out_dims = vec![dims[0]; outputs.len()];
    Ok((outputs, out_dims))
}

pub(crate) fn reduce_sum(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    _axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    let Some(axis) = dims[0] else {
        let outputs = bind(primitive, values, params, &[])?;
        return Ok((outputs, vec![None]));
    };

    let front = ops::moveaxis(&values[0], axis, 0)?;
    let example_rank = front.aval()?.shape.rank() - 1;
    let axes = reduce_axes("reduce_sum", params, example_rank)?;
    let shifted: Vec<usize> = axes.iter().map(|axis| axis + 1).collect();
    let out = ops::reduce_sum(&front, Some(&shifted))?;
    Ok((vec![out], vec![Some(0)]))
}

pub(crate) fn broadcast_in_dim(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    let Some(axis) = dims[0] else {
        let outputs = bind(primitive, values, params, &[])?;
        return Ok((outputs, vec![None]));
    };

    let front = ops::moveaxis(&values[0], axis, 0)?;
    let example_rank = front.aval()?.shape.rank() - 1;
    let (out_shape, mapping) = broadcast_params(params, example_rank)?;

    let mut batched_dims = Vec::with_capacity(out_shape.rank() + 1);
    batched_dims.push(axis_size as u32);
    batched_dims.extend_from_slice(&out_shape.dims);
    let mut batched_mapping = Vec::with_capacity(mapping.len() + 1);
    batched_mapping.push(0);
    batched_mapping.extend(mapping.iter().map(|out_axis| out_axis + 1));

    let out = ops::broadcast_in_dim(&front, &batched_dims, &batched_mapping)?;
    Ok((vec![out], vec![Some(0)]))
}

pub(crate) fn transpose(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    _axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    let Some(axis) = dims[0] else {
        let outputs = bind(primitive, values, params, &[])?;
        return Ok((outputs, vec![None]));
    };

    let front = ops::moveaxis(&values[0], axis, 0)?;
    let example_rank = front.aval()?.shape.rank() - 1;
    let permutation = transpose_permutation(params, example_rank)?;
    let mut batched_permutation = Vec::with_capacity(permutation.len() + 1);
    batched_permutation.push(0);
    batched_permutation.extend(permutation.iter().map(|axis| axis + 1));

    let out = ops::transpose(&front, Some(&batched_permutation))?;
    Ok((vec![out], vec![Some(0)]))
}

/// Batched inner product decomposes into an elementwise product and a
/// trailing-axis sum.
pub(crate) fn dot(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    if dims.iter().all(Option::is_none) {
        let outputs = bind(primitive, values, params, &[])?;
        return Ok((outputs, vec![None]));
    }

    let lhs_example = example_shape(&values[0], dims[0])?;
    let rhs_example = example_shape(&values[1], dims[1])?;
    if lhs_example != rhs_example {
        return Err(CoreError::shape(
            "dot",
            format!("operand lengths differ: {lhs_example} vs {rhs_example}"),
        ));
    }

    let lhs = align_to_batched(&values[0], dims[0], &lhs_example, axis_size)?;
    let rhs = align_to_batched(&values[1], dims[1], &lhs_example, axis_size)?;
    let product = ops::mul(&lhs, &rhs)?;
    let out = ops::reduce_sum(&product, Some(&[1]))?;
    Ok((vec![out], vec![Some(0)]))
}

/// Batched matmul moves the batch axis to the leading stacked position; the
/// kernel broadcasts stacked dimensions.
pub(crate) fn matmul(
    primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    _axis_size: usize,
    params: &Params,
    _subs: &[Jaxpr],
) -> BatchOut {
    let lhs = match dims[0] {
        Some(axis) => ops::moveaxis(&values[0], axis, 0)?,
        None => values[0].clone(),
    };
    let rhs = match dims[1] {
        Some(axis) => ops::moveaxis(&values[1], axis, 0)?,
        None => values[1].clone(),
    };
    let outputs = bind(primitive, &[lhs, rhs], params, &[])?;
    let out_dim = if dims.iter().any(Option::is_some) {
        Some(0)
    } else {
        None
    };
    let out_dims = vec![out_dim; outputs.len()];
    Ok((outputs, out_dims))
}
