//! Transposition rules for the primitives that are linear in some inputs.
//!
//! A rule receives the output cotangents and the equation inputs (linear
//! inputs as types, non-linear ones as forward values) and returns one
//! cotangent contribution per linear input. Broadcasting introduced on the
//! forward pass is inverted by summing (`unbroadcast`).

use jaxel_core::{CoreError, Jaxpr, Params, Primitive, ShapedArray};
use jaxel_trace::{Tracer, TransposeInput};

use crate::abstract_rules::{broadcast_params, reduce_axes, transpose_permutation};
use crate::ops;

type TransposeOut = Result<Vec<Option<Tracer>>, CoreError>;

fn known_value<'a>(
    primitive: Primitive,
    input: &'a TransposeInput,
) -> Result<&'a Tracer, CoreError> {
    match input {
        TransposeInput::Known(tracer) => Ok(tracer),
        TransposeInput::Linear(_) => Err(CoreError::MissingRule {
            primitive: primitive.name().to_owned(),
            transform: "transpose",
        }),
    }
}

fn linear_target(input: &TransposeInput) -> Option<&ShapedArray> {
    match input {
        TransposeInput::Linear(aval) => Some(aval),
        TransposeInput::Known(_) => None,
    }
}

pub(crate) fn add(
    _primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let ct = &cts[0];
    inputs
        .iter()
        .map(|input| {
            linear_target(input)
                .map(|aval| ops::unbroadcast(ct, aval))
                .transpose()
        })
        .collect()
}

pub(crate) fn sub(
    _primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let ct = &cts[0];
    let lhs = linear_target(&inputs[0])
        .map(|aval| ops::unbroadcast(ct, aval))
        .transpose()?;
    let rhs = linear_target(&inputs[1])
        .map(|aval| ops::unbroadcast(&ops::neg(ct)?, aval))
        .transpose()?;
    Ok(vec![lhs, rhs])
}

pub(crate) fn neg(
    _primitive: Primitive,
    cts: &[Tracer],
    _inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    Ok(vec![Some(ops::neg(&cts[0])?)])
}

pub(crate) fn mul(
    primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let ct = &cts[0];
    match (&inputs[0], &inputs[1]) {
        (TransposeInput::Linear(aval), TransposeInput::Known(other)) => Ok(vec![
            Some(ops::unbroadcast(&ops::mul(ct, other)?, aval)?),
            None,
        ]),
        (TransposeInput::Known(other), TransposeInput::Linear(aval)) => Ok(vec![
            None,
            Some(ops::unbroadcast(&ops::mul(other, ct)?, aval)?),
        ]),
        // A product of two linear values is not linear; no transpose exists.
        _ => Err(CoreError::MissingRule {
            primitive: primitive.name().to_owned(),
            transform: "transpose",
        }),
    }
}

pub(crate) fn div(
    primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    // Linear in the numerator only.
    let Some(aval) = linear_target(&inputs[0]) else {
        return Err(CoreError::MissingRule {
            primitive: primitive.name().to_owned(),
            transform: "transpose",
        });
    };
    let denominator = known_value(primitive, &inputs[1])?;
    Ok(vec![
        Some(ops::unbroadcast(&ops::div(&cts[0], denominator)?, aval)?),
        None,
    ])
}

pub(crate) fn dot(
    primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let ct = &cts[0];
    match (&inputs[0], &inputs[1]) {
        (TransposeInput::Linear(_), TransposeInput::Known(other)) => {
            Ok(vec![Some(ops::mul(ct, other)?), None])
        }
        (TransposeInput::Known(other), TransposeInput::Linear(_)) => {
            Ok(vec![None, Some(ops::mul(other, ct)?)])
        }
        _ => Err(CoreError::MissingRule {
            primitive: primitive.name().to_owned(),
            transform: "transpose",
        }),
    }
}

pub(crate) fn matmul(
    primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    _params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let ct = &cts[0];
    match (&inputs[0], &inputs[1]) {
        (TransposeInput::Linear(aval), TransposeInput::Known(rhs)) => {
            let contribution = ops::matmul(ct, &ops::transpose_last_two(rhs)?)?;
            Ok(vec![Some(ops::unbroadcast(&contribution, aval)?), None])
        }
        (TransposeInput::Known(lhs), TransposeInput::Linear(aval)) => {
            let contribution = ops::matmul(&ops::transpose_last_two(lhs)?, ct)?;
            Ok(vec![None, Some(ops::unbroadcast(&contribution, aval)?)])
        }
        _ => Err(CoreError::MissingRule {
            primitive: primitive.name().to_owned(),
            transform: "transpose",
        }),
    }
}

pub(crate) fn reduce_sum(
    _primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let Some(aval) = linear_target(&inputs[0]) else {
        return Ok(vec![None]);
    };
    let rank = aval.shape.rank();
    let axes = reduce_axes("reduce_sum", params, rank)?;
    let kept: Vec<usize> = (0..rank).filter(|axis| !axes.contains(axis)).collect();
    Ok(vec![Some(ops::broadcast_in_dim(
        &cts[0],
        &aval.shape.dims,
        &kept,
    )?)])
}

pub(crate) fn broadcast_in_dim(
    _primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let Some(aval) = linear_target(&inputs[0]) else {
        return Ok(vec![None]);
    };
    let in_rank = aval.shape.rank();
    let (out_shape, mapping) = broadcast_params(params, in_rank)?;

    // Sum away the output axes no input axis maps to.
    let introduced: Vec<usize> = (0..out_shape.rank())
        .filter(|axis| !mapping.contains(axis))
        .collect();
    let mut result = ops::reduce_sum(&cts[0], Some(&introduced))?;

    // Axes the forward pass stretched from extent 1 also sum away, then the
    // size-1 extents are restored.
    let stretched: Vec<usize> = (0..in_rank)
        .filter(|&axis| aval.shape.dims[axis] == 1 && out_shape.dims[mapping[axis]] != 1)
        .collect();
    if !stretched.is_empty() {
        result = ops::reduce_sum(&result, Some(&stretched))?;
        let kept: Vec<usize> = (0..in_rank).filter(|axis| !stretched.contains(axis)).collect();
        result = ops::broadcast_in_dim(&result, &aval.shape.dims, &kept)?;
    }
    Ok(vec![Some(result)])
}

pub(crate) fn transpose(
    _primitive: Primitive,
    cts: &[Tracer],
    inputs: &[TransposeInput],
    params: &Params,
    _subs: &[Jaxpr],
) -> TransposeOut {
    let Some(aval) = linear_target(&inputs[0]) else {
        return Ok(vec![None]);
    };
    let permutation = transpose_permutation(params, aval.shape.rank())?;
    let mut inverse = vec![0_usize; permutation.len()];
    for (index, &axis) in permutation.iter().enumerate() {
        inverse[axis] = index;
    }
    Ok(vec![Some(ops::transpose(&cts[0], Some(&inverse))?)])
}
