//! Forward-mode rules.
//!
//! Each rule maps (primals, tangents) to (output primals, output tangents),
//! applying primitives through the op wrappers so it composes with whatever
//! traces remain below the jvp trace. Comparisons carry zero tangents.

use jaxel_core::{CoreError, Jaxpr, Params, Primitive};
use jaxel_trace::{Tracer, bind};

use crate::ops;

type JvpOut = Result<(Vec<Tracer>, Vec<Tracer>), CoreError>;

fn pair(primal: Tracer, tangent: Tracer) -> JvpOut {
    Ok((vec![primal], vec![tangent]))
}

pub(crate) fn add(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::add(&primals[0], &primals[1])?;
    let tangent = ops::add(&tangents[0], &tangents[1])?;
    pair(primal, tangent)
}

pub(crate) fn sub(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::sub(&primals[0], &primals[1])?;
    let tangent = ops::sub(&tangents[0], &tangents[1])?;
    pair(primal, tangent)
}

pub(crate) fn mul(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::mul(&primals[0], &primals[1])?;
    let tangent = ops::add(
        &ops::mul(&tangents[0], &primals[1])?,
        &ops::mul(&primals[0], &tangents[1])?,
    )?;
    pair(primal, tangent)
}

pub(crate) fn div(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    // d(x/y) = dx/y - x*dy/y^2
    let primal = ops::div(&primals[0], &primals[1])?;
    let tangent = ops::sub(
        &ops::div(&tangents[0], &primals[1])?,
        &ops::div(
            &ops::mul(&primals[0], &tangents[1])?,
            &ops::mul(&primals[1], &primals[1])?,
        )?,
    )?;
    pair(primal, tangent)
}

pub(crate) fn neg(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    pair(ops::neg(&primals[0])?, ops::neg(&tangents[0])?)
}

pub(crate) fn exp(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::exp(&primals[0])?;
    let tangent = ops::mul(&tangents[0], &primal)?;
    pair(primal, tangent)
}

pub(crate) fn log(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::log(&primals[0])?;
    let tangent = ops::div(&tangents[0], &primals[0])?;
    pair(primal, tangent)
}

pub(crate) fn sqrt(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::sqrt(&primals[0])?;
    let tangent = ops::div(&tangents[0], &ops::mul(&Tracer::scalar_f64(2.0), &primal)?)?;
    pair(primal, tangent)
}

pub(crate) fn sin(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::sin(&primals[0])?;
    let tangent = ops::mul(&tangents[0], &ops::cos(&primals[0])?)?;
    pair(primal, tangent)
}

pub(crate) fn cos(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::cos(&primals[0])?;
    let tangent = ops::neg(&ops::mul(&tangents[0], &ops::sin(&primals[0])?)?)?;
    pair(primal, tangent)
}

/// Non-differentiable primitives (comparisons): primal as usual, tangent
/// identically zero. The zero tangent is propagated for sparsity-aware
/// downstream passes.
pub(crate) fn zero_tangent_binary(
    primitive: Primitive,
    primals: &[Tracer],
    _tangents: &[Tracer],
    params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let mut outputs = bind(primitive, primals, params, &[])?;
    if outputs.len() != 1 {
        return Err(CoreError::shape(primitive.name(), "expected one output"));
    }
    let primal = outputs.remove(0);
    let tangent = primal.zeros_like()?;
    pair(primal, tangent)
}

pub(crate) fn dot(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::dot(&primals[0], &primals[1])?;
    let tangent = ops::add(
        &ops::dot(&tangents[0], &primals[1])?,
        &ops::dot(&primals[0], &tangents[1])?,
    )?;
    pair(primal, tangent)
}

pub(crate) fn matmul(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = ops::matmul(&primals[0], &primals[1])?;
    let tangent = ops::add(
        &ops::matmul(&tangents[0], &primals[1])?,
        &ops::matmul(&primals[0], &tangents[1])?,
    )?;
    pair(primal, tangent)
}

/// Structural linear primitives (reduce_sum, broadcast_in_dim, transpose):
/// the tangent follows the primal through the same parameterised primitive.
pub(crate) fn structural_unary(
    primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    params: &Params,
    _subs: &[Jaxpr],
) -> JvpOut {
    let primal = bind(primitive, &primals[0..1], params, &[])?;
    let tangent = bind(primitive, &tangents[0..1], params, &[])?;
    Ok((primal, tangent))
}
