//! The `jit` call primitive.
//!
//! A `jit` equation carries its traced body as a sub-jaxpr; hoisted
//! constants arrive as the leading inputs (`num_consts`). The jvp and batch
//! rules replay the body through `bind`, inlining it into the enclosing
//! transformation, so `jit` composes with `grad`, `vmap`, and nested `jit`.

use std::sync::OnceLock;

use jaxel_core::{CoreError, Jaxpr, Params, Primitive, ShapedArray};
use jaxel_trace::{PrimitiveDef, Tracer, eval_jaxpr_traced, register_primitive};

pub fn jit_primitive() -> Primitive {
    static PRIMITIVE: OnceLock<Primitive> = OnceLock::new();
    *PRIMITIVE.get_or_init(|| {
        register_primitive(PrimitiveDef {
            name: "jit",
            abstract_eval: jit_abstract_eval,
            jvp: Some(jit_jvp),
            transpose: None,
            batch: Some(jit_batch),
            linear_inputs: &[],
        })
    })
}

fn body(sub_jaxprs: &[Jaxpr]) -> Result<&Jaxpr, CoreError> {
    sub_jaxprs
        .first()
        .ok_or_else(|| CoreError::shape("jit", "call equation without a body"))
}

fn jit_abstract_eval(
    in_avals: &[ShapedArray],
    _params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<Vec<ShapedArray>, CoreError> {
    let body = body(sub_jaxprs)?;
    let expected = body.in_avals();
    if in_avals.len() != expected.len() {
        return Err(CoreError::shape(
            "jit",
            format!(
                "call arity mismatch: body expects {}, got {}",
                expected.len(),
                in_avals.len()
            ),
        ));
    }
    for (given, wanted) in in_avals.iter().zip(expected.iter()) {
        if given != wanted {
            return Err(CoreError::shape(
                "jit",
                format!("call input {given} does not match body input {wanted}"),
            ));
        }
    }
    Ok(body.out_avals())
}

fn jit_jvp(
    _primitive: Primitive,
    primals: &[Tracer],
    tangents: &[Tracer],
    _params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<(Vec<Tracer>, Vec<Tracer>), CoreError> {
    let body = body(sub_jaxprs)?.clone();
    let replay = move |args: &[Tracer]| eval_jaxpr_traced(&body, &[], args);
    jaxel_ad::jvp_flat(&replay, primals, tangents)
}

fn jit_batch(
    _primitive: Primitive,
    values: &[Tracer],
    dims: &[Option<usize>],
    _axis_size: usize,
    _params: &Params,
    sub_jaxprs: &[Jaxpr],
) -> Result<(Vec<Tracer>, Vec<Option<usize>>), CoreError> {
    let body = body(sub_jaxprs)?.clone();
    let replay = move |args: &[Tracer]| eval_jaxpr_traced(&body, &[], args);
    if dims.iter().all(Option::is_none) {
        let outs = replay(values)?;
        let out_dims = vec![None; outs.len()];
        return Ok((outs, out_dims));
    }
    let outs = jaxel_batch::vmap_flat(&replay, dims, 0, values)?;
    let out_dims = vec![Some(0); outs.len()];
    Ok((outs, out_dims))
}
