#![forbid(unsafe_code)]

//! Automatic differentiation over traced programs: forward-mode (`jvp`),
//! linearisation, transposition of linear jaxprs, reverse-mode (`vjp`,
//! `grad`), and derived Jacobians.

mod grad;
mod jvp;
mod linearize;
mod transpose;
mod vjp;

pub use grad::{
    Argnums, GradOutput, TransformOptions, ValueAndGradOutput, grad, jacfwd, jacrev,
    value_and_grad,
};
pub use jvp::{TreeFn, jvp, jvp_flat};
pub use linearize::{LinearMap, linearize_flat};
pub use vjp::{TreeFnAux, VjpFn, vjp, vjp_with_aux};

use jaxel_core::CoreError;
use jaxel_trace::Tracer;
use jaxel_tree::{Tree, unflatten};

/// Pytree-level linearize: primal output plus a callable linear map over
/// tangent trees.
pub fn linearize(
    f: TreeFn<'_>,
    primals: &[Tree<Tracer>],
) -> Result<(Tree<Tracer>, LinearizedFn), CoreError> {
    let (primal_leaves, arg_defs) = jvp::flatten_args(primals)?;
    let adapted = jvp::FlattenedFn::new(f, arg_defs.clone());
    let flat = |leaves: &[Tracer]| adapted.call(leaves);
    let (primal_outs, linear) = linearize_flat(&flat, &primal_leaves)?;
    let out_def = adapted.out_def()?;
    let primal_out = unflatten(&out_def, primal_outs)?;
    Ok((
        primal_out,
        LinearizedFn {
            linear,
            arg_defs,
            out_def,
        },
    ))
}

/// The linear function returned by `linearize`, applied to tangent trees.
pub struct LinearizedFn {
    linear: LinearMap,
    arg_defs: Vec<jaxel_tree::TreeDef>,
    out_def: jaxel_tree::TreeDef,
}

impl LinearizedFn {
    pub fn call(&self, tangents: &[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError> {
        let (tangent_leaves, tangent_defs) = jvp::flatten_args(tangents)?;
        if tangent_defs != self.arg_defs {
            return Err(CoreError::pytree(
                "tangent structure does not match the linearisation point",
            ));
        }
        let outs = self.linear.forward(&tangent_leaves)?;
        unflatten(&self.out_def, outs)
    }
}
