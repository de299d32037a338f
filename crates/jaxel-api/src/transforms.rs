//! Transformation entry points: `make_jaxpr`, `jit`, `jvp`, `linearize`,
//! `vjp`, `grad`, `vmap`, and friends.

use std::cell::RefCell;

use jaxel_core::{ClosedJaxpr, CoreError, ShapedArray};
use jaxel_trace::{Tracer, stage_function};
use jaxel_tree::{Tree, TreeDef, flatten, unflatten};

pub use jaxel_ad::{
    Argnums, GradOutput, LinearizedFn, TransformOptions, TreeFn, TreeFnAux, ValueAndGradOutput,
    VjpFn, grad, jacfwd, jacrev, jvp, linearize, value_and_grad, vjp, vjp_with_aux,
};
pub use jaxel_batch::{AxesSpec, VmapOptions, vmap};
pub use jaxel_jit::{DispatchStats, Jit, jit};

/// Trace a function at the given example arguments into a closed jaxpr.
///
/// Example inputs only contribute their abstract values; the produced jaxpr
/// is deterministic for a given input signature.
pub fn make_jaxpr(f: TreeFn<'_>, args: &[Tree<Tracer>]) -> Result<ClosedJaxpr, CoreError> {
    let mut leaves: Vec<Tracer> = Vec::new();
    let mut arg_defs: Vec<TreeDef> = Vec::with_capacity(args.len());
    for arg in args {
        let (arg_leaves, def) = flatten(arg)?;
        leaves.extend(arg_leaves);
        arg_defs.push(def);
    }
    let in_avals: Vec<ShapedArray> = leaves
        .iter()
        .map(Tracer::aval)
        .collect::<Result<Vec<_>, _>>()?;

    let out_def: RefCell<Option<TreeDef>> = RefCell::new(None);
    let flat = |flat_args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
        let mut rebuilt = Vec::with_capacity(arg_defs.len());
        let mut remaining = flat_args.to_vec();
        for def in &arg_defs {
            let count = def.leaf_count();
            if count > remaining.len() {
                return Err(CoreError::pytree(
                    "leaf list shorter than argument structure",
                ));
            }
            let rest = remaining.split_off(count);
            rebuilt.push(unflatten(def, remaining)?);
            remaining = rest;
        }
        let out = f(&rebuilt)?;
        let (out_leaves, def) = flatten(&out)?;
        *out_def.borrow_mut() = Some(def);
        Ok(out_leaves)
    };

    let (jaxpr, const_tracers) = stage_function(&flat, &in_avals)?;
    let consts = const_tracers
        .iter()
        .map(Tracer::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ClosedJaxpr::new(jaxpr, consts))
}

#[cfg(test)]
mod tests {
    use super::make_jaxpr;
    use jaxel_core::{CoreError, pretty};
    use jaxel_lax::ops;
    use jaxel_trace::Tracer;
    use jaxel_tree::Tree;

    #[test]
    fn make_jaxpr_on_a_constant_program_folds_completely() {
        let f = |_args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            Ok(Tree::Leaf(ops::mul(
                &Tracer::scalar_i64(2),
                &Tracer::scalar_i64(2),
            )?))
        };
        let closed = make_jaxpr(&f, &[]).unwrap();
        assert!(closed.consts.is_empty());
        assert_eq!(pretty(&closed.jaxpr), "{ lambda . ( 4 ) }");
    }

    #[test]
    fn make_jaxpr_is_deterministic() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            let Some(x) = args[0].as_leaf() else {
                return Err(CoreError::pytree("expected a leaf"));
            };
            Ok(Tree::Leaf(ops::mul(&ops::add(x, &Tracer::scalar_i64(2))?, x)?))
        };
        let example = [Tree::Leaf(Tracer::scalar_f64(1.0))];
        let first = make_jaxpr(&f, &example).unwrap();
        let second = make_jaxpr(&f, &example).unwrap();
        assert_eq!(pretty(&first.jaxpr), pretty(&second.jaxpr));
        assert_eq!(first.jaxpr, second.jaxpr);
    }
}
