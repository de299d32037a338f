//! Reverse-mode: `vjp` composes linearisation with transposition.

use jaxel_core::CoreError;
use jaxel_trace::Tracer;
use jaxel_tree::{Tree, TreeDef, flatten, unflatten};

use crate::jvp::{FlattenedFn, TreeFn, flatten_args};
use crate::linearize::{LinearMap, linearize_flat};

/// The backward half of a `vjp`: maps output cotangents to input cotangents.
pub struct VjpFn {
    linear: LinearMap,
    out_def: TreeDef,
    arg_defs: Vec<TreeDef>,
}

impl VjpFn {
    /// Pull a cotangent tree (matching the primal output structure) back to
    /// cotangents for the arguments.
    pub fn call(&self, cotangents: &Tree<Tracer>) -> Result<Vec<Tree<Tracer>>, CoreError> {
        let (ct_leaves, ct_def) = flatten(cotangents)?;
        if ct_def != self.out_def {
            return Err(CoreError::pytree(
                "cotangent structure does not match the function output",
            ));
        }
        let in_cts = self.linear.backward(&ct_leaves)?;
        crate::jvp::unflatten_args(&self.arg_defs, in_cts)
    }
}

/// `vjp(f, primals)`: run linearisation, return the primal output and the
/// backward function.
pub fn vjp(f: TreeFn<'_>, primals: &[Tree<Tracer>]) -> Result<(Tree<Tracer>, VjpFn), CoreError> {
    let (primal_leaves, arg_defs) = flatten_args(primals)?;
    let adapted = FlattenedFn::new(f, arg_defs.clone());
    let flat = |leaves: &[Tracer]| adapted.call(leaves);
    let (primal_outs, linear) = linearize_flat(&flat, &primal_leaves)?;
    let out_def = adapted.out_def()?;
    let primal_out = unflatten(&out_def, primal_outs)?;
    Ok((
        primal_out,
        VjpFn {
            linear,
            out_def,
            arg_defs,
        },
    ))
}

/// A function returning a differentiated main output and an auxiliary pytree
/// that is traced but not differentiated.
pub type TreeFnAux<'a> =
    &'a dyn Fn(&[Tree<Tracer>]) -> Result<(Tree<Tracer>, Tree<Tracer>), CoreError>;

/// `vjp` for functions with auxiliary output: the auxiliary pytree rides
/// along with zero cotangent and its primal value is returned alongside.
pub fn vjp_with_aux(
    f: TreeFnAux<'_>,
    primals: &[Tree<Tracer>],
) -> Result<(Tree<Tracer>, Tree<Tracer>, VjpFn), CoreError> {
    let paired = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let (main, aux) = f(args)?;
        Ok(Tree::pair(main, aux))
    };
    let (combined, backward) = vjp(&paired, primals)?;
    let Tree::Seq(mut children) = combined else {
        return Err(CoreError::pytree("expected a (main, aux) pair"));
    };
    if children.len() != 2 {
        return Err(CoreError::pytree("expected a (main, aux) pair"));
    }
    let aux = children.pop().unwrap_or(Tree::Seq(vec![]));
    let main = children.pop().unwrap_or(Tree::Seq(vec![]));
    Ok((main, aux, backward))
}

impl VjpFn {
    /// Backward entry point for `vjp_with_aux`: seeds the main output with
    /// `cotangents` and the auxiliary output with zeros.
    pub fn call_with_zero_aux(
        &self,
        cotangents: &Tree<Tracer>,
        aux_primal: &Tree<Tracer>,
    ) -> Result<Vec<Tree<Tracer>>, CoreError> {
        let zero_aux = jaxel_tree::map(
            |leaf: &Tracer| leaf.zeros_like(),
            aux_primal,
        )?;
        self.call(&Tree::pair(cotangents.clone(), zero_aux))
    }
}

#[cfg(test)]
mod tests {
    use super::{vjp, vjp_with_aux};
    use jaxel_core::{CoreError, Value};
    use jaxel_lax::ops;
    use jaxel_trace::Tracer;
    use jaxel_tree::Tree;

    fn leaf(value: f64) -> Tree<Tracer> {
        Tree::Leaf(Tracer::scalar_f64(value))
    }

    #[test]
    fn vjp_of_product_swaps_operands() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            let (Some(x), Some(y)) = (args[0].as_leaf(), args[1].as_leaf()) else {
                return Err(CoreError::pytree("expected leaves"));
            };
            Ok(Tree::Leaf(ops::mul(x, y)?))
        };

        let (out, backward) = vjp(&f, &[leaf(3.0), leaf(4.0)]).unwrap();
        assert_eq!(
            out.as_leaf().unwrap().to_value().unwrap().as_f64_scalar(),
            Some(12.0)
        );

        let cts = backward.call(&leaf(1.0)).unwrap();
        assert_eq!(
            cts[0].as_leaf().unwrap().to_value().unwrap().as_f64_scalar(),
            Some(4.0)
        );
        assert_eq!(
            cts[1].as_leaf().unwrap().to_value().unwrap().as_f64_scalar(),
            Some(3.0)
        );
    }

    #[test]
    fn vjp_with_aux_returns_untouched_aux() {
        // f(x) = (sum(x), 2x): primal 6, aux [2,4,6], backward(1) = ones.
        let f = |args: &[Tree<Tracer>]| -> Result<(Tree<Tracer>, Tree<Tracer>), CoreError> {
            let Some(x) = args[0].as_leaf() else {
                return Err(CoreError::pytree("expected a leaf"));
            };
            let main = ops::reduce_sum(x, None)?;
            let aux = ops::mul(&Tracer::scalar_f64(2.0), x)?;
            Ok((Tree::Leaf(main), Tree::Leaf(aux)))
        };

        let x = Tree::Leaf(Tracer::concrete(
            Value::vector_f64(&[1.0, 2.0, 3.0]).unwrap(),
        ));
        let (main, aux, backward) = vjp_with_aux(&f, &[x]).unwrap();
        assert_eq!(
            main.as_leaf().unwrap().to_value().unwrap().as_f64_scalar(),
            Some(6.0)
        );
        assert_eq!(
            aux.as_leaf().unwrap().to_value().unwrap().to_f64_vec().unwrap(),
            vec![2.0, 4.0, 6.0]
        );

        let cts = backward
            .call_with_zero_aux(&Tree::Leaf(Tracer::scalar_f64(1.0)), &aux)
            .unwrap();
        assert_eq!(
            cts[0].as_leaf().unwrap().to_value().unwrap().to_f64_vec().unwrap(),
            vec![1.0, 1.0, 1.0]
        );
    }
}
