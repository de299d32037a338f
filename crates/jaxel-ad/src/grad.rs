//! Gradients and Jacobians, derived from `vjp` and `jvp`.

use jaxel_core::{CoreError, DType, Literal, Shape, ShapedArray, TensorValue, Value};
use jaxel_trace::{FlatFn, Tracer};
use jaxel_tree::{Tree, flatten};

use crate::jvp::{TreeFn, jvp_flat};
use crate::linearize::linearize_flat;
use crate::vjp::vjp;

/// Options shared by the gradient entry points.
#[derive(Debug, Clone)]
pub struct TransformOptions {
    /// The function returns a two-element sequence `(main, aux)`; only
    /// `main` is differentiated and `aux` is returned alongside.
    pub has_aux: bool,
    /// Which positional arguments to differentiate with respect to.
    pub argnums: Argnums,
    /// Permit complex-valued outputs, treated as holomorphic.
    pub holomorphic: bool,
}

impl Default for TransformOptions {
    fn default() -> Self {
        Self {
            has_aux: false,
            argnums: Argnums::Single(0),
            holomorphic: false,
        }
    }
}

#[derive(Debug, Clone)]
pub enum Argnums {
    Single(usize),
    Many(Vec<usize>),
}

impl Argnums {
    fn indices(&self, arg_count: usize) -> Result<Vec<usize>, CoreError> {
        let mut indices = match self {
            Self::Single(index) => vec![*index],
            Self::Many(indices) => indices.clone(),
        };
        indices.sort_unstable();
        indices.dedup();
        if indices.is_empty() || indices.iter().any(|index| *index >= arg_count) {
            return Err(CoreError::pytree(format!(
                "argnums out of range for {arg_count} arguments"
            )));
        }
        Ok(indices)
    }

    fn is_single(&self) -> bool {
        matches!(self, Self::Single(_))
    }
}

/// Result of `grad`: the cotangent tree(s) for the selected arguments, plus
/// the auxiliary output when requested.
#[derive(Debug)]
pub struct GradOutput {
    pub grad: Tree<Tracer>,
    pub aux: Option<Tree<Tracer>>,
}

/// Result of `value_and_grad`.
#[derive(Debug)]
pub struct ValueAndGradOutput {
    pub value: Tree<Tracer>,
    pub grad: Tree<Tracer>,
    pub aux: Option<Tree<Tracer>>,
}

/// The gradient of a scalar-valued function.
pub fn grad(
    f: TreeFn<'_>,
    args: &[Tree<Tracer>],
    options: &TransformOptions,
) -> Result<GradOutput, CoreError> {
    let full = value_and_grad(f, args, options)?;
    Ok(GradOutput {
        grad: full.grad,
        aux: full.aux,
    })
}

/// The value of a scalar function together with its gradient.
pub fn value_and_grad(
    f: TreeFn<'_>,
    args: &[Tree<Tracer>],
    options: &TransformOptions,
) -> Result<ValueAndGradOutput, CoreError> {
    let selected = options.argnums.indices(args.len())?;

    // Close over the non-selected arguments; differentiate the rest.
    let restricted = |chosen: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let mut full_args = args.to_vec();
        for (position, index) in selected.iter().enumerate() {
            full_args[*index] = chosen[position].clone();
        }
        f(&full_args)
    };

    let selected_args: Vec<Tree<Tracer>> =
        selected.iter().map(|index| args[*index].clone()).collect();
    let (out, backward) = vjp(&restricted, &selected_args)?;

    let (value, aux, cotangent_tree) = if options.has_aux {
        let Tree::Seq(children) = &out else {
            return Err(CoreError::pytree(
                "has_aux expects the function to return a (main, aux) pair",
            ));
        };
        if children.len() != 2 {
            return Err(CoreError::pytree(
                "has_aux expects the function to return a (main, aux) pair",
            ));
        }
        let main = children[0].clone();
        let aux = children[1].clone();
        let seed = scalar_seed(&main, options)?;
        let zero_aux = jaxel_tree::map(|leaf: &Tracer| leaf.zeros_like(), &aux)?;
        (main, Some(aux), Tree::pair(seed, zero_aux))
    } else {
        let seed = scalar_seed(&out, options)?;
        (out, None, seed)
    };

    let cotangents = backward.call(&cotangent_tree)?;
    let grad = if options.argnums.is_single() {
        cotangents.into_iter().next().unwrap_or(Tree::Seq(vec![]))
    } else {
        Tree::Seq(cotangents)
    };

    Ok(ValueAndGradOutput { value, grad, aux })
}

/// Check the distinguished output is a differentiable scalar and build the
/// unit cotangent for it.
fn scalar_seed(main: &Tree<Tracer>, options: &TransformOptions) -> Result<Tree<Tracer>, CoreError> {
    let (leaves, _) = flatten(main)?;
    if leaves.len() != 1 {
        return Err(CoreError::pytree(
            "grad requires a function with a single scalar output",
        ));
    }
    let aval = leaves[0].aval()?;
    if !aval.shape.is_scalar() {
        return Err(CoreError::OutputNotScalar { shape: aval.shape });
    }
    if aval.dtype.is_complex() {
        if !options.holomorphic {
            return Err(CoreError::MissingRule {
                primitive: "complex output (holomorphic not set)".to_owned(),
                transform: "grad",
            });
        }
    } else if !aval.dtype.is_float() {
        return Err(CoreError::MissingRule {
            primitive: format!("{} output", aval.dtype),
            transform: "grad",
        });
    }
    Ok(Tree::Leaf(Tracer::concrete(aval.ones_value()?)))
}

/// Forward-mode Jacobian of a single-array function: one jvp per standard
/// basis tangent. Evaluates eagerly.
pub fn jacfwd(f: FlatFn<'_>, x: &Tracer) -> Result<Tracer, CoreError> {
    let in_aval = x.aval()?;
    require_float("jacfwd", &in_aval)?;
    let n = element_count(&in_aval)?;

    let mut columns: Vec<Vec<f64>> = Vec::with_capacity(n);
    let mut out_aval: Option<ShapedArray> = None;
    for index in 0..n {
        let basis = Tracer::concrete(one_hot(&in_aval, index)?);
        let (primal_outs, tangent_outs) = jvp_flat(f, &[x.clone()], &[basis])?;
        if primal_outs.len() != 1 {
            return Err(CoreError::pytree("jacfwd requires a single array output"));
        }
        out_aval = Some(tangent_outs[0].aval()?);
        let column = tangent_outs[0]
            .to_value()?
            .to_f64_vec()
            .ok_or_else(|| CoreError::dtype("jacfwd", "non-float tangent"))?;
        columns.push(column);
    }

    let out_aval =
        out_aval.ok_or_else(|| CoreError::shape("jacfwd", "function has no inputs to probe"))?;
    let m = element_count(&out_aval)?;
    assemble_jacobian(&out_aval, &in_aval, m, n, |row, column| columns[column][row])
}

/// Reverse-mode Jacobian of a single-array function: linearise once, then
/// one transposed application per standard basis cotangent. Evaluates
/// eagerly.
pub fn jacrev(f: FlatFn<'_>, x: &Tracer) -> Result<Tracer, CoreError> {
    let in_aval = x.aval()?;
    require_float("jacrev", &in_aval)?;
    let n = element_count(&in_aval)?;

    let (primal_outs, linear) = linearize_flat(f, &[x.clone()])?;
    if primal_outs.len() != 1 {
        return Err(CoreError::pytree("jacrev requires a single array output"));
    }
    let out_aval = primal_outs[0].aval()?;
    let m = element_count(&out_aval)?;

    let mut rows: Vec<Vec<f64>> = Vec::with_capacity(m);
    for index in 0..m {
        let basis = Tracer::concrete(one_hot(&out_aval, index)?);
        let cotangents = linear.backward(&[basis])?;
        let row = cotangents[0]
            .to_value()?
            .to_f64_vec()
            .ok_or_else(|| CoreError::dtype("jacrev", "non-float cotangent"))?;
        rows.push(row);
    }

    assemble_jacobian(&out_aval, &in_aval, m, n, |row, column| rows[row][column])
}

fn require_float(primitive: &str, aval: &ShapedArray) -> Result<(), CoreError> {
    if !aval.dtype.is_float() {
        return Err(CoreError::MissingRule {
            primitive: format!("{primitive} over {} input", aval.dtype),
            transform: "grad",
        });
    }
    Ok(())
}

fn element_count(aval: &ShapedArray) -> Result<usize, CoreError> {
    aval.shape
        .element_count()
        .map(|count| count as usize)
        .ok_or_else(|| CoreError::shape("jacobian", "element count overflow"))
}

fn one_hot(aval: &ShapedArray, index: usize) -> Result<Value, CoreError> {
    let count = element_count(aval)?;
    if aval.shape.is_scalar() {
        return Ok(Value::Scalar(Literal::one(aval.dtype)));
    }
    let mut elements = vec![Literal::zero(aval.dtype); count];
    elements[index] = Literal::one(aval.dtype);
    Ok(Value::Tensor(TensorValue::new(
        aval.dtype,
        aval.shape.clone(),
        elements,
    )?))
}

/// Jacobian shape is `out_shape ++ in_shape`, elements in row-major order
/// with the output index varying slowest.
fn assemble_jacobian(
    out_aval: &ShapedArray,
    in_aval: &ShapedArray,
    m: usize,
    n: usize,
    entry: impl Fn(usize, usize) -> f64,
) -> Result<Tracer, CoreError> {
    let mut dims = out_aval.shape.dims.clone();
    dims.extend_from_slice(&in_aval.shape.dims);
    if dims.is_empty() {
        return Ok(Tracer::concrete(Value::scalar_f64(entry(0, 0))));
    }
    let mut elements = Vec::with_capacity(m * n);
    for row in 0..m {
        for column in 0..n {
            elements.push(Literal::from_f64(entry(row, column)));
        }
    }
    Ok(Tracer::concrete(Value::Tensor(TensorValue::new(
        DType::F64,
        Shape { dims },
        elements,
    )?)))
}

#[cfg(test)]
mod tests {
    use super::{Argnums, TransformOptions, grad, jacfwd, jacrev, value_and_grad};
    use jaxel_core::{CoreError, Value};
    use jaxel_lax::ops;
    use jaxel_trace::Tracer;
    use jaxel_tree::Tree;

    fn cube(args: &[Tree<Tracer>]) -> Result<Tree<Tracer>, CoreError> {
        let Some(x) = args[0].as_leaf() else {
            return Err(CoreError::pytree("expected a leaf"));
        };
        Ok(Tree::Leaf(ops::mul(&ops::mul(x, x)?, x)?))
    }

    fn scalar_arg(value: f64) -> Tree<Tracer> {
        Tree::Leaf(Tracer::scalar_f64(value))
    }

    fn grad_scalar(tree: &Tree<Tracer>) -> f64 {
        tree.as_leaf()
            .and_then(|leaf| leaf.to_value().ok())
            .and_then(|value| value.as_f64_scalar())
            .unwrap_or(f64::NAN)
    }

    #[test]
    fn grad_of_cube_is_three_x_squared() {
        let out = grad(&cube, &[scalar_arg(4.0)], &TransformOptions::default()).unwrap();
        assert!((grad_scalar(&out.grad) - 48.0).abs() < 1e-9);
    }

    #[test]
    fn grad_of_sin_cos_composition() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            let Some(x) = args[0].as_leaf() else {
                return Err(CoreError::pytree("expected a leaf"));
            };
            Ok(Tree::Leaf(ops::sin(&ops::cos(x)?)?))
        };
        let out = grad(&f, &[scalar_arg(3.0)], &TransformOptions::default()).unwrap();
        // d/dx sin(cos(x)) = -sin(x) cos(cos(x))
        let expected = -(3.0_f64.sin()) * (3.0_f64.cos()).cos();
        assert!((grad_scalar(&out.grad) - expected).abs() < 1e-5);
        assert!((grad_scalar(&out.grad) - (-0.077_432_003)).abs() < 1e-5);
    }

    #[test]
    fn value_and_grad_returns_both() {
        let out = value_and_grad(&cube, &[scalar_arg(2.0)], &TransformOptions::default()).unwrap();
        assert_eq!(grad_scalar(&out.value), 8.0);
        assert!((grad_scalar(&out.grad) - 12.0).abs() < 1e-9);
        assert!(out.aux.is_none());
    }

    #[test]
    fn grad_with_argnums_selects_the_second_argument() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            let (Some(x), Some(y)) = (args[0].as_leaf(), args[1].as_leaf()) else {
                return Err(CoreError::pytree("expected leaves"));
            };
            Ok(Tree::Leaf(ops::mul(x, &ops::mul(y, y)?)?))
        };
        let options = TransformOptions {
            argnums: Argnums::Single(1),
            ..TransformOptions::default()
        };
        let out = grad(&f, &[scalar_arg(3.0), scalar_arg(5.0)], &options).unwrap();
        // d/dy x*y^2 = 2xy = 30
        assert!((grad_scalar(&out.grad) - 30.0).abs() < 1e-9);
    }

    #[test]
    fn grad_of_vector_output_is_refused() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            Ok(args[0].clone())
        };
        let x = Tree::Leaf(Tracer::concrete(Value::vector_f64(&[1.0, 2.0]).unwrap()));
        let err = grad(&f, &[x], &TransformOptions::default()).expect_err("vector output");
        assert!(matches!(err, CoreError::OutputNotScalar { .. }));
    }

    #[test]
    fn grad_of_integer_output_is_refused() {
        let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
            let Some(x) = args[0].as_leaf() else {
                return Err(CoreError::pytree("expected a leaf"));
            };
            Ok(Tree::Leaf(ops::mul(x, x)?))
        };
        let x = Tree::Leaf(Tracer::scalar_i64(3));
        let err = grad(&f, &[x], &TransformOptions::default()).expect_err("integer path");
        assert!(matches!(err, CoreError::MissingRule { transform: "grad", .. }));
    }

    #[test]
    fn jacobians_agree_between_modes() {
        // f(x) = [x0*x1, sin(x0)] has Jacobian [[x1, x0], [cos(x0), 0]].
        let f = |args: &[Tracer]| -> Result<Vec<Tracer>, CoreError> {
            let x = &args[0];
            let parts = ops::mul(x, &Tracer::concrete(Value::vector_f64(&[1.0, 0.0]).unwrap()))?;
            let x0 = ops::reduce_sum(&parts, None)?;
            let rest = ops::mul(x, &Tracer::concrete(Value::vector_f64(&[0.0, 1.0]).unwrap()))?;
            let x1 = ops::reduce_sum(&rest, None)?;
            let product = ops::mul(&x0, &x1)?;
            let sine = ops::sin(&x0)?;
            // Pack [product, sine] as a length-2 vector.
            let row0 = ops::mul(
                &product,
                &Tracer::concrete(Value::vector_f64(&[1.0, 0.0]).unwrap()),
            )?;
            let row1 = ops::mul(
                &sine,
                &Tracer::concrete(Value::vector_f64(&[0.0, 1.0]).unwrap()),
            )?;
            Ok(vec![ops::add(&row0, &row1)?])
        };

        let x = Tracer::concrete(Value::vector_f64(&[0.8, -1.3]).unwrap());
        let forward = jacfwd(&f, &x).unwrap().to_value().unwrap();
        let reverse = jacrev(&f, &x).unwrap().to_value().unwrap();
        assert_eq!(forward.shape().dims, vec![2, 2]);

        let fwd = forward.to_f64_vec().unwrap();
        let rev = reverse.to_f64_vec().unwrap();
        let expected = [-1.3, 0.8, 0.8_f64.cos(), 0.0];
        for ((a, b), want) in fwd.iter().zip(rev.iter()).zip(expected.iter()) {
            assert!((a - want).abs() < 1e-9, "jacfwd {a} vs {want}");
            assert!((b - want).abs() < 1e-9, "jacrev {b} vs {want}");
        }
    }
}
