//! Character-exact goldens for the canonical jaxpr text form.

use jaxel_api::transforms::{jit, make_jaxpr};
use jaxel_api::tree::Tree;
use jaxel_api::{CoreError, Tracer, numpy, pretty};

fn expect_leaf(tree: &Tree<Tracer>) -> Result<&Tracer, CoreError> {
    tree.as_leaf()
        .ok_or_else(|| CoreError::pytree("expected a leaf"))
}

#[test]
fn reduction_golden_renders_parameters_inline() {
    let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::sum(x, Some(&[0]))?))
    };
    let example = [Tree::Leaf(numpy::vector(&[0.0; 3]).expect("example"))];
    let closed = make_jaxpr(&f, &example).expect("trace");

    let expected = "\
{ lambda a:f64[3] .
  let b:f64[] = reduce_sum[axes=0] a
  in ( b ) }";
    assert_eq!(pretty(&closed.jaxpr), expected);
}

#[test]
fn staged_call_golden_indents_the_nested_jaxpr() {
    let square = jit("square", |args: &[Tree<Tracer>]| {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::mul(x, x)?))
    });
    let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let squared = square.call(args)?;
        let y = expect_leaf(&squared)?;
        Ok(Tree::Leaf(numpy::add(y, &Tracer::scalar_i64(1))?))
    };
    let closed = make_jaxpr(&f, &[Tree::Leaf(numpy::scalar(0.0))]).expect("trace");

    let expected = "\
{ lambda a:f64[] .
  let b:f64[] = jit[name=square num_consts=0] a
        jaxpr=
          { lambda a:f64[] .
            let b:f64[] = mul a a
            in ( b ) }
      c:f64[] = add b 1
  in ( c ) }";
    assert_eq!(pretty(&closed.jaxpr), expected);
}

#[test]
fn captured_consts_render_before_the_semicolon() {
    let weights = numpy::vector(&[1.0, 2.0]).expect("weights");
    let f = move |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::sum(&numpy::mul(x, &weights)?, None)?))
    };
    let example = [Tree::Leaf(numpy::vector(&[0.0; 2]).expect("example"))];
    let closed = make_jaxpr(&f, &example).expect("trace");

    // Constvars name first, so the captured weights render as `a` ahead of
    // the `;` separator and the input as `b`.
    let expected = "\
{ lambda a:f64[2] ; b:f64[2] .
  let c:f64[2] = mul b a
      d:f64[] = reduce_sum c
  in ( d ) }";
    assert_eq!(pretty(&closed.jaxpr), expected);
}
