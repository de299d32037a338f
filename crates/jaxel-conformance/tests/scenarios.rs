//! Literal-input conformance scenarios for the transformation surface.

use jaxel_api::transforms::{
    AxesSpec, TransformOptions, VmapOptions, grad, jit, jvp, make_jaxpr, vjp_with_aux, vmap,
};
use jaxel_api::tree::Tree;
use jaxel_api::{CoreError, DType, Tracer, numpy, pretty};
use jaxel_conformance::{assert_close, leaf_elements, leaf_f64};

fn scalar(value: f64) -> Tree<Tracer> {
    Tree::Leaf(numpy::scalar(value))
}

fn expect_leaf(tree: &Tree<Tracer>) -> Result<&Tracer, CoreError> {
    tree.as_leaf()
        .ok_or_else(|| CoreError::pytree("expected a leaf"))
}

#[test]
fn constant_program_folds_to_a_literal_jaxpr() {
    let f = |_args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        Ok(Tree::Leaf(numpy::mul(
            &Tracer::scalar_i64(2),
            &Tracer::scalar_i64(2),
        )?))
    };
    let closed = make_jaxpr(&f, &[]).expect("trace should succeed");
    assert!(closed.consts.is_empty());
    assert_eq!(pretty(&closed.jaxpr), "{ lambda . ( 4 ) }");
}

#[test]
fn add_mul_program_matches_the_golden_text_form() {
    let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::mul(
            &numpy::add(x, &Tracer::scalar_i64(2))?,
            x,
        )?))
    };
    let example = [Tree::Leaf(
        numpy::array(DType::F32, &[2, 3], &[0.0; 6]).expect("example input"),
    )];
    let closed = make_jaxpr(&f, &example).expect("trace should succeed");

    let expected = "\
{ lambda a:f32[2,3] .
  let b:f32[2,3] = add a 2
      c:f32[2,3] = mul b a
  in ( c ) }";
    assert_eq!(pretty(&closed.jaxpr), expected);
}

#[test]
fn gradient_of_cube_at_four() {
    let cube = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::mul(&numpy::mul(x, x)?, x)?))
    };
    let out = grad(&cube, &[scalar(4.0)], &TransformOptions::default()).expect("grad");
    assert_close(leaf_f64(&out.grad), 48.0, 1e-9);
}

#[test]
fn first_and_second_derivatives_of_sin_of_cos() {
    let f = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::sin(&numpy::cos(x)?)?))
    };
    let first = grad(&f, &[scalar(3.0)], &TransformOptions::default()).expect("grad");
    assert_close(leaf_f64(&first.grad), -0.077_432_003, 1e-5);

    let df = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        let out = grad(&f, args, &TransformOptions::default())?;
        Ok(out.grad)
    };
    let second = grad(&df, &[scalar(3.0)], &TransformOptions::default()).expect("grad of grad");
    assert_close(leaf_f64(&second.grad), 0.559_854_311, 1e-5);
}

#[test]
fn vmap_of_sum_over_both_axes() {
    let sum = |args: &[Tree<Tracer>]| -> Result<Tree<Tracer>, CoreError> {
        Ok(Tree::Leaf(numpy::sum(expect_leaf(&args[0])?, None)?))
    };
    let matrix = [Tree::Leaf(
        numpy::array(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).expect("matrix"),
    )];

    let rows = vmap(&sum, &matrix, &VmapOptions::default()).expect("vmap over rows");
    assert_eq!(leaf_elements(&rows).expect("row sums"), vec![6.0, 15.0]);

    let columns = vmap(
        &sum,
        &matrix,
        &VmapOptions {
            in_axes: AxesSpec::Uniform(Some(1)),
            out_axes: 0,
        },
    )
    .expect("vmap over columns");
    assert_eq!(
        leaf_elements(&columns).expect("column sums"),
        vec![5.0, 7.0, 9.0]
    );
}

#[test]
fn jit_composes_with_jvp_and_grad() {
    let square = jit("square", |args: &[Tree<Tracer>]| {
        let x = expect_leaf(&args[0])?;
        Ok(Tree::Leaf(numpy::mul(x, x)?))
    });

    let direct = square.call(&[scalar(3.0)]).expect("jit call");
    assert_close(leaf_f64(&direct), 9.0, 0.0);

    let through_jit = |args: &[Tree<Tracer>]| square.call(args);
    let (primal, tangent) =
        jvp(&through_jit, &[scalar(3.0)], &[scalar(1.0)]).expect("jvp of jit");
    assert_close(leaf_f64(&primal), 9.0, 0.0);
    assert_close(leaf_f64(&tangent), 6.0, 1e-12);

    let out = grad(&through_jit, &[scalar(3.0)], &TransformOptions::default())
        .expect("grad of jit");
    assert_close(leaf_f64(&out.grad), 6.0, 1e-12);
}

#[test]
fn vjp_with_aux_threads_the_auxiliary_output() {
    // f(x) = (sum(x), 2*x)
    let f = |args: &[Tree<Tracer>]| -> Result<(Tree<Tracer>, Tree<Tracer>), CoreError> {
        let x = expect_leaf(&args[0])?;
        let main = numpy::sum(x, None)?;
        let aux = numpy::mul(&Tracer::scalar_f64(2.0), x)?;
        Ok((Tree::Leaf(main), Tree::Leaf(aux)))
    };

    let x = [Tree::Leaf(numpy::vector(&[1.0, 2.0, 3.0]).expect("input"))];
    let (main, aux, backward) = vjp_with_aux(&f, &x).expect("vjp with aux");
    assert_close(leaf_f64(&main), 6.0, 0.0);
    assert_eq!(leaf_elements(&aux).expect("aux"), vec![2.0, 4.0, 6.0]);

    let cotangents = backward
        .call_with_zero_aux(&scalar(1.0), &aux)
        .expect("backward");
    assert_eq!(
        leaf_elements(&cotangents[0]).expect("input cotangent"),
        vec![1.0, 1.0, 1.0]
    );
}

#[test]
fn scenario_suite_emits_a_schema_versioned_log() {
    let fixture_id = jaxel_test_utils::fixture_id_from_json(&("scenarios", 6_u32))
        .expect("fixture digest");
    let log = jaxel_test_utils::TestLogV1::unit(
        jaxel_test_utils::test_id(module_path!(), "scenario_suite_emits_a_schema_versioned_log"),
        fixture_id,
        jaxel_test_utils::TestResult::Pass,
    );
    assert_eq!(
        log.schema_version,
        jaxel_test_utils::TEST_LOG_SCHEMA_VERSION
    );
}
