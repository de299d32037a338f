#![forbid(unsafe_code)]

//! The builtin primitive set.
//!
//! Each primitive is registered once with its full rule table: abstract
//! evaluation, jvp, transposition (for the inputs it is linear in), and
//! batching. The user-facing wrappers in `ops` apply primitives through
//! `bind`, so the same wrappers work eagerly, under differentiation, under
//! batching, and during staging.

mod abstract_rules;
mod batch_rules;
mod jvp_rules;
pub mod ops;
mod transpose_rules;

use std::sync::OnceLock;

use jaxel_core::Primitive;
use jaxel_trace::{PrimitiveDef, register_primitive};

/// Handles for the registered builtin primitives.
pub struct Builtins {
    pub add: Primitive,
    pub sub: Primitive,
    pub mul: Primitive,
    pub div: Primitive,
    pub neg: Primitive,
    pub exp: Primitive,
    pub log: Primitive,
    pub sqrt: Primitive,
    pub sin: Primitive,
    pub cos: Primitive,
    pub greater: Primitive,
    pub less: Primitive,
    pub equal: Primitive,
    pub dot: Primitive,
    pub matmul: Primitive,
    pub reduce_sum: Primitive,
    pub broadcast_in_dim: Primitive,
    pub transpose: Primitive,
}

/// Registered builtins; registration happens on first access.
pub fn builtins() -> &'static Builtins {
    static BUILTINS: OnceLock<Builtins> = OnceLock::new();
    BUILTINS.get_or_init(register_builtins)
}

fn register_builtins() -> Builtins {
    Builtins {
        add: register_primitive(PrimitiveDef {
            name: "add",
            abstract_eval: abstract_rules::binary_arith,
            jvp: Some(jvp_rules::add),
            transpose: Some(transpose_rules::add),
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[0, 1],
        }),
        sub: register_primitive(PrimitiveDef {
            name: "sub",
            abstract_eval: abstract_rules::binary_arith,
            jvp: Some(jvp_rules::sub),
            transpose: Some(transpose_rules::sub),
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[0, 1],
        }),
        mul: register_primitive(PrimitiveDef {
            name: "mul",
            abstract_eval: abstract_rules::binary_arith,
            jvp: Some(jvp_rules::mul),
            transpose: Some(transpose_rules::mul),
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[0, 1],
        }),
        div: register_primitive(PrimitiveDef {
            name: "div",
            abstract_eval: abstract_rules::div,
            jvp: Some(jvp_rules::div),
            transpose: Some(transpose_rules::div),
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[0],
        }),
        neg: register_primitive(PrimitiveDef {
            name: "neg",
            abstract_eval: abstract_rules::unary_same,
            jvp: Some(jvp_rules::neg),
            transpose: Some(transpose_rules::neg),
            batch: Some(batch_rules::unary_elementwise),
            linear_inputs: &[0],
        }),
        exp: register_primitive(PrimitiveDef {
            name: "exp",
            abstract_eval: abstract_rules::unary_float,
            jvp: Some(jvp_rules::exp),
            transpose: None,
            batch: Some(batch_rules::unary_elementwise),
            linear_inputs: &[],
        }),
        log: register_primitive(PrimitiveDef {
            name: "log",
            abstract_eval: abstract_rules::unary_float,
            jvp: Some(jvp_rules::log),
            transpose: None,
            batch: Some(batch_rules::unary_elementwise),
            linear_inputs: &[],
        }),
        sqrt: register_primitive(PrimitiveDef {
            name: "sqrt",
            abstract_eval: abstract_rules::unary_float,
            jvp: Some(jvp_rules::sqrt),
            transpose: None,
            batch: Some(batch_rules::unary_elementwise),
            linear_inputs: &[],
        }),
        sin: register_primitive(PrimitiveDef {
            name: "sin",
            abstract_eval: abstract_rules::unary_float,
            jvp: Some(jvp_rules::sin),
            transpose: None,
            batch: Some(batch_rules::unary_elementwise),
            linear_inputs: &[],
        }),
        cos: register_primitive(PrimitiveDef {
            name: "cos",
            abstract_eval: abstract_rules::unary_float,
            jvp: Some(jvp_rules::cos),
            transpose: None,
            batch: Some(batch_rules::unary_elementwise),
            linear_inputs: &[],
        }),
        greater: register_primitive(PrimitiveDef {
            name: "greater",
            abstract_eval: abstract_rules::ordered_compare,
            jvp: Some(jvp_rules::zero_tangent_binary),
            transpose: None,
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[],
        }),
        less: register_primitive(PrimitiveDef {
            name: "less",
            abstract_eval: abstract_rules::ordered_compare,
            jvp: Some(jvp_rules::zero_tangent_binary),
            transpose: None,
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[],
        }),
        equal: register_primitive(PrimitiveDef {
            name: "equal",
            abstract_eval: abstract_rules::equality_compare,
            jvp: Some(jvp_rules::zero_tangent_binary),
            transpose: None,
            batch: Some(batch_rules::binary_elementwise),
            linear_inputs: &[],
        }),
        dot: register_primitive(PrimitiveDef {
            name: "dot",
            abstract_eval: abstract_rules::dot,
            jvp: Some(jvp_rules::dot),
            transpose: Some(transpose_rules::dot),
            batch: Some(batch_rules::dot),
            linear_inputs: &[0, 1],
        }),
        matmul: register_primitive(PrimitiveDef {
            name: "matmul",
            abstract_eval: abstract_rules::matmul,
            jvp: Some(jvp_rules::matmul),
            transpose: Some(transpose_rules::matmul),
            batch: Some(batch_rules::matmul),
            linear_inputs: &[0, 1],
        }),
        reduce_sum: register_primitive(PrimitiveDef {
            name: "reduce_sum",
            abstract_eval: abstract_rules::reduce_sum,
            jvp: Some(jvp_rules::structural_unary),
            transpose: Some(transpose_rules::reduce_sum),
            batch: Some(batch_rules::reduce_sum),
            linear_inputs: &[0],
        }),
        broadcast_in_dim: register_primitive(PrimitiveDef {
            name: "broadcast_in_dim",
            abstract_eval: abstract_rules::broadcast_in_dim,
            jvp: Some(jvp_rules::structural_unary),
            transpose: Some(transpose_rules::broadcast_in_dim),
            batch: Some(batch_rules::broadcast_in_dim),
            linear_inputs: &[0],
        }),
        transpose: register_primitive(PrimitiveDef {
            name: "transpose",
            abstract_eval: abstract_rules::transpose,
            jvp: Some(jvp_rules::structural_unary),
            transpose: Some(transpose_rules::transpose),
            batch: Some(batch_rules::transpose),
            linear_inputs: &[0],
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::{builtins, ops};
    use jaxel_core::{CoreError, DType, Value};
    use jaxel_trace::Tracer;

    #[test]
    fn builtins_register_once_with_stable_names() {
        let a = builtins();
        let b = builtins();
        assert_eq!(a.add, b.add);
        assert_eq!(a.add.name(), "add");
        assert_eq!(a.reduce_sum.name(), "reduce_sum");
    }

    #[test]
    fn eager_ops_execute_on_the_backend() {
        let x = Tracer::scalar_i64(2);
        let y = Tracer::scalar_i64(5);
        let out = ops::add(&x, &y).unwrap();
        assert_eq!(out.to_value().unwrap(), Value::scalar_i64(7));
    }

    #[test]
    fn eager_chain_of_ops() {
        // sin(cos(1.0)) fully eager
        let x = Tracer::scalar_f64(1.0);
        let out = ops::sin(&ops::cos(&x).unwrap()).unwrap();
        let got = out.to_value().unwrap().as_f64_scalar().unwrap();
        assert!((got - 1.0_f64.cos().sin()).abs() < 1e-12);
    }

    #[test]
    fn shape_mismatch_surfaces_at_bind_time() {
        let a = Tracer::concrete(Value::vector_f64(&[1.0, 2.0]).unwrap());
        let b = Tracer::concrete(Value::vector_f64(&[1.0, 2.0, 3.0]).unwrap());
        let err = ops::add(&a, &b).expect_err("shapes do not broadcast");
        assert!(matches!(err, CoreError::Backend { .. } | CoreError::ShapeMismatch { .. }));
    }

    #[test]
    fn sum_over_all_axes() {
        let x = Tracer::concrete(
            Value::tensor_f64(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        let out = ops::reduce_sum(&x, None).unwrap();
        assert_eq!(out.to_value().unwrap().as_f64_scalar(), Some(21.0));
    }

    #[test]
    fn unbroadcast_sums_away_broadcast_axes() {
        use jaxel_core::{Shape, ShapedArray};
        let ct = Tracer::concrete(
            Value::tensor_f64(DType::F64, &[2, 3], &[1.0; 6]).unwrap(),
        );
        let target = ShapedArray::new(DType::F64, Shape::scalar());
        let out = ops::unbroadcast(&ct, &target).unwrap();
        assert_eq!(out.to_value().unwrap().as_f64_scalar(), Some(6.0));

        let target_row = ShapedArray::new(DType::F64, Shape::from_dims(&[1, 3]));
        let row = ops::unbroadcast(&ct, &target_row).unwrap();
        let tensor = row.to_value().unwrap();
        assert_eq!(tensor.shape().dims, vec![1, 3]);
        assert_eq!(tensor.to_f64_vec().unwrap(), vec![2.0, 2.0, 2.0]);
    }

    #[test]
    fn moveaxis_permutes_batch_dimension() {
        let x = Tracer::concrete(
            Value::tensor_f64(DType::F64, &[2, 3], &[1.0, 2.0, 3.0, 4.0, 5.0, 6.0]).unwrap(),
        );
        let moved = ops::moveaxis(&x, 1, 0).unwrap();
        let value = moved.to_value().unwrap();
        assert_eq!(value.shape().dims, vec![3, 2]);
        assert_eq!(
            value.to_f64_vec().unwrap(),
            vec![1.0, 4.0, 2.0, 5.0, 3.0, 6.0]
        );
    }
}
