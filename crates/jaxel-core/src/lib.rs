#![forbid(unsafe_code)]

//! The typed IR of the tracing core: dtypes, shapes, concrete values,
//! abstract values, binders, equations, jaxprs, the canonical text form,
//! and the pure IR rewrites (inlining, DCE).

mod aval;
mod dtype;
mod error;
mod ir;
mod params;
mod pretty;
mod primitive;
mod rewrite;
mod value;

pub use aval::{Aval, ShapedArray};
pub use dtype::{DType, Shape};
pub use error::CoreError;
pub use ir::{Atom, ClosedJaxpr, Equation, Jaxpr, JaxprValidationError, Var, VarId};
pub use params::{Params, decode_u32_list, decode_usize_list, encode_u32_list, encode_usize_list};
pub use pretty::pretty;
pub use primitive::Primitive;
pub use rewrite::{dce_jaxpr, inline_calls};
pub use value::{Literal, TensorValue, Value, ValueError};
