#![forbid(unsafe_code)]

//! The user-facing surface: a numpy-like op module, the tree module, and
//! the transformation entry points.

pub mod numpy;
pub mod transforms;
pub mod tree;

pub use jaxel_core::{
    ClosedJaxpr, CoreError, DType, Jaxpr, Literal, Shape, ShapedArray, TensorValue, Value,
    inline_calls, pretty,
};
pub use jaxel_runtime::Completion;
pub use jaxel_trace::{Tracer, eval_closed_jaxpr, eval_jaxpr};

/// Completion hook for a concrete value: returns the backend's token, which
/// user code awaits. Asynchronous backends surface deferred failures at
/// `wait`.
pub fn block_until_ready(operand: &Tracer) -> Result<Completion, CoreError> {
    let value = operand.to_value()?;
    Ok(jaxel_trace::active_backend().block_until_ready(&value))
}
