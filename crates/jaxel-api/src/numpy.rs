//! Numpy-like surface: primitive wrappers plus array constructors.

use jaxel_core::{CoreError, DType, Value};
use jaxel_trace::Tracer;

pub use jaxel_lax::ops::{
    add, broadcast_in_dim, cos, div, dot, equal, exp, greater, less, log, matmul, moveaxis, mul,
    neg, sin, sqrt, sub, transpose,
};

/// Sum over the given axes; `None` sums everything.
pub fn sum(operand: &Tracer, axes: Option<&[usize]>) -> Result<Tracer, CoreError> {
    jaxel_lax::ops::reduce_sum(operand, axes)
}

/// A scalar array.
#[must_use]
pub fn scalar(value: f64) -> Tracer {
    Tracer::scalar_f64(value)
}

/// A rank-1 f64 array.
pub fn vector(values: &[f64]) -> Result<Tracer, CoreError> {
    Ok(Tracer::concrete(Value::vector_f64(values)?))
}

/// A row-major array with the given dims and dtype.
pub fn array(dtype: DType, dims: &[u32], values: &[f64]) -> Result<Tracer, CoreError> {
    Ok(Tracer::concrete(Value::tensor_f64(dtype, dims, values)?))
}

/// Decode a row-major typed byte buffer through the backend's constructor.
pub fn from_typed_buffer(dtype: DType, dims: &[u32], bytes: &[u8]) -> Result<Tracer, CoreError> {
    let shape = jaxel_core::Shape::from_dims(dims);
    let value = jaxel_trace::active_backend().from_typed_buffer(&shape, dtype, bytes)?;
    Ok(Tracer::concrete(value))
}
