#![forbid(unsafe_code)]

//! Host-CPU reference backend.
//!
//! Implements the per-primitive kernel table the core consumes. All
//! computation is synchronous and single-threaded; completion tokens are
//! always ready.

mod elementwise;
mod linear;
mod reduction;
mod structural;

use jaxel_core::{DType, Literal, Params, Shape, TensorValue, Value};
use jaxel_runtime::backend::{Backend, BackendError, Completion};
use jaxel_runtime::device::{DeviceId, DeviceInfo, Platform};

pub struct CpuBackend {
    version_string: String,
}

impl CpuBackend {
    #[must_use]
    pub fn new() -> Self {
        Self {
            version_string: format!("jaxel-backend-cpu/{}", env!("CARGO_PKG_VERSION")),
        }
    }
}

impl Default for CpuBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend for CpuBackend {
    fn name(&self) -> &str {
        "cpu"
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        vec![DeviceInfo {
            id: DeviceId(0),
            platform: Platform::Cpu,
            host_id: 0,
        }]
    }

    fn default_device(&self) -> DeviceId {
        DeviceId(0)
    }

    fn execute_primitive(
        &self,
        primitive: &str,
        inputs: &[Value],
        params: &Params,
        _device: DeviceId,
    ) -> Result<Vec<Value>, BackendError> {
        let output = match primitive {
            "add" => elementwise::binary(elementwise::ADD, inputs)?,
            "sub" => elementwise::binary(elementwise::SUB, inputs)?,
            "mul" => elementwise::binary(elementwise::MUL, inputs)?,
            "div" => elementwise::binary(elementwise::DIV, inputs)?,
            "neg" => elementwise::unary(elementwise::NEG, inputs)?,
            "exp" => elementwise::unary(elementwise::EXP, inputs)?,
            "log" => elementwise::unary(elementwise::LOG, inputs)?,
            "sqrt" => elementwise::unary(elementwise::SQRT, inputs)?,
            "sin" => elementwise::unary(elementwise::SIN, inputs)?,
            "cos" => elementwise::unary(elementwise::COS, inputs)?,
            "greater" => elementwise::compare(elementwise::GREATER, inputs)?,
            "less" => elementwise::compare(elementwise::LESS, inputs)?,
            "equal" => elementwise::compare(elementwise::EQUAL, inputs)?,
            "reduce_sum" => reduction::reduce_sum(inputs, params)?,
            "broadcast_in_dim" => structural::broadcast_in_dim(inputs, params)?,
            "transpose" => structural::transpose(inputs, params)?,
            "dot" => linear::dot(inputs)?,
            "matmul" => linear::matmul(inputs)?,
            other => {
                return Err(BackendError::UnsupportedPrimitive {
                    primitive: other.to_owned(),
                });
            }
        };
        Ok(vec![output])
    }

    fn from_scalar(&self, literal: Literal) -> Value {
        Value::Scalar(literal)
    }

    fn from_typed_buffer(
        &self,
        shape: &Shape,
        dtype: DType,
        bytes: &[u8],
    ) -> Result<Value, BackendError> {
        let count = shape
            .element_count()
            .ok_or_else(|| BackendError::InvalidBuffer {
                detail: "element count overflow".to_owned(),
            })? as usize;
        let width = dtype_width(dtype);
        if bytes.len() != count * width {
            return Err(BackendError::InvalidBuffer {
                detail: format!(
                    "expected {} bytes for {count} x {dtype:?}, got {}",
                    count * width,
                    bytes.len()
                ),
            });
        }

        let mut elements = Vec::with_capacity(count);
        for chunk in bytes.chunks_exact(width.max(1)) {
            elements.push(decode_element(dtype, chunk)?);
        }

        if shape.is_scalar() {
            return Ok(Value::Scalar(elements[0]));
        }
        TensorValue::new(dtype, shape.clone(), elements)
            .map(Value::Tensor)
            .map_err(|err| BackendError::InvalidBuffer {
                detail: err.to_string(),
            })
    }

    fn block_until_ready(&self, _value: &Value) -> Completion {
        Completion::ready()
    }

    fn version(&self) -> &str {
        &self.version_string
    }
}

fn dtype_width(dtype: DType) -> usize {
    match dtype {
        DType::Bool => 1,
        DType::F16 => 2,
        DType::I32 | DType::F32 => 4,
        DType::I64 | DType::F64 | DType::Complex64 => 8,
    }
}

fn decode_element(dtype: DType, chunk: &[u8]) -> Result<Literal, BackendError> {
    let malformed = || BackendError::InvalidBuffer {
        detail: "malformed element bytes".to_owned(),
    };
    Ok(match dtype {
        DType::Bool => Literal::Bool(chunk[0] != 0),
        DType::I32 => {
            let raw: [u8; 4] = chunk.try_into().map_err(|_| malformed())?;
            Literal::I64(i64::from(i32::from_le_bytes(raw)))
        }
        DType::I64 => {
            let raw: [u8; 8] = chunk.try_into().map_err(|_| malformed())?;
            Literal::I64(i64::from_le_bytes(raw))
        }
        DType::F16 => {
            let raw: [u8; 2] = chunk.try_into().map_err(|_| malformed())?;
            Literal::from_f64(f16_bits_to_f64(u16::from_le_bytes(raw)))
        }
        DType::F32 => {
            let raw: [u8; 4] = chunk.try_into().map_err(|_| malformed())?;
            Literal::from_f64(f64::from(f32::from_le_bytes(raw)))
        }
        DType::F64 => {
            let raw: [u8; 8] = chunk.try_into().map_err(|_| malformed())?;
            Literal::from_f64(f64::from_le_bytes(raw))
        }
        DType::Complex64 => {
            let re: [u8; 4] = chunk[0..4].try_into().map_err(|_| malformed())?;
            let im: [u8; 4] = chunk[4..8].try_into().map_err(|_| malformed())?;
            Literal::from_complex64(f32::from_le_bytes(re), f32::from_le_bytes(im))
        }
    })
}

/// IEEE 754 binary16 → binary64.
fn f16_bits_to_f64(bits: u16) -> f64 {
    let sign = if bits >> 15 == 1 { -1.0 } else { 1.0 };
    let exponent = (bits >> 10) & 0x1f;
    let fraction = bits & 0x3ff;
    let magnitude = match exponent {
        0 => f64::from(fraction) * (-24_f64).exp2(),
        0x1f => {
            if fraction == 0 {
                f64::INFINITY
            } else {
                f64::NAN
            }
        }
        _ => (1.0 + f64::from(fraction) / 1024.0) * f64::from(i32::from(exponent) - 15).exp2(),
    };
    sign * magnitude
}
