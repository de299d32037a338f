//! Backend trait defining the uniform interface for compute backends.
//!
//! All backends (CPU, Wasm, GPU) implement this trait with identical API
//! surface. Platform-specific behavior is encapsulated behind the trait
//! boundary; the core never inspects how a kernel runs.

use jaxel_core::{CoreError, DType, Literal, Params, Shape, Value};

use crate::device::{DeviceId, DeviceInfo};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    /// Requested backend is not available on this system.
    Unavailable { backend: String },
    /// No kernel registered for a primitive name.
    UnsupportedPrimitive { primitive: String },
    /// A kernel rejected its inputs or failed mid-execution.
    ExecutionFailed { primitive: String, detail: String },
    /// A typed buffer could not be decoded.
    InvalidBuffer { detail: String },
}

impl std::fmt::Display for BackendError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Unavailable { backend } => write!(f, "backend unavailable: {backend}"),
            Self::UnsupportedPrimitive { primitive } => {
                write!(f, "no kernel for primitive: {primitive}")
            }
            Self::ExecutionFailed { primitive, detail } => {
                write!(f, "kernel {primitive} failed: {detail}")
            }
            Self::InvalidBuffer { detail } => write!(f, "invalid typed buffer: {detail}"),
        }
    }
}

impl std::error::Error for BackendError {}

impl From<BackendError> for CoreError {
    fn from(value: BackendError) -> Self {
        CoreError::Backend {
            detail: value.to_string(),
        }
    }
}

/// A completion token for a backend computation.
///
/// Backends may complete synchronously or defer failures to the await point;
/// the core passes tokens through unchanged and only user code waits on them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Completion {
    result: Result<(), BackendError>,
}

impl Completion {
    #[must_use]
    pub fn ready() -> Self {
        Self { result: Ok(()) }
    }

    #[must_use]
    pub fn failed(error: BackendError) -> Self {
        Self { result: Err(error) }
    }

    #[must_use]
    pub fn is_ready(&self) -> bool {
        self.result.is_ok()
    }

    /// Await the computation, surfacing any deferred backend error.
    pub fn wait(self) -> Result<(), BackendError> {
        self.result
    }
}

/// Uniform interface for compute backends.
///
/// For each registered primitive name the backend provides a kernel mapping
/// concrete inputs and parameters to concrete outputs.
pub trait Backend: Send + Sync {
    /// Human-readable backend name (e.g., "cpu", "wasm", "webgpu").
    fn name(&self) -> &str;

    /// Discover available devices for this backend.
    fn devices(&self) -> Vec<DeviceInfo>;

    /// Default device for this backend (first available).
    fn default_device(&self) -> DeviceId;

    /// Run the kernel for one primitive application.
    fn execute_primitive(
        &self,
        primitive: &str,
        inputs: &[Value],
        params: &Params,
        device: DeviceId,
    ) -> Result<Vec<Value>, BackendError>;

    /// Wrap a host scalar as a backend value.
    fn from_scalar(&self, literal: Literal) -> Value;

    /// Decode a row-major typed byte buffer into a backend value.
    fn from_typed_buffer(
        &self,
        shape: &Shape,
        dtype: DType,
        bytes: &[u8],
    ) -> Result<Value, BackendError>;

    /// Completion hook for a value handle. Synchronous backends return a
    /// ready token; asynchronous ones may defer errors to `wait`.
    fn block_until_ready(&self, value: &Value) -> Completion;

    /// Platform version string for cache key inclusion.
    fn version(&self) -> &str;
}

#[cfg(test)]
mod tests {
    use super::{BackendError, Completion};
    use jaxel_core::CoreError;

    #[test]
    fn backend_error_wraps_verbatim_into_core_error() {
        let err = BackendError::ExecutionFailed {
            primitive: "add".to_owned(),
            detail: "division by zero".to_owned(),
        };
        let core: CoreError = err.clone().into();
        match core {
            CoreError::Backend { detail } => assert_eq!(detail, err.to_string()),
            other => panic!("expected Backend kind, got {other:?}"),
        }
    }

    #[test]
    fn completion_surfaces_deferred_errors_at_wait() {
        let ok = Completion::ready();
        assert!(ok.is_ready());
        ok.wait().expect("ready token should wait cleanly");

        let failed = Completion::failed(BackendError::Unavailable {
            backend: "webgpu".to_owned(),
        });
        assert!(!failed.is_ready());
        failed.wait().expect_err("failed token should error at wait");
    }
}
