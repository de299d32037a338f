#![forbid(unsafe_code)]

//! The narrow interface the core consumes from array backends.
//!
//! A backend supplies one kernel per registered primitive name, scalar/array
//! constructors, and a completion hook. The core treats every concrete value
//! it receives back as an opaque handle owned by the backend.

pub mod backend;
pub mod device;

pub use backend::{Backend, BackendError, Completion};
pub use device::{DeviceId, DeviceInfo, Platform};

use std::sync::OnceLock;

static GLOBAL_BACKEND: OnceLock<Box<dyn Backend>> = OnceLock::new();

/// Install the process-wide backend. The first installation wins; later
/// calls are no-ops (the backend is fixed before any trace runs).
pub fn install_backend(backend: Box<dyn Backend>) {
    let _ = GLOBAL_BACKEND.set(backend);
}

/// The installed process-wide backend, if any.
#[must_use]
pub fn installed_backend() -> Option<&'static dyn Backend> {
    GLOBAL_BACKEND.get().map(Box::as_ref)
}

/// The installed backend, installing `default` first when none is present.
pub fn backend_or_install(default: impl FnOnce() -> Box<dyn Backend>) -> &'static dyn Backend {
    GLOBAL_BACKEND.get_or_init(default).as_ref()
}
