//! Open registry of custom pytree node kinds.
//!
//! External types participate in flattening by registering a stable tag.
//! The registry is process-wide and append-only; registration is idempotent.

use rustc_hash::FxHashSet;
use std::sync::{OnceLock, RwLock};

fn registry() -> &'static RwLock<FxHashSet<String>> {
    static REGISTRY: OnceLock<RwLock<FxHashSet<String>>> = OnceLock::new();
    REGISTRY.get_or_init(|| RwLock::new(FxHashSet::default()))
}

/// Register a custom node kind by tag. Idempotent.
pub fn register_node(tag: &str) {
    let mut guard = registry()
        .write()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guard.insert(tag.to_owned());
}

/// Whether a custom node kind has been registered.
#[must_use]
pub fn is_registered_node(tag: &str) -> bool {
    let guard = registry()
        .read()
        .unwrap_or_else(std::sync::PoisonError::into_inner);
    guard.contains(tag)
}
