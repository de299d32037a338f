//! Interned primitive names.
//!
//! A `Primitive` is a cheap copyable handle into the process-wide name table.
//! The table is append-only: interning the same name twice yields the same
//! handle, and the IR serialises primitives by their stable string name.

use std::collections::HashMap;
use std::sync::{OnceLock, RwLock};

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Primitive(u32);

struct PrimitiveTable {
    names: Vec<&'static str>,
    index: HashMap<&'static str, u32>,
}

fn table() -> &'static RwLock<PrimitiveTable> {
    static TABLE: OnceLock<RwLock<PrimitiveTable>> = OnceLock::new();
    TABLE.get_or_init(|| {
        RwLock::new(PrimitiveTable {
            names: Vec::new(),
            index: HashMap::new(),
        })
    })
}

impl Primitive {
    /// Intern a primitive name, returning its stable handle.
    pub fn intern(name: &str) -> Self {
        {
            let guard = table()
                .read()
                .unwrap_or_else(std::sync::PoisonError::into_inner);
            if let Some(id) = guard.index.get(name) {
                return Self(*id);
            }
        }
        let mut guard = table()
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if let Some(id) = guard.index.get(name) {
            return Self(*id);
        }
        let leaked: &'static str = Box::leak(name.to_owned().into_boxed_str());
        let id = guard.names.len() as u32;
        guard.names.push(leaked);
        guard.index.insert(leaked, id);
        Self(id)
    }

    #[must_use]
    pub fn name(self) -> &'static str {
        let guard = table()
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        guard.names[self.0 as usize]
    }

    #[must_use]
    pub fn index(self) -> usize {
        self.0 as usize
    }
}

impl std::fmt::Display for Primitive {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl Serialize for Primitive {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.name())
    }
}

impl<'de> Deserialize<'de> for Primitive {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let name = String::deserialize(deserializer)?;
        if name.is_empty() {
            return Err(D::Error::custom("empty primitive name"));
        }
        Ok(Primitive::intern(&name))
    }
}
