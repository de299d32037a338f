#![forbid(unsafe_code)]

//! Compile-cache keys and the bounded LRU cache behind `jit`.
//!
//! A dispatch signature is (input structure, per-leaf abstract values,
//! static arguments, backend); identical signatures must reuse a
//! bit-identical IR path, so the key digests a canonical rendering of all
//! four.

use jaxel_core::ShapedArray;
use jaxel_tree::TreeDef;
use sha2::{Digest, Sha256};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheKeyInput<'a> {
    pub backend: &'a str,
    pub treedef: &'a TreeDef,
    pub in_avals: &'a [ShapedArray],
    pub static_args: &'a [String],
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey {
    pub namespace: &'static str,
    pub digest_hex: String,
}

impl CacheKey {
    #[must_use]
    pub fn as_string(&self) -> String {
        format!("{}-{}", self.namespace, self.digest_hex)
    }
}

#[must_use]
pub fn build_cache_key(input: &CacheKeyInput<'_>) -> CacheKey {
    let payload = canonical_payload(input);
    let mut hasher = Sha256::new();
    hasher.update(payload.as_bytes());
    let digest = hasher.finalize();
    CacheKey {
        namespace: "jxl",
        digest_hex: bytes_to_hex(&digest),
    }
}

fn canonical_payload(input: &CacheKeyInput<'_>) -> String {
    let treedef = serde_json::to_string(input.treedef).unwrap_or_default();
    let avals = input
        .in_avals
        .iter()
        .map(ShapedArray::to_string)
        .collect::<Vec<_>>()
        .join(",");
    let statics = input.static_args.join("\u{1f}");
    format!(
        "backend={}|treedef={}|avals={}|static={}",
        input.backend, treedef, avals, statics
    )
}

fn bytes_to_hex(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        let _ = std::fmt::Write::write_fmt(&mut out, format_args!("{byte:02x}"));
    }
    out
}

/// A small bounded cache with least-recently-used eviction. Single-threaded
/// by construction; callers wrap it in whatever interior mutability their
/// context needs.
#[derive(Debug)]
pub struct LruCache<V> {
    capacity: usize,
    entries: Vec<(CacheKey, V)>,
    evictions: u64,
}

impl<V> LruCache<V> {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            entries: Vec::new(),
            evictions: 0,
        }
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn evictions(&self) -> u64 {
        self.evictions
    }

    /// Look up a key, marking it most-recently-used on a hit.
    pub fn get(&mut self, key: &CacheKey) -> Option<&V> {
        let position = self.entries.iter().position(|(existing, _)| existing == key)?;
        let entry = self.entries.remove(position);
        self.entries.insert(0, entry);
        self.entries.first().map(|(_, value)| value)
    }

    /// Insert a key, evicting the least-recently-used entry when full.
    pub fn insert(&mut self, key: CacheKey, value: V) {
        if let Some(position) = self.entries.iter().position(|(existing, _)| *existing == key) {
            self.entries.remove(position);
        } else if self.entries.len() >= self.capacity {
            self.entries.pop();
            self.evictions += 1;
        }
        self.entries.insert(0, (key, value));
    }
}

#[cfg(test)]
mod tests {
    use super::{CacheKey, CacheKeyInput, LruCache, build_cache_key};
    use jaxel_core::{DType, Shape, ShapedArray};
    use jaxel_tree::TreeDef;

    fn key_for(avals: &[ShapedArray], statics: &[String]) -> CacheKey {
        build_cache_key(&CacheKeyInput {
            backend: "cpu",
            treedef: &TreeDef::Leaf,
            in_avals: avals,
            static_args: statics,
        })
    }

    #[test]
    fn identical_signatures_share_a_key() {
        let aval = ShapedArray::new(DType::F32, Shape::from_dims(&[2, 3]));
        let a = key_for(std::slice::from_ref(&aval), &[]);
        let b = key_for(std::slice::from_ref(&aval), &[]);
        assert_eq!(a, b);
        assert!(a.as_string().starts_with("jxl-"));
    }

    #[test]
    fn different_avals_and_statics_change_the_key() {
        let f32_aval = ShapedArray::new(DType::F32, Shape::from_dims(&[2, 3]));
        let f64_aval = ShapedArray::new(DType::F64, Shape::from_dims(&[2, 3]));
        assert_ne!(
            key_for(std::slice::from_ref(&f32_aval), &[]),
            key_for(std::slice::from_ref(&f64_aval), &[])
        );
        assert_ne!(
            key_for(std::slice::from_ref(&f32_aval), &["mode=a".to_owned()]),
            key_for(std::slice::from_ref(&f32_aval), &["mode=b".to_owned()])
        );
    }

    #[test]
    fn lru_evicts_the_oldest_entry() {
        let mut cache: LruCache<u32> = LruCache::new(2);
        let aval = ShapedArray::scalar(DType::F64);
        let key_a = key_for(std::slice::from_ref(&aval), &["a".to_owned()]);
        let key_b = key_for(std::slice::from_ref(&aval), &["b".to_owned()]);
        let key_c = key_for(std::slice::from_ref(&aval), &["c".to_owned()]);

        cache.insert(key_a.clone(), 1);
        cache.insert(key_b.clone(), 2);
        assert_eq!(cache.get(&key_a), Some(&1));

        // key_b is now least recently used and falls out.
        cache.insert(key_c.clone(), 3);
        assert_eq!(cache.get(&key_b), None);
        assert_eq!(cache.get(&key_a), Some(&1));
        assert_eq!(cache.get(&key_c), Some(&3));
        assert_eq!(cache.evictions(), 1);
    }
}
