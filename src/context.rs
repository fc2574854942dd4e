//! Injected cluster contracts: type-id mapping and the cluster-wide
//! type-name registry.

use crate::error::Result;
use dashmap::DashMap;
use std::fmt;

const FNV_PRIME: u32 = 16_777_619;
const FNV_OFFSET: u32 = 2_166_136_261;

/// FNV-1a/32 over `bytes`, continuing from `seed`.
pub(crate) fn fnv1a_32(seed: u32, bytes: &[u8]) -> u32 {
    let mut hash = seed;
    for byte in bytes {
        hash ^= u32::from(*byte);
        hash = hash.wrapping_mul(FNV_PRIME);
    }
    hash
}

pub(crate) const FNV_SEED: u32 = FNV_OFFSET;

/// Custom mapping from class names to stable type ids.
///
/// Returning `0` means "no mapping"; the marshaller then falls back to a
/// deterministic hash of the name.
pub trait IdMapper: Send + Sync {
    /// Returns the type id for a class name, or `0` for no mapping.
    fn type_id(&self, class_name: &str) -> i32;
}

/// Resolves the type id for a class name: the mapper's nonzero answer if
/// any, else FNV-1a/32 of the name. Zero stays reserved for "emit the name
/// inline", so a hash landing on zero is replaced with the FNV offset basis.
pub fn resolve_type_id(class_name: &str, mapper: Option<&dyn IdMapper>) -> i32 {
    if let Some(mapper) = mapper {
        let id = mapper.type_id(class_name);
        if id != 0 {
            return id;
        }
    }
    let hash = fnv1a_32(FNV_OFFSET, class_name.as_bytes());
    if hash == 0 {
        FNV_OFFSET as i32
    } else {
        hash as i32
    }
}

/// The cluster-wide type registry the marshaller publishes names to and
/// resolves unknown ids from.
///
/// When `register_class` declines, the writer emits type id `0` followed by
/// the literal name.
pub trait MarshallerContext: Send + Sync {
    /// Publishes a `type_id → class_name` binding. Returns `false` to
    /// decline, forcing inline names on the wire.
    fn register_class(&self, type_id: i32, class_name: &str) -> Result<bool>;

    /// Resolves a type id to a class name, if known.
    fn class_name(&self, type_id: i32) -> Result<Option<String>>;
}

/// In-process context: a concurrent id→name map that always accepts.
///
/// Suitable for single-process use and tests; a real deployment injects a
/// context backed by the grid's distributed registry.
#[derive(Default)]
pub struct LocalMarshallerContext {
    names: DashMap<i32, String>,
}

impl LocalMarshallerContext {
    /// Creates an empty context.
    pub fn new() -> LocalMarshallerContext {
        LocalMarshallerContext {
            names: DashMap::new(),
        }
    }
}

impl fmt::Debug for LocalMarshallerContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalMarshallerContext")
            .field("registered", &self.names.len())
            .finish()
    }
}

impl MarshallerContext for LocalMarshallerContext {
    fn register_class(&self, type_id: i32, class_name: &str) -> Result<bool> {
        self.names
            .entry(type_id)
            .or_insert_with(|| class_name.to_string());
        Ok(true)
    }

    fn class_name(&self, type_id: i32) -> Result<Option<String>> {
        Ok(self.names.get(&type_id).map(|e| e.value().clone()))
    }
}
