//! The in-memory dictionary is an external collaborator -- NDS only
//! needs lookup/insert/delete against it. `MemStore` is the
//! trait NDS's runtime is written against; `InMemoryStore` is the one
//! concrete implementation this crate ships so it is runnable without a
//! host cache attached.

use std::collections::HashMap;

use parking_lot::RwLock;

use crate::codec::Value;

/// Opaque mapping of key to value, scoped to a single logical DB by the
/// caller (the runtime holds one `MemStore` per logical DB).
pub trait MemStore: Send + Sync {
    /// `None` if the key is not present in memory.
    fn get(&self, key: &[u8]) -> Option<Value>;
    fn set(&self, key: &[u8], value: Value);
    /// Returns whether the key was present before removal.
    fn remove(&self, key: &[u8]) -> bool;
    fn contains(&self, key: &[u8]) -> bool;
}

/// A `HashMap` behind a `parking_lot::RwLock`, good enough to exercise
/// the read-through/write-back API without a real cache layer attached.
#[derive(Default)]
pub struct InMemoryStore {
    entries: RwLock<HashMap<Vec<u8>, Value>>,
}

impl InMemoryStore {
    pub fn new() -> InMemoryStore {
        InMemoryStore::default()
    }
}

impl MemStore for InMemoryStore {
    fn get(&self, key: &[u8]) -> Option<Value> {
        self.entries.read().get(key).cloned()
    }

    fn set(&self, key: &[u8], value: Value) {
        self.entries.write().insert(key.to_vec(), value);
    }

    fn remove(&self, key: &[u8]) -> bool {
        self.entries.write().remove(key).is_some()
    }

    fn contains(&self, key: &[u8]) -> bool {
        self.entries.read().contains_key(key)
    }
}
