use crate::{KVStore, Result};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// In-memory store for tests and dry runs
#[derive(Default)]
pub struct MemoryStore {
    entries: RwLock<BTreeMap<Vec<u8>, Bytes>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }
}

impl KVStore for MemoryStore {
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>> {
        Ok(self.entries.read().get(key).cloned())
    }

    fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        self.entries
            .write()
            .insert(key.to_vec(), Bytes::copy_from_slice(value));
        Ok(())
    }

    fn put_all(&self, entries: &[(&[u8], &[u8])]) -> Result<()> {
        let mut map = self.entries.write();
        for (key, value) in entries {
            map.insert(key.to_vec(), Bytes::copy_from_slice(value));
        }
        Ok(())
    }

    fn delete(&self, key: &[u8]) -> Result<()> {
        self.entries.write().remove(key);
        Ok(())
    }
}
