use crate::Result;
use bytes::Bytes;

/// Key-value store trait
pub trait KVStore: Send + Sync {
    /// Get a value by key
    fn get(&self, key: &[u8]) -> Result<Option<Bytes>>;

    /// Put a key-value pair
    fn put(&self, key: &[u8], value: &[u8]) -> Result<()>;

    /// Put several key-value pairs atomically
    fn put_all(&self, entries: &[(&[u8], &[u8])]) -> Result<()>;

    /// Delete a key
    fn delete(&self, key: &[u8]) -> Result<()>;

    /// Check if a key exists
    fn exists(&self, key: &[u8]) -> Result<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// Get a value as a UTF-8 string
    fn get_string(&self, key: &str) -> Result<Option<String>> {
        match self.get(key.as_bytes())? {
            Some(value) => String::from_utf8(value.to_vec())
                .map(Some)
                .map_err(|e| {
                    crate::StorageError::serialization_error(
                        format!("Value for '{}' is not UTF-8", key),
                        Some(Box::new(e)),
                    )
                }),
            None => Ok(None),
        }
    }
}
