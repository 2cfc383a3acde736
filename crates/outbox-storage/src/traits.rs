//! Storage trait definitions.

use crate::StorageResult;

/// Trait for persistent key-value storage backends.
///
/// Values are whole records: a `set` replaces whatever was stored under the
/// key, there is no append.
pub trait KeyValueStore: Send + Sync {
    /// Store a value, replacing any previous value
    fn set(&self, key: &str, value: &str) -> StorageResult<()>;

    /// Retrieve a value
    fn get(&self, key: &str) -> StorageResult<Option<String>>;

    /// Delete a value, returning whether it existed
    fn delete(&self, key: &str) -> StorageResult<bool>;

    /// Check if a key exists
    fn has(&self, key: &str) -> StorageResult<bool> {
        Ok(self.get(key)?.is_some())
    }

    /// List all keys that start with a given prefix.
    /// Returns an empty vec if not supported or no keys found.
    fn list_keys_with_prefix(&self, _prefix: &str) -> StorageResult<Vec<String>> {
        Ok(Vec::new())
    }
}
