//! Persistent key-value storage for the event outbox.
//!
//! This crate provides the storage backends an outbound queue persists its
//! buffered entries into:
//! - **File**: one file per key under a directory, written atomically
//! - **Memory**: process-local map, used by tests and ephemeral queues
//!
//! Both backends can be given a byte quota, after which writes are refused
//! the same way a full browser `localStorage` refuses them.

mod file;
mod keys;
mod memory;
mod traits;

pub use file::FileStorage;
pub use keys::StorageKeys;
pub use memory::MemoryStorage;
pub use traits::KeyValueStore;

use std::path::{Path, PathBuf};
use thiserror::Error;

/// Directory name used under the home directory for queue records.
pub const STORAGE_DIR_NAME: &str = ".event-outbox";

/// Error type for storage operations.
#[derive(Error, Debug)]
pub enum StorageError {
    /// Platform-specific storage error
    #[error("Platform storage error: {0}")]
    Platform(String),

    /// Key or value cannot be represented by the backend
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Write refused because it would exceed the backend quota
    #[error("Quota exceeded: {needed} bytes needed, {quota} bytes allowed")]
    QuotaExceeded { needed: usize, quota: usize },

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for storage operations.
pub type StorageResult<T> = Result<T, StorageError>;

/// Default directory for persisted queues: `~/.event-outbox/queues`.
pub fn default_storage_dir() -> StorageResult<PathBuf> {
    dirs::home_dir()
        .map(|home| home.join(STORAGE_DIR_NAME).join("queues"))
        .ok_or_else(|| StorageError::Platform("Could not determine home directory".to_string()))
}

/// Create the default file-backed storage rooted at `dir`.
pub fn create_storage(dir: &Path) -> StorageResult<Box<dyn KeyValueStore>> {
    let storage = FileStorage::new(dir)?;
    Ok(Box::new(storage))
}
