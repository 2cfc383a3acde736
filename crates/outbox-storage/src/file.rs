//! File-backed storage: one record file per key.

use crate::{KeyValueStore, StorageError, StorageResult};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::debug;

const RECORD_EXTENSION: &str = "json";
const TEMP_EXTENSION: &str = "json.tmp";

/// Stores each key as `<dir>/<key>.json`.
///
/// Writes go to a temporary sibling first and are renamed into place, so a
/// crash mid-write leaves the previous record intact.
pub struct FileStorage {
    dir: PathBuf,
    /// Maximum total bytes across all records, if limited.
    quota: Option<usize>,
}

impl FileStorage {
    /// Open (and create if needed) a storage directory.
    pub fn new(dir: &Path) -> StorageResult<Self> {
        fs::create_dir_all(dir)?;
        Ok(Self {
            dir: dir.to_path_buf(),
            quota: None,
        })
    }

    /// Limit the total size of stored records.
    pub fn with_quota(mut self, quota: usize) -> Self {
        self.quota = Some(quota);
        self
    }

    /// Directory holding the record files.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, key: &str) -> StorageResult<PathBuf> {
        validate_key(key)?;
        Ok(self.dir.join(format!("{}.{}", key, RECORD_EXTENSION)))
    }

    /// Bytes used by every record except `exclude`.
    fn used_bytes_excluding(&self, exclude: &Path) -> StorageResult<usize> {
        let mut total = 0usize;
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if path == exclude || !is_record(&path) {
                continue;
            }
            total += fs::metadata(&path)?.len() as usize;
        }
        Ok(total)
    }
}

fn validate_key(key: &str) -> StorageResult<()> {
    if key.is_empty()
        || key.contains('/')
        || key.contains('\\')
        || key.starts_with('.')
        || key.chars().any(char::is_control)
    {
        return Err(StorageError::Encoding(format!(
            "key {:?} is not a valid record name",
            key
        )));
    }
    Ok(())
}

fn is_record(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == RECORD_EXTENSION)
}

impl KeyValueStore for FileStorage {
    fn set(&self, key: &str, value: &str) -> StorageResult<()> {
        let path = self.record_path(key)?;

        if let Some(quota) = self.quota {
            let needed = self.used_bytes_excluding(&path)? + value.len();
            if needed > quota {
                return Err(StorageError::QuotaExceeded { needed, quota });
            }
        }

        let tmp_path = self.dir.join(format!("{}.{}", key, TEMP_EXTENSION));
        {
            let mut file = fs::File::create(&tmp_path)?;
            file.write_all(value.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&tmp_path, &path)?;

        debug!(key = %key, bytes = value.len(), "Wrote storage record");
        Ok(())
    }

    fn get(&self, key: &str) -> StorageResult<Option<String>> {
        let path = self.record_path(key)?;
        match fs::read(&path) {
            Ok(bytes) => String::from_utf8(bytes)
                .map(Some)
                .map_err(|e| StorageError::Encoding(e.to_string())),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn delete(&self, key: &str) -> StorageResult<bool> {
        let path = self.record_path(key)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn list_keys_with_prefix(&self, prefix: &str) -> StorageResult<Vec<String>> {
        let mut keys = Vec::new();
        for entry in fs::read_dir(&self.dir)? {
            let path = entry?.path();
            if !is_record(&path) {
                continue;
            }
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                if stem.starts_with(prefix) {
                    keys.push(stem.to_string());
                }
            }
        }
        keys.sort();
        Ok(keys)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_set_get_delete() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        assert_eq!(storage.get("missing").unwrap(), None);

        storage.set("k", "v1").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v1".to_string()));

        storage.set("k", "v2").unwrap();
        assert_eq!(storage.get("k").unwrap(), Some("v2".to_string()));

        assert!(storage.delete("k").unwrap());
        assert!(!storage.delete("k").unwrap());
        assert_eq!(storage.get("k").unwrap(), None);
    }

    #[test]
    fn test_records_survive_reopen() {
        let dir = tempdir().unwrap();
        {
            let storage = FileStorage::new(dir.path()).unwrap();
            storage.set("queue", r#"["a","b"]"#).unwrap();
        }
        let reopened = FileStorage::new(dir.path()).unwrap();
        assert_eq!(
            reopened.get("queue").unwrap(),
            Some(r#"["a","b"]"#.to_string())
        );
    }

    #[test]
    fn test_no_temp_file_left_behind() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.set("k", "value").unwrap();

        let leftovers: Vec<_> = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.path().to_string_lossy().ends_with(".tmp"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_invalid_keys_rejected() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();

        for key in ["", "../escape", "a/b", ".hidden"] {
            assert!(matches!(
                storage.set(key, "x"),
                Err(StorageError::Encoding(_))
            ));
        }
    }

    #[test]
    fn test_quota_refuses_oversized_write() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap().with_quota(10);

        storage.set("a", "12345").unwrap();
        let err = storage.set("b", "1234567").unwrap_err();
        assert!(matches!(
            err,
            StorageError::QuotaExceeded {
                needed: 12,
                quota: 10
            }
        ));

        // Rewriting an existing key only counts its new size.
        storage.set("a", "1234567890").unwrap();
        assert_eq!(storage.get("b").unwrap(), None);
    }

    #[test]
    fn test_list_keys_with_prefix() {
        let dir = tempdir().unwrap();
        let storage = FileStorage::new(dir.path()).unwrap();
        storage.set("spOutQueue_a_post2", "[]").unwrap();
        storage.set("spOutQueue_b_get", "[]").unwrap();
        storage.set("other", "[]").unwrap();

        let keys = storage.list_keys_with_prefix("spOutQueue_").unwrap();
        assert_eq!(keys, vec!["spOutQueue_a_post2", "spOutQueue_b_get"]);
    }
}
