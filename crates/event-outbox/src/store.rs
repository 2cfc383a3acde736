//! Durable record of a queue's entries.
//!
//! The whole queue is one JSON array stored under a key derived from
//! `{product, namespace, transport mode}`. Every save rewrites the record.
//!
//! Batch entries are stored as `{"evt": {...}, "bytes": n}`, beacon entries as
//! their query string. Elements that match neither shape decode to
//! [`Entry::Unrecognized`] instead of failing the whole record.

use crate::config::TransportMode;
use crate::entry::{BatchEntry, BeaconEntry, Entry, FieldMap};
use outbox_storage::{KeyValueStore, StorageError, StorageKeys};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use thiserror::Error;
use tracing::{debug, warn};

/// Why a durable record could not be turned into a queue.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The backend could not be read
    #[error("queue record unavailable: {0}")]
    Unavailable(#[from] StorageError),

    /// The record is not JSON
    #[error("queue record is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),

    /// The record is JSON but not an array
    #[error("queue record is not a sequence (found {0})")]
    NotASequence(&'static str),
}

#[derive(Serialize)]
struct StoredBatchEntryRef<'a> {
    evt: &'a FieldMap,
    bytes: usize,
}

#[derive(Deserialize)]
struct StoredBatchEntry {
    evt: FieldMap,
}

/// Persists one queue identity into a key-value backend.
pub struct DurableStore {
    backend: Arc<dyn KeyValueStore>,
    key: String,
    mode: TransportMode,
    max_persisted_entries: usize,
}

impl DurableStore {
    pub fn new(
        backend: Arc<dyn KeyValueStore>,
        product: &str,
        namespace: &str,
        mode: TransportMode,
        max_persisted_entries: usize,
    ) -> Self {
        Self {
            backend,
            key: StorageKeys::queue(product, namespace, mode.storage_suffix()),
            mode,
            max_persisted_entries,
        }
    }

    /// Storage key of this queue's record.
    pub fn key(&self) -> &str {
        &self.key
    }

    /// Read and decode the record. A missing record is an empty queue.
    pub fn load(&self) -> Result<VecDeque<Entry>, DecodeError> {
        match self.backend.get(&self.key)? {
            Some(raw) => decode_queue(&raw, self.mode),
            None => Ok(VecDeque::new()),
        }
    }

    /// Rewrite the record from `entries`. Returns whether every entry made
    /// it into the record; failures are logged and otherwise ignored.
    ///
    /// Only the oldest `max_persisted_entries` are written. A queue longer
    /// than the cap still gets its head recorded but reports `false`, since
    /// the tail would not survive a restart.
    pub fn save<'a, I>(&self, entries: I) -> bool
    where
        I: IntoIterator<Item = &'a Entry>,
    {
        let mut entries: Vec<&Entry> = entries.into_iter().collect();
        let dropped = entries.len().saturating_sub(self.max_persisted_entries);
        entries.truncate(self.max_persisted_entries);

        let raw = match encode_queue(entries) {
            Ok(raw) => raw,
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to serialize queue");
                return false;
            }
        };

        match self.backend.set(&self.key, &raw) {
            Ok(()) if dropped > 0 => {
                warn!(
                    key = %self.key,
                    dropped = dropped,
                    max_persisted_entries = self.max_persisted_entries,
                    "Queue exceeds persisted-entry cap"
                );
                false
            }
            Ok(()) => {
                debug!(key = %self.key, bytes = raw.len(), "Persisted queue");
                true
            }
            Err(e) => {
                warn!(key = %self.key, error = %e, "Failed to persist queue");
                false
            }
        }
    }
}

/// Decode a raw record for the given mode.
pub fn decode_queue(raw: &str, mode: TransportMode) -> Result<VecDeque<Entry>, DecodeError> {
    let value: Value = serde_json::from_str(raw)?;
    let items = match value {
        Value::Array(items) => items,
        other => return Err(DecodeError::NotASequence(json_kind(&other))),
    };
    Ok(items.into_iter().map(|item| decode_entry(item, mode)).collect())
}

fn decode_entry(item: Value, mode: TransportMode) -> Entry {
    match mode {
        TransportMode::Batch => match StoredBatchEntry::deserialize(&item) {
            // Size is re-derived rather than trusted from the record.
            Ok(stored) => Entry::Batch(BatchEntry::new(stored.evt)),
            Err(_) => Entry::Unrecognized(item),
        },
        TransportMode::Beacon => match item.as_str().and_then(BeaconEntry::parse) {
            Some(entry) => Entry::Beacon(entry),
            None => Entry::Unrecognized(item),
        },
    }
}

/// Serialize entries as a record.
pub fn encode_queue<'a, I>(entries: I) -> serde_json::Result<String>
where
    I: IntoIterator<Item = &'a Entry>,
{
    let values = entries
        .into_iter()
        .map(|entry| match entry {
            Entry::Batch(batch) => serde_json::to_value(StoredBatchEntryRef {
                evt: batch.fields(),
                bytes: batch.size_bytes(),
            }),
            Entry::Beacon(beacon) => Ok(Value::String(beacon.query().to_string())),
            Entry::Unrecognized(raw) => Ok(raw.clone()),
        })
        .collect::<serde_json::Result<Vec<Value>>>()?;
    serde_json::to_string(&values)
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
