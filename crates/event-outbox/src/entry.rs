//! Buffered queue entries.

use std::collections::BTreeMap;

/// Raw event handed to the queue: field name to value.
pub type EventFields = BTreeMap<String, serde_json::Value>;

/// String-valued field mapping, as sent inside a batch.
pub type FieldMap = BTreeMap<String, String>;

/// An event prepared for batch submission.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchEntry {
    fields: FieldMap,
    size_bytes: usize,
}

impl BatchEntry {
    /// Wrap a string mapping, measuring its JSON size.
    pub fn new(fields: FieldMap) -> Self {
        let size_bytes = json_size(&fields);
        Self { fields, size_bytes }
    }

    #[cfg(test)]
    pub(crate) fn with_size(fields: FieldMap, size_bytes: usize) -> Self {
        Self { fields, size_bytes }
    }

    pub fn fields(&self) -> &FieldMap {
        &self.fields
    }

    /// Byte length of the entry's own JSON serialization. Used for budget
    /// accounting only; the batch envelope adds overhead this does not count.
    pub fn size_bytes(&self) -> usize {
        self.size_bytes
    }
}

/// An event prepared for beacon submission: a query string starting with `?`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BeaconEntry {
    query: String,
}

impl BeaconEntry {
    pub(crate) fn new(query: String) -> Self {
        Self { query }
    }

    /// Accepts only strings shaped like an encoded query.
    pub fn parse(query: &str) -> Option<Self> {
        query.starts_with('?').then(|| Self::new(query.to_string()))
    }

    pub fn query(&self) -> &str {
        &self.query
    }
}

/// One element of an outbound queue.
#[derive(Debug, Clone, PartialEq)]
pub enum Entry {
    Batch(BatchEntry),
    Beacon(BeaconEntry),
    /// A restored record element that matches neither shape. Kept in place
    /// until the drain engine reaches and discards it.
    Unrecognized(serde_json::Value),
}

impl Entry {
    pub fn is_recognized(&self) -> bool {
        !matches!(self, Entry::Unrecognized(_))
    }

    pub fn as_batch(&self) -> Option<&BatchEntry> {
        match self {
            Entry::Batch(entry) => Some(entry),
            _ => None,
        }
    }

    pub fn as_beacon(&self) -> Option<&BeaconEntry> {
        match self {
            Entry::Beacon(entry) => Some(entry),
            _ => None,
        }
    }
}

fn json_size(fields: &FieldMap) -> usize {
    // A map of strings always serializes.
    serde_json::to_vec(fields).map(|v| v.len()).unwrap_or(0)
}
