//! Payload encoding for the two transport modes.

use crate::config::TransportMode;
use crate::entry::{BatchEntry, BeaconEntry, Entry, EventFields, FieldMap};
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use serde_json::Value;

/// Context field, serialized last in beacon query strings.
pub const CONTEXT_FIELD: &str = "co";

/// Base64 custom-data field, serialized after the context field.
pub const CUSTOM_DATA_FIELD: &str = "cx";

const LOW_PRIORITY_FIELDS: [&str; 2] = [CONTEXT_FIELD, CUSTOM_DATA_FIELD];

/// URI component set: everything except `A-Z a-z 0-9 - _ . ! ~ * ' ( )`.
const COMPONENT: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'!')
    .remove(b'~')
    .remove(b'*')
    .remove(b'\'')
    .remove(b'(')
    .remove(b')');

/// String form of a field value. Strings are taken verbatim, everything else
/// uses its JSON text (`12`, `true`, `null`).
pub fn field_to_string(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

/// Encode an event as a beacon query string.
///
/// Large, truncation-tolerant fields go last so a collector that cuts long
/// URLs still receives the small fixed fields.
pub fn encode_beacon(fields: &EventFields) -> BeaconEntry {
    let ordered = fields
        .iter()
        .filter(|(key, _)| !LOW_PRIORITY_FIELDS.contains(&key.as_str()))
        .chain(
            LOW_PRIORITY_FIELDS
                .iter()
                .filter_map(|key| fields.get_key_value(*key)),
        );

    let mut query = String::from("?");
    for (key, value) in ordered {
        if query.len() > 1 {
            query.push('&');
        }
        query.extend(utf8_percent_encode(key, COMPONENT));
        query.push('=');
        query.extend(utf8_percent_encode(&field_to_string(value), COMPONENT));
    }

    BeaconEntry::new(query)
}

/// Encode an event for batch submission, coercing every value to a string.
pub fn encode_batch_entry(fields: &EventFields) -> BatchEntry {
    let strings: FieldMap = fields
        .iter()
        .map(|(key, value)| (key.clone(), field_to_string(value)))
        .collect();
    BatchEntry::new(strings)
}

/// Encode an event for the given transport mode.
pub fn encode(fields: &EventFields, mode: TransportMode) -> Entry {
    match mode {
        TransportMode::Batch => Entry::Batch(encode_batch_entry(fields)),
        TransportMode::Beacon => Entry::Beacon(encode_beacon(fields)),
    }
}
