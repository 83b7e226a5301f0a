//! Records and per-field checksums used by validation.

use std::collections::BTreeMap;

use cutover_core::types::RecordId;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Field name used when a payload is not a JSON object.
const SCALAR_FIELD: &str = "_value";

/// A stored record: a primary key plus an opaque JSON payload.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Record {
    pub id: RecordId,
    pub payload: serde_json::Value,
}

impl Record {
    pub fn new(id: RecordId, payload: serde_json::Value) -> Self {
        Self { id, payload }
    }

    /// Approximate stored size in bytes.
    pub fn size_hint(&self) -> u64 {
        std::mem::size_of::<RecordId>() as u64 + self.payload.to_string().len() as u64
    }
}

/// Compute a SHA-256 hex digest of the given bytes.
pub fn sha256_hex(data: &[u8]) -> String {
    let hash = Sha256::digest(data);
    format!("{hash:x}")
}

/// SHA-256 of each top-level field of the record's payload.
///
/// `serde_json::Map` keeps keys sorted, so checksums are stable regardless
/// of the order fields were written in.
pub fn field_checksums(record: &Record) -> BTreeMap<String, String> {
    match &record.payload {
        serde_json::Value::Object(map) => map
            .iter()
            .map(|(k, v)| (k.clone(), sha256_hex(v.to_string().as_bytes())))
            .collect(),
        other => BTreeMap::from([(
            SCALAR_FIELD.to_string(),
            sha256_hex(other.to_string().as_bytes()),
        )]),
    }
}

/// Checksum of a whole record (id and payload).
pub fn record_checksum(record: &Record) -> String {
    let mut bytes = record.id.to_be_bytes().to_vec();
    bytes.extend_from_slice(record.payload.to_string().as_bytes());
    sha256_hex(&bytes)
}

/// Names of fields whose checksums differ between `expected` and `actual`,
/// including fields present on only one side.
pub fn diff_fields(expected: &Record, actual: &Record) -> Vec<String> {
    let a = field_checksums(expected);
    let b = field_checksums(actual);

    let mut diffs: Vec<String> = a
        .iter()
        .filter(|(k, sum)| b.get(*k) != Some(*sum))
        .map(|(k, _)| k.clone())
        .collect();
    diffs.extend(b.keys().filter(|k| !a.contains_key(*k)).cloned());
    diffs
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn empty_input_produces_known_hash() {
        assert_eq!(
            sha256_hex(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn identical_records_have_no_diffs() {
        let a = Record::new(1, json!({"species": "robin", "confidence": 0.9}));
        assert!(diff_fields(&a, &a.clone()).is_empty());
        assert_eq!(record_checksum(&a), record_checksum(&a.clone()));
    }

    #[test]
    fn changed_and_missing_fields_are_reported() {
        let a = Record::new(1, json!({"species": "robin", "confidence": 0.9}));
        let b = Record::new(1, json!({"species": "wren", "extra": true}));
        let diffs = diff_fields(&a, &b);
        assert_eq!(diffs, vec!["confidence", "species", "extra"]);
    }

    #[test]
    fn scalar_payloads_are_checksummed() {
        let a = Record::new(3, json!("raw"));
        let sums = field_checksums(&a);
        assert_eq!(sums.len(), 1);
        assert!(sums.contains_key("_value"));
    }
}
