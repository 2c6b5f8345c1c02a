//! Cheap digests used to decide which datasets need reconciling.

use sha2::{Digest, Sha256};

use crate::domain::{CollectionRecord, HistoryRecord};

/// Lowercase hex SHA-256.
pub fn digest(input: &str) -> String {
    hex::encode(Sha256::digest(input.as_bytes()))
}

pub fn settings_hash(blob: Option<&str>) -> String {
    digest(blob.unwrap_or_default())
}

/// Identity and open time of the most recently opened record.
pub fn history_hash(most_recent: Option<&HistoryRecord>) -> String {
    let input = most_recent
        .map(|r| {
            format!(
                "{}:{}:{}",
                r.key.source_id,
                r.key.item_id,
                r.last_opened_at.timestamp_millis()
            )
        })
        .unwrap_or_default();
    digest(&input)
}

pub fn collections_hash(records: &[CollectionRecord]) -> String {
    let mut identities: Vec<String> = records
        .iter()
        .map(|r| format!("{}:{}", r.key.source_id, r.key.item_id))
        .collect();
    identities.sort();
    digest(&identities.join(","))
}
