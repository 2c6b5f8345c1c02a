pub mod sqlite;

use chrono::{DateTime, Utc};

use crate::app::Result;
use crate::domain::{CollectionRecord, HistoryRecord, ItemKey};

pub use sqlite::SqliteStore;

/// Well-known keys of the `meta` table.
pub mod keys {
    pub const SETTINGS: &str = "settings";
    pub const SESSION_TOKEN: &str = "session_token";
    pub const HISTORY_CURSOR: &str = "history_cursor";
}

/// Local persisted store shared by the UI, freshness engine and sync engine.
///
/// Every write is an upsert keyed by `(source_id, item_id)`.
pub trait Store {
    // Collection operations
    fn upsert_collection(&self, record: &CollectionRecord) -> Result<()>;
    fn insert_collections(&self, records: &[CollectionRecord]) -> Result<usize>;
    fn get_collection(&self, key: &ItemKey) -> Result<Option<CollectionRecord>>;
    fn get_all_collections(&self) -> Result<Vec<CollectionRecord>>;
    fn delete_collection(&self, key: &ItemKey) -> Result<()>;

    // History operations
    fn upsert_history(&self, record: &HistoryRecord) -> Result<()>;
    fn merge_history(&self, records: &[HistoryRecord]) -> Result<usize>;
    fn get_history(&self, key: &ItemKey) -> Result<Option<HistoryRecord>>;
    fn get_all_history(&self) -> Result<Vec<HistoryRecord>>;
    fn history_opened_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<HistoryRecord>>;
    fn most_recent_history(&self) -> Result<Option<HistoryRecord>>;

    // Key/value operations
    fn get_meta(&self, key: &str) -> Result<Option<String>>;
    fn set_meta(&self, key: &str, value: &str) -> Result<()>;
    fn delete_meta(&self, key: &str) -> Result<()>;
}
