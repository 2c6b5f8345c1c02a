use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::{params, Connection, OptionalExtension, Row};
use rusqlite_migration::{Migrations, M};

use crate::app::{Result, TankobonError};
use crate::domain::{CollectionRecord, HistoryRecord, ItemKey};
use crate::store::Store;

const COLLECTION_COLUMNS: &str =
    "source_id, item_id, title, is_ended, latest_label, thumbnail";

const HISTORY_COLUMNS: &str = "source_id, item_id, title, thumbnail, latest_label, \
     last_read_chapter_id, last_read_page, last_opened_at, has_unread_update, updated_at";

pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    pub fn new<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    pub fn in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let store = Self {
            conn: Mutex::new(conn),
        };
        store.run_migrations()?;
        Ok(store)
    }

    fn run_migrations(&self) -> Result<()> {
        let migrations = Migrations::new(vec![M::up(include_str!(
            "../../migrations/001-initial/up.sql"
        ))]);

        let mut conn = self.conn()?;
        migrations.to_latest(&mut conn)?;

        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn.lock().map_err(|e| {
            TankobonError::Database(rusqlite::Error::SqliteFailure(
                rusqlite::ffi::Error::new(1),
                Some(e.to_string()),
            ))
        })
    }

    /// Fixed-width UTC timestamps so that stored values sort lexically.
    fn format_datetime(dt: &DateTime<Utc>) -> String {
        dt.to_rfc3339_opts(SecondsFormat::Millis, true)
    }

    fn parse_datetime(s: &str) -> Option<DateTime<Utc>> {
        DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.parse::<DateTime<Utc>>().ok())
    }

    fn collection_from_row(row: &Row<'_>) -> rusqlite::Result<CollectionRecord> {
        Ok(CollectionRecord {
            key: ItemKey {
                source_id: row.get(0)?,
                item_id: row.get(1)?,
            },
            title: row.get(2)?,
            is_ended: row.get::<_, i32>(3)? != 0,
            latest_label: row.get(4)?,
            thumbnail: row.get(5)?,
        })
    }

    fn history_from_row(row: &Row<'_>) -> rusqlite::Result<HistoryRecord> {
        Ok(HistoryRecord {
            key: ItemKey {
                source_id: row.get(0)?,
                item_id: row.get(1)?,
            },
            title: row.get(2)?,
            thumbnail: row.get(3)?,
            latest_label: row.get(4)?,
            last_read_chapter_id: row.get(5)?,
            last_read_page: row.get(6)?,
            last_opened_at: row
                .get::<_, String>(7)
                .ok()
                .and_then(|s| Self::parse_datetime(&s))
                .unwrap_or_else(Utc::now),
            has_unread_update: row.get::<_, i32>(8)? != 0,
            updated_at: row
                .get::<_, Option<String>>(9)?
                .and_then(|s| Self::parse_datetime(&s)),
        })
    }

    fn write_collection(conn: &Connection, record: &CollectionRecord) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO collections (source_id, item_id, title, is_ended, latest_label, thumbnail, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
             ON CONFLICT(source_id, item_id) DO UPDATE SET
                title = excluded.title,
                is_ended = excluded.is_ended,
                latest_label = excluded.latest_label,
                thumbnail = excluded.thumbnail",
            params![
                record.key.source_id,
                record.key.item_id,
                record.title,
                record.is_ended as i32,
                record.latest_label,
                record.thumbnail,
                Self::format_datetime(&Utc::now()),
            ],
        )
    }

    fn write_history(conn: &Connection, record: &HistoryRecord) -> rusqlite::Result<usize> {
        conn.execute(
            "INSERT INTO history (source_id, item_id, title, thumbnail, latest_label,
                last_read_chapter_id, last_read_page, last_opened_at, has_unread_update, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)
             ON CONFLICT(source_id, item_id) DO UPDATE SET
                title = excluded.title,
                thumbnail = excluded.thumbnail,
                latest_label = excluded.latest_label,
                last_read_chapter_id = excluded.last_read_chapter_id,
                last_read_page = excluded.last_read_page,
                last_opened_at = excluded.last_opened_at,
                has_unread_update = excluded.has_unread_update,
                updated_at = excluded.updated_at",
            params![
                record.key.source_id,
                record.key.item_id,
                record.title,
                record.thumbnail,
                record.latest_label,
                record.last_read_chapter_id,
                record.last_read_page,
                Self::format_datetime(&record.last_opened_at),
                record.has_unread_update as i32,
                record.updated_at.as_ref().map(Self::format_datetime),
            ],
        )
    }

    fn read_history(conn: &Connection, key: &ItemKey) -> rusqlite::Result<Option<HistoryRecord>> {
        conn.query_row(
            &format!(
                "SELECT {} FROM history WHERE source_id = ?1 AND item_id = ?2",
                HISTORY_COLUMNS
            ),
            params![key.source_id, key.item_id],
            Self::history_from_row,
        )
        .optional()
    }
}

impl Store for SqliteStore {
    fn upsert_collection(&self, record: &CollectionRecord) -> Result<()> {
        let conn = self.conn()?;
        Self::write_collection(&conn, record)?;
        Ok(())
    }

    fn insert_collections(&self, records: &[CollectionRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut count = 0;

        for record in records {
            count += Self::write_collection(&tx, record)?;
        }

        tx.commit()?;
        Ok(count)
    }

    fn get_collection(&self, key: &ItemKey) -> Result<Option<CollectionRecord>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM collections WHERE source_id = ?1 AND item_id = ?2",
                    COLLECTION_COLUMNS
                ),
                params![key.source_id, key.item_id],
                Self::collection_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn get_all_collections(&self) -> Result<Vec<CollectionRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM collections ORDER BY created_at, source_id, item_id",
            COLLECTION_COLUMNS
        ))?;

        let records = stmt
            .query_map([], Self::collection_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn delete_collection(&self, key: &ItemKey) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "DELETE FROM collections WHERE source_id = ?1 AND item_id = ?2",
            params![key.source_id, key.item_id],
        )?;
        Ok(())
    }

    fn upsert_history(&self, record: &HistoryRecord) -> Result<()> {
        let conn = self.conn()?;
        Self::write_history(&conn, record)?;
        Ok(())
    }

    fn merge_history(&self, records: &[HistoryRecord]) -> Result<usize> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;
        let mut applied = 0;

        for record in records {
            let keep_local = match Self::read_history(&tx, &record.key)? {
                Some(local) => !local.is_superseded_by(record),
                None => false,
            };
            if !keep_local {
                applied += Self::write_history(&tx, record)?;
            }
        }

        tx.commit()?;
        Ok(applied)
    }

    fn get_history(&self, key: &ItemKey) -> Result<Option<HistoryRecord>> {
        let conn = self.conn()?;
        Ok(Self::read_history(&conn, key)?)
    }

    fn get_all_history(&self) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM history ORDER BY last_opened_at DESC",
            HISTORY_COLUMNS
        ))?;

        let records = stmt
            .query_map([], Self::history_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn history_opened_since(&self, since: Option<DateTime<Utc>>) -> Result<Vec<HistoryRecord>> {
        let conn = self.conn()?;

        // With no cursor every record is pending.
        let since = since
            .as_ref()
            .map(Self::format_datetime)
            .unwrap_or_default();

        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM history WHERE last_opened_at > ?1 ORDER BY last_opened_at",
            HISTORY_COLUMNS
        ))?;

        let records = stmt
            .query_map(params![since], Self::history_from_row)?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(records)
    }

    fn most_recent_history(&self) -> Result<Option<HistoryRecord>> {
        let conn = self.conn()?;

        let result = conn
            .query_row(
                &format!(
                    "SELECT {} FROM history ORDER BY last_opened_at DESC, source_id, item_id LIMIT 1",
                    HISTORY_COLUMNS
                ),
                [],
                Self::history_from_row,
            )
            .optional()?;

        Ok(result)
    }

    fn get_meta(&self, key: &str) -> Result<Option<String>> {
        let conn = self.conn()?;

        let value = conn
            .query_row(
                "SELECT value FROM meta WHERE key = ?1",
                params![key],
                |row| row.get(0),
            )
            .optional()?;

        Ok(value)
    }

    fn set_meta(&self, key: &str, value: &str) -> Result<()> {
        let conn = self.conn()?;

        conn.execute(
            "INSERT INTO meta (key, value) VALUES (?1, ?2)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value",
            params![key, value],
        )?;
        Ok(())
    }

    fn delete_meta(&self, key: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute("DELETE FROM meta WHERE key = ?1", params![key])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn collection(source: &str, id: &str) -> CollectionRecord {
        CollectionRecord {
            key: ItemKey::new(source, id),
            title: format!("Title {}", id),
            is_ended: false,
            latest_label: Some("Ch. 1".into()),
            thumbnail: None,
        }
    }

    fn history(source: &str, id: &str, opened_at: DateTime<Utc>) -> HistoryRecord {
        HistoryRecord {
            key: ItemKey::new(source, id),
            title: format!("Title {}", id),
            thumbnail: None,
            latest_label: Some("Ch. 1".into()),
            last_read_chapter_id: Some("c1".into()),
            last_read_page: Some(3),
            last_opened_at: opened_at,
            has_unread_update: false,
            updated_at: None,
        }
    }

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    #[test]
    fn test_upsert_and_get_collection() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_collection(&collection("mangasee", "a")).unwrap();

        let key = ItemKey::new("mangasee", "a");
        let retrieved = store.get_collection(&key).unwrap().unwrap();
        assert_eq!(retrieved.title, "Title a");

        let mut changed = collection("mangasee", "a");
        changed.latest_label = Some("Ch. 2".into());
        store.upsert_collection(&changed).unwrap();

        let retrieved = store.get_collection(&key).unwrap().unwrap();
        assert_eq!(retrieved.latest_label.as_deref(), Some("Ch. 2"));
        assert_eq!(store.get_all_collections().unwrap().len(), 1);
    }

    #[test]
    fn test_delete_collection() {
        let store = SqliteStore::in_memory().unwrap();
        store
            .insert_collections(&[collection("a", "1"), collection("a", "2")])
            .unwrap();

        store.delete_collection(&ItemKey::new("a", "1")).unwrap();

        let remaining = store.get_all_collections().unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].key.item_id, "2");
    }

    #[test]
    fn test_history_roundtrip_keeps_fields() {
        let store = SqliteStore::in_memory().unwrap();
        let mut record = history("a", "1", at(0));
        record.has_unread_update = true;
        record.updated_at = Some(at(5));
        store.upsert_history(&record).unwrap();

        let retrieved = store.get_history(&record.key).unwrap().unwrap();
        assert_eq!(retrieved, record);
    }

    #[test]
    fn test_merge_history_last_write_wins() {
        let store = SqliteStore::in_memory().unwrap();
        let local = history("a", "1", at(100));
        store.upsert_history(&local).unwrap();

        let mut stale = history("a", "1", at(50));
        stale.last_read_page = Some(1);
        assert_eq!(store.merge_history(&[stale]).unwrap(), 0);
        assert_eq!(
            store.get_history(&local.key).unwrap().unwrap().last_read_page,
            Some(3)
        );

        let mut fresh = history("a", "1", at(200));
        fresh.last_read_page = Some(9);
        assert_eq!(store.merge_history(&[fresh.clone()]).unwrap(), 1);
        assert_eq!(store.get_history(&local.key).unwrap().unwrap(), fresh);

        // Replaying the same canonical record is harmless.
        assert_eq!(store.merge_history(&[fresh.clone()]).unwrap(), 1);
        assert_eq!(store.get_all_history().unwrap().len(), 1);
    }

    #[test]
    fn test_history_opened_since() {
        let store = SqliteStore::in_memory().unwrap();
        store.upsert_history(&history("a", "old", at(0))).unwrap();
        store.upsert_history(&history("a", "new", at(60))).unwrap();

        assert_eq!(store.history_opened_since(None).unwrap().len(), 2);

        let pending = store.history_opened_since(Some(at(30))).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].key.item_id, "new");

        assert!(store
            .history_opened_since(Some(at(60) + Duration::seconds(1)))
            .unwrap()
            .is_empty());
    }

    #[test]
    fn test_most_recent_history() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.most_recent_history().unwrap().is_none());

        store.upsert_history(&history("a", "1", at(10))).unwrap();
        store.upsert_history(&history("b", "2", at(20))).unwrap();
        store.upsert_history(&history("c", "3", at(5))).unwrap();

        let recent = store.most_recent_history().unwrap().unwrap();
        assert_eq!(recent.key, ItemKey::new("b", "2"));
    }

    #[test]
    fn test_meta_set_get_delete() {
        let store = SqliteStore::in_memory().unwrap();
        assert!(store.get_meta("session_token").unwrap().is_none());

        store.set_meta("session_token", "abc").unwrap();
        store.set_meta("session_token", "def").unwrap();
        assert_eq!(
            store.get_meta("session_token").unwrap().as_deref(),
            Some("def")
        );

        store.delete_meta("session_token").unwrap();
        assert!(store.get_meta("session_token").unwrap().is_none());
    }

    #[test]
    fn test_on_disk_store_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("tankobon.db");

        {
            let store = SqliteStore::new(&path).unwrap();
            store.upsert_collection(&collection("a", "1")).unwrap();
        }

        let store = SqliteStore::new(&path).unwrap();
        assert_eq!(store.get_all_collections().unwrap().len(), 1);
    }
}
