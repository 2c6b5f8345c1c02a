//! Local mutations of the saved collection and reading history. Remote
//! collection changes are pushed best-effort; history reaches the server
//! through the sync engine.

use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, warn};

use crate::api::wire::CollectionRef;
use crate::app::Result;
use crate::cache::CacheLayer;
use crate::domain::{CollectionRecord, HistoryRecord, Item, ItemKey};
use crate::store::Store;
use crate::sync::SyncEngine;

pub struct Library<S: Store + Send + Sync + 'static> {
    cache: Arc<CacheLayer>,
    store: Arc<S>,
    sync: Arc<SyncEngine<S>>,
}

impl<S: Store + Send + Sync + 'static> Library<S> {
    pub fn new(cache: Arc<CacheLayer>, store: Arc<S>, sync: Arc<SyncEngine<S>>) -> Self {
        Self { cache, store, sync }
    }

    pub fn collections(&self) -> Result<Vec<CollectionRecord>> {
        self.store.get_all_collections()
    }

    /// Most recently opened first.
    pub fn history(&self) -> Result<Vec<HistoryRecord>> {
        self.store.get_all_history()
    }

    pub fn is_saved(&self, source_id: &str, item_id: &str) -> Result<bool> {
        Ok(self
            .store
            .get_collection(&ItemKey::new(source_id, item_id))?
            .is_some())
    }

    /// Saves `item` and makes sure it has a history record for the
    /// freshness engine to compare against.
    pub async fn save_item(&self, source_id: &str, item: &Item) -> Result<CollectionRecord> {
        let record = CollectionRecord::from_item(source_id, item);
        self.store.upsert_collection(&record)?;

        match self.store.get_history(&record.key)? {
            Some(mut history) => {
                let summary = item.summary();
                history.title = summary.title.clone();
                history.thumbnail = summary.thumbnail.clone();
                history.latest_label = summary.latest_label.clone();
                self.store.upsert_history(&history)?;
            }
            None => {
                self.store
                    .upsert_history(&HistoryRecord::from_item(source_id, item))?;
                self.sync.mark_history_changed();
            }
        }
        debug!("Saved {}", record.key);

        if let Ok(endpoint) = self.sync.session_endpoint() {
            let refs = [CollectionRef::from(&record.key)];
            if let Err(e) = self
                .cache
                .registry()
                .api()
                .add_collections(&endpoint, &refs)
                .await
            {
                let e = self.sync.check_auth(e);
                warn!("Failed to upload saved item {}: {}", record.key, e);
            }
        }

        Ok(record)
    }

    /// Returns whether anything was removed locally.
    pub async fn unsave_item(&self, source_id: &str, item_id: &str) -> Result<bool> {
        let key = ItemKey::new(source_id, item_id);
        let existed = self.store.get_collection(&key)?.is_some();
        self.store.delete_collection(&key)?;
        debug!("Unsaved {}", key);

        if let Ok(endpoint) = self.sync.session_endpoint() {
            if let Err(e) = self
                .cache
                .registry()
                .api()
                .delete_collection(&endpoint, &CollectionRef::from(&key))
                .await
            {
                let e = self.sync.check_auth(e);
                warn!("Failed to remove {} remotely: {}", key, e);
            }
        }

        Ok(existed)
    }

    /// Records that `chapter_id` (and optionally `page`) of `item` was just
    /// opened. Schedules an urgent sync.
    pub fn record_progress(
        &self,
        source_id: &str,
        item: &Item,
        chapter_id: &str,
        page: Option<i64>,
    ) -> Result<HistoryRecord> {
        let key = ItemKey::new(source_id, item.id());
        let summary = item.summary();

        let mut record = self
            .store
            .get_history(&key)?
            .unwrap_or_else(|| HistoryRecord::from_item(source_id, item));
        record.title = summary.title.clone();
        record.thumbnail = summary.thumbnail.clone();
        if summary.latest_label.is_some() {
            record.latest_label = summary.latest_label.clone();
        }
        record.last_read_chapter_id = Some(chapter_id.to_string());
        record.last_read_page = page;
        record.last_opened_at = Utc::now();
        record.has_unread_update = false;

        self.store.upsert_history(&record)?;
        self.sync.mark_history_changed();
        Ok(record)
    }

    /// Clears the new-chapter flag. Returns whether it was set.
    pub fn mark_seen(&self, source_id: &str, item_id: &str) -> Result<bool> {
        let key = ItemKey::new(source_id, item_id);
        match self.store.get_history(&key)? {
            Some(mut record) if record.has_unread_update => {
                record.has_unread_update = false;
                self.store.upsert_history(&record)?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
