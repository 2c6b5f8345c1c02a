//! Background refresh of saved items: re-fetches metadata for every
//! collection record and flags new chapters in the reading history.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use chrono::Utc;
use futures::future::join_all;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::app::events::{EngineEvent, EventBus};
use crate::app::Result;
use crate::cache::CacheLayer;
use crate::domain::{CollectionRecord, FreshnessState, Item, ItemKey};
use crate::store::Store;

/// What a refreshed item turned out to need.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Change {
    None,
    /// Title, thumbnail or ended flag changed.
    Patched,
    /// Latest chapter label changed.
    NewChapter,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RefreshReport {
    pub total: usize,
    pub processed: usize,
    pub new_chapters: usize,
    pub patched: usize,
    pub failed_batches: usize,
}

/// Resets the running flag however `refresh` exits.
struct RunGuard<'a> {
    running: &'a AtomicBool,
    state: &'a RwLock<FreshnessState>,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.write();
        state.is_running = false;
        state.last_run_at = Some(Utc::now());
        self.running.store(false, Ordering::SeqCst);
    }
}

pub struct FreshnessEngine<S: Store + Send + Sync + 'static> {
    cache: Arc<CacheLayer>,
    store: Arc<S>,
    events: EventBus,
    running: AtomicBool,
    state: RwLock<FreshnessState>,
}

impl<S: Store + Send + Sync + 'static> FreshnessEngine<S> {
    pub fn new(cache: Arc<CacheLayer>, store: Arc<S>, events: EventBus) -> Self {
        Self {
            cache,
            store,
            events,
            running: AtomicBool::new(false),
            state: RwLock::new(FreshnessState::default()),
        }
    }

    pub fn state(&self) -> FreshnessState {
        self.state.read().clone()
    }

    /// Refreshes every saved item. Returns `Ok(None)` when a refresh is
    /// already in flight.
    pub async fn refresh(&self) -> Result<Option<RefreshReport>> {
        if self
            .running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Collection refresh already running");
            return Ok(None);
        }
        let _guard = RunGuard {
            running: &self.running,
            state: &self.state,
        };
        {
            let mut state = self.state.write();
            state.is_running = true;
            state.progress_label = None;
        }

        let records = self.store.get_all_collections()?;
        let total = records.len();

        let mut by_source: BTreeMap<String, Vec<CollectionRecord>> = BTreeMap::new();
        for record in records {
            by_source
                .entry(record.key.source_id.clone())
                .or_default()
                .push(record);
        }

        info!(
            "Refreshing {} saved items across {} sources",
            total,
            by_source.len()
        );

        let processed = AtomicUsize::new(0);
        let reports = join_all(
            by_source
                .into_iter()
                .map(|(source_id, records)| self.refresh_source(source_id, records, total, &processed)),
        )
        .await;

        let mut report = RefreshReport {
            total,
            ..Default::default()
        };
        for r in reports {
            report.processed += r.processed;
            report.new_chapters += r.new_chapters;
            report.patched += r.patched;
            report.failed_batches += r.failed_batches;
        }

        info!(
            "Refresh complete: {} new chapters, {} patched, {} failed batches",
            report.new_chapters, report.patched, report.failed_batches
        );
        self.events.emit(EngineEvent::FreshnessFinished {
            updated: report.new_chapters,
        });
        Ok(Some(report))
    }

    /// Unfinished items first, then in chunks of the source's recommended
    /// size (0 means one batch).
    async fn refresh_source(
        &self,
        source_id: String,
        mut records: Vec<CollectionRecord>,
        total: usize,
        processed: &AtomicUsize,
    ) -> RefreshReport {
        let mut report = RefreshReport::default();

        records.sort_by_key(|r| r.is_ended);

        let chunk_size = match self.cache.registry().get(&source_id) {
            Some(source) => {
                self.cache.try_initialize(&source).await;
                source.recommended_chunk_size()
            }
            None => 0,
        };
        let chunk_size = if chunk_size == 0 {
            records.len().max(1)
        } else {
            chunk_size
        };

        for chunk in records.chunks(chunk_size) {
            let ids: Vec<String> = chunk.iter().map(|r| r.key.item_id.clone()).collect();
            let result = self.cache.get_details(&source_id, &ids, false, false).await;

            let done = processed.fetch_add(chunk.len(), Ordering::SeqCst) + chunk.len();
            report.processed += chunk.len();
            self.state.write().progress_label = Some(format!("{}/{}", done, total));
            self.events.emit(EngineEvent::FreshnessProgress {
                processed: done,
                total,
            });

            match result {
                Ok(items) => {
                    for item in &items {
                        match self.apply(&source_id, item) {
                            Ok(Change::NewChapter) => report.new_chapters += 1,
                            Ok(Change::Patched) => report.patched += 1,
                            Ok(Change::None) => {}
                            Err(e) => warn!("Failed to store refresh of {}: {}", item.id(), e),
                        }
                    }
                }
                Err(e) => {
                    warn!("Refresh batch for {} failed: {}", source_id, e);
                    report.failed_batches += 1;
                }
            }
        }

        report
    }

    fn apply(&self, source_id: &str, item: &Item) -> Result<Change> {
        let key = ItemKey::new(source_id, item.id());
        // Unsaved since the refresh started
        let Some(mut collection) = self.store.get_collection(&key)? else {
            return Ok(Change::None);
        };
        let history = self.store.get_history(&key)?;
        let summary = item.summary();

        let known_label = match &history {
            Some(h) => h.latest_label.as_ref(),
            None => collection.latest_label.as_ref(),
        };
        let label_changed =
            summary.latest_label.is_some() && summary.latest_label.as_ref() != known_label;

        let patched = collection.title != summary.title
            || collection.thumbnail != summary.thumbnail
            || collection.is_ended != summary.is_ended;

        if !label_changed && !patched {
            return Ok(Change::None);
        }

        collection.title = summary.title.clone();
        collection.thumbnail = summary.thumbnail.clone();
        collection.is_ended = summary.is_ended;
        if label_changed {
            collection.latest_label = summary.latest_label.clone();
        }
        self.store.upsert_collection(&collection)?;

        if let Some(mut history) = history {
            history.title = summary.title.clone();
            history.thumbnail = summary.thumbnail.clone();
            if label_changed {
                history.latest_label = summary.latest_label.clone();
                history.updated_at = Some(Utc::now());
                history.has_unread_update = true;
            }
            self.store.upsert_history(&history)?;
        }

        if label_changed {
            debug!("New chapter for {}", key);
            Ok(Change::NewChapter)
        } else {
            Ok(Change::Patched)
        }
    }
}
