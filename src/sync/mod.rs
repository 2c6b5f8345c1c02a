//! Hash-based reconciliation of settings, history and collections with
//! the sync server.
//!
//! A pass compares three digests and only reconciles the datasets that
//! differ, in the order settings, history, collections. Phase failures
//! are logged and skipped; a 401 ends the pass and the session.

pub mod hash;
mod session;

use std::collections::{BTreeMap, HashSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::wire::{CollectionRef, SyncHashes};
use crate::api::Endpoint;
use crate::app::events::{EngineEvent, EventBus};
use crate::app::{Result, TankobonError};
use crate::cache::CacheLayer;
use crate::domain::{CollectionRecord, HistoryRecord, ItemKey, SyncPhase, SyncState};
use crate::store::{keys, Store};

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_secs(5);
pub const DEFAULT_SYNC_INTERVAL: Duration = Duration::from_secs(30);
/// Outcome of mirroring the remote collection set.
struct CollectionsMerge {
    added: usize,
    removed: usize,
    /// Remote items that could not be fetched or whose source is unknown
    unresolved: usize,
}

/// Upper bound on `Is-Next` continuations in one history exchange.
pub const MAX_HISTORY_PAGES: u32 = 100;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncReport {
    /// Phases whose hashes differed, in the order they ran
    pub reconciled: Vec<SyncPhase>,
    pub failed: Vec<SyncPhase>,
    pub history_merged: usize,
    pub collections_added: usize,
    pub collections_removed: usize,
}

impl SyncReport {
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }
}

/// Clears the in-flight state and stamps `last_sync_at` however a pass
/// ends.
struct SyncGuard<'a> {
    in_flight: &'a AtomicBool,
    history_changed: &'a AtomicBool,
    state: &'a RwLock<SyncState>,
}

impl Drop for SyncGuard<'_> {
    fn drop(&mut self) {
        let mut state = self.state.write();
        state.is_syncing = false;
        state.current_phase = None;
        state.last_sync_at = Some(Utc::now());
        self.history_changed.store(false, Ordering::SeqCst);
        self.in_flight.store(false, Ordering::SeqCst);
    }
}

pub struct SyncEngine<S: Store + Send + Sync + 'static> {
    cache: Arc<CacheLayer>,
    store: Arc<S>,
    events: EventBus,
    in_flight: AtomicBool,
    history_changed: AtomicBool,
    state: RwLock<SyncState>,
}

impl<S: Store + Send + Sync + 'static> SyncEngine<S> {
    pub fn new(cache: Arc<CacheLayer>, store: Arc<S>, events: EventBus) -> Self {
        Self {
            cache,
            store,
            events,
            in_flight: AtomicBool::new(false),
            history_changed: AtomicBool::new(false),
            state: RwLock::new(SyncState::default()),
        }
    }

    pub fn state(&self) -> SyncState {
        self.state.read().clone()
    }

    /// Requests a sync on the next debounce tick.
    pub fn mark_history_changed(&self) {
        self.history_changed.store(true, Ordering::SeqCst);
    }

    pub fn history_changed(&self) -> bool {
        self.history_changed.load(Ordering::SeqCst)
    }

    /// The locally stored settings blob, decoded.
    pub fn local_settings(&self) -> Result<Option<Vec<u8>>> {
        match self.store.get_meta(keys::SETTINGS)? {
            Some(blob) => Ok(Some(BASE64.decode(blob.as_bytes())?)),
            None => Ok(None),
        }
    }

    /// Replaces the local settings blob and uploads it when logged in, so
    /// the next pass finds the hashes equal.
    pub async fn update_settings(&self, settings: &[u8]) -> Result<()> {
        let blob = BASE64.encode(settings);
        self.store.set_meta(keys::SETTINGS, &blob)?;

        if let Ok(endpoint) = self.session_endpoint() {
            let api = self.cache.registry().api();
            if let Err(e) = api.put_settings(&endpoint, &blob).await {
                let e = self.check_auth(e);
                warn!("Failed to upload settings: {}", e);
            }
        }
        Ok(())
    }

    pub fn local_hashes(&self) -> Result<SyncHashes> {
        let settings = self.store.get_meta(keys::SETTINGS)?;
        let recent = self.store.most_recent_history()?;
        let collections = self.store.get_all_collections()?;
        Ok(SyncHashes {
            settings: hash::settings_hash(settings.as_deref()),
            history: hash::history_hash(recent.as_ref()),
            collections: hash::collections_hash(&collections),
        })
    }

    /// Whether a sync is due: history changed since the last pass, or
    /// `every` has elapsed since it.
    pub fn is_due(&self, every: Duration) -> bool {
        if self.history_changed() {
            return true;
        }
        match self.state.read().last_sync_at {
            Some(last) => (Utc::now() - last).to_std().unwrap_or_default() >= every,
            None => true,
        }
    }

    /// Trigger loop: checks every `debounce` whether a pass is due.
    pub async fn run(self: Arc<Self>, debounce: Duration, every: Duration) {
        let mut timer = interval(debounce);
        loop {
            timer.tick().await;
            if !self.is_due(every) || !self.is_logged_in() {
                continue;
            }
            match self.sync().await {
                Ok(Some(report)) if !report.is_success() => {
                    debug!("Sync finished with failed phases: {:?}", report.failed)
                }
                Ok(_) => {}
                Err(e) => warn!("Sync failed: {}", e),
            }
        }
    }

    /// Runs one reconciliation pass. Returns `Ok(None)` when a pass is
    /// already in flight.
    pub async fn sync(&self) -> Result<Option<SyncReport>> {
        let endpoint = self.session_endpoint()?;

        if self
            .in_flight
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("Sync already in flight");
            return Ok(None);
        }
        let _guard = SyncGuard {
            in_flight: &self.in_flight,
            history_changed: &self.history_changed,
            state: &self.state,
        };
        self.state.write().is_syncing = true;

        let result = self.reconcile(&endpoint).await;
        let success = matches!(&result, Ok(report) if report.is_success());
        self.events.emit(EngineEvent::SyncFinished { success });

        match result {
            Ok(report) => {
                info!(
                    "Sync complete: {} phases reconciled, {} failed",
                    report.reconciled.len(),
                    report.failed.len()
                );
                Ok(Some(report))
            }
            Err(e) => Err(self.check_auth(e)),
        }
    }

    fn enter(&self, phase: SyncPhase) {
        debug!("Sync phase: {}", phase);
        self.state.write().current_phase = Some(phase);
        self.events.emit(EngineEvent::SyncPhase(phase));
    }

    async fn reconcile(&self, endpoint: &Endpoint) -> Result<SyncReport> {
        let mut report = SyncReport::default();

        self.enter(SyncPhase::Comparing);
        let local = self.local_hashes()?;
        let remote = self
            .cache
            .registry()
            .api()
            .sync_hashes(endpoint)
            .await
            .map_err(|e| phase_error(SyncPhase::Comparing, e))?;

        if local.settings != remote.settings {
            self.enter(SyncPhase::Settings);
            report.reconciled.push(SyncPhase::Settings);
            let outcome = self.sync_settings(endpoint).await;
            self.settle(SyncPhase::Settings, outcome, &mut report)?;
        }

        if local.history != remote.history {
            self.enter(SyncPhase::History);
            report.reconciled.push(SyncPhase::History);
            match self.sync_history(endpoint).await {
                Ok(merged) => report.history_merged = merged,
                Err(e) => self.settle(SyncPhase::History, Err(e), &mut report)?,
            }
        }

        if local.collections != remote.collections {
            self.enter(SyncPhase::Collections);
            report.reconciled.push(SyncPhase::Collections);
            match self.sync_collections(endpoint).await {
                Ok(merge) => {
                    report.collections_added = merge.added;
                    report.collections_removed = merge.removed;
                    if merge.unresolved > 0 {
                        warn!(
                            "Sync {} phase left {} remote items unresolved",
                            SyncPhase::Collections,
                            merge.unresolved
                        );
                        report.failed.push(SyncPhase::Collections);
                    }
                }
                Err(e) => self.settle(SyncPhase::Collections, Err(e), &mut report)?,
            }
        }

        Ok(report)
    }

    /// Records a failed phase. A rejected session aborts the whole pass.
    fn settle(
        &self,
        phase: SyncPhase,
        outcome: Result<()>,
        report: &mut SyncReport,
    ) -> Result<()> {
        match outcome {
            Ok(()) => Ok(()),
            Err(e) if e.is_unauthorized() => Err(e),
            Err(e) => {
                warn!("Sync {} phase failed: {}", phase, e);
                report.failed.push(phase);
                Ok(())
            }
        }
    }

    /// Remote settings are authoritative once fetched.
    async fn sync_settings(&self, endpoint: &Endpoint) -> Result<()> {
        let api = self.cache.registry().api();
        let blob = api.get_settings(endpoint).await?;
        BASE64.decode(blob.as_bytes())?;
        self.store.set_meta(keys::SETTINGS, &blob)?;
        api.put_settings(endpoint, &blob).await
    }

    /// Uploads records opened since the cursor, page by page, and merges
    /// the server's canonical records. The cursor only advances once every
    /// page went through.
    async fn sync_history(&self, endpoint: &Endpoint) -> Result<usize> {
        let api = self.cache.registry().api();
        let since = self.history_cursor()?;
        let started = Utc::now();
        let changed = self.store.history_opened_since(since)?;
        debug!("Uploading {} changed history records", changed.len());

        let mut merged = 0;
        let mut page = 1;
        loop {
            let body: &[HistoryRecord] = if page == 1 { &changed } else { &[] };
            let response = api.post_history(endpoint, since, page, body).await?;
            merged += self.store.merge_history(&response.records)?;
            if !response.has_next {
                break;
            }
            if page >= MAX_HISTORY_PAGES {
                return Err(TankobonError::SyncFailure {
                    phase: SyncPhase::History.to_string(),
                    reason: format!("server kept paging past {} pages", MAX_HISTORY_PAGES),
                });
            }
            page += 1;
        }

        self.store.set_meta(
            keys::HISTORY_CURSOR,
            &started.to_rfc3339_opts(SecondsFormat::Millis, true),
        )?;
        Ok(merged)
    }

    fn history_cursor(&self) -> Result<Option<DateTime<Utc>>> {
        let Some(value) = self.store.get_meta(keys::HISTORY_CURSOR)? else {
            return Ok(None);
        };
        match DateTime::parse_from_rfc3339(&value) {
            Ok(dt) => Ok(Some(dt.with_timezone(&Utc))),
            Err(e) => {
                warn!("Ignoring unreadable history cursor {:?}: {}", value, e);
                Ok(None)
            }
        }
    }

    /// Mirrors the remote set locally. Items missing locally are fetched
    /// through the cache and inserted without being uploaded again.
    async fn sync_collections(&self, endpoint: &Endpoint) -> Result<CollectionsMerge> {
        let remote: HashSet<ItemKey> = self
            .cache
            .registry()
            .api()
            .get_collections(endpoint)
            .await?
            .iter()
            .map(CollectionRef::key)
            .collect();
        let local: HashSet<ItemKey> = self
            .store
            .get_all_collections()?
            .into_iter()
            .map(|r| r.key)
            .collect();

        let mut removed = 0;
        for key in local.difference(&remote) {
            self.store.delete_collection(key)?;
            removed += 1;
        }

        let mut missing: BTreeMap<String, Vec<String>> = BTreeMap::new();
        for key in remote.difference(&local) {
            missing
                .entry(key.source_id.clone())
                .or_default()
                .push(key.item_id.clone());
        }

        let mut added = 0;
        let mut unresolved = 0;
        for (source_id, ids) in missing {
            if self.cache.registry().get(&source_id).is_none() {
                warn!("Skipping {} remote items of unknown source {}", ids.len(), source_id);
                unresolved += ids.len();
                continue;
            }
            match self.cache.get_details(&source_id, &ids, false, true).await {
                Ok(items) => {
                    if items.len() < ids.len() {
                        warn!(
                            "{} did not return {} of the remote collection items",
                            source_id,
                            ids.len() - items.len()
                        );
                    }
                    unresolved += ids.len().saturating_sub(items.len());
                    let records: Vec<CollectionRecord> = items
                        .iter()
                        .map(|item| CollectionRecord::from_item(&source_id, item))
                        .collect();
                    added += self.store.insert_collections(&records)?;
                }
                Err(e) => {
                    warn!("Failed to fetch remote collection items from {}: {}", source_id, e);
                    unresolved += ids.len();
                }
            }
        }

        debug!(
            "Collections: {} added, {} removed, {} unresolved",
            added, removed, unresolved
        );
        Ok(CollectionsMerge {
            added,
            removed,
            unresolved,
        })
    }
}

fn phase_error(phase: SyncPhase, error: TankobonError) -> TankobonError {
    if error.is_unauthorized() {
        return error;
    }
    TankobonError::SyncFailure {
        phase: phase.to_string(),
        reason: error.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::api::wire::SyncHashes;
    use crate::api::Api;
    use crate::domain::{Item, Server, Summary};
    use crate::registry::Registry;
    use crate::store::SqliteStore;
    use crate::transport::mock::{json_response, MockTransport};
    use crate::transport::{Method, Response};
    use chrono::TimeZone;
    use serde_json::json;

    pub(super) const SYNC_ADDR: &str = "http://sync.test";
    const SRC_ADDR: &str = "http://src.test";

    pub(super) struct Fixture {
        pub mock: Arc<MockTransport>,
        pub store: Arc<SqliteStore>,
        pub engine: SyncEngine<SqliteStore>,
        pub events: EventBus,
    }

    pub(super) fn fixture() -> Fixture {
        let mock = Arc::new(MockTransport::new());
        let events = EventBus::new();
        let registry = Arc::new(Registry::new(Api::new(mock.clone(), false), events.clone()));
        registry.add_server(Server::sync_server(SYNC_ADDR, None));
        let mut source_server = Server::source_server(SRC_ADDR, None);
        source_server.is_down = false;
        registry.add_server(source_server);
        registry.get_or_create("a", Some(SRC_ADDR));

        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let cache = Arc::new(CacheLayer::new(registry));
        let engine = SyncEngine::new(cache, store.clone(), events.clone());
        Fixture {
            mock,
            store,
            engine,
            events,
        }
    }

    fn logged_in() -> Fixture {
        let f = fixture();
        f.store.set_meta(keys::SESSION_TOKEN, "tok").unwrap();
        f
    }

    fn remote_hashes(f: &Fixture, hashes: &SyncHashes) {
        f.mock.on(
            Method::Get,
            "sync",
            200,
            json!({
                "settings": hashes.settings,
                "history": hashes.history,
                "collections": hashes.collections,
            }),
        );
    }

    fn history(id: &str, opened_ms: i64) -> HistoryRecord {
        let item = Item::Summary(Summary {
            id: id.into(),
            title: id.to_uppercase(),
            ..Default::default()
        });
        let mut record = HistoryRecord::from_item("a", &item);
        record.last_opened_at = Utc.timestamp_millis_opt(opened_ms).unwrap();
        record
    }

    fn history_response(records: serde_json::Value, has_next: bool) -> Response {
        let mut response = json_response(200, records);
        let flag = if has_next { "1" } else { "0" };
        response.headers.push(("is-next".into(), flag.into()));
        response
    }

    #[tokio::test]
    async fn test_sync_requires_session() {
        let f = fixture();
        let result = f.engine.sync().await;
        assert!(matches!(result, Err(TankobonError::NotLoggedIn)));
        assert!(f.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_matching_hashes_reconcile_nothing() {
        let f = logged_in();
        let local = f.engine.local_hashes().unwrap();
        remote_hashes(&f, &local);

        let report = f.engine.sync().await.unwrap().unwrap();

        assert!(report.reconciled.is_empty());
        assert_eq!(f.mock.requests().len(), 1);
        assert_eq!(
            f.mock.requests()[0]
                .headers
                .iter()
                .find(|(name, _)| name == "Authorization")
                .map(|(_, value)| value.as_str()),
            Some("Bearer tok")
        );
        assert!(f.engine.state().last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_history_single_page_round_trip() {
        let f = logged_in();
        f.store.upsert_history(&history("m1", 1_000)).unwrap();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.history = "different".into();
        remote_hashes(&f, &remote);
        f.mock.on_response(
            Method::Post,
            "history",
            history_response(
                json!([{"driver": "a", "id": "m2", "title": "M2", "lastOpenedAt": 5_000}]),
                false,
            ),
        );

        let report = f.engine.sync().await.unwrap().unwrap();

        assert_eq!(report.reconciled, vec![SyncPhase::History]);
        assert_eq!(report.history_merged, 1);
        let uploads = f.mock.requests_to(Method::Post, "history");
        assert_eq!(uploads.len(), 1);
        assert_eq!(uploads[0].query("page").as_deref(), Some("1"));
        let sent: Vec<serde_json::Value> =
            serde_json::from_slice(uploads[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0]["id"], "m1");

        assert!(f.store.get_history(&ItemKey::new("a", "m2")).unwrap().is_some());
        assert!(f.store.get_meta(keys::HISTORY_CURSOR).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_history_follows_next_page_header() {
        let f = logged_in();
        f.store.upsert_history(&history("m1", 1_000)).unwrap();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.history = "different".into();
        remote_hashes(&f, &remote);
        f.mock
            .push(Method::Post, "history", history_response(json!([]), true));
        f.mock
            .push(Method::Post, "history", history_response(json!([]), false));

        f.engine.sync().await.unwrap().unwrap();

        let uploads = f.mock.requests_to(Method::Post, "history");
        assert_eq!(uploads.len(), 2);
        assert_eq!(uploads[1].query("page").as_deref(), Some("2"));
        let second: Vec<serde_json::Value> =
            serde_json::from_slice(uploads[1].body.as_ref().unwrap()).unwrap();
        assert!(second.is_empty());
    }

    #[tokio::test]
    async fn test_endless_history_paging_fails_phase() {
        let f = logged_in();
        f.store.upsert_history(&history("m1", 1_000)).unwrap();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.history = "different".into();
        remote_hashes(&f, &remote);
        f.mock
            .on_response(Method::Post, "history", history_response(json!([]), true));

        let report = f.engine.sync().await.unwrap().unwrap();

        assert_eq!(report.failed, vec![SyncPhase::History]);
        assert_eq!(
            f.mock.count(Method::Post, "history"),
            MAX_HISTORY_PAGES as usize
        );
        assert!(f.store.get_meta(keys::HISTORY_CURSOR).unwrap().is_none());
    }

    #[tokio::test]
    async fn test_failed_history_page_keeps_cursor() {
        let f = logged_in();
        f.store.upsert_history(&history("m1", 1_000)).unwrap();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.history = "different".into();
        remote_hashes(&f, &remote);
        f.mock
            .push(Method::Post, "history", history_response(json!([]), true));
        f.mock.on(Method::Post, "history", 500, json!({}));

        let report = f.engine.sync().await.unwrap().unwrap();

        assert_eq!(report.failed, vec![SyncPhase::History]);
        assert!(f.store.get_meta(keys::HISTORY_CURSOR).unwrap().is_none());
        let state = f.engine.state();
        assert!(!state.is_syncing);
        assert!(state.last_sync_at.is_some());
    }

    #[tokio::test]
    async fn test_settings_round_trip() {
        let f = logged_in();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.settings = "different".into();
        remote_hashes(&f, &remote);
        let blob = BASE64.encode(b"{\"theme\":\"dark\"}");
        f.mock
            .on(Method::Get, "settings", 200, json!({"settings": blob}));
        f.mock.on(Method::Post, "settings", 200, json!({}));

        let report = f.engine.sync().await.unwrap().unwrap();

        assert_eq!(report.reconciled, vec![SyncPhase::Settings]);
        assert_eq!(
            f.engine.local_settings().unwrap().as_deref(),
            Some(&b"{\"theme\":\"dark\"}"[..])
        );
        let put = f.mock.requests_to(Method::Post, "settings");
        assert_eq!(put.len(), 1);
        let body: serde_json::Value = serde_json::from_slice(put[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["settings"], blob);
    }

    #[tokio::test]
    async fn test_update_settings_uploads_blob() {
        let f = logged_in();
        f.mock.on(Method::Post, "settings", 200, json!({}));

        f.engine.update_settings(b"{\"lang\":\"en\"}").await.unwrap();

        assert_eq!(
            f.engine.local_settings().unwrap().as_deref(),
            Some(&b"{\"lang\":\"en\"}"[..])
        );
        let put = f.mock.requests_to(Method::Post, "settings");
        let body: serde_json::Value = serde_json::from_slice(put[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["settings"], BASE64.encode(b"{\"lang\":\"en\"}"));
    }

    #[tokio::test]
    async fn test_update_settings_offline_stays_local() {
        let f = fixture();

        f.engine.update_settings(b"x").await.unwrap();

        assert_eq!(f.engine.local_settings().unwrap().as_deref(), Some(&b"x"[..]));
        assert!(f.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_collections_mirror_remote_without_upload() {
        let f = logged_in();
        f.store
            .insert_collections(&[CollectionRecord {
                key: ItemKey::new("a", "gone"),
                title: "Gone".into(),
                is_ended: false,
                latest_label: None,
                thumbnail: None,
            }])
            .unwrap();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.collections = "different".into();
        remote_hashes(&f, &remote);
        f.mock.on(
            Method::Get,
            "collections",
            200,
            json!([{"id": "new", "driver": "a"}]),
        );
        f.mock.on(Method::Get, "driver", 200, json!({}));
        f.mock.on(
            Method::Get,
            "manga",
            200,
            json!([{"id": "new", "title": "New One", "latest": "Ch. 3"}]),
        );

        let report = f.engine.sync().await.unwrap().unwrap();

        assert_eq!(report.collections_added, 1);
        assert_eq!(report.collections_removed, 1);
        assert!(f.store.get_collection(&ItemKey::new("a", "gone")).unwrap().is_none());
        let added = f.store.get_collection(&ItemKey::new("a", "new")).unwrap().unwrap();
        assert_eq!(added.title, "New One");
        assert_eq!(f.mock.count(Method::Post, "collections"), 0);
    }

    #[tokio::test]
    async fn test_unresolved_remote_items_fail_collections() {
        let f = logged_in();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.collections = "different".into();
        remote_hashes(&f, &remote);
        f.mock.on(
            Method::Get,
            "collections",
            200,
            json!([
                {"id": "kept", "driver": "a"},
                {"id": "vanished", "driver": "a"},
                {"id": "x", "driver": "elsewhere"}
            ]),
        );
        f.mock.on(Method::Get, "driver", 200, json!({}));
        f.mock.on(
            Method::Get,
            "manga",
            200,
            json!([{"id": "kept", "title": "Kept"}]),
        );

        let report = f.engine.sync().await.unwrap().unwrap();

        assert_eq!(report.collections_added, 1);
        assert_eq!(report.failed, vec![SyncPhase::Collections]);
        assert!(!report.is_success());
        assert!(f.store.get_collection(&ItemKey::new("a", "kept")).unwrap().is_some());
    }

    #[tokio::test]
    async fn test_second_sync_is_idempotent() {
        let f = logged_in();
        f.store.upsert_history(&history("m1", 1_000)).unwrap();
        let mut remote = f.engine.local_hashes().unwrap();
        remote.history = "different".into();
        remote_hashes(&f, &remote);
        f.mock.on_response(
            Method::Post,
            "history",
            history_response(
                json!([{"driver": "a", "id": "m1", "title": "M1", "lastOpenedAt": 1_000}]),
                false,
            ),
        );
        f.engine.sync().await.unwrap().unwrap();

        // The server now reports what we hold
        remote_hashes(&f, &f.engine.local_hashes().unwrap());
        f.mock.clear_requests();

        let report = f.engine.sync().await.unwrap().unwrap();
        assert!(report.reconciled.is_empty());
        assert_eq!(f.mock.requests().len(), 1);
    }

    #[tokio::test]
    async fn test_sync_is_single_flight() {
        let f = logged_in();
        f.engine.in_flight.store(true, Ordering::SeqCst);

        assert!(f.engine.sync().await.unwrap().is_none());
        assert!(f.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_concurrent_syncs_run_once() {
        let f = logged_in();
        remote_hashes(&f, &f.engine.local_hashes().unwrap());
        f.mock
            .delay(Method::Get, "sync", Duration::from_millis(20));

        let (first, second) = tokio::join!(f.engine.sync(), f.engine.sync());
        let outcomes = [first.unwrap(), second.unwrap()];

        assert_eq!(outcomes.iter().filter(|r| r.is_some()).count(), 1);
        assert_eq!(outcomes.iter().filter(|r| r.is_none()).count(), 1);
        assert_eq!(f.mock.count(Method::Get, "sync"), 1);
        assert!(!f.engine.state().is_syncing);
    }

    #[tokio::test]
    async fn test_unauthorized_ends_session() {
        let f = logged_in();
        f.mock.on(Method::Get, "sync", 401, json!({}));
        let mut rx = f.events.subscribe();

        let result = f.engine.sync().await;

        assert!(matches!(result, Err(TankobonError::AuthFailure)));
        assert!(f.store.get_meta(keys::SESSION_TOKEN).unwrap().is_none());
        let mut expired = false;
        while let Ok(event) = rx.try_recv() {
            expired |= event == EngineEvent::SessionExpired;
        }
        assert!(expired);
    }

    #[tokio::test]
    async fn test_pass_resets_history_changed() {
        let f = logged_in();
        remote_hashes(&f, &f.engine.local_hashes().unwrap());
        f.engine.mark_history_changed();
        assert!(f.engine.is_due(DEFAULT_SYNC_INTERVAL));

        f.engine.sync().await.unwrap();

        assert!(!f.engine.history_changed());
        assert!(!f.engine.is_due(DEFAULT_SYNC_INTERVAL));
    }
}
