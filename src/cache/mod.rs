//! Per-source result caches for listing, searching and item details.
//!
//! Transport failures flip the source's `is_down` flag and are reported
//! as `Ok(false)` (pages) or [`TankobonError::SourceDown`] (everything
//! else). Nothing here retries; recovery belongs to the
//! [`HealthMonitor`](crate::registry::HealthMonitor).

pub mod page;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::api::Endpoint;
use crate::app::events::EngineEvent;
use crate::app::{Result, TankobonError};
use crate::domain::Item;
use crate::registry::{ListKey, Registry, Source};

use page::PageState;

pub const DEFAULT_BATCH_THRESHOLD: usize = 10;
pub const DEFAULT_INITIALIZE_ATTEMPTS: u32 = 5;

pub struct CacheLayer {
    registry: Arc<Registry>,
    batch_threshold: usize,
    initialize_attempts: u32,
}

impl CacheLayer {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_limits(
            registry,
            DEFAULT_BATCH_THRESHOLD,
            DEFAULT_INITIALIZE_ATTEMPTS,
        )
    }

    pub fn with_limits(
        registry: Arc<Registry>,
        batch_threshold: usize,
        initialize_attempts: u32,
    ) -> Self {
        Self {
            registry,
            batch_threshold,
            initialize_attempts,
        }
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    fn source(&self, id: &str) -> Result<Arc<Source>> {
        self.registry
            .get(id)
            .ok_or_else(|| TankobonError::UnknownSource(id.to_string()))
    }

    /// Calls `initialize` up to the attempt limit when the source has not
    /// been initialized yet.
    pub async fn try_initialize(&self, source: &Source) -> bool {
        if source.is_initialized() {
            return true;
        }
        for attempt in 1..=self.initialize_attempts {
            if self.registry.initialize(source).await.is_ok() {
                return true;
            }
            debug!(
                "Initialize attempt {} for {} failed",
                attempt, source.identifier
            );
        }
        false
    }

    /// Shared gate for every call: up, initialized and routable.
    async fn ready(&self, source: &Source) -> Option<Endpoint> {
        if source.is_down() || !self.try_initialize(source).await {
            return None;
        }
        let endpoint = self.registry.endpoint_for(source);
        if endpoint.is_none() {
            self.registry.set_source_down(source, true);
        }
        endpoint
    }

    fn fail(&self, source: &Source, what: &str, error: &TankobonError) {
        warn!("{} failed for {}: {}", what, source.identifier, error);
        self.registry.set_source_down(source, true);
    }

    /// Ensures `page` of a listing is cached. Returns whether the page has
    /// items; `false` also covers down sources and exhausted pagination.
    pub async fn get_list(
        &self,
        source_id: &str,
        category: Option<&str>,
        status: &str,
        page: u32,
    ) -> Result<bool> {
        let source = self.source(source_id)?;
        let Some(endpoint) = self.ready(&source).await else {
            return Ok(false);
        };

        let key = ListKey::new(category, status);
        let state = source.state().lists.check(&key, page);
        match state {
            PageState::Cached => {
                let has_items = source
                    .state()
                    .lists
                    .page(&key, page)
                    .is_some_and(|ids| !ids.is_empty());
                return Ok(has_items);
            }
            PageState::Blocked => return Ok(false),
            PageState::Fetchable => {}
        }

        let items = match self
            .registry
            .api()
            .list(&endpoint, &source.driver(), category, status, page)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                self.fail(&source, "List", &e);
                return Ok(false);
            }
        };

        let has_items = !items.is_empty();
        let accepted = {
            let mut state = source.state();
            let ids = items.iter().map(|i| i.id().to_string()).collect();
            for item in items {
                state.store_item(item);
            }
            state.lists.insert(key, page, ids)
        };
        if !accepted {
            return Ok(false);
        }

        self.registry.events().emit(EngineEvent::ListUpdated {
            source: source.identifier.clone(),
            page,
        });
        Ok(has_items)
    }

    /// Keyword counterpart of [`get_list`](Self::get_list). Page 2 and
    /// later also require page 1 of the same keyword to have items.
    pub async fn get_search(&self, source_id: &str, keyword: &str, page: u32) -> Result<bool> {
        let source = self.source(source_id)?;
        let Some(endpoint) = self.ready(&source).await else {
            return Ok(false);
        };

        let key = keyword.to_string();
        let state = {
            let state = source.state();
            let first_page_empty = page > 1
                && state
                    .searches
                    .page(&key, 1)
                    .map_or(true, |ids| ids.is_empty());
            if first_page_empty {
                PageState::Blocked
            } else {
                state.searches.check(&key, page)
            }
        };
        match state {
            PageState::Cached => {
                let has_items = source
                    .state()
                    .searches
                    .page(&key, page)
                    .is_some_and(|ids| !ids.is_empty());
                return Ok(has_items);
            }
            PageState::Blocked => return Ok(false),
            PageState::Fetchable => {}
        }

        let items = match self
            .registry
            .api()
            .search(&endpoint, &source.driver(), keyword, page)
            .await
        {
            Ok(items) => items,
            Err(e) => {
                self.fail(&source, "Search", &e);
                return Ok(false);
            }
        };

        let has_items = !items.is_empty();
        let accepted = {
            let mut state = source.state();
            let ids = items.iter().map(|i| i.id().to_string()).collect();
            for item in items {
                state.store_item(item);
            }
            state.searches.insert(key, page, ids)
        };
        if !accepted {
            return Ok(false);
        }

        self.registry.events().emit(EngineEvent::SearchUpdated {
            source: source.identifier.clone(),
            keyword: keyword.to_string(),
            page,
        });
        Ok(has_items)
    }

    /// Returns the cached items for `ids`, fetching the ones missing from
    /// the cache first (all of them when `use_cache` is false). With
    /// `show_all` a cached Summary counts as missing.
    pub async fn get_details(
        &self,
        source_id: &str,
        ids: &[String],
        show_all: bool,
        use_cache: bool,
    ) -> Result<Vec<Item>> {
        let source = self.source(source_id)?;
        let Some(endpoint) = self.ready(&source).await else {
            return Err(TankobonError::SourceDown(source.identifier.clone()));
        };

        let missing: Vec<String> = {
            let state = source.state();
            let mut missing: Vec<String> = Vec::new();
            for id in ids {
                let needed = !use_cache
                    || match state.items.get(id) {
                        None => true,
                        Some(item) => show_all && !item.is_detail(),
                    };
                if needed && !missing.contains(id) {
                    missing.push(id.clone());
                }
            }
            missing
        };

        if !missing.is_empty() {
            let api = self.registry.api();
            let result = if missing.len() >= self.batch_threshold {
                api.items_by_body(&endpoint, &source.driver(), &missing, show_all)
                    .await
            } else {
                api.items_by_query(&endpoint, &source.driver(), &missing, show_all)
                    .await
            };

            let items = match result {
                Ok(items) => items,
                Err(e) => {
                    self.fail(&source, "Detail fetch", &e);
                    return Err(TankobonError::SourceDown(source.identifier.clone()));
                }
            };

            let fetched: Vec<String> = items.iter().map(|i| i.id().to_string()).collect();
            {
                let mut state = source.state();
                for item in items {
                    state.store_item(item);
                }
            }
            self.registry.events().emit(EngineEvent::DetailsUpdated {
                source: source.identifier.clone(),
                ids: fetched,
            });
        }

        let items = source.state().items_for(ids);
        Ok(items)
    }

    /// Keyword completions. Sources without suggestion support and empty
    /// keywords answer with nothing and no request.
    pub async fn get_suggestions(&self, source_id: &str, keyword: &str) -> Result<Vec<String>> {
        let source = self.source(source_id)?;
        let keyword = keyword.trim();
        if keyword.is_empty() {
            return Ok(Vec::new());
        }
        let Some(endpoint) = self.ready(&source).await else {
            return Err(TankobonError::SourceDown(source.identifier.clone()));
        };
        if !source.state().supports_suggestions {
            return Ok(Vec::new());
        }

        self.registry
            .api()
            .suggestion(&endpoint, &source.driver(), keyword)
            .await
            .map_err(|e| {
                self.fail(&source, "Suggestion", &e);
                TankobonError::SourceDown(source.identifier.clone())
            })
    }

    /// Page URLs of a chapter, passed through untouched.
    pub async fn get_chapter(
        &self,
        source_id: &str,
        chapter_id: &str,
        extra: bool,
    ) -> Result<Vec<String>> {
        let source = self.source(source_id)?;
        let Some(endpoint) = self.ready(&source).await else {
            return Err(TankobonError::SourceDown(source.identifier.clone()));
        };

        self.registry
            .api()
            .chapter(&endpoint, &source.driver(), chapter_id, extra)
            .await
            .map_err(|e| {
                self.fail(&source, "Chapter", &e);
                TankobonError::SourceDown(source.identifier.clone())
            })
    }

    pub fn list_items(
        &self,
        source_id: &str,
        category: Option<&str>,
        status: &str,
        page: u32,
    ) -> Vec<Item> {
        let Some(source) = self.registry.get(source_id) else {
            return Vec::new();
        };
        let state = source.state();
        state
            .lists
            .page(&ListKey::new(category, status), page)
            .map(|ids| state.items_for(ids))
            .unwrap_or_default()
    }

    pub fn search_items(&self, source_id: &str, keyword: &str, page: u32) -> Vec<Item> {
        let Some(source) = self.registry.get(source_id) else {
            return Vec::new();
        };
        let state = source.state();
        state
            .searches
            .page(&keyword.to_string(), page)
            .map(|ids| state.items_for(ids))
            .unwrap_or_default()
    }

    pub fn cached_item(&self, source_id: &str, item_id: &str) -> Option<Item> {
        self.registry
            .get(source_id)
            .and_then(|source| source.state().items.get(item_id).cloned())
    }
}
