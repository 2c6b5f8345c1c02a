use std::collections::HashMap;

use parking_lot::{Mutex, MutexGuard};

use crate::cache::page::PageCache;
use crate::domain::{normalize_source_id, Item};

/// List cache key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListKey {
    pub category: Option<String>,
    pub status: String,
}

impl ListKey {
    pub fn new(category: Option<&str>, status: &str) -> Self {
        Self {
            category: category.map(str::to_string),
            status: status.to_string(),
        }
    }
}

/// Mutable part of a [`Source`]. Never hold the guard across an await.
#[derive(Debug, Default)]
pub struct SourceState {
    /// Identifier as the serving driver spells it; sent on the wire
    pub driver: String,
    /// Address of the serving [`Server`](crate::domain::Server)
    pub server: Option<String>,
    pub is_down: bool,
    pub initialized: bool,
    pub supported_categories: Vec<String>,
    pub supports_suggestions: bool,
    pub recommended_chunk_size: usize,
    pub version: Option<String>,
    pub latency_ms: Option<u64>,
    pub lists: PageCache<ListKey>,
    pub searches: PageCache<String>,
    pub items: HashMap<String, Item>,
}

impl SourceState {
    /// Upsert by id, never downgrading a Detail.
    pub fn store_item(&mut self, item: Item) {
        let id = item.id().to_string();
        let merged = match self.items.remove(&id) {
            Some(cached) => cached.upgrade(item),
            None => item,
        };
        self.items.insert(id, merged);
    }

    pub fn items_for(&self, ids: &[String]) -> Vec<Item> {
        ids.iter()
            .filter_map(|id| self.items.get(id).cloned())
            .collect()
    }

    pub fn clear_caches(&mut self) {
        self.lists.clear();
        self.searches.clear();
        self.items.clear();
    }
}

/// A content driver and the caches it owns.
#[derive(Debug)]
pub struct Source {
    pub identifier: String,
    state: Mutex<SourceState>,
}

/// Point-in-time copy of a source's status fields.
#[derive(Debug, Clone, PartialEq)]
pub struct SourceInfo {
    pub identifier: String,
    pub server: Option<String>,
    pub is_down: bool,
    pub initialized: bool,
    pub supported_categories: Vec<String>,
    pub supports_suggestions: bool,
    pub recommended_chunk_size: usize,
    pub latency_ms: Option<u64>,
}

impl Source {
    pub fn new(identifier: &str, server: Option<String>) -> Self {
        let state = SourceState {
            driver: identifier.trim().to_string(),
            is_down: server.is_none(),
            server,
            ..Default::default()
        };
        Self {
            identifier: normalize_source_id(identifier),
            state: Mutex::new(state),
        }
    }

    pub fn state(&self) -> MutexGuard<'_, SourceState> {
        self.state.lock()
    }

    pub fn driver(&self) -> String {
        self.state.lock().driver.clone()
    }

    pub fn is_down(&self) -> bool {
        self.state.lock().is_down
    }

    pub fn is_initialized(&self) -> bool {
        self.state.lock().initialized
    }

    pub fn server(&self) -> Option<String> {
        self.state.lock().server.clone()
    }

    pub fn recommended_chunk_size(&self) -> usize {
        self.state.lock().recommended_chunk_size
    }

    pub fn info(&self) -> SourceInfo {
        let state = self.state.lock();
        SourceInfo {
            identifier: self.identifier.clone(),
            server: state.server.clone(),
            is_down: state.is_down,
            initialized: state.initialized,
            supported_categories: state.supported_categories.clone(),
            supports_suggestions: state.supports_suggestions,
            recommended_chunk_size: state.recommended_chunk_size,
            latency_ms: state.latency_ms,
        }
    }
}
