//! Source registry: identity, routing and reachability of drivers and the
//! servers that host them.

pub mod health;
pub mod source;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use parking_lot::RwLock;
use tokio::time::interval;
use tracing::{debug, info, warn};

use crate::api::{Api, Endpoint};
use crate::app::events::{EngineEvent, EventBus};
use crate::app::{Result, TankobonError};
use crate::domain::server::normalize_address;
use crate::domain::{normalize_source_id, Server};

pub use health::HealthMonitor;
pub use source::{ListKey, Source, SourceInfo, SourceState};

pub const CACHE_TTL: Duration = Duration::from_secs(2 * 60 * 60);

pub struct Registry {
    api: Api,
    events: EventBus,
    servers: RwLock<HashMap<String, Server>>,
    sources: RwLock<HashMap<String, Arc<Source>>>,
    active: RwLock<Option<String>>,
}

impl Registry {
    pub fn new(api: Api, events: EventBus) -> Self {
        Self {
            api,
            events,
            servers: RwLock::new(HashMap::new()),
            sources: RwLock::new(HashMap::new()),
            active: RwLock::new(None),
        }
    }

    pub fn api(&self) -> &Api {
        &self.api
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    // Servers

    pub fn add_server(&self, server: Server) {
        let mut servers = self.servers.write();
        if server.is_default {
            for existing in servers.values_mut() {
                existing.is_default = false;
            }
        }
        servers.insert(server.address.clone(), server);
    }

    pub fn server(&self, address: &str) -> Option<Server> {
        self.servers.read().get(&normalize_address(address)).cloned()
    }

    pub fn servers(&self) -> Vec<Server> {
        let mut servers: Vec<Server> = self.servers.read().values().cloned().collect();
        servers.sort_by(|a, b| a.address.cmp(&b.address));
        servers
    }

    pub fn sync_server(&self) -> Option<Server> {
        self.servers
            .read()
            .values()
            .find(|s| s.is_sync_server)
            .cloned()
    }

    fn server_endpoint(server: &Server) -> Endpoint {
        Endpoint::new(server.address.clone(), server.access_key.clone())
    }

    /// Endpoint of the server currently bound to `source`.
    pub fn endpoint_for(&self, source: &Source) -> Option<Endpoint> {
        let address = source.server()?;
        self.server(&address).map(|s| Self::server_endpoint(&s))
    }

    /// Marks a server down along with every source it serves.
    pub fn mark_server_down(&self, address: &str) {
        let address = normalize_address(address);
        let changed = match self.servers.write().get_mut(&address) {
            Some(server) if !server.is_down => {
                server.is_down = true;
                true
            }
            _ => false,
        };
        if changed {
            warn!("Server {} is down", address);
            self.events.emit(EngineEvent::ServerStatus {
                address: address.clone(),
                is_down: true,
            });
        }

        for source in self.sources_on(&address) {
            self.set_source_down(&source, true);
        }
    }

    fn sources_on(&self, address: &str) -> Vec<Arc<Source>> {
        self.sources
            .read()
            .values()
            .filter(|s| s.server().as_deref() == Some(address))
            .cloned()
            .collect()
    }

    /// `GET /` against a source server; binds every advertised driver to it.
    pub async fn initialize_server(&self, address: &str) -> Result<Vec<String>> {
        let server = self
            .server(address)
            .ok_or_else(|| TankobonError::ServerDown(address.to_string()))?;
        let endpoint = Self::server_endpoint(&server);

        match self.api.server_info(&endpoint).await {
            Ok(info) => {
                if let Some(server) = self.servers.write().get_mut(&server.address) {
                    server.is_down = false;
                    server.version = info.version.clone();
                }
                info!(
                    "Server {} is up with {} drivers",
                    server.address,
                    info.available_drivers.len()
                );
                self.events.emit(EngineEvent::ServerStatus {
                    address: server.address.clone(),
                    is_down: false,
                });

                let drivers: Vec<String> = info
                    .available_drivers
                    .iter()
                    .map(|id| self.get_or_create(id, Some(&server.address)).identifier.clone())
                    .collect();
                Ok(drivers)
            }
            Err(e) => {
                warn!("Failed to initialize server {}: {}", server.address, e);
                self.mark_server_down(&server.address);
                Err(TankobonError::ServerDown(server.address))
            }
        }
    }

    // Sources

    /// Idempotent lookup keyed by the normalized identifier. Supplying a
    /// server rebinds an existing source without touching its caches.
    pub fn get_or_create(&self, id: &str, server: Option<&str>) -> Arc<Source> {
        let spelling = id.trim();
        let id = normalize_source_id(id);
        let server = server.map(normalize_address);

        let mut sources = self.sources.write();
        if let Some(existing) = sources.get(&id) {
            if let Some(address) = server {
                let mut state = existing.state();
                if state.driver != spelling {
                    state.driver = spelling.to_string();
                }
                if state.server.as_deref() != Some(address.as_str()) {
                    debug!("Rebinding source {} to {}", id, address);
                    state.server = Some(address);
                }
            }
            return existing.clone();
        }

        let source = Arc::new(Source::new(spelling, server));
        sources.insert(id, source.clone());
        source
    }

    pub fn get(&self, id: &str) -> Option<Arc<Source>> {
        self.sources.read().get(&normalize_source_id(id)).cloned()
    }

    pub fn sources(&self) -> Vec<Arc<Source>> {
        let mut sources: Vec<Arc<Source>> = self.sources.read().values().cloned().collect();
        sources.sort_by(|a, b| a.identifier.cmp(&b.identifier));
        sources
    }

    /// Flips `is_down`, emitting an event when the value changes.
    pub fn set_source_down(&self, source: &Source, is_down: bool) {
        let changed = {
            let mut state = source.state();
            let changed = state.is_down != is_down;
            state.is_down = is_down;
            changed
        };
        if changed {
            if is_down {
                warn!("Source {} is down", source.identifier);
            } else {
                info!("Source {} is back up", source.identifier);
            }
            self.events.emit(EngineEvent::SourceStatus {
                source: source.identifier.clone(),
                is_down,
            });
        }
    }

    /// `GET driver`: fills in the source's capabilities. On failure the
    /// caches are kept and the source stays down.
    pub async fn initialize(&self, source: &Source) -> Result<()> {
        let Some(endpoint) = self.endpoint_for(source) else {
            self.set_source_down(source, true);
            return Err(TankobonError::SourceDown(source.identifier.clone()));
        };

        match self.api.driver_info(&endpoint, &source.driver()).await {
            Ok(info) => {
                {
                    let mut state = source.state();
                    state.supported_categories = info.supported_categories;
                    state.supports_suggestions = info.support_suggestion;
                    state.recommended_chunk_size = info.recommended_chunk_size;
                    state.version = info.version;
                    state.initialized = true;
                }
                self.set_source_down(source, false);
                debug!("Initialized source {}", source.identifier);
                Ok(())
            }
            Err(e) => {
                warn!("Failed to initialize source {}: {}", source.identifier, e);
                self.set_source_down(source, true);
                Err(TankobonError::SourceDown(source.identifier.clone()))
            }
        }
    }

    /// Makes `id` the active source. Its list and search caches start over.
    pub async fn select(&self, id: &str) -> Result<()> {
        let source = self
            .get(id)
            .ok_or_else(|| TankobonError::UnknownSource(id.to_string()))?;

        *self.active.write() = Some(source.identifier.clone());
        {
            let mut state = source.state();
            state.lists.clear();
            state.searches.clear();
        }

        if !source.is_initialized() {
            self.initialize(&source).await?;
        }
        Ok(())
    }

    pub fn active(&self) -> Option<Arc<Source>> {
        let id = self.active.read().clone()?;
        self.get(&id)
    }

    /// Drops every list, search and item cache.
    pub fn clear_caches(&self) {
        for source in self.sources() {
            source.state().clear_caches();
        }
        info!("Cleared source caches");
        self.events.emit(EngineEvent::CachesCleared);
    }

    /// Standing timer bounding cache staleness.
    pub async fn run_cache_eviction(self: Arc<Self>, every: Duration) {
        let mut timer = interval(every);
        timer.tick().await; // Skip the first immediate tick

        loop {
            timer.tick().await;
            self.clear_caches();
        }
    }
}
