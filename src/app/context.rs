use std::path::PathBuf;
use std::sync::Arc;

use tracing::warn;

use crate::api::Api;
use crate::app::error::{Result, TankobonError};
use crate::app::events::EventBus;
use crate::cache::CacheLayer;
use crate::config::Config;
use crate::domain::server::normalize_address;
use crate::domain::Server;
use crate::freshness::FreshnessEngine;
use crate::library::Library;
use crate::registry::{HealthMonitor, Registry};
use crate::store::sqlite::SqliteStore;
use crate::sync::SyncEngine;
use crate::transport::http::HttpTransport;
use crate::transport::Transport;

/// Every engine component, constructed once and shared.
pub struct AppContext {
    pub config: Config,
    pub store: Arc<SqliteStore>,
    pub events: EventBus,
    pub registry: Arc<Registry>,
    pub cache: Arc<CacheLayer>,
    pub health: Arc<HealthMonitor>,
    pub freshness: Arc<FreshnessEngine<SqliteStore>>,
    pub sync: Arc<SyncEngine<SqliteStore>>,
    pub library: Library<SqliteStore>,
}

impl AppContext {
    pub fn new(config: Config, db_path: Option<PathBuf>) -> Result<Self> {
        let db_path = match db_path {
            Some(p) => p,
            None => Self::default_db_path()?,
        };

        let store = Arc::new(SqliteStore::new(&db_path)?);
        let transport = Arc::new(HttpTransport::with_timeout(config.engine.http_timeout())?);
        Ok(Self::with_parts(config, store, transport))
    }

    pub fn in_memory(config: Config) -> Result<Self> {
        let store = Arc::new(SqliteStore::in_memory()?);
        let transport = Arc::new(HttpTransport::with_timeout(config.engine.http_timeout())?);
        Ok(Self::with_parts(config, store, transport))
    }

    pub fn with_parts(
        config: Config,
        store: Arc<SqliteStore>,
        transport: Arc<dyn Transport + Send + Sync>,
    ) -> Self {
        let events = EventBus::new();
        let api = Api::new(transport, config.engine.use_proxy);

        let registry = Arc::new(Registry::new(api, events.clone()));
        for server in &config.servers {
            let mut entry = Server::source_server(&server.address, server.access_key.clone());
            entry.is_default = server.is_default;
            registry.add_server(entry);
        }
        if let Some(sync) = &config.sync {
            registry.add_server(Server::sync_server(&sync.address, sync.access_key.clone()));
        }

        let cache = Arc::new(CacheLayer::with_limits(
            registry.clone(),
            config.engine.batch_threshold,
            config.engine.initialize_attempts,
        ));
        let health = Arc::new(HealthMonitor::with_interval(
            registry.clone(),
            config.engine.health_interval(),
        ));
        let freshness = Arc::new(FreshnessEngine::new(
            cache.clone(),
            store.clone(),
            events.clone(),
        ));
        let sync = Arc::new(SyncEngine::new(cache.clone(), store.clone(), events.clone()));
        let library = Library::new(cache.clone(), store.clone(), sync.clone());

        Self {
            config,
            store,
            events,
            registry,
            cache,
            health,
            freshness,
            sync,
            library,
        }
    }

    /// Discovers the drivers of every configured source server. Servers
    /// that fail stay down for the health monitor to retry.
    pub async fn bootstrap(&self) -> Vec<String> {
        let mut drivers = Vec::new();
        for server in self.registry.servers() {
            if server.is_sync_server {
                continue;
            }
            match self.registry.initialize_server(&server.address).await {
                Ok(found) => drivers.extend(found),
                Err(e) => warn!("{}", e),
            }
        }
        drivers.sort();
        drivers.dedup();
        drivers
    }

    /// Source to use when the caller names none: the active one, else the
    /// first driver of the default server.
    pub fn default_source(&self) -> Option<String> {
        if let Some(active) = self.registry.active() {
            return Some(active.identifier.clone());
        }
        let default = self
            .config
            .default_server()
            .map(|s| normalize_address(&s.address));
        self.registry
            .sources()
            .into_iter()
            .find(|s| match &default {
                Some(address) => s.server().as_deref() == Some(address.as_str()),
                None => true,
            })
            .map(|s| s.identifier.clone())
    }

    fn default_db_path() -> Result<PathBuf> {
        let data_dir = dirs::data_dir()
            .ok_or_else(|| TankobonError::Config("Could not find data directory".into()))?;
        let tankobon_dir = data_dir.join("tankobon");
        std::fs::create_dir_all(&tankobon_dir)?;
        Ok(tankobon_dir.join("tankobon.db"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{ServerConfig, SyncConfig};
    use crate::transport::mock::{json_response, MockTransport};
    use crate::transport::Method;
    use serde_json::json;

    fn config() -> Config {
        Config {
            servers: vec![
                ServerConfig {
                    address: "http://a.test/".into(),
                    access_key: Some("k".into()),
                    is_default: false,
                },
                ServerConfig {
                    address: "http://b.test".into(),
                    access_key: None,
                    is_default: true,
                },
            ],
            sync: Some(SyncConfig {
                address: "http://sync.test".into(),
                access_key: None,
            }),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_bootstrap_discovers_drivers() {
        let mock = Arc::new(MockTransport::new());
        mock.on(
            Method::Get,
            "",
            200,
            json!({"version": "1.2", "availableDrivers": ["One", "two"]}),
        );
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ctx = AppContext::with_parts(config(), store, mock.clone());

        let drivers = ctx.bootstrap().await;

        assert_eq!(drivers, vec!["one".to_string(), "two".to_string()]);
        // Only the two source servers are asked
        assert_eq!(mock.count(Method::Get, ""), 2);
        assert!(ctx.registry.sync_server().is_some());
        assert!(ctx.default_source().is_some());
        assert!(!ctx.registry.server("http://a.test").unwrap().is_down);
    }

    #[tokio::test]
    async fn test_unreachable_server_stays_down() {
        let mock = Arc::new(MockTransport::new());
        mock.fail(Method::Get, "");
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let ctx = AppContext::with_parts(config(), store, mock);

        assert!(ctx.bootstrap().await.is_empty());
        assert!(ctx.registry.server("http://b.test").unwrap().is_down);
        assert!(ctx.default_source().is_none());
    }

    #[tokio::test]
    async fn test_default_source_follows_default_server() {
        let mock = Arc::new(MockTransport::new());
        // Servers are bootstrapped in address order
        mock.push(Method::Get, "", json_response(200, json!({"availableDrivers": ["from-a"]})));
        mock.push(Method::Get, "", json_response(200, json!({"availableDrivers": ["from-b"]})));
        let store = Arc::new(SqliteStore::in_memory().unwrap());
        let mut config = config();
        config.servers[1].is_default = false;
        config.servers.swap(0, 1);
        let ctx = AppContext::with_parts(config, store, mock);

        ctx.bootstrap().await;

        // No server is flagged, so the first configured one wins
        assert_eq!(ctx.default_source().as_deref(), Some("from-b"));
    }
}
