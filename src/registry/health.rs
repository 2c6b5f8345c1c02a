use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, warn};

use crate::api::wire::OnlineStatus;
use crate::api::Endpoint;
use crate::domain::normalize_source_id;
use crate::registry::{Registry, Source};

pub const HEALTH_INTERVAL: Duration = Duration::from_secs(5);

/// Outcome of one monitor pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HealthReport {
    pub servers_recovered: usize,
    pub sources_probed: usize,
    pub sources_online: usize,
}

/// Polls down servers and sources until they recover. Never touches
/// catalog data.
pub struct HealthMonitor {
    registry: Arc<Registry>,
    interval: Duration,
    force_full: AtomicBool,
}

impl HealthMonitor {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_interval(registry, HEALTH_INTERVAL)
    }

    pub fn with_interval(registry: Arc<Registry>, interval: Duration) -> Self {
        Self {
            registry,
            interval,
            force_full: AtomicBool::new(false),
        }
    }

    /// Probe every source on the next pass, not only the down ones.
    pub fn request_full_check(&self) {
        self.force_full.store(true, Ordering::SeqCst);
    }

    pub async fn run(self: Arc<Self>) {
        let mut timer = interval(self.interval);
        loop {
            timer.tick().await;
            let report = self.check_once().await;
            if report.sources_probed > 0 || report.servers_recovered > 0 {
                debug!("Health check: {:?}", report);
            }
        }
    }

    pub async fn check_once(&self) -> HealthReport {
        let mut report = HealthReport::default();

        for server in self.registry.servers() {
            if server.is_down
                && !server.is_sync_server
                && self.registry.initialize_server(&server.address).await.is_ok()
            {
                report.servers_recovered += 1;
            }
        }

        let force = self.force_full.swap(false, Ordering::SeqCst);
        for (address, sources) in self.probe_candidates(force) {
            let Some(server) = self.registry.server(&address) else {
                continue;
            };
            let endpoint = Endpoint::new(server.address.clone(), server.access_key.clone());
            let drivers: Vec<String> = sources.iter().map(|s| s.driver()).collect();
            report.sources_probed += drivers.len();

            match self.registry.api().online(&endpoint, &drivers).await {
                Ok(statuses) => {
                    let statuses: HashMap<String, OnlineStatus> = statuses
                        .into_iter()
                        .map(|(driver, status)| (normalize_source_id(&driver), status))
                        .collect();
                    for source in &sources {
                        let status = statuses.get(&source.identifier).copied();
                        let online = status.is_some_and(|s| s.online);
                        source.state().latency_ms = status.map(|s| s.latency);
                        self.registry.set_source_down(source, !online);
                        if online {
                            report.sources_online += 1;
                        }
                    }
                }
                Err(e) => {
                    warn!("Online probe against {} failed: {}", address, e);
                    self.registry.mark_server_down(&address);
                }
            }
        }

        report
    }

    /// Down sources whose server is up (all bound sources when forced),
    /// grouped by server address.
    fn probe_candidates(&self, force: bool) -> BTreeMap<String, Vec<Arc<Source>>> {
        let mut groups: BTreeMap<String, Vec<Arc<Source>>> = BTreeMap::new();

        for source in self.registry.sources() {
            let Some(address) = source.server() else {
                continue;
            };
            let server_up = self
                .registry
                .server(&address)
                .is_some_and(|s| !s.is_down);
            if server_up && (force || source.is_down()) {
                groups.entry(address).or_default().push(source);
            }
        }

        groups
    }
}
