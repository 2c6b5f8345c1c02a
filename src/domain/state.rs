use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Dataset currently being reconciled by the sync engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum SyncPhase {
    Comparing,
    Settings,
    History,
    Collections,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            SyncPhase::Comparing => "comparing",
            SyncPhase::Settings => "settings",
            SyncPhase::History => "history",
            SyncPhase::Collections => "collections",
        };
        f.write_str(name)
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SyncState {
    pub is_syncing: bool,
    pub last_sync_at: Option<DateTime<Utc>>,
    pub current_phase: Option<SyncPhase>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct FreshnessState {
    pub is_running: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub progress_label: Option<String>,
}
