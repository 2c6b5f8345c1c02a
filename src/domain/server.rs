use serde::{Deserialize, Serialize};

/// A remote HTTP endpoint: either the one sync server or a host for drivers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Server {
    pub address: String,
    pub access_key: Option<String>,
    pub is_sync_server: bool,
    pub is_default: bool,
    pub is_down: bool,
    pub version: Option<String>,
}

impl Server {
    /// A source server starts out down until `GET /` succeeds.
    pub fn source_server(address: impl Into<String>, access_key: Option<String>) -> Self {
        Self {
            address: normalize_address(&address.into()),
            access_key,
            is_sync_server: false,
            is_default: false,
            is_down: true,
            version: None,
        }
    }

    pub fn sync_server(address: impl Into<String>, access_key: Option<String>) -> Self {
        Self {
            is_sync_server: true,
            is_down: false,
            ..Self::source_server(address, access_key)
        }
    }
}

/// Addresses are compared without a trailing slash.
pub fn normalize_address(address: &str) -> String {
    address.trim().trim_end_matches('/').to_string()
}

/// Driver identifiers are case-insensitive.
pub fn normalize_source_id(id: &str) -> String {
    id.trim().to_lowercase()
}
