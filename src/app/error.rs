use thiserror::Error;

#[derive(Error, Debug)]
pub enum TankobonError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Migration error: {0}")]
    Migration(#[from] rusqlite_migration::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Invalid URL: {0}")]
    InvalidUrl(#[from] url::ParseError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid base64 payload: {0}")]
    Base64(#[from] base64::DecodeError),

    #[error("Unexpected status {status} from {url}")]
    Status { status: u16, url: String },

    #[error("Source unavailable: {0}")]
    SourceDown(String),

    #[error("Server unavailable: {0}")]
    ServerDown(String),

    #[error("Unknown source: {0}")]
    UnknownSource(String),

    #[error("Sync failed during {phase}: {reason}")]
    SyncFailure { phase: String, reason: String },

    #[error("Session rejected by sync server")]
    AuthFailure,

    #[error("Not logged in to a sync server")]
    NotLoggedIn,

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("{0}")]
    Other(String),
}

impl TankobonError {
    /// True for a 401 from the remote end.
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, TankobonError::Status { status: 401, .. })
    }
}

pub type Result<T> = std::result::Result<T, TankobonError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unauthorized_detection() {
        let err = TankobonError::Status {
            status: 401,
            url: "https://sync.example.com/sync".into(),
        };
        assert!(err.is_unauthorized());

        let err = TankobonError::Status {
            status: 500,
            url: "https://sync.example.com/sync".into(),
        };
        assert!(!err.is_unauthorized());
        assert!(!TankobonError::AuthFailure.is_unauthorized());
    }
}
