//! Account calls against the sync server and the stored session token.

use tracing::{info, warn};

use crate::api::wire::{AccountInfo, Credentials};
use crate::api::Endpoint;
use crate::app::events::EngineEvent;
use crate::app::{Result, TankobonError};
use crate::domain::Server;
use crate::store::{keys, Store};

use super::SyncEngine;

impl<S: Store + Send + Sync + 'static> SyncEngine<S> {
    fn sync_server(&self) -> Result<Server> {
        self.cache
            .registry()
            .sync_server()
            .ok_or_else(|| TankobonError::Config("no sync server configured".into()))
    }

    pub fn is_logged_in(&self) -> bool {
        matches!(self.store.get_meta(keys::SESSION_TOKEN), Ok(Some(_)))
    }

    /// Bearer endpoint for the stored session.
    pub(crate) fn session_endpoint(&self) -> Result<Endpoint> {
        let token = self
            .store
            .get_meta(keys::SESSION_TOKEN)?
            .ok_or(TankobonError::NotLoggedIn)?;
        let server = self.sync_server()?;
        Ok(Endpoint::bearer(server.address, token))
    }

    /// Turns a 401 into [`TankobonError::AuthFailure`], dropping the
    /// session on the way.
    pub(crate) fn check_auth(&self, error: TankobonError) -> TankobonError {
        if !error.is_unauthorized() {
            return error;
        }
        warn!("Sync server rejected the session, logging out");
        if let Err(e) = self.store.delete_meta(keys::SESSION_TOKEN) {
            warn!("Failed to clear session token: {}", e);
        }
        self.events.emit(EngineEvent::SessionExpired);
        TankobonError::AuthFailure
    }

    pub async fn login(&self, email: &str, password: &str) -> Result<()> {
        let server = self.sync_server()?;
        let endpoint = Endpoint::new(server.address, server.access_key);
        let token = self
            .cache
            .registry()
            .api()
            .login(&endpoint, &Credentials { email, password })
            .await
            .map_err(|e| {
                if e.is_unauthorized() {
                    TankobonError::AuthFailure
                } else {
                    e
                }
            })?;
        self.store.set_meta(keys::SESSION_TOKEN, &token)?;
        info!("Logged in as {}", email);
        Ok(())
    }

    pub async fn register(&self, email: &str, password: &str) -> Result<()> {
        let server = self.sync_server()?;
        let endpoint = Endpoint::new(server.address, server.access_key);
        let token = self
            .cache
            .registry()
            .api()
            .register(&endpoint, &Credentials { email, password })
            .await?;
        self.store.set_meta(keys::SESSION_TOKEN, &token)?;
        info!("Registered {}", email);
        Ok(())
    }

    pub async fn me(&self) -> Result<AccountInfo> {
        let endpoint = self.session_endpoint()?;
        self.cache
            .registry()
            .api()
            .me(&endpoint)
            .await
            .map_err(|e| self.check_auth(e))
    }

    /// Wipes the account's remote data. Local data is untouched.
    pub async fn clear_remote(&self) -> Result<()> {
        let endpoint = self.session_endpoint()?;
        self.cache
            .registry()
            .api()
            .clear(&endpoint)
            .await
            .map_err(|e| self.check_auth(e))
    }

    pub fn logout(&self) -> Result<()> {
        self.store.delete_meta(keys::SESSION_TOKEN)?;
        info!("Logged out");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::app::TankobonError;
    use crate::store::{keys, Store};
    use crate::sync::tests::fixture;
    use crate::transport::Method;
    use serde_json::json;

    #[tokio::test]
    async fn test_login_stores_token() {
        let f = fixture();
        f.mock.on(Method::Post, "token", 200, json!({"token": "abc"}));

        f.engine.login("me@example.com", "hunter2").await.unwrap();

        assert!(f.engine.is_logged_in());
        assert_eq!(
            f.store.get_meta(keys::SESSION_TOKEN).unwrap().as_deref(),
            Some("abc")
        );
        let body: serde_json::Value =
            serde_json::from_slice(f.mock.requests()[0].body.as_ref().unwrap()).unwrap();
        assert_eq!(body["email"], "me@example.com");
    }

    #[tokio::test]
    async fn test_rejected_login_is_auth_failure() {
        let f = fixture();
        f.mock.on(Method::Post, "token", 401, json!({}));

        let result = f.engine.login("me@example.com", "wrong").await;

        assert!(matches!(result, Err(TankobonError::AuthFailure)));
        assert!(!f.engine.is_logged_in());
    }

    #[tokio::test]
    async fn test_me_with_expired_session_logs_out() {
        let f = fixture();
        f.store.set_meta(keys::SESSION_TOKEN, "stale").unwrap();
        f.mock.on(Method::Post, "me", 401, json!({}));

        let result = f.engine.me().await;

        assert!(matches!(result, Err(TankobonError::AuthFailure)));
        assert!(!f.engine.is_logged_in());
    }

    #[tokio::test]
    async fn test_account_calls_need_session() {
        let f = fixture();
        assert!(matches!(f.engine.me().await, Err(TankobonError::NotLoggedIn)));
        assert!(matches!(
            f.engine.clear_remote().await,
            Err(TankobonError::NotLoggedIn)
        ));
        assert!(f.mock.requests().is_empty());
    }

    #[tokio::test]
    async fn test_register_then_logout() {
        let f = fixture();
        f.mock.on(Method::Post, "create", 200, json!({"token": "new"}));

        f.engine.register("me@example.com", "pw").await.unwrap();
        assert!(f.engine.is_logged_in());

        f.engine.logout().unwrap();
        assert!(!f.engine.is_logged_in());
    }
}
