//! Typed client for the source-server and sync-server HTTP endpoints.

pub mod wire;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use url::Url;

use crate::app::{Result, TankobonError};
use crate::domain::{HistoryRecord, Item};
use crate::transport::{Method, Request, Response, Transport};

use wire::{
    AccountInfo, CollectionRef, Credentials, DriverInfo, HistoryPage, IdsBody, OnlineMap,
    ServerInfo, SessionToken, SettingsBody, SyncHashes, WireHistory, WireItem,
};

pub const ACCESS_KEY_HEADER: &str = "X-Access-Key";
pub const NEXT_PAGE_HEADER: &str = "Is-Next";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Auth {
    None,
    AccessKey(String),
    Bearer(String),
}

/// Where a request goes and how it authenticates.
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub address: String,
    pub auth: Auth,
}

impl Endpoint {
    pub fn new(address: impl Into<String>, access_key: Option<String>) -> Self {
        Self {
            address: address.into(),
            auth: access_key.map(Auth::AccessKey).unwrap_or(Auth::None),
        }
    }

    pub fn bearer(address: impl Into<String>, token: impl Into<String>) -> Self {
        Self {
            address: address.into(),
            auth: Auth::Bearer(token.into()),
        }
    }
}

fn flag(value: bool) -> String {
    let flag = if value { "1" } else { "0" };
    flag.to_string()
}

#[derive(Clone)]
pub struct Api {
    transport: Arc<dyn Transport + Send + Sync>,
    use_proxy: bool,
}

impl Api {
    pub fn new(transport: Arc<dyn Transport + Send + Sync>, use_proxy: bool) -> Self {
        Self {
            transport,
            use_proxy,
        }
    }

    fn url(endpoint: &Endpoint, path: &str, query: &[(&str, String)]) -> Result<Url> {
        let mut url = Url::parse(&format!(
            "{}/{}",
            endpoint.address.trim_end_matches('/'),
            path
        ))?;
        if !query.is_empty() {
            let mut pairs = url.query_pairs_mut();
            for (name, value) in query {
                pairs.append_pair(name, value);
            }
        }
        Ok(url)
    }

    async fn call(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<Response> {
        let url = Self::url(endpoint, path, query)?;
        let mut request = Request::new(method, url.clone());
        match &endpoint.auth {
            Auth::None => {}
            Auth::AccessKey(key) => request = request.header(ACCESS_KEY_HEADER, key),
            Auth::Bearer(token) => {
                request = request.header("Authorization", &format!("Bearer {}", token))
            }
        }
        if let Some(body) = body {
            request = request.json_body(body);
        }

        let response = self.transport.send(request).await?;
        if !response.is_success() {
            return Err(TankobonError::Status {
                status: response.status,
                url: url.to_string(),
            });
        }
        Ok(response)
    }

    async fn json<T: DeserializeOwned>(
        &self,
        endpoint: &Endpoint,
        method: Method,
        path: &str,
        query: &[(&str, String)],
        body: Option<Vec<u8>>,
    ) -> Result<T> {
        let response = self.call(endpoint, method, path, query, body).await?;
        Ok(serde_json::from_slice(&response.body)?)
    }

    fn encode<B: Serialize + ?Sized>(body: &B) -> Result<Option<Vec<u8>>> {
        Ok(Some(serde_json::to_vec(body)?))
    }

    fn proxy(&self) -> (&'static str, String) {
        ("proxy", flag(self.use_proxy))
    }

    // Source server

    pub async fn server_info(&self, endpoint: &Endpoint) -> Result<ServerInfo> {
        self.json(endpoint, Method::Get, "", &[], None).await
    }

    pub async fn driver_info(&self, endpoint: &Endpoint, driver: &str) -> Result<DriverInfo> {
        self.json(
            endpoint,
            Method::Get,
            "driver",
            &[("driver", driver.to_string())],
            None,
        )
        .await
    }

    pub async fn online(&self, endpoint: &Endpoint, drivers: &[String]) -> Result<OnlineMap> {
        self.json(
            endpoint,
            Method::Get,
            "driver/online",
            &[("drivers", drivers.join(","))],
            None,
        )
        .await
    }

    pub async fn list(
        &self,
        endpoint: &Endpoint,
        driver: &str,
        category: Option<&str>,
        status: &str,
        page: u32,
    ) -> Result<Vec<Item>> {
        let mut query = vec![("driver", driver.to_string())];
        if let Some(category) = category {
            query.push(("category", category.to_string()));
        }
        query.push(("status", status.to_string()));
        query.push(("page", page.to_string()));
        query.push(self.proxy());

        let items: Vec<WireItem> = self
            .json(endpoint, Method::Get, "list", &query, None)
            .await?;
        Ok(items.into_iter().map(WireItem::into_item).collect())
    }

    pub async fn search(
        &self,
        endpoint: &Endpoint,
        driver: &str,
        keyword: &str,
        page: u32,
    ) -> Result<Vec<Item>> {
        let query = [
            ("driver", driver.to_string()),
            ("keyword", keyword.to_string()),
            ("page", page.to_string()),
            self.proxy(),
        ];
        let items: Vec<WireItem> = self
            .json(endpoint, Method::Get, "search", &query, None)
            .await?;
        Ok(items.into_iter().map(WireItem::into_item).collect())
    }

    pub async fn suggestion(
        &self,
        endpoint: &Endpoint,
        driver: &str,
        keyword: &str,
    ) -> Result<Vec<String>> {
        let query = [
            ("driver", driver.to_string()),
            ("keyword", keyword.to_string()),
        ];
        self.json(endpoint, Method::Get, "suggestion", &query, None)
            .await
    }

    /// `GET manga` with the ids joined into the query string.
    pub async fn items_by_query(
        &self,
        endpoint: &Endpoint,
        driver: &str,
        ids: &[String],
        show_all: bool,
    ) -> Result<Vec<Item>> {
        let query = [
            ("driver", driver.to_string()),
            ("ids", ids.join(",")),
            ("show-all", flag(show_all)),
            self.proxy(),
        ];
        let items: Vec<WireItem> = self
            .json(endpoint, Method::Get, "manga", &query, None)
            .await?;
        Ok(items.into_iter().map(WireItem::into_item).collect())
    }

    /// `POST manga` with the ids in a JSON body.
    pub async fn items_by_body(
        &self,
        endpoint: &Endpoint,
        driver: &str,
        ids: &[String],
        show_all: bool,
    ) -> Result<Vec<Item>> {
        let query = [
            ("driver", driver.to_string()),
            ("show-all", flag(show_all)),
            self.proxy(),
        ];
        let body = Self::encode(&IdsBody { ids })?;
        let items: Vec<WireItem> = self
            .json(endpoint, Method::Post, "manga", &query, body)
            .await?;
        Ok(items.into_iter().map(WireItem::into_item).collect())
    }

    pub async fn chapter(
        &self,
        endpoint: &Endpoint,
        driver: &str,
        chapter_id: &str,
        extra: bool,
    ) -> Result<Vec<String>> {
        let query = [
            ("driver", driver.to_string()),
            ("id", chapter_id.to_string()),
            ("extra-data", flag(extra)),
            self.proxy(),
        ];
        self.json(endpoint, Method::Get, "chapter", &query, None)
            .await
    }

    // Sync server

    pub async fn sync_hashes(&self, endpoint: &Endpoint) -> Result<SyncHashes> {
        self.json(endpoint, Method::Get, "sync", &[], None).await
    }

    /// Returns the base64 settings blob.
    pub async fn get_settings(&self, endpoint: &Endpoint) -> Result<String> {
        let body: SettingsBody = self
            .json(endpoint, Method::Get, "settings", &[], None)
            .await?;
        Ok(body.settings)
    }

    pub async fn put_settings(&self, endpoint: &Endpoint, settings: &str) -> Result<()> {
        let body = Self::encode(&SettingsBody {
            settings: settings.to_string(),
        })?;
        self.call(endpoint, Method::Post, "settings", &[], body)
            .await?;
        Ok(())
    }

    /// Uploads one page of history and returns the server's canonical
    /// records for that page.
    pub async fn post_history(
        &self,
        endpoint: &Endpoint,
        since: Option<DateTime<Utc>>,
        page: u32,
        records: &[HistoryRecord],
    ) -> Result<HistoryPage> {
        let mut query = Vec::new();
        if let Some(since) = since {
            query.push(("datetime", since.timestamp_millis().to_string()));
        }
        query.push(("page", page.to_string()));

        let wire: Vec<WireHistory> = records.iter().map(WireHistory::from).collect();
        let body = Self::encode(&wire)?;

        let response = self
            .call(endpoint, Method::Post, "history", &query, body)
            .await?;
        let has_next = response.header(NEXT_PAGE_HEADER).map(str::trim) == Some("1");
        let canonical: Vec<WireHistory> = serde_json::from_slice(&response.body)?;

        Ok(HistoryPage {
            records: canonical.into_iter().map(WireHistory::into_record).collect(),
            has_next,
        })
    }

    pub async fn get_collections(&self, endpoint: &Endpoint) -> Result<Vec<CollectionRef>> {
        self.json(endpoint, Method::Get, "collections", &[], None)
            .await
    }

    pub async fn add_collections(
        &self,
        endpoint: &Endpoint,
        refs: &[CollectionRef],
    ) -> Result<()> {
        let body = Self::encode(refs)?;
        self.call(endpoint, Method::Post, "collections", &[], body)
            .await?;
        Ok(())
    }

    pub async fn delete_collection(&self, endpoint: &Endpoint, item: &CollectionRef) -> Result<()> {
        let query = [("driver", item.driver.clone()), ("id", item.id.clone())];
        self.call(endpoint, Method::Delete, "collections", &query, None)
            .await?;
        Ok(())
    }

    pub async fn login(&self, endpoint: &Endpoint, credentials: &Credentials<'_>) -> Result<String> {
        let body = Self::encode(credentials)?;
        let session: SessionToken = self
            .json(endpoint, Method::Post, "token", &[], body)
            .await?;
        Ok(session.token)
    }

    pub async fn register(
        &self,
        endpoint: &Endpoint,
        credentials: &Credentials<'_>,
    ) -> Result<String> {
        let body = Self::encode(credentials)?;
        let session: SessionToken = self
            .json(endpoint, Method::Post, "create", &[], body)
            .await?;
        Ok(session.token)
    }

    pub async fn me(&self, endpoint: &Endpoint) -> Result<AccountInfo> {
        self.json(endpoint, Method::Post, "me", &[], None).await
    }

    pub async fn clear(&self, endpoint: &Endpoint) -> Result<()> {
        self.call(endpoint, Method::Post, "clear", &[], None).await?;
        Ok(())
    }
}
