//! Coordinator REST client
//!
//! The orchestrator only sees [`CoordinatorApi`]; the HTTP implementation
//! talks to the coordinator's public `/api/book/`, `/api/info/` and
//! `/api/limits/` endpoints.

use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::time::Duration;
use tracing::debug;

use crate::domain::{CoordinatorInfo, LimitList, PublicOrder};
use crate::error::{FedError, Result};

/// Resolved address of one coordinator
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CoordinatorEndpoint {
    pub alias: String,
    pub url: String,
    pub base_path: String,
}

impl CoordinatorEndpoint {
    pub fn api_url(&self, resource: &str) -> String {
        format!(
            "{}{}/api/{}/",
            self.url.trim_end_matches('/'),
            self.base_path,
            resource
        )
    }
}

#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait CoordinatorApi: Send + Sync {
    async fn fetch_book(&self, endpoint: &CoordinatorEndpoint) -> Result<Vec<PublicOrder>>;

    async fn fetch_info(&self, endpoint: &CoordinatorEndpoint) -> Result<CoordinatorInfo>;

    async fn fetch_limits(&self, endpoint: &CoordinatorEndpoint) -> Result<LimitList>;
}

#[derive(Clone)]
pub struct HttpCoordinatorClient {
    http: Client,
}

impl HttpCoordinatorClient {
    /// Build a client. `proxy` routes every request (e.g. a local Tor
    /// `socks5h://` proxy for onion coordinators).
    pub fn new(request_timeout: Duration, proxy: Option<&str>) -> Result<Self> {
        let mut builder = Client::builder()
            .user_agent(concat!("fedbook/", env!("CARGO_PKG_VERSION")))
            .timeout(request_timeout);
        if let Some(proxy) = proxy {
            let proxy = reqwest::Proxy::all(proxy)
                .map_err(|e| FedError::Validation(format!("invalid proxy '{proxy}': {e}")))?;
            builder = builder.proxy(proxy);
        }
        let http = builder.build().map_err(|e| {
            FedError::Internal(format!("failed to build coordinator HTTP client: {}", e))
        })?;
        Ok(Self { http })
    }

    async fn get_json<T: DeserializeOwned>(
        &self,
        endpoint: &CoordinatorEndpoint,
        resource: &str,
    ) -> Result<T> {
        let url = endpoint.api_url(resource);
        debug!(coordinator = %endpoint.alias, %url, "GET");
        let body = self
            .http
            .get(&url)
            .send()
            .await?
            .error_for_status()?
            .json::<T>()
            .await?;
        Ok(body)
    }
}

/// Coordinators answer an empty book with `{"not_found": "..."}` instead of `[]`.
fn parse_book(body: Value) -> Result<Vec<PublicOrder>> {
    match body {
        Value::Array(_) => Ok(serde_json::from_value(body)?),
        Value::Object(ref map) if map.contains_key("not_found") => Ok(Vec::new()),
        other => Err(FedError::Validation(format!(
            "unexpected book payload: {}",
            other
        ))),
    }
}

#[async_trait]
impl CoordinatorApi for HttpCoordinatorClient {
    async fn fetch_book(&self, endpoint: &CoordinatorEndpoint) -> Result<Vec<PublicOrder>> {
        let body: Value = self.get_json(endpoint, "book").await?;
        parse_book(body)
    }

    async fn fetch_info(&self, endpoint: &CoordinatorEndpoint) -> Result<CoordinatorInfo> {
        self.get_json(endpoint, "info").await
    }

    async fn fetch_limits(&self, endpoint: &CoordinatorEndpoint) -> Result<LimitList> {
        self.get_json(endpoint, "limits").await
    }
}
