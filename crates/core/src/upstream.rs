//! HTTP client for the upstream REST API.

use std::time::Duration;

use reqwest::header::{AUTHORIZATION, CONTENT_TYPE, HeaderMap};
use reqwest::{Client, StatusCode};
use serde_json::Value;
use survey_proxy_common::config::UpstreamConfig;
use survey_proxy_common::{AppError, AppResult};
use tracing::debug;

use crate::accounts::Account;
use crate::args::ApiArgs;

/// Shared upstream client. Holds the connection pool.
#[derive(Debug, Clone)]
pub struct UpstreamClient {
    http: Client,
    base_url: String,
    per_page: u32,
}

impl UpstreamClient {
    /// Create a client for the configured upstream.
    pub fn new(config: &UpstreamConfig) -> AppResult<Self> {
        let http = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .connect_timeout(Duration::from_secs(10))
            .user_agent(format!("survey-proxy/{}", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            http,
            base_url: config.base_url.clone(),
            per_page: config.per_page,
        })
    }

    /// Base URL logical paths are appended to.
    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Default page size for collection endpoints.
    #[must_use]
    pub const fn per_page(&self) -> u32 {
        self.per_page
    }

    /// Absolute URL for a logical path.
    #[must_use]
    pub fn url_for(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Open a session authenticated as `account`.
    #[must_use]
    pub fn session(&self, account: &Account) -> UpstreamSession {
        UpstreamSession {
            client: self.clone(),
            account_key: account.key.clone(),
            token: account.token.clone(),
        }
    }
}

/// Upstream calls made on behalf of one account.
#[derive(Clone)]
pub struct UpstreamSession {
    client: UpstreamClient,
    account_key: String,
    token: String,
}

/// Decoded upstream response.
#[derive(Debug, Clone)]
pub struct UpstreamResponse {
    /// HTTP status.
    pub status: StatusCode,
    /// Response headers, read by the governor.
    pub headers: HeaderMap,
    /// Decoded JSON body.
    pub body: Value,
}

impl UpstreamSession {
    /// Account this session authenticates as.
    #[must_use]
    pub fn account_key(&self) -> &str {
        &self.account_key
    }

    /// Base URL of the upstream API.
    #[must_use]
    pub fn base_url(&self) -> &str {
        self.client.base_url()
    }

    /// Default page size for collection endpoints.
    #[must_use]
    pub const fn per_page(&self) -> u32 {
        self.client.per_page()
    }

    /// Issue a GET. Non-2xx statuses are returned, not raised.
    pub async fn get(&self, url: &str, args: &ApiArgs) -> AppResult<UpstreamResponse> {
        debug!(account = %self.account_key, url = %url, args = ?args, "Issuing upstream call");

        let response = self
            .client
            .http
            .get(url)
            .header(AUTHORIZATION, format!("Bearer {}", self.token))
            .header(CONTENT_TYPE, "application/json")
            .query(&args.iter().collect::<Vec<_>>())
            .send()
            .await?;

        let status = response.status();
        let headers = response.headers().clone();
        let text = response.text().await?;

        let body = match serde_json::from_str::<Value>(&text) {
            Ok(body) => body,
            Err(_) if status != StatusCode::OK => Value::String(text),
            Err(e) => {
                return Err(AppError::UpstreamTransport(format!(
                    "upstream returned invalid JSON from {url}: {e}"
                )));
            }
        };

        Ok(UpstreamResponse {
            status,
            headers,
            body,
        })
    }
}
