//! Dagmon fetch layer
//!
//! HTTP retrieval of the per-task status sources published under a task's
//! working-directory URL: the job event log, the node-status snapshot, the
//! site ad, and the pool info document.
//!
//! Every fetch carries a mandatory timeout and redirects are disabled, so a
//! misbehaving feed endpoint bounds worst-case latency instead of hanging a
//! status request. A status read mutates nothing on the remote side; callers
//! that abandon a request simply drop the futures.

pub mod error;
pub mod scheduler;

pub use error::{ClientError, Result, SchedulerError};
pub use scheduler::SchedulerQuery;

use std::time::Duration;

use reqwest::Client;
use tracing::debug;

/// URL suffixes of the published status sources.
const JOB_LOG_SUFFIX: &str = "job_log.txt";
const NODE_STATE_SUFFIX: &str = "node_state.txt";
const SITE_AD_SUFFIX: &str = "site_ad.txt";

/// Wire format of the node-status snapshot, decided once at fetch time.
///
/// The structured variant is a JSON array and therefore starts with `[`;
/// anything else is the legacy line-oriented format.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FeedFormat {
    Legacy,
    Structured,
}

impl FeedFormat {
    /// Detect the format from the first byte of the snapshot.
    pub fn detect(body: &str) -> FeedFormat {
        if body.as_bytes().first() == Some(&b'[') {
            FeedFormat::Structured
        } else {
            FeedFormat::Legacy
        }
    }
}

/// Fetch configuration.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Per-request timeout (connect and total).
    pub timeout: Duration,
    /// Pool info endpoint, supplied by the configuration lookup service.
    /// `None` disables the pool-info fetch.
    pub pool_info_url: Option<String>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            pool_info_url: None,
        }
    }
}

/// HTTP client for a task's published status sources
#[derive(Debug, Clone)]
pub struct TaskWebClient {
    client: Client,
    config: ClientConfig,
}

impl TaskWebClient {
    /// Create a new client with the given configuration.
    ///
    /// Falls back to a default reqwest client if the builder fails, which
    /// only happens on broken TLS backends.
    pub fn new(config: ClientConfig) -> Self {
        let client = Client::builder()
            .timeout(config.timeout)
            .connect_timeout(config.timeout)
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .unwrap_or_default();
        Self { client, config }
    }

    /// Create a client with a custom reqwest client (proxies, TLS settings).
    pub fn with_client(config: ClientConfig, client: Client) -> Self {
        Self { client, config }
    }

    /// The configured pool-info endpoint, if any.
    pub fn pool_info_url(&self) -> Option<&str> {
        self.config.pool_info_url.as_deref()
    }

    /// Fetch the job event log for a task.
    ///
    /// Any non-200 response is a hard failure: verbose status queries cannot
    /// proceed without the event log.
    pub async fn fetch_job_log(&self, web_dir: &str) -> Result<String> {
        self.fetch_text(&join_url(web_dir, JOB_LOG_SUFFIX)).await
    }

    /// Fetch the site ad for a task. Non-200 is a hard failure.
    pub async fn fetch_site_ad(&self, web_dir: &str) -> Result<String> {
        self.fetch_text(&join_url(web_dir, SITE_AD_SUFFIX)).await
    }

    /// Fetch the node-status snapshot and detect its wire format.
    ///
    /// A non-200 response maps to [`ClientError::NodeStateUnavailable`]: the
    /// snapshot lags submission by up to a refresh interval, so the caller
    /// reports a retriable condition instead of failing.
    pub async fn fetch_node_state(&self, web_dir: &str) -> Result<(FeedFormat, String)> {
        let url = join_url(web_dir, NODE_STATE_SUFFIX);
        debug!("Fetching node state from {}", url);
        let response = self.client.get(&url).send().await?;
        if !response.status().is_success() {
            return Err(ClientError::NodeStateUnavailable);
        }
        let body = response.text().await?;
        Ok((FeedFormat::detect(&body), body))
    }

    /// Fetch the pool info document from the configured endpoint.
    ///
    /// Returns `Value::Null` when no endpoint is configured.
    pub async fn fetch_pool_info(&self) -> Result<serde_json::Value> {
        let Some(url) = self.config.pool_info_url.clone() else {
            return Ok(serde_json::Value::Null);
        };
        debug!("Fetching pool info from {}", url);
        let response = self.client.get(&url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: status.as_u16(),
                url,
            });
        }
        response
            .json()
            .await
            .map_err(|e| ClientError::ParseError(format!("pool info is not valid JSON: {}", e)))
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!("Fetching {}", url);
        let response = self.client.get(url).send().await?;
        let status = response.status();
        if !status.is_success() {
            return Err(ClientError::UnexpectedStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(response.text().await?)
    }
}

impl Default for TaskWebClient {
    fn default() -> Self {
        Self::new(ClientConfig::default())
    }
}

fn join_url(base: &str, suffix: &str) -> String {
    format!("{}/{}", base.trim_end_matches('/'), suffix)
}
