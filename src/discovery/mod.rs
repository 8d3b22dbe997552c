//! Service discovery client
//!
//! Asks the local companion service where it listens. The service may still
//! be starting, so attempts are retried on a fixed schedule; when every
//! attempt fails the caller gets the fallback address instead of an error.

use std::time::Duration;

use serde::Deserialize;
use thiserror::Error;
use tokio::time::Instant;

use crate::core::{DiscoveryResult, RetryPolicy};

/// Well-known discovery endpoint of the companion service
pub const DEFAULT_DISCOVERY_URL: &str = "http://localhost:8080/server-info";

/// Why a single attempt did not produce an address
#[derive(Debug, Error)]
pub enum AttemptError {
    #[error("Request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("No response within {0:?}")]
    TimedOut(Duration),

    #[error("Discovery endpoint returned status {0}")]
    Status(reqwest::StatusCode),

    #[error("Malformed discovery response: {0}")]
    Malformed(String),
}

/// Body served by the discovery endpoint
#[derive(Debug, Deserialize)]
struct ServerInfo {
    ip: String,
    port: i64,
}

impl ServerInfo {
    fn into_result(self) -> Result<DiscoveryResult, AttemptError> {
        let host = self.ip.trim();
        if host.is_empty() {
            return Err(AttemptError::Malformed("empty ip".to_string()));
        }

        let port = u16::try_from(self.port)
            .ok()
            .filter(|port| *port != 0)
            .ok_or_else(|| AttemptError::Malformed(format!("port {} out of range", self.port)))?;

        Ok(DiscoveryResult::new(host, port))
    }
}

/// Parse a discovery response body
pub fn parse_server_info(body: &str) -> Result<DiscoveryResult, AttemptError> {
    serde_json::from_str::<ServerInfo>(body)
        .map_err(|e| AttemptError::Malformed(e.to_string()))?
        .into_result()
}

/// Client for the companion service's discovery endpoint
pub struct DiscoveryClient {
    client: reqwest::Client,
    url: String,
}

impl DiscoveryClient {
    pub fn new(url: impl Into<String>) -> anyhow::Result<Self> {
        // Local endpoint; never route it through a proxy from the environment
        let client = reqwest::Client::builder()
            .no_proxy()
            .user_agent(concat!("gamebridge/", env!("CARGO_PKG_VERSION")))
            .build()?;

        Ok(Self {
            client,
            url: url.into(),
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    /// Resolve the companion service address.
    ///
    /// Each attempt owns a slot of `delay_between_attempts`; a failed attempt
    /// waits out the rest of its slot before the next one starts. A request
    /// may run past its slot up to [`RetryPolicy::attempt_timeout`], so the
    /// whole run never exceeds [`RetryPolicy::total_budget`].
    pub async fn discover(&self, policy: &RetryPolicy) -> DiscoveryResult {
        let max_attempts = policy.max_attempts();
        let slot = policy.delay_between_attempts();
        let timeout = policy.attempt_timeout();
        tracing::debug!(max_attempts, budget = ?policy.total_budget(), "Starting discovery");

        for attempt in 1..=max_attempts {
            let started = Instant::now();

            match tokio::time::timeout_at(started + timeout, self.attempt()).await {
                Ok(Ok(result)) => {
                    tracing::info!(attempt, %result, "Discovered companion service");
                    return result;
                }
                Ok(Err(e)) => {
                    tracing::warn!(attempt, max_attempts, error = %e, "Discovery attempt failed");
                }
                Err(_) => {
                    let e = AttemptError::TimedOut(timeout);
                    tracing::warn!(attempt, max_attempts, error = %e, "Discovery attempt failed");
                }
            }

            if attempt < max_attempts {
                tracing::debug!(attempt, "Waiting before next discovery attempt");
                tokio::time::sleep_until(started + slot).await;
            }
        }

        let fallback = DiscoveryResult::fallback();
        tracing::warn!(%fallback, "All discovery attempts failed; using fallback");
        fallback
    }

    async fn attempt(&self) -> Result<DiscoveryResult, AttemptError> {
        let response = self
            .client
            .get(&self.url)
            .header("Accept", "application/json")
            .send()
            .await?;

        if !response.status().is_success() {
            return Err(AttemptError::Status(response.status()));
        }

        let body = response.text().await?;
        parse_server_info(&body)
    }
}
