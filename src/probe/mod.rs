//! Probe module for upstream reachability checks.
//!
//! A probe never fails: every outcome, including timeouts and connection
//! errors, is folded into a [`ProbeResult`] for the evaluator to classify.

mod http;

pub use http::*;

use crate::config::TargetConfig;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;

/// User agent sent with every probe request.
pub const USER_AGENT: &str = concat!("campus-status/", env!("CARGO_PKG_VERSION"));

/// Probe error types.
#[derive(Error, Debug)]
pub enum ProbeError {
    #[error("probe timed out after {0:?}")]
    Timeout(Duration),
    #[error("network error: {message}")]
    Network { message: String, elapsed: Duration },
    #[error("invalid configuration: {0}")]
    Config(String),
}

/// Outcome of probing one target once.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProbeResult {
    pub http_code: Option<u16>,
    /// Milliseconds until the response headers arrived, or until failure.
    pub response_time: Option<u64>,
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl ProbeResult {
    pub fn success(code: u16, latency_ms: u64, timestamp: DateTime<Utc>) -> Self {
        Self {
            http_code: Some(code),
            response_time: Some(latency_ms),
            error: None,
            timestamp,
        }
    }

    pub fn failure(error: impl Into<String>, latency_ms: Option<u64>, timestamp: DateTime<Utc>) -> Self {
        Self {
            http_code: None,
            response_time: latency_ms,
            error: Some(error.into()),
            timestamp,
        }
    }
}

/// Build the shared HTTP client used for probing.
///
/// Redirects are not followed: auth gateways answer 301/302 on success.
pub fn build_client() -> Result<reqwest::Client, reqwest::Error> {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .redirect(reqwest::redirect::Policy::none())
        .build()
}

/// Probe one target with its configured method and timeout.
pub async fn run_probe(client: &reqwest::Client, target: &TargetConfig) -> ProbeResult {
    let timestamp = Utc::now();

    match run_http_probe(client, target.method, &target.url, target.timeout()).await {
        Ok((code, elapsed)) => ProbeResult::success(code, elapsed.as_millis() as u64, timestamp),
        Err(e) => {
            tracing::debug!("Probe failed for {}: {}", target.id, e);
            let latency = match &e {
                ProbeError::Network { elapsed, .. } => Some(elapsed.as_millis() as u64),
                ProbeError::Timeout(_) | ProbeError::Config(_) => None,
            };
            ProbeResult::failure(e.to_string(), latency, timestamp)
        }
    }
}
