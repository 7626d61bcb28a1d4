//! Health probing.
//!
//! A probe issues `GET {endpoint}/health` and expects a JSON body with at
//! least a `status` field. Only `"ok"` counts as healthy; a provider
//! reporting `"degraded"` is scored as a failed probe so its reliability
//! decays the same way a failed request would.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
#[error("Probe failed: {0}")]
pub struct ProbeError(pub String);

/// Result of one liveness probe against a provider endpoint.
#[derive(Debug, Clone)]
pub struct ProbeOutcome {
	pub response_time_ms: u64,
	pub healthy: bool,
}

/// Pluggable liveness probe.
#[async_trait]
pub trait HealthProbe: Send + Sync {
	async fn probe(&self, endpoint: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError>;
}

/// Production probe over HTTP GET.
pub struct HttpProber {
	client: reqwest::Client,
}

impl HttpProber {
	pub fn new() -> Self {
		Self {
			client: reqwest::Client::new(),
		}
	}
}

impl Default for HttpProber {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl HealthProbe for HttpProber {
	async fn probe(&self, endpoint: &str, timeout: Duration) -> Result<ProbeOutcome, ProbeError> {
		let url = format!("{}/health", endpoint.trim_end_matches('/'));
		let started = std::time::Instant::now();

		let response = self
			.client
			.get(&url)
			.timeout(timeout)
			.send()
			.await
			.map_err(|e| ProbeError(e.to_string()))?;

		let response_time_ms = started.elapsed().as_millis() as u64;
		if !response.status().is_success() {
			return Ok(ProbeOutcome {
				response_time_ms,
				healthy: false,
			});
		}

		let body: serde_json::Value = response
			.json()
			.await
			.map_err(|e| ProbeError(format!("invalid health body: {}", e)))?;
		let healthy = body
			.get("status")
			.and_then(|s| s.as_str())
			.map(|s| s == "ok")
			.unwrap_or(false);

		Ok(ProbeOutcome {
			response_time_ms,
			healthy,
		})
	}
}
