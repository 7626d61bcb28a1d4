//! Outbound request transport.
//!
//! Routing logic never talks to the network directly; it goes through
//! [`RouteTransport`] so tests can script outcomes per provider.

use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum TransportError {
	/// The provider could not be reached.
	#[error("Connect error: {0}")]
	Connect(String),

	/// The transport's own request timeout fired.
	#[error("Request timed out: {0}")]
	Timeout(String),
}

/// Raw response from a provider, before any business interpretation.
#[derive(Debug, Clone)]
pub struct TransportResponse {
	pub status_code: u16,
	pub body: serde_json::Value,
}

/// Pluggable request transport.
#[async_trait]
pub trait RouteTransport: Send + Sync {
	async fn send(
		&self,
		url: &str,
		payload: &serde_json::Value,
		timeout: Duration,
	) -> Result<TransportResponse, TransportError>;
}

/// Production transport over HTTP POST.
pub struct HttpTransport {
	client: reqwest::Client,
}

impl HttpTransport {
	pub fn new() -> Self {
		Self {
			client: reqwest::Client::new(),
		}
	}
}

impl Default for HttpTransport {
	fn default() -> Self {
		Self::new()
	}
}

#[async_trait]
impl RouteTransport for HttpTransport {
	async fn send(
		&self,
		url: &str,
		payload: &serde_json::Value,
		timeout: Duration,
	) -> Result<TransportResponse, TransportError> {
		let response = self
			.client
			.post(url)
			.json(payload)
			.timeout(timeout)
			.send()
			.await
			.map_err(|e| {
				if e.is_timeout() {
					TransportError::Timeout(e.to_string())
				} else {
					TransportError::Connect(e.to_string())
				}
			})?;

		let status_code = response.status().as_u16();
		// Non-JSON bodies are preserved as a plain string.
		let body = match response.text().await {
			Ok(text) => serde_json::from_str(&text)
				.unwrap_or_else(|_| serde_json::Value::String(text)),
			Err(_) => serde_json::Value::Null,
		};

		Ok(TransportResponse { status_code, body })
	}
}
