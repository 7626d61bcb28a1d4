//! Production submitter backed by the provider router.
//!
//! This is the only coupling between the accumulator and the router: a
//! sealed batch becomes a routed POST to the settlement path, and the
//! response is folded back into a submit receipt.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::debug;

use settle_batch::{SubmitError, Submitter};
use settle_router::{ProviderRouter, RouteOptions, RouterError};
use settle_types::{SubmitPayload, SubmitReceipt};

/// Path the settlement backend exposes on every provider.
const SETTLEMENT_PATH: &str = "/settlements";

pub struct RouterSubmitter {
	router: Arc<ProviderRouter>,
}

impl RouterSubmitter {
	pub fn new(router: Arc<ProviderRouter>) -> Self {
		Self { router }
	}
}

#[async_trait]
impl Submitter for RouterSubmitter {
	async fn submit(&self, payload: &SubmitPayload) -> Result<SubmitReceipt, SubmitError> {
		let body = serde_json::to_value(payload)
			.map_err(|e| SubmitError::Rejected(format!("unserializable payload: {}", e)))?;

		let response = self
			.router
			.route(SETTLEMENT_PATH, &body, RouteOptions::default())
			.await
			.map_err(|e| match e {
				RouterError::Exhausted { .. } | RouterError::NoProviders => {
					SubmitError::Unreachable(e.to_string())
				}
				other => SubmitError::Rejected(other.to_string()),
			})?;

		// Routing succeeded; the status code carries the business outcome.
		if !(200..300).contains(&response.status_code) {
			return Err(SubmitError::Rejected(format!(
				"provider {} returned status {}",
				response.provider_id, response.status_code
			)));
		}

		let reference = response
			.body
			.get("reference")
			.and_then(|v| v.as_str())
			.map(str::to_string)
			.unwrap_or_else(|| format!("{}:{}", response.provider_id, payload.batch_id));
		let cost_metric = response
			.body
			.get("cost_metric")
			.and_then(|v| v.as_str())
			.unwrap_or_default()
			.to_string();

		debug!(
			batch_id = %payload.batch_id,
			provider_id = %response.provider_id,
			reference = %reference,
			"batch routed to settlement backend"
		);
		Ok(SubmitReceipt {
			reference,
			cost_metric,
		})
	}
}
