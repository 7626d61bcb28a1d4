//! Result shapes exposed to callers of the two components.
//!
//! These types are returned both from the in-process method calls and,
//! unchanged, from the HTTP surface that wraps them.

use serde::{Deserialize, Serialize};

use crate::provider::Provider;

/// Acknowledgment returned synchronously by `enqueue`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "lowercase")]
pub enum EnqueueOutcome {
	/// The order was queued; a later flush will seal it.
	Queued { pending_count: usize },
	/// The order tipped the queue over the size boundary and a batch was
	/// sealed synchronously.
	Sealed { batch_id: String },
	/// Batching is disabled; the order was submitted on its own.
	Immediate { reference: String },
}

/// Aggregate batching statistics derived from the retained batch set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchMetrics {
	pub total_batches: usize,
	pub pending_orders: usize,
	pub processed_orders: usize,
	pub avg_batch_size: f64,
	/// Mean `confirmed_at - created_at` over confirmed batches only.
	pub avg_processing_time_ms: f64,
	pub total_cost_savings: f64,
}

/// Response from a routed request.
///
/// A routing success is not a business success; callers inspect the
/// status code and body themselves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouteResponse {
	/// Provider that produced this response.
	pub provider_id: String,
	/// HTTP status returned by the provider.
	pub status_code: u16,
	/// Response body, parsed as JSON when possible.
	pub body: serde_json::Value,
}

/// Router observability snapshot.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterStatus {
	/// The designated active provider, if any.
	pub active_provider_id: Option<String>,
	/// Snapshot of every registered provider.
	pub providers: Vec<Provider>,
	/// Mean reliability across all registered providers.
	pub health_score: f64,
	/// Advisory strings for operators; never load-bearing.
	pub recommendations: Vec<String>,
}
