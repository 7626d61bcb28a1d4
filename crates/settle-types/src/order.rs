//! Order and batch types for the settle system.
//!
//! This module defines the pending-order queue entries, the sealed batch
//! record with its status machine, and the opaque payload handed to the
//! settlement backend.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::common::{new_id, now_ms, Timestamp};
use crate::errors::ModelError;

/// A single write operation waiting to be batched.
///
/// Owned exclusively by the accumulator from enqueue until it is either
/// moved into a sealed batch or recreated after a failed submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingOrder {
	/// Unique identifier for this order.
	pub id: String,
	/// The restaurant this order belongs to.
	pub restaurant_id: String,
	/// Monetary value of the order.
	pub total_value: Decimal,
	/// Timestamp when the order entered the queue.
	pub enqueued_at: Timestamp,
}

impl PendingOrder {
	/// Creates a new pending order stamped with the current time.
	pub fn new(restaurant_id: impl Into<String>, total_value: Decimal) -> Self {
		Self {
			id: new_id(),
			restaurant_id: restaurant_id.into(),
			total_value,
			enqueued_at: now_ms(),
		}
	}

	/// Validates the order before it is accepted into a queue.
	pub fn validate(&self) -> Result<(), ModelError> {
		if self.id.is_empty() {
			return Err(ModelError::InvalidOrder("empty order id".into()));
		}
		if self.restaurant_id.is_empty() {
			return Err(ModelError::InvalidOrder("empty restaurant id".into()));
		}
		if self.total_value < Decimal::ZERO {
			return Err(ModelError::InvalidOrder(format!(
				"negative total value: {}",
				self.total_value
			)));
		}
		Ok(())
	}

	/// Age of the order relative to `now`, in milliseconds.
	pub fn age_ms(&self, now: Timestamp) -> u64 {
		now.saturating_sub(self.enqueued_at)
	}
}

/// Lifecycle status of a batch.
///
/// Transitions are monotonic: `Pending -> Processing -> Submitted ->
/// Confirmed`, with `Failed` reachable from `Pending` or `Processing`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchStatus {
	Pending,
	Processing,
	Submitted,
	Confirmed,
	Failed,
}

impl BatchStatus {
	/// Whether a transition to `next` is allowed from this status.
	pub fn can_transition_to(&self, next: BatchStatus) -> bool {
		use BatchStatus::*;
		matches!(
			(self, next),
			(Pending, Processing)
				| (Processing, Submitted)
				| (Submitted, Confirmed)
				| (Pending, Failed)
				| (Processing, Failed)
		)
	}

	/// Whether the batch has reached a terminal state and is immutable.
	pub fn is_terminal(&self) -> bool {
		matches!(self, BatchStatus::Confirmed | BatchStatus::Failed)
	}
}

/// A sealed group of orders for one restaurant, submitted as a single unit.
///
/// Created when the accumulator seals a queue, then retained for audit
/// after it reaches a terminal state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Batch {
	/// Unique identifier for this batch.
	pub id: String,
	/// The restaurant all member orders belong to.
	pub restaurant_id: String,
	/// Identifiers of the orders sealed into this batch.
	pub order_ids: Vec<String>,
	/// Number of orders in the batch; always equals `order_ids.len()`.
	pub batch_size: usize,
	/// Sum of member order values.
	pub total_value: Decimal,
	/// Current lifecycle status.
	pub status: BatchStatus,
	/// Timestamp when the batch was sealed.
	pub created_at: Timestamp,
	/// Timestamp when submission succeeded, if it has.
	pub submitted_at: Option<Timestamp>,
	/// Timestamp when the confirmation callback arrived, if it has.
	pub confirmed_at: Option<Timestamp>,
	/// Opaque reference returned by the settlement backend.
	pub provider_ref: Option<String>,
	/// Observability-only cost estimate recorded at submission.
	pub cost_metric: Option<String>,
	/// Failure detail when the batch reached `Failed`.
	pub error_message: Option<String>,
}

impl Batch {
	/// Seals a batch from drained pending orders.
	pub fn seal(restaurant_id: impl Into<String>, orders: &[PendingOrder]) -> Self {
		let total_value = orders.iter().map(|o| o.total_value).sum();
		Self {
			id: new_id(),
			restaurant_id: restaurant_id.into(),
			order_ids: orders.iter().map(|o| o.id.clone()).collect(),
			batch_size: orders.len(),
			total_value,
			status: BatchStatus::Pending,
			created_at: now_ms(),
			submitted_at: None,
			confirmed_at: None,
			provider_ref: None,
			cost_metric: None,
			error_message: None,
		}
	}

	/// Applies a status transition, rejecting backwards or skipped moves.
	pub fn transition(&mut self, next: BatchStatus) -> Result<(), ModelError> {
		if !self.status.can_transition_to(next) {
			return Err(ModelError::InvalidTransition {
				from: self.status,
				to: next,
			});
		}
		self.status = next;
		match next {
			BatchStatus::Submitted => self.submitted_at = Some(now_ms()),
			BatchStatus::Confirmed => self.confirmed_at = Some(now_ms()),
			_ => {}
		}
		Ok(())
	}

	/// Processing duration for confirmed batches, in milliseconds.
	pub fn processing_time_ms(&self) -> Option<u64> {
		self.confirmed_at
			.map(|confirmed| confirmed.saturating_sub(self.created_at))
	}
}

/// Opaque payload handed to the settlement backend for one batch.
///
/// The commitment is a stable fingerprint over the sorted order ids; its
/// construction carries no cryptographic guarantee and the backend treats
/// the whole payload as opaque.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitPayload {
	pub batch_id: String,
	pub restaurant_id: String,
	pub order_ids: Vec<String>,
	pub commitment: String,
	pub total_value: Decimal,
}

/// Outcome of a successful backend submission.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitReceipt {
	/// Backend-assigned reference for the submitted batch.
	pub reference: String,
	/// Backend-reported or locally estimated cost figure.
	pub cost_metric: String,
}
