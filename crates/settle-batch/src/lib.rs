//! Order batch accumulation.
//!
//! The [`BatchAccumulator`] owns per-restaurant pending queues, seals
//! batches by size or age, submits them through a pluggable [`Submitter`],
//! and reconciles outcomes: confirmation via an explicit callback, failure
//! via individual requeue of the member orders.

use async_trait::async_trait;
use thiserror::Error;

use settle_types::{ModelError, SubmitPayload, SubmitReceipt};

pub mod accumulator;
pub mod commitment;

pub use accumulator::BatchAccumulator;

/// Fixed per-submission overhead used by the cost model.
pub const SUBMISSION_OVERHEAD: f64 = 0.25;
/// Marginal cost added per order in a submission.
pub const PER_ORDER_COST: f64 = 0.01;

#[derive(Debug, Error)]
pub enum BatchError {
	/// The order was rejected before it was ever queued.
	#[error("Queue error: {0}")]
	Queue(String),

	/// The referenced batch does not exist.
	#[error("Unknown batch: {0}")]
	UnknownBatch(String),

	/// A status transition the batch state machine forbids.
	#[error(transparent)]
	Transition(#[from] ModelError),

	/// An invalid configuration update, rejected with no partial mutation.
	#[error("Configuration error: {0}")]
	Config(String),
}

/// Errors returned by settlement backends.
#[derive(Debug, Error)]
pub enum SubmitError {
	/// The backend received the payload and refused it.
	#[error("Submission rejected: {0}")]
	Rejected(String),

	/// The backend could not be reached at all.
	#[error("Backend unreachable: {0}")]
	Unreachable(String),
}

/// Pluggable settlement backend.
///
/// In production this is backed by the provider router; tests supply
/// explicitly parameterized fakes.
#[async_trait]
pub trait Submitter: Send + Sync {
	async fn submit(&self, payload: &SubmitPayload) -> Result<SubmitReceipt, SubmitError>;
}

/// Estimated total cost of submitting a batch of `size` orders.
///
/// The fixed overhead is paid once per submission, so the per-order cost
/// is strictly non-increasing as the batch grows. Observability only.
pub fn estimate_cost(size: usize) -> f64 {
	SUBMISSION_OVERHEAD + PER_ORDER_COST * size as f64
}

/// Savings of one batched submission over `size` individual submissions.
pub fn estimate_savings(size: usize) -> f64 {
	SUBMISSION_OVERHEAD * size.saturating_sub(1) as f64
}
