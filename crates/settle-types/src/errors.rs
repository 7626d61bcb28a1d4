//! Model-level error types.

use thiserror::Error;

use crate::order::BatchStatus;

/// Errors raised by the data model itself, independent of any service.
#[derive(Debug, Error, PartialEq)]
pub enum ModelError {
	/// A batch status transition that would move backwards or skip a state.
	#[error("Invalid batch transition: {from:?} -> {to:?}")]
	InvalidTransition { from: BatchStatus, to: BatchStatus },

	/// An order that fails validation before it is ever queued.
	#[error("Invalid order: {0}")]
	InvalidOrder(String),
}
