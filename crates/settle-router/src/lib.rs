//! Health-aware request routing across redundant providers.
//!
//! The [`ProviderRouter`] keeps a registry of interchangeable backend
//! endpoints, scores them continuously from routing outcomes and periodic
//! health probes, and serves each request with ordered fallback across the
//! reliability-ranked candidate list.

use thiserror::Error;

pub mod prober;
pub mod router;
pub mod transport;

pub use prober::{HealthProbe, HttpProber, ProbeError, ProbeOutcome};
pub use router::{ProviderRouter, RouteOptions};
pub use transport::{HttpTransport, RouteTransport, TransportError, TransportResponse};

#[derive(Debug, Error)]
pub enum RouterError {
	/// No provider is currently routable at all.
	#[error("No routable providers registered")]
	NoProviders,

	/// Every candidate within the attempt budget failed.
	#[error("All providers exhausted after {attempts} attempts")]
	Exhausted { attempts: usize },

	/// The caller's deadline expired; the in-flight attempt was abandoned
	/// without being scored.
	#[error("Route cancelled by caller deadline")]
	Cancelled,

	/// The referenced provider is not registered.
	#[error("Unknown provider: {0}")]
	UnknownProvider(String),

	/// A staged migration could not run.
	#[error("Migration error: {0}")]
	Migration(String),
}
