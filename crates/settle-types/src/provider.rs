//! Provider types and reliability scoring.
//!
//! A provider is an interchangeable backend endpoint. Its status is never
//! set directly by callers; it is derived from the exponentially smoothed
//! reliability score and consecutive-failure history maintained here.

use serde::{Deserialize, Serialize};

use crate::common::{now_ms, Timestamp};

/// Lower clamp for the reliability score.
pub const RELIABILITY_MIN: f64 = 0.001;
/// Upper clamp for the reliability score.
pub const RELIABILITY_MAX: f64 = 0.999;
/// Consecutive failures required to demote a provider one level.
pub const DEMOTION_THRESHOLD: u32 = 3;
/// Reliability a non-active provider must regain before promotion.
pub const PROMOTION_RELIABILITY: f64 = 0.5;

/// Operational status of a provider.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderStatus {
	Active,
	Degraded,
	Offline,
}

impl ProviderStatus {
	fn demoted(self) -> Self {
		match self {
			ProviderStatus::Active => ProviderStatus::Degraded,
			ProviderStatus::Degraded | ProviderStatus::Offline => ProviderStatus::Offline,
		}
	}

	fn promoted(self) -> Self {
		match self {
			ProviderStatus::Offline => ProviderStatus::Degraded,
			ProviderStatus::Degraded | ProviderStatus::Active => ProviderStatus::Active,
		}
	}
}

/// A redundant backend endpoint with its health bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Provider {
	/// Unique identifier for this provider.
	pub id: String,
	/// Base URL requests are routed to.
	pub endpoint: String,
	/// Deployment region, used by capacity scale-out.
	pub region: String,
	/// Derived operational status.
	pub status: ProviderStatus,
	/// Most recently observed latency in milliseconds.
	pub latency_ms: u64,
	/// Exponentially smoothed success score in `[0.001, 0.999]`.
	pub reliability: f64,
	/// Failures since the last success, drives demotion.
	pub consecutive_failures: u32,
	/// Timestamp of the last health probe applied to this provider.
	pub last_check_at: Timestamp,
}

impl Provider {
	/// Creates a provider starting out active with a high score.
	pub fn new(
		id: impl Into<String>,
		endpoint: impl Into<String>,
		region: impl Into<String>,
	) -> Self {
		Self {
			id: id.into(),
			endpoint: endpoint.into(),
			region: region.into(),
			status: ProviderStatus::Active,
			latency_ms: 0,
			reliability: RELIABILITY_MAX,
			consecutive_failures: 0,
			last_check_at: 0,
		}
	}

	/// Records a successful routing outcome or probe.
	///
	/// Growth rule: `reliability * 0.99 + 0.01`, clamped. A provider that
	/// has regained enough score is promoted one level.
	pub fn record_success(&mut self) {
		self.reliability = clamp(self.reliability * 0.99 + 0.01);
		self.consecutive_failures = 0;
		if self.status != ProviderStatus::Active && self.reliability > PROMOTION_RELIABILITY {
			self.status = self.status.promoted();
		}
	}

	/// Records a failed routing outcome or probe.
	///
	/// Decay rule: `reliability * 0.95`, clamped. Every
	/// `DEMOTION_THRESHOLD` consecutive failures demote one level.
	pub fn record_failure(&mut self) {
		self.reliability = clamp(self.reliability * 0.95);
		self.consecutive_failures += 1;
		if self.consecutive_failures >= DEMOTION_THRESHOLD {
			self.status = self.status.demoted();
			self.consecutive_failures = 0;
		}
	}

	/// Applies a probe result: latency, check time, then the score rule.
	pub fn apply_probe(&mut self, probe: &HealthProbeResult) {
		self.latency_ms = probe.response_time_ms;
		self.last_check_at = probe.timestamp;
		if probe.success {
			self.record_success();
		} else {
			self.record_failure();
		}
	}

	/// Whether this provider may appear in a routing candidate list.
	pub fn is_routable(&self) -> bool {
		self.status != ProviderStatus::Offline
	}
}

fn clamp(reliability: f64) -> f64 {
	reliability.clamp(RELIABILITY_MIN, RELIABILITY_MAX)
}

/// Outcome of a single health probe.
///
/// Ephemeral: consumed immediately to update the provider, never stored.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthProbeResult {
	pub provider_id: String,
	pub response_time_ms: u64,
	pub success: bool,
	pub timestamp: Timestamp,
	pub error_message: Option<String>,
}

impl HealthProbeResult {
	pub fn ok(provider_id: impl Into<String>, response_time_ms: u64) -> Self {
		Self {
			provider_id: provider_id.into(),
			response_time_ms,
			success: true,
			timestamp: now_ms(),
			error_message: None,
		}
	}

	pub fn failed(provider_id: impl Into<String>, error: impl Into<String>) -> Self {
		Self {
			provider_id: provider_id.into(),
			response_time_ms: 0,
			success: false,
			timestamp: now_ms(),
			error_message: Some(error.into()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_reliability_stays_clamped() {
		let mut p = Provider::new("a", "http://a", "eu");
		for _ in 0..500 {
			p.record_failure();
		}
		assert!(p.reliability >= RELIABILITY_MIN);

		for _ in 0..500 {
			p.record_success();
		}
		assert!(p.reliability <= RELIABILITY_MAX);
	}

	#[test]
	fn test_failure_decreases_success_increases() {
		let mut p = Provider::new("a", "http://a", "eu");
		p.reliability = 0.9;

		p.record_failure();
		assert!(p.reliability < 0.9);

		let before = p.reliability;
		p.record_success();
		assert!(p.reliability > before);
	}

	#[test]
	fn test_three_consecutive_failures_demote() {
		let mut p = Provider::new("a", "http://a", "eu");
		assert_eq!(p.status, ProviderStatus::Active);

		for _ in 0..DEMOTION_THRESHOLD {
			p.record_failure();
		}
		assert_eq!(p.status, ProviderStatus::Degraded);

		for _ in 0..DEMOTION_THRESHOLD {
			p.record_failure();
		}
		assert_eq!(p.status, ProviderStatus::Offline);
		assert!(!p.is_routable());
	}

	#[test]
	fn test_success_resets_failure_streak() {
		let mut p = Provider::new("a", "http://a", "eu");
		p.record_failure();
		p.record_failure();
		p.record_success();
		p.record_failure();
		p.record_failure();
		assert_eq!(p.status, ProviderStatus::Active);
	}

	#[test]
	fn test_recovery_promotes_back() {
		let mut p = Provider::new("a", "http://a", "eu");
		for _ in 0..DEMOTION_THRESHOLD {
			p.record_failure();
		}
		assert_eq!(p.status, ProviderStatus::Degraded);

		// Regaining score above the promotion bar brings it back.
		while p.status != ProviderStatus::Active {
			p.record_success();
		}
		assert!(p.reliability > PROMOTION_RELIABILITY);
	}

	#[test]
	fn test_apply_probe_updates_latency_and_check_time() {
		let mut p = Provider::new("a", "http://a", "eu");
		let probe = HealthProbeResult::ok("a", 42);
		p.apply_probe(&probe);
		assert_eq!(p.latency_ms, 42);
		assert_eq!(p.last_check_at, probe.timestamp);

		let failed = HealthProbeResult::failed("a", "connect timeout");
		p.apply_probe(&failed);
		assert_eq!(p.consecutive_failures, 1);
	}
}
