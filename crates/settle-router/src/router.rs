//! The provider router service.

use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use settle_types::configs::RouterConfig;
use settle_types::{
	new_id, EventBus, HealthProbeResult, Provider, ProviderEvent, ProviderStatus, RouteResponse,
	RouterStatus, SettleEvent,
};

use crate::prober::HealthProbe;
use crate::transport::RouteTransport;
use crate::RouterError;

/// Upper bound on a single routing attempt when the caller supplies no
/// deadline.
const ATTEMPT_TIMEOUT: Duration = Duration::from_secs(30);

/// Reliability window within which latency breaks active-selection ties.
const SELECTION_TIE_WINDOW: f64 = 0.01;

/// Load above which scale-out considers adding capacity.
const SCALE_LOAD_THRESHOLD: f64 = 0.8;

/// Active-provider count at which scale-out stops adding capacity.
const SCALE_TARGET_ACTIVE: usize = 5;

/// Staged migration checkpoints, in execution order.
const MIGRATION_CHECKPOINTS: [f64; 4] = [0.25, 0.5, 0.75, 1.0];

/// Per-call options for [`ProviderRouter::route`].
#[derive(Debug, Clone, Default)]
pub struct RouteOptions {
	/// Overall budget for the call; bounds each attempt's network wait.
	pub deadline: Option<Duration>,
}

/// Routes requests across redundant providers with health-ranked fallback.
///
/// Provider scores are mutated under each provider's map entry lock; no
/// lock is held while a request or probe is in flight.
pub struct ProviderRouter {
	config: RouterConfig,
	providers: DashMap<String, Provider>,
	/// Designated active provider. A hint for operators and logs; routing
	/// always walks the full ranked candidate list.
	active: ArcSwapOption<String>,
	transport: Arc<dyn RouteTransport>,
	prober: Arc<dyn HealthProbe>,
	events: EventBus,
	shutdown_tx: broadcast::Sender<()>,
}

impl ProviderRouter {
	pub fn new(
		config: RouterConfig,
		transport: Arc<dyn RouteTransport>,
		prober: Arc<dyn HealthProbe>,
		events: EventBus,
	) -> Arc<Self> {
		let (shutdown_tx, _) = broadcast::channel(1);
		Arc::new(Self {
			config,
			providers: DashMap::new(),
			active: ArcSwapOption::empty(),
			transport,
			prober,
			events,
			shutdown_tx,
		})
	}

	/// Adds a provider to the registry and re-selects the active one.
	pub fn register_provider(&self, provider: Provider) {
		info!(
			provider_id = %provider.id,
			endpoint = %provider.endpoint,
			region = %provider.region,
			"provider registered"
		);
		let provider_id = provider.id.clone();
		let region = provider.region.clone();
		self.providers.insert(provider_id.clone(), provider);
		self.events
			.publish(SettleEvent::Provider(ProviderEvent::Registered {
				provider_id,
				region,
			}));
		self.select_active();
	}

	/// Removes a provider entirely.
	pub fn deregister_provider(&self, provider_id: &str) -> Result<(), RouterError> {
		self.providers
			.remove(provider_id)
			.ok_or_else(|| RouterError::UnknownProvider(provider_id.to_string()))?;
		self.events
			.publish(SettleEvent::Provider(ProviderEvent::Deregistered {
				provider_id: provider_id.to_string(),
			}));
		self.select_active();
		Ok(())
	}

	/// Routes a request with ordered fallback.
	///
	/// Candidates are the non-offline providers sorted by reliability; up
	/// to `max_attempts` distinct providers are tried. Any `2xx` or `4xx`
	/// response returns immediately -- routing success says nothing about
	/// the business outcome. Transport errors and `5xx` decay the
	/// provider and fall through to the next candidate.
	pub async fn route(
		&self,
		path: &str,
		payload: &serde_json::Value,
		opts: RouteOptions,
	) -> Result<RouteResponse, RouterError> {
		let mut candidates: Vec<(String, String, f64)> = self
			.providers
			.iter()
			.filter(|p| p.is_routable())
			.map(|p| (p.id.clone(), p.endpoint.clone(), p.reliability))
			.collect();
		candidates.sort_by(|a, b| b.2.partial_cmp(&a.2).unwrap_or(std::cmp::Ordering::Equal));

		if candidates.is_empty() {
			return Err(RouterError::NoProviders);
		}

		let deadline = opts
			.deadline
			.map(|budget| tokio::time::Instant::now() + budget);
		let mut attempts = 0usize;

		for (provider_id, endpoint, _) in candidates.into_iter().take(self.config.max_attempts) {
			let (attempt_timeout, caller_bound) = match deadline {
				Some(at) => {
					let remaining = at.saturating_duration_since(tokio::time::Instant::now());
					if remaining.is_zero() {
						return Err(RouterError::Cancelled);
					}
					(remaining.min(ATTEMPT_TIMEOUT), remaining <= ATTEMPT_TIMEOUT)
				}
				None => (ATTEMPT_TIMEOUT, false),
			};

			let url = format!("{}{}", endpoint.trim_end_matches('/'), path);
			attempts += 1;
			debug!(provider_id = %provider_id, url = %url, attempt = attempts, "routing attempt");

			let outcome =
				tokio::time::timeout(attempt_timeout, self.transport.send(&url, payload, attempt_timeout))
					.await;

			match outcome {
				// The caller's deadline expired mid-flight. The outcome is
				// ambiguous, so the provider is not scored.
				Err(_) if caller_bound => return Err(RouterError::Cancelled),
				Err(_) => {
					warn!(provider_id = %provider_id, "attempt timed out");
					self.record_failure(&provider_id);
				}
				Ok(Err(e)) => {
					warn!(provider_id = %provider_id, error = %e, "transport error");
					self.record_failure(&provider_id);
				}
				Ok(Ok(response)) if response.status_code >= 500 => {
					warn!(
						provider_id = %provider_id,
						status = response.status_code,
						"provider returned server error"
					);
					self.record_failure(&provider_id);
				}
				Ok(Ok(response)) => {
					self.record_success(&provider_id);
					return Ok(RouteResponse {
						provider_id,
						status_code: response.status_code,
						body: response.body,
					});
				}
			}
		}

		Err(RouterError::Exhausted { attempts })
	}

	fn record_failure(&self, provider_id: &str) {
		let change = {
			let Some(mut provider) = self.providers.get_mut(provider_id) else {
				return;
			};
			let before = provider.status;
			provider.record_failure();
			(before != provider.status).then_some((before, provider.status))
		};
		self.publish_status_change(provider_id, change);
	}

	fn record_success(&self, provider_id: &str) {
		let change = {
			let Some(mut provider) = self.providers.get_mut(provider_id) else {
				return;
			};
			let before = provider.status;
			provider.record_success();
			(before != provider.status).then_some((before, provider.status))
		};
		self.publish_status_change(provider_id, change);
	}

	fn publish_status_change(
		&self,
		provider_id: &str,
		change: Option<(ProviderStatus, ProviderStatus)>,
	) {
		if let Some((from, to)) = change {
			info!(provider_id, ?from, ?to, "provider status changed");
			self.events
				.publish(SettleEvent::Provider(ProviderEvent::StatusChanged {
					provider_id: provider_id.to_string(),
					from,
					to,
				}));
		}
	}

	/// Probes every registered provider concurrently and applies the
	/// results.
	///
	/// Each probe is individually bounded by the probe timeout, and the
	/// fan-out runs them together, so one dead provider delays the sweep
	/// by at most that single timeout.
	pub async fn run_health_checks(&self) {
		let targets: Vec<(String, String)> = self
			.providers
			.iter()
			.map(|p| (p.id.clone(), p.endpoint.clone()))
			.collect();
		if targets.is_empty() {
			return;
		}

		let probe_timeout = Duration::from_millis(self.config.probe_timeout_ms);
		let probes = targets.into_iter().map(|(provider_id, endpoint)| {
			let prober = self.prober.clone();
			async move {
				match tokio::time::timeout(probe_timeout, prober.probe(&endpoint, probe_timeout))
					.await
				{
					Ok(Ok(outcome)) if outcome.healthy => {
						HealthProbeResult::ok(provider_id, outcome.response_time_ms)
					}
					Ok(Ok(outcome)) => HealthProbeResult {
						provider_id,
						response_time_ms: outcome.response_time_ms,
						success: false,
						timestamp: settle_types::now_ms(),
						error_message: Some("provider reports degraded".into()),
					},
					Ok(Err(e)) => HealthProbeResult::failed(provider_id, e.to_string()),
					Err(_) => HealthProbeResult::failed(provider_id, "probe timed out"),
				}
			}
		});

		let results = futures::future::join_all(probes).await;
		for result in results {
			let change = {
				let Some(mut provider) = self.providers.get_mut(&result.provider_id) else {
					continue;
				};
				let before = provider.status;
				provider.apply_probe(&result);
				(before != provider.status).then_some((before, provider.status))
			};
			if !result.success {
				debug!(
					provider_id = %result.provider_id,
					error = result.error_message.as_deref().unwrap_or("-"),
					"probe failed"
				);
			}
			self.publish_status_change(&result.provider_id, change);
		}

		self.select_active();
	}

	/// Deterministically designates the preferred provider.
	///
	/// Active providers are ranked by reliability; candidates within the
	/// tie window of the best score are separated by latency.
	pub fn select_active(&self) -> Option<String> {
		let mut actives: Vec<(String, f64, u64)> = self
			.providers
			.iter()
			.filter(|p| p.status == ProviderStatus::Active)
			.map(|p| (p.id.clone(), p.reliability, p.latency_ms))
			.collect();
		actives.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

		let winner = actives.first().map(|best| {
			let mut chosen = best.clone();
			for candidate in &actives[1..] {
				if best.1 - candidate.1 <= SELECTION_TIE_WINDOW && candidate.2 < chosen.2 {
					chosen = candidate.clone();
				}
			}
			chosen.0
		});

		let previous = self.active.load_full().map(|id| (*id).clone());
		if previous != winner {
			info!(active = winner.as_deref().unwrap_or("none"), "active provider changed");
			self.active.store(winner.clone().map(Arc::new));
			self.events
				.publish(SettleEvent::Provider(ProviderEvent::ActiveChanged {
					provider_id: winner.clone(),
				}));
		}
		winner
	}

	/// The currently designated active provider, if any.
	pub fn active_provider(&self) -> Option<String> {
		self.active.load_full().map(|id| (*id).clone())
	}

	/// Staged traffic cutover from one provider to another.
	///
	/// Walks the ratio checkpoints with a pause between steps (a real
	/// deployment would shift load-balancer weights at each one), then
	/// marks the source degraded pending decommission and repoints the
	/// active hint if needed. Returns the completed checkpoints.
	pub async fn migrate_traffic(&self, from: &str, to: &str) -> Result<Vec<f64>, RouterError> {
		if from == to {
			return Err(RouterError::Migration(
				"source and target are the same provider".into(),
			));
		}
		if !self.providers.contains_key(from) {
			return Err(RouterError::UnknownProvider(from.to_string()));
		}
		if !self.providers.contains_key(to) {
			return Err(RouterError::UnknownProvider(to.to_string()));
		}

		let pause = Duration::from_millis(self.config.migration_pause_ms);
		let mut completed = Vec::with_capacity(MIGRATION_CHECKPOINTS.len());
		for ratio in MIGRATION_CHECKPOINTS {
			info!(from, to, ratio, "migration checkpoint");
			tokio::time::sleep(pause).await;
			completed.push(ratio);
		}

		let change = {
			let Some(mut provider) = self.providers.get_mut(from) else {
				return Err(RouterError::UnknownProvider(from.to_string()));
			};
			let before = provider.status;
			provider.status = ProviderStatus::Degraded;
			(before != provider.status).then_some((before, provider.status))
		};
		self.publish_status_change(from, change);

		if self.active_provider().as_deref() == Some(from) {
			self.active.store(Some(Arc::new(to.to_string())));
			self.events
				.publish(SettleEvent::Provider(ProviderEvent::ActiveChanged {
					provider_id: Some(to.to_string()),
				}));
		}

		info!(from, to, "migration completed");
		self.events
			.publish(SettleEvent::Provider(ProviderEvent::MigrationCompleted {
				from: from.to_string(),
				to: to.to_string(),
			}));
		Ok(completed)
	}

	/// Capacity-driven scale-out policy.
	///
	/// Under high load with spare provider slots, registers a standby
	/// provider in the least-represented region. Advisory capacity
	/// management, not correctness-critical.
	pub fn scale_for_load(&self, current_load: f64) -> Option<Provider> {
		if current_load <= SCALE_LOAD_THRESHOLD {
			return None;
		}
		let active_count = self
			.providers
			.iter()
			.filter(|p| p.status == ProviderStatus::Active)
			.count();
		if active_count >= SCALE_TARGET_ACTIVE {
			return None;
		}

		let mut region_counts: std::collections::HashMap<String, usize> =
			std::collections::HashMap::new();
		for provider in self.providers.iter() {
			*region_counts.entry(provider.region.clone()).or_default() += 1;
		}
		let region = region_counts
			.into_iter()
			.min_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)))
			.map(|(region, _)| region)
			.unwrap_or_else(|| "primary".to_string());

		let suffix: String = new_id().chars().take(8).collect();
		let id = format!("standby-{}", suffix);
		let endpoint = format!("https://{}.{}.settle.internal", id, region);
		let provider = Provider::new(id.clone(), endpoint, region.clone());

		info!(
			provider_id = %id,
			region = %region,
			current_load,
			"scaling out with standby provider"
		);
		self.register_provider(provider.clone());
		Some(provider)
	}

	/// Observability snapshot: active pointer, provider list, mean
	/// reliability, and advisory recommendations.
	pub fn status(&self) -> RouterStatus {
		let mut providers: Vec<Provider> = self.providers.iter().map(|p| p.clone()).collect();
		providers.sort_by(|a, b| a.id.cmp(&b.id));

		let health_score = if providers.is_empty() {
			0.0
		} else {
			providers.iter().map(|p| p.reliability).sum::<f64>() / providers.len() as f64
		};

		let active_count = providers
			.iter()
			.filter(|p| p.status == ProviderStatus::Active)
			.count();
		let offline_count = providers
			.iter()
			.filter(|p| p.status == ProviderStatus::Offline)
			.count();

		let mut recommendations = Vec::new();
		if active_count < 2 {
			recommendations
				.push("fewer than 2 active providers; register additional capacity".to_string());
		}
		if offline_count > 0 {
			recommendations.push(format!(
				"{} provider(s) offline; investigate or deregister",
				offline_count
			));
		}
		if !providers.is_empty() && health_score < 0.5 {
			recommendations.push("mean reliability below 0.5; check upstream health".to_string());
		}

		RouterStatus {
			active_provider_id: self.active_provider(),
			providers,
			health_score,
			recommendations,
		}
	}

	/// Snapshot of one provider.
	pub fn provider(&self, provider_id: &str) -> Option<Provider> {
		self.providers.get(provider_id).map(|p| p.clone())
	}

	/// Spawns the health-check ticker. The returned handle completes
	/// after `shutdown`.
	pub fn start(self: Arc<Self>) -> JoinHandle<()> {
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let period = Duration::from_millis(self.config.health_check_interval_ms);

		tokio::spawn(async move {
			let mut interval =
				tokio::time::interval_at(tokio::time::Instant::now() + period, period);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			info!(interval_ms = period.as_millis() as u64, "health ticker started");

			loop {
				tokio::select! {
					_ = interval.tick() => {
						self.run_health_checks().await;
					}
					_ = shutdown_rx.recv() => {
						info!("health ticker stopping");
						break;
					}
				}
			}
		})
	}

	/// Stops the health-check ticker.
	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
	}
}
