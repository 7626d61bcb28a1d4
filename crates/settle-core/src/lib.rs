//! Engine wiring for the settle system.
//!
//! Connects the batch accumulator to the provider router through the
//! [`RouterSubmitter`], owns the audit trail, and manages the lifecycle
//! of both components' background work.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use settle_batch::{BatchAccumulator, BatchError};
use settle_router::{ProviderRouter, RouterError};
use settle_storage::{StorageError, StorageService};
use settle_types::configs::SettleConfig;
use settle_types::{BatchEvent, EventBus, Provider, SettleEvent};

pub mod submitter;

pub use submitter::RouterSubmitter;

#[derive(Debug, Error)]
pub enum CoreError {
	#[error("Configuration error: {0}")]
	Config(String),

	#[error(transparent)]
	Batch(#[from] BatchError),

	#[error(transparent)]
	Router(#[from] RouterError),

	#[error(transparent)]
	Storage(#[from] StorageError),
}

/// Storage namespace for terminal batch audit records.
const AUDIT_NAMESPACE: &str = "batches";

/// Owns the two components plus the audit store and the event loop that
/// links them to it.
pub struct Engine {
	accumulator: Arc<BatchAccumulator>,
	router: Arc<ProviderRouter>,
	storage: Arc<StorageService>,
	events: EventBus,
	shutdown_tx: broadcast::Sender<()>,
	tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl std::fmt::Debug for Engine {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Engine").finish_non_exhaustive()
	}
}

impl Engine {
	/// Starts the flush ticker, the health ticker, and the audit event
	/// loop.
	pub async fn start(&self) {
		info!("starting settle engine");
		let mut tasks = self.tasks.lock().await;
		tasks.push(self.accumulator.clone().start());
		tasks.push(self.router.clone().start());
		tasks.push(self.spawn_audit_loop());
	}

	/// Stops all background work and waits for it to wind down.
	pub async fn shutdown(&self) {
		info!("stopping settle engine");
		self.accumulator.shutdown();
		self.router.shutdown();
		let _ = self.shutdown_tx.send(());

		let mut tasks = self.tasks.lock().await;
		for task in tasks.drain(..) {
			if let Err(e) = task.await {
				warn!(error = %e, "background task ended abnormally");
			}
		}
	}

	/// Persists every batch that reaches a terminal state.
	fn spawn_audit_loop(&self) -> JoinHandle<()> {
		let accumulator = self.accumulator.clone();
		let storage = self.storage.clone();
		let mut events = self.events.subscribe();
		let mut shutdown_rx = self.shutdown_tx.subscribe();

		tokio::spawn(async move {
			loop {
				tokio::select! {
					event = events.recv() => {
						match event {
							Ok(SettleEvent::Batch(BatchEvent::Confirmed { batch_id, .. }))
							| Ok(SettleEvent::Batch(BatchEvent::Failed { batch_id, .. })) => {
								persist_audit_record(&accumulator, &storage, &batch_id).await;
							}
							Ok(_) => {}
							Err(broadcast::error::RecvError::Lagged(missed)) => {
								warn!(missed, "audit loop lagged behind event bus");
							}
							Err(broadcast::error::RecvError::Closed) => break,
						}
					}
					_ = shutdown_rx.recv() => break,
				}
			}
		})
	}

	/// Explicit confirmation callback for a submitted batch.
	pub async fn confirm_batch(&self, batch_id: &str) -> Result<(), CoreError> {
		self.accumulator.confirm(batch_id).await?;
		Ok(())
	}

	pub fn accumulator(&self) -> &Arc<BatchAccumulator> {
		&self.accumulator
	}

	pub fn router(&self) -> &Arc<ProviderRouter> {
		&self.router
	}

	pub fn storage(&self) -> &Arc<StorageService> {
		&self.storage
	}

	pub fn events(&self) -> &EventBus {
		&self.events
	}
}

async fn persist_audit_record(
	accumulator: &Arc<BatchAccumulator>,
	storage: &Arc<StorageService>,
	batch_id: &str,
) {
	let Some(batch) = accumulator.batch(batch_id) else {
		warn!(batch_id, "terminal event for unknown batch");
		return;
	};
	if let Err(e) = storage.store(AUDIT_NAMESPACE, batch_id, &batch).await {
		error!(batch_id, error = %e, "failed to persist audit record");
	}
}

/// Builds an [`Engine`] from configuration, with injection points for the
/// pluggable backends.
pub struct EngineBuilder {
	config: SettleConfig,
	transport: Option<Arc<dyn settle_router::RouteTransport>>,
	prober: Option<Arc<dyn settle_router::HealthProbe>>,
	submitter: Option<Arc<dyn settle_batch::Submitter>>,
	storage: Option<Box<dyn settle_storage::StorageInterface>>,
}

impl EngineBuilder {
	pub fn new(config: SettleConfig) -> Self {
		Self {
			config,
			transport: None,
			prober: None,
			submitter: None,
			storage: None,
		}
	}

	pub fn with_transport(mut self, transport: Arc<dyn settle_router::RouteTransport>) -> Self {
		self.transport = Some(transport);
		self
	}

	pub fn with_prober(mut self, prober: Arc<dyn settle_router::HealthProbe>) -> Self {
		self.prober = Some(prober);
		self
	}

	pub fn with_submitter(mut self, submitter: Arc<dyn settle_batch::Submitter>) -> Self {
		self.submitter = Some(submitter);
		self
	}

	pub fn with_storage(mut self, storage: Box<dyn settle_storage::StorageInterface>) -> Self {
		self.storage = Some(storage);
		self
	}

	pub fn build(self) -> Result<Arc<Engine>, CoreError> {
		let events = EventBus::new(1000);

		let storage_backend: Box<dyn settle_storage::StorageInterface> = match self.storage {
			Some(backend) => backend,
			None => match self.config.storage.backend.as_str() {
				"memory" => Box::new(
					settle_storage::implementations::memory::MemoryStorage::new(),
				),
				"file" => Box::new(settle_storage::implementations::file::FileStorage::new(
					self.config.storage.path.clone().into(),
				)),
				other => {
					return Err(CoreError::Config(format!(
						"unknown storage backend: {}",
						other
					)))
				}
			},
		};
		let storage = Arc::new(StorageService::new(storage_backend));

		let transport = self
			.transport
			.unwrap_or_else(|| Arc::new(settle_router::HttpTransport::new()));
		let prober = self
			.prober
			.unwrap_or_else(|| Arc::new(settle_router::HttpProber::new()));

		let router = ProviderRouter::new(
			self.config.router.clone(),
			transport,
			prober,
			events.clone(),
		);
		for seed in &self.config.providers {
			router.register_provider(Provider::new(
				seed.id.clone(),
				seed.endpoint.clone(),
				seed.region.clone(),
			));
		}

		let submitter = self
			.submitter
			.unwrap_or_else(|| Arc::new(RouterSubmitter::new(router.clone())));
		let accumulator =
			BatchAccumulator::new(self.config.batch.clone(), submitter, events.clone());

		let (shutdown_tx, _) = broadcast::channel(1);
		Ok(Arc::new(Engine {
			accumulator,
			router,
			storage,
			events,
			shutdown_tx,
			tasks: Mutex::new(Vec::new()),
		}))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rust_decimal::Decimal;
	use settle_router::{RouteTransport, TransportError, TransportResponse};
	use settle_types::configs::ProviderSeed;
	use settle_types::{Batch, BatchStatus, PendingOrder};
	use std::sync::atomic::{AtomicBool, Ordering};
	use std::time::Duration;

	/// Transport fake standing in for the settlement providers.
	struct StubTransport {
		reject: AtomicBool,
	}

	impl StubTransport {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				reject: AtomicBool::new(false),
			})
		}
	}

	#[async_trait]
	impl RouteTransport for StubTransport {
		async fn send(
			&self,
			_url: &str,
			payload: &serde_json::Value,
			_timeout: Duration,
		) -> Result<TransportResponse, TransportError> {
			if self.reject.load(Ordering::SeqCst) {
				return Ok(TransportResponse {
					status_code: 422,
					body: serde_json::json!({"error": "commitment rejected"}),
				});
			}
			let batch_id = payload
				.get("batch_id")
				.and_then(|v| v.as_str())
				.unwrap_or("unknown");
			Ok(TransportResponse {
				status_code: 200,
				body: serde_json::json!({
					"reference": format!("settled-{}", batch_id),
					"cost_metric": "0.31",
				}),
			})
		}
	}

	fn test_config() -> SettleConfig {
		let mut config = SettleConfig::default();
		config.providers = vec![ProviderSeed {
			id: "primary".into(),
			endpoint: "http://primary.test".into(),
			region: "eu-west".into(),
		}];
		config
	}

	fn engine_with(transport: Arc<StubTransport>) -> Arc<Engine> {
		EngineBuilder::new(test_config())
			.with_transport(transport)
			.build()
			.unwrap()
	}

	async fn wait_for_audit(engine: &Engine, batch_id: &str) -> Batch {
		for _ in 0..50 {
			if let Ok(batch) = engine
				.storage()
				.retrieve::<Batch>("batches", batch_id)
				.await
			{
				return batch;
			}
			tokio::time::sleep(Duration::from_millis(10)).await;
		}
		panic!("audit record for {} never appeared", batch_id);
	}

	#[tokio::test]
	async fn test_end_to_end_enqueue_submit_confirm() {
		let transport = StubTransport::new();
		let engine = engine_with(transport);
		engine.start().await;

		let accumulator = engine.accumulator().clone();
		for _ in 0..5 {
			accumulator
				.enqueue(PendingOrder::new("r1", Decimal::from(10)))
				.await
				.unwrap();
		}
		accumulator.flush().await;

		let metrics = accumulator.metrics();
		assert_eq!(metrics.total_batches, 1);
		assert_eq!(metrics.pending_orders, 0);
		assert_eq!(metrics.processed_orders, 5);

		// The routed submission was scored as a success on the seeded
		// provider.
		let provider = engine.router().provider("primary").unwrap();
		assert_eq!(provider.consecutive_failures, 0);
		assert_eq!(
			engine.router().active_provider().as_deref(),
			Some("primary")
		);

		engine.shutdown().await;
	}

	#[tokio::test]
	async fn test_confirmed_batch_is_audited() {
		let transport = StubTransport::new();
		let engine = engine_with(transport);
		engine.start().await;

		let mut events = engine.events().subscribe();
		let accumulator = engine.accumulator().clone();
		for _ in 0..5 {
			accumulator
				.enqueue(PendingOrder::new("r1", Decimal::from(10)))
				.await
				.unwrap();
		}
		accumulator.flush().await;

		let batch_id = loop {
			match events.recv().await.unwrap() {
				SettleEvent::Batch(BatchEvent::Submitted { batch_id, provider_ref }) => {
					assert!(provider_ref.starts_with("settled-"));
					break batch_id;
				}
				_ => continue,
			}
		};

		engine.confirm_batch(&batch_id).await.unwrap();

		let audited = wait_for_audit(&engine, &batch_id).await;
		assert_eq!(audited.status, BatchStatus::Confirmed);
		assert!(audited.provider_ref.is_some());

		engine.shutdown().await;
	}

	#[tokio::test]
	async fn test_rejected_submission_fails_batch_and_is_audited() {
		let transport = StubTransport::new();
		transport.reject.store(true, Ordering::SeqCst);
		let engine = engine_with(transport);
		engine.start().await;

		let mut events = engine.events().subscribe();
		let accumulator = engine.accumulator().clone();
		for _ in 0..5 {
			accumulator
				.enqueue(PendingOrder::new("r1", Decimal::from(10)))
				.await
				.unwrap();
		}
		accumulator.flush().await;

		let batch_id = loop {
			match events.recv().await.unwrap() {
				SettleEvent::Batch(BatchEvent::Failed {
					batch_id,
					requeued_orders,
					..
				}) => {
					assert_eq!(requeued_orders, 5);
					break batch_id;
				}
				_ => continue,
			}
		};

		// Orders are pending again and the failure is on record.
		assert_eq!(accumulator.pending_count("r1"), 5);
		let audited = wait_for_audit(&engine, &batch_id).await;
		assert_eq!(audited.status, BatchStatus::Failed);
		assert!(audited.error_message.is_some());

		engine.shutdown().await;
	}

	#[tokio::test]
	async fn test_builder_rejects_unknown_storage_backend() {
		let mut config = SettleConfig::default();
		config.storage.backend = "redis".into();
		assert!(matches!(
			EngineBuilder::new(config).build().unwrap_err(),
			CoreError::Config(_)
		));
	}
}
