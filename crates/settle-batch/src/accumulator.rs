//! The batch accumulator service.

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use tokio::sync::{broadcast, mpsc, watch, RwLock};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use settle_types::configs::{BatchConfig, BatchConfigPatch, BATCH_TIMEOUT_FLOOR_MS, MAX_BATCH_SIZE_BOUNDS};
use settle_types::{
	now_ms, Batch, BatchEvent, BatchMetrics, BatchStatus, EnqueueOutcome, EventBus, PendingOrder,
	SettleEvent, SubmitPayload,
};

use crate::commitment::build_commitment;
use crate::{estimate_cost, estimate_savings, BatchError, Submitter};

/// Accumulates orders into per-restaurant batches and drives them through
/// submission.
///
/// All queue mutation for one restaurant happens under that restaurant's
/// map entry lock; no lock is held across backend I/O.
pub struct BatchAccumulator {
	config: RwLock<BatchConfig>,
	/// Pending orders keyed by restaurant.
	queues: DashMap<String, VecDeque<PendingOrder>>,
	/// Every sealed batch, retained for audit and metrics.
	batches: DashMap<String, Batch>,
	/// Orders moved out of a queue, held until their batch is submitted
	/// or failed so a failure can recreate them.
	in_flight: DashMap<String, Vec<PendingOrder>>,
	submitter: Arc<dyn Submitter>,
	events: EventBus,
	timeout_tx: watch::Sender<u64>,
	shutdown_tx: broadcast::Sender<()>,
	/// Batches sealed on the enqueue path, handed to the background task
	/// so the caller never waits on submission.
	submit_tx: mpsc::UnboundedSender<String>,
	submit_rx: std::sync::Mutex<Option<mpsc::UnboundedReceiver<String>>>,
}

impl BatchAccumulator {
	pub fn new(config: BatchConfig, submitter: Arc<dyn Submitter>, events: EventBus) -> Arc<Self> {
		let (timeout_tx, _) = watch::channel(config.timeout_ms);
		let (shutdown_tx, _) = broadcast::channel(1);
		let (submit_tx, submit_rx) = mpsc::unbounded_channel();
		Arc::new(Self {
			config: RwLock::new(config),
			queues: DashMap::new(),
			batches: DashMap::new(),
			in_flight: DashMap::new(),
			submitter,
			events,
			timeout_tx,
			shutdown_tx,
			submit_tx,
			submit_rx: std::sync::Mutex::new(Some(submit_rx)),
		})
	}

	/// Adds an order to its restaurant's queue.
	///
	/// Returns synchronously in every case: queued, sealed (the order
	/// tipped the queue over the size boundary), or immediately submitted
	/// when batching is disabled. Never waits on batch confirmation.
	pub async fn enqueue(&self, order: PendingOrder) -> Result<EnqueueOutcome, BatchError> {
		order.validate().map_err(|e| BatchError::Queue(e.to_string()))?;

		let config = self.config.read().await.clone();

		if !config.enabled {
			return self.submit_single(order).await;
		}

		let restaurant_id = order.restaurant_id.clone();
		let sealed = {
			let mut queue = self.queues.entry(restaurant_id.clone()).or_default();
			queue.push_back(order);
			if queue.len() >= config.max_batch_size {
				let drained: Vec<PendingOrder> =
					queue.drain(..config.max_batch_size).collect();
				Some(drained)
			} else {
				None
			}
		};

		match sealed {
			Some(orders) => {
				let batch_id = self.seal(&restaurant_id, orders);
				// Submission happens off the caller's path, on the
				// background task.
				if self.submit_tx.send(batch_id.clone()).is_err() {
					debug!(batch_id = %batch_id, "background task gone, batch awaits flush");
				}
				Ok(EnqueueOutcome::Sealed { batch_id })
			}
			None => {
				let pending_count = self.pending_count(&restaurant_id);
				Ok(EnqueueOutcome::Queued { pending_count })
			}
		}
	}

	/// Submits a single order as a batch of one, used when batching is
	/// globally disabled.
	async fn submit_single(&self, order: PendingOrder) -> Result<EnqueueOutcome, BatchError> {
		let restaurant_id = order.restaurant_id.clone();
		let batch_id = self.seal(&restaurant_id, vec![order]);
		self.submit_batch(&batch_id).await?;

		let batch = self
			.batches
			.get(&batch_id)
			.ok_or_else(|| BatchError::UnknownBatch(batch_id.clone()))?;
		match (&batch.status, &batch.provider_ref) {
			(BatchStatus::Submitted, Some(reference)) => Ok(EnqueueOutcome::Immediate {
				reference: reference.clone(),
			}),
			// Submission failed; the order went back to the queue and the
			// caller still gets an acknowledgment.
			_ => Ok(EnqueueOutcome::Queued {
				pending_count: self.pending_count(&restaurant_id),
			}),
		}
	}

	/// Seals drained orders into a new pending batch.
	fn seal(&self, restaurant_id: &str, orders: Vec<PendingOrder>) -> String {
		let batch = Batch::seal(restaurant_id, &orders);
		let batch_id = batch.id.clone();
		info!(
			batch_id = %batch_id,
			restaurant_id,
			batch_size = batch.batch_size,
			"sealed batch"
		);
		let batch_size = batch.batch_size;
		self.in_flight.insert(batch_id.clone(), orders);
		self.batches.insert(batch_id.clone(), batch);
		self.events.publish(SettleEvent::Batch(BatchEvent::Sealed {
			batch_id: batch_id.clone(),
			restaurant_id: restaurant_id.to_string(),
			batch_size,
		}));
		batch_id
	}

	/// Seals every eligible queue: pending count at or above the minimum
	/// threshold, or an oldest order older than the batch timeout.
	pub async fn flush(&self) {
		let config = self.config.read().await.clone();
		let now = now_ms();

		let restaurants: Vec<String> = self.queues.iter().map(|e| e.key().clone()).collect();
		for restaurant_id in restaurants {
			let drained = {
				let Some(mut queue) = self.queues.get_mut(&restaurant_id) else {
					continue;
				};
				if queue.is_empty() {
					None
				} else {
					let oldest_age = queue.front().map(|o| o.age_ms(now)).unwrap_or(0);
					if queue.len() >= config.min_batch_size || oldest_age > config.timeout_ms {
						let take = queue.len().min(config.max_batch_size);
						Some(queue.drain(..take).collect::<Vec<PendingOrder>>())
					} else {
						None
					}
				}
			};

			if let Some(orders) = drained {
				debug!(
					restaurant_id = %restaurant_id,
					count = orders.len(),
					"flush sealing queue"
				);
				let batch_id = self.seal(&restaurant_id, orders);
				if let Err(e) = self.submit_batch(&batch_id).await {
					error!(batch_id = %batch_id, error = %e, "batch submission errored");
				}
			}
		}
	}

	/// Drives one batch through submission.
	///
	/// The payload is snapshotted under the entry lock, the backend call
	/// runs without it, and the outcome is applied under it again.
	pub async fn submit_batch(&self, batch_id: &str) -> Result<(), BatchError> {
		let payload = {
			let mut batch = self
				.batches
				.get_mut(batch_id)
				.ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;
			batch.transition(BatchStatus::Processing)?;
			SubmitPayload {
				batch_id: batch.id.clone(),
				restaurant_id: batch.restaurant_id.clone(),
				order_ids: batch.order_ids.clone(),
				commitment: build_commitment(&batch.order_ids),
				total_value: batch.total_value,
			}
		};

		match self.submitter.submit(&payload).await {
			Ok(receipt) => {
				let mut batch = self
					.batches
					.get_mut(batch_id)
					.ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;
				batch.transition(BatchStatus::Submitted)?;
				batch.provider_ref = Some(receipt.reference.clone());
				batch.cost_metric = Some(format!("{:.4}", estimate_cost(batch.batch_size)));
				info!(
					batch_id = %batch_id,
					reference = %receipt.reference,
					"batch submitted"
				);
				drop(batch);

				self.in_flight.remove(batch_id);
				self.events.publish(SettleEvent::Batch(BatchEvent::Submitted {
					batch_id: batch_id.to_string(),
					provider_ref: receipt.reference,
				}));
				Ok(())
			}
			Err(e) => {
				{
					let mut batch = self
						.batches
						.get_mut(batch_id)
						.ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;
					batch.transition(BatchStatus::Failed)?;
					batch.error_message = Some(e.to_string());
				}
				warn!(batch_id = %batch_id, error = %e, "batch submission failed, requeueing orders");

				let requeued = self.requeue_failed(batch_id);
				self.events.publish(SettleEvent::Batch(BatchEvent::Failed {
					batch_id: batch_id.to_string(),
					error: e.to_string(),
					requeued_orders: requeued,
				}));
				Ok(())
			}
		}
	}

	/// Recreates every order of a failed batch as a fresh pending entry.
	///
	/// Requeued orders bypass the size-seal boundary; they only leave the
	/// queue through timer-driven flushing.
	fn requeue_failed(&self, batch_id: &str) -> usize {
		let Some((_, orders)) = self.in_flight.remove(batch_id) else {
			return 0;
		};
		let count = orders.len();
		for order in orders {
			let fresh = PendingOrder {
				enqueued_at: now_ms(),
				..order
			};
			self.queues
				.entry(fresh.restaurant_id.clone())
				.or_default()
				.push_back(fresh);
		}
		count
	}

	/// Out-of-band confirmation callback. Until it arrives a submitted
	/// batch stays `Submitted`; it is never assumed confirmed on a timer.
	pub async fn confirm(&self, batch_id: &str) -> Result<(), BatchError> {
		let confirmed_at = {
			let mut batch = self
				.batches
				.get_mut(batch_id)
				.ok_or_else(|| BatchError::UnknownBatch(batch_id.to_string()))?;
			batch.transition(BatchStatus::Confirmed)?;
			batch.confirmed_at.unwrap_or_else(now_ms)
		};
		info!(batch_id = %batch_id, "batch confirmed");
		self.events.publish(SettleEvent::Batch(BatchEvent::Confirmed {
			batch_id: batch_id.to_string(),
			confirmed_at,
		}));
		Ok(())
	}

	/// Applies a partial configuration update atomically.
	///
	/// `max_batch_size` is clamped to its bounds, `timeout_ms` floored;
	/// anything unrepairable is rejected before any field changes. A
	/// timeout change restarts the flush timer.
	pub async fn configure(&self, patch: BatchConfigPatch) -> Result<BatchConfig, BatchError> {
		let mut config = self.config.write().await;
		let mut next = config.clone();

		if let Some(enabled) = patch.enabled {
			next.enabled = enabled;
		}
		if let Some(size) = patch.max_batch_size {
			let (lo, hi) = MAX_BATCH_SIZE_BOUNDS;
			let clamped = size.clamp(lo, hi);
			if clamped < next.min_batch_size {
				return Err(BatchError::Config(format!(
					"max_batch_size {} below min_batch_size {}",
					clamped, next.min_batch_size
				)));
			}
			next.max_batch_size = clamped;
		}
		if let Some(timeout_ms) = patch.timeout_ms {
			next.timeout_ms = timeout_ms.max(BATCH_TIMEOUT_FLOOR_MS);
		}

		let timeout_changed = next.timeout_ms != config.timeout_ms;
		*config = next.clone();
		drop(config);

		if timeout_changed {
			let _ = self.timeout_tx.send(next.timeout_ms);
		}
		info!(
			enabled = next.enabled,
			max_batch_size = next.max_batch_size,
			timeout_ms = next.timeout_ms,
			"batching reconfigured"
		);
		Ok(next)
	}

	/// Aggregate statistics derived by scanning the retained batch set.
	pub fn metrics(&self) -> BatchMetrics {
		let pending_orders: usize = self.queues.iter().map(|q| q.len()).sum();

		let mut total_batches = 0usize;
		let mut size_sum = 0usize;
		let mut processed_orders = 0usize;
		let mut savings = 0.0f64;
		let mut confirmed = 0usize;
		let mut processing_ms_sum = 0u64;

		for batch in self.batches.iter() {
			total_batches += 1;
			size_sum += batch.batch_size;
			match batch.status {
				BatchStatus::Submitted | BatchStatus::Confirmed => {
					processed_orders += batch.batch_size;
					savings += estimate_savings(batch.batch_size);
				}
				_ => {}
			}
			if let Some(elapsed) = batch.processing_time_ms() {
				confirmed += 1;
				processing_ms_sum += elapsed;
			}
		}

		BatchMetrics {
			total_batches,
			pending_orders,
			processed_orders,
			avg_batch_size: if total_batches > 0 {
				size_sum as f64 / total_batches as f64
			} else {
				0.0
			},
			avg_processing_time_ms: if confirmed > 0 {
				processing_ms_sum as f64 / confirmed as f64
			} else {
				0.0
			},
			total_cost_savings: savings,
		}
	}

	/// Snapshot of a retained batch.
	pub fn batch(&self, batch_id: &str) -> Option<Batch> {
		self.batches.get(batch_id).map(|b| b.clone())
	}

	/// Current pending count for one restaurant.
	pub fn pending_count(&self, restaurant_id: &str) -> usize {
		self.queues.get(restaurant_id).map(|q| q.len()).unwrap_or(0)
	}

	/// Spawns the background task: the flush ticker plus the submission
	/// drain for batches sealed on the enqueue path. The returned handle
	/// completes after `shutdown`.
	pub fn start(self: Arc<Self>) -> JoinHandle<()> {
		let mut shutdown_rx = self.shutdown_tx.subscribe();
		let mut timeout_rx = self.timeout_tx.subscribe();
		let mut submit_rx = self
			.submit_rx
			.lock()
			.unwrap()
			.take()
			.expect("accumulator already started");

		tokio::spawn(async move {
			let mut period = Duration::from_millis(*timeout_rx.borrow());
			let mut interval =
				tokio::time::interval_at(tokio::time::Instant::now() + period, period);
			interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			info!(timeout_ms = period.as_millis() as u64, "flush ticker started");

			loop {
				tokio::select! {
					_ = interval.tick() => {
						self.flush().await;
					}
					Some(batch_id) = submit_rx.recv() => {
						if let Err(e) = self.submit_batch(&batch_id).await {
							error!(batch_id = %batch_id, error = %e, "batch submission errored");
						}
					}
					changed = timeout_rx.changed() => {
						if changed.is_err() {
							break;
						}
						period = Duration::from_millis(*timeout_rx.borrow());
						interval = tokio::time::interval_at(
							tokio::time::Instant::now() + period,
							period,
						);
						interval.set_missed_tick_behavior(
							tokio::time::MissedTickBehavior::Skip,
						);
						info!(timeout_ms = period.as_millis() as u64, "flush ticker restarted");
					}
					_ = shutdown_rx.recv() => {
						info!("flush ticker stopping");
						break;
					}
				}
			}
		})
	}

	/// Stops the flush ticker.
	pub fn shutdown(&self) {
		let _ = self.shutdown_tx.send(());
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use async_trait::async_trait;
	use rust_decimal::Decimal;
	use settle_types::SubmitReceipt;
	use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
	use std::sync::Mutex;

	use crate::SubmitError;

	/// Submitter fake with a switchable failure mode.
	struct MockSubmitter {
		fail: AtomicBool,
		submissions: Mutex<Vec<SubmitPayload>>,
		counter: AtomicUsize,
	}

	impl MockSubmitter {
		fn new() -> Arc<Self> {
			Arc::new(Self {
				fail: AtomicBool::new(false),
				submissions: Mutex::new(Vec::new()),
				counter: AtomicUsize::new(0),
			})
		}

		fn set_failing(&self, failing: bool) {
			self.fail.store(failing, Ordering::SeqCst);
		}

		fn submissions(&self) -> Vec<SubmitPayload> {
			self.submissions.lock().unwrap().clone()
		}
	}

	#[async_trait]
	impl Submitter for MockSubmitter {
		async fn submit(&self, payload: &SubmitPayload) -> Result<SubmitReceipt, SubmitError> {
			self.submissions.lock().unwrap().push(payload.clone());
			if self.fail.load(Ordering::SeqCst) {
				return Err(SubmitError::Unreachable("connection refused".into()));
			}
			let n = self.counter.fetch_add(1, Ordering::SeqCst);
			Ok(SubmitReceipt {
				reference: format!("ref-{}", n),
				cost_metric: "0.0".into(),
			})
		}
	}

	fn accumulator_with(
		config: BatchConfig,
		submitter: Arc<MockSubmitter>,
	) -> Arc<BatchAccumulator> {
		BatchAccumulator::new(config, submitter, EventBus::new(64))
	}

	fn order(restaurant: &str) -> PendingOrder {
		PendingOrder::new(restaurant, Decimal::from(12))
	}

	#[tokio::test]
	async fn test_small_queue_survives_early_flush() {
		// Scenario: 4 orders with min threshold 5 and young queue age.
		let acc = accumulator_with(BatchConfig::default(), MockSubmitter::new());
		for _ in 0..4 {
			let outcome = acc.enqueue(order("r1")).await.unwrap();
			assert!(matches!(outcome, EnqueueOutcome::Queued { .. }));
		}

		acc.flush().await;

		assert_eq!(acc.pending_count("r1"), 4);
		assert_eq!(acc.metrics().total_batches, 0);
	}

	#[tokio::test]
	async fn test_reaching_max_size_seals_synchronously() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter);

		let mut sealed_batch_id = None;
		for i in 0..50 {
			match acc.enqueue(order("r1")).await.unwrap() {
				EnqueueOutcome::Queued { pending_count } => {
					assert!(i < 49);
					// Boundary invariant: a seal always happens before the
					// queue can reach the maximum.
					assert!(pending_count <= 49);
				}
				EnqueueOutcome::Sealed { batch_id } => {
					assert_eq!(i, 49);
					sealed_batch_id = Some(batch_id);
				}
				other => panic!("unexpected outcome: {:?}", other),
			}
		}

		let batch_id = sealed_batch_id.expect("50th enqueue must seal");
		assert_eq!(acc.pending_count("r1"), 0);

		let batch = acc.batch(&batch_id).unwrap();
		assert_eq!(batch.batch_size, 50);
		assert_eq!(batch.restaurant_id, "r1");
	}

	#[tokio::test]
	async fn test_flush_seals_at_min_threshold() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter.clone());

		for _ in 0..5 {
			acc.enqueue(order("r1")).await.unwrap();
		}
		acc.flush().await;

		assert_eq!(acc.pending_count("r1"), 0);
		let submissions = submitter.submissions();
		assert_eq!(submissions.len(), 1);
		assert_eq!(submissions[0].order_ids.len(), 5);
		assert!(!submissions[0].commitment.is_empty());
	}

	#[tokio::test]
	async fn test_flush_seals_aged_orders_below_threshold() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter.clone());

		let mut stale = order("r1");
		stale.enqueued_at = now_ms() - 60_000;
		acc.enqueue(stale).await.unwrap();

		acc.flush().await;

		assert_eq!(acc.pending_count("r1"), 0);
		assert_eq!(submitter.submissions().len(), 1);
	}

	#[tokio::test]
	async fn test_failed_submission_requeues_all_orders() {
		let submitter = MockSubmitter::new();
		submitter.set_failing(true);
		let acc = accumulator_with(BatchConfig::default(), submitter.clone());

		let mut ids = Vec::new();
		for _ in 0..5 {
			let o = order("r1");
			ids.push(o.id.clone());
			acc.enqueue(o).await.unwrap();
		}
		acc.flush().await;

		// The batch failed and every order is pending again.
		assert_eq!(acc.pending_count("r1"), 5);
		let metrics = acc.metrics();
		assert_eq!(metrics.total_batches, 1);
		assert_eq!(metrics.processed_orders, 0);

		let requeued: Vec<String> = acc
			.queues
			.get("r1")
			.unwrap()
			.iter()
			.map(|o| o.id.clone())
			.collect();
		for id in &ids {
			assert!(requeued.contains(id));
		}

		// Recovery: backend comes back, the next flush succeeds.
		submitter.set_failing(false);
		acc.flush().await;
		assert_eq!(acc.pending_count("r1"), 0);
		assert_eq!(acc.metrics().processed_orders, 5);
	}

	#[tokio::test]
	async fn test_no_order_appears_in_two_batches() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter.clone());

		for _ in 0..20 {
			acc.enqueue(order("r1")).await.unwrap();
		}
		acc.flush().await;
		for _ in 0..20 {
			acc.enqueue(order("r1")).await.unwrap();
		}
		acc.flush().await;

		let submissions = submitter.submissions();
		assert_eq!(submissions.len(), 2);
		let mut seen = std::collections::HashSet::new();
		for payload in &submissions {
			for id in &payload.order_ids {
				assert!(seen.insert(id.clone()), "order {} sealed twice", id);
			}
		}
	}

	#[tokio::test]
	async fn test_batches_never_mix_restaurants() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter.clone());

		for _ in 0..5 {
			acc.enqueue(order("r1")).await.unwrap();
			acc.enqueue(order("r2")).await.unwrap();
		}
		acc.flush().await;

		for payload in submitter.submissions() {
			let batch = acc.batch(&payload.batch_id).unwrap();
			assert!(batch.order_ids.len() == 5);
			assert!(payload.restaurant_id == "r1" || payload.restaurant_id == "r2");
		}
	}

	#[tokio::test]
	async fn test_disabled_batching_submits_immediately() {
		let submitter = MockSubmitter::new();
		let config = BatchConfig {
			enabled: false,
			..BatchConfig::default()
		};
		let acc = accumulator_with(config, submitter.clone());

		match acc.enqueue(order("r1")).await.unwrap() {
			EnqueueOutcome::Immediate { reference } => assert!(reference.starts_with("ref-")),
			other => panic!("unexpected outcome: {:?}", other),
		}
		assert_eq!(submitter.submissions().len(), 1);
		assert_eq!(acc.pending_count("r1"), 0);
	}

	#[tokio::test]
	async fn test_disabled_batching_failure_falls_back_to_queue() {
		let submitter = MockSubmitter::new();
		submitter.set_failing(true);
		let config = BatchConfig {
			enabled: false,
			..BatchConfig::default()
		};
		let acc = accumulator_with(config, submitter);

		match acc.enqueue(order("r1")).await.unwrap() {
			EnqueueOutcome::Queued { pending_count } => assert_eq!(pending_count, 1),
			other => panic!("unexpected outcome: {:?}", other),
		}
	}

	#[tokio::test]
	async fn test_rejects_invalid_orders() {
		let acc = accumulator_with(BatchConfig::default(), MockSubmitter::new());
		let mut bad = order("r1");
		bad.restaurant_id.clear();
		let err = acc.enqueue(bad).await.unwrap_err();
		assert!(matches!(err, BatchError::Queue(_)));
		assert_eq!(acc.metrics().pending_orders, 0);
	}

	#[tokio::test]
	async fn test_confirm_transitions_and_is_required() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter.clone());

		for _ in 0..5 {
			acc.enqueue(order("r1")).await.unwrap();
		}
		acc.flush().await;
		let batch_id = submitter.submissions()[0].batch_id.clone();

		// Submitted until the out-of-band callback arrives.
		assert_eq!(acc.batch(&batch_id).unwrap().status, BatchStatus::Submitted);
		assert_eq!(acc.metrics().avg_processing_time_ms, 0.0);

		acc.confirm(&batch_id).await.unwrap();
		let batch = acc.batch(&batch_id).unwrap();
		assert_eq!(batch.status, BatchStatus::Confirmed);
		assert!(batch.confirmed_at.is_some());

		// Confirming twice is a transition error.
		assert!(acc.confirm(&batch_id).await.is_err());
	}

	#[tokio::test]
	async fn test_configure_clamps_and_restarts_timer() {
		let acc = accumulator_with(BatchConfig::default(), MockSubmitter::new());

		let updated = acc
			.configure(BatchConfigPatch {
				enabled: None,
				max_batch_size: Some(500),
				timeout_ms: Some(10),
			})
			.await
			.unwrap();
		assert_eq!(updated.max_batch_size, 100);
		assert_eq!(updated.timeout_ms, BATCH_TIMEOUT_FLOOR_MS);
		assert_eq!(*acc.timeout_tx.borrow(), BATCH_TIMEOUT_FLOOR_MS);
	}

	#[tokio::test]
	async fn test_configure_rejects_without_partial_mutation() {
		let acc = accumulator_with(BatchConfig::default(), MockSubmitter::new());

		let err = acc
			.configure(BatchConfigPatch {
				enabled: Some(false),
				max_batch_size: Some(2), // below min_batch_size 5
				timeout_ms: None,
			})
			.await
			.unwrap_err();
		assert!(matches!(err, BatchError::Config(_)));

		let config = acc.config.read().await.clone();
		assert!(config.enabled, "rejected patch must not apply any field");
		assert_eq!(config.max_batch_size, 50);
	}

	#[tokio::test]
	async fn test_metrics_are_idempotent() {
		let submitter = MockSubmitter::new();
		let acc = accumulator_with(BatchConfig::default(), submitter);
		for _ in 0..7 {
			acc.enqueue(order("r1")).await.unwrap();
		}
		acc.flush().await;

		let first = acc.metrics();
		let second = acc.metrics();
		assert_eq!(first, second);
	}

	#[tokio::test]
	async fn test_background_task_submits_boundary_seals() {
		let submitter = MockSubmitter::new();
		let config = BatchConfig {
			max_batch_size: 3,
			min_batch_size: 2,
			..BatchConfig::default()
		};
		let acc = accumulator_with(config, submitter);
		let handle = acc.clone().start();

		let mut sealed = None;
		for _ in 0..3 {
			if let EnqueueOutcome::Sealed { batch_id } = acc.enqueue(order("r1")).await.unwrap() {
				sealed = Some(batch_id);
			}
		}
		let batch_id = sealed.expect("third enqueue seals");

		// The background task drains the sealed batch into submission.
		let mut status = acc.batch(&batch_id).unwrap().status;
		for _ in 0..200 {
			if status == BatchStatus::Submitted {
				break;
			}
			tokio::time::sleep(Duration::from_millis(5)).await;
			status = acc.batch(&batch_id).unwrap().status;
		}
		assert_eq!(status, BatchStatus::Submitted);

		acc.shutdown();
		handle.await.unwrap();
	}

	#[tokio::test]
	async fn test_ticker_start_and_shutdown() {
		let acc = accumulator_with(BatchConfig::default(), MockSubmitter::new());
		let handle = acc.clone().start();
		acc.shutdown();
		handle.await.unwrap();
	}
}
