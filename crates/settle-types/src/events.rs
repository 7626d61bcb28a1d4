use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use crate::common::Timestamp;
use crate::provider::ProviderStatus;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SettleEvent {
	Batch(BatchEvent),
	Provider(ProviderEvent),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum BatchEvent {
	Sealed {
		batch_id: String,
		restaurant_id: String,
		batch_size: usize,
	},
	Submitted {
		batch_id: String,
		provider_ref: String,
	},
	Confirmed {
		batch_id: String,
		confirmed_at: Timestamp,
	},
	Failed {
		batch_id: String,
		error: String,
		requeued_orders: usize,
	},
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum ProviderEvent {
	Registered {
		provider_id: String,
		region: String,
	},
	Deregistered {
		provider_id: String,
	},
	StatusChanged {
		provider_id: String,
		from: ProviderStatus,
		to: ProviderStatus,
	},
	ActiveChanged {
		provider_id: Option<String>,
	},
	MigrationCompleted {
		from: String,
		to: String,
	},
}

/// Broadcast bus for component events.
///
/// Subscribers are lossy; a slow consumer drops events rather than
/// backpressuring the producers.
pub struct EventBus {
	sender: broadcast::Sender<SettleEvent>,
}

impl EventBus {
	pub fn new(capacity: usize) -> Self {
		let (sender, _) = broadcast::channel(capacity);
		Self { sender }
	}

	pub fn subscribe(&self) -> broadcast::Receiver<SettleEvent> {
		self.sender.subscribe()
	}

	pub fn publish(&self, event: SettleEvent) {
		// Send fails only when there are no subscribers, which is fine.
		let _ = self.sender.send(event);
	}
}

impl Clone for EventBus {
	fn clone(&self) -> Self {
		Self {
			sender: self.sender.clone(),
		}
	}
}
