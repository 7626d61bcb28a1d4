//! # Configuration Types
//!
//! Configuration structures for all settle components.
//!
//! Defaults here mirror the operational parameters the components fall
//! back to when a field is omitted from the configuration file; range
//! enforcement (clamps and floors) lives in the config loader and in
//! `BatchAccumulator::configure`.

use serde::{Deserialize, Serialize};

/// Hard bounds for `max_batch_size`.
pub const MAX_BATCH_SIZE_BOUNDS: (usize, usize) = (1, 100);
/// Floor for the batch flush timeout.
pub const BATCH_TIMEOUT_FLOOR_MS: u64 = 5_000;
/// Floor for the per-probe timeout.
pub const PROBE_TIMEOUT_FLOOR_MS: u64 = 100;

/// Main settle configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettleConfig {
	/// Core service settings like name, port, and logging.
	#[serde(default)]
	pub service: ServiceSettings,
	/// Batch accumulator tunables.
	#[serde(default)]
	pub batch: BatchConfig,
	/// Provider router tunables.
	#[serde(default)]
	pub router: RouterConfig,
	/// Audit storage backend selection.
	#[serde(default)]
	pub storage: StorageConfig,
	/// Providers registered at startup.
	#[serde(default)]
	pub providers: Vec<ProviderSeed>,
}

impl Default for SettleConfig {
	fn default() -> Self {
		Self {
			service: ServiceSettings::default(),
			batch: BatchConfig::default(),
			router: RouterConfig::default(),
			storage: StorageConfig::default(),
			providers: Vec::new(),
		}
	}
}

/// Core service settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSettings {
	/// Unique name for this instance.
	#[serde(default = "default_service_name")]
	pub name: String,
	/// Logging level for the service.
	#[serde(default = "default_log_level")]
	pub log_level: String,
	/// HTTP API server port.
	#[serde(default = "default_http_port")]
	pub http_port: u16,
}

impl Default for ServiceSettings {
	fn default() -> Self {
		Self {
			name: default_service_name(),
			log_level: default_log_level(),
			http_port: default_http_port(),
		}
	}
}

/// Batch accumulator tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
	/// When false, every enqueue submits immediately as a single order.
	#[serde(default = "default_true")]
	pub enabled: bool,
	/// Pending count at which a batch is sealed synchronously. Clamped
	/// to `[1, 100]`.
	#[serde(default = "default_max_batch_size")]
	pub max_batch_size: usize,
	/// Minimum pending count for a timer-driven flush to seal.
	#[serde(default = "default_min_batch_size")]
	pub min_batch_size: usize,
	/// Flush interval and maximum queue age. Floored at 5000 ms.
	#[serde(default = "default_batch_timeout_ms")]
	pub timeout_ms: u64,
}

impl Default for BatchConfig {
	fn default() -> Self {
		Self {
			enabled: true,
			max_batch_size: default_max_batch_size(),
			min_batch_size: default_min_batch_size(),
			timeout_ms: default_batch_timeout_ms(),
		}
	}
}

/// Partial update applied through `configure`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BatchConfigPatch {
	pub enabled: Option<bool>,
	pub max_batch_size: Option<usize>,
	pub timeout_ms: Option<u64>,
}

/// Provider router tunables.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RouterConfig {
	/// Maximum distinct providers attempted per route call.
	#[serde(default = "default_max_attempts")]
	pub max_attempts: usize,
	/// Interval between health check sweeps.
	#[serde(default = "default_health_interval_ms")]
	pub health_check_interval_ms: u64,
	/// Per-probe timeout; also bounds the aggregate sweep wait.
	#[serde(default = "default_probe_timeout_ms")]
	pub probe_timeout_ms: u64,
	/// Pause between staged migration checkpoints.
	#[serde(default = "default_migration_pause_ms")]
	pub migration_pause_ms: u64,
}

impl Default for RouterConfig {
	fn default() -> Self {
		Self {
			max_attempts: default_max_attempts(),
			health_check_interval_ms: default_health_interval_ms(),
			probe_timeout_ms: default_probe_timeout_ms(),
			migration_pause_ms: default_migration_pause_ms(),
		}
	}
}

/// Audit storage backend selection.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
	/// Backend kind: `memory` or `file`.
	#[serde(default = "default_storage_backend")]
	pub backend: String,
	/// Base directory for the file backend.
	#[serde(default = "default_storage_path")]
	pub path: String,
}

impl Default for StorageConfig {
	fn default() -> Self {
		Self {
			backend: default_storage_backend(),
			path: default_storage_path(),
		}
	}
}

/// A provider registered at startup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProviderSeed {
	pub id: String,
	pub endpoint: String,
	pub region: String,
}

fn default_service_name() -> String {
	"settle".to_string()
}

fn default_log_level() -> String {
	"info".to_string()
}

fn default_http_port() -> u16 {
	8080
}

fn default_true() -> bool {
	true
}

fn default_max_batch_size() -> usize {
	50
}

fn default_min_batch_size() -> usize {
	5
}

fn default_batch_timeout_ms() -> u64 {
	30_000
}

fn default_max_attempts() -> usize {
	3
}

fn default_health_interval_ms() -> u64 {
	30_000
}

fn default_probe_timeout_ms() -> u64 {
	5_000
}

fn default_migration_pause_ms() -> u64 {
	1_000
}

fn default_storage_backend() -> String {
	"memory".to_string()
}

fn default_storage_path() -> String {
	"./data/audit".to_string()
}
