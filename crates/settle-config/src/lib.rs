// settle-config/src/lib.rs

use std::env;
use std::path::Path;
use thiserror::Error;
use tracing::warn;

use settle_types::configs::{
	SettleConfig, BATCH_TIMEOUT_FLOOR_MS, MAX_BATCH_SIZE_BOUNDS, PROBE_TIMEOUT_FLOOR_MS,
};

#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("File not found: {0}")]
	FileNotFound(String),

	#[error("Parse error: {0}")]
	ParseError(String),

	#[error("Validation error: {0}")]
	ValidationError(String),

	#[error("Environment variable not found: {0}")]
	EnvVarNotFound(String),

	#[error("IO error: {0}")]
	IoError(#[from] std::io::Error),
}

/// Configuration loader with environment variable substitution.
#[derive(Default)]
pub struct ConfigLoader {
	file_path: Option<String>,
	env_prefix: String,
}

impl ConfigLoader {
	pub fn new() -> Self {
		Self {
			file_path: None,
			env_prefix: "SETTLE_".to_string(),
		}
	}

	pub fn with_file<P: AsRef<Path>>(mut self, path: P) -> Self {
		self.file_path = Some(path.as_ref().to_string_lossy().to_string());
		self
	}

	pub fn with_env_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.env_prefix = prefix.into();
		self
	}

	pub async fn load(&self) -> Result<SettleConfig, ConfigError> {
		let mut config = if let Some(file_path) = &self.file_path {
			self.load_from_file(file_path).await?
		} else {
			return Err(ConfigError::FileNotFound(
				"No configuration file specified".to_string(),
			));
		};

		self.apply_env_overrides(&mut config)?;

		clamp_tunables(&mut config);
		validate_config(&config)?;

		Ok(config)
	}

	async fn load_from_file(&self, file_path: &str) -> Result<SettleConfig, ConfigError> {
		let content = tokio::fs::read_to_string(file_path).await.map_err(|e| {
			if e.kind() == std::io::ErrorKind::NotFound {
				ConfigError::FileNotFound(file_path.to_string())
			} else {
				ConfigError::IoError(e)
			}
		})?;
		self.parse(&content)
	}

	/// Parses a TOML document after `${VAR}` substitution.
	pub fn parse(&self, content: &str) -> Result<SettleConfig, ConfigError> {
		let substituted = self.substitute_env_vars(content)?;
		toml::from_str(&substituted).map_err(|e| ConfigError::ParseError(e.to_string()))
	}

	fn substitute_env_vars(&self, content: &str) -> Result<String, ConfigError> {
		let mut result = content.to_string();

		let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();

		for cap in re.captures_iter(content) {
			let full_match = &cap[0];
			let var_name = &cap[1];

			let env_value = env::var(var_name)
				.map_err(|_| ConfigError::EnvVarNotFound(var_name.to_string()))?;

			result = result.replace(full_match, &env_value);
		}

		Ok(result)
	}

	fn apply_env_overrides(&self, config: &mut SettleConfig) -> Result<(), ConfigError> {
		if let Ok(log_level) = env::var(format!("{}LOG_LEVEL", self.env_prefix)) {
			config.service.log_level = log_level;
		}

		if let Ok(http_port) = env::var(format!("{}HTTP_PORT", self.env_prefix)) {
			config.service.http_port = http_port
				.parse()
				.map_err(|e| ConfigError::ValidationError(format!("Invalid HTTP port: {}", e)))?;
		}

		if let Ok(timeout) = env::var(format!("{}BATCH_TIMEOUT_MS", self.env_prefix)) {
			config.batch.timeout_ms = timeout.parse().map_err(|e| {
				ConfigError::ValidationError(format!("Invalid batch timeout: {}", e))
			})?;
		}

		Ok(())
	}
}

/// Brings clampable tunables into their hard bounds, warning when a value
/// had to move.
fn clamp_tunables(config: &mut SettleConfig) {
	let (min_size, max_size) = MAX_BATCH_SIZE_BOUNDS;
	let clamped = config.batch.max_batch_size.clamp(min_size, max_size);
	if clamped != config.batch.max_batch_size {
		warn!(
			configured = config.batch.max_batch_size,
			clamped, "max_batch_size out of range, clamping"
		);
		config.batch.max_batch_size = clamped;
	}

	if config.batch.timeout_ms < BATCH_TIMEOUT_FLOOR_MS {
		warn!(
			configured = config.batch.timeout_ms,
			floor = BATCH_TIMEOUT_FLOOR_MS,
			"batch timeout below floor, raising"
		);
		config.batch.timeout_ms = BATCH_TIMEOUT_FLOOR_MS;
	}

	if config.router.probe_timeout_ms < PROBE_TIMEOUT_FLOOR_MS {
		warn!(
			configured = config.router.probe_timeout_ms,
			floor = PROBE_TIMEOUT_FLOOR_MS,
			"probe timeout below floor, raising"
		);
		config.router.probe_timeout_ms = PROBE_TIMEOUT_FLOOR_MS;
	}
}

/// Rejects configurations no clamp can repair.
fn validate_config(config: &SettleConfig) -> Result<(), ConfigError> {
	if config.batch.min_batch_size == 0 {
		return Err(ConfigError::ValidationError(
			"min_batch_size must be at least 1".to_string(),
		));
	}

	if config.batch.min_batch_size > config.batch.max_batch_size {
		return Err(ConfigError::ValidationError(format!(
			"min_batch_size {} exceeds max_batch_size {}",
			config.batch.min_batch_size, config.batch.max_batch_size
		)));
	}

	if config.router.max_attempts == 0 {
		return Err(ConfigError::ValidationError(
			"max_attempts must be at least 1".to_string(),
		));
	}

	match config.storage.backend.as_str() {
		"memory" | "file" => {}
		other => {
			return Err(ConfigError::ValidationError(format!(
				"unknown storage backend: {}",
				other
			)))
		}
	}

	for seed in &config.providers {
		if seed.id.is_empty() || seed.endpoint.is_empty() {
			return Err(ConfigError::ValidationError(
				"provider seeds require a non-empty id and endpoint".to_string(),
			));
		}
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_config() {
		let config = SettleConfig::default();
		assert_eq!(config.service.name, "settle");
		assert_eq!(config.batch.max_batch_size, 50);
		assert_eq!(config.batch.min_batch_size, 5);
		assert_eq!(config.batch.timeout_ms, 30_000);
		assert_eq!(config.router.max_attempts, 3);
		assert_eq!(config.storage.backend, "memory");
	}

	#[test]
	fn test_toml_parsing() {
		let toml = r#"
[service]
name = "settle-test"
http_port = 9090

[batch]
max_batch_size = 20
timeout_ms = 10000

[router]
max_attempts = 2

[[providers]]
id = "primary"
endpoint = "http://localhost:4000"
region = "eu-west"
"#;

		let config = ConfigLoader::new().parse(toml).unwrap();
		assert_eq!(config.service.name, "settle-test");
		assert_eq!(config.service.http_port, 9090);
		assert_eq!(config.batch.max_batch_size, 20);
		assert_eq!(config.router.max_attempts, 2);
		assert_eq!(config.providers.len(), 1);
		assert_eq!(config.providers[0].region, "eu-west");
		// Omitted fields fall back to defaults.
		assert_eq!(config.batch.min_batch_size, 5);
	}

	#[test]
	fn test_env_substitution() {
		env::set_var("SETTLE_TEST_REGION", "ap-south");
		let toml = r#"
[[providers]]
id = "a"
endpoint = "http://a"
region = "${SETTLE_TEST_REGION}"
"#;
		let config = ConfigLoader::new().parse(toml).unwrap();
		assert_eq!(config.providers[0].region, "ap-south");
		env::remove_var("SETTLE_TEST_REGION");
	}

	#[test]
	fn test_missing_env_var_is_an_error() {
		let toml = r#"
[service]
name = "${SETTLE_TEST_DOES_NOT_EXIST}"
"#;
		let err = ConfigLoader::new().parse(toml).unwrap_err();
		assert!(matches!(err, ConfigError::EnvVarNotFound(_)));
	}

	#[tokio::test]
	async fn test_load_clamps_out_of_range_values() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("settle.toml");
		tokio::fs::write(
			&path,
			r#"
[batch]
max_batch_size = 500
timeout_ms = 100
"#,
		)
		.await
		.unwrap();

		let config = ConfigLoader::new().with_file(&path).load().await.unwrap();
		assert_eq!(config.batch.max_batch_size, 100);
		assert_eq!(config.batch.timeout_ms, BATCH_TIMEOUT_FLOOR_MS);
	}

	#[tokio::test]
	async fn test_load_rejects_invalid_threshold_order() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("settle.toml");
		tokio::fs::write(
			&path,
			r#"
[batch]
max_batch_size = 3
min_batch_size = 10
"#,
		)
		.await
		.unwrap();

		let err = ConfigLoader::new().with_file(&path).load().await.unwrap_err();
		assert!(matches!(err, ConfigError::ValidationError(_)));
	}

	#[tokio::test]
	async fn test_load_rejects_unknown_storage_backend() {
		let dir = tempfile::tempdir().unwrap();
		let path = dir.path().join("settle.toml");
		tokio::fs::write(&path, "[storage]\nbackend = \"redis\"\n")
			.await
			.unwrap();

		let err = ConfigLoader::new().with_file(&path).load().await.unwrap_err();
		assert!(matches!(err, ConfigError::ValidationError(_)));
	}
}
