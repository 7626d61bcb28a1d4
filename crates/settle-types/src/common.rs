//! Common scalar types shared across the settle system.

/// Unix timestamp in milliseconds.
pub type Timestamp = u64;

/// Returns the current Unix timestamp in milliseconds.
pub fn now_ms() -> Timestamp {
	chrono::Utc::now().timestamp_millis() as Timestamp
}

/// Generates a fresh unique identifier.
pub fn new_id() -> String {
	uuid::Uuid::new_v4().to_string()
}
