//! Commitment fingerprint for sealed batches.
//!
//! The digest is a stable identifier over the batch membership carried in
//! the submit payload. It is opaque to this system; whatever settlement
//! semantics apply to it belong to the backend.

use sha3::{Digest, Keccak256};

/// Keccak-256 over the sorted order-id list, hex encoded.
pub fn build_commitment(order_ids: &[String]) -> String {
	let mut sorted: Vec<&str> = order_ids.iter().map(String::as_str).collect();
	sorted.sort_unstable();

	let mut hasher = Keccak256::new();
	for id in sorted {
		hasher.update(id.as_bytes());
		hasher.update([0u8]);
	}
	hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_commitment_is_order_insensitive() {
		let forward = vec!["a".to_string(), "b".to_string(), "c".to_string()];
		let shuffled = vec!["c".to_string(), "a".to_string(), "b".to_string()];
		assert_eq!(build_commitment(&forward), build_commitment(&shuffled));
	}

	#[test]
	fn test_commitment_distinguishes_membership() {
		let one = vec!["a".to_string(), "b".to_string()];
		let other = vec!["a".to_string(), "c".to_string()];
		assert_ne!(build_commitment(&one), build_commitment(&other));
	}

	#[test]
	fn test_separator_prevents_concatenation_collisions() {
		let joined = vec!["ab".to_string(), "c".to_string()];
		let split = vec!["a".to_string(), "bc".to_string()];
		assert_ne!(build_commitment(&joined), build_commitment(&split));
	}
}
