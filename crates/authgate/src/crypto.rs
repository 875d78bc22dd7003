use std::fmt::Debug;

use aws_lc_rs::constant_time::verify_slices_are_equal;
use aws_lc_rs::hmac;
use base64::Engine;
use base64::engine::general_purpose::{STANDARD, URL_SAFE, URL_SAFE_NO_PAD};
use rand::Rng;
use secrecy::SecretString;

/// Computes an HMAC-SHA256 tag over `message`.
pub fn hmac_sha256(secret: &[u8], message: &[u8]) -> Vec<u8> {
	let key = hmac::Key::new(hmac::HMAC_SHA256, secret);
	hmac::sign(&key, message).as_ref().to_vec()
}

pub fn base64_encode(data: &[u8]) -> String {
	STANDARD.encode(data)
}

pub fn base64_decode(data: &str) -> Option<Vec<u8>> {
	STANDARD.decode(data).ok()
}

pub fn base64url_encode(data: &[u8]) -> String {
	URL_SAFE_NO_PAD.encode(data)
}

/// Decodes URL-safe base64, with or without padding.
pub fn base64url_decode(data: &str) -> Option<Vec<u8>> {
	URL_SAFE_NO_PAD
		.decode(data)
		.ok()
		.or_else(|| URL_SAFE.decode(data).ok())
}

pub fn hex_encode(data: &[u8]) -> String {
	hex::encode(data)
}

/// Renders a u64 as 16 lowercase hex characters, zero padded.
pub fn hex_uint64(value: u64) -> String {
	format!("{value:016x}")
}

/// Constant-time equality. Differing lengths compare unequal; lengths are
/// not secret here (HMAC tags and their encodings have fixed sizes).
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
	verify_slices_are_equal(a, b).is_ok()
}

/// Source of randomness for nonce generation. Injected so tests can pin the
/// CSRF nonce.
pub trait RandomGenerator: Send + Sync + Debug {
	fn random_u64(&self) -> u64;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct OsRandomGenerator;

impl RandomGenerator for OsRandomGenerator {
	fn random_u64(&self) -> u64 {
		rand::rng().random()
	}
}

/// Provides the OAuth client secret and the session HMAC secret. Secrets are
/// read per use and may rotate between requests.
pub trait SecretReader: Send + Sync + Debug {
	fn client_secret(&self) -> SecretString;
	fn hmac_secret(&self) -> SecretString;
}

/// Secret reader over fixed values, for hosts without a rotating secret
/// backend.
#[derive(Clone, Debug)]
pub struct StaticSecretReader {
	client_secret: SecretString,
	hmac_secret: SecretString,
}

impl StaticSecretReader {
	pub fn new(client_secret: SecretString, hmac_secret: SecretString) -> Self {
		Self {
			client_secret,
			hmac_secret,
		}
	}
}

impl SecretReader for StaticSecretReader {
	fn client_secret(&self) -> SecretString {
		self.client_secret.clone()
	}

	fn hmac_secret(&self) -> SecretString {
		self.hmac_secret.clone()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn hmac_is_deterministic_and_keyed() {
		let a = hmac_sha256(b"secret", b"message");
		let b = hmac_sha256(b"secret", b"message");
		assert_eq!(a, b);
		assert_eq!(a.len(), 32);
		assert_ne!(hmac_sha256(b"other", b"message"), a);
		assert_ne!(hmac_sha256(b"secret", b"messagf"), a);
	}

	#[test]
	fn base64url_round_trips_with_and_without_padding() {
		let data = b"\xfb\xff\xfe payload";
		let encoded = base64url_encode(data);
		assert!(!encoded.contains('='));
		assert_eq!(base64url_decode(&encoded).unwrap(), data);

		let padded = base64::engine::general_purpose::URL_SAFE.encode(data);
		assert_eq!(base64url_decode(&padded).unwrap(), data);
	}

	#[test]
	fn hex_uint64_is_fixed_width_lowercase() {
		assert_eq!(hex_uint64(0), "0000000000000000");
		assert_eq!(hex_uint64(0x123456789abcdef0), "123456789abcdef0");
		assert_eq!(hex_uint64(u64::MAX), "ffffffffffffffff");
	}

	#[test]
	fn constant_time_eq_handles_length_mismatch() {
		assert!(constant_time_eq(b"same", b"same"));
		assert!(!constant_time_eq(b"same", b"diff"));
		assert!(!constant_time_eq(b"short", b"longer"));
	}
}
