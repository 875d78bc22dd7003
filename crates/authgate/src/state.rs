//! Codec for the OAuth `state` query parameter:
//! base64url(JSON `{"url": ..., "csrf_token": ...}`).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::crypto;

/// The round-tripped contents of the `state` parameter. Decoding rejects
/// anything but a two-field JSON object with string values.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq, Serialize)]
#[serde(deny_unknown_fields)]
pub struct StateParam {
	pub url: String,
	pub csrf_token: String,
}

pub fn encode_state(original_request_url: &str, csrf_token: &str) -> Result<String, serde_json::Error> {
	let state = StateParam {
		url: original_request_url.to_string(),
		csrf_token: csrf_token.to_string(),
	};
	let json = serde_json::to_vec(&state)?;
	Ok(crypto::base64url_encode(&json))
}

/// Fails closed: any base64 or JSON deviation yields `None`.
pub fn decode_state(encoded: &str) -> Option<StateParam> {
	let json = crypto::base64url_decode(encoded)?;
	match serde_json::from_slice(&json) {
		Ok(state) => Some(state),
		Err(e) => {
			debug!("state query param is not a valid state object: {e}");
			None
		},
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn state_round_trips() {
		let encoded = encode_state("https://host.example.com/app?q=1", "00ff.aGk=").unwrap();
		let decoded = decode_state(&encoded).unwrap();
		assert_eq!(decoded.url, "https://host.example.com/app?q=1");
		assert_eq!(decoded.csrf_token, "00ff.aGk=");
	}

	#[test]
	fn state_escapes_json_metacharacters() {
		let url = "https://host/app?q=\"quoted\\\u{1}\"";
		let encoded = encode_state(url, "t").unwrap();
		let json = crypto::base64url_decode(&encoded).unwrap();
		let json = String::from_utf8(json).unwrap();
		assert!(json.contains(r#"\""#));
		assert!(json.contains(r"\\"));
		assert!(json.contains("\\u0001"));
		assert_eq!(decode_state(&encoded).unwrap().url, url);
	}

	#[test]
	fn decode_state_fails_closed() {
		// Not base64url.
		assert!(decode_state("not base64!").is_none());
		// Not JSON.
		assert!(decode_state(&crypto::base64url_encode(b"plain text")).is_none());
		// Missing field.
		assert!(decode_state(&crypto::base64url_encode(br#"{"url":"https://a/"}"#)).is_none());
		// Extra field.
		assert!(
			decode_state(&crypto::base64url_encode(
				br#"{"url":"https://a/","csrf_token":"t","extra":1}"#
			))
			.is_none()
		);
		// Non-string value.
		assert!(
			decode_state(&crypto::base64url_encode(br#"{"url":1,"csrf_token":"t"}"#)).is_none()
		);
	}
}
