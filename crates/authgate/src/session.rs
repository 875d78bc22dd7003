//! Cookie-based session validation.
//!
//! A session is the tuple of cookies whose HMAC recomputes under the server
//! secret and whose expiry lies in the future. The HMAC payload is the
//! newline-joined `domain, expires, access, id, refresh` tuple; empty fields
//! stay empty between the separators so the payload is bit-compatible with
//! previously issued sessions.

use http::HeaderMap;

use crate::config::CookieNames;
use crate::cookies;
use crate::crypto;

/// Joins the canonical HMAC payload. Field order is part of the session
/// contract and must never change.
fn hmac_payload(
	domain: &str,
	expires: &str,
	token: &str,
	id_token: &str,
	refresh_token: &str,
) -> String {
	[domain, expires, token, id_token, refresh_token].join("\n")
}

/// The HMAC encoding emitted for new sessions: base64 over the raw tag.
pub fn encode_hmac_base64(
	secret: &[u8],
	domain: &str,
	expires: &str,
	token: &str,
	id_token: &str,
	refresh_token: &str,
) -> String {
	let payload = hmac_payload(domain, expires, token, id_token, refresh_token);
	crypto::base64_encode(&crypto::hmac_sha256(secret, payload.as_bytes()))
}

/// The legacy encoding still accepted on validation: base64 over the
/// lowercase hex rendering of the tag. Kept for sessions issued before the
/// encoding change; never emitted.
pub fn encode_hmac_hex_base64(
	secret: &[u8],
	domain: &str,
	expires: &str,
	token: &str,
	id_token: &str,
	refresh_token: &str,
) -> String {
	let payload = hmac_payload(domain, expires, token, id_token, refresh_token);
	crypto::base64_encode(crypto::hex_encode(&crypto::hmac_sha256(secret, payload.as_bytes())).as_bytes())
}

/// Snapshot of the session cookies of one request. Missing cookies read as
/// empty strings, matching how the HMAC was computed when they were set.
#[derive(Clone, Debug, Default)]
pub struct CookieValidator {
	expires: String,
	token: String,
	id_token: String,
	refresh_token: String,
	hmac: String,
	host: String,
}

impl CookieValidator {
	pub fn from_request(cookie_names: &CookieNames, headers: &HeaderMap, host: &str) -> Self {
		let mut cookies = cookies::parse_cookies(headers, |name| {
			name == cookie_names.oauth_expires
				|| name == cookie_names.bearer_token
				|| name == cookie_names.oauth_hmac
				|| name == cookie_names.id_token
				|| name == cookie_names.refresh_token
		});
		let mut take = |name: &str| cookies.remove(name).unwrap_or_default();
		Self {
			expires: take(&cookie_names.oauth_expires),
			token: take(&cookie_names.bearer_token),
			id_token: take(&cookie_names.id_token),
			refresh_token: take(&cookie_names.refresh_token),
			hmac: take(&cookie_names.oauth_hmac),
			host: host.to_string(),
		}
	}

	/// Recomputes the HMAC over the cookie payload and compares against the
	/// stored value, accepting both the current and the legacy encoding.
	pub fn hmac_is_valid(&self, secret: &[u8], cookie_domain: Option<&str>) -> bool {
		let domain = cookie_domain.filter(|d| !d.is_empty()).unwrap_or(&self.host);
		let current = encode_hmac_base64(
			secret,
			domain,
			&self.expires,
			&self.token,
			&self.id_token,
			&self.refresh_token,
		);
		let legacy = encode_hmac_hex_base64(
			secret,
			domain,
			&self.expires,
			&self.token,
			&self.id_token,
			&self.refresh_token,
		);
		crypto::constant_time_eq(current.as_bytes(), self.hmac.as_bytes())
			|| crypto::constant_time_eq(legacy.as_bytes(), self.hmac.as_bytes())
	}

	pub fn timestamp_is_valid(&self, now_epoch: u64) -> bool {
		let Ok(expires) = self.expires.parse::<u64>() else {
			return false;
		};
		expires > now_epoch
	}

	pub fn is_valid(&self, secret: &[u8], cookie_domain: Option<&str>, now_epoch: u64) -> bool {
		self.hmac_is_valid(secret, cookie_domain) && self.timestamp_is_valid(now_epoch)
	}

	/// A refresh is possible whenever a refresh token cookie is present.
	pub fn can_refresh(&self) -> bool {
		!self.refresh_token.is_empty()
	}

	pub fn token(&self) -> &str {
		&self.token
	}

	pub fn refresh_token(&self) -> &str {
		&self.refresh_token
	}
}
