//! Per-cookie lifetime policy. ID and refresh tokens that happen to be JWTs
//! have their `exp` claim honored; everything else falls back to the access
//! token lifetime or the configured refresh default.

use tracing::debug;

use crate::crypto;

/// Reads the `exp` claim of a JWT without validating the signature. Returns
/// `None` when the token is not a three-part JWT or carries no numeric
/// `exp`.
pub fn jwt_expiration(token: &str) -> Option<u64> {
	let mut parts = token.split('.');
	let (_header, payload) = (parts.next()?, parts.next()?);
	parts.next()?;
	if parts.next().is_some() {
		return None;
	}
	let payload = crypto::base64url_decode(payload)?;
	let claims: serde_json::Value = serde_json::from_slice(&payload).ok()?;
	claims.get("exp")?.as_u64()
}

/// Max-Age for the ID token cookie.
pub fn id_token_max_age(id_token: &str, expires_in: u64, now_epoch: u64) -> u64 {
	if !id_token.is_empty() {
		if let Some(exp) = jwt_expiration(id_token)
			&& exp != 0
		{
			if exp <= now_epoch {
				debug!("id token exp claim is already in the past");
			}
			return exp.saturating_sub(now_epoch);
		}
		debug!("id token is not a JWT or omits exp, aligning its lifetime with the access token");
	}
	expires_in
}

/// Max-Age for the refresh token cookie.
pub fn refresh_token_max_age(
	refresh_token: &str,
	expires_in: u64,
	now_epoch: u64,
	use_refresh_token: bool,
	default_refresh_token_expires_in: u64,
) -> u64 {
	if !use_refresh_token {
		return expires_in;
	}
	if let Some(exp) = jwt_expiration(refresh_token)
		&& exp != 0
	{
		if exp <= now_epoch {
			debug!("refresh token exp claim is already in the past");
		}
		return exp.saturating_sub(now_epoch);
	}
	debug!("refresh token is not a JWT or omits exp, using the configured default lifetime");
	default_refresh_token_expires_in
}

#[cfg(test)]
pub(crate) fn make_jwt(claims: &serde_json::Value) -> String {
	let header = crypto::base64url_encode(br#"{"alg":"none"}"#);
	let payload = crypto::base64url_encode(claims.to_string().as_bytes());
	format!("{header}.{payload}.sig")
}
