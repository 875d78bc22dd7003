//! Cookie jar parsing and the Set-Cookie emission policy.
//!
//! Emission is hand-formatted: the attribute layout and the legacy deletion
//! string are part of the wire contract with sessions issued by earlier
//! deployments, so the exact byte forms are produced here rather than
//! through a cookie builder.

use std::collections::BTreeMap;

use cookie::Cookie;
use http::HeaderMap;
use http::header::COOKIE;
use serde::Deserialize;
use tracing::debug;

/// SameSite attribute per cookie kind. `Disabled` omits the attribute
/// entirely.
#[derive(Clone, Copy, Debug, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum SameSite {
	#[default]
	Disabled,
	Strict,
	Lax,
	None,
}

impl SameSite {
	pub fn as_attribute(self) -> Option<&'static str> {
		match self {
			SameSite::Disabled => Option::None,
			SameSite::Strict => Some("Strict"),
			SameSite::Lax => Some("Lax"),
			SameSite::None => Some("None"),
		}
	}
}

/// Parses every `Cookie` header into a name/value map, keeping only names
/// accepted by `keep`. The last occurrence of a repeated name wins.
pub fn parse_cookies<F>(headers: &HeaderMap, keep: F) -> BTreeMap<String, String>
where
	F: Fn(&str) -> bool,
{
	let mut cookies = BTreeMap::new();
	for header in headers.get_all(COOKIE) {
		let Ok(header) = header.to_str() else {
			continue;
		};
		for cookie in Cookie::split_parse(header) {
			let cookie = match cookie {
				Ok(c) => c,
				Err(e) => {
					debug!("ignoring malformed cookie: {e}");
					continue;
				},
			};
			if keep(cookie.name()) {
				cookies.insert(cookie.name().to_string(), cookie.value().to_string());
			}
		}
	}
	cookies
}

/// Formats a session cookie:
/// `<name>=<value>[; Domain=<d>]; Path=/; Max-Age=<n>; Secure; HttpOnly[; SameSite=<v>]`
pub fn set_cookie_header(
	name: &str,
	value: &str,
	domain: Option<&str>,
	max_age: u64,
	same_site: SameSite,
) -> String {
	let mut header = format!("{name}={value}");
	if let Some(domain) = domain {
		header.push_str("; Domain=");
		header.push_str(domain);
	}
	header.push_str(&format!("; Path=/; Max-Age={max_age}; Secure; HttpOnly"));
	if let Some(same_site) = same_site.as_attribute() {
		header.push_str("; SameSite=");
		header.push_str(same_site);
	}
	header
}

/// Formats the fixed-form deletion cookie understood by every deployed
/// client: `<name>=deleted; path=/; expires=Thu, 01 Jan 1970 00:00:00 GMT`.
pub fn delete_cookie_header(name: &str, domain: Option<&str>) -> String {
	let mut header = format!("{name}=deleted; path=/; expires=Thu, 01 Jan 1970 00:00:00 GMT");
	if let Some(domain) = domain {
		header.push_str("; Domain=");
		header.push_str(domain);
	}
	header
}

#[cfg(test)]
mod tests {
	use http::HeaderValue;

	use super::*;

	fn headers_with_cookies(values: &[&str]) -> HeaderMap {
		let mut headers = HeaderMap::new();
		for value in values {
			headers.append(COOKIE, HeaderValue::from_str(value).unwrap());
		}
		headers
	}

	#[test]
	fn parse_cookies_filters_and_last_occurrence_wins() {
		let headers =
			headers_with_cookies(&["a=1; b=2; a=3", "b=4; ignored=x"]);
		let cookies = parse_cookies(&headers, |name| name == "a" || name == "b");
		assert_eq!(cookies.get("a").map(String::as_str), Some("3"));
		assert_eq!(cookies.get("b").map(String::as_str), Some("4"));
		assert!(!cookies.contains_key("ignored"));
	}

	#[test]
	fn parse_cookies_skips_malformed_pairs() {
		let headers = headers_with_cookies(&["no-equals-sign; a=1"]);
		let cookies = parse_cookies(&headers, |_| true);
		assert_eq!(cookies.get("a").map(String::as_str), Some("1"));
		assert_eq!(cookies.len(), 1);
	}

	#[test]
	fn set_cookie_header_layout() {
		assert_eq!(
			set_cookie_header("BearerToken", "tok", None, 3600, SameSite::Disabled),
			"BearerToken=tok; Path=/; Max-Age=3600; Secure; HttpOnly"
		);
		assert_eq!(
			set_cookie_header("IdToken", "tok", Some("example.com"), 60, SameSite::Lax),
			"IdToken=tok; Domain=example.com; Path=/; Max-Age=60; Secure; HttpOnly; SameSite=Lax"
		);
	}

	#[test]
	fn delete_cookie_header_uses_legacy_form() {
		assert_eq!(
			delete_cookie_header("OauthHMAC", None),
			"OauthHMAC=deleted; path=/; expires=Thu, 01 Jan 1970 00:00:00 GMT"
		);
		assert_eq!(
			delete_cookie_header("OauthHMAC", Some("example.com")),
			"OauthHMAC=deleted; path=/; expires=Thu, 01 Jan 1970 00:00:00 GMT; Domain=example.com"
		);
	}
}
