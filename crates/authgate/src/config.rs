//! Filter configuration: the serde-deserialized policy plus the built
//! [`FilterConfig`] carrying everything pre-computed at construction time.
//! Construction errors are fatal; nothing here is validated per request.

use std::sync::Arc;

use http::HeaderMap;
use serde::Deserialize;
use url::Url;

use crate::client::AuthType;
use crate::cookies::SameSite;
use crate::crypto::SecretReader;
use crate::stats::FilterStats;

pub(crate) const DEFAULT_AUTH_SCOPE: &str = "user";
const DEFAULT_REFRESH_TOKEN_EXPIRES_IN: u64 = 604_800;

/// Matches the request path with the query and fragment stripped.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum PathMatcher {
	Exact(String),
	Prefix(String),
}

impl PathMatcher {
	pub fn matches(&self, path: &str) -> bool {
		let end = path.find(['?', '#']).unwrap_or(path.len());
		let path = &path[..end];
		match self {
			PathMatcher::Exact(expected) => path == expected,
			PathMatcher::Prefix(prefix) => path.starts_with(prefix),
		}
	}
}

/// Predicate over one request header. The pseudo-header names `:path` and
/// `:authority` resolve to the request path and host.
#[derive(Clone, Debug, Deserialize)]
pub struct HeaderMatcher {
	pub name: String,
	#[serde(flatten)]
	pub kind: HeaderMatchKind,
}

#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HeaderMatchKind {
	ExactMatch(String),
	PrefixMatch(String),
	ContainsMatch(String),
	PresentMatch(bool),
}

impl HeaderMatcher {
	pub fn matches(&self, headers: &HeaderMap, path: &str, host: &str) -> bool {
		let value = match self.name.as_str() {
			":path" => Some(path),
			":authority" => Some(host),
			name => headers.get(name).and_then(|v| v.to_str().ok()),
		};
		match (&self.kind, value) {
			(HeaderMatchKind::PresentMatch(expected), value) => value.is_some() == *expected,
			(_, None) => false,
			(HeaderMatchKind::ExactMatch(expected), Some(value)) => value == expected,
			(HeaderMatchKind::PrefixMatch(prefix), Some(value)) => value.starts_with(prefix),
			(HeaderMatchKind::ContainsMatch(needle), Some(value)) => value.contains(needle),
		}
	}
}

/// The six session cookie names.
#[derive(Clone, Debug, Deserialize, Eq, PartialEq)]
#[serde(default)]
pub struct CookieNames {
	pub oauth_hmac: String,
	pub oauth_expires: String,
	pub bearer_token: String,
	pub id_token: String,
	pub refresh_token: String,
	pub oauth_nonce: String,
}

impl Default for CookieNames {
	fn default() -> Self {
		Self {
			oauth_hmac: "OauthHMAC".to_string(),
			oauth_expires: "OauthExpires".to_string(),
			bearer_token: "BearerToken".to_string(),
			id_token: "IdToken".to_string(),
			refresh_token: "RefreshToken".to_string(),
			oauth_nonce: "OauthNonce".to_string(),
		}
	}
}

#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CookieSettings {
	pub same_site: SameSite,
}

/// Per-cookie-kind attribute configuration.
#[derive(Clone, Copy, Debug, Default, Deserialize)]
#[serde(default)]
pub struct CookieConfigs {
	pub bearer_token_cookie_config: CookieSettings,
	pub oauth_hmac_cookie_config: CookieSettings,
	pub oauth_expires_cookie_config: CookieSettings,
	pub id_token_cookie_config: CookieSettings,
	pub refresh_token_cookie_config: CookieSettings,
	pub oauth_nonce_cookie_config: CookieSettings,
}

/// The deserialized filter policy. Field defaults mirror the upstream
/// filter configuration this policy is exchanged with.
#[derive(Clone, Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OAuth2Config {
	pub token_endpoint: String,
	pub authorization_endpoint: String,
	pub client_id: String,
	/// Redirect URI template; `%REQ(<header>)%` expands against request
	/// headers, with `:authority` and `:path` as pseudo-headers.
	pub redirect_uri: String,
	pub redirect_path_matcher: PathMatcher,
	pub signout_path: PathMatcher,
	#[serde(default)]
	pub pass_through_matchers: Vec<HeaderMatcher>,
	#[serde(default)]
	pub deny_redirect_matchers: Vec<HeaderMatcher>,
	#[serde(default)]
	pub cookie_names: CookieNames,
	/// When set, scopes the session cookies and replaces the host in the
	/// HMAC payload.
	#[serde(default)]
	pub cookie_domain: Option<String>,
	#[serde(default)]
	pub auth_type: AuthType,
	#[serde(default)]
	pub auth_scopes: Vec<String>,
	#[serde(default)]
	pub resources: Vec<String>,
	/// Fallback lifetime when the IdP omits `expires_in`. Zero means none:
	/// such sessions expire immediately.
	#[serde(default)]
	pub default_expires_in: u64,
	#[serde(default = "default_refresh_token_expires_in")]
	pub default_refresh_token_expires_in: u64,
	#[serde(default)]
	pub forward_bearer_token: bool,
	#[serde(default)]
	pub preserve_authorization_header: bool,
	#[serde(default = "default_use_refresh_token")]
	pub use_refresh_token: bool,
	#[serde(default)]
	pub disable_id_token_set_cookie: bool,
	#[serde(default)]
	pub disable_access_token_set_cookie: bool,
	#[serde(default)]
	pub disable_refresh_token_set_cookie: bool,
	#[serde(default)]
	pub cookie_configs: CookieConfigs,
	/// Compatibility switch: source the nonce cookie's SameSite from the
	/// refresh token cookie settings, as older deployments did.
	#[serde(default)]
	pub nonce_same_site_from_refresh_token: bool,
}

fn default_refresh_token_expires_in() -> u64 {
	DEFAULT_REFRESH_TOKEN_EXPIRES_IN
}

fn default_use_refresh_token() -> bool {
	true
}

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
	#[error("invalid authorization endpoint URL `{url}`: {source}")]
	InvalidAuthorizationEndpoint {
		url: String,
		#[source]
		source: url::ParseError,
	},
	#[error("authorization endpoint URL `{0}` must be an absolute http(s) URL")]
	AuthorizationEndpointNotHttp(String),
	#[error("invalid token endpoint URL `{url}`: {source}")]
	InvalidTokenEndpoint {
		url: String,
		#[source]
		source: url::ParseError,
	},
	#[error("invalid redirect_uri template `{template}`: {reason}")]
	InvalidRedirectUriTemplate { template: String, reason: String },
	#[error("client_id must not be empty")]
	EmptyClientId,
}

/// Redirect URI template compiled once at construction.
#[derive(Clone, Debug)]
pub struct RedirectUriTemplate {
	segments: Vec<Segment>,
}

#[derive(Clone, Debug)]
enum Segment {
	Literal(String),
	Header(String),
}

impl RedirectUriTemplate {
	pub fn parse(template: &str) -> Result<Self, ConfigError> {
		let mut segments = Vec::new();
		let mut rest = template;
		while let Some(start) = rest.find("%REQ(") {
			if start > 0 {
				segments.push(Segment::Literal(rest[..start].to_string()));
			}
			let after = &rest[start + "%REQ(".len()..];
			let Some(end) = after.find(")%") else {
				return Err(ConfigError::InvalidRedirectUriTemplate {
					template: template.to_string(),
					reason: "unterminated %REQ( command".to_string(),
				});
			};
			let name = &after[..end];
			if name.is_empty() {
				return Err(ConfigError::InvalidRedirectUriTemplate {
					template: template.to_string(),
					reason: "empty %REQ( command".to_string(),
				});
			}
			segments.push(Segment::Header(name.to_string()));
			rest = &after[end + ")%".len()..];
		}
		if !rest.is_empty() {
			segments.push(Segment::Literal(rest.to_string()));
		}
		Ok(Self { segments })
	}

	/// Expands the template against one request. Unset headers render empty.
	pub fn render(&self, headers: &HeaderMap, host: &str, path: &str) -> String {
		let mut rendered = String::new();
		for segment in &self.segments {
			match segment {
				Segment::Literal(text) => rendered.push_str(text),
				Segment::Header(name) => match name.as_str() {
					":authority" => rendered.push_str(host),
					":path" => rendered.push_str(path),
					name => {
						if let Some(value) = headers.get(name).and_then(|v| v.to_str().ok()) {
							rendered.push_str(value);
						}
					},
				},
			}
		}
		rendered
	}
}

/// The built, shared, immutable filter configuration.
#[derive(Debug)]
pub struct FilterConfig {
	pub oauth: OAuth2Config,
	pub token_endpoint_url: Url,
	pub authorization_endpoint_url: Url,
	/// Query pairs rendered onto every authorization redirect, before the
	/// per-request `state` and `redirect_uri` are appended.
	pub authorization_query_pairs: Vec<(String, String)>,
	/// Pre-encoded `&resource=...` suffix appended verbatim to the
	/// authorization URL.
	pub encoded_resource_suffix: String,
	pub redirect_uri_template: RedirectUriTemplate,
	pub secret_reader: Arc<dyn SecretReader>,
	pub stats: FilterStats,
}

impl FilterConfig {
	pub fn new(
		config: OAuth2Config,
		secret_reader: Arc<dyn SecretReader>,
	) -> Result<Self, ConfigError> {
		if config.client_id.is_empty() {
			return Err(ConfigError::EmptyClientId);
		}

		let token_endpoint_url =
			Url::parse(&config.token_endpoint).map_err(|source| ConfigError::InvalidTokenEndpoint {
				url: config.token_endpoint.clone(),
				source,
			})?;

		let authorization_endpoint_url = Url::parse(&config.authorization_endpoint).map_err(
			|source| ConfigError::InvalidAuthorizationEndpoint {
				url: config.authorization_endpoint.clone(),
				source,
			},
		)?;
		if !matches!(authorization_endpoint_url.scheme(), "http" | "https")
			|| authorization_endpoint_url.host_str().is_none()
		{
			return Err(ConfigError::AuthorizationEndpointNotHttp(
				config.authorization_endpoint.clone(),
			));
		}

		let redirect_uri_template = RedirectUriTemplate::parse(&config.redirect_uri)?;

		let scope = if config.auth_scopes.is_empty() {
			DEFAULT_AUTH_SCOPE.to_string()
		} else {
			config.auth_scopes.join(" ")
		};
		let overwritten = ["client_id", "response_type", "scope", "state", "redirect_uri"];
		let mut authorization_query_pairs: Vec<(String, String)> = authorization_endpoint_url
			.query_pairs()
			.filter(|(name, _)| !overwritten.contains(&name.as_ref()))
			.map(|(name, value)| (name.into_owned(), value.into_owned()))
			.collect();
		authorization_query_pairs.push(("client_id".to_string(), config.client_id.clone()));
		authorization_query_pairs.push(("response_type".to_string(), "code".to_string()));
		authorization_query_pairs.push(("scope".to_string(), scope));

		let encoded_resource_suffix = config
			.resources
			.iter()
			.map(|resource| {
				let encoded: String = url::form_urlencoded::byte_serialize(resource.as_bytes()).collect();
				format!("&resource={encoded}")
			})
			.collect();

		Ok(Self {
			oauth: config,
			token_endpoint_url,
			authorization_endpoint_url,
			authorization_query_pairs,
			encoded_resource_suffix,
			redirect_uri_template,
			secret_reader,
			stats: FilterStats::default(),
		})
	}

	/// The configured cookie domain, when non-empty.
	pub fn cookie_domain(&self) -> Option<&str> {
		self
			.oauth
			.cookie_domain
			.as_deref()
			.filter(|domain| !domain.is_empty())
	}

	/// SameSite for the nonce cookie; the compatibility flag restores the
	/// historical sourcing from the refresh token cookie settings.
	pub fn nonce_same_site(&self) -> SameSite {
		if self.oauth.nonce_same_site_from_refresh_token {
			self.oauth.cookie_configs.refresh_token_cookie_config.same_site
		} else {
			self.oauth.cookie_configs.oauth_nonce_cookie_config.same_site
		}
	}

	pub fn stats(&self) -> &FilterStats {
		&self.stats
	}
}

#[cfg(test)]
mod tests {
	use http::HeaderValue;
	use secrecy::SecretString;

	use super::*;
	use crate::crypto::StaticSecretReader;

	fn test_oauth2_config() -> OAuth2Config {
		OAuth2Config {
			token_endpoint: "https://idp.example.com/token".to_string(),
			authorization_endpoint: "https://idp.example.com/authorize".to_string(),
			client_id: "client-id".to_string(),
			redirect_uri: "https://%REQ(:authority)%/_oauth".to_string(),
			redirect_path_matcher: PathMatcher::Exact("/_oauth".to_string()),
			signout_path: PathMatcher::Exact("/signout".to_string()),
			pass_through_matchers: vec![],
			deny_redirect_matchers: vec![],
			cookie_names: CookieNames::default(),
			cookie_domain: None,
			auth_type: AuthType::default(),
			auth_scopes: vec![],
			resources: vec![],
			default_expires_in: 0,
			default_refresh_token_expires_in: 604_800,
			forward_bearer_token: false,
			preserve_authorization_header: false,
			use_refresh_token: true,
			disable_id_token_set_cookie: false,
			disable_access_token_set_cookie: false,
			disable_refresh_token_set_cookie: false,
			cookie_configs: CookieConfigs::default(),
			nonce_same_site_from_refresh_token: false,
		}
	}

	fn secret_reader() -> Arc<dyn SecretReader> {
		Arc::new(StaticSecretReader::new(
			SecretString::new("client-secret".into()),
			SecretString::new("hmac-secret".into()),
		))
	}

	#[test]
	fn path_matcher_ignores_query_and_fragment() {
		let exact = PathMatcher::Exact("/_oauth".to_string());
		assert!(exact.matches("/_oauth"));
		assert!(exact.matches("/_oauth?code=x&state=y"));
		assert!(exact.matches("/_oauth#frag"));
		assert!(!exact.matches("/_oauth2"));

		let prefix = PathMatcher::Prefix("/api".to_string());
		assert!(prefix.matches("/api/v1?x=1"));
		assert!(!prefix.matches("/app"));
	}

	#[test]
	fn header_matcher_resolves_pseudo_headers() {
		let mut headers = HeaderMap::new();
		headers.insert("x-bypass", HeaderValue::from_static("yes"));

		let by_header = HeaderMatcher {
			name: "x-bypass".to_string(),
			kind: HeaderMatchKind::ExactMatch("yes".to_string()),
		};
		assert!(by_header.matches(&headers, "/app", "host"));

		let by_path = HeaderMatcher {
			name: ":path".to_string(),
			kind: HeaderMatchKind::PrefixMatch("/api".to_string()),
		};
		assert!(by_path.matches(&headers, "/api/v1", "host"));
		assert!(!by_path.matches(&headers, "/app", "host"));

		let present = HeaderMatcher {
			name: "authorization".to_string(),
			kind: HeaderMatchKind::PresentMatch(false),
		};
		assert!(present.matches(&headers, "/app", "host"));
	}

	#[test]
	fn builds_authorization_query_pairs_with_defaults() {
		let config = FilterConfig::new(test_oauth2_config(), secret_reader()).unwrap();
		assert_eq!(
			config.authorization_query_pairs,
			vec![
				("client_id".to_string(), "client-id".to_string()),
				("response_type".to_string(), "code".to_string()),
				("scope".to_string(), "user".to_string()),
			]
		);
		assert!(config.encoded_resource_suffix.is_empty());
	}

	#[test]
	fn keeps_endpoint_query_params_and_joins_scopes() {
		let mut oauth2 = test_oauth2_config();
		oauth2.authorization_endpoint =
			"https://idp.example.com/authorize?audience=api&client_id=stale".to_string();
		oauth2.auth_scopes = vec!["openid".to_string(), "profile".to_string()];
		let config = FilterConfig::new(oauth2, secret_reader()).unwrap();
		assert_eq!(
			config.authorization_query_pairs,
			vec![
				("audience".to_string(), "api".to_string()),
				("client_id".to_string(), "client-id".to_string()),
				("response_type".to_string(), "code".to_string()),
				("scope".to_string(), "openid profile".to_string()),
			]
		);
	}

	#[test]
	fn encodes_resource_suffix() {
		let mut oauth2 = test_oauth2_config();
		oauth2.resources = vec![
			"https://api.example.com".to_string(),
			"urn:resource:1".to_string(),
		];
		let config = FilterConfig::new(oauth2, secret_reader()).unwrap();
		assert_eq!(
			config.encoded_resource_suffix,
			"&resource=https%3A%2F%2Fapi.example.com&resource=urn%3Aresource%3A1"
		);
	}

	#[test]
	fn rejects_malformed_endpoints_and_templates() {
		let mut oauth2 = test_oauth2_config();
		oauth2.authorization_endpoint = "not a url".to_string();
		assert!(matches!(
			FilterConfig::new(oauth2, secret_reader()),
			Err(ConfigError::InvalidAuthorizationEndpoint { .. })
		));

		let mut oauth2 = test_oauth2_config();
		oauth2.authorization_endpoint = "ftp://idp.example.com/authorize".to_string();
		assert!(matches!(
			FilterConfig::new(oauth2, secret_reader()),
			Err(ConfigError::AuthorizationEndpointNotHttp(_))
		));

		let mut oauth2 = test_oauth2_config();
		oauth2.token_endpoint = "not a url".to_string();
		assert!(matches!(
			FilterConfig::new(oauth2, secret_reader()),
			Err(ConfigError::InvalidTokenEndpoint { .. })
		));

		let mut oauth2 = test_oauth2_config();
		oauth2.redirect_uri = "https://%REQ(:authority/_oauth".to_string();
		assert!(matches!(
			FilterConfig::new(oauth2, secret_reader()),
			Err(ConfigError::InvalidRedirectUriTemplate { .. })
		));

		let mut oauth2 = test_oauth2_config();
		oauth2.client_id = String::new();
		assert!(matches!(
			FilterConfig::new(oauth2, secret_reader()),
			Err(ConfigError::EmptyClientId)
		));
	}

	#[test]
	fn redirect_uri_template_renders_headers() {
		let template =
			RedirectUriTemplate::parse("%REQ(x-forwarded-proto)%://%REQ(:authority)%/_oauth").unwrap();
		let mut headers = HeaderMap::new();
		headers.insert("x-forwarded-proto", HeaderValue::from_static("https"));
		assert_eq!(
			template.render(&headers, "host.example.com", "/app"),
			"https://host.example.com/_oauth"
		);

		// Unset headers render empty.
		let template = RedirectUriTemplate::parse("https://cb%REQ(x-missing)%/path").unwrap();
		assert_eq!(template.render(&headers, "h", "/"), "https://cb/path");
	}

	#[test]
	fn nonce_same_site_honors_the_compatibility_flag() {
		let mut oauth2 = test_oauth2_config();
		oauth2.cookie_configs.oauth_nonce_cookie_config.same_site = SameSite::Strict;
		oauth2.cookie_configs.refresh_token_cookie_config.same_site = SameSite::None;
		let config = FilterConfig::new(oauth2.clone(), secret_reader()).unwrap();
		assert_eq!(config.nonce_same_site(), SameSite::Strict);

		oauth2.nonce_same_site_from_refresh_token = true;
		let config = FilterConfig::new(oauth2, secret_reader()).unwrap();
		assert_eq!(config.nonce_same_site(), SameSite::None);
	}

	#[test]
	fn config_deserializes_with_defaults() {
		let config: OAuth2Config = serde_json::from_value(serde_json::json!({
			"token_endpoint": "https://idp.example.com/token",
			"authorization_endpoint": "https://idp.example.com/authorize",
			"client_id": "client-id",
			"redirect_uri": "https://%REQ(:authority)%/_oauth",
			"redirect_path_matcher": {"exact": "/_oauth"},
			"signout_path": {"exact": "/signout"},
			"pass_through_matchers": [{"name": "x-bypass", "exact_match": "yes"}],
			"cookie_configs": {"id_token_cookie_config": {"same_site": "lax"}}
		}))
		.unwrap();
		assert_eq!(config.cookie_names, CookieNames::default());
		assert!(config.use_refresh_token);
		assert_eq!(config.default_refresh_token_expires_in, 604_800);
		assert_eq!(config.auth_type, AuthType::UrlEncodedBody);
		assert_eq!(
			config.cookie_configs.id_token_cookie_config.same_site,
			SameSite::Lax
		);
		assert_eq!(
			config.cookie_configs.oauth_hmac_cookie_config.same_site,
			SameSite::Disabled
		);
		assert!(matches!(
			config.pass_through_matchers[0].kind,
			HeaderMatchKind::ExactMatch(_)
		));
	}
}
