//! The per-request decision machine.
//!
//! Five flows hang off [`OAuth2Filter::apply`]: pass an already
//! authenticated request through, bounce the user agent to the IdP, finish
//! the IdP callback by exchanging the authorization code, refresh an
//! expired session in place, and sign the user out. The two awaits on the
//! IdP client are the points where the host keeps the request paused;
//! dropping the future abandons the exchange safely because the filter owns
//! the await.

use std::sync::Arc;

use http::header::{AUTHORIZATION, CONTENT_TYPE, LOCATION, SET_COOKIE};
use http::{HeaderValue, StatusCode};
use secrecy::ExposeSecret;
use tracing::{debug, error, warn};
use url::Url;

use crate::client::{AccessTokenRequest, OAuth2Client, RefreshTokenRequest, TokenResponse};
use crate::clock::{SystemTimeSource, TimeSource};
use crate::config::{CookieSettings, FilterConfig};
use crate::cookies;
use crate::crypto::{self, OsRandomGenerator, RandomGenerator};
use crate::csrf;
use crate::http::{
	Body, HeaderMap, PolicyResponse, Request, Response, ResponseTag, query_param, request_host,
	request_scheme,
};
use crate::session::{self, CookieValidator};
use crate::state::{self, StateParam};
use crate::tokens;

const UNAUTHORIZED_BODY: &str = "OAuth flow failed.";
const CSRF_COOKIE_MAX_AGE_SECS: u64 = 600;

#[derive(Debug, thiserror::Error)]
pub enum FilterError {
	#[error("request is missing a Host header")]
	MissingHost,
	#[error("request is missing a path")]
	MissingPath,
	#[error("failed to encode the state parameter: {0}")]
	StateEncode(#[source] serde_json::Error),
	#[error("failed to build a response: {0}")]
	Response(#[from] http::Error),
	#[error("produced an invalid header value: {0}")]
	HeaderValue(#[from] http::header::InvalidHeaderValue),
}

/// Result of validating an IdP callback request. Everything fails closed
/// into `valid == false`.
#[derive(Clone, Debug, Default)]
struct CallbackValidationResult {
	valid: bool,
	auth_code: String,
	original_request_url: String,
}

/// Pending token state between an IdP completion and the response carrying
/// its cookies.
struct TokenUpdate {
	access_token: String,
	id_token: String,
	refresh_token: String,
	expires_in: u64,
	id_token_max_age: u64,
	refresh_token_max_age: u64,
	new_expires: String,
}

pub struct OAuth2Filter {
	config: Arc<FilterConfig>,
	oauth_client: Arc<dyn OAuth2Client>,
	time_source: Arc<dyn TimeSource>,
	random: Arc<dyn RandomGenerator>,
}

impl OAuth2Filter {
	pub fn new(config: Arc<FilterConfig>, oauth_client: Arc<dyn OAuth2Client>) -> Self {
		Self::with_sources(
			config,
			oauth_client,
			Arc::new(SystemTimeSource),
			Arc::new(OsRandomGenerator),
		)
	}

	pub fn with_sources(
		config: Arc<FilterConfig>,
		oauth_client: Arc<dyn OAuth2Client>,
		time_source: Arc<dyn TimeSource>,
		random: Arc<dyn RandomGenerator>,
	) -> Self {
		Self {
			config,
			oauth_client,
			time_source,
			random,
		}
	}

	/// Runs the filter over one request's headers.
	pub async fn apply(&self, req: &mut Request) -> Result<PolicyResponse, FilterError> {
		// Pass-through wins before anything else, in particular before the
		// Authorization header is sanitized.
		let match_path = req
			.uri()
			.path_and_query()
			.map(|pq| pq.as_str().to_string())
			.unwrap_or_else(|| req.uri().path().to_string());
		let match_host = request_host(req).unwrap_or_default().to_string();
		if self
			.config
			.oauth
			.pass_through_matchers
			.iter()
			.any(|matcher| matcher.matches(req.headers(), &match_path, &match_host))
		{
			self.config.stats.oauth_passthrough.inc();
			return Ok(PolicyResponse::forward());
		}

		// We have no way to validate an inbound Authorization header; when
		// token forwarding is on it is rebuilt from the bearer cookie below.
		if !self.config.oauth.preserve_authorization_header {
			req.headers_mut().remove(AUTHORIZATION);
		}

		let host = request_host(req)
			.ok_or(FilterError::MissingHost)?
			.to_string();
		let path = req
			.uri()
			.path_and_query()
			.ok_or(FilterError::MissingPath)?
			.as_str()
			.to_string();
		let scheme = request_scheme(req);

		if self.config.oauth.signout_path.matches(&path) {
			return self.sign_out_user(scheme, &host);
		}

		let hmac_secret = self.config.secret_reader.hmac_secret();
		let secret = hmac_secret.expose_secret().as_bytes();
		let validator = CookieValidator::from_request(&self.config.oauth.cookie_names, req.headers(), &host);
		let now = self.time_source.now_epoch_secs();
		let on_callback_path = self.config.oauth.redirect_path_matcher.matches(&path);

		if validator.is_valid(secret, self.config.cookie_domain(), now) {
			debug!("skipping oauth flow due to a valid session");
			self.config.stats.oauth_success.inc();
			if self.config.oauth.forward_bearer_token && !validator.token().is_empty() {
				set_bearer_token(req.headers_mut(), validator.token())?;
			}

			if on_callback_path {
				// A cached IdP login can race several in-flight requests onto
				// the callback path; send the extras back where they came from.
				let result = self.validate_oauth_callback(req.headers(), &path, secret);
				if !result.valid {
					return self.unauthorized_response();
				}
				if let Ok(original_url) = Url::parse(&result.original_request_url)
					&& self
						.config
						.oauth
						.redirect_path_matcher
						.matches(&path_and_query_of(&original_url))
				{
					debug!(
						url = %result.original_request_url,
						"state url matches the redirect path matcher, refusing a redirect loop"
					);
					return self.unauthorized_response();
				}
				let response = redirect_response(&result.original_request_url, ResponseTag::RaceRedirect)?;
				return Ok(PolicyResponse::with_response(response));
			}

			return Ok(PolicyResponse::forward());
		}

		// The session is invalid or absent. A stored refresh token is the
		// cheap way back in; fall through to a full flow only without one.
		if self.config.oauth.use_refresh_token && validator.can_refresh() {
			debug!("trying to update the access token using the refresh token");
			let client_secret = self.config.secret_reader.client_secret();
			let refreshed = self
				.oauth_client
				.refresh_access_token(RefreshTokenRequest {
					refresh_token: validator.refresh_token(),
					client_id: &self.config.oauth.client_id,
					client_secret: &client_secret,
					auth_type: self.config.oauth.auth_type,
				})
				.await;
			return match refreshed {
				Ok(tokens) => self.finish_refresh_token_flow(req, tokens, &host),
				Err(e) => {
					debug!("refresh flow failed, restarting the oauth flow: {e}");
					self.config.stats.oauth_refreshtoken_failure.inc();
					self.redirect_or_unauthorized(req.headers(), scheme, &host, &path)
				},
			};
		}

		if !on_callback_path {
			return self.redirect_or_unauthorized(req.headers(), scheme, &host, &path);
		}

		// We are on the callback path and expect the query string to carry
		// everything needed to exchange the authorization code.
		let result = self.validate_oauth_callback(req.headers(), &path, secret);
		if !result.valid {
			return self.unauthorized_response();
		}

		let redirect_uri = self
			.config
			.redirect_uri_template
			.render(req.headers(), &host, &path);
		let client_secret = self.config.secret_reader.client_secret();
		let exchanged = self
			.oauth_client
			.get_access_token(AccessTokenRequest {
				auth_code: &result.auth_code,
				client_id: &self.config.oauth.client_id,
				client_secret: &client_secret,
				redirect_uri: &redirect_uri,
				auth_type: self.config.oauth.auth_type,
			})
			.await;
		match exchanged {
			Ok(tokens) => self.finish_access_token_flow(tokens, &result.original_request_url, &host),
			Err(e) => {
				warn!("access token exchange failed: {e}");
				self.unauthorized_response()
			},
		}
	}

	fn redirect_or_unauthorized(
		&self,
		headers: &HeaderMap,
		scheme: &str,
		host: &str,
		path: &str,
	) -> Result<PolicyResponse, FilterError> {
		let denied = self
			.config
			.oauth
			.deny_redirect_matchers
			.iter()
			.any(|matcher| matcher.matches(headers, path, host));
		if denied {
			debug!("redirect is denied for this request");
			return self.unauthorized_response();
		}
		self.redirect_to_oauth_server(headers, scheme, host, path)
	}

	fn redirect_to_oauth_server(
		&self,
		headers: &HeaderMap,
		scheme: &str,
		host: &str,
		path: &str,
	) -> Result<PolicyResponse, FilterError> {
		debug!(%path, "redirecting to the oauth server");
		let original_url = format!("{scheme}://{host}{path}");

		let hmac_secret = self.config.secret_reader.hmac_secret();
		let secret = hmac_secret.expose_secret().as_bytes();
		let nonce_cookie_name = &self.config.oauth.cookie_names.oauth_nonce;
		let existing_csrf_token = cookies::parse_cookies(headers, |name| name == nonce_cookie_name)
			.remove(nonce_cookie_name.as_str());

		// Reuse a live CSRF cookie so parallel logins agree on one token;
		// a reused token must still carry a valid HMAC.
		let (csrf_token, minted) = match existing_csrf_token {
			Some(token) => (token, false),
			None => (csrf::generate_csrf_token(secret, self.random.as_ref()), true),
		};
		if !minted && !csrf::validate_csrf_token_hmac(secret, &csrf_token) {
			error!("csrf token validation failed");
			return self.unauthorized_response();
		}

		let state =
			state::encode_state(&original_url, &csrf_token).map_err(FilterError::StateEncode)?;
		let redirect_uri = self.config.redirect_uri_template.render(headers, host, path);

		let mut authorization_url = self.config.authorization_endpoint_url.clone();
		{
			let mut pairs = authorization_url.query_pairs_mut();
			pairs.clear();
			for (name, value) in &self.config.authorization_query_pairs {
				pairs.append_pair(name, value);
			}
			pairs.append_pair("state", &state);
			pairs.append_pair("redirect_uri", &redirect_uri);
		}
		let location = format!("{authorization_url}{}", self.config.encoded_resource_suffix);

		let mut response = redirect_response(&location, ResponseTag::MissingCredentials)?;
		if minted {
			// The login handshake has ten minutes to complete.
			let set_cookie = cookies::set_cookie_header(
				nonce_cookie_name,
				&csrf_token,
				self.config.cookie_domain(),
				CSRF_COOKIE_MAX_AGE_SECS,
				self.config.nonce_same_site(),
			);
			response
				.headers_mut()
				.append(SET_COOKIE, HeaderValue::from_str(&set_cookie)?);
		}

		self.config.stats.oauth_unauthorized_rq.inc();
		Ok(PolicyResponse::with_response(response))
	}

	fn sign_out_user(&self, scheme: &str, host: &str) -> Result<PolicyResponse, FilterError> {
		let names = &self.config.oauth.cookie_names;
		let domain = self.config.cookie_domain();
		let mut response = redirect_response(&format!("{scheme}://{host}/"), ResponseTag::SignOut)?;
		for name in [
			&names.oauth_hmac,
			&names.oauth_expires,
			&names.bearer_token,
			&names.id_token,
			&names.refresh_token,
			&names.oauth_nonce,
		] {
			let deletion = cookies::delete_cookie_header(name, domain);
			response
				.headers_mut()
				.append(SET_COOKIE, HeaderValue::from_str(&deletion)?);
		}
		Ok(PolicyResponse::with_response(response))
	}

	/// Applies the disable gates and the lifetime policy to freshly issued
	/// tokens. A disabled token drops out of both cookie emission and the
	/// HMAC payload of the new session.
	fn update_tokens(&self, tokens: TokenResponse) -> TokenUpdate {
		let now = self.time_source.now_epoch_secs();
		let oauth = &self.config.oauth;
		let id_token_max_age = tokens::id_token_max_age(&tokens.id_token, tokens.expires_in, now);
		let refresh_token_max_age = tokens::refresh_token_max_age(
			&tokens.refresh_token,
			tokens.expires_in,
			now,
			oauth.use_refresh_token,
			oauth.default_refresh_token_expires_in,
		);
		TokenUpdate {
			access_token: if oauth.disable_access_token_set_cookie {
				String::new()
			} else {
				tokens.access_token
			},
			id_token: if oauth.disable_id_token_set_cookie {
				String::new()
			} else {
				tokens.id_token
			},
			refresh_token: if oauth.disable_refresh_token_set_cookie {
				String::new()
			} else {
				tokens.refresh_token
			},
			expires_in: tokens.expires_in,
			id_token_max_age,
			refresh_token_max_age,
			new_expires: (now + tokens.expires_in).to_string(),
		}
	}

	fn encoded_token(&self, update: &TokenUpdate, host: &str) -> String {
		let hmac_secret = self.config.secret_reader.hmac_secret();
		let domain = self.config.cookie_domain().unwrap_or(host);
		session::encode_hmac_base64(
			hmac_secret.expose_secret().as_bytes(),
			domain,
			&update.new_expires,
			&update.access_token,
			&update.id_token,
			&update.refresh_token,
		)
	}

	fn add_response_cookies(
		&self,
		headers: &mut HeaderMap,
		update: &TokenUpdate,
		encoded_token: &str,
	) -> Result<(), FilterError> {
		let names = &self.config.oauth.cookie_names;
		let configs = &self.config.oauth.cookie_configs;
		let domain = self.config.cookie_domain();

		let mut append = |name: &str, value: &str, max_age: u64, settings: CookieSettings| {
			let header = cookies::set_cookie_header(name, value, domain, max_age, settings.same_site);
			HeaderValue::from_str(&header).map(|value| {
				headers.append(SET_COOKIE, value);
			})
		};

		append(
			&names.oauth_hmac,
			encoded_token,
			update.expires_in,
			configs.oauth_hmac_cookie_config,
		)?;
		append(
			&names.oauth_expires,
			&update.new_expires,
			update.expires_in,
			configs.oauth_expires_cookie_config,
		)?;
		if !update.access_token.is_empty() {
			append(
				&names.bearer_token,
				&update.access_token,
				update.expires_in,
				configs.bearer_token_cookie_config,
			)?;
		}
		if !update.id_token.is_empty() {
			append(
				&names.id_token,
				&update.id_token,
				update.id_token_max_age,
				configs.id_token_cookie_config,
			)?;
		}
		if !update.refresh_token.is_empty() {
			append(
				&names.refresh_token,
				&update.refresh_token,
				update.refresh_token_max_age,
				configs.refresh_token_cookie_config,
			)?;
		}
		Ok(())
	}

	/// Completes the authorization-code exchange: cookies for the new
	/// session plus a redirect back to where the user wanted to go.
	fn finish_access_token_flow(
		&self,
		tokens: TokenResponse,
		original_request_url: &str,
		host: &str,
	) -> Result<PolicyResponse, FilterError> {
		let update = self.update_tokens(tokens);
		let encoded_token = self.encoded_token(&update, host);
		let mut response = redirect_response(original_request_url, ResponseTag::LoggedIn)?;
		self.add_response_cookies(response.headers_mut(), &update, &encoded_token)?;
		self.config.stats.oauth_success.inc();
		Ok(PolicyResponse::with_response(response))
	}

	/// Completes a refresh: the in-flight request's `Cookie` header is
	/// rewritten so the upstream sees the new session, and the matching
	/// `Set-Cookie`s are handed back for the upstream response.
	fn finish_refresh_token_flow(
		&self,
		req: &mut Request,
		tokens: TokenResponse,
		host: &str,
	) -> Result<PolicyResponse, FilterError> {
		let update = self.update_tokens(tokens);
		let encoded_token = self.encoded_token(&update, host);
		let names = &self.config.oauth.cookie_names;

		let mut request_cookies = cookies::parse_cookies(req.headers(), |_| true);
		request_cookies.insert(names.oauth_hmac.clone(), encoded_token.clone());
		request_cookies.insert(names.oauth_expires.clone(), update.new_expires.clone());
		if !update.access_token.is_empty() {
			request_cookies.insert(names.bearer_token.clone(), update.access_token.clone());
		}
		if !update.id_token.is_empty() {
			request_cookies.insert(names.id_token.clone(), update.id_token.clone());
		}
		if !update.refresh_token.is_empty() {
			request_cookies.insert(names.refresh_token.clone(), update.refresh_token.clone());
		}
		let cookie_header = request_cookies
			.iter()
			.map(|(name, value)| format!("{name}={value}"))
			.collect::<Vec<_>>()
			.join("; ");
		req
			.headers_mut()
			.insert(http::header::COOKIE, HeaderValue::from_str(&cookie_header)?);
		if self.config.oauth.forward_bearer_token && !update.access_token.is_empty() {
			set_bearer_token(req.headers_mut(), &update.access_token)?;
		}

		let mut response_headers = HeaderMap::new();
		self.add_response_cookies(&mut response_headers, &update, &encoded_token)?;

		self.config.stats.oauth_refreshtoken_success.inc();
		self.config.stats.oauth_success.inc();
		Ok(PolicyResponse {
			direct_response: None,
			response_headers: Some(response_headers),
		})
	}

	fn unauthorized_response(&self) -> Result<PolicyResponse, FilterError> {
		self.config.stats.oauth_failure.inc();
		let response = http::Response::builder()
			.status(StatusCode::UNAUTHORIZED)
			.header(CONTENT_TYPE, "text/plain")
			.body(Body::from(UNAUTHORIZED_BODY))?;
		Ok(PolicyResponse::with_response(response))
	}

	/// Validates an IdP callback: no `error` report, `code` and `state`
	/// present, the state decodes, its CSRF token double-submits against
	/// the nonce cookie, and the embedded URL is absolute.
	fn validate_oauth_callback(
		&self,
		headers: &HeaderMap,
		path: &str,
		hmac_secret: &[u8],
	) -> CallbackValidationResult {
		let query = path.split_once('?').map(|(_, query)| query).unwrap_or_default();
		if query_param(query, "error").is_some() {
			debug!("oauth server returned an error response");
			return CallbackValidationResult::default();
		}

		let (Some(code), Some(state)) = (
			query_param(query, "code"),
			query_param(query, "state"),
		) else {
			error!("code or state query param does not exist");
			return CallbackValidationResult::default();
		};

		let Some(StateParam { url, csrf_token }) = state::decode_state(&state) else {
			error!("state query param does not decode to url and csrf token");
			return CallbackValidationResult::default();
		};

		if !self.validate_csrf_token(headers, &csrf_token, hmac_secret) {
			error!("csrf token validation failed");
			return CallbackValidationResult::default();
		}

		// The state URL must be absolute; it becomes a Location header.
		match Url::parse(&url) {
			Ok(parsed) if matches!(parsed.scheme(), "http" | "https") && parsed.has_host() => {},
			_ => {
				error!(%url, "state url is not an absolute http(s) url");
				return CallbackValidationResult::default();
			},
		}

		CallbackValidationResult {
			valid: true,
			auth_code: code,
			original_request_url: url,
		}
	}

	/// The double-submit check: the nonce cookie must exist, must equal the
	/// CSRF token from the state, and the token's HMAC must verify. This
	/// keeps an attacker from binding a victim to an attacker-initiated
	/// login.
	fn validate_csrf_token(&self, headers: &HeaderMap, csrf_token: &str, hmac_secret: &[u8]) -> bool {
		let nonce_cookie_name = &self.config.oauth.cookie_names.oauth_nonce;
		let cookie = cookies::parse_cookies(headers, |name| name == nonce_cookie_name)
			.remove(nonce_cookie_name.as_str());
		let Some(cookie) = cookie else {
			return false;
		};
		crypto::constant_time_eq(cookie.as_bytes(), csrf_token.as_bytes())
			&& csrf::validate_csrf_token_hmac(hmac_secret, csrf_token)
	}
}

fn set_bearer_token(headers: &mut HeaderMap, token: &str) -> Result<(), FilterError> {
	headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {token}"))?);
	Ok(())
}

fn redirect_response(location: &str, tag: ResponseTag) -> Result<Response, FilterError> {
	let mut response = http::Response::builder()
		.status(StatusCode::FOUND)
		.header(LOCATION, location)
		.body(Body::empty())?;
	response.extensions_mut().insert(tag);
	Ok(response)
}

fn path_and_query_of(url: &Url) -> String {
	match url.query() {
		Some(query) => format!("{}?{query}", url.path()),
		None => url.path().to_string(),
	}
}
