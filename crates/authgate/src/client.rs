//! The IdP token client: the two async operations the filter pauses on,
//! plus an HTTP implementation of the wire exchange.

use async_trait::async_trait;
use secrecy::{ExposeSecret, SecretString};
use serde::Deserialize;
use tracing::debug;
use url::Url;

/// How client credentials are presented to the token endpoint.
#[derive(Clone, Copy, Debug, Default, Deserialize, Eq, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum AuthType {
	BasicAuth,
	#[default]
	UrlEncodedBody,
}

#[derive(Debug)]
pub struct AccessTokenRequest<'a> {
	pub auth_code: &'a str,
	pub client_id: &'a str,
	pub client_secret: &'a SecretString,
	pub redirect_uri: &'a str,
	pub auth_type: AuthType,
}

#[derive(Debug)]
pub struct RefreshTokenRequest<'a> {
	pub refresh_token: &'a str,
	pub client_id: &'a str,
	pub client_secret: &'a SecretString,
	pub auth_type: AuthType,
}

/// Tokens delivered by a successful exchange. Absent tokens are empty
/// strings, mirroring how they enter the session HMAC payload.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct TokenResponse {
	pub access_token: String,
	pub id_token: String,
	pub refresh_token: String,
	pub expires_in: u64,
}

#[derive(Debug, thiserror::Error)]
pub enum TokenClientError {
	#[error("token endpoint transport failure: {0}")]
	Transport(#[from] reqwest::Error),
	#[error("token endpoint returned status {0}")]
	Endpoint(u16),
	#[error("token endpoint returned a malformed body: {0}")]
	Parse(#[from] serde_json::Error),
}

/// The asynchronous IdP interface the filter suspends on. Any error is
/// treated by the caller as the failure callback of that flow.
#[async_trait]
pub trait OAuth2Client: Send + Sync {
	async fn get_access_token(
		&self,
		req: AccessTokenRequest<'_>,
	) -> Result<TokenResponse, TokenClientError>;

	async fn refresh_access_token(
		&self,
		req: RefreshTokenRequest<'_>,
	) -> Result<TokenResponse, TokenClientError>;
}

#[derive(Debug, Deserialize)]
struct TokenEndpointResponse {
	access_token: String,
	#[serde(default)]
	id_token: Option<String>,
	#[serde(default)]
	refresh_token: Option<String>,
	#[serde(default)]
	expires_in: Option<u64>,
}

/// Token client speaking `application/x-www-form-urlencoded` to the
/// configured token endpoint. Timeouts belong to the supplied
/// `reqwest::Client`; they surface as transport errors.
#[derive(Clone, Debug)]
pub struct HttpOAuth2Client {
	http: reqwest::Client,
	token_endpoint: Url,
	default_expires_in: u64,
}

impl HttpOAuth2Client {
	pub fn new(http: reqwest::Client, token_endpoint: Url, default_expires_in: u64) -> Self {
		Self {
			http,
			token_endpoint,
			default_expires_in,
		}
	}

	async fn post_token(
		&self,
		mut form: Vec<(&str, &str)>,
		client_id: &str,
		client_secret: &SecretString,
		auth_type: AuthType,
	) -> Result<TokenResponse, TokenClientError> {
		let mut request = self.http.post(self.token_endpoint.clone());
		match auth_type {
			AuthType::BasicAuth => {
				request = request.basic_auth(client_id, Some(client_secret.expose_secret()));
			},
			AuthType::UrlEncodedBody => {
				form.push(("client_id", client_id));
				form.push(("client_secret", client_secret.expose_secret()));
			},
		}

		let response = request.form(&form).send().await?;
		let status = response.status();
		if !status.is_success() {
			debug!(status = status.as_u16(), "token endpoint rejected the request");
			return Err(TokenClientError::Endpoint(status.as_u16()));
		}

		let body = response.bytes().await?;
		let parsed: TokenEndpointResponse = serde_json::from_slice(&body)?;
		Ok(TokenResponse {
			access_token: parsed.access_token,
			id_token: parsed.id_token.unwrap_or_default(),
			refresh_token: parsed.refresh_token.unwrap_or_default(),
			expires_in: parsed.expires_in.unwrap_or(self.default_expires_in),
		})
	}
}

#[async_trait]
impl OAuth2Client for HttpOAuth2Client {
	async fn get_access_token(
		&self,
		req: AccessTokenRequest<'_>,
	) -> Result<TokenResponse, TokenClientError> {
		let form = vec![
			("grant_type", "authorization_code"),
			("code", req.auth_code),
			("redirect_uri", req.redirect_uri),
		];
		self
			.post_token(form, req.client_id, req.client_secret, req.auth_type)
			.await
	}

	async fn refresh_access_token(
		&self,
		req: RefreshTokenRequest<'_>,
	) -> Result<TokenResponse, TokenClientError> {
		let form = vec![
			("grant_type", "refresh_token"),
			("refresh_token", req.refresh_token),
		];
		self
			.post_token(form, req.client_id, req.client_secret, req.auth_type)
			.await
	}
}
