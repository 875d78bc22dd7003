//! Request/response plumbing shared with the host proxy.

pub use ::http::HeaderMap;

pub type Body = axum::body::Body;
pub type Request = ::http::Request<Body>;
pub type Response = axum::response::Response;

/// Outcome of applying the filter to one request.
///
/// `direct_response` short-circuits the request. `response_headers` carries
/// `Set-Cookie` values the host must merge into the upstream response when
/// the request is forwarded (the refresh path relies on this running in the
/// response-encoding hook).
#[derive(Debug, Default)]
pub struct PolicyResponse {
	pub direct_response: Option<Response>,
	pub response_headers: Option<HeaderMap>,
}

impl PolicyResponse {
	pub fn forward() -> Self {
		Self::default()
	}

	pub fn with_response(response: Response) -> Self {
		Self {
			direct_response: Some(response),
			response_headers: None,
		}
	}

	pub fn should_short_circuit(&self) -> bool {
		self.direct_response.is_some()
	}
}

/// Observability tag attached to direct responses via
/// [`Response::extensions`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ResponseTag {
	RaceRedirect,
	LoggedIn,
	MissingCredentials,
	SignOut,
}

impl ResponseTag {
	pub fn as_str(self) -> &'static str {
		match self {
			ResponseTag::RaceRedirect => "oauth.race_redirect",
			ResponseTag::LoggedIn => "oauth.logged_in",
			ResponseTag::MissingCredentials => "oauth.missing_credentials",
			ResponseTag::SignOut => "oauth.sign_out",
		}
	}
}

/// The request host: `Host` header first, URI authority as fallback.
pub fn request_host(req: &Request) -> Option<&str> {
	if let Some(host) = req.headers().get(::http::header::HOST)
		&& let Ok(host) = host.to_str()
	{
		return Some(host);
	}
	req.uri().authority().map(|authority| authority.as_str())
}

/// The request scheme. OAuth requires https, so that is the default; http
/// is honored only when the request declares it explicitly.
pub fn request_scheme(req: &Request) -> &'static str {
	match req.uri().scheme_str() {
		Some("http") => "http",
		Some(_) => "https",
		None => {
			let proto = req
				.headers()
				.get("x-forwarded-proto")
				.and_then(|v| v.to_str().ok());
			if proto.is_some_and(|proto| proto.eq_ignore_ascii_case("http")) {
				"http"
			} else {
				"https"
			}
		},
	}
}

/// First value of a query parameter, percent-decoded.
pub fn query_param(query: &str, name: &str) -> Option<String> {
	url::form_urlencoded::parse(query.as_bytes())
		.find(|(key, _)| key == name)
		.map(|(_, value)| value.into_owned())
}
