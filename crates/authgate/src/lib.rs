//! An OAuth2 authorization-code filter for HTTP proxies.
//!
//! The filter sits on the request path in front of a protected upstream.
//! Callers holding a valid cookie session pass through; everyone else is
//! walked through the authorization-code flow against an external IdP:
//! redirect out with a CSRF-protected `state`, exchange the code on the
//! callback, establish the session as a set of HMAC-bound cookies, refresh
//! it in place once it expires, and tear it down on sign-out.
//!
//! The host owns transport, secrets, clocks, and randomness; all four enter
//! through small capability traits so flows stay deterministic under test.

pub mod client;
pub mod clock;
pub mod config;
pub mod cookies;
pub mod crypto;
pub mod csrf;
pub mod filter;
pub mod http;
pub mod session;
pub mod state;
pub mod stats;
pub mod tokens;

pub use crate::client::{AuthType, HttpOAuth2Client, OAuth2Client, TokenClientError, TokenResponse};
pub use crate::clock::{SystemTimeSource, TimeSource};
pub use crate::config::{ConfigError, FilterConfig, OAuth2Config};
pub use crate::crypto::{
	OsRandomGenerator, RandomGenerator, SecretReader, StaticSecretReader,
};
pub use crate::filter::{FilterError, OAuth2Filter};
pub use crate::http::{PolicyResponse, ResponseTag};
pub use crate::stats::FilterStats;
