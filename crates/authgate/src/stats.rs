use std::sync::atomic::{AtomicU64, Ordering};

/// Monotonic counter scraped by the host.
#[derive(Debug, Default)]
pub struct Counter(AtomicU64);

impl Counter {
	pub fn inc(&self) {
		self.0.fetch_add(1, Ordering::Relaxed);
	}

	pub fn value(&self) -> u64 {
		self.0.load(Ordering::Relaxed)
	}
}

/// Per-filter counters. The filter only increments; exposition is the
/// host's concern.
#[derive(Debug, Default)]
pub struct FilterStats {
	pub oauth_passthrough: Counter,
	pub oauth_success: Counter,
	pub oauth_unauthorized_rq: Counter,
	pub oauth_failure: Counter,
	pub oauth_refreshtoken_success: Counter,
	pub oauth_refreshtoken_failure: Counter,
}
