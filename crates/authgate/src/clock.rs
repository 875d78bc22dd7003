use std::fmt::Debug;
use std::time::{SystemTime, UNIX_EPOCH};

/// Clock abstraction so expiry checks are testable.
pub trait TimeSource: Send + Sync + Debug {
	fn now(&self) -> SystemTime;

	fn now_epoch_secs(&self) -> u64 {
		self
			.now()
			.duration_since(UNIX_EPOCH)
			.unwrap_or_default()
			.as_secs()
	}
}

#[derive(Clone, Copy, Debug, Default)]
pub struct SystemTimeSource;

impl TimeSource for SystemTimeSource {
	fn now(&self) -> SystemTime {
		SystemTime::now()
	}
}
