//! Retry policy for connectivity failures.

// self
use crate::{_prelude::*, error::TransportError};

/// Classification of a failed dispatch.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FailureKind {
	/// No response was received.
	Connectivity,
	/// The fixed request timeout elapsed.
	Timeout,
	/// The server answered with a non-success status.
	Status(u16),
}
impl FailureKind {
	/// Returns `true` for failures where no response was received.
	pub const fn is_connectivity(self) -> bool {
		matches!(self, Self::Connectivity | Self::Timeout)
	}
}
impl From<&TransportError> for FailureKind {
	fn from(err: &TransportError) -> Self {
		if err.is_timeout() { Self::Timeout } else { Self::Connectivity }
	}
}

/// Capped exponential backoff: `delay(n) = min(base * 2^(n - 1), max_delay)`.
///
/// `attempt` arguments count dispatches already made, starting at 1. With the defaults a
/// request is dispatched at most four times, waiting 1s, 2s, and 4s in between.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
	/// Delay before the first retry.
	pub base_delay: Duration,
	/// Upper bound for any single delay.
	pub max_delay: Duration,
	/// Retries allowed after the initial dispatch.
	pub max_retries: u32,
}
impl RetryPolicy {
	/// Creates a policy with explicit parameters.
	pub const fn new(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
		Self { base_delay, max_delay, max_retries }
	}

	/// A policy that never retries.
	pub const fn disabled() -> Self {
		Self::new(Duration::ZERO, Duration::ZERO, 0)
	}

	/// Total dispatches allowed, including the initial one.
	pub const fn max_attempts(&self) -> u32 {
		self.max_retries.saturating_add(1)
	}

	/// Returns `true` when another dispatch should follow failure number `attempt`.
	pub fn should_retry(&self, attempt: u32, kind: FailureKind) -> bool {
		kind.is_connectivity() && attempt >= 1 && attempt <= self.max_retries
	}

	/// Delay to wait after failure number `attempt`.
	pub fn delay_for(&self, attempt: u32) -> Duration {
		let base = self.base_delay.max(Duration::ZERO);
		let cap = self.max_delay.max(Duration::ZERO);
		let exponent = attempt.saturating_sub(1);

		2_i32
			.checked_pow(exponent)
			.and_then(|factor| base.checked_mul(factor))
			.map_or(cap, |delay| delay.min(cap))
	}
}
impl Default for RetryPolicy {
	fn default() -> Self {
		Self::new(Duration::SECOND, Duration::seconds(30), 3)
	}
}
