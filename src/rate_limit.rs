//! Sliding-window admission control per named channel.
//!
//! The limiter is consulted before a request is dispatched. Each channel keeps the timestamps
//! of admitted requests inside its trailing window; a channel that fills its window is blocked
//! for one full window. Channels never share state, so exhausting `auth` leaves `general`
//! untouched.

// self
use crate::{_prelude::*, id::Channel};

/// Maximum number of requests admitted per trailing window.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimit {
	/// Requests admitted per window.
	pub max: u32,
	/// Trailing window length.
	pub window: Duration,
}
impl RateLimit {
	/// Creates a limit of `max` requests per `window`.
	pub const fn new(max: u32, window: Duration) -> Self {
		Self { max, window }
	}

	/// Creates a limit of `max` requests per minute.
	pub const fn per_minute(max: u32) -> Self {
		Self::new(max, Duration::MINUTE)
	}

	pub(crate) fn is_valid(&self) -> bool {
		self.max > 0 && self.window.is_positive()
	}
}

/// Result of an admission check.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RateLimitDecision {
	/// The request may proceed; `remaining` counts the admissions still available.
	Allow {
		/// Admissions left in the current window after this one.
		remaining: u32,
	},
	/// The channel is saturated.
	Reject(RetryDirective),
}
impl RateLimitDecision {
	/// Returns `true` for [`RateLimitDecision::Allow`].
	pub fn is_allowed(&self) -> bool {
		matches!(self, Self::Allow { .. })
	}
}

/// Advises callers when a rejected channel admits requests again.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryDirective {
	/// Instant when the channel unblocks.
	pub earliest_retry_at: OffsetDateTime,
	/// Time remaining until `earliest_retry_at`.
	pub retry_in: Duration,
}

#[derive(Debug, Default)]
struct RateWindow {
	timestamps: VecDeque<OffsetDateTime>,
	blocked_until: Option<OffsetDateTime>,
}
impl RateWindow {
	fn prune(&mut self, limit: &RateLimit, now: OffsetDateTime) {
		let cutoff = now - limit.window;

		while self.timestamps.front().is_some_and(|stamp| *stamp <= cutoff) {
			self.timestamps.pop_front();
		}

		if self.blocked_until.is_some_and(|until| now >= until) {
			self.blocked_until = None;
		}
	}

	fn admits(&mut self, limit: &RateLimit, now: OffsetDateTime) -> bool {
		self.prune(limit, now);

		if self.blocked_until.is_some() {
			return false;
		}
		if self.timestamps.len() >= limit.max as usize {
			self.blocked_until = Some(now + limit.window);

			return false;
		}

		true
	}

	fn remaining(&self, limit: &RateLimit) -> u32 {
		if self.blocked_until.is_some() {
			return 0;
		}

		let used = u32::try_from(self.timestamps.len()).unwrap_or(u32::MAX);

		limit.max.saturating_sub(used)
	}

	fn reset_in(&self, limit: &RateLimit, now: OffsetDateTime) -> Duration {
		let reset_at = match (self.blocked_until, self.timestamps.front()) {
			(Some(until), _) => until,
			(None, Some(oldest)) => *oldest + limit.window,
			(None, None) => return Duration::ZERO,
		};

		(reset_at - now).max(Duration::ZERO)
	}

	fn directive(&self, limit: &RateLimit, now: OffsetDateTime) -> RetryDirective {
		let retry_in = self.reset_in(limit, now);

		RetryDirective { earliest_retry_at: now + retry_in, retry_in }
	}
}

/// Default per-channel limits: `auth` 5/min, `ai` 10/min, `general` 60/min.
pub fn default_limits() -> BTreeMap<Channel, RateLimit> {
	BTreeMap::from([
		(Channel::auth(), RateLimit::per_minute(5)),
		(Channel::ai(), RateLimit::per_minute(10)),
		(Channel::general(), RateLimit::per_minute(60)),
	])
}

/// Per-channel sliding-window rate limiter.
///
/// Every operation has an `*_at` twin taking an explicit clock reading; the plain variants use
/// the current UTC instant.
#[derive(Debug)]
pub struct RateLimiter {
	limits: BTreeMap<Channel, RateLimit>,
	fallback: RateLimit,
	windows: Mutex<HashMap<Channel, RateWindow>>,
}
impl RateLimiter {
	/// Creates a limiter; channels missing from `limits` use `fallback`.
	pub fn new(limits: BTreeMap<Channel, RateLimit>, fallback: RateLimit) -> Self {
		Self { limits, fallback, windows: Default::default() }
	}

	/// Returns the limit applied to `channel`.
	pub fn limit(&self, channel: &Channel) -> RateLimit {
		self.limits.get(channel).copied().unwrap_or(self.fallback)
	}

	/// Reports whether a new request on `channel` may start now.
	///
	/// A saturated channel becomes blocked for one window as a side effect.
	pub fn can_proceed(&self, channel: &Channel) -> bool {
		self.can_proceed_at(channel, OffsetDateTime::now_utc())
	}

	/// Same as [`can_proceed`](Self::can_proceed) at `now`.
	pub fn can_proceed_at(&self, channel: &Channel, now: OffsetDateTime) -> bool {
		let limit = self.limit(channel);

		self.with_window(channel, |window| window.admits(&limit, now))
	}

	/// Records a dispatched request on `channel`.
	pub fn record(&self, channel: &Channel) {
		self.record_at(channel, OffsetDateTime::now_utc());
	}

	/// Same as [`record`](Self::record) at `now`.
	pub fn record_at(&self, channel: &Channel, now: OffsetDateTime) {
		self.with_window(channel, |window| window.timestamps.push_back(now));
	}

	/// Checks and records under one lock so concurrent callers cannot overshoot the limit.
	pub fn try_acquire(&self, channel: &Channel) -> RateLimitDecision {
		self.try_acquire_at(channel, OffsetDateTime::now_utc())
	}

	/// Same as [`try_acquire`](Self::try_acquire) at `now`.
	pub fn try_acquire_at(&self, channel: &Channel, now: OffsetDateTime) -> RateLimitDecision {
		let limit = self.limit(channel);

		self.with_window(channel, |window| {
			if window.admits(&limit, now) {
				window.timestamps.push_back(now);

				RateLimitDecision::Allow { remaining: window.remaining(&limit) }
			} else {
				RateLimitDecision::Reject(window.directive(&limit, now))
			}
		})
	}

	/// Returns the admissions still available on `channel`.
	pub fn remaining(&self, channel: &Channel) -> u32 {
		self.remaining_at(channel, OffsetDateTime::now_utc())
	}

	/// Same as [`remaining`](Self::remaining) at `now`.
	pub fn remaining_at(&self, channel: &Channel, now: OffsetDateTime) -> u32 {
		let limit = self.limit(channel);

		self.with_window(channel, |window| {
			window.prune(&limit, now);
			window.remaining(&limit)
		})
	}

	/// Returns the time until `channel` regains capacity.
	pub fn reset_in(&self, channel: &Channel) -> Duration {
		self.reset_in_at(channel, OffsetDateTime::now_utc())
	}

	/// Same as [`reset_in`](Self::reset_in) at `now`.
	pub fn reset_in_at(&self, channel: &Channel, now: OffsetDateTime) -> Duration {
		let limit = self.limit(channel);

		self.with_window(channel, |window| {
			window.prune(&limit, now);
			window.reset_in(&limit, now)
		})
	}

	fn with_window<R>(&self, channel: &Channel, f: impl FnOnce(&mut RateWindow) -> R) -> R {
		let mut windows = self.windows.lock();

		f(windows.entry(channel.clone()).or_default())
	}
}
impl Default for RateLimiter {
	fn default() -> Self {
		Self::new(default_limits(), RateLimit::per_minute(60))
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	const T0: OffsetDateTime = macros::datetime!(2025-03-01 12:00 UTC);

	fn limiter(max: u32) -> RateLimiter {
		RateLimiter::new(
			BTreeMap::from([
				(Channel::auth(), RateLimit::per_minute(max)),
				(Channel::general(), RateLimit::per_minute(max)),
			]),
			RateLimit::per_minute(max),
		)
	}

	#[test]
	fn rejects_the_request_past_the_limit_without_touching_other_channels() {
		let limiter = limiter(3);
		let auth = Channel::auth();
		let general = Channel::general();

		for offset in 0..3 {
			assert!(limiter.try_acquire_at(&auth, T0 + Duration::seconds(offset)).is_allowed());
		}

		assert!(matches!(
			limiter.try_acquire_at(&auth, T0 + Duration::seconds(4)),
			RateLimitDecision::Reject(_)
		));
		assert!(limiter.try_acquire_at(&general, T0 + Duration::seconds(4)).is_allowed());
		assert_eq!(limiter.remaining_at(&general, T0 + Duration::seconds(4)), 2);
		assert_eq!(limiter.remaining_at(&auth, T0 + Duration::seconds(4)), 0);
	}

	#[test]
	fn blocked_channel_unblocks_after_one_window() {
		let limiter = limiter(1);
		let auth = Channel::auth();

		assert!(limiter.try_acquire_at(&auth, T0).is_allowed());

		let RateLimitDecision::Reject(directive) =
			limiter.try_acquire_at(&auth, T0 + Duration::seconds(10))
		else {
			panic!("Second request inside the window must be rejected.");
		};

		assert_eq!(directive.retry_in, Duration::MINUTE);
		assert_eq!(directive.earliest_retry_at, T0 + Duration::seconds(70));
		assert!(!limiter.can_proceed_at(&auth, T0 + Duration::seconds(69)));
		assert!(limiter.can_proceed_at(&auth, T0 + Duration::seconds(70)));
	}

	#[test]
	fn old_timestamps_are_pruned_lazily() {
		let limiter = limiter(2);
		let general = Channel::general();

		limiter.record_at(&general, T0);
		limiter.record_at(&general, T0 + Duration::seconds(30));

		assert_eq!(limiter.remaining_at(&general, T0 + Duration::seconds(45)), 0);
		assert_eq!(limiter.remaining_at(&general, T0 + Duration::seconds(61)), 1);
		assert_eq!(
			limiter.reset_in_at(&general, T0 + Duration::seconds(61)),
			Duration::seconds(29)
		);
	}

	#[test]
	fn ai_channel_admits_five_quick_calls_and_reports_reset_within_a_minute() {
		let limiter = RateLimiter::default();
		let ai = Channel::ai();

		for offset in 0..5 {
			let at = T0 + Duration::milliseconds(offset * 150);

			assert!(limiter.try_acquire_at(&ai, at).is_allowed());
		}

		let reset = limiter.reset_in_at(&ai, T0 + Duration::milliseconds(800));

		assert!(reset <= Duration::MINUTE);
		assert!(reset.is_positive());
		assert_eq!(limiter.remaining_at(&ai, T0 + Duration::milliseconds(800)), 5);
	}

	#[test]
	fn unknown_channels_use_the_fallback_limit_with_their_own_window() {
		let limiter = RateLimiter::default();
		let sync = Channel::new("sync").expect("Channel fixture should be valid.");

		assert_eq!(limiter.limit(&sync), RateLimit::per_minute(60));
		assert!(limiter.try_acquire_at(&sync, T0).is_allowed());
		assert_eq!(limiter.remaining_at(&Channel::general(), T0), 60);
	}

	#[test]
	fn idle_channel_reports_full_capacity_and_no_reset() {
		let limiter = RateLimiter::default();

		assert_eq!(limiter.remaining_at(&Channel::auth(), T0), 5);
		assert_eq!(limiter.reset_in_at(&Channel::auth(), T0), Duration::ZERO);
	}
}
