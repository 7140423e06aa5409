//! Optional observability helpers for pipeline operations.
//!
//! # Feature Flags
//!
//! - Enable `tracing` to emit structured spans named `meal_pipeline.op` with the `op` (operation)
//!   and `stage` (call site) fields, plus warn/debug events for retries, refreshes, and queue
//!   drops.
//! - Enable `metrics` to increment the `meal_pipeline_op_total` counter for every
//!   attempt/success/failure, labeled by `op` + `outcome`.

mod metrics;
mod tracing;

pub use self::{metrics::*, tracing::*};

pub(crate) use self::tracing::{pipeline_debug, pipeline_warn};

// self
use crate::_prelude::*;

/// Pipeline operations observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Op {
	/// A live request issued through the pipeline.
	Request,
	/// A credential refresh network call.
	Refresh,
	/// A replay of a queued request.
	Replay,
	/// A request deferred to the offline queue.
	Enqueue,
}
impl Op {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Op::Request => "request",
			Op::Refresh => "refresh",
			Op::Replay => "replay",
			Op::Enqueue => "enqueue",
		}
	}
}
impl Display for Op {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each operation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Outcome {
	/// Entry to an operation.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl Outcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			Outcome::Attempt => "attempt",
			Outcome::Success => "success",
			Outcome::Failure => "failure",
		}
	}

	/// Maps a result onto [`Outcome::Success`] or [`Outcome::Failure`].
	pub fn of<T, E>(result: &std::result::Result<T, E>) -> Self {
		if result.is_ok() { Outcome::Success } else { Outcome::Failure }
	}
}
impl Display for Outcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}
