// self
use crate::obs::{Op, Outcome};

/// Records an operation outcome via the global metrics recorder (when enabled).
pub fn record_outcome(op: Op, outcome: Outcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"meal_pipeline_op_total",
			"op" => op.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (op, outcome);
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn record_outcome_is_safe_without_a_recorder() {
		record_outcome(Op::Replay, Outcome::Failure);
	}
}
