// self
use crate::{_prelude::*, obs::Op};

/// Type alias that resolves to an instrumented future when tracing is enabled.
#[cfg(feature = "tracing")]
pub type Instrumented<F> = tracing::instrument::Instrumented<F>;
/// Passthrough future type when tracing is disabled.
#[cfg(not(feature = "tracing"))]
pub type Instrumented<F> = F;

/// Span wrapping one pipeline operation.
#[derive(Clone, Debug)]
pub struct PipelineSpan {
	#[cfg(feature = "tracing")]
	span: tracing::Span,
}
impl PipelineSpan {
	/// Creates a span tagged with the operation and call site.
	pub fn new(op: Op, stage: &'static str) -> Self {
		#[cfg(feature = "tracing")]
		{
			let span = tracing::info_span!("meal_pipeline.op", op = op.as_str(), stage);

			Self { span }
		}
		#[cfg(not(feature = "tracing"))]
		{
			let _ = (op, stage);

			Self {}
		}
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> Instrumented<Fut>
	where
		Fut: Future,
	{
		#[cfg(feature = "tracing")]
		{
			use tracing::Instrument;

			fut.instrument(self.span.clone())
		}
		#[cfg(not(feature = "tracing"))]
		{
			fut
		}
	}
}

/// Emits a `WARN` event when tracing is enabled.
macro_rules! pipeline_warn {
	($($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		::tracing::warn!($($arg)+);
		#[cfg(not(feature = "tracing"))]
		let _ = format_args!($($arg)+);
	}};
}
/// Emits a `DEBUG` event when tracing is enabled.
macro_rules! pipeline_debug {
	($($arg:tt)+) => {{
		#[cfg(feature = "tracing")]
		::tracing::debug!($($arg)+);
		#[cfg(not(feature = "tracing"))]
		let _ = format_args!($($arg)+);
	}};
}
pub(crate) use {pipeline_debug, pipeline_warn};

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[tokio::test]
	async fn instrument_passes_values_through() {
		let span = PipelineSpan::new(Op::Refresh, "instrument_passes_values_through");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);

		pipeline_debug!("Span test finished with {value}.");
	}
}
