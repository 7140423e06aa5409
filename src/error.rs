//! Pipeline-level error types shared by the transport, credential, and queue layers.

// self
use crate::{_prelude::*, queue::QueueReceipt};

/// Pipeline-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

type SharedError = Arc<dyn std::error::Error + Send + Sync>;

/// Canonical pipeline error exposed by public APIs.
///
/// Every variant is cheap to clone so a single refresh outcome can be handed to all callers
/// waiting on it.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),

	/// No response was received; the request may have been deferred to the offline queue.
	#[error("No response was received after {attempts} attempt(s).")]
	Network {
		/// Underlying transport failure from the final attempt.
		#[source]
		source: TransportError,
		/// Number of dispatches that failed without a response.
		attempts: u32,
		/// Receipt for the deferred copy, when the request was queued for replay.
		queued: Option<QueueReceipt>,
	},
	/// Admission control rejected the request before dispatch.
	#[error("Channel `{channel}` is rate limited; retry in {retry_in}.")]
	RateLimited {
		/// Channel that rejected the request.
		channel: String,
		/// Time until the channel admits requests again.
		retry_in: Duration,
	},
	/// The session ended; stored credentials have been cleared.
	#[error("Authentication failed: {reason}.")]
	Authentication {
		/// Pipeline- or server-supplied reason string.
		reason: String,
	},
	/// The server answered with a non-success status.
	#[error("Server rejected the request with status {status}.")]
	Http {
		/// HTTP status code.
		status: u16,
		/// Raw response body for caller-side interpretation.
		body: Vec<u8>,
	},
	/// A request body could not be serialized.
	#[error("Request body could not be encoded as JSON.")]
	Encode {
		/// Serializer failure.
		#[source]
		source: Arc<serde_json::Error>,
	},
	/// A response body could not be decoded.
	#[error("Failed to decode the {context} response body.")]
	Decode {
		/// Short label for the payload being decoded.
		context: &'static str,
		/// Structured parsing failure including the offending JSON path.
		#[source]
		source: Arc<serde_path_to_error::Error<serde_json::Error>>,
	},
}
impl Error {
	/// Returns `true` when no response was received (connectivity class).
	pub fn is_network(&self) -> bool {
		matches!(self, Self::Network { .. })
	}

	/// Returns `true` when the session ended and the user must authenticate again.
	pub fn is_session_ended(&self) -> bool {
		matches!(self, Self::Authentication { .. })
	}

	/// Returns the offline-queue receipt attached to a network failure, if any.
	pub fn queued(&self) -> Option<&QueueReceipt> {
		match self {
			Self::Network { queued, .. } => queued.as_ref(),
			_ => None,
		}
	}

	/// Returns the HTTP status for server rejections.
	pub fn status(&self) -> Option<u16> {
		match self {
			Self::Http { status, .. } => Some(*status),
			_ => None,
		}
	}

	pub(crate) fn authentication(reason: impl Into<String>) -> Self {
		Self::Authentication { reason: reason.into() }
	}

	pub(crate) fn decode(
		context: &'static str,
		source: serde_path_to_error::Error<serde_json::Error>,
	) -> Self {
		Self::Decode { context, source: Arc::new(source) }
	}
}
impl From<serde_json::Error> for Error {
	fn from(e: serde_json::Error) -> Self {
		Self::Encode { source: Arc::new(e) }
	}
}

/// Configuration and validation failures raised while assembling the pipeline.
#[derive(Clone, Debug, ThisError)]
pub enum ConfigError {
	/// HTTP client could not be constructed.
	#[error("HTTP client could not be constructed.")]
	HttpClientBuild {
		/// Underlying transport builder failure.
		#[source]
		source: SharedError,
	},
	/// Base URL is not an absolute http(s) URL.
	#[error("Base URL `{url}` must be an absolute http(s) URL.")]
	InvalidBaseUrl {
		/// Rejected URL.
		url: String,
	},
	/// A request path cannot be joined onto the base URL.
	#[error("Request path `{path}` cannot be resolved against the base URL.")]
	InvalidPath {
		/// Rejected path.
		path: String,
		/// Underlying parsing failure.
		#[source]
		source: url::ParseError,
	},
	/// Client version header value is empty.
	#[error("Client version must not be empty.")]
	EmptyClientVersion,
	/// Request timeout is zero or negative.
	#[error("Request timeout must be positive.")]
	NonPositiveTimeout,
	/// Offline queue capacity is zero.
	#[error("Offline queue capacity must be at least 1.")]
	ZeroQueueCapacity,
	/// Offline queue item attempt ceiling is zero.
	#[error("Offline queue max attempts must be at least 1.")]
	ZeroMaxAttempts,
	/// A channel limit admits nothing or has an empty window.
	#[error(
		"Rate limit for channel `{channel}` must allow at least one request per positive window."
	)]
	InvalidRateLimit {
		/// Channel with the rejected limit.
		channel: String,
	},
	/// Identifier validation failed.
	#[error(transparent)]
	InvalidIdentifier(#[from] crate::id::IdentifierError),
}
impl ConfigError {
	/// Wraps a transport's builder failure inside [`ConfigError`].
	pub fn http_client_build(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::HttpClientBuild { source: Arc::new(src) }
	}
}
#[cfg(feature = "reqwest")]
impl From<ReqwestError> for ConfigError {
	fn from(e: ReqwestError) -> Self {
		Self::http_client_build(e)
	}
}

/// Transport-level failures where no HTTP response was received.
#[derive(Clone, Debug, ThisError)]
pub enum TransportError {
	/// The call exceeded its fixed timeout.
	#[error("Request timed out after {timeout}.")]
	Timeout {
		/// Timeout that elapsed.
		timeout: Duration,
	},
	/// Underlying HTTP client reported a network failure (DNS, TCP, TLS, IO).
	#[error("Network error occurred while contacting the server.")]
	Network {
		/// Transport-specific network error.
		#[source]
		source: SharedError,
	},
}
impl TransportError {
	/// Wraps a transport-specific network error.
	pub fn network(src: impl 'static + Send + Sync + std::error::Error) -> Self {
		Self::Network { source: Arc::new(src) }
	}

	/// Returns `true` when the failure was a timeout.
	pub fn is_timeout(&self) -> bool {
		matches!(self, Self::Timeout { .. })
	}
}
impl From<std::io::Error> for TransportError {
	fn from(e: std::io::Error) -> Self {
		Self::network(e)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::StoreError;

	#[test]
	fn store_error_converts_into_pipeline_error_with_source() {
		let store_error = StoreError::Backend { message: "keychain locked".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));
		assert!(error.to_string().contains("keychain locked"));

		let source = StdError::source(&error)
			.expect("Pipeline error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}

	#[test]
	fn network_error_exposes_transport_source() {
		let error = Error::Network {
			source: TransportError::Timeout { timeout: Duration::seconds(15) },
			attempts: 4,
			queued: None,
		};

		assert!(error.is_network());
		assert!(error.queued().is_none());
		assert!(error.to_string().contains("4 attempt(s)"));
		assert!(
			StdError::source(&error)
				.expect("Network errors should expose the transport failure.")
				.to_string()
				.contains("timed out")
		);
	}

	#[test]
	fn classification_helpers_match_variants() {
		let auth = Error::authentication("refresh token rejected");
		let http = Error::Http { status: 422, body: b"{}".to_vec() };

		assert!(auth.is_session_ended());
		assert_eq!(auth.status(), None);
		assert_eq!(http.status(), Some(422));
		assert!(!http.is_network());
	}
}
