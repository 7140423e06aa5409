//! Resilient request pipeline for the meal-logging client: single-flight credential refresh,
//! capped backoff retries, durable offline replay, and per-channel admission control.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod config;
pub mod error;
pub mod http;
pub mod id;
pub mod net;
pub mod obs;
pub mod pipeline;
pub mod queue;
pub mod rate_limit;
pub mod retry;
pub mod store;
#[cfg(any(test, feature = "test"))]
pub mod _preludet {
	//! Convenience re-exports and helpers for integration tests; enabled via `cfg(test)` or the
	//! `test` crate feature.

	pub use crate::_prelude::*;

	// std
	use std::io::{Error as IoError, ErrorKind};
	// self
	use crate::{
		config::{PipelineConfig, PipelineConfigBuilder},
		error::TransportError,
		http::{ApiResponse, HttpTransport, OutboundRequest, TransportFuture},
		pipeline::RequestPipeline,
		queue::MemoryJournal,
		retry::RetryPolicy,
		store::MemoryStore,
	};

	/// Base URL used by pipeline fixtures.
	pub const TEST_BASE_URL: &str = "https://api.meals.test/v1";

	type Handler =
		dyn Fn(&OutboundRequest) -> Result<ApiResponse, TransportError> + 'static + Send + Sync;

	/// In-process [`HttpTransport`] answering through a closure and recording every request.
	pub struct ScriptedTransport {
		handler: Box<Handler>,
		latency: Duration,
		log: Mutex<Vec<OutboundRequest>>,
	}
	impl ScriptedTransport {
		/// Answers every request with `handler`.
		pub fn new<F>(handler: F) -> Self
		where
			F: 'static + Send + Sync + Fn(&OutboundRequest) -> Result<ApiResponse, TransportError>,
		{
			Self {
				handler: Box::new(handler),
				latency: Duration::ZERO,
				log: Mutex::new(Vec::new()),
			}
		}

		/// Delays every answer by `latency`.
		pub fn with_latency(mut self, latency: Duration) -> Self {
			self.latency = latency;

			self
		}

		/// Returns every request received so far.
		pub fn requests(&self) -> Vec<OutboundRequest> {
			self.log.lock().clone()
		}

		/// Counts requests whose URL path ends with `suffix`.
		pub fn count_path(&self, suffix: &str) -> usize {
			self.log.lock().iter().filter(|request| request.url.path().ends_with(suffix)).count()
		}
	}
	impl HttpTransport for ScriptedTransport {
		fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
			Box::pin(async move {
				self.log.lock().push(request.clone());

				if self.latency.is_positive() {
					tokio::time::sleep(self.latency.unsigned_abs()).await;
				}

				(self.handler)(&request)
			})
		}
	}

	/// Connectivity failure as reported by an unreachable network.
	pub fn offline() -> TransportError {
		TransportError::from(IoError::new(ErrorKind::ConnectionRefused, "network is unreachable"))
	}

	/// Builds a JSON response fixture.
	pub fn json_response(status: u16, payload: &serde_json::Value) -> ApiResponse {
		ApiResponse::json_body(status, payload).expect("JSON fixture should serialize.")
	}

	/// Returns the `Bearer` token a request carried, if any.
	pub fn bearer(request: &OutboundRequest) -> Option<&str> {
		request.header("authorization").and_then(|value| value.strip_prefix("Bearer "))
	}

	/// Config builder with millisecond backoff so retry tests stay fast.
	pub fn test_config() -> PipelineConfigBuilder {
		test_config_for(TEST_BASE_URL)
	}

	/// [`test_config`] rooted at `base_url`, e.g. a mock server.
	pub fn test_config_for(base_url: impl Into<String>) -> PipelineConfigBuilder {
		PipelineConfig::builder(base_url)
			.client_version("meal-pipeline-tests/1.0")
			.retry(RetryPolicy::new(Duration::milliseconds(10), Duration::milliseconds(80), 3))
	}

	/// Assembles a pipeline over `transport` with in-memory credentials and journal.
	pub async fn build_test_pipeline(
		config: PipelineConfig,
		transport: ScriptedTransport,
	) -> (Arc<RequestPipeline<ScriptedTransport>>, Arc<ScriptedTransport>, Arc<MemoryStore>) {
		let transport = Arc::new(transport);
		let storage = Arc::new(MemoryStore::default());
		let pipeline = RequestPipeline::open(
			config,
			transport.clone(),
			storage.clone(),
			Arc::new(MemoryJournal::default()),
		)
		.await
		.expect("Test pipeline should open.");

		(Arc::new(pipeline), transport, storage)
	}

	/// Builds a reqwest transport that accepts the self-signed certificates produced by
	/// `httpmock` during tests.
	#[cfg(feature = "reqwest")]
	pub fn test_reqwest_transport() -> crate::http::ReqwestTransport {
		let client = ReqwestClient::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");

		crate::http::ReqwestTransport::with_client(client)
	}
}

mod _prelude {
	pub use std::{
		collections::{BTreeMap, HashMap, VecDeque},
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	#[cfg(feature = "reqwest")]
	pub use reqwest::{Client as ReqwestClient, Error as ReqwestError};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use time;
pub use url;
#[cfg(test)] use {color_eyre as _, httpmock as _};
