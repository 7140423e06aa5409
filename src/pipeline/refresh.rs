//! Single-flight credential refresh.
//!
//! [`TokenRefreshCoordinator`] owns the only handle to the in-flight refresh. The first caller
//! spawns the refresh task and publishes a shared future for it under a mutex; every caller that
//! arrives before the task finishes clones that future instead of issuing its own network call.
//! The task clears the slot itself before its result becomes visible, so a new refresh can only
//! start once the previous one has fully settled. Because the work runs on its own task, a waiter
//! that gives up never cancels the refresh the others are awaiting.
//!
//! The coordinator also counts completed refreshes (its epoch). Callers record the epoch before
//! dispatching; when their request is rejected after a sibling already refreshed, they pick up the
//! stored pair instead of rotating the refresh token a second time.

mod metrics;

pub use metrics::RefreshMetrics;

// crates.io
use futures::future::{BoxFuture, FutureExt, Shared};
use serde::{Deserializer, de::Error as _};
// self
use crate::{
	_prelude::*,
	auth::{CredentialStore, TokenPair},
	config::PipelineConfig,
	error::TransportError,
	http::{
		self, HEADER_CLIENT_VERSION, HEADER_CONTENT_TYPE, HEADER_REQUEST_ID, HttpTransport, Method,
		OutboundRequest,
	},
	id::RequestId,
	obs::{self, Op, Outcome, PipelineSpan},
};

type SharedRefresh = Shared<BoxFuture<'static, Result<TokenPair>>>;

#[derive(Default)]
struct RefreshState {
	in_flight: Option<SharedRefresh>,
	epoch: u64,
}

struct SlotGuard {
	state: Arc<Mutex<RefreshState>>,
	succeeded: bool,
}
impl Drop for SlotGuard {
	fn drop(&mut self) {
		let mut state = self.state.lock();

		state.in_flight = None;

		if self.succeeded {
			state.epoch = state.epoch.wrapping_add(1);
		}
	}
}

#[derive(Serialize)]
struct RefreshRequest<'a> {
	refresh: &'a str,
}

#[derive(Deserialize)]
#[serde(rename_all = "camelCase")]
struct RefreshResponse {
	#[serde(alias = "access_token", deserialize_with = "non_empty")]
	access: String,
	#[serde(default, alias = "refresh_token")]
	refresh: Option<String>,
	#[serde(default, alias = "expires_in")]
	expires_in: Option<i64>,
}

/// Ensures at most one refresh call is in flight per coordinator.
pub struct TokenRefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	config: Arc<PipelineConfig>,
	transport: Arc<T>,
	credentials: Arc<CredentialStore>,
	state: Arc<Mutex<RefreshState>>,
	metrics: Arc<RefreshMetrics>,
}
impl<T> TokenRefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	/// Creates an idle coordinator.
	pub fn new(
		config: Arc<PipelineConfig>,
		transport: Arc<T>,
		credentials: Arc<CredentialStore>,
	) -> Self {
		Self {
			config,
			transport,
			credentials,
			state: Default::default(),
			metrics: Default::default(),
		}
	}

	/// Returns refresh counters.
	pub fn metrics(&self) -> &RefreshMetrics {
		&self.metrics
	}

	/// Number of successful refreshes so far.
	pub fn epoch(&self) -> u64 {
		self.state.lock().epoch
	}

	/// Returns `true` while a refresh call is in flight.
	pub fn is_refreshing(&self) -> bool {
		self.state.lock().in_flight.is_some()
	}

	/// Joins the in-flight refresh, or starts one.
	pub async fn ensure_fresh_token(&self) -> Result<TokenPair> {
		let refresh = self.join_or_start(&mut self.state.lock());

		refresh.await
	}

	/// Like [`ensure_fresh_token`](Self::ensure_fresh_token), but returns the stored pair
	/// without a network call when a refresh completed after `epoch` was observed.
	pub async fn ensure_fresh_token_since(&self, epoch: u64) -> Result<TokenPair> {
		let refresh = {
			let mut state = self.state.lock();

			if state.epoch != epoch && state.in_flight.is_none() {
				None
			} else {
				Some(self.join_or_start(&mut state))
			}
		};

		match refresh {
			Some(refresh) => refresh.await,
			None => {
				self.metrics.record_reused();

				self.credentials
					.load()
					.await?
					.ok_or_else(|| Error::authentication("no session is stored"))
			},
		}
	}

	fn join_or_start(&self, state: &mut RefreshState) -> SharedRefresh {
		if let Some(in_flight) = &state.in_flight {
			self.metrics.record_joined();

			return in_flight.clone();
		}

		let guard = SlotGuard { state: self.state.clone(), succeeded: false };
		let task = tokio::spawn(run_refresh(
			guard,
			self.config.clone(),
			self.transport.clone(),
			self.credentials.clone(),
			self.metrics.clone(),
		));
		let shared = async move {
			task.await.unwrap_or_else(|e| {
				Err(Error::Network {
					source: TransportError::network(e),
					attempts: 1,
					queued: None,
				})
			})
		}
		.boxed()
		.shared();

		state.in_flight = Some(shared.clone());

		shared
	}
}
impl<T> Debug for TokenRefreshCoordinator<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRefreshCoordinator")
			.field("epoch", &self.epoch())
			.field("refreshing", &self.is_refreshing())
			.field("metrics", &self.metrics)
			.finish()
	}
}

async fn run_refresh<T>(
	mut guard: SlotGuard,
	config: Arc<PipelineConfig>,
	transport: Arc<T>,
	credentials: Arc<CredentialStore>,
	metrics: Arc<RefreshMetrics>,
) -> Result<TokenPair>
where
	T: ?Sized + HttpTransport,
{
	let span = PipelineSpan::new(Op::Refresh, "ensure_fresh_token");

	obs::record_outcome(Op::Refresh, Outcome::Attempt);
	metrics.record_attempt();

	let result = span.instrument(refresh_once(&config, transport.as_ref(), &credentials)).await;

	match &result {
		Ok(_) => metrics.record_success(),
		Err(e) => {
			metrics.record_failure();
			obs::pipeline_warn!("Credential refresh failed: {e}");
		},
	}

	obs::record_outcome(Op::Refresh, Outcome::of(&result));

	guard.succeeded = result.is_ok();

	drop(guard);

	result
}

async fn refresh_once<T>(
	config: &PipelineConfig,
	transport: &T,
	credentials: &CredentialStore,
) -> Result<TokenPair>
where
	T: ?Sized + HttpTransport,
{
	let Some(current) = credentials.load().await? else {
		credentials.clear().await?;

		return Err(Error::authentication("no refresh token is stored"));
	};
	let body = serde_json::to_vec(&RefreshRequest { refresh: current.refresh.expose() })?;
	let request = OutboundRequest {
		method: Method::Post,
		url: config.refresh_url()?,
		headers: BTreeMap::from([
			(HEADER_CONTENT_TYPE.to_owned(), "application/json".to_owned()),
			(HEADER_CLIENT_VERSION.to_owned(), config.client_version.clone()),
			(HEADER_REQUEST_ID.to_owned(), RequestId::generate().to_string()),
		]),
		body: Some(body),
		timeout: config.timeout,
	};
	let response = http::send_with_timeout(transport, request)
		.await
		.map_err(|source| Error::Network { source, attempts: 1, queued: None })?;

	match response.status {
		200..=299 => (),
		400 | 401 | 403 => {
			credentials.clear().await?;

			return Err(Error::authentication(format!(
				"refresh token was rejected with status {}",
				response.status
			)));
		},
		status => return Err(Error::Http { status, body: response.body }),
	}

	let payload: RefreshResponse = http::decode_json("refresh", &response.body)?;
	let refresh = payload.refresh.filter(|token| !token.trim().is_empty());
	let mut pair = match refresh {
		Some(refresh) => TokenPair::new(payload.access, refresh),
		None => TokenPair::new(payload.access, current.refresh.expose()),
	}
	.map_err(|e| Error::authentication(e.to_string()))?;

	if let Some(secs) = payload.expires_in {
		pair = pair.expires_in(Duration::seconds(secs), OffsetDateTime::now_utc());
	}

	credentials.save(&pair).await?;

	Ok(pair)
}

fn non_empty<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: Deserializer<'de>,
{
	let value = String::deserialize(deserializer)?;

	if value.trim().is_empty() {
		return Err(D::Error::custom("token must not be empty"));
	}

	Ok(value)
}
