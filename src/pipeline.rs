//! The resilient request pipeline.
//!
//! [`RequestPipeline`] is the facade callers use for every backend call. Each call goes through
//! admission control, gets the current credentials and request metadata attached, and is
//! dispatched with a fixed timeout. The outcome is then classified:
//!
//! - no response: retried with capped exponential backoff, then optionally handed to the
//!   offline queue;
//! - `401` from a non-auth API endpoint: one single-flight refresh and one redispatch;
//!   URLs outside the base URL never carry the bearer and never trigger a refresh;
//! - any other non-success status: a terminal [`Error::Http`];
//! - `2xx`: returned as is.

pub mod refresh;
pub mod request;

pub use refresh::{RefreshMetrics, TokenRefreshCoordinator};
pub use request::{OfflinePolicy, RequestSpec};

// crates.io
use tokio::task::JoinHandle;
// self
use crate::{
	_prelude::*,
	auth::{CredentialStore, TokenPair},
	config::PipelineConfig,
	http::{self, ApiResponse, HttpTransport},
	id::Channel,
	net::ConnectivityMonitor,
	obs::{self, Op, Outcome, PipelineSpan},
	queue::{
		OfflineQueue, ProcessReport, QueueJournal, QueueReceipt, QueuedRequest, ReplayFuture,
		ReplayTarget,
	},
	rate_limit::{RateLimitDecision, RateLimiter},
	retry::FailureKind,
	store::SecureStorage,
};
use request::PreparedRequest;

/// Outcome of [`RequestPipeline::submit`].
#[derive(Clone, Debug)]
pub enum Dispatch {
	/// The backend answered with a success status.
	Completed(ApiResponse),
	/// The request could not reach the backend and was deferred for replay.
	Queued(QueueReceipt),
}
impl Dispatch {
	/// Returns the response of a completed dispatch.
	pub fn response(&self) -> Option<&ApiResponse> {
		match self {
			Self::Completed(response) => Some(response),
			Self::Queued(_) => None,
		}
	}

	/// Returns the receipt of a deferred dispatch.
	pub fn receipt(&self) -> Option<&QueueReceipt> {
		match self {
			Self::Completed(_) => None,
			Self::Queued(receipt) => Some(receipt),
		}
	}
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Delivery {
	Live,
	Replay,
}

/// Credential-aware transport wrapper with retries, refresh, rate limiting, and offline replay.
pub struct RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	config: Arc<PipelineConfig>,
	transport: Arc<T>,
	credentials: Arc<CredentialStore>,
	limiter: RateLimiter,
	queue: OfflineQueue,
	refresher: TokenRefreshCoordinator<T>,
}
impl<T> RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	/// Assembles a pipeline, restoring any requests left in `journal`.
	pub async fn open(
		config: PipelineConfig,
		transport: Arc<T>,
		storage: Arc<dyn SecureStorage>,
		journal: Arc<dyn QueueJournal>,
	) -> Result<Self> {
		let config = Arc::new(config);
		let credentials = Arc::new(CredentialStore::new(storage));
		let limiter = RateLimiter::new(config.rate_limits.clone(), config.fallback_rate_limit);
		let queue = OfflineQueue::open(journal, config.queue).await?;
		let refresher =
			TokenRefreshCoordinator::new(config.clone(), transport.clone(), credentials.clone());

		Ok(Self { config, transport, credentials, limiter, queue, refresher })
	}

	/// Returns the active configuration.
	pub fn config(&self) -> &PipelineConfig {
		&self.config
	}

	/// Returns the credential store.
	pub fn credentials(&self) -> &CredentialStore {
		&self.credentials
	}

	/// Returns the rate limiter.
	pub fn limiter(&self) -> &RateLimiter {
		&self.limiter
	}

	/// Returns the offline queue.
	pub fn queue(&self) -> &OfflineQueue {
		&self.queue
	}

	/// Returns the refresh coordinator.
	pub fn refresher(&self) -> &TokenRefreshCoordinator<T> {
		&self.refresher
	}

	/// Stores the pair issued by a login.
	pub async fn login(&self, pair: &TokenPair) -> Result<()> {
		Ok(self.credentials.save(pair).await?)
	}

	/// Ends the session locally.
	pub async fn logout(&self) -> Result<()> {
		Ok(self.credentials.clear().await?)
	}

	/// Admissions still available on `channel`.
	pub fn remaining(&self, channel: &Channel) -> u32 {
		self.limiter.remaining(channel)
	}

	/// Time until `channel` regains capacity.
	pub fn reset_in(&self, channel: &Channel) -> Duration {
		self.limiter.reset_in(channel)
	}

	/// Executes `spec` and returns the successful response.
	///
	/// When no response arrives after all retries and the request's [`OfflinePolicy`] allows it,
	/// a copy is queued for replay and the returned [`Error::Network`] carries its receipt.
	pub async fn execute(&self, spec: RequestSpec) -> Result<ApiResponse> {
		let span = PipelineSpan::new(Op::Request, "execute");

		obs::record_outcome(Op::Request, Outcome::Attempt);

		let result = span.instrument(self.run(spec)).await;

		obs::record_outcome(Op::Request, Outcome::of(&result));

		result
	}

	/// Like [`execute`](Self::execute), but requests with [`OfflinePolicy::Defer`] resolve to
	/// [`Dispatch::Queued`] instead of an error once deferred.
	pub async fn submit(&self, spec: RequestSpec) -> Result<Dispatch> {
		let defer = spec.offline == OfflinePolicy::Defer;

		match self.execute(spec).await {
			Ok(response) => Ok(Dispatch::Completed(response)),
			Err(Error::Network { queued: Some(receipt), .. }) if defer =>
				Ok(Dispatch::Queued(receipt)),
			Err(e) => Err(e),
		}
	}

	/// Replays the offline queue once.
	pub async fn process_offline_queue(&self) -> Result<ProcessReport> {
		self.queue.process(self).await
	}

	/// Replays the offline queue every time `monitor` reports a transition to connected,
	/// including when it is already connected at subscription time.
	///
	/// The task holds a weak reference and ends once the pipeline is dropped or the monitor
	/// closes its channel.
	pub fn watch_connectivity<M>(self: &Arc<Self>, monitor: &M) -> JoinHandle<()>
	where
		M: ?Sized + ConnectivityMonitor,
	{
		let mut states = monitor.subscribe();
		let pipeline = Arc::downgrade(self);

		tokio::spawn(async move {
			let mut was_connected = false;

			loop {
				let connected = states.borrow_and_update().is_connected();

				if connected && !was_connected {
					let Some(pipeline) = pipeline.upgrade() else {
						break;
					};

					if let Err(e) = pipeline.process_offline_queue().await {
						obs::pipeline_warn!("Offline queue replay failed: {e}");
					}
				}

				was_connected = connected;

				if states.changed().await.is_err() {
					break;
				}
			}
		})
	}

	async fn run(&self, spec: RequestSpec) -> Result<ApiResponse> {
		let policy = spec.offline;
		let prepared = spec.prepare(&self.config)?;
		let result = self.deliver(&prepared, Delivery::Live).await;

		match result {
			Err(Error::Network { source, attempts, .. }) if policy != OfflinePolicy::Never => {
				let queued = self.defer(prepared).await;

				Err(Error::Network { source, attempts, queued })
			},
			result => result,
		}
	}

	async fn defer(&self, prepared: PreparedRequest) -> Option<QueueReceipt> {
		let span = PipelineSpan::new(Op::Enqueue, "defer");
		let item = prepared.into_queued(self.config.queue.max_attempts);

		obs::record_outcome(Op::Enqueue, Outcome::Attempt);

		match span.instrument(self.queue.enqueue(item)).await {
			Ok(receipt) => Some(receipt),
			Err(e) => {
				obs::record_outcome(Op::Enqueue, Outcome::Failure);
				obs::pipeline_warn!("Failed to defer request to the offline queue: {e}");

				None
			},
		}
	}

	async fn deliver(&self, request: &PreparedRequest, mode: Delivery) -> Result<ApiResponse> {
		if let RateLimitDecision::Reject(directive) = self.limiter.try_acquire(&request.channel) {
			return Err(Error::RateLimited {
				channel: request.channel.to_string(),
				retry_in: directive.retry_in,
			});
		}

		// Refresh only applies to credentialed API calls outside the auth endpoints.
		let refreshable =
			self.config.is_api_url(&request.url) && !self.config.is_auth_url(&request.url);
		// Observed before the credentials so a refresh finishing in between is never repeated.
		let epoch = self.refresher.epoch();
		let mut pair = self.credentials.load().await?;
		let mut refreshed = false;
		let mut failures = 0_u32;

		if refreshable && self.expires_soon(pair.as_ref()) {
			match self.refresher.ensure_fresh_token_since(epoch).await {
				Ok(fresh) => {
					pair = Some(fresh);
					refreshed = true;
				},
				Err(e @ Error::Authentication { .. }) => return Err(e),
				Err(e) => {
					obs::pipeline_debug!("Proactive refresh failed; using current token: {e}")
				},
			}
		}

		loop {
			let outbound = request.outbound(&self.config, pair.as_ref().map(|pair| &pair.access));

			match http::send_with_timeout(self.transport.as_ref(), outbound).await {
				Err(source) => {
					failures += 1;

					let retry = &self.config.retry;

					if mode == Delivery::Live
						&& retry.should_retry(failures, FailureKind::from(&source))
					{
						let delay = retry.delay_for(failures);

						obs::pipeline_debug!(
							"Request {} got no response ({source}); retrying in {delay}.",
							request.id
						);
						tokio::time::sleep(delay.unsigned_abs()).await;

						continue;
					}

					return Err(Error::Network { source, attempts: failures, queued: None });
				},
				Ok(response) if response.is_success() => return Ok(response),
				Ok(response) if response.status == 401 && refreshable => {
					if refreshed {
						self.credentials.clear().await?;

						return Err(Error::authentication(
							"request was rejected again after a credential refresh",
						));
					}

					refreshed = true;
					pair = Some(self.refresher.ensure_fresh_token_since(epoch).await?);
				},
				Ok(response) =>
					return Err(Error::Http { status: response.status, body: response.body }),
			}
		}
	}

	fn expires_soon(&self, pair: Option<&TokenPair>) -> bool {
		let window = self.config.preemptive_window;

		window.is_positive()
			&& pair.is_some_and(|pair| pair.expires_within(window, OffsetDateTime::now_utc()))
	}
}
impl<T> ReplayTarget for RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	fn replay<'a>(&'a self, request: &'a QueuedRequest) -> ReplayFuture<'a> {
		Box::pin(async move {
			let span = PipelineSpan::new(Op::Replay, "replay");
			let prepared = PreparedRequest::from(request);

			obs::record_outcome(Op::Replay, Outcome::Attempt);

			let result = span.instrument(self.deliver(&prepared, Delivery::Replay)).await;

			obs::record_outcome(Op::Replay, Outcome::of(&result));

			result
		})
	}
}
impl<T> Debug for RequestPipeline<T>
where
	T: ?Sized + HttpTransport,
{
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RequestPipeline")
			.field("base_url", &self.config.base_url.as_str())
			.field("queue", &self.queue)
			.field("refresher", &self.refresher)
			.finish()
	}
}
