//! Pipeline configuration and its validating builder.

// self
use crate::{
	_prelude::*,
	error::ConfigError,
	id::Channel,
	rate_limit::{self, RateLimit},
	retry::RetryPolicy,
};

/// Client version sent when the host application does not supply one.
pub const DEFAULT_CLIENT_VERSION: &str = concat!("meal-pipeline/", env!("CARGO_PKG_VERSION"));

/// Offline queue tuning.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueConfig {
	/// Maximum pending items; the oldest is evicted when a new one arrives at capacity.
	pub capacity: usize,
	/// Failed replays tolerated per item before it is dropped.
	pub max_attempts: u32,
	/// Journal records appended before the journal is compacted into a snapshot.
	pub compact_after: usize,
}
impl Default for QueueConfig {
	fn default() -> Self {
		Self { capacity: 50, max_attempts: 5, compact_after: 64 }
	}
}

/// Validated settings shared by every pipeline component.
#[derive(Clone, Debug)]
pub struct PipelineConfig {
	/// Versioned API root; always ends with `/`.
	pub base_url: Url,
	/// Value of the `X-Client-Version` header.
	pub client_version: String,
	/// Fixed timeout applied to every dispatch.
	pub timeout: Duration,
	/// Backoff for connectivity failures.
	pub retry: RetryPolicy,
	/// Per-channel admission limits.
	pub rate_limits: BTreeMap<Channel, RateLimit>,
	/// Limit applied to channels missing from `rate_limits`.
	pub fallback_rate_limit: RateLimit,
	/// Path prefix (relative to `base_url`) of endpoints that never trigger a refresh.
	pub auth_path_prefix: String,
	/// Path (relative to `base_url`) of the refresh endpoint.
	pub refresh_path: String,
	/// Access tokens expiring within this window are refreshed before dispatch.
	pub preemptive_window: Duration,
	/// Offline queue tuning.
	pub queue: QueueConfig,
}
impl PipelineConfig {
	/// Starts a builder for the API rooted at `base_url`.
	pub fn builder(base_url: impl Into<String>) -> PipelineConfigBuilder {
		PipelineConfigBuilder::new(base_url)
	}

	/// Resolves `path` against the base URL.
	///
	/// Absolute `http(s)` URLs pass through untouched but only receive credentials when they lie
	/// below the base URL (see [`is_api_url`](Self::is_api_url)); relative paths are joined below
	/// the base even when they start with `/`.
	pub fn endpoint(&self, path: &str) -> Result<Url, ConfigError> {
		if let Some(url) =
			Url::parse(path).ok().filter(|url| matches!(url.scheme(), "http" | "https"))
		{
			return Ok(url);
		}

		self.base_url
			.join(path.trim_start_matches('/'))
			.map_err(|source| ConfigError::InvalidPath { path: path.to_owned(), source })
	}

	/// Returns the absolute refresh endpoint.
	pub fn refresh_url(&self) -> Result<Url, ConfigError> {
		self.endpoint(&self.refresh_path)
	}

	/// Returns `true` when `url` lies below the base URL, i.e. may carry the session's bearer.
	pub fn is_api_url(&self, url: &Url) -> bool {
		url.as_str().starts_with(self.base_url.as_str())
	}

	/// Returns `true` when `url` targets an authentication endpoint.
	pub fn is_auth_url(&self, url: &Url) -> bool {
		self.endpoint(&self.auth_path_prefix)
			.is_ok_and(|prefix| url.as_str().starts_with(prefix.as_str()))
	}
}

/// Builder for [`PipelineConfig`] values.
#[derive(Clone, Debug)]
pub struct PipelineConfigBuilder {
	base_url: String,
	client_version: String,
	timeout: Duration,
	retry: RetryPolicy,
	rate_limits: BTreeMap<Channel, RateLimit>,
	fallback_rate_limit: RateLimit,
	auth_path_prefix: String,
	refresh_path: String,
	preemptive_window: Duration,
	queue: QueueConfig,
}
impl PipelineConfigBuilder {
	/// Creates a builder seeded with the defaults.
	pub fn new(base_url: impl Into<String>) -> Self {
		Self {
			base_url: base_url.into(),
			client_version: DEFAULT_CLIENT_VERSION.into(),
			timeout: Duration::seconds(15),
			retry: RetryPolicy::default(),
			rate_limits: rate_limit::default_limits(),
			fallback_rate_limit: RateLimit::per_minute(60),
			auth_path_prefix: "auth/".into(),
			refresh_path: "auth/refresh".into(),
			preemptive_window: Duration::seconds(30),
			queue: QueueConfig::default(),
		}
	}

	/// Sets the `X-Client-Version` header value.
	pub fn client_version(mut self, version: impl Into<String>) -> Self {
		self.client_version = version.into();

		self
	}

	/// Sets the per-dispatch timeout.
	pub fn timeout(mut self, timeout: Duration) -> Self {
		self.timeout = timeout;

		self
	}

	/// Overrides the retry policy.
	pub fn retry(mut self, policy: RetryPolicy) -> Self {
		self.retry = policy;

		self
	}

	/// Sets the limit for one channel.
	pub fn rate_limit(mut self, channel: Channel, limit: RateLimit) -> Self {
		self.rate_limits.insert(channel, limit);

		self
	}

	/// Sets the limit used by unlisted channels.
	pub fn fallback_rate_limit(mut self, limit: RateLimit) -> Self {
		self.fallback_rate_limit = limit;

		self
	}

	/// Overrides the path prefix of authentication endpoints.
	pub fn auth_path_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.auth_path_prefix = prefix.into();

		self
	}

	/// Overrides the refresh endpoint path.
	pub fn refresh_path(mut self, path: impl Into<String>) -> Self {
		self.refresh_path = path.into();

		self
	}

	/// Sets the proactive refresh window; zero disables proactive refreshes.
	pub fn preemptive_window(mut self, window: Duration) -> Self {
		self.preemptive_window = window;

		self
	}

	/// Overrides the offline queue tuning.
	pub fn queue(mut self, queue: QueueConfig) -> Self {
		self.queue = queue;

		self
	}

	/// Consumes the builder and validates the resulting configuration.
	pub fn build(self) -> Result<PipelineConfig, ConfigError> {
		let base_url = normalize_base_url(&self.base_url)?;

		if self.client_version.trim().is_empty() {
			return Err(ConfigError::EmptyClientVersion);
		}
		if !self.timeout.is_positive() {
			return Err(ConfigError::NonPositiveTimeout);
		}
		if self.queue.capacity == 0 {
			return Err(ConfigError::ZeroQueueCapacity);
		}
		if self.queue.max_attempts == 0 {
			return Err(ConfigError::ZeroMaxAttempts);
		}
		if let Some((channel, _)) = self.rate_limits.iter().find(|(_, limit)| !limit.is_valid()) {
			return Err(ConfigError::InvalidRateLimit { channel: channel.to_string() });
		}
		if !self.fallback_rate_limit.is_valid() {
			return Err(ConfigError::InvalidRateLimit { channel: "*".into() });
		}

		let config = PipelineConfig {
			base_url,
			client_version: self.client_version,
			timeout: self.timeout,
			retry: self.retry,
			rate_limits: self.rate_limits,
			fallback_rate_limit: self.fallback_rate_limit,
			auth_path_prefix: self.auth_path_prefix,
			refresh_path: self.refresh_path,
			preemptive_window: self.preemptive_window.max(Duration::ZERO),
			queue: self.queue,
		};

		config.refresh_url()?;

		Ok(config)
	}
}

fn normalize_base_url(raw: &str) -> Result<Url, ConfigError> {
	let invalid = || ConfigError::InvalidBaseUrl { url: raw.to_owned() };
	let mut url = Url::parse(raw).map_err(|_| invalid())?;

	if !matches!(url.scheme(), "http" | "https") || url.cannot_be_a_base() {
		return Err(invalid());
	}
	if !url.path().ends_with('/') {
		let path = format!("{}/", url.path());

		url.set_path(&path);
	}

	url.set_query(None);
	url.set_fragment(None);

	Ok(url)
}
