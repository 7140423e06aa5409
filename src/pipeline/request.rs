//! Caller-facing request descriptions.

// self
use crate::{
	_prelude::*,
	auth::TokenSecret,
	config::PipelineConfig,
	error::ConfigError,
	http::{
		HEADER_AUTHORIZATION, HEADER_CLIENT_VERSION, HEADER_CONTENT_TYPE, HEADER_REQUEST_ID,
		Method, OutboundRequest,
	},
	id::{Channel, RequestId},
	queue::QueuedRequest,
};

/// What happens to a request whose retries are exhausted without any response.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OfflinePolicy {
	/// Fail with a network error; nothing is queued.
	Never,
	/// Queue for replay and fail with a network error carrying the receipt.
	Queue,
	/// Queue for replay and acknowledge with [`Dispatch::Queued`](crate::pipeline::Dispatch).
	Defer,
}
impl OfflinePolicy {
	/// Default for `method`: reads are never queued, writes are.
	pub const fn default_for(method: Method) -> Self {
		match method {
			Method::Get => Self::Never,
			_ => Self::Queue,
		}
	}
}

/// A backend call described relative to the configured base URL.
#[derive(Clone, Debug)]
pub struct RequestSpec {
	/// Idempotency id reused by retries and replays.
	pub id: RequestId,
	/// HTTP method.
	pub method: Method,
	/// Path relative to the base URL, or an absolute URL.
	pub path: String,
	/// Extra headers; pipeline-managed headers take precedence.
	pub headers: BTreeMap<String, String>,
	/// Request body.
	pub body: Option<Vec<u8>>,
	/// Rate-limit channel.
	pub channel: Channel,
	/// Behavior once retries are exhausted.
	pub offline: OfflinePolicy,
}
impl RequestSpec {
	/// Creates a request with a fresh id on the `general` channel.
	pub fn new(method: Method, path: impl Into<String>) -> Self {
		Self {
			id: RequestId::generate(),
			method,
			path: path.into(),
			headers: BTreeMap::new(),
			body: None,
			channel: Channel::default(),
			offline: OfflinePolicy::default_for(method),
		}
	}

	/// `GET path`.
	pub fn get(path: impl Into<String>) -> Self {
		Self::new(Method::Get, path)
	}

	/// `POST path`.
	pub fn post(path: impl Into<String>) -> Self {
		Self::new(Method::Post, path)
	}

	/// `PUT path`.
	pub fn put(path: impl Into<String>) -> Self {
		Self::new(Method::Put, path)
	}

	/// `PATCH path`.
	pub fn patch(path: impl Into<String>) -> Self {
		Self::new(Method::Patch, path)
	}

	/// `DELETE path`.
	pub fn delete(path: impl Into<String>) -> Self {
		Self::new(Method::Delete, path)
	}

	/// Serializes `body` as the JSON payload.
	pub fn json<B>(self, body: &B) -> Result<Self>
	where
		B: ?Sized + Serialize,
	{
		let bytes = serde_json::to_vec(body)?;

		Ok(self.with_body(bytes).with_header(HEADER_CONTENT_TYPE, "application/json"))
	}

	/// Sets a raw body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Adds an extra header.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Routes the request through `channel`.
	pub fn on_channel(mut self, channel: Channel) -> Self {
		self.channel = channel;

		self
	}

	/// Overrides the offline policy.
	pub fn with_offline_policy(mut self, policy: OfflinePolicy) -> Self {
		self.offline = policy;

		self
	}

	/// Overrides the idempotency id.
	pub fn with_id(mut self, id: RequestId) -> Self {
		self.id = id;

		self
	}

	pub(crate) fn prepare(self, config: &PipelineConfig) -> Result<PreparedRequest, ConfigError> {
		let url = config.endpoint(&self.path)?;

		Ok(PreparedRequest {
			id: self.id,
			method: self.method,
			url,
			headers: self.headers,
			body: self.body,
			channel: self.channel,
		})
	}
}

/// Request resolved to an absolute URL; shared by live calls and replays.
#[derive(Clone, Debug)]
pub(crate) struct PreparedRequest {
	pub(crate) id: RequestId,
	pub(crate) method: Method,
	pub(crate) url: Url,
	pub(crate) headers: BTreeMap<String, String>,
	pub(crate) body: Option<Vec<u8>>,
	pub(crate) channel: Channel,
}
impl PreparedRequest {
	pub(crate) fn outbound(
		&self,
		config: &PipelineConfig,
		access: Option<&TokenSecret>,
	) -> OutboundRequest {
		let mut headers = self.headers.clone();

		headers.insert(HEADER_CLIENT_VERSION.into(), config.client_version.clone());
		headers.insert(HEADER_REQUEST_ID.into(), self.id.to_string());

		// The session bearer never leaves the backend API.
		if let Some(access) = access.filter(|_| config.is_api_url(&self.url)) {
			headers.insert(HEADER_AUTHORIZATION.into(), access.bearer());
		}

		OutboundRequest {
			method: self.method,
			url: self.url.clone(),
			headers,
			body: self.body.clone(),
			timeout: config.timeout,
		}
	}

	pub(crate) fn into_queued(self, max_attempts: u32) -> QueuedRequest {
		QueuedRequest {
			id: self.id,
			method: self.method,
			url: self.url,
			headers: self.headers,
			body: self.body,
			channel: self.channel,
			enqueued_at: OffsetDateTime::now_utc(),
			attempt_count: 0,
			max_attempts,
		}
	}
}
impl From<&QueuedRequest> for PreparedRequest {
	fn from(item: &QueuedRequest) -> Self {
		Self {
			id: item.id.clone(),
			method: item.method,
			url: item.url.clone(),
			headers: item.headers.clone(),
			body: item.body.clone(),
			channel: item.channel.clone(),
		}
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn reads_are_never_queued_by_default() {
		assert_eq!(RequestSpec::get("meals").offline, OfflinePolicy::Never);
		assert_eq!(RequestSpec::post("meals").offline, OfflinePolicy::Queue);
		assert_eq!(RequestSpec::delete("meals/1").offline, OfflinePolicy::Queue);
	}

	#[test]
	fn pipeline_headers_override_caller_headers() {
		let config = PipelineConfig::builder("https://api.meals.test/v1")
			.client_version("ios/3.2.0")
			.build()
			.expect("Config fixture should be valid.");
		let prepared = RequestSpec::post("/meals")
			.json(&serde_json::json!({ "kcal": 420 }))
			.expect("Body should serialize.")
			.with_header("X-Client-Version", "spoofed")
			.prepare(&config)
			.expect("Request should resolve.");
		let outbound = prepared.outbound(&config, Some(&TokenSecret::new("a1")));

		assert_eq!(outbound.url.as_str(), "https://api.meals.test/v1/meals");
		assert_eq!(outbound.header("authorization"), Some("Bearer a1"));
		assert_eq!(outbound.header("x-client-version"), Some("ios/3.2.0"));
		assert_eq!(outbound.header("x-request-id"), Some(prepared.id.as_ref()));
		assert_eq!(outbound.header("content-type"), Some("application/json"));
		assert_eq!(outbound.timeout, Duration::seconds(15));
	}

	#[test]
	fn queued_copies_keep_the_request_id_but_not_credentials() {
		let config = PipelineConfig::builder("https://api.meals.test/v1")
			.build()
			.expect("Config fixture should be valid.");
		let prepared = RequestSpec::put("meals/7")
			.with_body(b"{}".to_vec())
			.prepare(&config)
			.expect("Request should resolve.");
		let id = prepared.id.clone();
		let queued = prepared.into_queued(5);

		assert_eq!(queued.id, id);
		assert_eq!(queued.max_attempts, 5);
		assert!(queued.headers.get("authorization").is_none());
		assert_eq!(PreparedRequest::from(&queued).id, id);
	}

	#[test]
	fn foreign_hosts_never_receive_the_bearer() {
		let config = PipelineConfig::builder("https://api.meals.test/v1")
			.build()
			.expect("Config fixture should be valid.");
		let prepared = RequestSpec::get("https://tracker.example.com/collect")
			.prepare(&config)
			.expect("Request should resolve.");
		let outbound = prepared.outbound(&config, Some(&TokenSecret::new("a1")));

		assert_eq!(outbound.url.host_str(), Some("tracker.example.com"));
		assert!(outbound.header("authorization").is_none());
		assert!(outbound.header("x-request-id").is_some());
	}
}
