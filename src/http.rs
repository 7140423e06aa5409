//! Transport primitives for backend calls.
//!
//! [`HttpTransport`] is the pipeline's only dependency on an HTTP stack. The pipeline builds an
//! [`OutboundRequest`] with every header already attached and expects either an
//! [`ApiResponse`] (any status) or a [`TransportError`] when no response arrived. Status
//! classification, retries, and refreshes all live above this seam, so custom transports stay
//! thin.

// crates.io
use serde::de::DeserializeOwned;
#[cfg(feature = "reqwest")] use reqwest::header::{HeaderMap, RETRY_AFTER};
use time::format_description::well_known::Rfc2822;
// self
use crate::{_prelude::*, error::TransportError};

/// Header carrying the bearer credential.
pub const HEADER_AUTHORIZATION: &str = "authorization";
/// Header carrying the client build identifier.
pub const HEADER_CLIENT_VERSION: &str = "x-client-version";
/// Header carrying the idempotency identifier.
pub const HEADER_REQUEST_ID: &str = "x-request-id";
/// Header describing the body encoding.
pub const HEADER_CONTENT_TYPE: &str = "content-type";

/// HTTP methods the backend accepts.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Method {
	/// `GET`
	Get,
	/// `POST`
	Post,
	/// `PUT`
	Put,
	/// `PATCH`
	Patch,
	/// `DELETE`
	Delete,
}
impl Method {
	/// Returns the canonical upper-case method name.
	pub const fn as_str(self) -> &'static str {
		match self {
			Method::Get => "GET",
			Method::Post => "POST",
			Method::Put => "PUT",
			Method::Patch => "PATCH",
			Method::Delete => "DELETE",
		}
	}
}
impl Display for Method {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Fully prepared request handed to a transport.
#[derive(Clone, Debug)]
pub struct OutboundRequest {
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Lower-case header names mapped to values.
	pub headers: BTreeMap<String, String>,
	/// Optional request body.
	pub body: Option<Vec<u8>>,
	/// Fixed timeout for this call.
	pub timeout: Duration,
}
impl OutboundRequest {
	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}
}

/// Response received from the backend, whatever its status.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ApiResponse {
	/// HTTP status code.
	pub status: u16,
	/// Lower-case header names mapped to values.
	pub headers: BTreeMap<String, String>,
	/// Raw body bytes.
	pub body: Vec<u8>,
}
impl ApiResponse {
	/// Creates a response with the given status and body.
	pub fn new(status: u16, body: impl Into<Vec<u8>>) -> Self {
		Self { status, headers: BTreeMap::new(), body: body.into() }
	}

	/// Creates a JSON response from a serializable payload.
	pub fn json_body<T>(status: u16, payload: &T) -> Result<Self>
	where
		T: ?Sized + Serialize,
	{
		Ok(Self::new(status, serde_json::to_vec(payload)?)
			.with_header(HEADER_CONTENT_TYPE, "application/json"))
	}

	/// Adds or replaces a header.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Returns `true` for 2xx statuses.
	pub fn is_success(&self) -> bool {
		(200..300).contains(&self.status)
	}

	/// Returns a header value by case-insensitive name.
	pub fn header(&self, name: &str) -> Option<&str> {
		self.headers.get(&name.to_ascii_lowercase()).map(String::as_str)
	}

	/// Parses the `Retry-After` header as a relative duration.
	pub fn retry_after(&self) -> Option<Duration> {
		parse_retry_after(self.header("retry-after")?)
	}

	/// Returns the body as UTF-8 text, replacing invalid sequences.
	pub fn text(&self) -> String {
		String::from_utf8_lossy(&self.body).into_owned()
	}

	/// Decodes the body as JSON, reporting the failing path on error.
	pub fn json<T>(&self) -> Result<T>
	where
		T: DeserializeOwned,
	{
		decode_json("response", &self.body)
	}
}

/// Boxed future returned by [`HttpTransport::send`].
pub type TransportFuture<'a> =
	Pin<Box<dyn Future<Output = Result<ApiResponse, TransportError>> + 'a + Send>>;

/// Abstraction over HTTP stacks capable of executing backend calls.
///
/// Implementations must be `Send + Sync + 'static` so one transport can be shared between the
/// pipeline, the refresh coordinator, and spawned connectivity watchers. A transport returns
/// `Ok` for every HTTP response, including 4xx/5xx; `Err` is reserved for calls where no
/// response was received.
pub trait HttpTransport
where
	Self: 'static + Send + Sync,
{
	/// Executes `request`.
	fn send(&self, request: OutboundRequest) -> TransportFuture<'_>;
}

/// Executes `request`, converting an elapsed timeout into [`TransportError::Timeout`].
pub(crate) async fn send_with_timeout<T>(
	transport: &T,
	request: OutboundRequest,
) -> Result<ApiResponse, TransportError>
where
	T: ?Sized + HttpTransport,
{
	let timeout = request.timeout;

	tokio::time::timeout(timeout.unsigned_abs(), transport.send(request))
		.await
		.unwrap_or(Err(TransportError::Timeout { timeout }))
}

pub(crate) fn decode_json<T>(context: &'static str, bytes: &[u8]) -> Result<T>
where
	T: DeserializeOwned,
{
	let mut deserializer = serde_json::Deserializer::from_slice(bytes);

	serde_path_to_error::deserialize(&mut deserializer).map_err(|e| Error::decode(context, e))
}

/// Thin wrapper around [`ReqwestClient`] so shared HTTP behavior lives in one place.
#[cfg(feature = "reqwest")]
#[derive(Clone, Debug, Default)]
pub struct ReqwestTransport(pub ReqwestClient);
#[cfg(feature = "reqwest")]
impl ReqwestTransport {
	/// Wraps an existing reqwest [`ReqwestClient`].
	pub fn with_client(client: ReqwestClient) -> Self {
		Self(client)
	}

	/// Builds a client whose connect phase is bounded by `timeout`.
	pub fn with_timeout(timeout: Duration) -> Result<Self, crate::error::ConfigError> {
		let client = ReqwestClient::builder()
			.connect_timeout(timeout.unsigned_abs())
			.timeout(timeout.unsigned_abs())
			.build()?;

		Ok(Self(client))
	}
}
#[cfg(feature = "reqwest")]
impl AsRef<ReqwestClient> for ReqwestTransport {
	fn as_ref(&self) -> &ReqwestClient {
		&self.0
	}
}
#[cfg(feature = "reqwest")]
impl HttpTransport for ReqwestTransport {
	fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
		let client = self.0.clone();

		Box::pin(async move {
			let timeout = request.timeout;
			let method = match request.method {
				Method::Get => reqwest::Method::GET,
				Method::Post => reqwest::Method::POST,
				Method::Put => reqwest::Method::PUT,
				Method::Patch => reqwest::Method::PATCH,
				Method::Delete => reqwest::Method::DELETE,
			};
			let mut builder = client.request(method, request.url).timeout(timeout.unsigned_abs());

			for (name, value) in &request.headers {
				builder = builder.header(name.as_str(), value.as_str());
			}
			if let Some(body) = request.body {
				builder = builder.body(body);
			}

			let response = builder.send().await.map_err(|e| map_reqwest_error(e, timeout))?;
			let status = response.status().as_u16();
			let headers = collect_headers(response.headers());
			let body =
				response.bytes().await.map_err(|e| map_reqwest_error(e, timeout))?.to_vec();

			Ok(ApiResponse { status, headers, body })
		})
	}
}

#[cfg(feature = "reqwest")]
fn map_reqwest_error(err: ReqwestError, timeout: Duration) -> TransportError {
	if err.is_timeout() {
		TransportError::Timeout { timeout }
	} else {
		TransportError::network(err)
	}
}

#[cfg(feature = "reqwest")]
fn collect_headers(headers: &HeaderMap) -> BTreeMap<String, String> {
	let mut collected = BTreeMap::new();

	for (name, value) in headers {
		if let Ok(value) = value.to_str() {
			collected.insert(name.as_str().to_owned(), value.to_owned());
		}
	}
	if let Some(value) = headers.get(RETRY_AFTER).and_then(|v| v.to_str().ok()) {
		collected.insert(RETRY_AFTER.as_str().to_owned(), value.trim().to_owned());
	}

	collected
}

fn parse_retry_after(raw: &str) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u32>() {
		return Some(Duration::seconds(i64::from(secs)));
	}
	if let Ok(moment) = OffsetDateTime::parse(raw, &Rfc2822) {
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}
