//! Demonstrates deferring a meal write while the device is offline and replaying it from the
//! file journal once connectivity returns.
//!
//! The transport consults a [`ConnectivityHandle`] before delegating to [`ReqwestTransport`], the
//! way a host application would gate calls on its platform reachability callback.

// std
use std::{env, io, sync::Arc};
// crates.io
use color_eyre::{Result, eyre::eyre};
use httpmock::prelude::*;
use serde_json::json;
use time::Duration;
// self
use meal_pipeline::{
	auth::TokenPair,
	config::PipelineConfig,
	error::{Error, TransportError},
	http::{HttpTransport, OutboundRequest, ReqwestTransport, TransportFuture},
	net::{Connectivity, ConnectivityHandle},
	pipeline::{RequestPipeline, RequestSpec},
	queue::{FileJournal, QueueEvent},
	retry::RetryPolicy,
	store::MemoryStore,
};

struct GatedTransport {
	inner: ReqwestTransport,
	connectivity: ConnectivityHandle,
}
impl HttpTransport for GatedTransport {
	fn send(&self, request: OutboundRequest) -> TransportFuture<'_> {
		if !self.connectivity.current().is_connected() {
			return Box::pin(async {
				Err(TransportError::from(io::Error::new(
					io::ErrorKind::NotConnected,
					"device is offline",
				)))
			});
		}

		self.inner.send(request)
	}
}

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let meals_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/v1/meals").header("authorization", "Bearer demo-access");
			then.status(201).header("content-type", "application/json").body("{\"id\":1}");
		})
		.await;
	let connectivity = ConnectivityHandle::new(Connectivity::Disconnected);
	let transport = Arc::new(GatedTransport {
		inner: ReqwestTransport::with_timeout(Duration::seconds(5))?,
		connectivity: connectivity.clone(),
	});
	let journal_path =
		env::temp_dir().join(format!("meal_pipeline_demo_{}.log", std::process::id()));
	let config = PipelineConfig::builder(server.url("/v1"))
		.client_version("meal-pipeline-demo/1.0")
		.retry(RetryPolicy::new(Duration::milliseconds(50), Duration::milliseconds(200), 2))
		.build()?;
	let pipeline = Arc::new(
		RequestPipeline::open(
			config,
			transport,
			Arc::new(MemoryStore::default()),
			Arc::new(FileJournal::open(&journal_path)?),
		)
		.await?,
	);

	pipeline.login(&TokenPair::new("demo-access", "demo-refresh")?).await?;

	let write = RequestSpec::post("meals").json(&json!({ "name": "lentil soup", "kcal": 380 }))?;

	match pipeline.execute(write).await {
		Err(Error::Network { attempts, queued: Some(receipt), .. }) => println!(
			"Offline after {attempts} attempt(s); request {} queued ({} pending).",
			receipt.id, receipt.size
		),
		other => return Err(eyre!("Expected the write to be deferred, got {other:?}.")),
	}

	let mut events = pipeline.queue().subscribe();
	let watcher = pipeline.watch_connectivity(&connectivity);

	connectivity.set(Connectivity::Connected);

	loop {
		if let QueueEvent::Completed { id, size } = events.recv().await? {
			println!("Replayed request {id}; {size} pending.");

			break;
		}
	}

	meals_mock.assert_calls_async(1).await;
	watcher.abort();
	std::fs::remove_file(&journal_path)?;

	Ok(())
}
