// std
use std::{
	env, fs, process,
	sync::atomic::{AtomicBool, Ordering},
};
// crates.io
use serde_json::json;
// self
use meal_pipeline::{
	_preludet::*,
	auth::TokenPair,
	config::{PipelineConfig, QueueConfig},
	http::{ApiResponse, Method},
	id::RequestId,
	net::{Connectivity, ConnectivityHandle},
	pipeline::{RequestPipeline, RequestSpec},
	queue::{DropReason, FileJournal, HaltReason, ProcessReport, QueueEvent, QueuedRequest},
	retry::RetryPolicy,
	store::MemoryStore,
};

/// Transport that refuses connections until switched online.
fn switchable(online: Arc<AtomicBool>) -> ScriptedTransport {
	ScriptedTransport::new(move |_| {
		if online.load(Ordering::SeqCst) {
			Ok(json_response(201, &json!({ "ok": true })))
		} else {
			Err(offline())
		}
	})
}

fn no_retry_config() -> PipelineConfig {
	test_config().retry(RetryPolicy::disabled()).build().expect("Config should build.")
}

fn meal_write(name: &str) -> RequestSpec {
	RequestSpec::post("meals").json(&json!({ "name": name })).expect("Body should serialize.")
}

fn queued(path: &str) -> QueuedRequest {
	let url = Url::parse(&format!("{TEST_BASE_URL}/{path}")).expect("URL fixture should parse.");

	QueuedRequest::new(Method::Post, url).with_body(b"{}".to_vec())
}

async fn login(pipeline: &RequestPipeline<ScriptedTransport>, access: &str) {
	let pair = TokenPair::new(access, "r1").expect("Token pair fixture should be valid.");

	pipeline.login(&pair).await.expect("Login should persist the session.");
}

fn request_ids(transport: &ScriptedTransport) -> Vec<String> {
	transport
		.requests()
		.iter()
		.filter_map(|request| request.header("x-request-id").map(ToOwned::to_owned))
		.collect()
}

#[tokio::test]
async fn reconnecting_replays_pending_writes_in_order() {
	let online = Arc::new(AtomicBool::new(false));
	let (pipeline, transport, _) =
		build_test_pipeline(no_retry_config(), switchable(online.clone())).await;

	login(&pipeline, "a1").await;

	let mut ids = Vec::new();

	for name in ["oatmeal", "salad", "curry"] {
		let err = pipeline.execute(meal_write(name)).await.expect_err("Device is offline.");

		ids.push(err.queued().expect("Write should be queued.").id.clone());
	}

	let connectivity = ConnectivityHandle::new(Connectivity::Disconnected);
	let mut events = pipeline.queue().subscribe();
	let watcher = pipeline.watch_connectivity(&connectivity);

	online.store(true, Ordering::SeqCst);
	connectivity.set(Connectivity::Connected);

	let mut completed = Vec::new();

	while completed.len() < ids.len() {
		let event = tokio::time::timeout(std::time::Duration::from_secs(2), events.recv())
			.await
			.expect("Replay should finish promptly.")
			.expect("Event channel should stay open.");

		if let QueueEvent::Completed { id, .. } = event {
			completed.push(id);
		}
	}

	let replayed = request_ids(&transport).split_off(ids.len());

	assert_eq!(completed, ids);
	assert_eq!(replayed, ids.iter().map(ToString::to_string).collect::<Vec<_>>());
	assert_eq!(pipeline.queue().size(), 0);

	watcher.abort();
}

#[tokio::test]
async fn full_queue_evicts_the_oldest_write() {
	let config = test_config()
		.retry(RetryPolicy::disabled())
		.queue(QueueConfig { capacity: 2, ..QueueConfig::default() })
		.build()
		.expect("Config should build.");
	let (pipeline, _, _) =
		build_test_pipeline(config, switchable(Arc::new(AtomicBool::new(false)))).await;
	let mut events = pipeline.queue().subscribe();
	let mut ids = Vec::new();

	for name in ["oatmeal", "salad", "curry"] {
		let err = pipeline.execute(meal_write(name)).await.expect_err("Device is offline.");

		ids.push(err.queued().expect("Write should be queued.").clone());
	}

	let evicted = ids[2].evicted.as_ref().expect("Third write should evict the first.");
	let pending = pipeline.queue().pending().into_iter().map(|item| item.id).collect::<Vec<_>>();
	let mut overflowed = None;

	while let Ok(event) = events.try_recv() {
		if let QueueEvent::Dropped { request, reason: DropReason::Overflow, size } = event {
			overflowed = Some((request.id, size));
		}
	}

	assert_eq!(evicted.id, ids[0].id);
	assert_eq!(ids[2].size, 2);
	assert_eq!(pending, [ids[1].id.clone(), ids[2].id.clone()]);
	assert_eq!(overflowed, Some((ids[0].id.clone(), 2)));
}

#[tokio::test]
async fn overlapping_passes_do_not_duplicate_replays() {
	let (pipeline, transport, _) = build_test_pipeline(
		no_retry_config(),
		ScriptedTransport::new(|_| Ok(ApiResponse::new(204, Vec::new())))
			.with_latency(Duration::milliseconds(30)),
	)
	.await;

	login(&pipeline, "a1").await;

	for path in ["meals/1", "meals/2"] {
		pipeline.queue().enqueue(queued(path)).await.expect("Enqueue should succeed.");
	}

	let (first, second) =
		tokio::join!(pipeline.process_offline_queue(), pipeline.process_offline_queue());
	let first = first.expect("First pass should run.");
	let second = second.expect("Second pass should return.");
	let summary = first.summary().expect("First pass should finish.");

	assert_eq!(second, ProcessReport::AlreadyRunning);
	assert_eq!(summary.completed.len(), 2);
	assert_eq!(summary.remaining, 0);
	assert_eq!(transport.requests().len(), 2);
	assert!(!pipeline.queue().is_processing());
}

#[tokio::test]
async fn failed_items_do_not_block_later_ones_but_connectivity_loss_halts() {
	let (pipeline, _, _) = build_test_pipeline(
		no_retry_config(),
		ScriptedTransport::new(|request| match request.url.path() {
			"/v1/meals/bad" => Ok(ApiResponse::new(422, b"invalid".to_vec())),
			"/v1/meals/offline" => Err(offline()),
			_ => Ok(ApiResponse::new(204, Vec::new())),
		}),
	)
	.await;

	login(&pipeline, "a1").await;

	for path in ["meals/bad", "meals/good", "meals/offline", "meals/later"] {
		pipeline.queue().enqueue(queued(path)).await.expect("Enqueue should succeed.");
	}

	let ids = pipeline.queue().pending().into_iter().map(|item| item.id).collect::<Vec<_>>();
	let report = pipeline.process_offline_queue().await.expect("Pass should run.");
	let summary = report.summary().expect("Pass should finish.");
	let pending = pipeline.queue().pending();

	assert_eq!(summary.completed, [ids[1].clone()]);
	assert_eq!(summary.failed, [ids[0].clone(), ids[2].clone()]);
	assert_eq!(summary.halted, Some(HaltReason::Offline));
	assert_eq!(summary.remaining, 3);
	assert_eq!(pending.iter().map(|item| item.attempt_count).collect::<Vec<_>>(), [1, 1, 0]);
}

#[tokio::test]
async fn items_are_dropped_after_their_attempt_ceiling() {
	let config = test_config()
		.retry(RetryPolicy::disabled())
		.queue(QueueConfig { max_attempts: 2, ..QueueConfig::default() })
		.build()
		.expect("Config should build.");
	let (pipeline, transport, _) = build_test_pipeline(
		config,
		ScriptedTransport::new(|_| Ok(ApiResponse::new(500, Vec::new()))),
	)
	.await;

	login(&pipeline, "a1").await;
	pipeline
		.queue()
		.enqueue(queued("meals/1").with_max_attempts(2))
		.await
		.expect("Enqueue should succeed.");

	let first = pipeline.process_offline_queue().await.expect("Pass should run.");
	let second = pipeline.process_offline_queue().await.expect("Pass should run.");

	assert_eq!(first.summary().map(|summary| summary.failed.len()), Some(1));
	assert_eq!(second.summary().map(|summary| summary.dropped.len()), Some(1));
	assert_eq!(pipeline.queue().size(), 0);
	assert_eq!(transport.requests().len(), 2);
}

#[tokio::test]
async fn replays_attach_the_current_credentials() {
	let online = Arc::new(AtomicBool::new(false));
	let (pipeline, transport, _) =
		build_test_pipeline(no_retry_config(), switchable(online.clone())).await;

	login(&pipeline, "a1").await;
	pipeline.execute(meal_write("oatmeal")).await.expect_err("Device is offline.");
	login(&pipeline, "a2").await;
	online.store(true, Ordering::SeqCst);
	pipeline.process_offline_queue().await.expect("Pass should run.");

	let requests = transport.requests();

	assert_eq!(bearer(&requests[0]), Some("a1"));
	assert_eq!(bearer(&requests[1]), Some("a2"));
	assert_eq!(requests[0].header("x-request-id"), requests[1].header("x-request-id"));
	assert_eq!(requests[0].body, requests[1].body);
}

#[tokio::test]
async fn journaled_writes_survive_a_restart() {
	let path = env::temp_dir().join(format!(
		"meal_pipeline_restart_{}_{}.log",
		process::id(),
		OffsetDateTime::now_utc().unix_timestamp_nanos(),
	));
	let storage = Arc::new(MemoryStore::default());
	let pair = TokenPair::new("a1", "r1").expect("Token pair fixture should be valid.");
	let mut ids = Vec::new();

	{
		let pipeline = RequestPipeline::open(
			no_retry_config(),
			Arc::new(switchable(Arc::new(AtomicBool::new(false)))),
			storage.clone(),
			Arc::new(FileJournal::open(&path).expect("Journal should open.")),
		)
		.await
		.expect("Pipeline should open.");

		pipeline.login(&pair).await.expect("Login should persist the session.");

		for name in ["oatmeal", "salad", "curry"] {
			let spec = meal_write(name);

			ids.push(spec.id.clone());
			pipeline.execute(spec).await.expect_err("Device is offline.");
		}
	}

	let transport = Arc::new(switchable(Arc::new(AtomicBool::new(true))));
	let pipeline = RequestPipeline::open(
		no_retry_config(),
		transport.clone(),
		storage,
		Arc::new(FileJournal::open(&path).expect("Journal should reopen.")),
	)
	.await
	.expect("Pipeline should reopen.");
	let restored = pipeline.queue().pending();

	assert_eq!(restored.iter().map(|item| item.id.clone()).collect::<Vec<_>>(), ids);
	assert_eq!(
		restored[1]
			.body
			.as_deref()
			.and_then(|body| serde_json::from_slice::<serde_json::Value>(body).ok()),
		Some(json!({ "name": "salad" }))
	);

	let report = pipeline.process_offline_queue().await.expect("Pass should run.");

	assert_eq!(report.summary().map(|summary| summary.completed.clone()), Some(ids.clone()));
	assert_eq!(request_ids(&transport), ids.iter().map(RequestId::to_string).collect::<Vec<_>>());

	fs::remove_file(&path).expect("Failed to remove journal fixture.");
}
