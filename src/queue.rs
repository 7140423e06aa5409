//! Durable FIFO of requests deferred while the device was offline.
//!
//! Items are replayed strictly in the order they were enqueued. A pass stops at the first
//! connectivity failure (the network is confirmed down, so later items would fail too) and at
//! authentication or rate-limit rejections (nothing later can succeed either), but continues past
//! per-item terminal failures such as validation errors. Every mutation is journaled before it
//! becomes visible in memory.

pub mod journal;

pub use journal::{FileJournal, JournalRecord, MemoryJournal, QueueJournal};

// std
use std::sync::atomic::{AtomicBool, Ordering};
// crates.io
use tokio::sync::broadcast;
// self
use crate::{
	_prelude::*,
	config::QueueConfig,
	http::{ApiResponse, Method},
	id::{Channel, RequestId},
	obs::{self, Op, Outcome},
};

const EVENT_CAPACITY: usize = 64;

/// Request persisted for deferred replay.
///
/// Only caller-supplied headers are stored; credentials are attached fresh on every replay.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueuedRequest {
	/// Idempotency id; replays send it as `X-Request-Id`.
	pub id: RequestId,
	/// HTTP method.
	pub method: Method,
	/// Absolute request URL.
	pub url: Url,
	/// Caller-supplied extra headers.
	#[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
	pub headers: BTreeMap<String, String>,
	/// Request body, stored as base64.
	#[serde(default, with = "body_base64")]
	pub body: Option<Vec<u8>>,
	/// Rate-limit channel consulted on replay.
	#[serde(default)]
	pub channel: Channel,
	/// Instant the item entered the queue.
	#[serde(with = "time::serde::timestamp")]
	pub enqueued_at: OffsetDateTime,
	/// Failed replays so far.
	pub attempt_count: u32,
	/// Failed replays tolerated before the item is dropped.
	pub max_attempts: u32,
}
impl QueuedRequest {
	/// Creates an item with a fresh id, enqueued now.
	pub fn new(method: Method, url: Url) -> Self {
		Self {
			id: RequestId::generate(),
			method,
			url,
			headers: BTreeMap::new(),
			body: None,
			channel: Channel::default(),
			enqueued_at: OffsetDateTime::now_utc(),
			attempt_count: 0,
			max_attempts: QueueConfig::default().max_attempts,
		}
	}

	/// Overrides the idempotency id.
	pub fn with_id(mut self, id: RequestId) -> Self {
		self.id = id;

		self
	}

	/// Sets the request body.
	pub fn with_body(mut self, body: impl Into<Vec<u8>>) -> Self {
		self.body = Some(body.into());

		self
	}

	/// Adds a caller-supplied header.
	pub fn with_header(mut self, name: &str, value: impl Into<String>) -> Self {
		self.headers.insert(name.to_ascii_lowercase(), value.into());

		self
	}

	/// Sets the rate-limit channel used on replay.
	pub fn on_channel(mut self, channel: Channel) -> Self {
		self.channel = channel;

		self
	}

	/// Sets the per-item attempt ceiling.
	pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
		self.max_attempts = max_attempts;

		self
	}
}

/// Why an item left the queue without completing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DropReason {
	/// Evicted to make room for a newer item.
	Overflow,
	/// Replay failed `max_attempts` times.
	MaxAttempts,
}

/// Notifications for "pending sync" UI.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum QueueEvent {
	/// An item was added.
	Enqueued {
		/// Item id.
		id: RequestId,
		/// Queue size afterwards.
		size: usize,
	},
	/// An item replayed successfully and was removed.
	Completed {
		/// Item id.
		id: RequestId,
		/// Queue size afterwards.
		size: usize,
	},
	/// A replay failed and the item stays queued.
	Retrying {
		/// Item id.
		id: RequestId,
		/// Failed replays so far.
		attempt_count: u32,
	},
	/// An item was removed without completing.
	Dropped {
		/// The dropped item.
		request: QueuedRequest,
		/// Why it was dropped.
		reason: DropReason,
		/// Queue size afterwards.
		size: usize,
	},
}

/// Acknowledgement returned by [`OfflineQueue::enqueue`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct QueueReceipt {
	/// Id of the queued item.
	pub id: RequestId,
	/// Queue size after the enqueue.
	pub size: usize,
	/// Oldest item evicted to make room, if the queue was full.
	pub evicted: Option<QueuedRequest>,
}

/// Why a replay pass stopped before reaching the end of its snapshot.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum HaltReason {
	/// A replay received no response.
	Offline,
	/// The session ended.
	Unauthenticated,
	/// Admission control rejected a replay.
	RateLimited,
	/// Local credential storage was unavailable.
	Storage,
}

/// Per-pass accounting.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProcessSummary {
	/// Items replayed successfully, in order.
	pub completed: Vec<RequestId>,
	/// Items whose replay failed and that remain queued.
	pub failed: Vec<RequestId>,
	/// Items dropped after reaching their attempt ceiling.
	pub dropped: Vec<RequestId>,
	/// Set when the pass stopped early.
	pub halted: Option<HaltReason>,
	/// Items still pending after the pass.
	pub remaining: usize,
}

/// Result of [`OfflineQueue::process`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ProcessReport {
	/// Another pass was running; nothing was replayed.
	AlreadyRunning,
	/// The pass ran to completion or halted.
	Finished(ProcessSummary),
}
impl ProcessReport {
	/// Returns the summary of a finished pass.
	pub fn summary(&self) -> Option<&ProcessSummary> {
		match self {
			Self::AlreadyRunning => None,
			Self::Finished(summary) => Some(summary),
		}
	}
}

/// Boxed future returned by [`ReplayTarget::replay`].
pub type ReplayFuture<'a> = Pin<Box<dyn Future<Output = Result<ApiResponse>> + 'a + Send>>;

/// Executes one queued request; implemented by the request pipeline.
///
/// A replay is a single dispatch: implementations must not retry in-process or enqueue again.
pub trait ReplayTarget
where
	Self: Send + Sync,
{
	/// Dispatches `request` once.
	fn replay<'a>(&'a self, request: &'a QueuedRequest) -> ReplayFuture<'a>;
}

enum Verdict {
	Completed,
	Failed { halt: Option<HaltReason> },
	Halt(HaltReason),
}
impl Verdict {
	fn of(result: &Result<ApiResponse>) -> Self {
		match result {
			Ok(_) => Self::Completed,
			Err(Error::Network { .. }) => Self::Failed { halt: Some(HaltReason::Offline) },
			Err(Error::Authentication { .. }) => Self::Halt(HaltReason::Unauthenticated),
			Err(Error::RateLimited { .. }) => Self::Halt(HaltReason::RateLimited),
			Err(Error::Storage(_)) => Self::Halt(HaltReason::Storage),
			Err(
				Error::Http { .. } | Error::Encode { .. } | Error::Decode { .. } | Error::Config(_),
			) =>
				Self::Failed { halt: None },
		}
	}
}

enum FailureOutcome {
	Retained,
	Dropped,
	Gone,
}

struct ProcessingGuard<'a>(&'a AtomicBool);
impl<'a> ProcessingGuard<'a> {
	fn acquire(flag: &'a AtomicBool) -> Option<Self> {
		flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
			.ok()
			.map(|_| Self(flag))
	}
}
impl Drop for ProcessingGuard<'_> {
	fn drop(&mut self) {
		self.0.store(false, Ordering::Release);
	}
}

#[derive(Debug, Default)]
struct JournalState {
	appended: usize,
}

/// Bounded, journaled FIFO of deferred requests.
pub struct OfflineQueue {
	config: QueueConfig,
	journal: Arc<dyn QueueJournal>,
	items: Mutex<VecDeque<QueuedRequest>>,
	persist: AsyncMutex<JournalState>,
	processing: AtomicBool,
	events: broadcast::Sender<QueueEvent>,
	restored_evictions: Vec<QueuedRequest>,
}
impl OfflineQueue {
	/// Restores pending items from `journal` and compacts it.
	///
	/// A journal holding more than `config.capacity` items keeps the newest ones; the evicted
	/// oldest items are logged and kept in [`OfflineQueue::restored_evictions`].
	pub async fn open(journal: Arc<dyn QueueJournal>, config: QueueConfig) -> Result<Self> {
		let mut restored = VecDeque::from(journal.load().await?);
		let overflow = restored.len().saturating_sub(config.capacity);
		let restored_evictions = restored.drain(..overflow).collect::<Vec<_>>();

		for evicted in &restored_evictions {
			obs::pipeline_warn!(
				"Offline queue restored over capacity {}; evicted request {}.",
				config.capacity,
				evicted.id
			);
		}

		let items = Vec::from(restored.clone());

		journal.compact(&items).await?;

		let (events, _) = broadcast::channel(EVENT_CAPACITY);

		Ok(Self {
			config,
			journal,
			items: Mutex::new(restored),
			persist: AsyncMutex::new(JournalState::default()),
			processing: AtomicBool::new(false),
			events,
			restored_evictions,
		})
	}

	/// Items evicted on [`OfflineQueue::open`] because the journal exceeded the capacity, oldest
	/// first.
	pub fn restored_evictions(&self) -> &[QueuedRequest] {
		&self.restored_evictions
	}

	/// Returns the queue tuning.
	pub fn config(&self) -> &QueueConfig {
		&self.config
	}

	/// Number of pending items.
	pub fn size(&self) -> usize {
		self.items.lock().len()
	}

	/// Snapshot of pending items, oldest first.
	pub fn pending(&self) -> Vec<QueuedRequest> {
		self.items.lock().iter().cloned().collect()
	}

	/// Returns `true` while a replay pass is running.
	pub fn is_processing(&self) -> bool {
		self.processing.load(Ordering::Acquire)
	}

	/// Subscribes to queue notifications.
	pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
		self.events.subscribe()
	}

	/// Adds `request` at the tail, evicting the oldest item when the queue is full.
	///
	/// Enqueuing an id that is already pending replaces that item in place.
	pub async fn enqueue(&self, request: QueuedRequest) -> Result<QueueReceipt> {
		let mut state = self.persist.lock().await;
		let (replaces, evicted) = {
			let items = self.items.lock();
			let replaces = items.iter().any(|item| item.id == request.id);
			let evicted = if !replaces && items.len() >= self.config.capacity {
				items.front().cloned()
			} else {
				None
			};

			(replaces, evicted)
		};
		let mut records = Vec::with_capacity(2);

		if let Some(evicted) = &evicted {
			records.push(JournalRecord::Remove { id: evicted.id.clone() });
		}

		records.push(JournalRecord::Put { item: request.clone() });

		self.journal.append(&records).await?;

		let size = {
			let mut items = self.items.lock();

			if evicted.is_some() {
				items.pop_front();
			}
			if replaces {
				if let Some(existing) = items.iter_mut().find(|item| item.id == request.id) {
					*existing = request.clone();
				}
			} else {
				items.push_back(request.clone());
			}

			items.len()
		};

		self.note_appended(&mut state, records.len()).await?;
		obs::record_outcome(Op::Enqueue, Outcome::Success);

		if let Some(evicted) = &evicted {
			obs::pipeline_warn!("Offline queue full; evicted request {}.", evicted.id);

			let _ = self.events.send(QueueEvent::Dropped {
				request: evicted.clone(),
				reason: DropReason::Overflow,
				size,
			});
		}

		let _ = self.events.send(QueueEvent::Enqueued { id: request.id.clone(), size });

		Ok(QueueReceipt { id: request.id, size, evicted })
	}

	/// Replays pending items in FIFO order through `target`.
	///
	/// Returns [`ProcessReport::AlreadyRunning`] immediately when another pass is active. The
	/// pass works on a snapshot taken at its start; items enqueued meanwhile wait for the next
	/// pass, and items evicted meanwhile are skipped.
	pub async fn process<R>(&self, target: &R) -> Result<ProcessReport>
	where
		R: ?Sized + ReplayTarget,
	{
		let Some(_guard) = ProcessingGuard::acquire(&self.processing) else {
			return Ok(ProcessReport::AlreadyRunning);
		};
		let snapshot = self.pending();
		let mut summary = ProcessSummary::default();

		for item in snapshot {
			if !self.contains(&item.id) {
				continue;
			}

			let result = target.replay(&item).await;

			match Verdict::of(&result) {
				Verdict::Completed => {
					self.complete(&item.id).await?;
					summary.completed.push(item.id);
				},
				Verdict::Failed { halt } => {
					match self.record_failure(&item.id).await? {
						FailureOutcome::Retained => summary.failed.push(item.id),
						FailureOutcome::Dropped => summary.dropped.push(item.id),
						FailureOutcome::Gone => (),
					}

					if halt.is_some() {
						summary.halted = halt;

						break;
					}
				},
				Verdict::Halt(reason) => {
					summary.halted = Some(reason);

					break;
				},
			}
		}

		summary.remaining = self.size();

		Ok(ProcessReport::Finished(summary))
	}

	fn contains(&self, id: &RequestId) -> bool {
		self.items.lock().iter().any(|item| &item.id == id)
	}

	async fn complete(&self, id: &RequestId) -> Result<()> {
		let mut state = self.persist.lock().await;

		if !self.contains(id) {
			return Ok(());
		}

		self.journal.append(&[JournalRecord::Remove { id: id.clone() }]).await?;

		let size = {
			let mut items = self.items.lock();

			items.retain(|item| &item.id != id);

			items.len()
		};

		self.note_appended(&mut state, 1).await?;

		let _ = self.events.send(QueueEvent::Completed { id: id.clone(), size });

		Ok(())
	}

	async fn record_failure(&self, id: &RequestId) -> Result<FailureOutcome> {
		let mut state = self.persist.lock().await;
		let Some(mut item) = self.items.lock().iter().find(|item| &item.id == id).cloned() else {
			return Ok(FailureOutcome::Gone);
		};

		item.attempt_count = item.attempt_count.saturating_add(1).min(item.max_attempts);

		if item.attempt_count >= item.max_attempts {
			self.journal.append(&[JournalRecord::Remove { id: id.clone() }]).await?;

			let size = {
				let mut items = self.items.lock();

				items.retain(|pending| &pending.id != id);

				items.len()
			};

			self.note_appended(&mut state, 1).await?;
			obs::pipeline_warn!(
				"Dropping queued request {} after {} failed replays.",
				item.id,
				item.attempt_count
			);

			let _ = self.events.send(QueueEvent::Dropped {
				request: item,
				reason: DropReason::MaxAttempts,
				size,
			});

			return Ok(FailureOutcome::Dropped);
		}

		self.journal.append(&[JournalRecord::Put { item: item.clone() }]).await?;

		if let Some(pending) = self.items.lock().iter_mut().find(|pending| &pending.id == id) {
			pending.attempt_count = item.attempt_count;
		}

		self.note_appended(&mut state, 1).await?;

		let _ = self
			.events
			.send(QueueEvent::Retrying { id: item.id, attempt_count: item.attempt_count });

		Ok(FailureOutcome::Retained)
	}

	async fn note_appended(&self, state: &mut JournalState, count: usize) -> Result<()> {
		state.appended += count;

		if state.appended >= self.config.compact_after {
			let items = self.pending();

			self.journal.compact(&items).await?;

			state.appended = 0;
		}

		Ok(())
	}
}
impl Debug for OfflineQueue {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("OfflineQueue")
			.field("config", &self.config)
			.field("size", &self.size())
			.field("processing", &self.is_processing())
			.field("restored_evictions", &self.restored_evictions.len())
			.finish()
	}
}

mod body_base64 {
	// crates.io
	use base64::{Engine, engine::general_purpose::STANDARD};
	use serde::{Deserializer, Serializer, de::Error as _};
	// self
	use crate::_prelude::*;

	pub fn serialize<S>(body: &Option<Vec<u8>>, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		match body {
			Some(bytes) => serializer.serialize_some(&STANDARD.encode(bytes)),
			None => serializer.serialize_none(),
		}
	}

	pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
	where
		D: Deserializer<'de>,
	{
		Option::<String>::deserialize(deserializer)?
			.map(|raw| STANDARD.decode(raw).map_err(D::Error::custom))
			.transpose()
	}
}
