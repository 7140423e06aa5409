//! Append/compact persistence for the offline queue.
//!
//! The queue never rewrites its whole list on a mutation. Each change is appended as a
//! [`JournalRecord`] keyed by item id, and the log is periodically compacted into one `Put`
//! record per pending item. Loading replays the log in order.

pub mod file;

pub use file::FileJournal;

// self
use crate::{
	_prelude::*,
	id::RequestId,
	queue::QueuedRequest,
	store::StoreFuture,
};

/// One journal entry.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum JournalRecord {
	/// Inserts an item at the tail, or updates it in place when the id is already pending.
	Put {
		/// Full item state.
		item: QueuedRequest,
	},
	/// Removes the item with `id`.
	Remove {
		/// Identifier of the removed item.
		id: RequestId,
	},
}

/// Durable backing for [`OfflineQueue`](crate::queue::OfflineQueue).
pub trait QueueJournal
where
	Self: Send + Sync,
{
	/// Replays the journal into the pending items, oldest first.
	fn load(&self) -> StoreFuture<'_, Vec<QueuedRequest>>;

	/// Appends `records` atomically with respect to other appends.
	fn append<'a>(&'a self, records: &'a [JournalRecord]) -> StoreFuture<'a, ()>;

	/// Replaces the journal contents with a snapshot of `items`.
	fn compact<'a>(&'a self, items: &'a [QueuedRequest]) -> StoreFuture<'a, ()>;
}

/// Folds journal records into the ordered list of pending items.
pub fn replay<I>(records: I) -> Vec<QueuedRequest>
where
	I: IntoIterator<Item = JournalRecord>,
{
	let mut items = VecDeque::<QueuedRequest>::new();

	for record in records {
		match record {
			JournalRecord::Put { item } =>
				match items.iter_mut().find(|existing| existing.id == item.id) {
					Some(existing) => *existing = item,
					None => items.push_back(item),
				},
			JournalRecord::Remove { id } => items.retain(|existing| existing.id != id),
		}
	}

	items.into()
}

/// In-process journal for tests and sessions that need no durability.
#[derive(Clone, Debug, Default)]
pub struct MemoryJournal(Arc<Mutex<Vec<JournalRecord>>>);
impl MemoryJournal {
	/// Returns every record currently held, in append order.
	pub fn records(&self) -> Vec<JournalRecord> {
		self.0.lock().clone()
	}
}
impl QueueJournal for MemoryJournal {
	fn load(&self) -> StoreFuture<'_, Vec<QueuedRequest>> {
		Box::pin(async move { Ok(replay(self.records())) })
	}

	fn append<'a>(&'a self, records: &'a [JournalRecord]) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.0.lock().extend_from_slice(records);

			Ok(())
		})
	}

	fn compact<'a>(&'a self, items: &'a [QueuedRequest]) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			*self.0.lock() =
				items.iter().cloned().map(|item| JournalRecord::Put { item }).collect();

			Ok(())
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::http::Method;

	fn item(id: &str) -> QueuedRequest {
		let url = Url::parse("https://api.meals.test/v1/meals").expect("URL fixture should parse.");

		QueuedRequest::new(Method::Post, url)
			.with_id(RequestId::new(id).expect("Request id fixture should be valid."))
	}

	#[test]
	fn replay_keeps_insertion_order_and_updates_in_place() {
		let original = item("a");
		let mut retried = original.clone();

		retried.attempt_count = 2;

		let items = replay([
			JournalRecord::Put { item: original },
			JournalRecord::Put { item: item("b") },
			JournalRecord::Put { item: item("c") },
			JournalRecord::Remove { id: RequestId::new("b").expect("Id should be valid.") },
			JournalRecord::Put { item: retried },
		]);
		let ids = items.iter().map(|item| item.id.to_string()).collect::<Vec<_>>();

		assert_eq!(ids, ["a", "c"]);
		assert_eq!(items[0].attempt_count, 2);
	}

	#[tokio::test]
	async fn memory_journal_compaction_keeps_only_pending_items() {
		let journal = MemoryJournal::default();

		journal
			.append(&[
				JournalRecord::Put { item: item("a") },
				JournalRecord::Remove { id: RequestId::new("a").expect("Id should be valid.") },
				JournalRecord::Put { item: item("b") },
			])
			.await
			.expect("Append should succeed.");

		let pending = journal.load().await.expect("Load should succeed.");

		journal.compact(&pending).await.expect("Compaction should succeed.");

		let records = journal.records();

		assert_eq!(records.len(), 1);
		assert!(matches!(&records[0], JournalRecord::Put { item } if item.id.as_ref() == "b"));
	}
}
