//! Line-oriented journal file with per-line checksums.
//!
//! Each line is `<checksum> <json>`, where the checksum is the first eight bytes of the SHA-256
//! digest of the JSON text, hex encoded. A line that fails the checksum or does not parse (for
//! example a tail torn by a crash mid-append) is skipped on load instead of poisoning the queue.

// std
use std::{
	fmt::Write as _,
	fs::{self, OpenOptions},
	io::{Read, Seek, SeekFrom, Write},
	path::{Path, PathBuf},
};
// crates.io
use sha2::{Digest, Sha256};
// self
use crate::{
	_prelude::*,
	obs,
	queue::{
		QueuedRequest,
		journal::{self, JournalRecord, QueueJournal},
	},
	store::{
		StoreError, StoreFuture,
		file::{ensure_parent_exists, write_atomically},
	},
};

const CHECKSUM_BYTES: usize = 8;

/// [`QueueJournal`] persisted to a local file.
#[derive(Debug)]
pub struct FileJournal {
	path: PathBuf,
	writer: Mutex<()>,
}
impl FileJournal {
	/// Uses `path` as the journal file, creating parent directories when missing.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		Ok(Self { path, writer: Mutex::new(()) })
	}

	/// Returns the journal file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn read_records(&self) -> Result<Vec<JournalRecord>, StoreError> {
		if !self.path.exists() {
			return Ok(Vec::new());
		}

		let raw = fs::read(&self.path).map_err(|e| {
			StoreError::backend(format!("Failed to read {}: {e}", self.path.display()))
		})?;
		let text = String::from_utf8_lossy(&raw);
		let mut records = Vec::new();

		for (index, line) in text.lines().enumerate().filter(|(_, line)| !line.trim().is_empty()) {
			match decode_line(line) {
				Some(record) => records.push(record),
				None => obs::pipeline_warn!(
					"Skipping corrupt journal line {} in {}.",
					index + 1,
					self.path.display()
				),
			}
		}

		Ok(records)
	}

	fn append_lines(&self, records: &[JournalRecord]) -> Result<(), StoreError> {
		let mut buffer = String::new();

		for record in records {
			buffer.push_str(&encode_line(record)?);
		}

		let _writer = self.writer.lock();
		let mut file = OpenOptions::new()
			.create(true)
			.read(true)
			.append(true)
			.open(&self.path)
			.map_err(|e| {
				StoreError::backend(format!("Failed to open {}: {e}", self.path.display()))
			})?;

		// A tail torn mid-append must not swallow the first new record.
		if !ends_with_newline(&mut file).map_err(|e| {
			StoreError::backend(format!("Failed to inspect {}: {e}", self.path.display()))
		})? {
			buffer.insert(0, '\n');
		}

		file.write_all(buffer.as_bytes()).map_err(|e| {
			StoreError::backend(format!("Failed to append to {}: {e}", self.path.display()))
		})?;
		file.sync_data().map_err(|e| {
			StoreError::backend(format!("Failed to sync {}: {e}", self.path.display()))
		})
	}

	fn rewrite(&self, items: &[QueuedRequest]) -> Result<(), StoreError> {
		let mut buffer = String::new();

		for item in items {
			buffer.push_str(&encode_line(&JournalRecord::Put { item: item.clone() })?);
		}

		let _writer = self.writer.lock();

		write_atomically(&self.path, buffer.as_bytes())
	}
}
impl QueueJournal for FileJournal {
	fn load(&self) -> StoreFuture<'_, Vec<QueuedRequest>> {
		Box::pin(async move { Ok(journal::replay(self.read_records()?)) })
	}

	fn append<'a>(&'a self, records: &'a [JournalRecord]) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.append_lines(records) })
	}

	fn compact<'a>(&'a self, items: &'a [QueuedRequest]) -> StoreFuture<'a, ()> {
		Box::pin(async move { self.rewrite(items) })
	}
}

fn ends_with_newline(file: &mut fs::File) -> std::io::Result<bool> {
	if file.metadata()?.len() == 0 {
		return Ok(true);
	}

	let mut last = [0_u8; 1];

	file.seek(SeekFrom::End(-1))?;
	file.read_exact(&mut last)?;

	Ok(last[0] == b'\n')
}

fn checksum(payload: &str) -> String {
	let digest = Sha256::digest(payload.as_bytes());

	digest.iter().take(CHECKSUM_BYTES).fold(String::with_capacity(CHECKSUM_BYTES * 2), |mut s, b| {
		let _ = write!(s, "{b:02x}");

		s
	})
}

fn encode_line(record: &JournalRecord) -> Result<String, StoreError> {
	let payload = serde_json::to_string(record).map_err(|e| {
		StoreError::serialization(format!("Failed to serialize journal record: {e}"))
	})?;

	Ok(format!("{} {payload}\n", checksum(&payload)))
}

fn decode_line(line: &str) -> Option<JournalRecord> {
	let (sum, payload) = line.split_once(' ')?;

	if sum != checksum(payload) {
		return None;
	}

	serde_json::from_str(payload).ok()
}

#[cfg(test)]
mod tests {
	// std
	use std::{env, process};
	// self
	use super::*;
	use crate::{http::Method, id::RequestId};

	fn temp_path() -> PathBuf {
		let unique = format!(
			"meal_pipeline_journal_{}_{}.log",
			process::id(),
			OffsetDateTime::now_utc().unix_timestamp_nanos(),
		);

		env::temp_dir().join(unique)
	}

	fn item(id: &str) -> QueuedRequest {
		let url = Url::parse("https://api.meals.test/v1/meals").expect("URL fixture should parse.");

		QueuedRequest::new(Method::Post, url)
			.with_id(RequestId::new(id).expect("Request id fixture should be valid."))
			.with_body(br#"{"kcal":420}"#.to_vec())
	}

	#[tokio::test]
	async fn torn_tail_is_skipped_on_load() {
		let path = temp_path();
		let journal = FileJournal::open(&path).expect("Journal should open.");

		journal
			.append(&[
				JournalRecord::Put { item: item("a") },
				JournalRecord::Put { item: item("b") },
			])
			.await
			.expect("Append should succeed.");

		let mut file =
			OpenOptions::new().append(true).open(&path).expect("Journal file should exist.");

		file.write_all(b"0123456789abcdef {\"op\":\"put\",\"item\":{\"id\":\"c\"")
			.expect("Writing a torn line should succeed.");

		let items = journal.load().await.expect("Load should skip the torn line.");
		let ids = items.iter().map(|item| item.id.to_string()).collect::<Vec<_>>();

		assert_eq!(ids, ["a", "b"]);
		assert_eq!(items[0].body.as_deref(), Some(br#"{"kcal":420}"#.as_slice()));

		fs::remove_file(&path).expect("Failed to remove journal fixture.");
	}

	#[tokio::test]
	async fn appends_after_a_torn_tail_start_on_a_new_line() {
		let path = temp_path();
		let journal = FileJournal::open(&path).expect("Journal should open.");

		journal
			.append(&[JournalRecord::Put { item: item("a") }])
			.await
			.expect("Append should succeed.");

		let mut file =
			OpenOptions::new().append(true).open(&path).expect("Journal file should exist.");

		file.write_all(b"deadbeef {\"op\":\"put\"").expect("Writing a torn line should succeed.");
		drop(file);
		journal
			.append(&[JournalRecord::Put { item: item("b") }])
			.await
			.expect("Append should succeed.");

		let items = journal.load().await.expect("Load should skip the torn line.");
		let ids = items.iter().map(|item| item.id.to_string()).collect::<Vec<_>>();

		assert_eq!(ids, ["a", "b"]);

		fs::remove_file(&path).expect("Failed to remove journal fixture.");
	}

	#[tokio::test]
	async fn compaction_rewrites_one_line_per_pending_item() {
		let path = temp_path();
		let journal = FileJournal::open(&path).expect("Journal should open.");

		journal
			.append(&[
				JournalRecord::Put { item: item("a") },
				JournalRecord::Put { item: item("b") },
				JournalRecord::Remove { id: RequestId::new("a").expect("Id should be valid.") },
			])
			.await
			.expect("Append should succeed.");

		let pending = journal.load().await.expect("Load should succeed.");

		journal.compact(&pending).await.expect("Compaction should succeed.");

		let contents = fs::read_to_string(&path).expect("Journal should be readable.");

		assert_eq!(contents.lines().count(), 1);
		assert_eq!(journal.load().await.expect("Reload should succeed.").len(), 1);

		fs::remove_file(&path).expect("Failed to remove journal fixture.");
	}

	#[test]
	fn tampered_payload_fails_the_checksum() {
		let line = encode_line(&JournalRecord::Remove {
			id: RequestId::new("a").expect("Id should be valid."),
		})
		.expect("Encoding should succeed.");
		let tampered = line.trim_end().replace("\"a\"", "\"b\"");

		assert!(decode_line(line.trim_end()).is_some());
		assert!(decode_line(&tampered).is_none());
	}
}
