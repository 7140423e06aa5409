//! File-backed [`SecureStorage`] for desktop development and bots.
//!
//! Values are written as a plain JSON object; use an encrypting backend on devices.

// std
use std::{
	fs::{self, File},
	io::Write,
	path::{Path, PathBuf},
};
// self
use crate::{
	_prelude::*,
	store::{SecureStorage, StoreError, StoreFuture},
};

/// Persists key/value pairs to a JSON file after each mutation.
#[derive(Clone, Debug)]
pub struct FileStore {
	path: PathBuf,
	inner: Arc<RwLock<BTreeMap<String, String>>>,
}
impl FileStore {
	/// Opens (or creates) a store at the provided path, eagerly loading existing data.
	pub fn open(path: impl Into<PathBuf>) -> Result<Self, StoreError> {
		let path = path.into();

		ensure_parent_exists(&path)?;

		let snapshot = Self::load_snapshot(&path)?;

		Ok(Self { path, inner: Arc::new(RwLock::new(snapshot)) })
	}

	/// Returns the backing file path.
	pub fn path(&self) -> &Path {
		&self.path
	}

	fn load_snapshot(path: &Path) -> Result<BTreeMap<String, String>, StoreError> {
		if !path.exists() {
			return Ok(BTreeMap::new());
		}

		let bytes = fs::read(path).map_err(|e| {
			StoreError::backend(format!("Failed to read {}: {e}", path.display()))
		})?;

		if bytes.is_empty() {
			return Ok(BTreeMap::new());
		}

		serde_json::from_slice(&bytes).map_err(|e| {
			StoreError::serialization(format!("Failed to parse {}: {e}", path.display()))
		})
	}

	fn persist_locked(&self, contents: &BTreeMap<String, String>) -> Result<(), StoreError> {
		let serialized = serde_json::to_vec_pretty(contents).map_err(|e| {
			StoreError::serialization(format!("Failed to serialize store snapshot: {e}"))
		})?;

		write_atomically(&self.path, &serialized)
	}

	fn mutate(
		&self,
		apply: impl FnOnce(&mut BTreeMap<String, String>),
	) -> Result<(), StoreError> {
		let mut guard = self.inner.write();
		let mut next = guard.clone();

		apply(&mut next);
		// Memory only changes once the file write succeeded.
		self.persist_locked(&next)?;

		*guard = next;

		Ok(())
	}
}
impl SecureStorage for FileStore {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>> {
		Box::pin(async move { Ok(self.inner.read().get(key).cloned()) })
	}

	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			self.mutate(|map| {
				map.insert(key.to_owned(), value);
			})
		})
	}

	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			if !self.inner.read().contains_key(key) {
				return Ok(());
			}

			self.mutate(|map| {
				map.remove(key);
			})
		})
	}
}

/// Creates the parent directory of `path` when missing.
pub(crate) fn ensure_parent_exists(path: &Path) -> Result<(), StoreError> {
	if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
		fs::create_dir_all(parent).map_err(|e| {
			StoreError::backend(format!(
				"Failed to create store directory {}: {e}",
				parent.display()
			))
		})?;
	}

	Ok(())
}

/// Replaces `path` with `bytes` through a synced temporary file and a rename.
pub(crate) fn write_atomically(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
	ensure_parent_exists(path)?;

	let mut tmp_path = path.to_path_buf();

	tmp_path.set_extension("tmp");

	{
		let mut file = File::create(&tmp_path).map_err(|e| {
			StoreError::backend(format!("Failed to create {}: {e}", tmp_path.display()))
		})?;

		file.write_all(bytes).map_err(|e| {
			StoreError::backend(format!("Failed to write {}: {e}", tmp_path.display()))
		})?;
		file.sync_all().map_err(|e| {
			StoreError::backend(format!("Failed to sync {}: {e}", tmp_path.display()))
		})?;
	}

	fs::rename(&tmp_path, path)
		.map_err(|e| StoreError::backend(format!("Failed to replace {}: {e}", path.display())))
}
