//! Secure key/value storage contracts and built-in backends.
//!
//! The pipeline persists session credentials through [`SecureStorage`]. Production builds plug
//! in the platform keychain (at-rest encryption is the backend's responsibility); the bundled
//! [`MemoryStore`] and [`FileStore`] serve tests, demos, and desktop development.

pub mod file;
pub mod memory;

pub use file::FileStore;
pub use memory::MemoryStore;

// self
use crate::_prelude::*;

/// Boxed future returned by storage backends.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Opaque string persistence used for credentials.
///
/// `get` distinguishes "nothing stored" (`Ok(None)`) from "storage unavailable" (`Err`), and
/// implementations must never collapse the latter into the former.
///
/// Device builds must plug in a backend that encrypts at rest, such as the platform keychain.
/// [`FileStore`] writes plaintext and is meant for development and tests only.
pub trait SecureStorage
where
	Self: Send + Sync,
{
	/// Reads the value stored under `key`, if any.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<String>>;

	/// Stores or replaces the value under `key`.
	fn set<'a>(&'a self, key: &'a str, value: String) -> StoreFuture<'a, ()>;

	/// Removes the value under `key`; removing a missing key succeeds.
	fn remove<'a>(&'a self, key: &'a str) -> StoreFuture<'a, ()>;
}

/// Error type produced by storage backends and journals.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend or a corrupt stored value.
	#[error("Serialization error: {message}.")]
	Serialization {
		/// Human-readable error payload.
		message: String,
	},
	/// Backend-level failure for the storage engine.
	#[error("Backend failure: {message}.")]
	Backend {
		/// Human-readable error payload.
		message: String,
	},
}
impl StoreError {
	pub(crate) fn serialization(message: impl Into<String>) -> Self {
		Self::Serialization { message: message.into() }
	}

	pub(crate) fn backend(message: impl Into<String>) -> Self {
		Self::Backend { message: message.into() }
	}
}
