//! Durable credential store layered over a [`SecureStorage`] backend.
//!
//! The access token, refresh token, and expiry live in one serialized record under a single
//! key, so a save either replaces all three or leaves the previous record untouched. Writers are
//! serialized through an async mutex; readers go straight to the backend.

// self
use crate::{
	_prelude::*,
	auth::token::{pair::TokenPair, secret::TokenSecret},
	store::{SecureStorage, StoreError},
};

/// Default storage key for the session record.
pub const SESSION_KEY: &str = "meal_pipeline.session.v1";

/// Credential store shared by the request pipeline and the refresh coordinator.
pub struct CredentialStore {
	storage: Arc<dyn SecureStorage>,
	key: String,
	write_guard: AsyncMutex<()>,
}
impl CredentialStore {
	/// Creates a store that keeps the session under [`SESSION_KEY`].
	pub fn new(storage: Arc<dyn SecureStorage>) -> Self {
		Self { storage, key: SESSION_KEY.into(), write_guard: AsyncMutex::new(()) }
	}

	/// Overrides the storage key (useful when several accounts share one backend).
	pub fn with_key(mut self, key: impl Into<String>) -> Self {
		self.key = key.into();

		self
	}

	/// Persists `pair`, replacing access, refresh, and expiry together.
	pub async fn save(&self, pair: &TokenPair) -> Result<(), StoreError> {
		pair.validate().map_err(|e| StoreError::serialization(e.to_string()))?;

		let payload = serde_json::to_string(pair).map_err(|e| {
			StoreError::serialization(format!("Failed to serialize session record: {e}"))
		})?;
		let _writer = self.write_guard.lock().await;

		self.storage.set(&self.key, payload).await
	}

	/// Loads the stored pair; `Ok(None)` means logged out.
	pub async fn load(&self) -> Result<Option<TokenPair>, StoreError> {
		let Some(raw) = self.storage.get(&self.key).await? else {
			return Ok(None);
		};
		let pair: TokenPair = serde_json::from_str(&raw).map_err(|e| {
			StoreError::serialization(format!("Stored session record is corrupt: {e}"))
		})?;

		pair.validate().map_err(|e| {
			StoreError::serialization(format!("Stored session record is incomplete: {e}"))
		})?;

		Ok(Some(pair))
	}

	/// Returns the current access token.
	pub async fn access_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.load().await?.map(|pair| pair.access))
	}

	/// Returns the current refresh token.
	pub async fn refresh_token(&self) -> Result<Option<TokenSecret>, StoreError> {
		Ok(self.load().await?.map(|pair| pair.refresh))
	}

	/// Returns the access token expiry, when both a session and an expiry exist.
	pub async fn expiry(&self) -> Result<Option<OffsetDateTime>, StoreError> {
		Ok(self.load().await?.and_then(|pair| pair.access_expires_at))
	}

	/// Removes the session record.
	pub async fn clear(&self) -> Result<(), StoreError> {
		let _writer = self.write_guard.lock().await;

		self.storage.remove(&self.key).await
	}

	/// Returns `true` when a session exists and its access token has not expired.
	pub async fn has_valid(&self) -> Result<bool, StoreError> {
		self.has_valid_at(OffsetDateTime::now_utc()).await
	}

	/// Same as [`has_valid`](Self::has_valid) with an explicit clock reading.
	pub async fn has_valid_at(&self, now: OffsetDateTime) -> Result<bool, StoreError> {
		Ok(self.load().await?.is_some_and(|pair| !pair.is_expired_at(now)))
	}
}
impl Debug for CredentialStore {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CredentialStore").field("key", &self.key).finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;
	use crate::store::{MemoryStore, StoreFuture};

	struct UnavailableStorage;
	impl SecureStorage for UnavailableStorage {
		fn get<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, Option<String>> {
			Box::pin(async { Err(StoreError::backend("keychain locked")) })
		}

		fn set<'a>(&'a self, _key: &'a str, _value: String) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::backend("keychain locked")) })
		}

		fn remove<'a>(&'a self, _key: &'a str) -> StoreFuture<'a, ()> {
			Box::pin(async { Err(StoreError::backend("keychain locked")) })
		}
	}

	fn pair(access: &str, refresh: &str) -> TokenPair {
		TokenPair::new(access, refresh).expect("Token pair fixture should be valid.")
	}

	#[tokio::test]
	async fn save_load_and_clear() {
		let backend = Arc::new(MemoryStore::default());
		let store = CredentialStore::new(backend.clone());

		assert!(store.load().await.expect("Empty store should load.").is_none());

		store.save(&pair("a1", "r1")).await.expect("Saving the session should succeed.");

		assert_eq!(
			store
				.access_token()
				.await
				.expect("Access read should succeed.")
				.map(|t| t.expose().to_owned()),
			Some("a1".into())
		);
		assert_eq!(
			store
				.refresh_token()
				.await
				.expect("Refresh read should succeed.")
				.map(|t| t.expose().to_owned()),
			Some("r1".into())
		);
		assert_eq!(backend.len(), 1);

		store.clear().await.expect("Clearing the session should succeed.");

		assert!(store.load().await.expect("Cleared store should load.").is_none());
		assert!(backend.is_empty());
	}

	#[tokio::test]
	async fn storage_failure_is_not_reported_as_logged_out() {
		let store = CredentialStore::new(Arc::new(UnavailableStorage));
		let err = store.access_token().await.expect_err("Backend failures must surface.");

		assert!(matches!(err, StoreError::Backend { .. }));
	}

	#[tokio::test]
	async fn corrupt_record_surfaces_serialization_error() {
		let backend = Arc::new(MemoryStore::default());

		backend
			.set(SESSION_KEY, "{\"access\":\"\",\"refresh\":\"r1\"}".into())
			.await
			.expect("Seeding corrupt record should succeed.");

		let store = CredentialStore::new(backend);
		let err = store.load().await.expect_err("Incomplete records must not load.");

		assert!(matches!(err, StoreError::Serialization { .. }));
	}

	#[tokio::test]
	async fn has_valid_honours_expiry() {
		let store = CredentialStore::new(Arc::new(MemoryStore::default()));
		let issued = macros::datetime!(2025-03-01 08:00 UTC);

		store
			.save(&pair("a1", "r1").expires_in(Duration::minutes(15), issued))
			.await
			.expect("Saving the session should succeed.");

		assert!(
			store
				.has_valid_at(macros::datetime!(2025-03-01 08:05 UTC))
				.await
				.expect("Validity check should succeed.")
		);
		assert!(
			!store
				.has_valid_at(macros::datetime!(2025-03-01 08:30 UTC))
				.await
				.expect("Validity check should succeed.")
		);
		assert_eq!(
			store.expiry().await.expect("Expiry read should succeed."),
			Some(macros::datetime!(2025-03-01 08:15 UTC))
		);
	}

	#[tokio::test]
	async fn failed_write_keeps_previous_record() {
		let backend = Arc::new(MemoryStore::default());
		let store = CredentialStore::new(backend.clone());

		store.save(&pair("a1", "r1")).await.expect("Saving the session should succeed.");

		let invalid = TokenPair {
			access: TokenSecret::new("a2"),
			refresh: TokenSecret::new(""),
			access_expires_at: None,
		};

		store.save(&invalid).await.expect_err("Incomplete pairs must be rejected.");

		let current =
			store.load().await.expect("Load should succeed.").expect("Record should remain.");

		assert_eq!(current.access.expose(), "a1");
		assert_eq!(current.refresh.expose(), "r1");
	}
}
