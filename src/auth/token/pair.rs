//! Access/refresh token pair and its expiry helpers.

// self
use crate::{_prelude::*, auth::token::secret::TokenSecret};

/// Errors produced while constructing a [`TokenPair`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenPairError {
	/// Issued when the access token is empty.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when the refresh token is empty.
	#[error("Refresh token is required.")]
	MissingRefreshToken,
}

/// Credentials for an authenticated session.
///
/// Both secrets are non-empty for every constructed value; a missing pair means the user is
/// logged out.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenPair {
	/// Bearer token attached to outbound calls; callers must avoid logging it.
	pub access: TokenSecret,
	/// Token exchanged for a new pair at the refresh endpoint.
	pub refresh: TokenSecret,
	/// Instant after which the access token is no longer accepted, when known.
	#[serde(default, with = "time::serde::timestamp::option")]
	pub access_expires_at: Option<OffsetDateTime>,
}
impl TokenPair {
	/// Creates a pair without a known expiry.
	pub fn new(
		access: impl Into<String>,
		refresh: impl Into<String>,
	) -> Result<Self, TokenPairError> {
		let pair = Self {
			access: TokenSecret::new(access),
			refresh: TokenSecret::new(refresh),
			access_expires_at: None,
		};

		pair.validate()?;

		Ok(pair)
	}

	/// Sets an absolute expiry instant for the access token.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.access_expires_at = Some(instant);

		self
	}

	/// Sets the expiry relative to `issued_at`.
	pub fn expires_in(self, lifetime: Duration, issued_at: OffsetDateTime) -> Self {
		self.expires_at(issued_at + lifetime)
	}

	/// Returns `true` if the access token has expired at `instant`.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		self.access_expires_at.is_some_and(|expiry| instant >= expiry)
	}

	/// Returns `true` if the access token expires within `window` of `instant`.
	pub fn expires_within(&self, window: Duration, instant: OffsetDateTime) -> bool {
		self.access_expires_at.is_some_and(|expiry| expiry - instant <= window)
	}

	pub(crate) fn validate(&self) -> Result<(), TokenPairError> {
		if self.access.is_empty() {
			return Err(TokenPairError::MissingAccessToken);
		}
		if self.refresh.is_empty() {
			return Err(TokenPairError::MissingRefreshToken);
		}

		Ok(())
	}
}
impl Debug for TokenPair {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenPair")
			.field("access", &"<redacted>")
			.field("refresh", &"<redacted>")
			.field("access_expires_at", &self.access_expires_at)
			.finish()
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	#[test]
	fn constructor_rejects_empty_secrets() {
		assert_eq!(TokenPair::new("", "r1"), Err(TokenPairError::MissingAccessToken));
		assert_eq!(TokenPair::new("a1", " "), Err(TokenPairError::MissingRefreshToken));
	}

	#[test]
	fn expiry_helpers_respect_window() {
		let issued = macros::datetime!(2025-03-01 08:00 UTC);
		let pair = TokenPair::new("a1", "r1")
			.expect("Token pair fixture should be valid.")
			.expires_in(Duration::minutes(15), issued);

		assert!(!pair.is_expired_at(macros::datetime!(2025-03-01 08:10 UTC)));
		assert!(pair.is_expired_at(macros::datetime!(2025-03-01 08:15 UTC)));
		assert!(pair.expires_within(Duration::minutes(5), macros::datetime!(2025-03-01 08:10 UTC)));
		assert!(
			!pair.expires_within(Duration::minutes(1), macros::datetime!(2025-03-01 08:10 UTC))
		);
	}

	#[test]
	fn pairs_without_expiry_never_expire() {
		let pair = TokenPair::new("a1", "r1").expect("Token pair fixture should be valid.");

		assert!(!pair.is_expired_at(OffsetDateTime::now_utc() + Duration::days(365)));
		assert!(!pair.expires_within(Duration::hours(1), OffsetDateTime::now_utc()));
	}

	#[test]
	fn debug_output_redacts_secrets() {
		let pair =
			TokenPair::new("a1-secret", "r1-secret").expect("Token pair fixture should be valid.");
		let rendered = format!("{pair:?}");

		assert!(!rendered.contains("a1-secret"));
		assert!(!rendered.contains("r1-secret"));
	}
}
