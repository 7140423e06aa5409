//! Strongly typed identifiers for requests and rate-limit channels.
//!
//! Both kinds travel in HTTP headers and journal lines, so they are limited to visible ASCII.

// std
use std::ops::Deref;
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $kind:literal, $max:expr, $doc:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Maximum length in bytes.
			pub const MAX_LEN: usize = $max;

			/// Validates and wraps `value`.
			pub fn new(value: impl Into<String>) -> Result<Self, IdentifierError> {
				let value = value.into();

				check($kind, Self::MAX_LEN, &value)?;

				Ok(Self(value))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &str {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				Self::new(value)
			}
		}
		impl From<$name> for String {
			fn from(id: $name) -> Self {
				id.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.debug_tuple(stringify!($name)).field(&self.0).finish()
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
	};
}

/// Reasons an identifier is rejected.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// Nothing to identify by.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// `Request` or `Channel`.
		kind: &'static str,
	},
	/// Whitespace, control, or non-ASCII character.
	#[error("{kind} identifier contains the invalid character {found:?}.")]
	InvalidCharacter {
		/// `Request` or `Channel`.
		kind: &'static str,
		/// First offending character.
		found: char,
	},
	/// Longer than the kind allows.
	#[error("{kind} identifier exceeds {max} bytes.")]
	TooLong {
		/// `Request` or `Channel`.
		kind: &'static str,
		/// Allowed length.
		max: usize,
	},
}

def_id! {
	RequestId,
	"Request",
	128,
	"Idempotency identifier sent as `X-Request-Id`; retries and offline replays reuse it."
}
def_id! { Channel, "Channel", 64, "Named rate-limit channel such as `auth`, `ai`, or `general`." }

impl RequestId {
	/// Generates a random 128-bit identifier rendered as lowercase hex.
	pub fn generate() -> Self {
		Self(format!("{:032x}", rand::random::<u128>()))
	}
}

impl Channel {
	/// Channel for authentication endpoints.
	pub const AUTH: &'static str = "auth";
	/// Channel for AI-backed analysis endpoints.
	pub const AI: &'static str = "ai";
	/// Channel used when a request does not name one.
	pub const GENERAL: &'static str = "general";

	/// Returns the `auth` channel.
	pub fn auth() -> Self {
		Self(Self::AUTH.into())
	}

	/// Returns the `ai` channel.
	pub fn ai() -> Self {
		Self(Self::AI.into())
	}

	/// Returns the `general` channel.
	pub fn general() -> Self {
		Self(Self::GENERAL.into())
	}
}
impl Default for Channel {
	fn default() -> Self {
		Self::general()
	}
}

fn check(kind: &'static str, max: usize, value: &str) -> Result<(), IdentifierError> {
	if value.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if let Some(found) = value.chars().find(|c| !c.is_ascii_graphic()) {
		return Err(IdentifierError::InvalidCharacter { kind, found });
	}
	if value.len() > max {
		return Err(IdentifierError::TooLong { kind, max });
	}

	Ok(())
}
