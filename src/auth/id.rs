//! Strongly typed identifiers enforced across the synchronization domain.

// std
use std::{borrow::Borrow, ops::Deref};
// self
use crate::_prelude::*;

macro_rules! def_id {
	($name:ident, $doc:literal, $kind:literal) => {
		#[doc = $doc]
		#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
		#[serde(try_from = "String", into = "String")]
		pub struct $name(String);
		impl $name {
			/// Creates a new identifier after validation.
			pub fn new(value: impl AsRef<str>) -> Result<Self, IdentifierError> {
				let view = value.as_ref();

				validate_view($kind, view)?;

				Ok(Self(view.to_owned()))
			}
		}
		impl Deref for $name {
			type Target = str;

			fn deref(&self) -> &Self::Target {
				&self.0
			}
		}
		impl AsRef<str> for $name {
			fn as_ref(&self) -> &str {
				&self.0
			}
		}
		impl From<$name> for String {
			fn from(value: $name) -> Self {
				value.0
			}
		}
		impl TryFrom<String> for $name {
			type Error = IdentifierError;

			fn try_from(value: String) -> Result<Self, Self::Error> {
				validate_view($kind, &value)?;

				Ok(Self(value))
			}
		}
		impl Borrow<str> for $name {
			fn borrow(&self) -> &str {
				&self.0
			}
		}
		impl Debug for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				write!(f, concat!($kind, "({})"), self.0)
			}
		}
		impl Display for $name {
			fn fmt(&self, f: &mut Formatter) -> FmtResult {
				f.write_str(&self.0)
			}
		}
		impl FromStr for $name {
			type Err = IdentifierError;

			fn from_str(s: &str) -> Result<Self, Self::Err> {
				Self::new(s)
			}
		}
	};
}

const IDENTIFIER_MAX_LEN: usize = 64;

/// Error returned when identifier validation fails.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, ThisError)]
pub enum IdentifierError {
	/// The identifier was empty.
	#[error("{kind} identifier cannot be empty.")]
	Empty {
		/// Kind of identifier (principal, entity).
		kind: &'static str,
	},
	/// The identifier contains a character outside the ASCII-graphic range.
	///
	/// Identifiers cross HTTP boundaries as path segments and cache keys, so anything
	/// beyond printable ASCII is rejected at construction.
	#[error("{kind} identifier contains a non-graphic or non-ASCII character.")]
	InvalidCharacter {
		/// Kind of identifier (principal, entity).
		kind: &'static str,
	},
	/// The identifier exceeded the allowed character count.
	#[error("{kind} identifier exceeds {max} characters.")]
	TooLong {
		/// Kind of identifier (principal, entity).
		kind: &'static str,
		/// Maximum permitted character count.
		max: usize,
	},
}

def_id! { PrincipalId, "Unique identifier for an authenticated tenant/user principal.", "Principal" }
def_id! { EntityId, "Identifier for a marketplace entity (item, question, order).", "Entity" }

fn validate_view(kind: &'static str, view: &str) -> Result<(), IdentifierError> {
	if view.is_empty() {
		return Err(IdentifierError::Empty { kind });
	}
	if !view.chars().all(|c| c.is_ascii_graphic()) {
		return Err(IdentifierError::InvalidCharacter { kind });
	}
	if view.len() > IDENTIFIER_MAX_LEN {
		return Err(IdentifierError::TooLong { kind, max: IDENTIFIER_MAX_LEN });
	}

	Ok(())
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn identifiers_reject_whitespace_and_control_characters() {
		assert!(PrincipalId::new("user 42").is_err(), "Embedded whitespace must be rejected.");
		assert!(PrincipalId::new(" user-42").is_err(), "Leading whitespace must be rejected.");
		assert!(PrincipalId::new("user\n42").is_err(), "Control characters must be rejected.");
		assert!(PrincipalId::new("").is_err());

		let principal =
			PrincipalId::new("user-42").expect("Principal fixture should be considered valid.");

		assert_eq!(principal.as_ref(), "user-42");
	}

	#[test]
	fn serde_round_trip_enforces_validation() {
		let entity: EntityId =
			serde_json::from_str("\"MLB123\"").expect("Entity should deserialize successfully.");

		assert_eq!(entity.as_ref(), "MLB123");
		assert!(serde_json::from_str::<EntityId>("\"MLB 123\"").is_err());
		assert!(serde_json::from_str::<PrincipalId>("\"usér\"").is_err());
	}

	#[test]
	fn length_limits_apply() {
		let exact = "a".repeat(IDENTIFIER_MAX_LEN);

		EntityId::new(&exact).expect("Exact length should succeed.");

		let too_long = "a".repeat(IDENTIFIER_MAX_LEN + 1);

		assert!(EntityId::new(&too_long).is_err());
	}

	#[test]
	fn borrow_supports_fast_lookup() {
		let map: HashMap<PrincipalId, u8> = HashMap::from_iter([(
			PrincipalId::new("user-7").expect("Principal used for lookup should be valid."),
			7_u8,
		)]);

		assert_eq!(map.get("user-7"), Some(&7));
	}
}
