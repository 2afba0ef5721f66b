//! Scope modeling helpers for marketplace token grants.

// std
use std::collections::BTreeSet;
// crates.io
use serde::{Deserializer, Serializer, de::Error as DeError};
// self
use crate::_prelude::*;

/// Errors emitted when validating scopes.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum ScopeValidationError {
	/// Empty scope entries are not allowed.
	#[error("Scope entries cannot be empty.")]
	Empty,
	/// Scopes cannot contain embedded whitespace characters.
	#[error("Scope contains whitespace: {scope}.")]
	ContainsWhitespace {
		/// The offending scope string.
		scope: String,
	},
}

/// Normalized set of OAuth scopes.
///
/// Scopes are deduplicated and sorted so equality and hashing remain stable regardless
/// of the order the marketplace returns them in. On the wire the set is the provider's
/// space-delimited string, so serde round-trips through that representation.
#[derive(Clone, Debug, Default, PartialEq, Eq, Hash)]
pub struct ScopeSet(Vec<String>);
impl ScopeSet {
	/// Creates a normalized scope set from any iterator.
	pub fn new<I, S>(scopes: I) -> Result<Self, ScopeValidationError>
	where
		I: IntoIterator<Item = S>,
		S: Into<String>,
	{
		let mut normalized = BTreeSet::new();

		for scope in scopes {
			let scope = scope.into();

			if scope.is_empty() {
				return Err(ScopeValidationError::Empty);
			}
			if scope.chars().any(char::is_whitespace) {
				return Err(ScopeValidationError::ContainsWhitespace { scope });
			}

			normalized.insert(scope);
		}

		Ok(Self(normalized.into_iter().collect()))
	}

	/// Parses a provider-supplied space-delimited scope string.
	pub fn parse(raw: &str) -> Self {
		Self(BTreeSet::from_iter(raw.split_whitespace().map(str::to_owned)).into_iter().collect())
	}

	/// Number of distinct scopes.
	pub fn len(&self) -> usize {
		self.0.len()
	}

	/// Returns true if no scopes are defined.
	pub fn is_empty(&self) -> bool {
		self.0.is_empty()
	}

	/// Returns true if the normalized set contains the provided scope.
	pub fn contains(&self, scope: &str) -> bool {
		self.0.binary_search_by(|candidate| candidate.as_str().cmp(scope)).is_ok()
	}

	/// Iterator over normalized scopes.
	pub fn iter(&self) -> impl Iterator<Item = &str> {
		self.0.iter().map(|s| s.as_str())
	}

	/// Returns the normalized string representation (space-delimited).
	pub fn normalized(&self) -> String {
		self.0.join(" ")
	}
}
impl Display for ScopeSet {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(&self.normalized())
	}
}
impl Serialize for ScopeSet {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.normalized())
	}
}
impl<'de> Deserialize<'de> for ScopeSet {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let raw = String::deserialize(deserializer)?;

		Self::new(raw.split_whitespace()).map_err(DeError::custom)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn scopes_deduplicate_and_sort() {
		let a = ScopeSet::new(["write", "read", "write"]).expect("Scope fixture should be valid.");
		let b = ScopeSet::new(["read", "write"]).expect("Scope fixture should be valid.");

		assert_eq!(a, b);
		assert_eq!(a.normalized(), "read write");
		assert_eq!(a.len(), 2);
		assert!(a.contains("read"));
		assert!(!a.contains("admin"));
	}

	#[test]
	fn validation_rejects_bad_entries() {
		assert_eq!(ScopeSet::new([""]).expect_err("Empty scope"), ScopeValidationError::Empty);
		assert!(matches!(
			ScopeSet::new(["offline access"]),
			Err(ScopeValidationError::ContainsWhitespace { .. })
		));
	}

	#[test]
	fn serde_uses_wire_format() {
		let scope = ScopeSet::parse("offline_access read write");
		let payload = serde_json::to_string(&scope).expect("Scope set should serialize.");

		assert_eq!(payload, "\"offline_access read write\"");

		let round_trip: ScopeSet =
			serde_json::from_str(&payload).expect("Scope set should deserialize.");

		assert_eq!(round_trip, scope);
	}
}
