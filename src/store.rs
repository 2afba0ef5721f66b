//! Storage contracts for credentials, authorization states, cache entries, and counters.
//!
//! Every seam is an object-safe trait returning boxed `Send` futures so backends range
//! from the in-process [`MemoryStore`] to Redis-style engines. The contracts push all
//! synchronization down to the backend: token rotation is a generation compare-and-swap,
//! state consumption is an atomic delete-and-return, and window counters are a single
//! atomic increment-and-read.

pub mod memory;

pub use memory::MemoryStore;

// self
use crate::{
	_prelude::*,
	auth::{AuthorizationState, PrincipalId, TokenRecord},
};

/// Boxed future returned by store trait methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + 'a + Send>>;

/// Per-principal token record persistence.
///
/// Single-writer-per-principal discipline is enforced via
/// [`compare_and_swap_generation`](Self::compare_and_swap_generation) rather than locks:
/// writers read `(record, generation)`, perform their upstream call, and only the writer
/// whose expected generation still matches lands its replacement.
pub trait CredentialStore
where
	Self: Send + Sync,
{
	/// Persists or replaces the record for the record's principal.
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()>;

	/// Fetches the record for the principal, if present.
	fn fetch<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Atomically replaces the record if its rotation generation matches `expected_generation`.
	fn compare_and_swap_generation<'a>(
		&'a self,
		principal: &'a PrincipalId,
		expected_generation: u64,
		replacement: TokenRecord,
	) -> StoreFuture<'a, RotationOutcome>;

	/// Removes the record, returning it when one existed.
	fn delete<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, Option<TokenRecord>>;

	/// Lists every principal with a stored record; feeds the index-fallback directory.
	fn list_principals(&self) -> StoreFuture<'_, Vec<PrincipalId>>;
}

/// Result of a generation compare-and-swap attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum RotationOutcome {
	/// The generation matched and the replacement landed.
	Updated,
	/// Another writer rotated first; the caller must discard its result.
	GenerationMismatch,
	/// No record exists for the principal.
	Missing,
}

/// Short-lived one-time storage for CSRF/PKCE authorization states.
pub trait StateStore
where
	Self: Send + Sync,
{
	/// Persists a freshly issued state before the authorize redirect.
	fn put(&self, state: AuthorizationState) -> StoreFuture<'_, ()>;

	/// Atomically consumes the state, distinguishing replay from an ordinary miss.
	fn consume<'a>(&'a self, state_value: &'a str) -> StoreFuture<'a, StateConsumeOutcome>;
}

/// Outcome of a one-time state consumption attempt.
#[derive(Clone, Debug)]
pub enum StateConsumeOutcome {
	/// First consumption; the bound state is returned exactly once.
	Consumed(AuthorizationState),
	/// No live or consumed state matches the value.
	NotFound,
	/// The state outlived its TTL before being consumed.
	Expired,
	/// The state was consumed before—a replay signal, not a cache miss.
	AlreadyConsumed,
}

/// Keyed JSON entity cache with per-key last-writer-wins semantics.
pub trait EntityCache
where
	Self: Send + Sync,
{
	/// Fetches the cached value, if present and unexpired.
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<serde_json::Value>>;

	/// Stores or replaces the value, optionally bounding its lifetime.
	fn put<'a>(
		&'a self,
		key: &'a str,
		value: serde_json::Value,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()>;

	/// Removes the value, returning `true` when an entry was present.
	fn evict<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool>;
}

/// Snapshot returned by [`CounterStore::increment`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowSample {
	/// Hit count within the current window, including this hit.
	pub count: u64,
	/// Instant the window (and its counter) expires.
	pub expires_at: OffsetDateTime,
}

/// Atomic sliding/fixed-window counters backing the rate limiter.
pub trait CounterStore
where
	Self: Send + Sync,
{
	/// Atomically increments the counter for `key`, starting a fresh window on first hit.
	///
	/// Implementations must perform a single increment-and-read against the backing
	/// engine; the limiter never issues a separate read followed by a write.
	fn increment<'a>(&'a self, key: &'a str, window: Duration) -> StoreFuture<'a, WindowSample>;
}

/// Error type produced by store implementations.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum StoreError {
	/// Serialization failures surfaced by the backend.
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

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::Error;

	#[test]
	fn rotation_outcome_can_be_serialized() {
		let payload = serde_json::to_string(&RotationOutcome::GenerationMismatch)
			.expect("RotationOutcome should serialize to JSON.");

		assert_eq!(payload, "\"GenerationMismatch\"");

		let round_trip: RotationOutcome = serde_json::from_str(&payload)
			.expect("Serialized outcome should deserialize from JSON.");

		assert_eq!(round_trip, RotationOutcome::GenerationMismatch);
	}

	#[test]
	fn store_error_converts_into_crate_error_with_source() {
		let store_error = StoreError::Backend { message: "redis unreachable".into() };
		let error: Error = store_error.clone().into();

		assert!(matches!(error, Error::Storage(_)));

		let source = StdError::source(&error)
			.expect("Crate error should expose the original store error as its source.");

		assert_eq!(source.to_string(), store_error.to_string());
	}
}
