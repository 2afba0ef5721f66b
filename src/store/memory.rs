//! Thread-safe in-memory implementation of every storage seam for tests and demos.

// self
use crate::{
	_prelude::*,
	auth::{AuthorizationState, PrincipalId, TokenRecord},
	store::{
		CounterStore, CredentialStore, EntityCache, RotationOutcome, StateConsumeOutcome,
		StateStore, StoreFuture, WindowSample,
	},
};

#[derive(Clone, Debug)]
struct CacheEntry {
	value: serde_json::Value,
	expires_at: Option<OffsetDateTime>,
}

#[derive(Clone, Copy, Debug)]
struct CounterWindow {
	count: u64,
	expires_at: OffsetDateTime,
}

/// In-process storage backend implementing all four seams.
///
/// Expired authorization states and counter windows are reaped lazily on access; consumed
/// states leave a tombstone until their original expiry so replay stays distinguishable
/// from an ordinary miss.
#[derive(Debug, Default)]
pub struct MemoryStore {
	credentials: RwLock<HashMap<PrincipalId, TokenRecord>>,
	states: RwLock<HashMap<String, AuthorizationState>>,
	consumed_states: RwLock<HashMap<String, OffsetDateTime>>,
	cache: RwLock<HashMap<String, CacheEntry>>,
	counters: Mutex<HashMap<String, CounterWindow>>,
}
impl MemoryStore {
	fn consume_now(&self, state_value: &str, now: OffsetDateTime) -> StateConsumeOutcome {
		let removed = self.states.write().remove(state_value);

		if let Some(state) = removed {
			if state.is_expired_at(now) {
				return StateConsumeOutcome::Expired;
			}

			self.consumed_states.write().insert(state_value.to_owned(), state.expires_at);

			return StateConsumeOutcome::Consumed(state);
		}

		let mut consumed = self.consumed_states.write();

		match consumed.get(state_value) {
			Some(expires_at) if now < *expires_at => StateConsumeOutcome::AlreadyConsumed,
			Some(_) => {
				consumed.remove(state_value);

				StateConsumeOutcome::NotFound
			},
			None => StateConsumeOutcome::NotFound,
		}
	}

	fn increment_now(&self, key: &str, window: Duration, now: OffsetDateTime) -> WindowSample {
		let mut counters = self.counters.lock();
		let entry = counters
			.entry(key.to_owned())
			.and_modify(|w| {
				if now >= w.expires_at {
					*w = CounterWindow { count: 0, expires_at: now + window };
				}
			})
			.or_insert(CounterWindow { count: 0, expires_at: now + window });

		entry.count += 1;

		WindowSample { count: entry.count, expires_at: entry.expires_at }
	}
}
impl CredentialStore for MemoryStore {
	fn save(&self, record: TokenRecord) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.credentials.write().insert(record.principal.clone(), record);

			Ok(())
		})
	}

	fn fetch<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move { Ok(self.credentials.read().get(principal).cloned()) })
	}

	fn compare_and_swap_generation<'a>(
		&'a self,
		principal: &'a PrincipalId,
		expected_generation: u64,
		replacement: TokenRecord,
	) -> StoreFuture<'a, RotationOutcome> {
		Box::pin(async move {
			let mut guard = self.credentials.write();
			let outcome = match guard.get(principal) {
				Some(existing) if existing.rotation_generation == expected_generation =>
					RotationOutcome::Updated,
				Some(_) => RotationOutcome::GenerationMismatch,
				None => RotationOutcome::Missing,
			};

			if matches!(outcome, RotationOutcome::Updated) {
				guard.insert(principal.clone(), replacement);
			}

			Ok(outcome)
		})
	}

	fn delete<'a>(&'a self, principal: &'a PrincipalId) -> StoreFuture<'a, Option<TokenRecord>> {
		Box::pin(async move { Ok(self.credentials.write().remove(principal)) })
	}

	fn list_principals(&self) -> StoreFuture<'_, Vec<PrincipalId>> {
		Box::pin(async move { Ok(self.credentials.read().keys().cloned().collect()) })
	}
}
impl StateStore for MemoryStore {
	fn put(&self, state: AuthorizationState) -> StoreFuture<'_, ()> {
		Box::pin(async move {
			self.states.write().insert(state.state_value.clone(), state);

			Ok(())
		})
	}

	fn consume<'a>(&'a self, state_value: &'a str) -> StoreFuture<'a, StateConsumeOutcome> {
		Box::pin(async move { Ok(self.consume_now(state_value, OffsetDateTime::now_utc())) })
	}
}
impl EntityCache for MemoryStore {
	fn get<'a>(&'a self, key: &'a str) -> StoreFuture<'a, Option<serde_json::Value>> {
		Box::pin(async move {
			let now = OffsetDateTime::now_utc();

			Ok(self.cache.read().get(key).and_then(|entry| match entry.expires_at {
				Some(expires_at) if now >= expires_at => None,
				_ => Some(entry.value.clone()),
			}))
		})
	}

	fn put<'a>(
		&'a self,
		key: &'a str,
		value: serde_json::Value,
		ttl: Option<Duration>,
	) -> StoreFuture<'a, ()> {
		Box::pin(async move {
			let expires_at = ttl.map(|ttl| OffsetDateTime::now_utc() + ttl);

			self.cache.write().insert(key.to_owned(), CacheEntry { value, expires_at });

			Ok(())
		})
	}

	fn evict<'a>(&'a self, key: &'a str) -> StoreFuture<'a, bool> {
		Box::pin(async move { Ok(self.cache.write().remove(key).is_some()) })
	}
}
impl CounterStore for MemoryStore {
	fn increment<'a>(&'a self, key: &'a str, window: Duration) -> StoreFuture<'a, WindowSample> {
		Box::pin(async move { Ok(self.increment_now(key, window, OffsetDateTime::now_utc())) })
	}
}

/// Counter store stub whose every call fails; exercises fail-open limiter paths in tests.
#[cfg(test)]
#[derive(Clone, Debug, Default)]
pub struct UnreachableCounterStore;
#[cfg(test)]
impl CounterStore for UnreachableCounterStore {
	fn increment<'a>(&'a self, _: &'a str, _: Duration) -> StoreFuture<'a, WindowSample> {
		Box::pin(async move {
			Err(crate::store::StoreError::Backend { message: "counter store unreachable".into() })
		})
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::auth::ScopeSet;

	fn record(principal: &str, generation: u64) -> TokenRecord {
		let mut record = TokenRecord::builder(
			PrincipalId::new(principal).expect("Principal fixture should be valid."),
			ScopeSet::parse("read"),
		)
		.access_token(format!("access-{generation}"))
		.refresh_token(format!("refresh-{generation}"))
		.expires_in(Duration::hours(6))
		.build()
		.expect("Token record fixture should build successfully.");

		record.rotation_generation = generation;

		record
	}

	#[tokio::test]
	async fn generation_cas_guards_rotation() {
		let store = MemoryStore::default();
		let principal = PrincipalId::new("user-1").expect("Principal fixture should be valid.");

		assert_eq!(
			store
				.compare_and_swap_generation(&principal, 0, record("user-1", 1))
				.await
				.expect("CAS against an empty store should not error."),
			RotationOutcome::Missing,
		);

		store.save(record("user-1", 0)).await.expect("Seeding the record should succeed.");

		assert_eq!(
			store
				.compare_and_swap_generation(&principal, 0, record("user-1", 1))
				.await
				.expect("Matching CAS should not error."),
			RotationOutcome::Updated,
		);
		assert_eq!(
			store
				.compare_and_swap_generation(&principal, 0, record("user-1", 1))
				.await
				.expect("Stale CAS should not error."),
			RotationOutcome::GenerationMismatch,
		);

		let stored = store
			.fetch(&principal)
			.await
			.expect("Fetch should succeed.")
			.expect("Record should remain present after CAS.");

		assert_eq!(stored.rotation_generation, 1);
	}

	#[tokio::test]
	async fn state_consumption_is_one_time_and_flags_replay() {
		let store = MemoryStore::default();
		let state = AuthorizationState::issue();
		let value = state.state_value.clone();

		StateStore::put(&store, state).await.expect("State should persist.");

		let first = store.consume(&value).await.expect("First consume should not error.");

		assert!(matches!(first, StateConsumeOutcome::Consumed(_)));

		let second = store.consume(&value).await.expect("Second consume should not error.");

		assert!(matches!(second, StateConsumeOutcome::AlreadyConsumed));
		assert!(matches!(
			store.consume("never-issued").await.expect("Miss should not error."),
			StateConsumeOutcome::NotFound
		));
	}

	#[tokio::test]
	async fn expired_states_consume_as_expired() {
		let store = MemoryStore::default();
		let state = AuthorizationState::issue_at(OffsetDateTime::now_utc() - Duration::hours(1));
		let value = state.state_value.clone();

		StateStore::put(&store, state).await.expect("State should persist.");

		assert!(matches!(
			store.consume(&value).await.expect("Expired consume should not error."),
			StateConsumeOutcome::Expired
		));
	}

	#[tokio::test]
	async fn cache_respects_ttl_and_eviction() {
		let store = MemoryStore::default();

		EntityCache::put(&store, "item:MLB1", serde_json::json!({"id": "MLB1"}), None)
			.await
			.expect("Cache put should succeed.");

		assert!(store.get("item:MLB1").await.expect("Cache get should succeed.").is_some());
		assert!(store.evict("item:MLB1").await.expect("Evict should succeed."));
		assert!(!store.evict("item:MLB1").await.expect("Second evict should succeed."));

		EntityCache::put(&store, "item:MLB2", serde_json::json!({"id": "MLB2"}), Some(Duration::seconds(-1)))
			.await
			.expect("Cache put with TTL should succeed.");

		assert!(store.get("item:MLB2").await.expect("Cache get should succeed.").is_none());
	}

	#[tokio::test]
	async fn counter_windows_reset_after_expiry() {
		let store = MemoryStore::default();
		let now = OffsetDateTime::now_utc();
		let first = store.increment_now("ip:1.2.3.4", Duration::seconds(60), now);
		let second = store.increment_now("ip:1.2.3.4", Duration::seconds(60), now);

		assert_eq!(first.count, 1);
		assert_eq!(second.count, 2);
		assert_eq!(first.expires_at, second.expires_at);

		let after_window = store.increment_now("ip:1.2.3.4", Duration::seconds(60), now + Duration::seconds(61));

		assert_eq!(after_window.count, 1);
	}
}
