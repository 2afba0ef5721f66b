//! Distributed sliding-window rate limiter shared by every call site.
//!
//! Counters live behind the [`CounterStore`] seam as a single atomic increment-and-read,
//! so concurrent callers on the same key never race in application code. An unreachable
//! counter store fails open: the request is allowed and a warning is emitted, trading
//! strict enforcement for availability. IP allowlisting and CSRF checks are the only
//! fail-closed paths in the crate; see [`gateway`](crate::gateway).

// self
use crate::{
	_prelude::*,
	store::{CounterStore, WindowSample},
};

/// Independent rate-limit key namespaces, each with its own quota.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Dimension {
	/// Per-source-IP budget.
	Ip,
	/// Per-authenticated-user budget.
	User,
	/// Per-endpoint budget.
	Endpoint,
	/// Login attempt budget.
	Login,
	/// Webhook delivery budget (observed, not enforced at the gateway).
	Webhook,
	/// Unauthenticated public traffic budget.
	Public,
	/// OAuth token endpoint budget.
	Auth,
}
impl Dimension {
	/// Returns the stable key prefix for the dimension.
	pub const fn as_str(self) -> &'static str {
		match self {
			Dimension::Ip => "ip",
			Dimension::User => "user",
			Dimension::Endpoint => "endpoint",
			Dimension::Login => "login",
			Dimension::Webhook => "webhook",
			Dimension::Public => "public",
			Dimension::Auth => "auth",
		}
	}

	const ALL: [Dimension; 7] = [
		Dimension::Ip,
		Dimension::User,
		Dimension::Endpoint,
		Dimension::Login,
		Dimension::Webhook,
		Dimension::Public,
		Dimension::Auth,
	];

	const fn default_quota(self) -> Quota {
		match self {
			Dimension::Ip => Quota::new(100, Duration::seconds(60)),
			Dimension::User => Quota::new(60, Duration::seconds(60)),
			Dimension::Endpoint => Quota::new(30, Duration::seconds(60)),
			Dimension::Login => Quota::new(5, Duration::seconds(300)),
			Dimension::Webhook => Quota::new(120, Duration::seconds(60)),
			Dimension::Public => Quota::new(60, Duration::seconds(60)),
			Dimension::Auth => Quota::new(10, Duration::seconds(60)),
		}
	}
}
impl Display for Dimension {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Limit + window pair applied to one dimension.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Quota {
	/// Maximum hits allowed within one window.
	pub limit: u64,
	/// Window length; also the TTL set on first hit.
	pub window: Duration,
}
impl Quota {
	/// Creates a quota for the provided limit/window pair.
	pub const fn new(limit: u64, window: Duration) -> Self {
		Self { limit, window }
	}
}

/// Injected per-dimension quota table.
#[derive(Clone, Debug)]
pub struct QuotaConfig(HashMap<Dimension, Quota>);
impl QuotaConfig {
	/// Overrides the quota for one dimension.
	pub fn with_quota(mut self, dimension: Dimension, quota: Quota) -> Self {
		self.0.insert(dimension, quota);

		self
	}

	/// Returns the quota for the dimension.
	pub fn quota(&self, dimension: Dimension) -> Quota {
		self.0.get(&dimension).copied().unwrap_or_else(|| dimension.default_quota())
	}
}
impl Default for QuotaConfig {
	fn default() -> Self {
		Self(Dimension::ALL.into_iter().map(|d| (d, d.default_quota())).collect())
	}
}

/// Verdict returned by [`RateLimiter::allow`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitDecision {
	/// Whether the hit stayed within the quota.
	pub allowed: bool,
	/// Quota limit applied to the key.
	pub limit: u64,
	/// Total hits recorded within the current window, including this one.
	pub total_hits: u64,
	/// Instant the window resets.
	pub reset_at: OffsetDateTime,
	/// Remaining window time, populated only on rejection.
	pub retry_after: Option<Duration>,
}
impl RateLimitDecision {
	/// Hits left before the quota rejects, for `X-RateLimit-Remaining` style surfaces.
	pub fn remaining(&self) -> u64 {
		self.limit.saturating_sub(self.total_hits)
	}
}

/// Sliding-window limiter over an atomic counter store.
#[derive(Clone)]
pub struct RateLimiter {
	counters: Arc<dyn CounterStore>,
	quotas: QuotaConfig,
}
impl RateLimiter {
	/// Creates a limiter over the provided counter store and quota table.
	pub fn new(counters: Arc<dyn CounterStore>, quotas: QuotaConfig) -> Self {
		Self { counters, quotas }
	}

	/// Records a hit for `dimension:identifier` and returns the verdict.
	pub async fn allow(&self, dimension: Dimension, identifier: &str) -> RateLimitDecision {
		let quota = self.quotas.quota(dimension);
		let key = format!("{}:{identifier}", dimension.as_str());

		self.allow_key(&key, quota.limit, quota.window).await
	}

	/// Records a hit for a raw composite key with an explicit limit/window.
	pub async fn allow_key(&self, key: &str, limit: u64, window: Duration) -> RateLimitDecision {
		match self.counters.increment(key, window).await {
			Ok(sample) => Self::decide(sample, limit),
			Err(err) => {
				tracing::warn!(
					target: "marketplace_sync.limit",
					key,
					error = %err,
					"Counter store unreachable; failing open.",
				);

				RateLimitDecision {
					allowed: true,
					limit,
					total_hits: 0,
					reset_at: OffsetDateTime::now_utc() + window,
					retry_after: None,
				}
			},
		}
	}

	fn decide(sample: WindowSample, limit: u64) -> RateLimitDecision {
		let allowed = sample.count <= limit;
		let retry_after = if allowed {
			None
		} else {
			let remaining = sample.expires_at - OffsetDateTime::now_utc();

			Some(if remaining.is_positive() { remaining } else { Duration::ZERO })
		};

		RateLimitDecision {
			allowed,
			limit,
			total_hits: sample.count,
			reset_at: sample.expires_at,
			retry_after,
		}
	}
}
impl Debug for RateLimiter {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("RateLimiter").field("quotas", &self.quotas).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::store::{MemoryStore, memory::UnreachableCounterStore};

	fn limiter() -> RateLimiter {
		RateLimiter::new(Arc::new(MemoryStore::default()), QuotaConfig::default())
	}

	#[tokio::test]
	async fn nth_plus_one_hit_is_rejected_with_retry_hint() {
		let limiter = limiter();

		for hit in 1..=3 {
			let decision = limiter.allow_key("ip:1.2.3.4", 3, Duration::seconds(60)).await;

			assert!(decision.allowed, "Hit {hit} should stay within the quota.");
			assert_eq!(decision.total_hits, hit);
		}

		let rejected = limiter.allow_key("ip:1.2.3.4", 3, Duration::seconds(60)).await;

		assert!(!rejected.allowed);
		assert_eq!(rejected.total_hits, 4);
		assert_eq!(rejected.remaining(), 0);
		assert!(
			rejected.retry_after.expect("Rejection should carry a retry hint.").is_positive(),
			"Retry hint should cover the remaining window.",
		);
	}

	#[tokio::test]
	async fn dimensions_use_independent_namespaces() {
		let limiter = RateLimiter::new(
			Arc::new(MemoryStore::default()),
			QuotaConfig::default().with_quota(Dimension::Login, Quota::new(1, Duration::seconds(60))),
		);

		assert!(limiter.allow(Dimension::Login, "1.2.3.4").await.allowed);
		assert!(!limiter.allow(Dimension::Login, "1.2.3.4").await.allowed);
		// The same identifier under another dimension has its own counter.
		assert!(limiter.allow(Dimension::Ip, "1.2.3.4").await.allowed);
	}

	#[tokio::test]
	async fn unreachable_counter_store_fails_open() {
		let limiter =
			RateLimiter::new(Arc::new(UnreachableCounterStore), QuotaConfig::default());

		for _ in 0..10 {
			assert!(limiter.allow(Dimension::Auth, "user-1").await.allowed);
		}
	}
}
