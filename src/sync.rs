//! Topic-routed cache synchronization driven by webhook events.
//!
//! Dispatch is keyed by a closed [`Topic`] enum with an explicit default arm: unknown
//! topics are logged and acknowledged as no-ops so new provider topics never break
//! ingestion. Every handler isolates its failures—one topic's error neither blocks
//! the gateway's acknowledgment nor corrupts unrelated entities—and the eviction
//! before refetch ordering guarantees a failed refetch leaves an entity absent (a
//! cache-miss cost for the next reader) instead of stale.

// self
use crate::{
	_prelude::*,
	auth::{EntityId, PrincipalId, TokenRecord},
	marketplace::MarketplaceClient,
	store::{CredentialStore, EntityCache},
};

type BoxError = Box<dyn StdError + Send + Sync>;

const DEFAULT_CACHE_TTL: Duration = Duration::hours(1);

/// Webhook topics routed by the synchronizer.
#[derive(Clone, Debug, PartialEq, Eq, Hash)]
pub enum Topic {
	/// Item/listing changes.
	Items,
	/// Buyer questions.
	Questions,
	/// Order lifecycle events.
	OrdersV2,
	/// Buyer/seller messages; observability-only.
	Messages,
	/// Price suggestions; observability-only.
	PriceSuggestion,
	/// Any topic this crate does not handle; acknowledged as a no-op.
	Unknown(String),
}
impl Topic {
	/// Topics with a cache effect, as advertised by the health descriptor.
	pub const SUPPORTED: [&'static str; 5] =
		["items", "questions", "orders_v2", "messages", "price_suggestion"];

	/// Parses a provider topic string; unrecognized values stay routable as no-ops.
	pub fn parse(raw: &str) -> Self {
		match raw {
			"items" => Topic::Items,
			"questions" => Topic::Questions,
			"orders_v2" => Topic::OrdersV2,
			"messages" => Topic::Messages,
			"price_suggestion" => Topic::PriceSuggestion,
			other => Topic::Unknown(other.to_owned()),
		}
	}

	/// Returns the wire label for the topic.
	pub fn as_str(&self) -> &str {
		match self {
			Topic::Items => "items",
			Topic::Questions => "questions",
			Topic::OrdersV2 => "orders_v2",
			Topic::Messages => "messages",
			Topic::PriceSuggestion => "price_suggestion",
			Topic::Unknown(raw) => raw,
		}
	}
}
impl Display for Topic {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// One webhook delivery, already validated by the gateway.
///
/// Events are transient—nothing is persisted beyond processing—and the
/// `(topic, resource)` tuple is the idempotency key: processing the same tuple twice
/// converges the cache to the same state.
#[derive(Clone, Debug)]
pub struct WebhookEvent {
	/// Correlation identifier assigned at reception.
	pub id: String,
	/// Routed topic.
	pub topic: Topic,
	/// Resource path carrying the entity id (e.g. `/items/MLB123`).
	pub resource: String,
	/// Principal the delivery belongs to.
	pub principal: PrincipalId,
	/// Provider-reported delivery attempt count.
	pub attempt: u32,
	/// Instant the provider sent the delivery, when reported.
	pub sent_at: Option<OffsetDateTime>,
	/// Instant the gateway received the delivery.
	pub received_at: OffsetDateTime,
}
impl WebhookEvent {
	/// Extracts the entity id from the trailing resource path segment.
	pub fn entity_id(&self) -> Option<EntityId> {
		self.resource
			.rsplit('/')
			.find(|segment| !segment.is_empty())
			.and_then(|segment| EntityId::new(segment).ok())
	}
}

/// Cache key for an item snapshot.
pub fn item_key(id: &EntityId) -> String {
	format!("item:{id}")
}

/// Cache key for an item's question list.
pub fn question_list_key(item: &EntityId) -> String {
	format!("questions:{item}")
}

/// Boxed future returned by [`Revalidator::revalidate`].
pub type RevalidateFuture<'a> = Pin<Box<dyn Future<Output = Result<(), BoxError>> + 'a + Send>>;

/// Collaborator hook that regenerates pre-rendered pages after a cache change.
///
/// Failures are logged and never fatal; the next request simply pays a render miss.
pub trait Revalidator
where
	Self: Send + Sync,
{
	/// Requests regeneration of the page at `path`.
	fn revalidate<'a>(&'a self, path: &'a str) -> RevalidateFuture<'a>;
}

/// Revalidator that does nothing; for embedders without a page cache.
#[derive(Clone, Debug, Default)]
pub struct NoopRevalidator;
impl Revalidator for NoopRevalidator {
	fn revalidate<'a>(&'a self, _: &'a str) -> RevalidateFuture<'a> {
		Box::pin(async move { Ok(()) })
	}
}

/// Terminal verdict for one processed event.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind", content = "detail")]
pub enum SyncOutcome {
	/// The cache converged on fresh data.
	Synchronized,
	/// The event carried no cache effect (pass-through or unknown topic, or an order
	/// status outside the settlement set).
	Observed(String),
	/// Processing was skipped for a benign reason (e.g. no token for the principal).
	Skipped(String),
	/// Part of the work failed; affected entities stay evicted rather than stale.
	PartialFailure(String),
}

/// Structured result of routing one webhook event.
#[derive(Clone, Debug, Serialize)]
pub struct SyncReport {
	/// Wire label of the routed topic.
	pub topic: String,
	/// Terminal verdict.
	pub outcome: SyncOutcome,
	/// Cache keys evicted while processing.
	pub invalidated: Vec<String>,
	/// Number of entries re-populated from the marketplace.
	pub refetched: usize,
	/// Page paths whose revalidation was requested successfully.
	pub revalidated: Vec<String>,
}
impl SyncReport {
	fn new(topic: &Topic, outcome: SyncOutcome) -> Self {
		Self {
			topic: topic.as_str().to_owned(),
			outcome,
			invalidated: Vec::new(),
			refetched: 0,
			revalidated: Vec::new(),
		}
	}
}

/// Routes webhook events to per-topic cache handlers.
#[derive(Clone)]
pub struct CacheSynchronizer {
	credentials: Arc<dyn CredentialStore>,
	marketplace: Arc<dyn MarketplaceClient>,
	cache: Arc<dyn EntityCache>,
	revalidator: Arc<dyn Revalidator>,
	cache_ttl: Duration,
}
impl CacheSynchronizer {
	/// Creates a synchronizer over the provided seams.
	pub fn new(
		credentials: Arc<dyn CredentialStore>,
		marketplace: Arc<dyn MarketplaceClient>,
		cache: Arc<dyn EntityCache>,
		revalidator: Arc<dyn Revalidator>,
	) -> Self {
		Self { credentials, marketplace, cache, revalidator, cache_ttl: DEFAULT_CACHE_TTL }
	}

	/// Overrides the TTL applied to refetched cache entries.
	pub fn with_cache_ttl(mut self, ttl: Duration) -> Self {
		self.cache_ttl = ttl;

		self
	}

	/// Dispatches the event by topic; never fails—handler errors fold into the report.
	pub async fn process(&self, event: &WebhookEvent) -> SyncReport {
		match &event.topic {
			Topic::Items => self.handle_items(event).await,
			Topic::Questions => self.handle_questions(event).await,
			Topic::OrdersV2 => self.handle_orders(event).await,
			Topic::Messages | Topic::PriceSuggestion => {
				tracing::debug!(
					target: "marketplace_sync.sync",
					event_id = event.id,
					topic = %event.topic,
					resource = event.resource,
					"Pass-through topic observed.",
				);

				SyncReport::new(&event.topic, SyncOutcome::Observed("pass-through topic".into()))
			},
			Topic::Unknown(raw) => {
				tracing::info!(
					target: "marketplace_sync.sync",
					event_id = event.id,
					topic = raw,
					resource = event.resource,
					"Unknown topic acknowledged as a no-op.",
				);

				SyncReport::new(&event.topic, SyncOutcome::Observed("unknown topic".into()))
			},
		}
	}

	async fn handle_items(&self, event: &WebhookEvent) -> SyncReport {
		let mut report = SyncReport::new(&event.topic, SyncOutcome::Synchronized);
		let Some(entity) = event.entity_id() else {
			report.outcome =
				SyncOutcome::PartialFailure("resource path carries no entity id".into());

			return report;
		};
		let key = item_key(&entity);

		// Eviction comes first and stands alone: whatever happens to the refetch, the
		// next reader sees a miss instead of stale data.
		match self.cache.evict(&key).await {
			Ok(_) => report.invalidated.push(key.clone()),
			Err(err) => {
				report.outcome = SyncOutcome::PartialFailure(format!("eviction failed: {err}"));

				return report;
			},
		}

		match self.refetch_item(event, &entity, &key).await {
			Ok(()) => report.refetched += 1,
			Err(detail) => {
				tracing::warn!(
					target: "marketplace_sync.sync",
					event_id = event.id,
					entity = %entity,
					detail,
					"Item refetch failed; entity stays evicted.",
				);

				report.outcome = SyncOutcome::PartialFailure(detail);
			},
		}

		for path in [format!("/items/{entity}"), "/".to_owned()] {
			self.try_revalidate(event, &path, &mut report).await;
		}

		report
	}

	async fn handle_questions(&self, event: &WebhookEvent) -> SyncReport {
		let mut report = SyncReport::new(&event.topic, SyncOutcome::Synchronized);
		let Some(record) = self.token_for(event, &mut report).await else {
			return report;
		};
		let Some(question) = event.entity_id() else {
			report.outcome =
				SyncOutcome::PartialFailure("resource path carries no question id".into());

			return report;
		};
		// The delivery names the question; the owning item comes from the detail fetch.
		let item = match self
			.marketplace
			.question(record.access_token.expose(), &question)
			.await
		{
			Ok(detail) => detail.item_id,
			Err(err) => {
				report.outcome =
					SyncOutcome::PartialFailure(format!("question lookup failed: {err}"));

				return report;
			},
		};
		let key = question_list_key(&item);

		match self.cache.evict(&key).await {
			Ok(_) => report.invalidated.push(key.clone()),
			Err(err) => {
				report.outcome = SyncOutcome::PartialFailure(format!("eviction failed: {err}"));

				return report;
			},
		}

		match self.marketplace.question_search(record.access_token.expose(), &item).await {
			Ok(listing) => match self.cache.put(&key, listing, Some(self.cache_ttl)).await {
				Ok(()) => report.refetched += 1,
				Err(err) => {
					report.outcome =
						SyncOutcome::PartialFailure(format!("cache write failed: {err}"));
				},
			},
			Err(err) => {
				tracing::warn!(
					target: "marketplace_sync.sync",
					event_id = event.id,
					item = %item,
					error = %err,
					"Question list refetch failed; list stays evicted.",
				);

				report.outcome =
					SyncOutcome::PartialFailure(format!("question list refetch failed: {err}"));
			},
		}

		self.try_revalidate(event, &format!("/items/{item}"), &mut report).await;

		report
	}

	async fn handle_orders(&self, event: &WebhookEvent) -> SyncReport {
		let mut report = SyncReport::new(&event.topic, SyncOutcome::Synchronized);
		let Some(record) = self.token_for(event, &mut report).await else {
			return report;
		};
		let Some(order_id) = event.entity_id() else {
			report.outcome =
				SyncOutcome::PartialFailure("resource path carries no order id".into());

			return report;
		};
		let order = match self.marketplace.order(record.access_token.expose(), &order_id).await {
			Ok(order) => order,
			Err(err) => {
				report.outcome = SyncOutcome::PartialFailure(format!("order fetch failed: {err}"));

				return report;
			},
		};

		if !order.status.settles_inventory() {
			report.outcome = SyncOutcome::Observed("order status carries no cache effect".into());

			return report;
		}

		// The one fan-out case: a settled order invalidates every referenced item.
		let mut failures = 0_usize;

		for line in &order.order_items {
			let key = item_key(&line.item.id);

			match self.cache.evict(&key).await {
				Ok(_) => report.invalidated.push(key),
				Err(err) => {
					failures += 1;

					tracing::warn!(
						target: "marketplace_sync.sync",
						event_id = event.id,
						entity = %line.item.id,
						error = %err,
						"Order fan-out eviction failed for one entity; continuing.",
					);
				},
			}
		}

		if failures > 0 {
			report.outcome =
				SyncOutcome::PartialFailure(format!("{failures} fan-out eviction(s) failed"));
		}

		report
	}

	async fn refetch_item(
		&self,
		event: &WebhookEvent,
		entity: &EntityId,
		key: &str,
	) -> Result<(), String> {
		let record = self
			.credentials
			.fetch(&event.principal)
			.await
			.map_err(|err| format!("credential lookup failed: {err}"))?
			.ok_or_else(|| "no token data for principal".to_owned())?;
		let snapshot = self
			.marketplace
			.item(record.access_token.expose(), entity)
			.await
			.map_err(|err| format!("item fetch failed: {err}"))?;

		self.cache
			.put(key, snapshot, Some(self.cache_ttl))
			.await
			.map_err(|err| format!("cache write failed: {err}"))
	}

	async fn token_for(
		&self,
		event: &WebhookEvent,
		report: &mut SyncReport,
	) -> Option<TokenRecord> {
		match self.credentials.fetch(&event.principal).await {
			Ok(Some(record)) => Some(record),
			Ok(None) => {
				tracing::info!(
					target: "marketplace_sync.sync",
					event_id = event.id,
					principal = %event.principal,
					topic = %event.topic,
					"No token data for principal; skipping.",
				);

				report.outcome = SyncOutcome::Skipped("no token data for principal".into());

				None
			},
			Err(err) => {
				report.outcome =
					SyncOutcome::PartialFailure(format!("credential lookup failed: {err}"));

				None
			},
		}
	}

	async fn try_revalidate(&self, event: &WebhookEvent, path: &str, report: &mut SyncReport) {
		match self.revalidator.revalidate(path).await {
			Ok(()) => report.revalidated.push(path.to_owned()),
			Err(err) => tracing::warn!(
				target: "marketplace_sync.sync",
				event_id = event.id,
				path,
				error = %err,
				"Page revalidation failed; non-fatal.",
			),
		}
	}
}
impl Debug for CacheSynchronizer {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("CacheSynchronizer").field("cache_ttl", &self.cache_ttl).finish()
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn topic_parsing_is_total() {
		assert_eq!(Topic::parse("items"), Topic::Items);
		assert_eq!(Topic::parse("orders_v2"), Topic::OrdersV2);
		assert_eq!(Topic::parse("shipments"), Topic::Unknown("shipments".into()));
		assert_eq!(Topic::parse("shipments").as_str(), "shipments");
	}

	#[test]
	fn entity_id_comes_from_the_trailing_segment() {
		let event = WebhookEvent {
			id: "evt-1".into(),
			topic: Topic::Items,
			resource: "/items/MLB123".into(),
			principal: PrincipalId::new("user-1").expect("Principal fixture should be valid."),
			attempt: 1,
			sent_at: None,
			received_at: OffsetDateTime::now_utc(),
		};

		assert_eq!(
			event.entity_id().expect("Resource should yield an entity id.").as_ref(),
			"MLB123"
		);

		let trailing_slash = WebhookEvent { resource: "/items/MLB9/".into(), ..event.clone() };

		assert_eq!(
			trailing_slash.entity_id().expect("Trailing slash should be tolerated.").as_ref(),
			"MLB9"
		);

		let empty = WebhookEvent { resource: "///".into(), ..event };

		assert!(empty.entity_id().is_none());
	}

	#[test]
	fn cache_keys_are_namespaced() {
		let id = EntityId::new("MLB123").expect("Entity fixture should be valid.");

		assert_eq!(item_key(&id), "item:MLB123");
		assert_eq!(question_list_key(&id), "questions:MLB123");
	}
}
