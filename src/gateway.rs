//! Webhook ingestion gateway: IP allowlisting, payload validation, and fast acks.
//!
//! The provider contract is "acknowledge quickly or be retried": once a delivery passes
//! the allowlist and carries the required fields, the gateway always answers 200, even
//! when downstream synchronization failed—the error travels in the ack body, never the
//! status code. The allowlist is the one fail-closed check; it runs before any parsing
//! so off-list sources learn nothing about the payload schema.

// std
use std::time::Instant;
// crates.io
use ipnetwork::IpNetwork;
use rand::{Rng, distr::Alphanumeric};
use serde_json::{Value, json};
// self
use crate::{
	_prelude::*,
	auth::PrincipalId,
	error::ConfigError,
	limit::{Dimension, RateLimiter},
	obs::{self, FlowKind, FlowOutcome, FlowSpan, SecurityEventKind},
	sync::{CacheSynchronizer, SyncOutcome, Topic, WebhookEvent},
};

/// Processing budget per delivery; overruns are logged as capacity warnings, never
/// aborted—the provider's retry clock is the hard deadline, this is the early alarm.
pub const ACK_BUDGET: std::time::Duration = std::time::Duration::from_millis(500);

const EVENT_ID_LEN: usize = 16;

/// Published egress addresses webhook deliveries originate from.
const PROVIDER_SOURCE_RANGES: [&str; 4] =
	["54.88.218.97/32", "18.215.140.160/32", "18.213.114.129/32", "18.206.34.84/32"];

/// CIDR allowlist matched against the extracted client IP.
#[derive(Clone, Debug)]
pub struct IpAllowlist(Vec<IpNetwork>);
impl IpAllowlist {
	/// Parses an allowlist from CIDR (or bare-address) entries.
	///
	/// Fails on the first malformed entry; a silently shrunken allowlist would reject
	/// legitimate deliveries in production.
	pub fn parse<I, S>(entries: I) -> Result<Self, ConfigError>
	where
		I: IntoIterator<Item = S>,
		S: AsRef<str>,
	{
		entries
			.into_iter()
			.map(|entry| {
				let entry = entry.as_ref();

				entry
					.parse::<IpNetwork>()
					.map_err(|_| ConfigError::InvalidAllowlistEntry { entry: entry.to_owned() })
			})
			.collect::<Result<_, _>>()
			.map(Self)
	}

	/// Returns the provider's published source ranges.
	pub fn provider_default() -> Self {
		Self::parse(PROVIDER_SOURCE_RANGES)
			.expect("Published provider source ranges should always parse.")
	}

	/// Checks membership of an address against every configured range.
	pub fn contains(&self, ip: IpAddr) -> bool {
		self.0.iter().any(|network| network.contains(ip))
	}
}

/// Extracts the client IP with proxy-aware precedence.
///
/// The first `X-Forwarded-For` entry wins, then `X-Real-IP`, then the socket peer.
/// Header names must be lowercased by the embedder. Unparsable header values fall
/// through to the next source rather than failing the request.
pub fn extract_client_ip(headers: &HashMap<String, String>, peer: IpAddr) -> IpAddr {
	headers
		.get("x-forwarded-for")
		.and_then(|forwarded| forwarded.split(',').next())
		.and_then(|first| first.trim().parse().ok())
		.or_else(|| headers.get("x-real-ip").and_then(|real| real.trim().parse().ok()))
		.unwrap_or(peer)
}

/// Allowlist verdict for one delivery.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct IpCheck {
	/// Whether the source passed the allowlist (always `true` when unenforced).
	pub valid: bool,
	/// The IP the verdict was computed against.
	pub client_ip: IpAddr,
	/// Rejection detail, populated only on failure.
	pub error: Option<String>,
}

/// One transport-agnostic webhook delivery handed to [`WebhookGateway::handle`].
#[derive(Clone, Debug)]
pub struct WebhookRequest {
	/// Request headers with lowercased names.
	pub headers: HashMap<String, String>,
	/// Socket peer address.
	pub peer: IpAddr,
	/// Raw request body.
	pub body: Vec<u8>,
}

/// Response the embedder should translate into HTTP.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct WebhookAck {
	/// HTTP status the embedder must answer with.
	pub status: u16,
	/// JSON response body.
	pub body: Value,
}

#[derive(Debug, Deserialize)]
struct WebhookPayload {
	topic: String,
	resource: String,
	#[serde(deserialize_with = "deserialize_user_id")]
	user_id: String,
	attempts: u32,
	#[serde(default)]
	sent: Option<String>,
	#[serde(default)]
	#[allow(dead_code)]
	received: Option<String>,
}

// The provider sends `user_id` as a JSON number; tolerate strings as well.
fn deserialize_user_id<'de, D>(deserializer: D) -> Result<String, D::Error>
where
	D: serde::Deserializer<'de>,
{
	match Value::deserialize(deserializer)? {
		Value::String(s) => Ok(s),
		Value::Number(n) => Ok(n.to_string()),
		other => Err(serde::de::Error::custom(format!(
			"user_id must be a string or number, got {other}"
		))),
	}
}

/// Validates, routes, and acknowledges webhook deliveries.
#[derive(Clone, Debug)]
pub struct WebhookGateway {
	allowlist: IpAllowlist,
	enforce: bool,
	synchronizer: Arc<CacheSynchronizer>,
	limiter: Arc<RateLimiter>,
}
impl WebhookGateway {
	/// Creates a gateway with allowlist enforcement on.
	pub fn new(
		allowlist: IpAllowlist,
		synchronizer: Arc<CacheSynchronizer>,
		limiter: Arc<RateLimiter>,
	) -> Self {
		Self { allowlist, enforce: true, synchronizer, limiter }
	}

	/// Toggles allowlist enforcement; when off, misses are logged but still processed.
	pub fn with_enforcement(mut self, enforce: bool) -> Self {
		self.enforce = enforce;

		self
	}

	/// Computes the allowlist verdict without processing the delivery.
	pub fn validate(&self, headers: &HashMap<String, String>, peer: IpAddr) -> IpCheck {
		let client_ip = extract_client_ip(headers, peer);

		if self.allowlist.contains(client_ip) {
			IpCheck { valid: true, client_ip, error: None }
		} else {
			IpCheck {
				valid: !self.enforce,
				client_ip,
				error: Some(format!("source {client_ip} is outside the provider allowlist")),
			}
		}
	}

	/// Processes one delivery end to end and returns the ack the embedder must send.
	///
	/// Status policy: 403 only for an enforced allowlist miss, 400 only for an
	/// unparsable body or missing required fields, 200 for everything else—including
	/// synchronization failures, which are reported in the body so the provider never
	/// re-delivers an event this crate already saw.
	pub async fn handle(&self, request: WebhookRequest) -> WebhookAck {
		const KIND: FlowKind = FlowKind::Webhook;

		let span = FlowSpan::new(KIND, "handle");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let started = Instant::now();
		let ack = span.instrument(self.handle_inner(request, started)).await;

		match ack.status {
			200 => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			_ => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		let elapsed = started.elapsed();

		if elapsed > ACK_BUDGET {
			tracing::warn!(
				target: "marketplace_sync.gateway",
				elapsed_ms = elapsed.as_millis() as u64,
				budget_ms = ACK_BUDGET.as_millis() as u64,
				"Delivery processing exceeded the ack budget; capacity warning.",
			);
		}

		ack
	}

	async fn handle_inner(&self, request: WebhookRequest, started: Instant) -> WebhookAck {
		let client_ip = extract_client_ip(&request.headers, request.peer);

		if !self.allowlist.contains(client_ip) {
			if self.enforce {
				obs::record_security_event(
					SecurityEventKind::IpRejected,
					&client_ip.to_string(),
					"webhook source outside the provider allowlist",
				);

				return WebhookAck { status: 403, body: json!({ "error": "forbidden" }) };
			}

			tracing::warn!(
				target: "marketplace_sync.gateway",
				client_ip = %client_ip,
				"Allowlist miss with enforcement off; processing anyway.",
			);
		}

		// Delivery volume per source is observed for capacity planning; the provider
		// retries on anything but a 200, so the quota is never enforced here.
		let decision = self.limiter.allow(Dimension::Webhook, &client_ip.to_string()).await;

		if !decision.allowed {
			tracing::warn!(
				target: "marketplace_sync.gateway",
				client_ip = %client_ip,
				total_hits = decision.total_hits,
				limit = decision.limit,
				"Webhook volume exceeded the observation quota.",
			);
		}

		let mut deserializer = serde_json::Deserializer::from_slice(&request.body);
		let payload = match serde_path_to_error::deserialize::<_, WebhookPayload>(
			&mut deserializer,
		) {
			Ok(payload) => payload,
			Err(err) => {
				tracing::debug!(
					target: "marketplace_sync.gateway",
					client_ip = %client_ip,
					error = %err,
					"Rejecting malformed delivery.",
				);

				return WebhookAck {
					status: 400,
					body: json!({ "error": format!("invalid payload: {err}") }),
				};
			},
		};
		let principal = match PrincipalId::new(&payload.user_id) {
			Ok(principal) => principal,
			Err(err) =>
				return WebhookAck {
					status: 400,
					body: json!({ "error": format!("invalid user_id: {err}") }),
				},
		};
		let event = WebhookEvent {
			id: rand::rng()
				.sample_iter(Alphanumeric)
				.take(EVENT_ID_LEN)
				.map(char::from)
				.collect(),
			topic: Topic::parse(&payload.topic),
			resource: payload.resource,
			principal,
			attempt: payload.attempts,
			sent_at: payload.sent.as_deref().and_then(parse_provider_timestamp),
			received_at: OffsetDateTime::now_utc(),
		};

		tracing::info!(
			target: "marketplace_sync.gateway",
			event_id = event.id,
			topic = %event.topic,
			resource = event.resource,
			attempt = event.attempt,
			client_ip = %client_ip,
			"Delivery accepted.",
		);

		let report = self.synchronizer.process(&event).await;
		let ok = !matches!(report.outcome, SyncOutcome::PartialFailure(_));
		let processing_time_ms = started.elapsed().as_millis() as u64;

		WebhookAck {
			status: 200,
			body: json!({
				"ok": ok,
				"topic": report.topic,
				"processing_time_ms": processing_time_ms,
				"report": report,
			}),
		}
	}

	/// Health descriptor the embedder can expose on a probe endpoint.
	pub fn health(&self) -> Value {
		json!({
			"status": "ok",
			"enforcing_allowlist": self.enforce,
			"supported_topics": Topic::SUPPORTED,
		})
	}
}

fn parse_provider_timestamp(raw: &str) -> Option<OffsetDateTime> {
	OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc3339).ok()
}
