//! Marketplace REST client contract and the default reqwest-backed transport.
//!
//! Everything above this module depends only on [`MarketplaceClient`], so tests and
//! embedders can swap transports freely. The reqwest implementation owns the OAuth
//! client credentials, applies explicit connect/request timeouts, and never follows
//! redirects on the token endpoint, matching OAuth 2.0 guidance that token endpoints
//! return results directly.

// self
use crate::{_prelude::*, auth::EntityId};

type BoxError = Box<dyn StdError + Send + Sync>;

/// Boxed future returned by [`MarketplaceClient`] methods.
pub type MarketplaceFuture<'a, T> =
	Pin<Box<dyn Future<Output = Result<T, MarketplaceError>> + 'a + Send>>;

/// Outbound REST surface of the marketplace, reduced to what the sync core consumes.
pub trait MarketplaceClient
where
	Self: Send + Sync,
{
	/// Exchanges an authorization code (plus PKCE verifier) for a token grant.
	fn exchange_code<'a>(
		&'a self,
		code: &'a str,
		verifier: &'a str,
		redirect_uri: &'a Url,
	) -> MarketplaceFuture<'a, TokenGrant>;

	/// Performs a `refresh_token` grant with the provided (stored) refresh token.
	fn refresh_token<'a>(&'a self, refresh_token: &'a str) -> MarketplaceFuture<'a, TokenGrant>;

	/// Fetches an item snapshot.
	fn item<'a>(
		&'a self,
		access_token: &'a str,
		id: &'a EntityId,
	) -> MarketplaceFuture<'a, serde_json::Value>;

	/// Fetches a question detail, resolving the owning item.
	fn question<'a>(
		&'a self,
		access_token: &'a str,
		id: &'a EntityId,
	) -> MarketplaceFuture<'a, QuestionDetail>;

	/// Fetches an order with its referenced items.
	fn order<'a>(
		&'a self,
		access_token: &'a str,
		id: &'a EntityId,
	) -> MarketplaceFuture<'a, OrderDetail>;

	/// Fetches the question list for an item.
	fn question_search<'a>(
		&'a self,
		access_token: &'a str,
		item: &'a EntityId,
	) -> MarketplaceFuture<'a, serde_json::Value>;
}

/// Wire response from the marketplace token endpoint (both grant types).
#[derive(Clone, Debug, Deserialize)]
pub struct TokenGrant {
	/// Issued access token.
	pub access_token: String,
	/// Rotated refresh token; the marketplace issues one on every grant.
	pub refresh_token: Option<String>,
	/// Token type, `bearer` in practice.
	pub token_type: Option<String>,
	/// Relative expiry in seconds.
	pub expires_in: Option<i64>,
	/// Space-delimited scope string.
	pub scope: Option<String>,
}

/// Question detail payload, reduced to the fields the synchronizer routes on.
#[derive(Clone, Debug, Deserialize)]
pub struct QuestionDetail {
	/// Question identifier.
	pub id: serde_json::Value,
	/// Item that owns the question.
	pub item_id: EntityId,
}

/// Order status values that trigger cache fan-out.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
	/// Payment settled.
	Paid,
	/// Order confirmed.
	Confirmed,
	/// Any other status; carries no cache effect.
	#[serde(other)]
	Other,
}
impl OrderStatus {
	/// Returns `true` when the status should invalidate the referenced items.
	pub fn settles_inventory(self) -> bool {
		matches!(self, OrderStatus::Paid | OrderStatus::Confirmed)
	}
}

/// Reference to an item inside an order line.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderItemRef {
	/// Referenced item identifier.
	pub id: EntityId,
}

/// One order line.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderLine {
	/// Referenced item.
	pub item: OrderItemRef,
}

/// Order payload, reduced to status plus referenced items.
#[derive(Clone, Debug, Deserialize)]
pub struct OrderDetail {
	/// Order identifier.
	pub id: serde_json::Value,
	/// Current order status.
	pub status: OrderStatus,
	/// Lines referencing the items the order settles.
	#[serde(default)]
	pub order_items: Vec<OrderLine>,
}

/// Failures produced by [`MarketplaceClient`] implementations.
#[derive(Debug, ThisError)]
pub enum MarketplaceError {
	/// The provider rejected the grant (bad code, or a refresh token it no longer honors).
	#[error("Marketplace rejected the grant: {reason}.")]
	InvalidGrant {
		/// Provider-supplied `error`/`message` summary.
		reason: String,
	},
	/// The provider throttled the call.
	#[error("Marketplace throttled the call.")]
	RateLimited {
		/// Retry-After hint from upstream, if supplied.
		retry_after: Option<Duration>,
	},
	/// The provider returned an unexpected response.
	#[error("Marketplace returned an unexpected response: {message}.")]
	Upstream {
		/// HTTP status code, when available.
		status: Option<u16>,
		/// Summary of the failure.
		message: String,
	},
	/// The provider responded with JSON that could not be parsed into the expected shape.
	#[error("Marketplace returned malformed JSON.")]
	Malformed {
		/// Structured parsing failure.
		#[source]
		source: serde_path_to_error::Error<serde_json::Error>,
		/// HTTP status code, when available.
		status: Option<u16>,
	},
	/// Network-level failure (DNS, TCP, TLS, timeout).
	#[error("Network error occurred while calling the marketplace.")]
	Transport {
		/// Transport-specific network error.
		#[source]
		source: BoxError,
	},
}
impl MarketplaceError {
	/// Wraps a transport-specific network error.
	pub fn transport(src: impl 'static + Send + Sync + StdError) -> Self {
		Self::Transport { source: Box::new(src) }
	}

	/// Returns `true` for the invalid_grant/invalid_token family that signals possible theft
	/// when raised during a refresh.
	pub fn is_grant_rejection(&self) -> bool {
		matches!(self, Self::InvalidGrant { .. })
	}
}
#[cfg(feature = "reqwest")]
impl From<reqwest::Error> for MarketplaceError {
	fn from(e: reqwest::Error) -> Self {
		Self::transport(e)
	}
}

/// Provider error body returned by the token endpoint on 4xx responses.
#[derive(Debug, Default, Deserialize)]
struct ProviderErrorBody {
	#[serde(default)]
	error: Option<String>,
	#[serde(default)]
	message: Option<String>,
	#[serde(default)]
	error_description: Option<String>,
}
impl ProviderErrorBody {
	fn reason(&self) -> String {
		self.error
			.clone()
			.or_else(|| self.message.clone())
			.or_else(|| self.error_description.clone())
			.unwrap_or_else(|| "unspecified provider error".into())
	}

	fn is_grant_rejection(&self) -> bool {
		matches!(self.error.as_deref(), Some("invalid_grant") | Some("invalid_token"))
	}
}

/// Parses a `Retry-After` value given in seconds or RFC 2822 form.
pub fn parse_retry_after(raw: &str) -> Option<Duration> {
	let raw = raw.trim();

	if let Ok(secs) = raw.parse::<u64>() {
		return Some(Duration::seconds(secs as i64));
	}
	if let Ok(moment) =
		OffsetDateTime::parse(raw, &time::format_description::well_known::Rfc2822)
	{
		let delta = moment - OffsetDateTime::now_utc();

		if delta.is_positive() {
			return Some(delta);
		}
	}

	None
}

#[cfg(feature = "reqwest")]
pub use self::transport::ReqwestMarketplaceClient;
#[cfg(feature = "reqwest")]
mod transport {
	// std
	use std::time::Duration as StdDuration;
	// crates.io
	use reqwest::{Client as ReqwestClient, Response, StatusCode, header::RETRY_AFTER, redirect};
	use serde::de::DeserializeOwned;
	// self
	use super::*;
	use crate::auth::SecretString;

	const CONNECT_TIMEOUT: StdDuration = StdDuration::from_secs(5);
	const REQUEST_TIMEOUT: StdDuration = StdDuration::from_secs(10);

	/// Default reqwest-backed [`MarketplaceClient`] holding the OAuth app credentials.
	#[derive(Clone)]
	pub struct ReqwestMarketplaceClient {
		client: ReqwestClient,
		base: Url,
		client_id: String,
		client_secret: SecretString,
	}
	impl ReqwestMarketplaceClient {
		/// Creates a client with the crate's timeout and redirect policy.
		pub fn new(
			base: Url,
			client_id: impl Into<String>,
			client_secret: impl Into<String>,
		) -> Result<Self, MarketplaceError> {
			let client = ReqwestClient::builder()
				.connect_timeout(CONNECT_TIMEOUT)
				.timeout(REQUEST_TIMEOUT)
				.redirect(redirect::Policy::none())
				.build()?;

			Ok(Self::with_client(client, base, client_id, client_secret))
		}

		/// Wraps an existing [`ReqwestClient`]; the caller keeps responsibility for
		/// configuring timeouts and disabling redirect following.
		pub fn with_client(
			client: ReqwestClient,
			base: Url,
			client_id: impl Into<String>,
			client_secret: impl Into<String>,
		) -> Self {
			Self {
				client,
				base,
				client_id: client_id.into(),
				client_secret: SecretString::new(client_secret),
			}
		}

		fn endpoint(&self, path: &str) -> Result<Url, MarketplaceError> {
			self.base.join(path).map_err(|e| MarketplaceError::Upstream {
				status: None,
				message: format!("invalid endpoint path `{path}`: {e}"),
			})
		}

		async fn token_request(
			&self,
			params: &[(&str, &str)],
		) -> Result<TokenGrant, MarketplaceError> {
			let url = self.endpoint("oauth/token")?;
			let response = self.client.post(url).form(params).send().await?;

			parse_token_response(response).await
		}

		async fn get_json<T>(&self, url: Url, access_token: &str) -> Result<T, MarketplaceError>
		where
			T: DeserializeOwned,
		{
			let response = self.client.get(url).bearer_auth(access_token).send().await?;
			let status = response.status();

			if status == StatusCode::TOO_MANY_REQUESTS {
				return Err(MarketplaceError::RateLimited {
					retry_after: retry_after_header(&response),
				});
			}

			let bytes = response.bytes().await?;

			if !status.is_success() {
				return Err(MarketplaceError::Upstream {
					status: Some(status.as_u16()),
					message: String::from_utf8_lossy(&bytes).into_owned(),
				});
			}

			deserialize_body(&bytes, status.as_u16())
		}
	}
	impl Debug for ReqwestMarketplaceClient {
		fn fmt(&self, f: &mut Formatter) -> FmtResult {
			f.debug_struct("ReqwestMarketplaceClient")
				.field("base", &self.base)
				.field("client_id", &self.client_id)
				.finish()
		}
	}
	impl MarketplaceClient for ReqwestMarketplaceClient {
		fn exchange_code<'a>(
			&'a self,
			code: &'a str,
			verifier: &'a str,
			redirect_uri: &'a Url,
		) -> MarketplaceFuture<'a, TokenGrant> {
			Box::pin(async move {
				self.token_request(&[
					("grant_type", "authorization_code"),
					("client_id", &self.client_id),
					("client_secret", self.client_secret.expose()),
					("code", code),
					("code_verifier", verifier),
					("redirect_uri", redirect_uri.as_str()),
				])
				.await
			})
		}

		fn refresh_token<'a>(
			&'a self,
			refresh_token: &'a str,
		) -> MarketplaceFuture<'a, TokenGrant> {
			Box::pin(async move {
				self.token_request(&[
					("grant_type", "refresh_token"),
					("client_id", &self.client_id),
					("client_secret", self.client_secret.expose()),
					("refresh_token", refresh_token),
				])
				.await
			})
		}

		fn item<'a>(
			&'a self,
			access_token: &'a str,
			id: &'a EntityId,
		) -> MarketplaceFuture<'a, serde_json::Value> {
			Box::pin(async move {
				let url = self.endpoint(&format!("items/{id}"))?;

				self.get_json(url, access_token).await
			})
		}

		fn question<'a>(
			&'a self,
			access_token: &'a str,
			id: &'a EntityId,
		) -> MarketplaceFuture<'a, QuestionDetail> {
			Box::pin(async move {
				let url = self.endpoint(&format!("questions/{id}"))?;

				self.get_json(url, access_token).await
			})
		}

		fn order<'a>(
			&'a self,
			access_token: &'a str,
			id: &'a EntityId,
		) -> MarketplaceFuture<'a, OrderDetail> {
			Box::pin(async move {
				let url = self.endpoint(&format!("orders/{id}"))?;

				self.get_json(url, access_token).await
			})
		}

		fn question_search<'a>(
			&'a self,
			access_token: &'a str,
			item: &'a EntityId,
		) -> MarketplaceFuture<'a, serde_json::Value> {
			Box::pin(async move {
				let mut url = self.endpoint("questions/search")?;

				url.query_pairs_mut().append_pair("item", item.as_ref());

				self.get_json(url, access_token).await
			})
		}
	}

	async fn parse_token_response(response: Response) -> Result<TokenGrant, MarketplaceError> {
		let status = response.status();

		if status == StatusCode::TOO_MANY_REQUESTS {
			return Err(MarketplaceError::RateLimited {
				retry_after: retry_after_header(&response),
			});
		}

		let bytes = response.bytes().await?;

		if status.is_success() {
			return deserialize_body(&bytes, status.as_u16());
		}

		let body: ProviderErrorBody = serde_json::from_slice(&bytes).unwrap_or_default();

		if status.is_client_error() && body.is_grant_rejection() {
			return Err(MarketplaceError::InvalidGrant { reason: body.reason() });
		}

		Err(MarketplaceError::Upstream { status: Some(status.as_u16()), message: body.reason() })
	}

	fn deserialize_body<T>(bytes: &[u8], status: u16) -> Result<T, MarketplaceError>
	where
		T: DeserializeOwned,
	{
		let mut deserializer = serde_json::Deserializer::from_slice(bytes);

		serde_path_to_error::deserialize(&mut deserializer)
			.map_err(|source| MarketplaceError::Malformed { source, status: Some(status) })
	}

	fn retry_after_header(response: &Response) -> Option<Duration> {
		response
			.headers()
			.get(RETRY_AFTER)
			.and_then(|value| value.to_str().ok())
			.and_then(parse_retry_after)
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn retry_after_parses_seconds_and_dates() {
		assert_eq!(parse_retry_after("7"), Some(Duration::seconds(7)));
		assert_eq!(parse_retry_after(" 30 "), Some(Duration::seconds(30)));
		assert_eq!(parse_retry_after("not-a-hint"), None);
		// A date in the past yields no hint.
		assert_eq!(parse_retry_after("Wed, 01 Jan 2020 00:00:00 GMT"), None);
	}

	#[test]
	fn order_status_settlement_fanout() {
		let order: OrderDetail = serde_json::from_str(
			r#"{
				"id": 2000001,
				"status": "paid",
				"order_items": [
					{"item": {"id": "MLB1"}},
					{"item": {"id": "MLB2"}}
				]
			}"#,
		)
		.expect("Order payload should deserialize.");

		assert!(order.status.settles_inventory());
		assert_eq!(order.order_items.len(), 2);

		let cancelled: OrderDetail =
			serde_json::from_str(r#"{"id": 1, "status": "cancelled"}"#)
				.expect("Unknown statuses should map to Other.");

		assert_eq!(cancelled.status, OrderStatus::Other);
		assert!(!cancelled.status.settles_inventory());
		assert!(cancelled.order_items.is_empty());
	}

	#[test]
	fn grant_rejection_detection_covers_both_error_codes() {
		for code in ["invalid_grant", "invalid_token"] {
			let body: super::ProviderErrorBody =
				serde_json::from_str(&format!("{{\"error\":\"{code}\"}}"))
					.expect("Provider error body should deserialize.");

			assert!(body.is_grant_rejection());
		}

		let other: super::ProviderErrorBody =
			serde_json::from_str("{\"error\":\"server_error\",\"message\":\"boom\"}")
				.expect("Provider error body should deserialize.");

		assert!(!other.is_grant_rejection());
		assert_eq!(other.reason(), "server_error");
	}
}
