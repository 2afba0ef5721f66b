//! Demonstrates webhook ingestion end to end: allowlist check, payload validation,
//! evict-then-refetch synchronization, and the always-200 acknowledgment.

// std
use std::{
	collections::HashMap,
	net::{IpAddr, Ipv4Addr},
	sync::Arc,
};
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use serde_json::json;
use time::Duration;
use url::Url;
// self
use marketplace_sync::{
	auth::{PrincipalId, ScopeSet, TokenRecord},
	gateway::{IpAllowlist, WebhookGateway, WebhookRequest},
	limit::{QuotaConfig, RateLimiter},
	marketplace::ReqwestMarketplaceClient,
	store::{CredentialStore, MemoryStore},
	sync::{CacheSynchronizer, NoopRevalidator},
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let item_mock = server
		.mock_async(|when, then| {
			when.method(GET).path("/items/MLB999");
			then.status(200)
				.header("content-type", "application/json")
				.body("{\"id\":\"MLB999\",\"price\":150}");
		})
		.await;
	let store = Arc::new(MemoryStore::default());
	let record = TokenRecord::builder(PrincipalId::new("12345")?, ScopeSet::parse("read"))
		.access_token("demo-access")
		.refresh_token("demo-refresh")
		.expires_in(Duration::hours(6))
		.build()?;

	store.save(record).await?;

	let marketplace = Arc::new(ReqwestMarketplaceClient::new(
		Url::parse(&server.url("/"))?,
		"demo-client",
		"demo-secret",
	)?);
	let synchronizer = Arc::new(CacheSynchronizer::new(
		store.clone(),
		marketplace,
		store.clone(),
		Arc::new(NoopRevalidator),
	));
	let limiter = Arc::new(RateLimiter::new(store.clone(), QuotaConfig::default()));
	let gateway =
		WebhookGateway::new(IpAllowlist::parse(["127.0.0.0/8"])?, synchronizer, limiter);
	let ack = gateway
		.handle(WebhookRequest {
			headers: HashMap::new(),
			peer: IpAddr::V4(Ipv4Addr::LOCALHOST),
			body: json!({
				"topic": "items",
				"resource": "/items/MLB999",
				"user_id": 12345,
				"attempts": 1,
			})
			.to_string()
			.into_bytes(),
		})
		.await;

	println!("ack: {} {}", ack.status, ack.body);

	item_mock.assert_async().await;

	Ok(())
}
