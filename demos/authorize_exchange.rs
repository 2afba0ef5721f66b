//! Demonstrates preparing an authorize redirect and exchanging the callback code for a
//! generation-0 token record against a mock marketplace.

// std
use std::sync::Arc;
// crates.io
use color_eyre::Result;
use httpmock::prelude::*;
use url::Url;
// self
use marketplace_sync::{
	auth::PrincipalId,
	flows::{OAuthApp, TokenLifecycle},
	limit::{QuotaConfig, RateLimiter},
	marketplace::ReqwestMarketplaceClient,
	store::MemoryStore,
};

#[tokio::main]
async fn main() -> Result<()> {
	color_eyre::install()?;

	let server = MockServer::start_async().await;
	let token_mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"demo-access\",\"refresh_token\":\"demo-refresh\",\"token_type\":\"bearer\",\"expires_in\":21600}",
			);
		})
		.await;
	let store = Arc::new(MemoryStore::default());
	let marketplace = Arc::new(ReqwestMarketplaceClient::new(
		Url::parse(&server.url("/"))?,
		"demo-client",
		"demo-secret",
	)?);
	let limiter = Arc::new(RateLimiter::new(store.clone(), QuotaConfig::default()));
	let app = OAuthApp::new(
		"demo-client",
		Url::parse(&server.url("/authorize"))?,
		Url::parse("https://app.example/callback")?,
	);
	let lifecycle =
		TokenLifecycle::new(store.clone(), store.clone(), marketplace, limiter, app);
	let redirect = lifecycle.start_authorization().await?;

	println!("send the user to: {}", redirect.authorize_url);

	let principal = PrincipalId::new("demo-user")?;
	let record = lifecycle.exchange_code(&principal, "demo-code", &redirect.state).await?;

	println!(
		"stored generation-{} record for {} expiring at {}",
		record.rotation_generation, record.principal, record.expires_at,
	);

	token_mock.assert_async().await;

	Ok(())
}
