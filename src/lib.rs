//! Marketplace trust and synchronization core—OAuth token lifecycle with theft detection,
//! webhook ingestion with IP allowlisting, topic-routed cache synchronization, and
//! sliding-window rate limiting in one crate built for production.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

pub mod auth;
pub mod error;
pub mod flows;
pub mod gateway;
pub mod limit;
pub mod marketplace;
pub mod obs;
pub mod store;
pub mod sync;
#[cfg(all(any(test, feature = "test"), feature = "reqwest"))]
pub mod _preludet {
	//! Convenience re-exports and helpers shared by the integration tests; enabled by the
	//! non-default `test` feature.

	pub use crate::_prelude::*;

	// self
	use crate::{
		flows::{OAuthApp, TokenLifecycle},
		gateway::{IpAllowlist, WebhookGateway},
		limit::{QuotaConfig, RateLimiter},
		marketplace::{MarketplaceClient, ReqwestMarketplaceClient},
		store::{CounterStore, CredentialStore, EntityCache, MemoryStore, StateStore},
		sync::{CacheSynchronizer, NoopRevalidator},
	};

	/// Builds a reqwest-backed marketplace client that accepts the self-signed certificates
	/// produced by `httpmock` during tests.
	pub fn test_marketplace_client(base: &str) -> ReqwestMarketplaceClient {
		let client = reqwest::Client::builder()
			.danger_accept_invalid_certs(true)
			.danger_accept_invalid_hostnames(true)
			.build()
			.expect("Failed to build insecure Reqwest client for tests.");
		let base = Url::parse(base).expect("Test marketplace base URL should parse.");

		ReqwestMarketplaceClient::with_client(client, base, "test-client", "test-secret")
	}

	/// Constructs a [`TokenLifecycle`] backed by an in-memory store and the reqwest transport
	/// used across integration tests.
	pub fn build_test_lifecycle(marketplace_base: &str) -> (TokenLifecycle, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let credentials: Arc<dyn CredentialStore> = store_backend.clone();
		let states: Arc<dyn StateStore> = store_backend.clone();
		let counters: Arc<dyn CounterStore> = store_backend.clone();
		let marketplace: Arc<dyn MarketplaceClient> =
			Arc::new(test_marketplace_client(marketplace_base));
		let limiter = Arc::new(RateLimiter::new(counters, QuotaConfig::default()));
		let app = OAuthApp::new(
			"test-client",
			Url::parse("https://marketplace.test/authorize")
				.expect("Authorize endpoint fixture should parse."),
			Url::parse("https://app.test/callback").expect("Redirect URI fixture should parse."),
		);
		let lifecycle = TokenLifecycle::new(credentials, states, marketplace, limiter, app);

		(lifecycle, store_backend)
	}

	/// Constructs a [`WebhookGateway`] over an in-memory store, a no-op revalidator, and an
	/// allowlist covering loopback sources, for integration tests.
	pub fn build_test_gateway(marketplace_base: &str) -> (WebhookGateway, Arc<MemoryStore>) {
		let store_backend = Arc::new(MemoryStore::default());
		let credentials: Arc<dyn CredentialStore> = store_backend.clone();
		let cache: Arc<dyn EntityCache> = store_backend.clone();
		let counters: Arc<dyn CounterStore> = store_backend.clone();
		let marketplace: Arc<dyn MarketplaceClient> =
			Arc::new(test_marketplace_client(marketplace_base));
		let synchronizer = Arc::new(CacheSynchronizer::new(
			credentials,
			marketplace,
			cache,
			Arc::new(NoopRevalidator),
		));
		let limiter = Arc::new(RateLimiter::new(counters, QuotaConfig::default()));
		let allowlist =
			IpAllowlist::parse(["127.0.0.0/8"]).expect("Loopback allowlist fixture should parse.");

		(WebhookGateway::new(allowlist, synchronizer, limiter), store_backend)
	}
}

mod _prelude {
	pub use std::{
		collections::HashMap,
		error::Error as StdError,
		fmt::{Debug, Display, Formatter, Result as FmtResult},
		future::Future,
		net::IpAddr,
		pin::Pin,
		str::FromStr,
		sync::Arc,
	};

	pub use async_lock::Mutex as AsyncMutex;
	pub use parking_lot::{Mutex, RwLock};
	pub use serde::{Deserialize, Serialize};
	pub use thiserror::Error as ThisError;
	pub use time::{Duration, OffsetDateTime};
	pub use url::Url;

	pub use crate::error::{Error, Result};
}

#[cfg(feature = "reqwest")] pub use reqwest;
pub use url;
#[cfg(all(test, feature = "reqwest"))] use {color_eyre as _, httpmock as _};
