//! Token lifecycle orchestration: authorization, code exchange, rotation, and sweeps.

pub mod authorize;
pub mod refresh;
pub mod sweep;

pub use authorize::*;
pub use sweep::*;

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, ScopeSet},
	limit::RateLimiter,
	marketplace::MarketplaceClient,
	store::{CredentialStore, StateStore},
};

/// OAuth application registration data (public values only; the client secret lives in
/// the marketplace transport).
#[derive(Clone, Debug)]
pub struct OAuthApp {
	/// OAuth 2.0 client identifier sent on the authorize redirect.
	pub client_id: String,
	/// Marketplace authorize endpoint end-users are redirected to.
	pub authorize_endpoint: Url,
	/// Redirect URI registered with the marketplace.
	pub redirect_uri: Url,
	/// Scopes requested on authorization; empty means provider defaults.
	pub scope: ScopeSet,
}
impl OAuthApp {
	/// Creates an app registration for the provided client id and endpoints.
	pub fn new(client_id: impl Into<String>, authorize_endpoint: Url, redirect_uri: Url) -> Self {
		Self {
			client_id: client_id.into(),
			authorize_endpoint,
			redirect_uri,
			scope: ScopeSet::default(),
		}
	}

	/// Sets the scopes requested on authorization.
	pub fn with_scope(mut self, scope: ScopeSet) -> Self {
		self.scope = scope;

		self
	}
}

/// Coordinates the OAuth token lifecycle for every known principal.
///
/// The manager owns the credential and state stores, the marketplace client, and the
/// rate limiter so the individual flows can focus on grant-specific logic (state +
/// PKCE issuance, code exchange, generation-checked rotation, expiring-token sweeps).
/// Per-principal singleflight guards keep a user-triggered refresh and the scheduled
/// sweep from issuing duplicate upstream calls; the generation compare-and-swap in the
/// store remains the source of truth when two writers do race.
#[derive(Clone)]
pub struct TokenLifecycle {
	/// Per-principal token record storage.
	pub credentials: Arc<dyn CredentialStore>,
	/// One-time CSRF/PKCE state storage.
	pub states: Arc<dyn StateStore>,
	/// Marketplace REST client used for every grant.
	pub marketplace: Arc<dyn MarketplaceClient>,
	/// Shared limiter consulted before token endpoint calls.
	pub limiter: Arc<RateLimiter>,
	/// OAuth application registration.
	pub app: OAuthApp,
	directory: Option<Arc<dyn PrincipalDirectory>>,
	flow_guards: Arc<Mutex<HashMap<PrincipalId, Arc<AsyncMutex<()>>>>>,
}
impl TokenLifecycle {
	/// Creates a lifecycle manager over the provided seams.
	pub fn new(
		credentials: Arc<dyn CredentialStore>,
		states: Arc<dyn StateStore>,
		marketplace: Arc<dyn MarketplaceClient>,
		limiter: Arc<RateLimiter>,
		app: OAuthApp,
	) -> Self {
		Self {
			credentials,
			states,
			marketplace,
			limiter,
			app,
			directory: None,
			flow_guards: Default::default(),
		}
	}

	/// Attaches the principal directory consulted by the sweep.
	pub fn with_directory(mut self, directory: Arc<dyn PrincipalDirectory>) -> Self {
		self.directory = Some(directory);

		self
	}

	pub(crate) fn directory(&self) -> Option<&Arc<dyn PrincipalDirectory>> {
		self.directory.as_ref()
	}

	/// Returns (and creates on demand) the singleflight guard for a principal.
	pub(crate) fn flow_guard(&self, principal: &PrincipalId) -> Arc<AsyncMutex<()>> {
		let mut guards = self.flow_guards.lock();

		guards.entry(principal.clone()).or_insert_with(|| Arc::new(AsyncMutex::new(()))).clone()
	}
}
impl Debug for TokenLifecycle {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenLifecycle")
			.field("app", &self.app)
			.field("directory_set", &self.directory.is_some())
			.finish()
	}
}
