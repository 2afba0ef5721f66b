//! Crate-level error types shared across flows, the gateway, and stores.

// self
use crate::_prelude::*;

/// Crate-wide result type alias returning [`Error`] by default.
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Canonical error exposed by public APIs.
///
/// The taxonomy separates user-retryable failures ([`AuthExchangeFailed`](Error::AuthExchangeFailed),
/// [`RateLimitExceeded`](Error::RateLimitExceeded)) from terminal security signals
/// ([`CsrfViolation`](Error::CsrfViolation), [`TokenTheftDetected`](Error::TokenTheftDetected))
/// and from degraded-infrastructure conditions that callers handle gracefully
/// ([`MarketplaceUnavailable`](Error::MarketplaceUnavailable), [`CacheUnavailable`](Error::CacheUnavailable)).
#[derive(Debug, ThisError)]
pub enum Error {
	/// Storage-layer failure.
	#[error("{0}")]
	Storage(
		#[from]
		#[source]
		crate::store::StoreError,
	),
	/// Local configuration problem.
	#[error(transparent)]
	Config(#[from] ConfigError),
	/// Marketplace client failure that is neither a grant rejection nor a rate limit.
	#[error(transparent)]
	Marketplace(#[from] crate::marketplace::MarketplaceError),

	/// Code/state exchange was rejected; the user may retry the authorization.
	#[error("Authorization exchange failed: {reason}.")]
	AuthExchangeFailed {
		/// Broker-supplied reason string; never echoes token material.
		reason: String,
	},
	/// Authorization state was replayed or mismatched; a security event has been emitted.
	#[error("Authorization state was rejected.")]
	CsrfViolation,
	/// The stored refresh token was rejected upstream; the record has been deleted and the
	/// principal must complete a full re-authentication.
	#[error("Refresh token rejected upstream; re-authentication is required for `{principal}`.")]
	TokenTheftDetected {
		/// Principal whose credentials were invalidated.
		principal: String,
	},
	/// An operation exhausted its rate budget.
	#[error("Rate limit exceeded.")]
	RateLimitExceeded {
		/// Upstream or locally computed retry hint.
		retry_after: Option<Duration>,
	},
	/// Upstream marketplace is unreachable or returned a server error.
	#[error("Marketplace unavailable: {message}.")]
	MarketplaceUnavailable {
		/// HTTP status code, when one was received.
		status: Option<u16>,
		/// Human-readable failure summary.
		message: String,
	},
	/// Cache backing store is unreachable; reads and the limiter fail open.
	#[error("Cache unavailable: {message}.")]
	CacheUnavailable {
		/// Human-readable failure summary.
		message: String,
	},
}

/// Configuration and validation failures raised before any I/O happens.
#[derive(Debug, ThisError)]
pub enum ConfigError {
	/// No principal directory was configured for the sweep.
	#[error(
		"No principal directory is configured; supply an admin list or enable the credential index fallback."
	)]
	MissingPrincipalDirectory,
	/// Cached record is missing a refresh secret.
	#[error("Stored token record is missing a refresh token.")]
	MissingRefreshToken,
	/// Identifier validation failed.
	#[error("Identifier is invalid.")]
	InvalidIdentifier(#[from] crate::auth::IdentifierError),
	/// Request scopes cannot be normalized.
	#[error("Requested scopes are invalid.")]
	InvalidScope(#[from] crate::auth::ScopeValidationError),
	/// Token record builder validation failed.
	#[error("Unable to build token record.")]
	TokenBuild(#[from] crate::auth::TokenRecordBuilderError),
	/// Token endpoint response omitted `expires_in`.
	#[error("Token endpoint response is missing expires_in.")]
	MissingExpiresIn,
	/// Token endpoint returned a non-positive or oversized `expires_in`.
	#[error("The expires_in value is outside the supported range.")]
	ExpiresInOutOfRange,
	/// Allowlist entry could not be parsed as an IP network.
	#[error("Allowlist entry `{entry}` is not a valid IP network.")]
	InvalidAllowlistEntry {
		/// The offending entry.
		entry: String,
	},
}
