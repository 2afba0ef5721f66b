//! Token record model with rotation bookkeeping, lifecycle helpers, and builders.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, ScopeSet},
};

/// Redacted secret wrapper keeping token material out of logs.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecretString(String);
impl SecretString {
	/// Wraps a new secret string.
	pub fn new(value: impl Into<String>) -> Self {
		Self(value.into())
	}

	/// Returns the inner value. Callers must avoid logging this string.
	pub fn expose(&self) -> &str {
		&self.0
	}
}
impl Debug for SecretString {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_tuple("SecretString").field(&"<redacted>").finish()
	}
}
impl Display for SecretString {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("<redacted>")
	}
}

/// Current lifecycle status for a token record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum TokenStatus {
	/// Token is currently valid.
	Active,
	/// Token exceeded its expiry instant.
	Expired,
}

/// Errors produced by [`TokenRecordBuilder`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, ThisError)]
pub enum TokenRecordBuilderError {
	/// Issued when no access token value was provided.
	#[error("Access token is required.")]
	MissingAccessToken,
	/// Issued when no refresh token value was provided.
	///
	/// The marketplace always issues rotating refresh tokens, so a record without one
	/// cannot participate in the lifecycle and is rejected at construction.
	#[error("Refresh token is required.")]
	MissingRefreshToken,
	/// Issued when no expiry (absolute or relative) was configured.
	#[error("Expiry must be supplied via expires_at or expires_in.")]
	MissingExpiry,
}

/// Per-principal record describing issued marketplace tokens.
///
/// Exclusively owned by the credential store and mutated only through the token
/// lifecycle manager. `rotation_generation` increases by exactly one on every
/// successful refresh and anchors the optimistic-concurrency check in
/// [`CredentialStore::compare_and_swap_generation`](crate::store::CredentialStore::compare_and_swap_generation).
#[derive(Clone, Serialize, Deserialize)]
pub struct TokenRecord {
	/// Principal the tokens belong to.
	pub principal: PrincipalId,
	/// Normalized scopes granted to this record.
	pub scope: ScopeSet,
	/// Token type reported by the provider (`bearer` in practice).
	pub token_type: String,
	/// Access token secret; callers must avoid logging it.
	pub access_token: SecretString,
	/// Refresh token secret; rotated on every successful refresh.
	pub refresh_token: SecretString,
	/// Issued-at instant recorded from the provider response.
	pub issued_at: OffsetDateTime,
	/// Expiry instant derived from issued_at plus expires_in or absolute expiry.
	pub expires_at: OffsetDateTime,
	/// Monotonic rotation counter; generation 0 is the initial code exchange.
	pub rotation_generation: u64,
	/// Instant of the most recent successful rotation, if any.
	pub last_rotated_at: Option<OffsetDateTime>,
}
impl TokenRecord {
	/// Returns a builder for constructing rotation-friendly records.
	pub fn builder(principal: PrincipalId, scope: ScopeSet) -> TokenRecordBuilder {
		TokenRecordBuilder::new(principal, scope)
	}

	/// Computes the lifecycle status at a given instant.
	pub fn status_at(&self, instant: OffsetDateTime) -> TokenStatus {
		if instant >= self.expires_at { TokenStatus::Expired } else { TokenStatus::Active }
	}

	/// Convenience helper that checks the status using the current UTC instant.
	pub fn status(&self) -> TokenStatus {
		self.status_at(OffsetDateTime::now_utc())
	}

	/// Returns `true` if the record has expired at the provided instant.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		matches!(self.status_at(instant), TokenStatus::Expired)
	}

	/// Returns `true` if the record is expired relative to the current clock.
	pub fn is_expired(&self) -> bool {
		matches!(self.status(), TokenStatus::Expired)
	}

	/// Returns `true` if the record expires within `horizon` of `now` (or already has).
	pub fn expires_within(&self, now: OffsetDateTime, horizon: Duration) -> bool {
		self.expires_at - now <= horizon
	}

	/// Produces the successor record for a completed rotation.
	///
	/// The generation advances by exactly one and `last_rotated_at` is stamped with the
	/// rotation instant; scope and principal carry over unless the provider re-issued them.
	pub fn rotated(
		&self,
		access_token: impl Into<String>,
		refresh_token: impl Into<String>,
		expires_at: OffsetDateTime,
		rotated_at: OffsetDateTime,
	) -> Self {
		Self {
			principal: self.principal.clone(),
			scope: self.scope.clone(),
			token_type: self.token_type.clone(),
			access_token: SecretString::new(access_token),
			refresh_token: SecretString::new(refresh_token),
			issued_at: rotated_at,
			expires_at,
			rotation_generation: self.rotation_generation + 1,
			last_rotated_at: Some(rotated_at),
		}
	}
}
impl Debug for TokenRecord {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("TokenRecord")
			.field("principal", &self.principal)
			.field("scope", &self.scope)
			.field("token_type", &self.token_type)
			.field("access_token", &"<redacted>")
			.field("refresh_token", &"<redacted>")
			.field("issued_at", &self.issued_at)
			.field("expires_at", &self.expires_at)
			.field("rotation_generation", &self.rotation_generation)
			.field("last_rotated_at", &self.last_rotated_at)
			.finish()
	}
}

/// Builder for [`TokenRecord`].
#[derive(Clone, Debug)]
pub struct TokenRecordBuilder {
	principal: PrincipalId,
	scope: ScopeSet,
	token_type: String,
	access_token: Option<SecretString>,
	refresh_token: Option<SecretString>,
	issued_at: Option<OffsetDateTime>,
	expires_at: Option<OffsetDateTime>,
	expires_in: Option<Duration>,
}
impl TokenRecordBuilder {
	fn new(principal: PrincipalId, scope: ScopeSet) -> Self {
		Self {
			principal,
			scope,
			token_type: "bearer".into(),
			access_token: None,
			refresh_token: None,
			issued_at: None,
			expires_at: None,
			expires_in: None,
		}
	}

	/// Overrides the token type (defaults to `bearer`).
	pub fn token_type(mut self, token_type: impl Into<String>) -> Self {
		self.token_type = token_type.into();

		self
	}

	/// Sets the issued-at instant.
	pub fn issued_at(mut self, instant: OffsetDateTime) -> Self {
		self.issued_at = Some(instant);

		self
	}

	/// Sets an absolute expiry instant.
	pub fn expires_at(mut self, instant: OffsetDateTime) -> Self {
		self.expires_at = Some(instant);

		self
	}

	/// Sets a relative expiry duration from the issued instant.
	pub fn expires_in(mut self, duration: Duration) -> Self {
		self.expires_in = Some(duration);

		self
	}

	/// Provides the access token value.
	pub fn access_token(mut self, token: impl Into<String>) -> Self {
		self.access_token = Some(SecretString::new(token));

		self
	}

	/// Provides the refresh token value.
	pub fn refresh_token(mut self, token: impl Into<String>) -> Self {
		self.refresh_token = Some(SecretString::new(token));

		self
	}

	/// Consumes the builder and produces a generation-0 [`TokenRecord`].
	pub fn build(self) -> Result<TokenRecord, TokenRecordBuilderError> {
		let access_token = self.access_token.ok_or(TokenRecordBuilderError::MissingAccessToken)?;
		let refresh_token =
			self.refresh_token.ok_or(TokenRecordBuilderError::MissingRefreshToken)?;
		let issued_at = self.issued_at.unwrap_or_else(OffsetDateTime::now_utc);
		let expires_at = match (self.expires_at, self.expires_in) {
			(Some(instant), _) => instant,
			(None, Some(delta)) => issued_at + delta,
			(None, None) => return Err(TokenRecordBuilderError::MissingExpiry),
		};

		Ok(TokenRecord {
			principal: self.principal,
			scope: self.scope,
			token_type: self.token_type,
			access_token,
			refresh_token,
			issued_at,
			expires_at,
			rotation_generation: 0,
			last_rotated_at: None,
		})
	}
}

#[cfg(test)]
mod tests {
	// crates.io
	use time::macros;
	// self
	use super::*;

	fn fixture_record() -> TokenRecord {
		TokenRecord::builder(
			PrincipalId::new("user-1").expect("Principal fixture should be valid."),
			ScopeSet::parse("offline_access read"),
		)
		.access_token("access-0")
		.refresh_token("refresh-0")
		.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
		.expires_at(macros::datetime!(2025-01-01 06:00 UTC))
		.build()
		.expect("Token record fixture should build successfully.")
	}

	#[test]
	fn secret_formatters_redact() {
		let secret = SecretString::new("super-secret");

		assert_eq!(format!("{secret:?}"), "SecretString(\"<redacted>\")");
		assert_eq!(format!("{secret}"), "<redacted>");

		let record = fixture_record();

		assert!(!format!("{record:?}").contains("access-0"));
	}

	#[test]
	fn builder_requires_both_secrets_and_an_expiry() {
		let principal = PrincipalId::new("user-1").expect("Principal fixture should be valid.");
		let scope = ScopeSet::parse("read");

		assert_eq!(
			TokenRecord::builder(principal.clone(), scope.clone())
				.refresh_token("r")
				.expires_in(Duration::hours(6))
				.build()
				.expect_err("Missing access token should fail."),
			TokenRecordBuilderError::MissingAccessToken,
		);
		assert_eq!(
			TokenRecord::builder(principal.clone(), scope.clone())
				.access_token("a")
				.expires_in(Duration::hours(6))
				.build()
				.expect_err("Missing refresh token should fail."),
			TokenRecordBuilderError::MissingRefreshToken,
		);
		assert_eq!(
			TokenRecord::builder(principal, scope)
				.access_token("a")
				.refresh_token("r")
				.build()
				.expect_err("Missing expiry should fail."),
			TokenRecordBuilderError::MissingExpiry,
		);
	}

	#[test]
	fn relative_expiry_anchors_on_issued_at() {
		let record = TokenRecord::builder(
			PrincipalId::new("user-2").expect("Principal fixture should be valid."),
			ScopeSet::parse("read"),
		)
		.access_token("a")
		.refresh_token("r")
		.issued_at(macros::datetime!(2025-01-01 00:00 UTC))
		.expires_in(Duration::minutes(30))
		.build()
		.expect("Token record builder should support relative expiry calculations.");

		assert_eq!(record.expires_at, macros::datetime!(2025-01-01 00:30 UTC));
		assert_eq!(record.rotation_generation, 0);
		assert_eq!(record.last_rotated_at, None);
	}

	#[test]
	fn rotation_advances_generation_and_stamps_instant() {
		let record = fixture_record();
		let rotated_at = macros::datetime!(2025-01-01 05:00 UTC);
		let next = record.rotated(
			"access-1",
			"refresh-1",
			rotated_at + Duration::hours(6),
			rotated_at,
		);

		assert_eq!(next.rotation_generation, 1);
		assert_eq!(next.last_rotated_at, Some(rotated_at));
		assert_eq!(next.access_token.expose(), "access-1");
		assert_eq!(next.refresh_token.expose(), "refresh-1");
		assert_eq!(next.principal, record.principal);
	}

	#[test]
	fn expiry_helpers_honor_the_horizon() {
		let record = fixture_record();
		let now = macros::datetime!(2025-01-01 05:30 UTC);

		assert_eq!(record.status_at(now), TokenStatus::Active);
		assert!(record.expires_within(now, Duration::hours(1)));
		assert!(!record.expires_within(macros::datetime!(2025-01-01 00:00 UTC), Duration::hours(1)));
		assert!(record.is_expired_at(macros::datetime!(2025-01-01 06:00 UTC)));
	}
}
