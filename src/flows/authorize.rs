//! Authorize-redirect preparation and authorization-code exchange.

// self
use crate::{
	_prelude::*,
	auth::{self, AuthorizationState, PrincipalId, ScopeSet, TokenRecord},
	error::ConfigError,
	flows::TokenLifecycle,
	limit::Dimension,
	marketplace::{MarketplaceError, TokenGrant},
	obs::{self, FlowKind, FlowOutcome, FlowSpan, SecurityEventKind},
	store::StateConsumeOutcome,
};

// Token endpoints occasionally echo absurd expires_in values; anything beyond a year is
// treated as a provider bug rather than persisted.
const MAX_EXPIRES_IN: Duration = Duration::days(366);

/// Redirect material returned by [`TokenLifecycle::start_authorization`].
#[derive(Clone, Debug)]
pub struct AuthorizationRedirect {
	/// Fully-formed authorize URL end-users should be sent to.
	pub authorize_url: Url,
	/// State value persisted for the callback round-trip.
	pub state: String,
}

impl TokenLifecycle {
	/// Issues a state + PKCE pair, persists it, and builds the authorize URL.
	pub async fn start_authorization(&self) -> Result<AuthorizationRedirect> {
		const KIND: FlowKind = FlowKind::Authorize;

		let span = FlowSpan::new(KIND, "start_authorization");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let state = AuthorizationState::issue();
				let authorize_url = self.build_authorize_url(&state);
				let state_value = state.state_value.clone();

				self.states.put(state).await?;

				Ok(AuthorizationRedirect { authorize_url, state: state_value })
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Consumes the callback state and exchanges the authorization code for a
	/// generation-0 token record.
	///
	/// A replayed state is rejected as a CSRF violation with a critical security event;
	/// a miss or an expired state surfaces as [`Error::AuthExchangeFailed`] so the user
	/// can simply retry the authorization. No record is written on any failure path.
	pub async fn exchange_code(
		&self,
		principal: &PrincipalId,
		code: &str,
		state: &str,
	) -> Result<TokenRecord> {
		const KIND: FlowKind = FlowKind::Exchange;

		let span = FlowSpan::new(KIND, "exchange_code");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				// Format check runs before any store lookup so malformed probes stay cheap.
				if let Err(err) = auth::validate_state_format(state) {
					obs::record_security_event(
						SecurityEventKind::StateRejected,
						principal.as_ref(),
						&err.to_string(),
					);

					return Err(Error::AuthExchangeFailed {
						reason: "Authorization state is malformed.".into(),
					});
				}

				let consumed = self.states.consume(state).await?;
				let authorization = match consumed {
					StateConsumeOutcome::Consumed(authorization) => authorization,
					StateConsumeOutcome::AlreadyConsumed => {
						obs::record_security_event(
							SecurityEventKind::CsrfReplay,
							principal.as_ref(),
							"authorization state consumed twice",
						);

						return Err(Error::CsrfViolation);
					},
					StateConsumeOutcome::NotFound | StateConsumeOutcome::Expired => {
						obs::record_security_event(
							SecurityEventKind::StateRejected,
							principal.as_ref(),
							"authorization state missing or expired",
						);

						return Err(Error::AuthExchangeFailed {
							reason: "Authorization state is unknown or expired.".into(),
						});
					},
				};
				let decision =
					self.limiter.allow(Dimension::Auth, self.app.client_id.as_str()).await;

				if !decision.allowed {
					return Err(Error::RateLimitExceeded { retry_after: decision.retry_after });
				}

				let grant = self
					.marketplace
					.exchange_code(
						code,
						authorization.code_verifier.expose(),
						&self.app.redirect_uri,
					)
					.await
					.map_err(map_exchange_error)?;
				let record = record_from_grant(
					principal.clone(),
					&self.app.scope,
					grant,
					OffsetDateTime::now_utc(),
				)?;

				self.credentials.save(record.clone()).await?;

				Ok(record)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	fn build_authorize_url(&self, state: &AuthorizationState) -> Url {
		let mut url = self.app.authorize_endpoint.clone();

		{
			let mut pairs = url.query_pairs_mut();

			pairs.append_pair("response_type", "code");
			pairs.append_pair("client_id", &self.app.client_id);
			pairs.append_pair("redirect_uri", self.app.redirect_uri.as_str());

			if !self.app.scope.is_empty() {
				pairs.append_pair("scope", &self.app.scope.normalized());
			}

			pairs.append_pair("state", &state.state_value);
			pairs.append_pair("code_challenge", &state.code_challenge());
			pairs.append_pair("code_challenge_method", state.code_challenge_method().as_str());
		}

		url
	}
}

/// Builds the generation-0 record persisted after a successful code exchange.
pub(crate) fn record_from_grant(
	principal: PrincipalId,
	fallback_scope: &ScopeSet,
	grant: TokenGrant,
	now: OffsetDateTime,
) -> Result<TokenRecord> {
	let expires_in = validate_expires_in(grant.expires_in)?;
	let scope = grant.scope.as_deref().map(ScopeSet::parse).unwrap_or_else(|| fallback_scope.clone());
	let refresh_token = grant.refresh_token.ok_or(ConfigError::MissingRefreshToken)?;
	let mut builder = TokenRecord::builder(principal, scope)
		.access_token(grant.access_token)
		.refresh_token(refresh_token)
		.issued_at(now)
		.expires_in(expires_in);

	if let Some(token_type) = grant.token_type {
		builder = builder.token_type(token_type);
	}

	Ok(builder.build().map_err(ConfigError::from)?)
}

/// Validates a token endpoint `expires_in` and converts it to a duration.
pub(crate) fn validate_expires_in(expires_in: Option<i64>) -> Result<Duration> {
	let seconds = expires_in.ok_or(ConfigError::MissingExpiresIn)?;

	if seconds <= 0 || Duration::seconds(seconds) > MAX_EXPIRES_IN {
		return Err(ConfigError::ExpiresInOutOfRange.into());
	}

	Ok(Duration::seconds(seconds))
}

fn map_exchange_error(err: MarketplaceError) -> Error {
	match err {
		MarketplaceError::RateLimited { retry_after } => Error::RateLimitExceeded { retry_after },
		MarketplaceError::InvalidGrant { reason } => Error::AuthExchangeFailed { reason },
		MarketplaceError::Upstream { status, message } => Error::AuthExchangeFailed {
			reason: format!("token endpoint returned {status:?}: {message}"),
		},
		other => Error::AuthExchangeFailed { reason: other.to_string() },
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;
	use crate::error::ConfigError;

	fn grant(expires_in: Option<i64>) -> TokenGrant {
		TokenGrant {
			access_token: "access-0".into(),
			refresh_token: Some("refresh-0".into()),
			token_type: Some("bearer".into()),
			expires_in,
			scope: Some("offline_access read".into()),
		}
	}

	#[test]
	fn grants_become_generation_zero_records() {
		let now = OffsetDateTime::now_utc();
		let record = record_from_grant(
			PrincipalId::new("user-1").expect("Principal fixture should be valid."),
			&ScopeSet::default(),
			grant(Some(21600)),
			now,
		)
		.expect("Grant should convert into a token record.");

		assert_eq!(record.rotation_generation, 0);
		assert_eq!(record.expires_at, now + Duration::seconds(21600));
		assert_eq!(record.scope, ScopeSet::parse("offline_access read"));
		assert_eq!(record.access_token.expose(), "access-0");
	}

	#[test]
	fn expires_in_bounds_are_enforced() {
		for (expires_in, expected) in [
			(None, ConfigError::MissingExpiresIn),
			(Some(0), ConfigError::ExpiresInOutOfRange),
			(Some(-30), ConfigError::ExpiresInOutOfRange),
			(Some(Duration::days(400).whole_seconds()), ConfigError::ExpiresInOutOfRange),
		] {
			let err = validate_expires_in(expires_in)
				.expect_err("Out-of-range expires_in should be rejected.");

			assert!(
				matches!(&err, Error::Config(config) if
					std::mem::discriminant(config) == std::mem::discriminant(&expected)),
				"Unexpected error for {expires_in:?}: {err:?}",
			);
		}
	}

	#[test]
	fn grant_without_refresh_token_is_rejected() {
		let mut grant = grant(Some(3600));

		grant.refresh_token = None;

		let err = record_from_grant(
			PrincipalId::new("user-1").expect("Principal fixture should be valid."),
			&ScopeSet::default(),
			grant,
			OffsetDateTime::now_utc(),
		)
		.expect_err("A grant without a refresh token cannot enter the lifecycle.");

		assert!(matches!(err, Error::Config(ConfigError::MissingRefreshToken)));
	}

	#[test]
	fn rate_limited_exchange_surfaces_retry_hint() {
		let err = map_exchange_error(MarketplaceError::RateLimited {
			retry_after: Some(Duration::seconds(12)),
		});

		assert!(matches!(
			err,
			Error::RateLimitExceeded { retry_after: Some(d) } if d == Duration::seconds(12)
		));
	}
}
