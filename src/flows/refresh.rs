//! Refresh token rotation with generation CAS, theft detection, and 429 backoff.
//!
//! [`TokenLifecycle::refresh`] rotates a principal's tokens using the **currently
//! stored** refresh token—never a caller-supplied one; that asymmetry is the
//! theft-detection contract. An `invalid_grant`/`invalid_token` answer from the
//! marketplace deletes the record, emits a critical security event, and surfaces
//! [`Error::TokenTheftDetected`] so the caller forces full re-authentication. The
//! optimistic write-back means a concurrent refresh (user-triggered racing the
//! scheduled sweep) resolves to exactly one generation increment; the loser observes
//! the winner's record and never overwrites it.

// self
use crate::{
	_prelude::*,
	auth::{PrincipalId, TokenRecord},
	flows::{TokenLifecycle, authorize},
	marketplace::MarketplaceError,
	obs::{self, FlowKind, FlowOutcome, FlowSpan, SecurityEventKind},
	store::RotationOutcome,
};

const BACKOFF_BASE: Duration = Duration::seconds(1);
const MAX_REFRESH_ATTEMPTS: u32 = 3;

impl TokenLifecycle {
	/// Rotates the principal's tokens, performing generation CAS + singleflight guards.
	pub async fn refresh(&self, principal: &PrincipalId) -> Result<TokenRecord> {
		const KIND: FlowKind = FlowKind::Refresh;

		let span = FlowSpan::new(KIND, "refresh");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let guard = self.flow_guard(principal);
				let _singleflight = guard.lock().await;
				let current =
					self.credentials.fetch(principal).await?.ok_or_else(|| {
						Error::AuthExchangeFailed {
							reason: "No token record is stored for the principal.".into(),
						}
					})?;
				let expected_generation = current.rotation_generation;
				let grant = match self
					.marketplace
					.refresh_token(current.refresh_token.expose())
					.await
				{
					Ok(grant) => grant,
					Err(err) if err.is_grant_rejection() => {
						// Possible theft: the stored token is the only one we ever send, so an
						// upstream rejection means someone else rotated it. Fail closed.
						if let Err(delete_err) = self.credentials.delete(principal).await {
							tracing::warn!(
								target: "marketplace_sync.flows",
								principal = %principal,
								error = %delete_err,
								"Rejected token record could not be removed; purge it manually.",
							);
						}

						obs::record_security_event(
							SecurityEventKind::TokenTheft,
							principal.as_ref(),
							&err.to_string(),
						);

						return Err(Error::TokenTheftDetected {
							principal: principal.to_string(),
						});
					},
					Err(MarketplaceError::RateLimited { retry_after }) =>
						return Err(Error::RateLimitExceeded { retry_after }),
					Err(err) => return Err(map_refresh_error(err)),
				};
				let now = OffsetDateTime::now_utc();
				let expires_in = authorize::validate_expires_in(grant.expires_in)?;
				// The marketplace rotates refresh tokens on every grant; a response without
				// one keeps the stored secret so the record never loses refresh capability.
				let next_refresh = grant
					.refresh_token
					.unwrap_or_else(|| current.refresh_token.expose().to_owned());
				let rotated =
					current.rotated(grant.access_token, next_refresh, now + expires_in, now);
				let outcome = self
					.credentials
					.compare_and_swap_generation(principal, expected_generation, rotated.clone())
					.await?;

				match outcome {
					RotationOutcome::Updated => Ok(rotated),
					RotationOutcome::GenerationMismatch => {
						// Another refresh won the race; its record is the truth now.
						self.credentials.fetch(principal).await?.ok_or_else(|| {
							Error::AuthExchangeFailed {
								reason: "Token record was removed during refresh.".into(),
							}
						})
					},
					RotationOutcome::Missing => Err(Error::AuthExchangeFailed {
						reason: "Token record was removed during refresh.".into(),
					}),
				}
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	/// Wraps [`refresh`](Self::refresh) with retry on upstream throttling.
	///
	/// Honors the provider's `Retry-After` hint and falls back to exponential backoff
	/// (base 1 s) otherwise; theft detection is terminal and never retried. Exhaustion
	/// surfaces the final [`Error::RateLimitExceeded`].
	pub async fn refresh_with_backoff(&self, principal: &PrincipalId) -> Result<TokenRecord> {
		let mut attempt = 1;

		loop {
			match self.refresh(principal).await {
				Err(Error::RateLimitExceeded { retry_after })
					if attempt < MAX_REFRESH_ATTEMPTS =>
				{
					let delay = retry_after
						.filter(|d| d.is_positive())
						.unwrap_or_else(|| BACKOFF_BASE * 2_i32.pow(attempt - 1));

					tracing::debug!(
						target: "marketplace_sync.flows",
						principal = %principal,
						attempt,
						delay_ms = delay.whole_milliseconds() as i64,
						"Refresh throttled upstream; backing off.",
					);
					tokio::time::sleep(
						delay.try_into().unwrap_or(std::time::Duration::from_secs(1)),
					)
					.await;

					attempt += 1;
				},
				other => return other,
			}
		}
	}
}

fn map_refresh_error(err: MarketplaceError) -> Error {
	match err {
		MarketplaceError::Transport { .. } =>
			Error::MarketplaceUnavailable { status: None, message: err.to_string() },
		MarketplaceError::Upstream { status: Some(status), message } if status >= 500 =>
			Error::MarketplaceUnavailable { status: Some(status), message },
		other => Error::Marketplace(other),
	}
}
