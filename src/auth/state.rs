//! One-time CSRF/PKCE authorization state issued before the marketplace redirect.

// crates.io
use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rand::{Rng, distr::Alphanumeric};
use sha2::{Digest, Sha256};
// self
use crate::{_prelude::*, auth::SecretString};

const STATE_LEN: usize = 32;
const PKCE_VERIFIER_LEN: usize = 64;
const STATE_TTL: Duration = Duration::minutes(10);

/// Supported PKCE challenge methods.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PkceCodeChallengeMethod {
	/// SHA-256 based PKCE (RFC 7636 S256).
	S256,
}
impl PkceCodeChallengeMethod {
	/// Returns the RFC 7636 identifier for the challenge method.
	pub fn as_str(self) -> &'static str {
		match self {
			PkceCodeChallengeMethod::S256 => "S256",
		}
	}
}

/// Rejection reasons for state values that fail format pre-validation.
///
/// Format checks run before any store lookup so malformed probes are refused without
/// paying for storage I/O.
#[derive(Clone, Debug, PartialEq, Eq, ThisError)]
pub enum StateFormatError {
	/// The state is shorter than the issued length.
	#[error("State value is shorter than {min} characters.")]
	TooShort {
		/// Minimum accepted character count.
		min: usize,
	},
	/// The state contains characters outside the URL-safe alphabet.
	#[error("State value contains characters outside the URL-safe alphabet.")]
	InvalidAlphabet,
}

/// Short-lived, one-time binding between a CSRF state nonce and a PKCE verifier.
///
/// At most one non-consumed state exists per in-flight authorization attempt; the
/// state store enforces one-time consumption and flags re-consumption as replay.
#[derive(Clone, Serialize, Deserialize)]
pub struct AuthorizationState {
	/// Opaque high-entropy nonce round-tripped through the authorize redirect.
	pub state_value: String,
	/// PKCE code verifier bound to this attempt; secret until the code exchange.
	pub code_verifier: SecretString,
	/// Instant the state was issued.
	pub created_at: OffsetDateTime,
	/// Instant after which consumption fails with `Expired`.
	pub expires_at: OffsetDateTime,
}
impl AuthorizationState {
	/// Issues a fresh state + verifier pair with the standard TTL.
	pub fn issue() -> Self {
		Self::issue_at(OffsetDateTime::now_utc())
	}

	/// Issues a fresh state + verifier pair anchored on the provided instant.
	pub fn issue_at(now: OffsetDateTime) -> Self {
		Self {
			state_value: random_string(STATE_LEN),
			code_verifier: SecretString::new(random_string(PKCE_VERIFIER_LEN)),
			created_at: now,
			expires_at: now + STATE_TTL,
		}
	}

	/// PKCE code challenge derived from the secret verifier (S256).
	pub fn code_challenge(&self) -> String {
		let mut hasher = Sha256::new();

		hasher.update(self.code_verifier.expose().as_bytes());

		URL_SAFE_NO_PAD.encode(hasher.finalize())
	}

	/// PKCE challenge method (currently always `S256`).
	pub fn code_challenge_method(&self) -> PkceCodeChallengeMethod {
		PkceCodeChallengeMethod::S256
	}

	/// Returns `true` once the state has outlived its TTL.
	pub fn is_expired_at(&self, instant: OffsetDateTime) -> bool {
		instant >= self.expires_at
	}
}
impl Debug for AuthorizationState {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.debug_struct("AuthorizationState")
			.field("state_value", &self.state_value)
			.field("code_verifier", &"<redacted>")
			.field("created_at", &self.created_at)
			.field("expires_at", &self.expires_at)
			.finish()
	}
}

/// Validates the shape of a returned state value before any store lookup.
pub fn validate_state_format(state: &str) -> Result<(), StateFormatError> {
	if state.len() < STATE_LEN {
		return Err(StateFormatError::TooShort { min: STATE_LEN });
	}
	if !state.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-' || b == b'_') {
		return Err(StateFormatError::InvalidAlphabet);
	}

	Ok(())
}

fn random_string(len: usize) -> String {
	rand::rng().sample_iter(Alphanumeric).take(len).map(char::from).collect()
}
