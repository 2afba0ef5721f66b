#![cfg(all(feature = "reqwest", feature = "test"))]

// std
use std::collections::HashMap;
// crates.io
use httpmock::prelude::*;
// self
use marketplace_sync::{_preludet::*, auth::PrincipalId, store::CredentialStore};

#[tokio::test]
async fn start_authorization_builds_pkce_redirect() {
	let server = MockServer::start_async().await;
	let (lifecycle, _store) = build_test_lifecycle(&server.url("/"));
	let redirect = lifecycle
		.start_authorization()
		.await
		.expect("Authorization preparation should succeed.");
	let params: HashMap<_, _> = redirect.authorize_url.query_pairs().into_owned().collect();

	assert_eq!(params.get("response_type").map(String::as_str), Some("code"));
	assert_eq!(params.get("client_id").map(String::as_str), Some("test-client"));
	assert_eq!(params.get("code_challenge_method").map(String::as_str), Some("S256"));
	assert_eq!(params.get("state").map(String::as_str), Some(redirect.state.as_str()));
	assert!(redirect.state.len() >= 32, "State should carry at least 32 characters of entropy.");

	let challenge = params.get("code_challenge").expect("Redirect should carry a PKCE challenge.");

	assert!(!challenge.is_empty());
	assert!(
		!challenge.contains('=') && !challenge.contains('+'),
		"Challenge should be base64url-encoded without padding.",
	);
}

#[tokio::test]
async fn exchange_persists_a_generation_zero_record() {
	let server = MockServer::start_async().await;
	let (lifecycle, store) = build_test_lifecycle(&server.url("/"));
	let principal =
		PrincipalId::new("user-exchange").expect("Principal fixture should be valid.");
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-0\",\"refresh_token\":\"refresh-0\",\"token_type\":\"bearer\",\"expires_in\":21600,\"scope\":\"offline_access read\"}",
			);
		})
		.await;
	let redirect = lifecycle
		.start_authorization()
		.await
		.expect("Authorization preparation should succeed.");
	let record = lifecycle
		.exchange_code(&principal, "auth-code-1", &redirect.state)
		.await
		.expect("Code exchange should succeed.");

	mock.assert_async().await;

	assert_eq!(record.rotation_generation, 0);
	assert_eq!(record.access_token.expose(), "access-0");
	assert_eq!(record.refresh_token.expose(), "refresh-0");

	let stored = store
		.fetch(&principal)
		.await
		.expect("Credential store fetch should succeed.")
		.expect("Record should be persisted after the exchange.");

	assert_eq!(stored.rotation_generation, 0);
	assert_eq!(stored.access_token.expose(), "access-0");
}

#[tokio::test]
async fn replayed_state_is_rejected_as_csrf() {
	let server = MockServer::start_async().await;
	let (lifecycle, _store) = build_test_lifecycle(&server.url("/"));
	let principal = PrincipalId::new("user-replay").expect("Principal fixture should be valid.");
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-0\",\"refresh_token\":\"refresh-0\",\"expires_in\":3600}",
			);
		})
		.await;
	let redirect = lifecycle
		.start_authorization()
		.await
		.expect("Authorization preparation should succeed.");

	lifecycle
		.exchange_code(&principal, "auth-code-1", &redirect.state)
		.await
		.expect("First exchange should succeed.");

	let err = lifecycle
		.exchange_code(&principal, "auth-code-1", &redirect.state)
		.await
		.expect_err("Replaying a consumed state should be rejected.");

	assert!(matches!(err, Error::CsrfViolation));

	// Only the first exchange may reach the token endpoint.
	mock.assert_calls_async(1).await;
}

#[tokio::test]
async fn malformed_state_never_reaches_the_provider() {
	let server = MockServer::start_async().await;
	let (lifecycle, _store) = build_test_lifecycle(&server.url("/"));
	let principal =
		PrincipalId::new("user-malformed").expect("Principal fixture should be valid.");
	let mock = server
		.mock_async(|when, then| {
			when.method(POST).path("/oauth/token");
			then.status(200);
		})
		.await;
	let err = lifecycle
		.exchange_code(&principal, "auth-code-1", "short!!")
		.await
		.expect_err("A malformed state should be rejected before any store lookup.");

	assert!(matches!(err, Error::AuthExchangeFailed { .. }));

	mock.assert_calls_async(0).await;
}

#[tokio::test]
async fn unknown_state_fails_the_exchange() {
	let server = MockServer::start_async().await;
	let (lifecycle, _store) = build_test_lifecycle(&server.url("/"));
	let principal = PrincipalId::new("user-unknown").expect("Principal fixture should be valid.");
	// Well-formed but never issued.
	let foreign_state = "A".repeat(32);
	let err = lifecycle
		.exchange_code(&principal, "auth-code-1", &foreign_state)
		.await
		.expect_err("An unissued state should fail the exchange.");

	assert!(matches!(err, Error::AuthExchangeFailed { .. }));
}
