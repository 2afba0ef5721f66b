#![cfg(all(feature = "reqwest", feature = "test"))]

// crates.io
use httpmock::prelude::*;
// self
use marketplace_sync::{
	_preludet::*,
	auth::{PrincipalId, ScopeSet, TokenRecord},
	error::ConfigError,
	flows::{AdminListDirectory, DEFAULT_SWEEP_HORIZON},
	store::{CredentialStore, MemoryStore},
};

async fn seed_record(
	store: &MemoryStore,
	principal: PrincipalId,
	refresh: &str,
	expires_in: Duration,
) {
	let record = TokenRecord::builder(principal, ScopeSet::parse("offline_access"))
		.access_token("access-sweep")
		.refresh_token(refresh)
		.issued_at(OffsetDateTime::now_utc())
		.expires_in(expires_in)
		.build()
		.expect("Token record fixture should build successfully.");

	store.save(record).await.expect("Failed to seed the sweep record into the store.");
}

fn principal(name: &str) -> PrincipalId {
	PrincipalId::new(name).expect("Principal fixture should be valid.")
}

#[tokio::test]
async fn sweep_isolates_outcomes_per_principal() {
	let server = MockServer::start_async().await;
	let (lifecycle, store) = build_test_lifecycle(&server.url("/"));
	let principals: Vec<_> =
		["sweep-1", "sweep-2", "sweep-3", "sweep-4", "sweep-5"].map(principal).into();
	let lifecycle =
		lifecycle.with_directory(Arc::new(AdminListDirectory::new(principals.clone())));

	// Two records inside the horizon (one rotates, one fails upstream), two valid well
	// beyond it, and one principal with no record at all.
	seed_record(&store, principals[0].clone(), "refresh-rotates", Duration::minutes(10)).await;
	seed_record(&store, principals[1].clone(), "refresh-breaks", Duration::minutes(10)).await;
	seed_record(&store, principals[2].clone(), "refresh-idle-1", Duration::hours(10)).await;
	seed_record(&store, principals[3].clone(), "refresh-idle-2", Duration::hours(10)).await;

	let rotate_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/token")
				.form_urlencoded_tuple("refresh_token", "refresh-rotates");
			then.status(200).header("content-type", "application/json").body(
				"{\"access_token\":\"access-swept\",\"refresh_token\":\"refresh-swept\",\"expires_in\":21600}",
			);
		})
		.await;
	let failing_mock = server
		.mock_async(|when, then| {
			when.method(POST)
				.path("/oauth/token")
				.form_urlencoded_tuple("refresh_token", "refresh-breaks");
			then.status(500)
				.header("content-type", "application/json")
				.body("{\"message\":\"maintenance\"}");
		})
		.await;
	let report = lifecycle
		.sweep_expiring_tokens(DEFAULT_SWEEP_HORIZON)
		.await
		.expect("Sweep should complete despite per-principal failures.");

	rotate_mock.assert_async().await;
	failing_mock.assert_async().await;

	assert_eq!(report.checked, 5);
	assert_eq!(report.refreshed, 1);
	assert_eq!(report.valid, 2);
	assert_eq!(report.no_token_data, 1);
	assert_eq!(report.errors, 1);

	// The successful rotation landed in the store.
	let rotated = store
		.fetch(&principals[0])
		.await
		.expect("Credential store fetch should succeed.")
		.expect("Swept record should remain present.");

	assert_eq!(rotated.rotation_generation, 1);
	assert_eq!(rotated.refresh_token.expose(), "refresh-swept");

	// The failed rotation left the previous record untouched.
	let untouched = store
		.fetch(&principals[1])
		.await
		.expect("Credential store fetch should succeed.")
		.expect("Failed rotation should not remove the record.");

	assert_eq!(untouched.rotation_generation, 0);
}

#[tokio::test]
async fn sweep_without_a_directory_is_a_configuration_error() {
	let server = MockServer::start_async().await;
	let (lifecycle, _store) = build_test_lifecycle(&server.url("/"));
	let err = lifecycle
		.sweep_expiring_tokens(DEFAULT_SWEEP_HORIZON)
		.await
		.expect_err("A sweep without a principal directory should fail descriptively.");

	assert!(matches!(err, Error::Config(ConfigError::MissingPrincipalDirectory)));
}
