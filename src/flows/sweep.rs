//! Scheduled sweep that proactively rotates tokens nearing expiry.

// self
use crate::{
	_prelude::*,
	auth::PrincipalId,
	error::ConfigError,
	flows::TokenLifecycle,
	obs::{self, FlowKind, FlowOutcome, FlowSpan},
	store::{CredentialStore, StoreError},
};

/// Default refresh horizon: records expiring within this window get rotated.
pub const DEFAULT_SWEEP_HORIZON: Duration = Duration::hours(1);

/// Boxed future returned by [`PrincipalDirectory::list_active`].
pub type DirectoryFuture<'a> =
	Pin<Box<dyn Future<Output = Result<Vec<PrincipalId>, StoreError>> + 'a + Send>>;

/// Capability that enumerates the principals a sweep must visit.
///
/// Chosen at startup and injected explicitly—the sweep never guesses at a principal
/// population from ambient state.
pub trait PrincipalDirectory
where
	Self: Send + Sync,
{
	/// Lists every active principal.
	fn list_active(&self) -> DirectoryFuture<'_>;
}

/// Directory backed by an explicit, administrator-maintained principal list.
#[derive(Clone, Debug, Default)]
pub struct AdminListDirectory(Vec<PrincipalId>);
impl AdminListDirectory {
	/// Creates a directory over the provided principal list.
	pub fn new(principals: impl IntoIterator<Item = PrincipalId>) -> Self {
		Self(principals.into_iter().collect())
	}
}
impl PrincipalDirectory for AdminListDirectory {
	fn list_active(&self) -> DirectoryFuture<'_> {
		Box::pin(async move { Ok(self.0.clone()) })
	}
}

/// Fallback directory that treats every stored credential as an active principal.
#[derive(Clone)]
pub struct CredentialIndexDirectory(Arc<dyn CredentialStore>);
impl CredentialIndexDirectory {
	/// Creates a directory over the credential store's principal index.
	pub fn new(credentials: Arc<dyn CredentialStore>) -> Self {
		Self(credentials)
	}
}
impl PrincipalDirectory for CredentialIndexDirectory {
	fn list_active(&self) -> DirectoryFuture<'_> {
		self.0.list_principals()
	}
}
impl Debug for CredentialIndexDirectory {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str("CredentialIndexDirectory(..)")
	}
}

/// Per-principal sweep verdict.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "outcome", content = "detail")]
pub enum SweepOutcome {
	/// Token was expiring and rotated successfully.
	Refreshed,
	/// Token is valid beyond the horizon; nothing to do.
	Valid,
	/// Principal has no stored record.
	NoTokenData,
	/// Rotation was attempted and failed; the error text is retained.
	RefreshFailed(String),
	/// The principal could not even be inspected (store failure).
	Error(String),
}

/// Aggregated counters returned by [`TokenLifecycle::sweep_expiring_tokens`].
#[derive(Clone, Debug, Default, Serialize)]
pub struct SweepReport {
	/// Principals visited.
	pub checked: usize,
	/// Records rotated.
	pub refreshed: usize,
	/// Records still valid beyond the horizon.
	pub valid: usize,
	/// Principals without a stored record.
	pub no_token_data: usize,
	/// Failed rotations plus store-level failures.
	pub errors: usize,
	/// Per-principal verdicts, in visit order.
	pub outcomes: Vec<(PrincipalId, SweepOutcome)>,
}
impl SweepReport {
	fn record(&mut self, principal: PrincipalId, outcome: SweepOutcome) {
		self.checked += 1;

		match &outcome {
			SweepOutcome::Refreshed => self.refreshed += 1,
			SweepOutcome::Valid => self.valid += 1,
			SweepOutcome::NoTokenData => self.no_token_data += 1,
			SweepOutcome::RefreshFailed(_) | SweepOutcome::Error(_) => self.errors += 1,
		}

		self.outcomes.push((principal, outcome));
	}
}

impl TokenLifecycle {
	/// Walks every known principal and rotates records expiring within `horizon`.
	///
	/// Outcomes are isolated per principal—one marketplace failure never aborts the
	/// sweep. Fails descriptively when no [`PrincipalDirectory`] was configured.
	pub async fn sweep_expiring_tokens(&self, horizon: Duration) -> Result<SweepReport> {
		const KIND: FlowKind = FlowKind::Sweep;

		let span = FlowSpan::new(KIND, "sweep_expiring_tokens");

		obs::record_flow_outcome(KIND, FlowOutcome::Attempt);

		let result = span
			.instrument(async move {
				let directory =
					self.directory().ok_or(ConfigError::MissingPrincipalDirectory)?;
				let principals = directory.list_active().await?;
				let now = OffsetDateTime::now_utc();
				let mut report = SweepReport::default();

				for principal in principals {
					let outcome = self.sweep_one(&principal, now, horizon).await;

					if let SweepOutcome::RefreshFailed(detail) | SweepOutcome::Error(detail) =
						&outcome
					{
						tracing::warn!(
							target: "marketplace_sync.flows",
							principal = %principal,
							detail,
							"Sweep failed for principal; continuing.",
						);
					}

					report.record(principal, outcome);
				}

				tracing::info!(
					target: "marketplace_sync.flows",
					checked = report.checked,
					refreshed = report.refreshed,
					valid = report.valid,
					no_token_data = report.no_token_data,
					errors = report.errors,
					"Token sweep completed.",
				);

				Ok(report)
			})
			.await;

		match &result {
			Ok(_) => obs::record_flow_outcome(KIND, FlowOutcome::Success),
			Err(_) => obs::record_flow_outcome(KIND, FlowOutcome::Failure),
		}

		result
	}

	async fn sweep_one(
		&self,
		principal: &PrincipalId,
		now: OffsetDateTime,
		horizon: Duration,
	) -> SweepOutcome {
		let record = match self.credentials.fetch(principal).await {
			Ok(Some(record)) => record,
			Ok(None) => return SweepOutcome::NoTokenData,
			Err(err) => return SweepOutcome::Error(err.to_string()),
		};

		if !record.expires_within(now, horizon) {
			return SweepOutcome::Valid;
		}

		match self.refresh_with_backoff(principal).await {
			Ok(_) => SweepOutcome::Refreshed,
			Err(err) => SweepOutcome::RefreshFailed(err.to_string()),
		}
	}
}
