//! Observability helpers: flow spans, optional metrics, and security events.
//!
//! Security-relevant failures (CSRF replay, token theft, IP rejection) are always
//! emitted as structured, severity-tagged `tracing` events before they are converted
//! into responses; enable the `metrics` feature to additionally increment the
//! `marketplace_sync_flow_total` counter for every attempt/success/failure.

// self
use crate::_prelude::*;

/// Lifecycle and ingestion flows observed by the crate.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowKind {
	/// Authorize-redirect preparation.
	Authorize,
	/// Authorization-code exchange.
	Exchange,
	/// Refresh token rotation.
	Refresh,
	/// Expiring-token sweep.
	Sweep,
	/// Webhook ingestion + cache synchronization.
	Webhook,
}
impl FlowKind {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowKind::Authorize => "authorize",
			FlowKind::Exchange => "exchange",
			FlowKind::Refresh => "refresh",
			FlowKind::Sweep => "sweep",
			FlowKind::Webhook => "webhook",
		}
	}
}
impl Display for FlowKind {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// Outcome labels recorded for each attempt.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum FlowOutcome {
	/// Entry to a flow helper.
	Attempt,
	/// Successful completion.
	Success,
	/// Failure propagated back to the caller.
	Failure,
}
impl FlowOutcome {
	/// Returns a stable label suitable for span or metric fields.
	pub const fn as_str(self) -> &'static str {
		match self {
			FlowOutcome::Attempt => "attempt",
			FlowOutcome::Success => "success",
			FlowOutcome::Failure => "failure",
		}
	}
}
impl Display for FlowOutcome {
	fn fmt(&self, f: &mut Formatter) -> FmtResult {
		f.write_str(self.as_str())
	}
}

/// A span builder used by lifecycle and ingestion flows.
#[derive(Clone, Debug)]
pub struct FlowSpan {
	span: tracing::Span,
}
impl FlowSpan {
	/// Creates a new span tagged with the provided flow kind + stage.
	pub fn new(kind: FlowKind, stage: &'static str) -> Self {
		Self { span: tracing::info_span!("marketplace_sync.flow", flow = kind.as_str(), stage) }
	}

	/// Instruments an async block without holding a guard across `.await` points.
	pub fn instrument<Fut>(&self, fut: Fut) -> tracing::instrument::Instrumented<Fut>
	where
		Fut: Future,
	{
		use tracing::Instrument;

		fut.instrument(self.span.clone())
	}
}

/// Records a flow outcome via the global metrics recorder (when enabled).
pub fn record_flow_outcome(kind: FlowKind, outcome: FlowOutcome) {
	#[cfg(feature = "metrics")]
	{
		metrics::counter!(
			"marketplace_sync_flow_total",
			"flow" => kind.as_str(),
			"outcome" => outcome.as_str()
		)
		.increment(1);
	}

	#[cfg(not(feature = "metrics"))]
	{
		let _ = (kind, outcome);
	}
}

/// Security event classes that must always reach the log stream.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum SecurityEventKind {
	/// An authorization state was consumed twice.
	CsrfReplay,
	/// A state value failed format validation or matched nothing.
	StateRejected,
	/// A stored refresh token was rejected upstream; credentials were invalidated.
	TokenTheft,
	/// A webhook arrived from an IP outside the provider allowlist.
	IpRejected,
}
impl SecurityEventKind {
	/// Returns a stable label for the event class.
	pub const fn as_str(self) -> &'static str {
		match self {
			SecurityEventKind::CsrfReplay => "csrf_replay",
			SecurityEventKind::StateRejected => "state_rejected",
			SecurityEventKind::TokenTheft => "token_theft",
			SecurityEventKind::IpRejected => "ip_rejected",
		}
	}

	/// Severity assigned to the event class.
	pub const fn severity(self) -> Severity {
		match self {
			SecurityEventKind::StateRejected => Severity::Warning,
			SecurityEventKind::CsrfReplay
			| SecurityEventKind::TokenTheft
			| SecurityEventKind::IpRejected => Severity::Critical,
		}
	}
}

/// Severity tags attached to security events.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Severity {
	/// Suspicious but plausibly benign.
	Warning,
	/// Treated as an active attack or credential compromise.
	Critical,
}
impl Severity {
	/// Returns a stable label for the severity.
	pub const fn as_str(self) -> &'static str {
		match self {
			Severity::Warning => "warning",
			Severity::Critical => "critical",
		}
	}
}

/// Emits a structured security event; `subject` names the principal, IP, or state involved.
///
/// The detail string must never contain token material; callers pass identifiers and
/// provider error codes only.
pub fn record_security_event(kind: SecurityEventKind, subject: &str, detail: &str) {
	match kind.severity() {
		Severity::Critical => tracing::error!(
			target: "marketplace_sync.security",
			event = kind.as_str(),
			severity = kind.severity().as_str(),
			subject,
			detail,
			"Security event.",
		),
		Severity::Warning => tracing::warn!(
			target: "marketplace_sync.security",
			event = kind.as_str(),
			severity = kind.severity().as_str(),
			subject,
			detail,
			"Security event.",
		),
	}
}

#[cfg(test)]
mod tests {
	// self
	use super::*;

	#[test]
	fn severities_match_the_failure_policy() {
		assert_eq!(SecurityEventKind::CsrfReplay.severity(), Severity::Critical);
		assert_eq!(SecurityEventKind::TokenTheft.severity(), Severity::Critical);
		assert_eq!(SecurityEventKind::IpRejected.severity(), Severity::Critical);
		assert_eq!(SecurityEventKind::StateRejected.severity(), Severity::Warning);
	}

	#[tokio::test]
	async fn instrument_wraps_future() {
		let span = FlowSpan::new(FlowKind::Refresh, "instrument_wraps_future");
		let value = span.instrument(async { 42 }).await;

		assert_eq!(value, 42);
	}

	#[test]
	fn record_helpers_do_not_panic_without_subscribers() {
		record_flow_outcome(FlowKind::Exchange, FlowOutcome::Failure);
		record_security_event(SecurityEventKind::IpRejected, "203.0.113.9", "allowlist miss");
	}
}
