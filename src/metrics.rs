//! Metrics helpers and in-process telemetry bookkeeping.

// std
use std::sync::atomic::{AtomicU64, Ordering};
#[cfg(feature = "prometheus")]
use std::sync::OnceLock;
// crates.io
use metrics::Label;
use smallvec::SmallVec;
#[cfg(feature = "prometheus")]
use metrics_exporter_prometheus::{PrometheusBuilder, PrometheusHandle};
// self
use crate::_prelude::*;

type LabelSet = SmallVec<[Label; 1]>;

const METRIC_ADMISSIONS_TOTAL: &str = "idempotency_tracker_admissions_total";
const METRIC_OUTCOMES_TOTAL: &str = "idempotency_tracker_outcomes_total";
const METRIC_PRUNED_TOTAL: &str = "idempotency_tracker_pruned_total";
const METRIC_PRUNE_DURATION: &str = "idempotency_tracker_prune_duration_seconds";

/// Shared Prometheus handle installed by [`install_default_exporter`].
#[cfg(feature = "prometheus")]
static PROMETHEUS_HANDLE: OnceLock<PrometheusHandle> = OnceLock::new();

/// The terminal shape a [`crate::tracker::Tracker::track`] call took, for
/// tagging the `outcomes_total` counter.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum OutcomeKind {
	/// A fresh request id was admitted.
	Admitted,
	/// A completed response was replayed.
	Replayed,
	/// An in-flight builder didn't finish before the wait timeout.
	Conflict,
	/// The request id was reused with a different fingerprint.
	Mismatch,
	/// The original builder had terminated abnormally.
	Interrupted,
}
impl OutcomeKind {
	fn as_label(self) -> &'static str {
		match self {
			Self::Admitted => "admitted",
			Self::Replayed => "replayed",
			Self::Conflict => "conflict",
			Self::Mismatch => "mismatch",
			Self::Interrupted => "interrupted",
		}
	}
}

/// Thread-safe in-process accumulator, mirrored into `metrics` counters by
/// [`record_outcome`]/[`record_prune`] but also queryable directly without a
/// Prometheus exporter installed.
#[derive(Debug, Default)]
pub struct TrackerMetrics {
	admitted: AtomicU64,
	replayed: AtomicU64,
	conflicts: AtomicU64,
	mismatches: AtomicU64,
	interrupted: AtomicU64,
	pruned: AtomicU64,
}
impl TrackerMetrics {
	/// Create a fresh, zeroed accumulator.
	pub fn new() -> Arc<Self> {
		Arc::new(Self::default())
	}

	/// Record an outcome against the matching counter.
	pub fn record(&self, kind: OutcomeKind) {
		let counter = match kind {
			OutcomeKind::Admitted => &self.admitted,
			OutcomeKind::Replayed => &self.replayed,
			OutcomeKind::Conflict => &self.conflicts,
			OutcomeKind::Mismatch => &self.mismatches,
			OutcomeKind::Interrupted => &self.interrupted,
		};

		counter.fetch_add(1, Ordering::Relaxed);
	}

	/// Record `count` entries reclaimed by a prune pass.
	pub fn record_pruned(&self, count: u64) {
		self.pruned.fetch_add(count, Ordering::Relaxed);
	}

	/// Take a point-in-time snapshot for status reporting.
	pub fn snapshot(&self) -> TrackerMetricsSnapshot {
		TrackerMetricsSnapshot {
			admitted: self.admitted.load(Ordering::Relaxed),
			replayed: self.replayed.load(Ordering::Relaxed),
			conflicts: self.conflicts.load(Ordering::Relaxed),
			mismatches: self.mismatches.load(Ordering::Relaxed),
			interrupted: self.interrupted.load(Ordering::Relaxed),
			pruned: self.pruned.load(Ordering::Relaxed),
		}
	}
}

/// Read-only snapshot of [`TrackerMetrics`].
#[derive(Clone, Debug)]
pub struct TrackerMetricsSnapshot {
	/// Total requests admitted as a fresh builder.
	pub admitted: u64,
	/// Total requests served a replayed response.
	pub replayed: u64,
	/// Total requests that hit a still-running builder.
	pub conflicts: u64,
	/// Total requests rejected for a fingerprint mismatch.
	pub mismatches: u64,
	/// Total requests that observed a crashed builder.
	pub interrupted: u64,
	/// Total entries removed by the pruner over this process's lifetime.
	pub pruned: u64,
}
impl TrackerMetricsSnapshot {
	/// Ratio of replayed responses over total completed outcomes
	/// (admitted requests are excluded since they have no replay to speak of).
	pub fn replay_rate(&self) -> f64 {
		let decided = self.replayed + self.conflicts + self.mismatches + self.interrupted;

		if decided == 0 { 0.0 } else { self.replayed as f64 / decided as f64 }
	}
}

/// Install the default Prometheus recorder backed by `metrics`.
///
/// Multiple invocations are safe; subsequent calls become no-ops once the
/// recorder is installed.
#[cfg(feature = "prometheus")]
pub fn install_default_exporter() -> Result<()> {
	if PROMETHEUS_HANDLE.get().is_some() {
		return Ok(());
	}

	let handle = PrometheusBuilder::new()
		.install_recorder()
		.map_err(|err| Error::Metrics(err.to_string()))?;
	let _ = PROMETHEUS_HANDLE.set(handle);

	Ok(())
}

/// Access the global Prometheus exporter handle when installed.
#[cfg(feature = "prometheus")]
pub fn prometheus_handle() -> Option<&'static PrometheusHandle> {
	PROMETHEUS_HANDLE.get()
}

/// Record an outcome on the global `metrics` recorder.
pub fn record_outcome(kind: OutcomeKind) {
	metrics::counter!(METRIC_ADMISSIONS_TOTAL).increment(u64::from(kind == OutcomeKind::Admitted));
	metrics::counter!(METRIC_OUTCOMES_TOTAL, outcome_labels(kind).iter()).increment(1);
}

/// Record a prune pass's removal count and duration on the global recorder.
pub fn record_prune(removed: u64, duration: Duration) {
	metrics::counter!(METRIC_PRUNED_TOTAL).increment(removed);
	metrics::histogram!(METRIC_PRUNE_DURATION).record(duration.as_secs_f64());
}

fn outcome_labels(kind: OutcomeKind) -> LabelSet {
	let mut labels = LabelSet::new();

	labels.push(Label::new("outcome", kind.as_label()));

	labels
}
