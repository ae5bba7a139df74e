//! Tracker configuration and validation.

// std
use std::collections::HashSet;
// crates.io
use serde::{Deserialize, Serialize};
// self
use crate::_prelude::*;

/// Default retention for `Completed`/`Interrupted` entries.
pub const DEFAULT_CACHED_TTL: Duration = Duration::from_secs(24 * 60 * 60);
/// Default upper bound on how long an entry may remain `Processing`.
pub const DEFAULT_PROCESSING_TTL: Duration = Duration::from_secs(60);
/// Default interval between pruner passes.
pub const DEFAULT_PRUNE_INTERVAL: Duration = Duration::from_secs(60);
/// Default timeout a retry waits for an in-flight builder.
pub const DEFAULT_MAX_CONCURRENT_WAIT: Duration = Duration::from_secs(10);
/// Default number of expired entries removed per prune pass.
pub const DEFAULT_PRUNE_BATCH_SIZE: usize = 512;

/// Configuration for a [`crate::tracker::Tracker`].
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TrackerConfig {
	/// Retention for `Completed`/`Interrupted` entries after `finalize`.
	#[serde(default = "default_cached_ttl")]
	pub cached_ttl: Duration,
	/// Upper bound on how long an entry may remain `Processing` before the
	/// pruner reclaims it as a crash-safety backstop.
	#[serde(default = "default_processing_ttl")]
	pub processing_ttl: Duration,
	/// How often the pruner runs.
	#[serde(default = "default_prune_interval")]
	pub prune_interval: Duration,
	/// How long a retry waits for an in-flight builder before `Conflict`.
	#[serde(default = "default_max_concurrent_wait")]
	pub max_concurrent_wait: Duration,
	/// Maximum number of expired entries removed per prune pass.
	#[serde(default = "default_prune_batch_size")]
	pub prune_batch_size: usize,
	/// HTTP methods that bypass tracking entirely (case-insensitive).
	#[serde(default = "default_idempotent_methods")]
	pub idempotent_methods: HashSet<String>,
	/// Whether a detected registry/store invariant violation aborts the
	/// process (`true`, matching the "Fatal" category in the design notes)
	/// or is merely logged (`false`, useful for tests).
	#[serde(default = "default_true")]
	pub fail_fast_on_invariant_violation: bool,
}

fn default_cached_ttl() -> Duration {
	DEFAULT_CACHED_TTL
}
fn default_processing_ttl() -> Duration {
	DEFAULT_PROCESSING_TTL
}
fn default_prune_interval() -> Duration {
	DEFAULT_PRUNE_INTERVAL
}
fn default_max_concurrent_wait() -> Duration {
	DEFAULT_MAX_CONCURRENT_WAIT
}
fn default_prune_batch_size() -> usize {
	DEFAULT_PRUNE_BATCH_SIZE
}
fn default_idempotent_methods() -> HashSet<String> {
	["GET", "HEAD"].into_iter().map(String::from).collect()
}
fn default_true() -> bool {
	true
}
impl TrackerConfig {
	/// Validate the configured durations and batch size.
	pub fn validate(&self) -> Result<()> {
		if self.cached_ttl.is_zero() {
			return Err(Error::Validation {
				field: "cached_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.processing_ttl.is_zero() {
			return Err(Error::Validation {
				field: "processing_ttl",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.prune_interval.is_zero() {
			return Err(Error::Validation {
				field: "prune_interval",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.prune_batch_size == 0 {
			return Err(Error::Validation {
				field: "prune_batch_size",
				reason: "Must be greater than zero.".into(),
			});
		}
		if self.idempotent_methods.iter().any(|method| method.chars().any(|c| c.is_ascii_lowercase()))
		{
			return Err(Error::Validation {
				field: "idempotent_methods",
				reason: "Entries must be uppercase HTTP method tokens.".into(),
			});
		}

		Ok(())
	}

	/// Whether `method` bypasses tracking under this configuration.
	pub fn is_bypassed_method(&self, method: &str) -> bool {
		self.idempotent_methods.iter().any(|candidate| candidate.eq_ignore_ascii_case(method))
	}

	/// Override `cached_ttl`.
	pub fn with_cached_ttl(mut self, ttl: Duration) -> Self {
		self.cached_ttl = ttl;

		self
	}

	/// Override `processing_ttl`.
	pub fn with_processing_ttl(mut self, ttl: Duration) -> Self {
		self.processing_ttl = ttl;

		self
	}

	/// Override `max_concurrent_wait`.
	pub fn with_max_concurrent_wait(mut self, wait: Duration) -> Self {
		self.max_concurrent_wait = wait;

		self
	}
}
impl Default for TrackerConfig {
	fn default() -> Self {
		Self {
			cached_ttl: DEFAULT_CACHED_TTL,
			processing_ttl: DEFAULT_PROCESSING_TTL,
			prune_interval: DEFAULT_PRUNE_INTERVAL,
			max_concurrent_wait: DEFAULT_MAX_CONCURRENT_WAIT,
			prune_batch_size: DEFAULT_PRUNE_BATCH_SIZE,
			idempotent_methods: ["GET", "HEAD"].into_iter().map(String::from).collect(),
			fail_fast_on_invariant_violation: true,
		}
	}
}
