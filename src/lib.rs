//! Concurrency-coordinating idempotent request tracker for HTTP services.
//!
//! Serializes concurrent requests sharing an `Idempotency-Key`, detects
//! payload/URI fingerprint mismatches, replays completed responses, and
//! marks crashed in-flight requests as `Interrupted` so retries get a
//! deterministic error instead of being re-executed.
//!
//! The [`tracker::Tracker`] is the core: it coordinates a pluggable
//! [`store::Store`] with a [`registry::BuilderRegistry`] to give admission
//! its linearizability guarantee. [`adapter`] (behind the `axum` feature)
//! wires that core into an Axum middleware.

#![deny(clippy::all, missing_docs, unused_crate_dependencies)]

#[cfg(feature = "axum")]
pub mod adapter;
pub mod cache;
pub mod config;
#[cfg(feature = "metrics")]
pub mod metrics;
pub mod pruner;
pub mod registry;
pub mod store;
pub mod tracker;

mod error;
mod id;
mod util;
mod _prelude {
	pub use std::{sync::Arc, time::Duration};

	pub use chrono::{DateTime, TimeDelta, Utc};

	pub use crate::{Error, Result};
}

#[cfg(feature = "prometheus")] pub use crate::metrics::install_default_exporter;
pub use crate::{
	config::TrackerConfig,
	error::{Error, Result},
	id::{Fingerprint, IdentityTransform, RequestId},
	pruner::Pruner,
	registry::BuilderRegistry,
	store::{MemoryStore, Store, StoreConfig},
	tracker::{Admission, FinalOutcome, Outcome, Tracker},
};
