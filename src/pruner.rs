//! Background task that reclaims expired store entries.

// std
use std::sync::Arc;
// self
use crate::{_prelude::*, store::Store};

/// Periodically calls [`Store::prune`] in bounded batches.
///
/// One batch per tick, not "drain the backlog in one tick" — an unbounded
/// prune loop would hold the store's write lock for as long as expiry
/// backlog exists, defeating the whole point of the `max_batch` cap. A
/// pathological backlog just takes a few extra ticks to clear.
#[derive(Debug)]
pub struct Pruner<S: Store> {
	store: Arc<S>,
	interval: Duration,
	batch: usize,
}
impl<S: Store + 'static> Pruner<S> {
	/// Build a pruner over `store`, running every `interval` and removing at
	/// most `batch` entries per pass.
	pub fn new(store: Arc<S>, interval: Duration, batch: usize) -> Self {
		Self { store, interval, batch }
	}

	/// Spawn the pruning loop as a detached background task.
	pub fn spawn(self) -> tokio::task::JoinHandle<()> {
		tokio::spawn(self.run())
	}

	async fn run(self) {
		let mut ticker = tokio::time::interval(self.interval);

		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

		loop {
			ticker.tick().await;

			#[cfg(feature = "metrics")]
			let started = tokio::time::Instant::now();

			match self.store.prune(Utc::now(), self.batch).await {
				Ok(0) => {}
				Ok(removed) => {
					tracing::debug!(removed, "pruned expired entries");

					#[cfg(feature = "metrics")]
					crate::metrics::record_prune(removed as u64, started.elapsed());
				}
				Err(err) => tracing::error!(error = %err, "prune pass failed"),
			}
		}
	}
}
