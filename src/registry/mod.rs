//! Builder registry: coordinates retries against an in-flight builder.
//!
//! The [`Store`](crate::store::Store) decides *who wins admission*; this
//! module decides *how losers wait*. A winner registers a slot here the
//! moment it is admitted, and every retry sharing the same
//! [`RequestId`](crate::id::RequestId) parks on that slot's [`Notify`]
//! instead of busy-polling the store.

// std
use std::{collections::HashMap, sync::Mutex};
// crates.io
use tokio::sync::Notify;
// self
use crate::{_prelude::*, cache::entry::CapturedResponse, id::RequestId};

/// The terminal result a builder reports back through its slot.
#[derive(Clone, Debug)]
pub enum BuilderOutcome {
	/// The builder completed and captured a response.
	Completed(CapturedResponse),
	/// The builder terminated abnormally (explicitly or via crash detection).
	Interrupted,
}

/// What a waiting retry observes after parking on a slot.
#[derive(Clone, Debug)]
pub enum WaitOutcome {
	/// The builder finished normally; replay this response.
	Finished(CapturedResponse),
	/// The builder terminated abnormally.
	Died,
	/// Still running as of the wait timeout; the caller should report `Conflict`.
	StillRunning,
}

#[derive(Debug, Default)]
struct BuilderSlot {
	outcome: std::sync::OnceLock<BuilderOutcome>,
	notify: Notify,
}

/// Tracks which [`RequestId`]s currently have a live builder, and lets
/// retries wait on the outcome instead of racing the store.
///
/// Bookkeeping is a plain [`Mutex`]-guarded map: every critical section here
/// is non-blocking pointer/enum work, never an `.await`, so a `std::sync`
/// mutex is the right tool rather than `tokio::sync::Mutex`.
#[derive(Debug, Default)]
pub struct BuilderRegistry {
	slots: Mutex<HashMap<RequestId, std::sync::Arc<BuilderSlot>>>,
}
impl BuilderRegistry {
	/// Register a freshly admitted `request_id` as having a live builder.
	///
	/// Fails with [`Error::AlreadyRegistered`] if a slot already exists *and*
	/// is still live. A slot whose outcome is already set is stale leftover
	/// from a prior generation of this id (e.g. pruned-then-reused) that
	/// simply hasn't been deregistered yet; registering over it is safe and
	/// expected, matching the store/registry desync the design notes call
	/// out as transient.
	pub fn register(&self, request_id: &RequestId) -> Result<()> {
		let mut slots = self.slots.lock().unwrap();

		if let Some(existing) = slots.get(request_id) {
			if existing.outcome.get().is_none() {
				return Err(Error::AlreadyRegistered);
			}
		}

		slots.insert(request_id.clone(), std::sync::Arc::new(BuilderSlot::default()));

		Ok(())
	}

	/// Wait up to `timeout` for `request_id`'s builder to finish.
	///
	/// Returns [`WaitOutcome::StillRunning`] both when no slot is registered
	/// (the builder already deregistered between the caller's store lookup
	/// and this call) and when `timeout` elapses first.
	pub async fn wait_for(&self, request_id: &RequestId, timeout: Duration) -> WaitOutcome {
		let Some(slot) = self.slots.lock().unwrap().get(request_id).cloned() else {
			return WaitOutcome::StillRunning;
		};

		if let Some(outcome) = slot.outcome.get() {
			return to_wait_outcome(outcome);
		}

		let notified = slot.notify.notified();

		tokio::pin!(notified);
		notified.as_mut().enable();

		if let Some(outcome) = slot.outcome.get() {
			return to_wait_outcome(outcome);
		}

		match tokio::time::timeout(timeout, notified).await {
			Ok(()) => slot.outcome.get().map(to_wait_outcome).unwrap_or(WaitOutcome::StillRunning),
			Err(_) => WaitOutcome::StillRunning,
		}
	}

	/// Record the terminal outcome for `request_id` and wake every waiter.
	///
	/// A no-op if the slot has already been finished or was never
	/// registered; callers (crash handling racing normal finalize) may call
	/// this more than once.
	pub fn finish(&self, request_id: &RequestId, outcome: BuilderOutcome) {
		let slots = self.slots.lock().unwrap();

		if let Some(slot) = slots.get(request_id) {
			let _ = slot.outcome.set(outcome);

			slot.notify.notify_waiters();
		}
	}

	/// Remove `request_id`'s slot once every interested waiter has observed
	/// its outcome (or at least once `finish` has run).
	pub fn deregister(&self, request_id: &RequestId) {
		self.slots.lock().unwrap().remove(request_id);
	}
}

fn to_wait_outcome(outcome: &BuilderOutcome) -> WaitOutcome {
	match outcome {
		BuilderOutcome::Completed(response) => WaitOutcome::Finished(response.clone()),
		BuilderOutcome::Interrupted => WaitOutcome::Died,
	}
}
