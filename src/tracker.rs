//! The request tracker: the admission state machine itself.

// std
use std::sync::Arc;
// self
use crate::{
	_prelude::*,
	cache::entry::{CapturedResponse, EntryState},
	config::TrackerConfig,
	id::{Fingerprint, RequestId},
	registry::{BuilderOutcome, BuilderRegistry, WaitOutcome},
	store::{MemoryStore, Store},
	util::add_duration,
};

/// Result of calling [`Tracker::track`].
#[derive(Debug)]
pub enum Outcome<S: Store = MemoryStore> {
	/// No prior entry for this request id; the caller must build the
	/// response and call [`Admission::finalize`].
	Proceed(Admission<S>),
	/// Another builder is currently in flight and `max_concurrent_wait`
	/// elapsed before it finished; the caller should ask the client to retry.
	Conflict,
	/// The same request id was reused with a different fingerprint.
	Mismatch,
	/// A completed response is available; replay it verbatim.
	Replay { response: CapturedResponse, expires_at: DateTime<Utc> },
	/// The original builder for this request id terminated abnormally.
	Interrupted { expires_at: DateTime<Utc> },
}

/// The terminal outcome a builder reports through [`Admission::finalize`].
#[derive(Debug)]
pub enum FinalOutcome {
	/// The builder produced a response to cache and replay.
	Completed(CapturedResponse),
	/// The builder is explicitly reporting its own abnormal termination
	/// (as opposed to the tracker inferring it from an unconsumed
	/// [`Admission`]).
	Interrupted,
}

/// Proof that the caller won admission for a `RequestId` and is now the
/// sole builder responsible for it.
///
/// Dropping an `Admission` without calling [`Admission::finalize`] — a
/// panic unwinding through the handler, a cancelled future, a client
/// disconnect — is itself meaningful: the entry is recorded as
/// `Interrupted` so the next retry isn't stuck waiting on a builder that
/// no longer exists.
#[derive(Debug)]
pub struct Admission<S: Store = MemoryStore> {
	request_id: RequestId,
	tracker: Tracker<S>,
	armed: bool,
}
impl<S: Store> Admission<S> {
	fn new(request_id: RequestId, tracker: Tracker<S>) -> Self {
		Self { request_id, tracker, armed: true }
	}

	/// The request id this admission owns.
	pub fn request_id(&self) -> &RequestId {
		&self.request_id
	}
}
impl<S: Store + 'static> Admission<S> {
	/// Report the builder's terminal outcome, releasing any parked retries
	/// and persisting the result for future replay.
	///
	/// Consumes `self`; a builder that already called this will not trigger
	/// the crash-detection `Drop` path, since disarming happens before any
	/// of the actual work runs. Cancelling the future returned by this
	/// method partway through is not supported: finish the call once
	/// started.
	pub async fn finalize(mut self, outcome: FinalOutcome) -> Result<DateTime<Utc>> {
		self.armed = false;

		self.tracker.finalize_admission(&self.request_id, outcome).await
	}
}
impl<S: Store> Drop for Admission<S> {
	fn drop(&mut self) {
		if !self.armed {
			return;
		}

		let tracker = self.tracker.clone();
		let request_id = self.request_id.clone();

		tokio::spawn(async move { tracker.handle_crash(&request_id).await });
	}
}

/// Coordinates concurrent requests sharing an idempotency key: admits the
/// first, serializes or replays the rest, and detects both fingerprint
/// mismatches and crashed builders.
///
/// Cheap to clone — every field is `Arc`-backed, mirroring how a handle to
/// shared state is normally threaded through request handlers.
pub struct Tracker<S: Store = MemoryStore> {
	store: Arc<S>,
	registry: Arc<BuilderRegistry>,
	config: Arc<TrackerConfig>,
}
impl<S: Store> Clone for Tracker<S> {
	fn clone(&self) -> Self {
		Self {
			store: self.store.clone(),
			registry: self.registry.clone(),
			config: self.config.clone(),
		}
	}
}
impl<S: Store> std::fmt::Debug for Tracker<S> {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Tracker").field("config", &self.config).finish_non_exhaustive()
	}
}
impl<S: Store + 'static> Tracker<S> {
	/// Build a tracker over `store`, validating `config` first.
	pub fn new(store: Arc<S>, config: TrackerConfig) -> Result<Self> {
		config.validate()?;

		Ok(Self { store, registry: Arc::new(BuilderRegistry::default()), config: Arc::new(config) })
	}

	/// Build the error for a detected store/registry invariant violation.
	///
	/// This is the crate's one deliberate fail-fast path (§7's "Fatal" error
	/// category): it always logs loudly and always `debug_assert!`s in debug
	/// builds, and additionally aborts the process in release builds when
	/// `fail_fast_on_invariant_violation` is set, since a bare `Result::Err`
	/// would let a caller quietly retry against a tracker whose Store and
	/// BuilderRegistry have already desynced.
	fn invariant_violation(&self, reason: String) -> Error {
		tracing::error!(reason = %reason, "registry/store invariant violated");

		debug_assert!(false, "{reason}");

		if self.config.fail_fast_on_invariant_violation {
			std::process::abort();
		}

		Error::InvariantViolation(reason)
	}

	/// Borrow the tracker's configuration.
	pub fn config(&self) -> &TrackerConfig {
		&self.config
	}

	/// Borrow the underlying store.
	pub fn store(&self) -> &S {
		&self.store
	}

	/// Admit, replay, or reject a request carrying `request_id`/`fingerprint`.
	///
	/// This is the full admission algorithm: a fresh id is admitted and
	/// handed back as [`Outcome::Proceed`]; a reused id with a mismatched
	/// fingerprint is rejected as [`Outcome::Mismatch`]; a reused id that
	/// matches replays the completed response, reports the original crash,
	/// or asks the caller to retry depending on what the in-flight builder
	/// (if any) is doing right now.
	#[tracing::instrument(skip(self, fingerprint), fields(request_id = %request_id))]
	pub async fn track(&self, request_id: RequestId, fingerprint: Fingerprint) -> Result<Outcome<S>> {
		let now = Utc::now();
		let processing_expiry = add_duration(now, self.config.processing_ttl);

		let outcome = match self
			.store
			.insert(&request_id, EntryState::Processing, fingerprint.clone(), processing_expiry)
			.await
		{
			Ok(()) => {
				self.registry.register(&request_id).map_err(|err| {
					self.invariant_violation(format!(
						"store admitted {request_id} as a fresh entry but the registry already \
						 holds a live slot for it: {err}"
					))
				})?;

				tracing::debug!("admitted request id");

				Outcome::Proceed(Admission::new(request_id, self.clone()))
			}
			Err(Error::AlreadyExists) => self.track_existing(request_id, fingerprint).await?,
			Err(other) => return Err(other),
		};

		#[cfg(feature = "metrics")]
		crate::metrics::record_outcome(outcome_kind(&outcome));

		Ok(outcome)
	}

	async fn track_existing(
		&self,
		request_id: RequestId,
		fingerprint: Fingerprint,
	) -> Result<Outcome<S>> {
		let entry = self.store.lookup(&request_id).await?.ok_or_else(|| {
			self.invariant_violation(format!(
				"insert reported AlreadyExists for {request_id} but lookup found nothing"
			))
		})?;

		if entry.fingerprint != fingerprint {
			tracing::debug!("fingerprint mismatch on reused request id");

			return Ok(Outcome::Mismatch);
		}

		match entry.state {
			EntryState::Completed(response) => {
				Ok(Outcome::Replay { response, expires_at: entry.expires_at })
			}
			EntryState::Interrupted => Ok(Outcome::Interrupted { expires_at: entry.expires_at }),
			EntryState::Processing => {
				match self.registry.wait_for(&request_id, self.config.max_concurrent_wait).await {
					WaitOutcome::Finished(response) => {
						let refreshed = self.refreshed_entry(&request_id).await?;

						Ok(Outcome::Replay { response, expires_at: refreshed.expires_at })
					}
					WaitOutcome::Died => {
						let refreshed = self.refreshed_entry(&request_id).await?;

						Ok(Outcome::Interrupted { expires_at: refreshed.expires_at })
					}
					WaitOutcome::StillRunning => Ok(Outcome::Conflict),
				}
			}
		}
	}

	async fn refreshed_entry(&self, request_id: &RequestId) -> Result<crate::cache::entry::CacheEntry> {
		self.store.lookup(request_id).await?.ok_or_else(|| {
			self.invariant_violation(format!(
				"registry reported a terminal outcome for {request_id} but the store entry is gone"
			))
		})
	}

	async fn finalize_admission(
		&self,
		request_id: &RequestId,
		outcome: FinalOutcome,
	) -> Result<DateTime<Utc>> {
		let expires_at = add_duration(Utc::now(), self.config.cached_ttl);
		let (state, builder_outcome) = match outcome {
			FinalOutcome::Completed(response) => {
				(EntryState::Completed(response.clone()), BuilderOutcome::Completed(response))
			}
			FinalOutcome::Interrupted => (EntryState::Interrupted, BuilderOutcome::Interrupted),
		};

		self.store.update(request_id, state, expires_at).await?;
		self.registry.finish(request_id, builder_outcome);
		self.registry.deregister(request_id);

		tracing::debug!(request_id = %request_id, "finalized admission");

		Ok(expires_at)
	}

	async fn handle_crash(&self, request_id: &RequestId) {
		let expires_at = add_duration(Utc::now(), self.config.cached_ttl);

		if let Err(err) = self.store.update(request_id, EntryState::Interrupted, expires_at).await {
			tracing::error!(request_id = %request_id, error = %err, "failed to record crash");
		}

		self.registry.finish(request_id, BuilderOutcome::Interrupted);
		self.registry.deregister(request_id);
	}
}

#[cfg(feature = "metrics")]
fn outcome_kind<S: Store>(outcome: &Outcome<S>) -> crate::metrics::OutcomeKind {
	use crate::metrics::OutcomeKind;

	match outcome {
		Outcome::Proceed(_) => OutcomeKind::Admitted,
		Outcome::Conflict => OutcomeKind::Conflict,
		Outcome::Mismatch => OutcomeKind::Mismatch,
		Outcome::Replay { .. } => OutcomeKind::Replayed,
		Outcome::Interrupted { .. } => OutcomeKind::Interrupted,
	}
}
