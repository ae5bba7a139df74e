//! Cache entry definitions: the per-request-id state machine.

// crates.io
use bytes::Bytes;
use serde::{Deserialize, Serialize};
// self
use crate::{_prelude::*, id::Fingerprint};

/// A captured HTTP response, buffered in full before it is stored.
///
/// Buffering before flush (rather than streaming straight to the socket) is
/// what lets a client disconnect mid-flush leave a `Completed` entry instead
/// of a spuriously `Interrupted` one — see the adapter module.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapturedResponse {
	/// HTTP status code of the original response.
	pub status: u16,
	/// Response headers, in emission order.
	pub headers: Vec<(String, String)>,
	/// Response body bytes.
	pub body: Bytes,
}
impl CapturedResponse {
	/// Construct a captured response from its parts.
	pub fn new(status: u16, headers: Vec<(String, String)>, body: impl Into<Bytes>) -> Self {
		Self { status, headers, body: body.into() }
	}
}

/// Lifecycle state of a [`CacheEntry`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum EntryState {
	/// A builder currently owns this request id; no response is available yet.
	Processing,
	/// A response was captured and is available for replay.
	Completed(CapturedResponse),
	/// The builder that owned this request id terminated abnormally.
	Interrupted,
}
impl EntryState {
	/// Whether this state is `Processing`.
	pub fn is_processing(&self) -> bool {
		matches!(self, EntryState::Processing)
	}
}

/// One entry in the [`crate::store::Store`], keyed by [`crate::id::RequestId`].
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheEntry {
	/// Fingerprint recorded at first admission; immutable thereafter.
	pub fingerprint: Fingerprint,
	/// Current lifecycle state.
	pub state: EntryState,
	/// Absolute wall-clock expiry.
	pub expires_at: DateTime<Utc>,
}
impl CacheEntry {
	/// Construct a freshly admitted entry in the `Processing` state.
	pub fn new_processing(fingerprint: Fingerprint, expires_at: DateTime<Utc>) -> Self {
		Self { fingerprint, state: EntryState::Processing, expires_at }
	}

	/// Whether `now` is past this entry's expiry.
	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}
}
