//! Store: the pluggable key→entry backing for the tracker.
//!
//! The tracker is never coupled to the in-memory default; a SQL- or
//! Redis-backed implementation is a drop-in replacement as long as it
//! upholds the atomicity guarantees documented on each method below.

pub mod memory;

// crates.io
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
// self
use crate::{
	_prelude::*,
	cache::entry::{CacheEntry, EntryState},
	id::{Fingerprint, RequestId},
};

pub use memory::MemoryStore;

/// Configuration handed to [`Store::setup`].
///
/// Recognised keys mirror the documented contract: `table_name` is required
/// by the in-memory default (and by any store that needs a namespace for
/// its backing table/keyspace).
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct StoreConfig {
	/// Logical table/keyspace name the store should use.
	pub table_name: Option<String>,
}
impl StoreConfig {
	/// Build a config carrying the given table name.
	pub fn with_table_name(table_name: impl Into<String>) -> Self {
		Self { table_name: Some(table_name.into()) }
	}

	/// Fetch `table_name`, failing with [`Error::MissingConfig`] if absent.
	pub fn require_table_name(&self) -> Result<&str> {
		self.table_name.as_deref().ok_or(Error::MissingConfig("table_name"))
	}
}

/// Key→entry backing store.
///
/// All four operations are atomic with respect to each other: no caller ever
/// observes a half-updated entry. `insert` additionally behaves as a
/// compare-and-swap — its presence-check and write happen inside one
/// critical section — which is what gives [`crate::tracker::Tracker::track`]
/// its linearizable admission per [`RequestId`] without any additional
/// per-key locking.
#[async_trait]
pub trait Store: Send + Sync + std::fmt::Debug {
	/// Idempotent initialization. Implementations that need a namespace
	/// (table name, keyspace prefix, …) must fail with
	/// [`Error::MissingConfig`] when it is absent from `config`.
	async fn setup(&self, config: &StoreConfig) -> Result<()>;

	/// Insert a brand-new entry. Fails with [`Error::AlreadyExists`] if
	/// `request_id` is already present; the check-and-insert is atomic.
	async fn insert(
		&self,
		request_id: &RequestId,
		state: EntryState,
		fingerprint: Fingerprint,
		expires_at: DateTime<Utc>,
	) -> Result<()>;

	/// Look up the current entry for `request_id`, if any.
	async fn lookup(&self, request_id: &RequestId) -> Result<Option<CacheEntry>>;

	/// Update the state and expiry of an existing entry. Fails with
	/// [`Error::NotFound`] if the key is absent. The fingerprint is never
	/// touched by `update`.
	async fn update(
		&self,
		request_id: &RequestId,
		state: EntryState,
		expires_at: DateTime<Utc>,
	) -> Result<()>;

	/// Remove entries whose `expires_at` is in the past relative to `now`,
	/// stopping after at most `max_batch` removals so a single pass never
	/// holds the store's write lock for an unbounded amount of time.
	/// Returns the number of entries removed.
	async fn prune(&self, now: DateTime<Utc>, max_batch: usize) -> Result<usize>;
}
