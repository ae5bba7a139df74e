//! Default in-memory [`Store`] implementation.

// std
use std::collections::HashMap;
// crates.io
use async_trait::async_trait;
use tokio::sync::RwLock;
// self
use super::{Store, StoreConfig};
use crate::{
	_prelude::*,
	cache::entry::{CacheEntry, EntryState},
	id::{Fingerprint, RequestId},
};

/// In-memory `Store`, concurrent-reader/serialized-writer via `RwLock`.
///
/// Not persistent across process restarts and not shared across processes —
/// both explicitly out of scope per the tracker's non-goals. Multi-node
/// sharing is the concern of whichever `Store` impl replaces this one.
#[derive(Debug, Default)]
pub struct MemoryStore {
	entries: RwLock<HashMap<RequestId, CacheEntry>>,
}
impl MemoryStore {
	/// Construct an empty store.
	pub fn new() -> Self {
		Self::default()
	}
}
#[async_trait]
impl Store for MemoryStore {
	async fn setup(&self, config: &StoreConfig) -> Result<()> {
		config.require_table_name()?;

		Ok(())
	}

	async fn insert(
		&self,
		request_id: &RequestId,
		state: EntryState,
		fingerprint: Fingerprint,
		expires_at: DateTime<Utc>,
	) -> Result<()> {
		let mut entries = self.entries.write().await;

		if entries.contains_key(request_id) {
			return Err(Error::AlreadyExists);
		}

		entries.insert(request_id.clone(), CacheEntry { fingerprint, state, expires_at });

		Ok(())
	}

	async fn lookup(&self, request_id: &RequestId) -> Result<Option<CacheEntry>> {
		let entries = self.entries.read().await;

		Ok(entries.get(request_id).cloned())
	}

	async fn update(
		&self,
		request_id: &RequestId,
		state: EntryState,
		expires_at: DateTime<Utc>,
	) -> Result<()> {
		let mut entries = self.entries.write().await;
		let entry = entries.get_mut(request_id).ok_or(Error::NotFound)?;

		entry.state = state;
		entry.expires_at = expires_at;

		Ok(())
	}

	async fn prune(&self, now: DateTime<Utc>, max_batch: usize) -> Result<usize> {
		let mut entries = self.entries.write().await;
		let expired: Vec<RequestId> = entries
			.iter()
			.filter(|(_, entry)| entry.is_expired(now))
			.take(max_batch)
			.map(|(id, _)| id.clone())
			.collect();
		let removed = expired.len();

		for id in expired {
			entries.remove(&id);
		}

		Ok(removed)
	}
}
