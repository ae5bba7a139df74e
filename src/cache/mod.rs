//! Cache entry definitions for the request tracker.

pub mod entry;

pub use entry::{CacheEntry, CapturedResponse, EntryState};
