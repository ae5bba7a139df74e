//! Small helpers shared across modules.

// self
use crate::_prelude::*;

/// Add a [`std::time::Duration`] to a wall-clock instant, saturating at
/// [`DateTime::<Utc>::MAX_UTC`] rather than panicking on overflow.
pub fn add_duration(now: DateTime<Utc>, duration: Duration) -> DateTime<Utc> {
	TimeDelta::from_std(duration)
		.ok()
		.and_then(|delta| now.checked_add_signed(delta))
		.unwrap_or(DateTime::<Utc>::MAX_UTC)
}
