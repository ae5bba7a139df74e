//! Crate-wide error types and `Result` alias.

/// Library-wide result type.
pub type Result<T> = std::result::Result<T, Error>;

/// Unified error type for the tracker core.
#[allow(missing_docs)]
#[derive(Debug, thiserror::Error)]
pub enum Error {
	#[cfg(feature = "axum")]
	#[error(transparent)]
	Axum(#[from] axum::Error),

	#[error("missing required config key: {0}")]
	MissingConfig(&'static str),
	#[error("request id already present in store")]
	AlreadyExists,
	#[error("request id not found in store")]
	NotFound,
	#[error("builder already registered for this request id")]
	AlreadyRegistered,
	#[error("validation failed for {field}: {reason}")]
	Validation { field: &'static str, reason: String },
	#[error("registry invariant violated: {0}")]
	InvariantViolation(String),
	#[error("metrics error: {0}")]
	Metrics(String),
}
#[cfg(feature = "metrics")]
impl<T> From<metrics::SetRecorderError<T>> for Error
where
	T: std::fmt::Display,
{
	fn from(value: metrics::SetRecorderError<T>) -> Self {
		Self::Metrics(value.to_string())
	}
}
