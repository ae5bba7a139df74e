//! Request identifiers and fingerprints.
//!
//! A [`RequestId`] names a cache entry; a [`Fingerprint`] names "what that
//! entry was first used for," so a key reused against a different logical
//! request can be rejected as a [`crate::tracker::Outcome::Mismatch`].

// std
use std::{fmt, sync::Arc};
// crates.io
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// Identity transform applied to a raw idempotency key before hashing.
///
/// Defaults to the identity function; a handler may scope keys per
/// authenticated user by prefixing the raw bytes before this runs.
pub type IdentityTransform = Arc<dyn Fn(&[u8]) -> Vec<u8> + Send + Sync>;

/// A stable identifier derived from the client-supplied idempotency key.
///
/// Equality is exact byte/string equality over the lowercase hex digest;
/// construction is the only place hashing happens.
#[derive(Clone, Eq, PartialEq, Hash, Ord, PartialOrd, Serialize, Deserialize)]
pub struct RequestId(Arc<str>);
impl RequestId {
	/// Derive a `RequestId` from a raw key, applying `transform` first.
	pub fn from_raw_key(raw_key: &[u8], transform: Option<&IdentityTransform>) -> Self {
		let transformed = match transform {
			Some(transform) => transform(raw_key),
			None => raw_key.to_vec(),
		};

		Self(hex_digest(&transformed).into())
	}

	/// Build a `RequestId` directly from an already-hashed hex string.
	///
	/// Used by stores and tests that round-trip identifiers without
	/// re-deriving them from a raw key.
	pub fn from_hex(hex: impl Into<Arc<str>>) -> Self {
		Self(hex.into())
	}

	/// Borrow the underlying hex digest.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl fmt::Debug for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "RequestId({})", self.0)
	}
}
impl fmt::Display for RequestId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

/// A deterministic digest of a request's observable content.
///
/// Two requests sharing a [`RequestId`] but carrying different
/// fingerprints indicate client misuse of the idempotency key.
#[derive(Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
pub struct Fingerprint(Arc<str>);
impl Fingerprint {
	/// Compute a fingerprint from method, path segments, and associative
	/// parameters (query params or body fields, flattened to strings).
	///
	/// Path segments are hashed in order; `params` is sorted by key first so
	/// that reordering an associative map never changes the fingerprint.
	pub fn compute(method: &str, path_segments: &[&str], params: &[(String, String)]) -> Self {
		let mut sorted_params: Vec<&(String, String)> = params.iter().collect();

		sorted_params.sort_unstable_by(|a, b| a.0.cmp(&b.0).then_with(|| a.1.cmp(&b.1)));

		let mut canonical = String::new();

		canonical.push_str(&method.to_ascii_uppercase());
		canonical.push('\n');

		for segment in path_segments {
			canonical.push('/');
			canonical.push_str(segment);
		}
		canonical.push('\n');

		for (key, value) in sorted_params {
			canonical.push_str(key);
			canonical.push('=');
			canonical.push_str(value);
			canonical.push('&');
		}

		Self(hex_digest(canonical.as_bytes()).into())
	}

	/// Borrow the underlying hex digest.
	pub fn as_str(&self) -> &str {
		&self.0
	}
}
impl fmt::Debug for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "Fingerprint({})", self.0)
	}
}
impl fmt::Display for Fingerprint {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

fn hex_digest(bytes: &[u8]) -> String {
	hex::encode(Sha256::digest(bytes))
}
