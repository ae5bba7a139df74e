//! Axum middleware adapter: HTTP glue around [`Tracker`].
//!
//! Everything in §6/§7 of the design notes that isn't the tracker's state
//! machine itself lives here — header extraction, fingerprint canonicalization,
//! response buffering, and error rendering. Grounded in how
//! `caliber-api`'s idempotency middleware is wired with
//! `axum::middleware::from_fn_with_state`.

// std
use std::sync::Arc;
// crates.io
use axum::{
	body::{Body, to_bytes},
	extract::{Request, State},
	middleware::Next,
	response::{IntoResponse, Response},
};
use http::{HeaderMap, HeaderValue, StatusCode, header::{CONTENT_TYPE, EXPIRES}};
// self
use crate::{
	_prelude::*,
	cache::entry::CapturedResponse,
	id::{Fingerprint, IdentityTransform, RequestId},
	store::{MemoryStore, Store},
	tracker::{FinalOutcome, Outcome, Tracker},
};

const IDEMPOTENCY_KEY_HEADER: &str = "idempotency-key";
/// Cap on how much of a request/response body is buffered for fingerprinting
/// and replay. Larger bodies are out of scope (see the tracker's non-goals
/// around request body size limits); callers needing more should raise this
/// by constructing their own `Next` chain.
const MAX_BODY_BYTES: usize = 2 * 1024 * 1024;

/// One of the client-visible, non-retried error conditions from §7.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AdapterError {
	/// No `Idempotency-Key` header present.
	MissingKey,
	/// More than one `Idempotency-Key` header present.
	MultipleKeys,
	/// Another builder is in flight and the wait timed out.
	Conflict,
	/// The key was reused with a different fingerprint.
	Mismatch,
	/// The original builder crashed; state is unknown.
	Interrupted,
}
impl AdapterError {
	fn status(self) -> StatusCode {
		match self {
			Self::MissingKey | Self::MultipleKeys => StatusCode::BAD_REQUEST,
			Self::Conflict => StatusCode::CONFLICT,
			Self::Mismatch => StatusCode::UNPROCESSABLE_ENTITY,
			Self::Interrupted => StatusCode::INTERNAL_SERVER_ERROR,
		}
	}

	fn message(self) -> &'static str {
		match self {
			Self::MissingKey => "No idempotency key found.",
			Self::MultipleKeys => "Only one `Idempotency-Key` header can be sent.",
			Self::Conflict => {
				"A request with the same `Idempotency-Key` is currently being processed."
			},
			Self::Mismatch => "This `Idempotency-Key` can't be reused with a different payload or URI.",
			Self::Interrupted => {
				"The original request was interrupted and can't be recovered as it's in an unknown state."
			},
		}
	}
}
impl IntoResponse for AdapterError {
	fn into_response(self) -> Response {
		error_response(self.status(), self.message())
	}
}

/// Override point for error rendering and identity scoping.
pub type ErrorRenderer = Arc<dyn Fn(AdapterError) -> Response + Send + Sync>;

/// Shared state for [`idempotency_middleware`].
///
/// Cloning never requires `S: Clone` — every field is already cheap to share
/// (`Tracker` is `Arc`-backed internally, the rest are `Option<Arc<..>>`).
pub struct AdapterState<S: Store = MemoryStore> {
	tracker: Tracker<S>,
	identity_transform: Option<IdentityTransform>,
	error_renderer: Option<ErrorRenderer>,
}
impl<S: Store> Clone for AdapterState<S> {
	fn clone(&self) -> Self {
		Self {
			tracker: self.tracker.clone(),
			identity_transform: self.identity_transform.clone(),
			error_renderer: self.error_renderer.clone(),
		}
	}
}
impl<S: Store + 'static> AdapterState<S> {
	/// Build adapter state over an existing tracker.
	pub fn new(tracker: Tracker<S>) -> Self {
		Self { tracker, identity_transform: None, error_renderer: None }
	}

	/// Scope raw idempotency keys before they are hashed, e.g. by tenant.
	pub fn with_identity_transform(mut self, transform: IdentityTransform) -> Self {
		self.identity_transform = Some(transform);

		self
	}

	/// Override how [`AdapterError`] outcomes are rendered to the client.
	pub fn with_error_renderer(mut self, renderer: ErrorRenderer) -> Self {
		self.error_renderer = Some(renderer);

		self
	}

	fn render_error(&self, error: AdapterError) -> Response {
		match &self.error_renderer {
			Some(renderer) => renderer(error),
			None => error.into_response(),
		}
	}
}

/// `axum::middleware::from_fn_with_state`-compatible idempotency middleware.
///
/// ```ignore
/// let app = Router::new()
///     .route("/orders", post(create_order))
///     .layer(middleware::from_fn_with_state(state.clone(), idempotency_middleware));
/// ```
pub async fn idempotency_middleware<S: Store + 'static>(
	State(state): State<AdapterState<S>>,
	request: Request,
	next: Next,
) -> Response {
	let method = request.method().clone();

	if state.tracker.config().is_bypassed_method(method.as_str()) {
		return next.run(request).await;
	}

	let raw_key = match extract_idempotency_key(request.headers()) {
		Ok(key) => key,
		Err(err) => return state.render_error(err),
	};

	let (parts, body) = request.into_parts();
	let body_bytes = match to_bytes(body, MAX_BODY_BYTES).await {
		Ok(bytes) => bytes,
		Err(_) => return error_response(StatusCode::BAD_REQUEST, "Request body could not be read."),
	};

	let path_segments: Vec<&str> =
		parts.uri.path().split('/').filter(|segment| !segment.is_empty()).collect();
	let params = fingerprint_params(parts.uri.query().unwrap_or(""), &body_bytes);
	let fingerprint = Fingerprint::compute(method.as_str(), &path_segments, &params);
	let request_id = RequestId::from_raw_key(raw_key.as_bytes(), state.identity_transform.as_ref());

	// A fatal `InvariantViolation` already aborted the process inside `track`
	// when the tracker is configured to fail fast; reaching this `Err` arm
	// means that flag is off, so it's just logged and surfaced as a 500.
	let outcome = match state.tracker.track(request_id, fingerprint).await {
		Ok(outcome) => outcome,
		Err(err) => {
			tracing::error!(error = %err, "idempotency tracker error");

			return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error.");
		},
	};

	match outcome {
		Outcome::Proceed(admission) => {
			let request = Request::from_parts(parts, Body::from(body_bytes));
			let response = next.run(request).await;
			let (response_parts, response_body) = response.into_parts();
			let response_bytes = match to_bytes(response_body, MAX_BODY_BYTES).await {
				Ok(bytes) => bytes,
				Err(_) => {
					return error_response(
						StatusCode::INTERNAL_SERVER_ERROR,
						"Response body could not be buffered.",
					);
				},
			};
			let captured = CapturedResponse::new(
				response_parts.status.as_u16(),
				header_pairs(&response_parts.headers),
				response_bytes,
			);

			let expires_at = match admission.finalize(FinalOutcome::Completed(captured.clone())).await
			{
				Ok(expires_at) => expires_at,
				Err(err) => {
					tracing::error!(error = %err, "failed to finalize idempotent admission");

					return error_response(StatusCode::INTERNAL_SERVER_ERROR, "Internal error.");
				},
			};

			response_from_captured(&captured, Some(expires_at))
		},
		Outcome::Replay { response, expires_at } => {
			response_from_captured(&response, Some(expires_at))
		},
		Outcome::Interrupted { expires_at } => {
			with_expires(state.render_error(AdapterError::Interrupted), expires_at)
		},
		Outcome::Conflict => state.render_error(AdapterError::Conflict),
		Outcome::Mismatch => state.render_error(AdapterError::Mismatch),
	}
}

fn extract_idempotency_key(headers: &HeaderMap) -> std::result::Result<String, AdapterError> {
	let mut values = headers.get_all(IDEMPOTENCY_KEY_HEADER).iter();
	let first = values.next().ok_or(AdapterError::MissingKey)?;

	if values.next().is_some() {
		return Err(AdapterError::MultipleKeys);
	}

	first.to_str().map(str::to_owned).map_err(|_| AdapterError::MissingKey)
}

fn fingerprint_params(query: &str, body: &[u8]) -> Vec<(String, String)> {
	let mut params: Vec<(String, String)> = query
		.split('&')
		.filter(|pair| !pair.is_empty())
		.map(|pair| match pair.split_once('=') {
			Some((key, value)) => (key.to_owned(), value.to_owned()),
			None => (pair.to_owned(), String::new()),
		})
		.collect();

	if !body.is_empty() {
		let body_repr = match std::str::from_utf8(body) {
			Ok(text) => text.to_owned(),
			Err(_) => hex::encode(body),
		};

		params.push(("__body__".to_owned(), body_repr));
	}

	params
}

fn header_pairs(headers: &HeaderMap) -> Vec<(String, String)> {
	headers
		.iter()
		.filter_map(|(name, value)| {
			value.to_str().ok().map(|value| (name.as_str().to_owned(), value.to_owned()))
		})
		.collect()
}

fn response_from_captured(captured: &CapturedResponse, expires_at: Option<DateTime<Utc>>) -> Response {
	let mut builder = Response::builder().status(
		StatusCode::from_u16(captured.status).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR),
	);

	for (name, value) in &captured.headers {
		if let Ok(value) = HeaderValue::from_str(value) {
			builder = builder.header(name, value);
		}
	}

	let response = builder.body(Body::from(captured.body.clone())).unwrap_or_else(|_| {
		Response::builder().status(StatusCode::INTERNAL_SERVER_ERROR).body(Body::empty()).unwrap()
	});

	match expires_at {
		Some(expires_at) => with_expires(response, expires_at),
		None => response,
	}
}

fn with_expires(mut response: Response, expires_at: DateTime<Utc>) -> Response {
	if let Ok(value) = HeaderValue::from_str(&http_date(expires_at)) {
		response.headers_mut().insert(EXPIRES, value);
	}

	response
}

fn http_date(dt: DateTime<Utc>) -> String {
	dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

fn error_response(status: StatusCode, message: &str) -> Response {
	let body = serde_json::json!({ "errors": [{ "message": message }] }).to_string();

	Response::builder()
		.status(status)
		.header(CONTENT_TYPE, "application/json")
		.body(Body::from(body))
		.unwrap_or_else(|_| Response::new(Body::empty()))
}
