//! End-to-end coverage of the axum middleware wiring, against the literal
//! scenarios S1-S7.

use std::{
	sync::{
		Arc,
		atomic::{AtomicU32, Ordering},
	},
	time::Duration,
};

use axum::{
	Router,
	body::{Body, Bytes},
	http::{Request, StatusCode, header},
	middleware,
	routing::post,
};
use http_body_util::BodyExt;
use idempotency_tracker::{
	MemoryStore, TrackerConfig,
	adapter::{AdapterState, idempotency_middleware},
	tracker::Tracker,
};
use tokio::sync::Notify;
use tower::ServiceExt;

const KEY: &str = "idempotency-key";

fn app() -> (Router, Arc<AtomicU32>) {
	let calls = Arc::new(AtomicU32::new(0));
	let counted = calls.clone();
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let state = AdapterState::new(tracker);

	let router = Router::new()
		.route(
			"/payments",
			post(move |body: Bytes| {
				let counted = counted.clone();

				async move {
					counted.fetch_add(1, Ordering::SeqCst);

					(StatusCode::CREATED, format!("{{\"charged_bytes\":{}}}", body.len()))
				}
			}),
		)
		.layer(middleware::from_fn_with_state(state, idempotency_middleware::<MemoryStore>));

	(router, calls)
}

/// A handler that blocks on `gate` until released, for simulating S5's
/// overlapping in-flight request.
fn app_with_gate() -> (Router, Arc<Notify>) {
	let gate = Arc::new(Notify::new());
	let handler_gate = gate.clone();
	let config = TrackerConfig::default().with_max_concurrent_wait(Duration::from_millis(80));
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), config).unwrap();
	let state = AdapterState::new(tracker);

	let router = Router::new()
		.route(
			"/payments",
			post(move |_body: Bytes| {
				let handler_gate = handler_gate.clone();

				async move {
					handler_gate.notified().await;

					(StatusCode::CREATED, "{\"charged\":true}")
				}
			}),
		)
		.layer(middleware::from_fn_with_state(state, idempotency_middleware::<MemoryStore>));

	(router, gate)
}

/// A handler that never returns, for simulating S6's crashed builder: the
/// caller gives up on (drops) the in-flight request before the handler does.
fn app_that_hangs() -> Router {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let state = AdapterState::new(tracker);

	Router::new()
		.route(
			"/payments",
			post(|_body: Bytes| async {
				std::future::pending::<()>().await;
				#[allow(unreachable_code)]
				(StatusCode::OK, "unreachable")
			}),
		)
		.layer(middleware::from_fn_with_state(state, idempotency_middleware::<MemoryStore>))
}

async fn read_body(response: axum::response::Response) -> String {
	let bytes = response.into_body().collect().await.unwrap().to_bytes();

	String::from_utf8(bytes.to_vec()).unwrap()
}

#[tokio::test]
async fn s1_first_use_returns_200_with_expires() {
	let (app, _calls) = app();
	let response = app
		.oneshot(
			Request::post("/payments")
				.header(KEY, "pay-1")
				.body(Body::from(r#"{"amount":500}"#))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::CREATED);
	assert!(response.headers().contains_key(header::EXPIRES));
}

#[tokio::test]
async fn s2_cached_replay_returns_the_same_response_and_expires_without_rerunning_the_handler() {
	let (app, calls) = app();
	let request = || {
		Request::post("/payments").header(KEY, "pay-2").body(Body::from(r#"{"amount":500}"#)).unwrap()
	};

	let first = app.clone().oneshot(request()).await.unwrap();
	let first_expires = first.headers().get(header::EXPIRES).cloned();
	let first_body = read_body(first).await;

	let second = app.oneshot(request()).await.unwrap();
	let second_expires = second.headers().get(header::EXPIRES).cloned();
	let second_body = read_body(second).await;

	assert_eq!(first_body, second_body);
	assert_eq!(first_expires, second_expires);
	assert_eq!(calls.load(Ordering::SeqCst), 1, "the handler must run exactly once");
}

#[tokio::test]
async fn s3_mismatched_body_under_the_same_key_is_rejected() {
	let (app, _calls) = app();

	app.clone()
		.oneshot(
			Request::post("/payments")
				.header(KEY, "pay-3")
				.body(Body::from(r#"{"amount":500}"#))
				.unwrap(),
		)
		.await
		.unwrap();

	let response = app
		.oneshot(
			Request::post("/payments")
				.header(KEY, "pay-3")
				.body(Body::from(r#"{"amount":999}"#))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
	assert!(read_body(response).await.contains("can't be reused with a different payload or URI"));
}

#[tokio::test]
async fn s4_same_key_reused_on_a_different_uri_is_a_mismatch() {
	let (app, _calls) = app();

	app.clone()
		.oneshot(
			Request::post("/payments")
				.header(KEY, "pay-4")
				.body(Body::from(r#"{"amount":500}"#))
				.unwrap(),
		)
		.await
		.unwrap();

	let response = app
		.oneshot(
			Request::post("/other/path")
				.header(KEY, "pay-4")
				.body(Body::from(r#"{"amount":500}"#))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn s5_concurrent_duplicate_conflicts_then_replays_once_the_first_completes() {
	let (app, gate) = app_with_gate();
	let request = || {
		Request::post("/payments").header(KEY, "pay-5").body(Body::from(r#"{"amount":500}"#)).unwrap()
	};

	let first_app = app.clone();
	let first = tokio::spawn(async move { first_app.oneshot(request()).await.unwrap() });

	// Give the first request time to be admitted and reach its blocked handler
	// before firing the second, overlapping one.
	tokio::time::sleep(Duration::from_millis(20)).await;

	let second = app.clone().oneshot(request()).await.unwrap();

	assert_eq!(second.status(), StatusCode::CONFLICT);
	assert!(read_body(second).await.contains("currently being processed"));

	gate.notify_one();

	let first_response = first.await.unwrap();

	assert_eq!(first_response.status(), StatusCode::CREATED);

	let third = app.oneshot(request()).await.unwrap();

	assert_eq!(third.status(), StatusCode::CREATED);
}

#[tokio::test]
async fn s6_crash_recovery_returns_500_interrupted_with_expires() {
	let app = app_that_hangs();
	let request = || {
		Request::post("/payments").header(KEY, "pay-6").body(Body::from(r#"{"amount":500}"#)).unwrap()
	};

	// The handler never returns; giving up on the request here (dropping the
	// in-flight future) is the crash: the admission is dropped without
	// `finalize` ever running.
	let outcome = tokio::time::timeout(Duration::from_millis(50), app.clone().oneshot(request())).await;

	assert!(outcome.is_err(), "the handler must still be pending when we give up on it");

	tokio::task::yield_now().await;
	tokio::task::yield_now().await;

	let response = app.oneshot(request()).await.unwrap();

	assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
	assert!(response.headers().contains_key(header::EXPIRES));
	assert!(read_body(response).await.contains("interrupted and can't be recovered"));
}

#[tokio::test]
async fn s7_missing_key_is_a_client_error() {
	let (app, _calls) = app();
	let response = app
		.oneshot(Request::post("/payments").body(Body::from(r#"{"amount":500}"#)).unwrap())
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert!(read_body(response).await.contains("No idempotency key found"));
}

#[tokio::test]
async fn s7_duplicate_key_headers_are_a_client_error() {
	let (app, _calls) = app();
	let response = app
		.oneshot(
			Request::post("/payments")
				.header(KEY, "a")
				.header(KEY, "b")
				.body(Body::from(r#"{"amount":500}"#))
				.unwrap(),
		)
		.await
		.unwrap();

	assert_eq!(response.status(), StatusCode::BAD_REQUEST);
	assert!(read_body(response).await.contains("Only one"));
}

#[tokio::test]
async fn s7_get_requests_bypass_tracking_entirely() {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let state = AdapterState::new(tracker);
	let app = Router::new()
		.route("/payments", axum::routing::get(|| async { (StatusCode::OK, "status") }))
		.layer(middleware::from_fn_with_state(state, idempotency_middleware::<MemoryStore>));

	let response = app.oneshot(Request::get("/payments").body(Body::empty()).unwrap()).await.unwrap();

	assert_eq!(response.status(), StatusCode::OK);
	assert!(!response.headers().contains_key(header::EXPIRES));
}
