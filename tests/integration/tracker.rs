//! End-to-end coverage of the admission state machine through the public API.

use std::sync::Arc;

use idempotency_tracker::{
	FinalOutcome, MemoryStore, Outcome, Pruner, RequestId, Store, TrackerConfig, cache::entry::CapturedResponse,
	tracker::Tracker,
};

fn fingerprint(path: &str) -> idempotency_tracker::Fingerprint {
	idempotency_tracker::Fingerprint::compute("POST", &[path], &[])
}

#[tokio::test]
async fn concurrent_retries_only_admit_one_builder() {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let id = RequestId::from_raw_key(b"checkout-1", None);

	let first = tracker.track(id.clone(), fingerprint("orders")).await.unwrap();
	let second = tracker.track(id.clone(), fingerprint("orders")).await.unwrap();

	let Outcome::Proceed(admission) = first else { panic!("first caller must be admitted") };
	assert!(matches!(second, Outcome::Conflict), "second caller must not also be admitted");

	admission
		.finalize(FinalOutcome::Completed(CapturedResponse::new(200, vec![], "ok")))
		.await
		.unwrap();
}

#[tokio::test]
async fn reusing_a_key_for_a_different_request_is_rejected() {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let id = RequestId::from_raw_key(b"checkout-1", None);

	let Outcome::Proceed(admission) = tracker.track(id.clone(), fingerprint("orders")).await.unwrap()
	else {
		panic!("expected Proceed")
	};
	admission
		.finalize(FinalOutcome::Completed(CapturedResponse::new(200, vec![], "ok")))
		.await
		.unwrap();

	let outcome = tracker.track(id, fingerprint("refunds")).await.unwrap();

	assert!(matches!(outcome, Outcome::Mismatch));
}

#[tokio::test]
async fn completed_builds_are_replayed_byte_for_byte() {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let id = RequestId::from_raw_key(b"checkout-2", None);
	let original =
		CapturedResponse::new(201, vec![("content-type".into(), "application/json".into())], r#"{"id":42}"#);

	let Outcome::Proceed(admission) = tracker.track(id.clone(), fingerprint("orders")).await.unwrap()
	else {
		panic!("expected Proceed")
	};
	admission.finalize(FinalOutcome::Completed(original.clone())).await.unwrap();

	for _ in 0..3 {
		match tracker.track(id.clone(), fingerprint("orders")).await.unwrap() {
			Outcome::Replay { response, .. } => assert_eq!(response, original),
			other => panic!("expected Replay, got {other:?}"),
		}
	}
}

#[tokio::test]
async fn a_crashed_builder_is_recorded_as_interrupted_for_the_next_retry() {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();
	let id = RequestId::from_raw_key(b"checkout-3", None);

	let Outcome::Proceed(admission) = tracker.track(id.clone(), fingerprint("orders")).await.unwrap()
	else {
		panic!("expected Proceed")
	};

	// A panicking handler or a cancelled future drops the admission without
	// ever calling `finalize`.
	drop(admission);
	tokio::task::yield_now().await;
	tokio::task::yield_now().await;

	let outcome = tracker.track(id, fingerprint("orders")).await.unwrap();

	assert!(matches!(outcome, Outcome::Interrupted { .. }));
}

#[tokio::test]
async fn a_retry_that_outlasts_the_wait_window_gets_a_conflict_not_a_hang() {
	let config = TrackerConfig::default().with_max_concurrent_wait(std::time::Duration::from_millis(30));
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), config).unwrap();
	let id = RequestId::from_raw_key(b"checkout-4", None);

	let Outcome::Proceed(admission) = tracker.track(id.clone(), fingerprint("orders")).await.unwrap()
	else {
		panic!("expected Proceed")
	};

	let started = tokio::time::Instant::now();
	let outcome = tracker.track(id, fingerprint("orders")).await.unwrap();

	assert!(matches!(outcome, Outcome::Conflict));
	assert!(started.elapsed() >= std::time::Duration::from_millis(30));

	drop(admission);
}

#[tokio::test(start_paused = true)]
async fn expired_entries_are_reclaimed_and_free_the_key_for_reuse() {
	let config = TrackerConfig::default().with_cached_ttl(std::time::Duration::from_secs(1));
	let store = Arc::new(MemoryStore::new());
	let tracker = Tracker::new(store.clone(), config).unwrap();
	let id = RequestId::from_raw_key(b"checkout-5", None);

	let Outcome::Proceed(admission) = tracker.track(id.clone(), fingerprint("orders")).await.unwrap()
	else {
		panic!("expected Proceed")
	};
	admission
		.finalize(FinalOutcome::Completed(CapturedResponse::new(200, vec![], "ok")))
		.await
		.unwrap();

	let pruner = Pruner::new(store.clone(), std::time::Duration::from_millis(100), 64).spawn();

	tokio::time::advance(std::time::Duration::from_secs(2)).await;
	tokio::task::yield_now().await;

	assert!(store.lookup(&id).await.unwrap().is_none());

	pruner.abort();
}

#[tokio::test]
async fn bypassed_methods_are_never_admitted_or_replayed() {
	let tracker = Tracker::new(Arc::new(MemoryStore::new()), TrackerConfig::default()).unwrap();

	assert!(tracker.config().is_bypassed_method("GET"));
	assert!(tracker.config().is_bypassed_method("head"));
	assert!(!tracker.config().is_bypassed_method("POST"));
}
