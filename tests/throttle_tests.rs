
use std::sync::Arc;

use chrono::Utc;

use kickerd::store::{ConditionalStore, RecordKind, StoreKey};
use kickerd::throttle::{KvThrottle, NullThrottle, Sweeper, Throttle, ThrottleError};

use test_harness::{MemoryStore, TEST_RETENTION};

#[tokio::test]
async fn test_set_writes_expiry_from_retention_period() {
    let store = Arc::new(MemoryStore::new());
    let throttle = KvThrottle::new(store.clone(), TEST_RETENTION);

    throttle.set("job-1").await.unwrap();

    let expires_at: i64 = store
        .payload("job-1", RecordKind::Throttle)
        .unwrap()
        .parse()
        .unwrap();
    let expected = Utc::now().timestamp() + TEST_RETENTION.as_secs() as i64;
    assert!((expires_at - expected).abs() <= 5);
}

#[tokio::test]
async fn test_set_twice_is_duplicate() {
    let store = Arc::new(MemoryStore::new());
    let throttle = KvThrottle::new(store, TEST_RETENTION);

    throttle.set("job-1").await.unwrap();
    assert!(matches!(
        throttle.set("job-1").await,
        Err(ThrottleError::Duplicate)
    ));
}

#[tokio::test]
async fn test_unset_frees_the_id() {
    let store = Arc::new(MemoryStore::new());
    let throttle = KvThrottle::new(store, TEST_RETENTION);

    throttle.set("job-1").await.unwrap();
    throttle.unset("job-1").await.unwrap();
    throttle.set("job-1").await.unwrap();
}

#[tokio::test]
async fn test_null_throttle_never_deduplicates() {
    let throttle = NullThrottle;

    throttle.set("job-1").await.unwrap();
    throttle.set("job-1").await.unwrap();
    throttle.unset("job-1").await.unwrap();
}

#[tokio::test]
async fn test_sweeper_batch_derived_from_write_capacity() {
    let cases = [(100, 20), (10, 2), (5, 1), (4, 1), (1, 1)];

    for (capacity, batch) in cases {
        let store = Arc::new(MemoryStore::with_capacity(capacity));
        let sweeper = Sweeper::new(store).await.unwrap();
        assert_eq!(sweeper.batch_size(), batch, "capacity {}", capacity);
    }
}

#[tokio::test]
async fn test_sweeper_capacity_query_failure_is_fatal() {
    let store = Arc::new(MemoryStore::with_failing_capacity());
    assert!(Sweeper::new(store).await.is_err());
}

#[tokio::test(start_paused = true)]
async fn test_sweep_removes_only_expired_records() {
    let store = Arc::new(MemoryStore::new());
    let past = (Utc::now().timestamp() - 60).to_string();
    let future = (Utc::now().timestamp() + 3600).to_string();

    store
        .create(StoreKey::throttle("expired-1"), &past)
        .await
        .unwrap();
    store
        .create(StoreKey::throttle("expired-2"), &past)
        .await
        .unwrap();
    store
        .create(StoreKey::throttle("live"), &future)
        .await
        .unwrap();
    store.create(StoreKey::lock("L"), "holder").await.unwrap();

    let sweeper = Sweeper::new(store.clone()).await.unwrap();
    sweeper.sweep_once().await;

    assert!(!store.contains("expired-1", RecordKind::Throttle));
    assert!(!store.contains("expired-2", RecordKind::Throttle));
    assert!(store.contains("live", RecordKind::Throttle));
    assert!(store.contains("L", RecordKind::Lock));
}

#[tokio::test(start_paused = true)]
async fn test_sweep_works_in_batches_larger_than_capacity_share() {
    // Capacity 5 gives a batch of 1, so ten expired records take ten batches.
    let store = Arc::new(MemoryStore::with_capacity(5));
    let past = (Utc::now().timestamp() - 60).to_string();

    for i in 0..10 {
        store
            .create(StoreKey::throttle(&format!("expired-{}", i)), &past)
            .await
            .unwrap();
    }

    let sweeper = Sweeper::new(store.clone()).await.unwrap();
    assert_eq!(sweeper.batch_size(), 1);
    sweeper.sweep_once().await;

    assert_eq!(store.count(RecordKind::Throttle), 0);
}

#[tokio::test(start_paused = true)]
async fn test_sweep_requeues_failed_deletes() {
    let store = Arc::new(MemoryStore::new());
    let past = (Utc::now().timestamp() - 60).to_string();

    store
        .create(StoreKey::throttle("flaky"), &past)
        .await
        .unwrap();
    store
        .create(StoreKey::throttle("steady"), &past)
        .await
        .unwrap();
    store.fail_remove_once("flaky");

    let sweeper = Sweeper::new(store.clone()).await.unwrap();
    sweeper.sweep_once().await;

    assert_eq!(store.count(RecordKind::Throttle), 0);
}
