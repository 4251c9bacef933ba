
use std::path::Path;
use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;

use kickerd::config::Config;
use kickerd::daemon::Daemon;
use kickerd::error::KickerError;
use kickerd::throttle::KvThrottle;

use test_harness::{message, MemoryQueue, MemoryStore, TEST_RETENTION};

fn test_config(max_concurrent: usize, socket: &Path) -> Config {
    let mut config = Config::default();
    config.account.id = "123456789012".into();
    config.account.region = "ap-northeast-1".into();
    config.queue.queue_name = "jobs".into();
    config.kicker.max_concurrent_num = max_concurrent;
    config.kicker.stats_socket = socket.display().to_string();
    config
}

#[tokio::test]
async fn test_graceful_shutdown_drains_in_flight_jobs() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(MemoryQueue::new());
    for _ in 0..3 {
        queue.push(message(r#"{"command": "sleep 0.5; echo done", "event_id": "e"}"#));
    }

    let daemon = Daemon::new(test_config(3, &dir.path().join("stats.sock")), queue.clone());
    let stats = daemon.stats();

    let token = CancellationToken::new();
    let started = Instant::now();
    let handle = tokio::spawn(daemon.run(token.clone()));

    tokio::time::sleep(Duration::from_millis(100)).await;
    token.cancel();

    handle.await.unwrap().unwrap();

    // All three jobs ran to completion despite the early cancellation.
    assert!(started.elapsed() >= Duration::from_millis(500));
    assert_eq!(stats.succeeded(), 3);
    assert_eq!(queue.deleted().len(), 3);
}

#[tokio::test]
async fn test_duplicate_job_id_is_suppressed() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(MemoryQueue::new());

    let first = message(r#"{"command": "true", "event_id": "e"}"#);
    let mut duplicate = message(r#"{"command": "true", "event_id": "e"}"#);
    duplicate.id = first.id.clone();

    queue.push(first);
    for _ in 0..9 {
        queue.push(message(r#"{"command": "true", "event_id": "e"}"#));
    }
    queue.push(duplicate);

    let store = Arc::new(MemoryStore::new());
    let mut daemon = Daemon::new(test_config(5, &dir.path().join("stats.sock")), queue.clone());
    daemon.set_throttle(Arc::new(KvThrottle::new(store.clone(), TEST_RETENTION)));
    let stats = daemon.stats();

    let token = CancellationToken::new();
    let handle = tokio::spawn(daemon.run(token.clone()));

    tokio::time::sleep(Duration::from_millis(500)).await;
    token.cancel();
    handle.await.unwrap().unwrap();

    // Ten distinct job ids ran; the eleventh message was dropped as a
    // duplicate before execution.
    assert_eq!(stats.succeeded(), 10);
    assert_eq!(queue.deleted().len(), 11);
}

#[tokio::test]
async fn test_malformed_message_is_deleted_not_executed() {
    let dir = tempfile::tempdir().unwrap();
    let queue = Arc::new(MemoryQueue::new());
    queue.push(message("definitely not json"));
    queue.push(message(r#"{"command": "true", "event_id": "e"}"#));

    let daemon = Daemon::new(test_config(2, &dir.path().join("stats.sock")), queue.clone());
    let stats = daemon.stats();

    let token = CancellationToken::new();
    let handle = tokio::spawn(daemon.run(token.clone()));

    tokio::time::sleep(Duration::from_millis(300)).await;
    token.cancel();
    handle.await.unwrap().unwrap();

    assert_eq!(stats.succeeded(), 1);
    assert_eq!(stats.failed(), 0);
    assert_eq!(queue.deleted().len(), 2);
}

#[tokio::test]
async fn test_run_rejects_invalid_config() {
    let queue = Arc::new(MemoryQueue::new());

    let mut config = Config::default();
    config.queue.queue_name = "jobs".into();
    config.account.id = "123456789012".into();
    config.account.region = "ap-northeast-1".into();
    config.kicker.stats_port = 9000;
    config.kicker.stats_socket = "/tmp/kickerd-test.sock".into();

    let daemon = Daemon::new(config, queue);
    let result = daemon.run(CancellationToken::new()).await;

    assert!(matches!(result, Err(KickerError::Config(_))));
}
