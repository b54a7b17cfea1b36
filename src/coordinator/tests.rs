use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tokio::time::Instant;

use super::*;
use crate::record::LockRecord;
use crate::store::{self, memory, CreateOutcome, MockLockStore};

async fn coordinator(store: Arc<dyn LockStore>) -> Coordinator {
    Coordinator::configure(store, &CoordinatorConfig::default())
        .await
        .unwrap()
}

fn poll(max_tries: u32, delay_ms: u64) -> PollOptions {
    PollOptions {
        max_tries,
        delay: Duration::from_millis(delay_ms),
        ..PollOptions::default()
    }
}

#[tokio::test]
async fn test_configure_defaults() {
    let config = CoordinatorConfig::default();
    assert_eq!(config.model, "Mutex");
    assert_eq!(config.collection, "__mutexes");
    assert_eq!(config.ttl, 0);
    assert!(!config.clean_on_start);

    let mutex = coordinator(Arc::new(memory::Backend::new())).await;
    assert_eq!(mutex.model(), "Mutex");
    assert_eq!(mutex.collection(), "__mutexes");
}

#[tokio::test]
async fn test_clean_on_start_truncates_collection() {
    let store = Arc::new(memory::Backend::new());
    store
        .try_create("__mutexes", &LockRecord::new("stale"))
        .await
        .unwrap();

    let config = CoordinatorConfig {
        clean_on_start: true,
        ..CoordinatorConfig::default()
    };
    let mutex = Coordinator::configure(store, &config).await.unwrap();

    assert!(!mutex.is_locked("stale").await.unwrap());
}

#[tokio::test]
async fn test_missing_lock_name_makes_no_store_call() {
    let mut store = MockLockStore::new();
    store.expect_try_create().never();
    store.expect_exists().never();
    store.expect_delete().never();
    let mutex = coordinator(Arc::new(store)).await;

    assert!(matches!(
        mutex.lock("", PollOptions::default()).await,
        Err(Error::NoLockName)
    ));
    assert!(matches!(
        mutex.wait_lock("", WaitOptions::default()).await,
        Err(Error::NoLockName)
    ));
    assert!(matches!(mutex.is_locked("").await, Err(Error::NoLockName)));
    assert!(matches!(mutex.release("").await, Err(Error::NoLockName)));
}

#[tokio::test]
async fn test_release_correctness() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;

    let handle = mutex.lock("mutex", PollOptions::default()).await.unwrap();
    assert_eq!(handle.lock_name(), "mutex");
    assert!(mutex.is_locked("mutex").await.unwrap());

    assert_eq!(handle.release().await, Ok(1));
    assert!(!mutex.is_locked("mutex").await.unwrap());
}

#[tokio::test]
async fn test_idempotent_release() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;

    let handle = mutex.lock("mutex", PollOptions::default()).await.unwrap();
    assert_eq!(mutex.release("mutex").await.unwrap(), 1);
    assert_eq!(mutex.release("mutex").await.unwrap(), 0);
    assert_eq!(handle.release().await, Ok(0));
    assert_eq!(mutex.release("never-locked").await.unwrap(), 0);
}

#[tokio::test]
async fn test_record_carries_description_and_metadata() {
    let seen = Arc::new(Mutex::new(None));
    let recorded = seen.clone();

    let mut store = MockLockStore::new();
    store.expect_try_create().times(1).returning(move |_, record| {
        *recorded.lock().unwrap() = Some(record.clone());
        Ok(CreateOutcome::Created)
    });
    store.expect_delete().returning(|_, _| Ok(1));
    let mutex = coordinator(Arc::new(store)).await;

    let mut metadata = serde_json::Map::new();
    metadata.insert("host".to_string(), json!("worker-1"));
    let options = PollOptions {
        ttl: Some(Duration::from_secs(30)),
        description: Some("nightly import".to_string()),
        metadata: Some(metadata.clone()),
        ..PollOptions::default()
    };
    let handle = mutex.lock("mutex", options).await.unwrap();
    handle.release().await.unwrap();

    let record = seen.lock().unwrap().clone().unwrap();
    assert_eq!(record.id, "mutex");
    assert_eq!(record.description.as_deref(), Some("nightly import"));
    assert_eq!(record.metadata, Some(metadata));
    assert!(record.expires.is_some());
}

#[tokio::test]
async fn test_scoped_execution_runs_between_acquire_and_release() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;

    let inner = mutex.clone();
    let held_during_work = mutex
        .lock_with("mutex", PollOptions::default(), || async move {
            inner.is_locked("mutex").await
        })
        .await
        .unwrap();

    assert!(held_during_work);
    assert!(!mutex.is_locked("mutex").await.unwrap());
}

#[tokio::test]
async fn test_scoped_execution_releases_on_failure() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;

    let result: Result<(), Error> = mutex
        .lock_with("mutex", PollOptions::default(), || async {
            Err("function fails")
        })
        .await;

    let Err(Error::UserFunction { source, .. }) = result else {
        panic!("Expected a user function error");
    };
    assert_eq!(source.to_string(), "function fails");
    assert!(!mutex.is_locked("mutex").await.unwrap());
}

#[tokio::test]
async fn test_scoped_execution_skips_work_when_lock_taken() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;
    let _holder = mutex.lock("mutex", PollOptions::default()).await.unwrap();

    let ran = AtomicUsize::new(0);
    let result = mutex
        .lock_with("mutex", PollOptions::default(), || async {
            ran.fetch_add(1, Ordering::SeqCst);
            Ok::<_, store::Error>(())
        })
        .await;

    assert!(matches!(result, Err(Error::LockTaken { .. })));
    assert_eq!(ran.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_contention_scenario() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;

    // A acquires immediately.
    let a = mutex.lock("mutex", poll(3, 50)).await.unwrap();

    // B tries three times, 50ms apart, and gives up.
    let start = Instant::now();
    let b = mutex.lock("mutex", poll(3, 50)).await;
    let Err(Error::LockTaken { elapsed, .. }) = b else {
        panic!("Expected LockTaken for B");
    };
    assert!(elapsed >= Duration::from_millis(100));
    assert!(start.elapsed() < Duration::from_millis(1000));

    // A releases; C gets the lock on its first attempt.
    a.release().await.unwrap();
    let start = Instant::now();
    let c = mutex.lock("mutex", poll(3, 50)).await.unwrap();
    assert!(start.elapsed() < Duration::from_millis(50));
    c.release().await.unwrap();
}

#[tokio::test]
async fn test_poll_timeout_accuracy() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;
    let _holder = mutex.lock("mutex", PollOptions::default()).await.unwrap();

    let options = PollOptions {
        timeout: Some(Duration::from_millis(120)),
        ..poll(1000, 10)
    };
    let result = mutex.lock("mutex", options).await;

    let Err(error) = result else {
        panic!("Expected an error");
    };
    assert_eq!(error.code(), "ACQUISITION_TIMEOUT");
    assert!(error.elapsed().unwrap() >= Duration::from_millis(120));
}

#[tokio::test]
async fn test_ttl_reaps_unreleased_lock() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;

    let options = PollOptions {
        ttl: Some(Duration::from_millis(50)),
        ..PollOptions::default()
    };
    let handle = mutex.lock("mutex", options).await.unwrap();
    assert!(mutex.is_locked("mutex").await.unwrap());

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!mutex.is_locked("mutex").await.unwrap());

    // The lease expired before release; releasing is still fine.
    assert_eq!(handle.release().await, Ok(0));
}

#[tokio::test]
async fn test_configured_ttl_applies() {
    let config = CoordinatorConfig {
        ttl: 1,
        ..CoordinatorConfig::default()
    };
    let mutex = Coordinator::configure(Arc::new(memory::Backend::new()), &config)
        .await
        .unwrap();

    let _handle = mutex.lock("mutex", PollOptions::default()).await.unwrap();
    assert!(mutex.is_locked("mutex").await.unwrap());

    tokio::time::sleep(Duration::from_millis(1100)).await;
    assert!(!mutex.is_locked("mutex").await.unwrap());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_mutual_exclusion_under_contention() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;
    let inside = Arc::new(AtomicUsize::new(0));
    let max_inside = Arc::new(AtomicUsize::new(0));
    let completed = Arc::new(AtomicUsize::new(0));

    let mut workers = Vec::new();
    for _ in 0..10 {
        let mutex = mutex.clone();
        let inside = inside.clone();
        let max_inside = max_inside.clone();
        let completed = completed.clone();

        workers.push(tokio::spawn(async move {
            for _ in 0..5 {
                mutex
                    .lock_with("mutex", poll(10_000, 1), || async {
                        let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                        max_inside.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(2)).await;
                        inside.fetch_sub(1, Ordering::SeqCst);
                        completed.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, store::Error>(())
                    })
                    .await
                    .unwrap();
            }
        }));
    }

    for worker in workers {
        worker.await.unwrap();
    }

    assert_eq!(max_inside.load(Ordering::SeqCst), 1);
    assert_eq!(completed.load(Ordering::SeqCst), 50);
}

#[tokio::test]
async fn test_wait_lock_acquires_after_release() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;
    let holder = mutex.lock("mutex", PollOptions::default()).await.unwrap();

    let waiter = mutex.clone();
    let waiting = tokio::spawn(async move {
        let options = WaitOptions {
            timeout: Some(Duration::from_secs(5)),
            ..WaitOptions::default()
        };
        waiter
            .wait_lock_with("mutex", options, || async { Ok::<_, store::Error>(Instant::now()) })
            .await
    });

    tokio::time::sleep(Duration::from_millis(100)).await;
    let released_at = Instant::now();
    holder.release().await.unwrap();

    let acquired_at = waiting.await.unwrap().unwrap();
    assert!(acquired_at >= released_at);
    assert!(acquired_at - released_at < Duration::from_millis(500));
    assert!(!mutex.is_locked("mutex").await.unwrap());
}

#[tokio::test]
async fn test_wait_lock_timeout_accuracy() {
    let mutex = coordinator(Arc::new(memory::Backend::new())).await;
    let _holder = mutex.lock("mutex", PollOptions::default()).await.unwrap();

    let options = WaitOptions {
        timeout: Some(Duration::from_millis(150)),
        ..WaitOptions::default()
    };
    let result = mutex.wait_lock("mutex", options).await;

    let Err(Error::AcquisitionTimeout { elapsed, .. }) = result else {
        panic!("Expected AcquisitionTimeout");
    };
    assert!(elapsed >= Duration::from_millis(150));
}

#[tokio::test]
async fn test_wait_lock_needs_notifying_store() {
    let mut store = MockLockStore::new();
    store.expect_try_create().never();
    let mutex = coordinator(Arc::new(store)).await;

    let result = mutex.wait_lock("mutex", WaitOptions::default()).await;
    assert!(matches!(result, Err(Error::NotificationUnsupported)));
}
