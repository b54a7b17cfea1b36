use std::future::Future;
use std::sync::Arc;

use tracing::{debug, error, warn};

use crate::error::{BoxError, Error};
use crate::store::{self, LockStore};

/// An acquired lock.
///
/// Releasing consumes the handle. A handle dropped while still held schedules
/// a best-effort release on the current tokio runtime.
#[derive(Debug)]
#[must_use = "the lock stays held until the handle is released"]
pub struct LockHandle {
    store: Arc<dyn LockStore>,
    collection: String,
    lock_name: String,
    held: bool,
}

impl LockHandle {
    pub(crate) fn new(store: Arc<dyn LockStore>, collection: &str, lock_name: &str) -> Self {
        LockHandle {
            store,
            collection: collection.to_string(),
            lock_name: lock_name.to_string(),
            held: true,
        }
    }

    pub fn lock_name(&self) -> &str {
        &self.lock_name
    }

    /// Delete the lock record, returning the number of records removed.
    ///
    /// Zero means the record was already gone (for example reaped by its
    /// lease), which is not an error.
    pub async fn release(mut self) -> Result<u64, store::Error> {
        self.held = false;
        let removed = self.store.delete(&self.collection, &self.lock_name).await?;
        if removed == 0 {
            debug!("Lock {} was already released", self.lock_name);
        } else {
            debug!("Released lock {}", self.lock_name);
        }
        Ok(removed)
    }

    /// Run `work` while holding the lock, then release it exactly once.
    ///
    /// A failure of `work` wins over a failure to release; the release failure
    /// is kept as secondary context on `Error::UserFunction`.
    pub async fn run<F, Fut, T, E>(self, work: F) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        let lock_name = self.lock_name.clone();
        let output = work().await;
        let released = self.release().await;

        match (output, released) {
            (Ok(value), Ok(_)) => Ok(value),
            (Ok(_), Err(release_error)) => {
                error!("Unable to release lock {lock_name}: {release_error}");
                Err(Error::Store(release_error))
            }
            (Err(source), released) => {
                let release_error = released.err();
                if let Some(release_error) = &release_error {
                    error!("Unable to release lock {lock_name}: {release_error}");
                }
                Err(Error::UserFunction {
                    source: source.into(),
                    release_error,
                })
            }
        }
    }
}

impl Drop for LockHandle {
    fn drop(&mut self) {
        if !self.held {
            return;
        }

        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(
                "Lock {} dropped outside a runtime, it stays held until it expires",
                self.lock_name
            );
            return;
        };

        warn!("Lock {} dropped without release, releasing it", self.lock_name);
        let store = self.store.clone();
        let collection = std::mem::take(&mut self.collection);
        let lock_name = std::mem::take(&mut self.lock_name);
        runtime.spawn(async move {
            if let Err(err) = store.delete(&collection, &lock_name).await {
                error!("Unable to release dropped lock {lock_name}: {err}");
            }
        });
    }
}

#[cfg(test)]
mod tests {
    use std::fmt;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    use super::*;
    use crate::record::LockRecord;
    use crate::store::{memory, MockLockStore};

    #[derive(Debug)]
    struct WorkFailed;

    impl fmt::Display for WorkFailed {
        fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
            write!(f, "work failed")
        }
    }

    impl std::error::Error for WorkFailed {}

    async fn held_lock(store: &Arc<memory::Backend>) -> LockHandle {
        store
            .try_create("locks", &LockRecord::new("mutex"))
            .await
            .unwrap();
        LockHandle::new(store.clone(), "locks", "mutex")
    }

    #[tokio::test]
    async fn test_release_removes_record() {
        let store = Arc::new(memory::Backend::new());
        let handle = held_lock(&store).await;

        assert_eq!(handle.release().await, Ok(1));
        assert_eq!(store.exists("locks", "mutex").await, Ok(false));
    }

    #[tokio::test]
    async fn test_release_of_missing_record_is_a_no_op() {
        let store = Arc::new(memory::Backend::new());
        let handle = held_lock(&store).await;
        store.delete("locks", "mutex").await.unwrap();

        assert_eq!(handle.release().await, Ok(0));
    }

    #[tokio::test]
    async fn test_run_releases_after_success() {
        let store = Arc::new(memory::Backend::new());
        let handle = held_lock(&store).await;

        let observer = store.clone();
        let value = handle
            .run(|| async move {
                assert_eq!(observer.exists("locks", "mutex").await, Ok(true));
                Ok::<_, WorkFailed>(42)
            })
            .await
            .unwrap();

        assert_eq!(value, 42);
        assert_eq!(store.exists("locks", "mutex").await, Ok(false));
    }

    #[tokio::test]
    async fn test_run_releases_after_failure() {
        let store = Arc::new(memory::Backend::new());
        let handle = held_lock(&store).await;

        let result: Result<(), Error> = handle.run(|| async { Err(WorkFailed) }).await;

        let Err(Error::UserFunction {
            source,
            release_error,
        }) = result
        else {
            panic!("Expected a user function error");
        };
        assert_eq!(source.to_string(), "work failed");
        assert!(release_error.is_none());
        assert_eq!(store.exists("locks", "mutex").await, Ok(false));
    }

    #[tokio::test]
    async fn test_work_failure_wins_over_release_failure() {
        let mut store = MockLockStore::new();
        store
            .expect_delete()
            .times(1)
            .returning(|_, _| Err(store::Error::Backend("gone".to_string())));
        let handle = LockHandle::new(Arc::new(store), "locks", "mutex");

        let result: Result<(), Error> = handle.run(|| async { Err(WorkFailed) }).await;

        let Err(Error::UserFunction {
            source,
            release_error,
        }) = result
        else {
            panic!("Expected a user function error");
        };
        assert_eq!(source.to_string(), "work failed");
        assert_eq!(
            release_error,
            Some(store::Error::Backend("gone".to_string()))
        );
    }

    #[tokio::test]
    async fn test_release_failure_after_success_is_reported() {
        let mut store = MockLockStore::new();
        store
            .expect_delete()
            .times(1)
            .returning(|_, _| Err(store::Error::Backend("gone".to_string())));
        let handle = LockHandle::new(Arc::new(store), "locks", "mutex");

        let ran = AtomicBool::new(false);
        let result = handle
            .run(|| async {
                ran.store(true, Ordering::SeqCst);
                Ok::<_, WorkFailed>(())
            })
            .await;

        assert!(ran.load(Ordering::SeqCst));
        assert!(matches!(result, Err(Error::Store(_))));
    }

    #[tokio::test]
    async fn test_dropped_handle_is_released() {
        let store = Arc::new(memory::Backend::new());
        let handle = held_lock(&store).await;

        drop(handle);
        tokio::time::sleep(Duration::from_millis(50)).await;

        assert_eq!(store.exists("locks", "mutex").await, Ok(false));
    }
}
