use std::any::Any;
use std::fmt::Debug;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;

mod error;
pub mod memory;
pub mod redis;

pub use error::Error;

use crate::record::LockRecord;

/// Outcome of an atomic insert-if-absent.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    AlreadyExists,
}

/// The polling facet of a backing store.
///
/// Records are grouped by `collection`; `id` is unique within a collection.
#[async_trait]
pub trait LockStore: Any + Debug + Send + Sync {
    /// Prepare the collection for use. Backends with nothing to provision do nothing.
    async fn provision(&self, _collection: &str) -> Result<(), Error> {
        Ok(())
    }

    /// Insert the record unless a live record with the same id exists.
    ///
    /// Exactly one of any number of concurrent callers for the same id observes
    /// `CreateOutcome::Created`, across process and machine boundaries.
    async fn try_create(
        &self,
        collection: &str,
        record: &LockRecord,
    ) -> Result<CreateOutcome, Error>;

    /// Delete the record, returning the number of records removed (0 or 1).
    async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error>;

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, Error>;

    /// Remove every record in the collection, returning how many were removed.
    async fn clear(&self, collection: &str) -> Result<u64, Error>;

    /// The notification facet, when the backend supports it.
    fn notifier(&self) -> Option<&dyn DeletionNotifier> {
        None
    }
}

/// The notification facet of a backing store.
#[async_trait]
pub trait DeletionNotifier: Send + Sync {
    /// Open a subscription delivering deletions (explicit or expiry) of one record.
    async fn subscribe_deletions(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Box<dyn DeletionSubscription>, Error>;
}

/// An open deletion subscription. Callers must `close` it on every exit path.
#[async_trait]
pub trait DeletionSubscription: Send {
    /// Wait for the next deletion event of the subscribed record.
    ///
    /// Spurious wake-ups are allowed; callers re-check the store afterwards.
    async fn next(&mut self) -> Result<(), Error>;

    async fn close(self: Box<Self>) -> Result<(), Error>;
}

#[cfg(test)]
mockall::mock! {
    pub LockStore {}

    #[async_trait]
    impl LockStore for LockStore {
        async fn try_create(
            &self,
            collection: &str,
            record: &LockRecord,
        ) -> Result<CreateOutcome, Error>;
        async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error>;
        async fn exists(&self, collection: &str, id: &str) -> Result<bool, Error>;
        async fn clear(&self, collection: &str) -> Result<u64, Error>;
    }
}

#[cfg(test)]
impl Debug for MockLockStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockLockStore").finish_non_exhaustive()
    }
}

#[derive(Clone, Debug, Default, Deserialize, PartialEq)]
pub enum StoreConfig {
    #[default]
    #[serde(rename = "memory")]
    Memory,
    #[serde(rename = "redis")]
    Redis(redis::BackendConfig),
}

impl StoreConfig {
    pub fn to_backend(&self) -> Result<Arc<dyn LockStore>, Error> {
        match self {
            StoreConfig::Redis(config) => Ok(Arc::new(redis::Backend::new(config)?)),
            StoreConfig::Memory => Ok(Arc::new(memory::Backend::new())),
        }
    }
}
