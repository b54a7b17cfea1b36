use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{debug, info, instrument};

use crate::error::{BoxError, Error};
use crate::handle::LockHandle;
use crate::lease::LeaseManager;
use crate::record::LockRecord;
use crate::store::LockStore;
use crate::strategy::poller::{self, PollSettings};
use crate::strategy::{watcher, AcquireRequest};
use crate::timer::{Timer, TokioTimer};

#[cfg(test)]
mod tests;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct CoordinatorConfig {
    #[serde(default = "CoordinatorConfig::default_model")]
    pub model: String,
    #[serde(default = "CoordinatorConfig::default_collection")]
    pub collection: String,
    /// Lease length in seconds, 0 disables expiry.
    #[serde(default)]
    pub ttl: u64,
    #[serde(default)]
    pub clean_on_start: bool,
}

impl CoordinatorConfig {
    fn default_model() -> String {
        "Mutex".to_string()
    }

    fn default_collection() -> String {
        "__mutexes".to_string()
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        CoordinatorConfig {
            model: CoordinatorConfig::default_model(),
            collection: CoordinatorConfig::default_collection(),
            ttl: 0,
            clean_on_start: false,
        }
    }
}

/// Options for `Coordinator::lock`, which acquires by polling.
#[derive(Clone, Debug, PartialEq)]
pub struct PollOptions {
    /// Total attempts, the first one included. Zero is treated as one.
    pub max_tries: u32,
    pub delay: Duration,
    pub timeout: Option<Duration>,
    /// Overrides the configured lease TTL for this lock.
    pub ttl: Option<Duration>,
    pub description: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

impl Default for PollOptions {
    fn default() -> Self {
        let settings = PollSettings::default();
        PollOptions {
            max_tries: settings.max_tries,
            delay: settings.delay,
            timeout: settings.timeout,
            ttl: None,
            description: None,
            metadata: None,
        }
    }
}

/// Options for `Coordinator::wait_lock`, which acquires on deletion events.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct WaitOptions {
    pub timeout: Option<Duration>,
    pub ttl: Option<Duration>,
    pub description: Option<String>,
    pub metadata: Option<Map<String, Value>>,
}

/// Entry point for acquiring named locks on a shared store.
///
/// A coordinator holds no lock state of its own: every call goes to the store,
/// so coordinators in different processes pointing at the same store and
/// collection exclude each other.
#[derive(Clone, Debug)]
pub struct Coordinator {
    store: Arc<dyn LockStore>,
    timer: Arc<dyn Timer>,
    model: String,
    collection: String,
    lease: LeaseManager,
}

impl Coordinator {
    /// Provision the collection and build a coordinator on it.
    ///
    /// With `clean_on_start`, every existing record in the collection is removed.
    ///
    /// # Errors
    ///
    /// * `Error::Store` if the store cannot be provisioned or cleaned
    pub async fn configure(
        store: Arc<dyn LockStore>,
        config: &CoordinatorConfig,
    ) -> Result<Self, Error> {
        Self::configure_with_timer(store, config, Arc::new(TokioTimer)).await
    }

    pub async fn configure_with_timer(
        store: Arc<dyn LockStore>,
        config: &CoordinatorConfig,
        timer: Arc<dyn Timer>,
    ) -> Result<Self, Error> {
        store.provision(&config.collection).await?;

        if config.clean_on_start {
            let removed = store.clear(&config.collection).await?;
            info!(
                "Removed {removed} stale lock record(s) from {}",
                config.collection
            );
        }

        Ok(Coordinator {
            store,
            timer,
            model: config.model.clone(),
            collection: config.collection.clone(),
            lease: LeaseManager::new(Duration::from_secs(config.ttl)),
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn collection(&self) -> &str {
        &self.collection
    }

    /// Acquire `lock_name` by polling and return a handle the caller releases.
    ///
    /// # Errors
    ///
    /// * `Error::NoLockName` if `lock_name` is empty
    /// * `Error::LockTaken` if every attempt found the lock held
    /// * `Error::AcquisitionTimeout` if `options.timeout` elapsed first
    /// * `Error::Store` on any other store failure
    #[instrument(skip(self, options), fields(model = %self.model))]
    pub async fn lock(&self, lock_name: &str, options: PollOptions) -> Result<LockHandle, Error> {
        let request = self.request(
            lock_name,
            options.ttl,
            options.description,
            options.metadata,
        )?;
        let settings = PollSettings {
            max_tries: options.max_tries,
            delay: options.delay,
            timeout: options.timeout,
        };

        poller::acquire(request, settings).await?;
        info!("Acquired lock");
        Ok(LockHandle::new(self.store.clone(), &self.collection, lock_name))
    }

    /// Acquire `lock_name` by polling, run `work`, then release the lock.
    ///
    /// The lock is released whether `work` succeeds or fails.
    pub async fn lock_with<F, Fut, T, E>(
        &self,
        lock_name: &str,
        options: PollOptions,
        work: F,
    ) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.lock(lock_name, options).await?.run(work).await
    }

    /// Acquire `lock_name` by waiting for the holder's release.
    ///
    /// # Errors
    ///
    /// * `Error::NoLockName` if `lock_name` is empty
    /// * `Error::NotificationUnsupported` if the store cannot notify deletions
    /// * `Error::AcquisitionTimeout` if `options.timeout` elapsed first
    /// * `Error::Store` on any other store failure
    #[instrument(skip(self, options), fields(model = %self.model))]
    pub async fn wait_lock(
        &self,
        lock_name: &str,
        options: WaitOptions,
    ) -> Result<LockHandle, Error> {
        let request = self.request(
            lock_name,
            options.ttl,
            options.description,
            options.metadata,
        )?;

        watcher::acquire(&request, options.timeout).await?;
        info!("Acquired lock");
        Ok(LockHandle::new(self.store.clone(), &self.collection, lock_name))
    }

    /// Acquire `lock_name` by waiting, run `work`, then release the lock.
    pub async fn wait_lock_with<F, Fut, T, E>(
        &self,
        lock_name: &str,
        options: WaitOptions,
        work: F,
    ) -> Result<T, Error>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Into<BoxError>,
    {
        self.wait_lock(lock_name, options).await?.run(work).await
    }

    /// Point-in-time check; the answer may be stale as soon as it returns.
    #[instrument(skip(self), fields(model = %self.model))]
    pub async fn is_locked(&self, lock_name: &str) -> Result<bool, Error> {
        if lock_name.is_empty() {
            return Err(Error::NoLockName);
        }
        Ok(self.store.exists(&self.collection, lock_name).await?)
    }

    /// Delete the record for `lock_name` regardless of who holds it.
    ///
    /// Returns the number of records removed; releasing a free lock returns 0.
    #[instrument(skip(self), fields(model = %self.model))]
    pub async fn release(&self, lock_name: &str) -> Result<u64, Error> {
        if lock_name.is_empty() {
            return Err(Error::NoLockName);
        }
        let removed = self.store.delete(&self.collection, lock_name).await?;
        debug!("Force-released lock, {removed} record(s) removed");
        Ok(removed)
    }

    fn request(
        &self,
        lock_name: &str,
        ttl: Option<Duration>,
        description: Option<String>,
        metadata: Option<Map<String, Value>>,
    ) -> Result<AcquireRequest, Error> {
        if lock_name.is_empty() {
            return Err(Error::NoLockName);
        }

        Ok(AcquireRequest {
            store: self.store.clone(),
            timer: self.timer.clone(),
            collection: self.collection.clone(),
            record: LockRecord {
                id: lock_name.to_string(),
                description,
                metadata,
                expires: None,
            },
            lease: self.lease.with_override(ttl),
        })
    }
}
