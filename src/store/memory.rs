use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info};

use crate::record::LockRecord;
use crate::store::{
    CreateOutcome, DeletionNotifier, DeletionSubscription, Error, LockStore,
};

const DELETION_CHANNEL_CAPACITY: usize = 1024;

/// A process-local store: records live in a map guarded by an async mutex.
///
/// Insert-if-absent is atomic because the map is only touched while holding
/// the mutex. Expired records are reaped lazily on access and swept
/// periodically.
#[derive(Debug)]
pub struct Backend {
    records: Arc<Mutex<HashMap<String, LockRecord>>>,
    deletions: broadcast::Sender<String>,
    counter: Arc<AtomicUsize>,
}

impl Default for Backend {
    fn default() -> Self {
        Self::new()
    }
}

impl Backend {
    pub fn new() -> Self {
        info!("Using in-memory lock store");
        let (deletions, _) = broadcast::channel(DELETION_CHANNEL_CAPACITY);
        Backend {
            records: Arc::new(Mutex::new(HashMap::new())),
            deletions,
            counter: Arc::new(AtomicUsize::new(0)),
        }
    }

    fn key(collection: &str, id: &str) -> String {
        format!("{collection}/{id}")
    }

    fn publish_deletion(&self, key: String) {
        // No receiver simply means nobody is waiting.
        let _ = self.deletions.send(key);
    }

    async fn cleanup_expired(&self) {
        let now = Utc::now();
        let mut records = self.records.lock().await;
        let expired: Vec<String> = records
            .iter()
            .filter(|(_, record)| record.is_expired_at(now))
            .map(|(key, _)| key.clone())
            .collect();

        for key in expired {
            records.remove(&key);
            debug!("Reaped expired lock record: {key}");
            self.publish_deletion(key);
        }
    }

    async fn maybe_cleanup(&self) {
        let count = self.counter.fetch_add(1, Ordering::Relaxed);
        if count.is_multiple_of(1000) {
            self.cleanup_expired().await;
        }
    }

    /// Look up a live record, reaping it first if it has expired.
    fn live_record<'a>(
        &self,
        records: &'a mut HashMap<String, LockRecord>,
        key: &str,
    ) -> Option<&'a LockRecord> {
        let expired = records
            .get(key)
            .is_some_and(|record| record.is_expired_at(Utc::now()));

        if expired {
            records.remove(key);
            debug!("Reaped expired lock record: {key}");
            self.publish_deletion(key.to_string());
            return None;
        }

        records.get(key)
    }

    #[cfg(test)]
    pub async fn record_count(&self) -> usize {
        self.records.lock().await.len()
    }
}

#[async_trait]
impl LockStore for Backend {
    async fn try_create(
        &self,
        collection: &str,
        record: &LockRecord,
    ) -> Result<CreateOutcome, Error> {
        self.maybe_cleanup().await;

        let key = Self::key(collection, &record.id);
        let mut records = self.records.lock().await;
        if self.live_record(&mut records, &key).is_some() {
            return Ok(CreateOutcome::AlreadyExists);
        }

        records.insert(key, record.clone());
        Ok(CreateOutcome::Created)
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error> {
        self.maybe_cleanup().await;

        let key = Self::key(collection, id);
        let mut records = self.records.lock().await;
        if self.live_record(&mut records, &key).is_none() {
            return Ok(0);
        }

        records.remove(&key);
        drop(records);
        self.publish_deletion(key);
        Ok(1)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, Error> {
        self.maybe_cleanup().await;

        let key = Self::key(collection, id);
        let mut records = self.records.lock().await;
        Ok(self.live_record(&mut records, &key).is_some())
    }

    async fn clear(&self, collection: &str) -> Result<u64, Error> {
        let prefix = Self::key(collection, "");
        let mut records = self.records.lock().await;
        let keys: Vec<String> = records
            .keys()
            .filter(|key| key.starts_with(&prefix))
            .cloned()
            .collect();

        for key in &keys {
            records.remove(key);
        }
        drop(records);

        for key in &keys {
            self.publish_deletion(key.clone());
        }
        Ok(keys.len() as u64)
    }

    fn notifier(&self) -> Option<&dyn DeletionNotifier> {
        Some(self)
    }
}

#[async_trait]
impl DeletionNotifier for Backend {
    async fn subscribe_deletions(
        &self,
        collection: &str,
        id: &str,
    ) -> Result<Box<dyn DeletionSubscription>, Error> {
        let key = Self::key(collection, id);
        let receiver = self.deletions.subscribe();
        let expires = self
            .records
            .lock()
            .await
            .get(&key)
            .and_then(|record| record.expires);

        Ok(Box::new(Subscription {
            key,
            receiver,
            expires,
        }))
    }
}

/// Deletion subscription over the store's broadcast channel.
///
/// Expiry is reaped lazily, so the subscription also wakes up once the
/// watched record's expiry has passed.
struct Subscription {
    key: String,
    receiver: broadcast::Receiver<String>,
    expires: Option<DateTime<Utc>>,
}

impl Subscription {
    fn until_expiry(&self) -> Option<Duration> {
        let expires = self.expires?;
        Some((expires - Utc::now()).to_std().unwrap_or(Duration::ZERO))
    }
}

#[async_trait]
impl DeletionSubscription for Subscription {
    async fn next(&mut self) -> Result<(), Error> {
        let expiry = self.until_expiry();
        let deletion = async {
            loop {
                match self.receiver.recv().await {
                    Ok(key) if key == self.key => return Ok(()),
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!("Deletion subscription lagged by {skipped} events");
                        return Ok(());
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        return Err(Error::Subscription(
                            "Deletion channel closed".to_string(),
                        ));
                    }
                }
            }
        };

        match expiry {
            Some(expiry) => {
                tokio::select! {
                    result = deletion => result,
                    () = tokio::time::sleep(expiry) => Ok(()),
                }
            }
            None => deletion.await,
        }
    }

    async fn close(self: Box<Self>) -> Result<(), Error> {
        debug!("Closing deletion subscription for {}", self.key);
        Ok(())
    }
}
