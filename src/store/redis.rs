use std::time::Duration;

use async_trait::async_trait;
use futures_util::StreamExt;
use redis::aio::{MultiplexedConnection, PubSub};
use redis::AsyncCommands;
use serde::Deserialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::record::LockRecord;
use crate::store::{CreateOutcome, DeletionNotifier, DeletionSubscription, Error, LockStore};

const SCAN_BATCH_SIZE: usize = 100;

#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct BackendConfig {
    pub url: String,
    #[serde(default)]
    pub key_prefix: String,
}

/// Lock records stored as JSON string values, one key per lock.
///
/// Insert-if-absent maps to `SET NX`, and expiry to `PXAT`, so Redis itself
/// reaps expired leases. Releases are announced on a per-lock channel; expiry
/// is announced through keyspace notifications when the server has them
/// enabled (`notify-keyspace-events` including `Kgx`).
#[derive(Debug)]
pub struct Backend {
    client: redis::Client,
    key_prefix: String,
}

impl Backend {
    pub fn new(config: &BackendConfig) -> Result<Self, Error> {
        info!("Using Redis lock store");
        let client = redis::Client::open(config.url.as_str())?;
        Ok(Backend {
            client,
            key_prefix: config.key_prefix.clone(),
        })
    }

    async fn get_connection(&self) -> Result<MultiplexedConnection, Error> {
        Ok(self.client.get_multiplexed_async_connection().await?)
    }

    fn record_key(&self, collection: &str, id: &str) -> String {
        format!("{}{collection}:{id}", self.key_prefix)
    }

    fn release_channel(record_key: &str) -> String {
        format!("{record_key}:released")
    }

    fn keyspace_pattern(record_key: &str) -> String {
        format!("__keyspace@*__:{}", escape_glob(record_key))
    }

    /// When the key is due to expire, relative to now.
    ///
    /// A missing key is due immediately; a key without expiry never is.
    async fn expires_in(&self, record_key: &str) -> Result<Option<Duration>, Error> {
        let mut conn = self.get_connection().await?;
        let pttl: i64 = conn.pttl(record_key).await?;
        Ok(match pttl {
            -2 => Some(Duration::ZERO),
            ms if ms >= 0 => Some(Duration::from_millis(ms.unsigned_abs())),
            _ => None,
        })
    }
}

#[async_trait]
impl LockStore for Backend {
    async fn provision(&self, collection: &str) -> Result<(), Error> {
        let mut conn = self.get_connection().await?;
        let _: String = redis::cmd("PING").query_async(&mut conn).await?;
        debug!("Redis lock store reachable for collection {collection}");
        Ok(())
    }

    async fn try_create(
        &self,
        collection: &str,
        record: &LockRecord,
    ) -> Result<CreateOutcome, Error> {
        let key = self.record_key(collection, &record.id);
        let value = serde_json::to_string(record)?;

        let mut cmd = redis::cmd("SET");
        cmd.arg(&key).arg(value).arg("NX");
        if let Some(expires) = record.expires {
            cmd.arg("PXAT").arg(expires.timestamp_millis());
        }

        let mut conn = self.get_connection().await?;
        let created: bool = cmd.query_async(&mut conn).await?;
        if created {
            Ok(CreateOutcome::Created)
        } else {
            Ok(CreateOutcome::AlreadyExists)
        }
    }

    async fn delete(&self, collection: &str, id: &str) -> Result<u64, Error> {
        let key = self.record_key(collection, id);
        let mut conn = self.get_connection().await?;

        let removed: u64 = conn.del(&key).await?;
        if removed > 0 {
            let published = conn.publish(Self::release_channel(&key), id).await;
            announced(&key, published);
        }
        Ok(removed)
    }

    async fn exists(&self, collection: &str, id: &str) -> Result<bool, Error> {
        let key = self.record_key(collection, id);
        let mut conn = self.get_connection().await?;
        Ok(conn.exists(&key).await?)
    }

    async fn clear(&self, collection: &str) -> Result<u64, Error> {
        let pattern = format!("{}*", self.record_key(collection, ""));
        let mut conn = self.get_connection().await?;

        let mut removed = 0;
        let mut cursor: u64 = 0;
        loop {
            let (next_cursor, keys): (u64, Vec<String>) = redis::cmd("SCAN")
                .arg(cursor)
                .arg("MATCH")
                .arg(&pattern)
                .arg("COUNT")
                .arg(SCAN_BATCH_SIZE)
                .query_async(&mut conn)
                .await?;

            if !keys.is_empty() {
                let count: u64 = conn.del(&keys).await?;
                removed += count;
            }

            if next_cursor == 0 {
                break;
            }
            cursor = next_cursor;
        }

        Ok(removed)
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
        let key = self.record_key(collection, id);
        let channel = Self::release_channel(&key);
        let pattern = Self::keyspace_pattern(&key);

        let mut pubsub = self.client.get_async_pubsub().await?;
        pubsub.subscribe(&channel).await?;
        pubsub.psubscribe(&pattern).await?;

        // Read the lease after subscribing so an expiry in between is not missed.
        let expires_at = self
            .expires_in(&key)
            .await?
            .map(|expires_in| Instant::now() + expires_in);

        Ok(Box::new(Subscription {
            pubsub,
            channel,
            pattern,
            expires_at,
        }))
    }
}

struct Subscription {
    pubsub: PubSub,
    channel: String,
    pattern: String,
    expires_at: Option<Instant>,
}

impl Subscription {
    async fn next_deletion(&mut self) -> Result<(), Error> {
        let channel = self.channel.clone();
        let mut messages = self.pubsub.on_message();

        while let Some(message) = messages.next().await {
            if message.get_channel_name() == channel {
                return Ok(());
            }

            let event: String = message.get_payload()?;
            if is_deletion_event(&event) {
                return Ok(());
            }
        }

        Err(Error::Subscription(
            "Redis pub/sub connection closed".to_string(),
        ))
    }
}

/// Waiters also wake on the key's deletion event or lease, so a failed
/// announcement only delays them.
fn announced(record_key: &str, published: Result<u64, redis::RedisError>) -> bool {
    match published {
        Ok(_) => true,
        Err(err) => {
            warn!("Released {record_key} but could not announce it: {err}");
            false
        }
    }
}

fn escape_glob(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '*' | '?' | '[' | ']' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

fn is_deletion_event(event: &str) -> bool {
    matches!(event, "del" | "expired" | "evicted" | "unlink")
}

#[async_trait]
impl DeletionSubscription for Subscription {
    async fn next(&mut self) -> Result<(), Error> {
        // Keyspace notifications may be disabled, so the lease bounds the wait.
        let Some(expires_at) = self.expires_at else {
            return self.next_deletion().await;
        };

        tokio::select! {
            result = self.next_deletion() => result,
            () = tokio::time::sleep_until(expires_at) => Ok(()),
        }
    }

    async fn close(self: Box<Self>) -> Result<(), Error> {
        let Subscription {
            mut pubsub,
            channel,
            pattern,
            ..
        } = *self;
        pubsub.unsubscribe(&channel).await?;
        pubsub.punsubscribe(&pattern).await?;
        debug!("Closed deletion subscription on {channel}");
        Ok(())
    }
}
