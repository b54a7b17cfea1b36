use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::warn;

use crate::record::LockRecord;

/// Stamps lock records with an expiry when a TTL is configured.
///
/// The store reaps expired records on its own. A lease only bounds how long a
/// crashed holder can keep a lock; exclusion itself comes from the store.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct LeaseManager {
    ttl: Option<Duration>,
}

impl LeaseManager {
    /// A zero TTL disables expiry.
    pub fn new(ttl: Duration) -> Self {
        if ttl.is_zero() {
            LeaseManager { ttl: None }
        } else {
            LeaseManager { ttl: Some(ttl) }
        }
    }

    pub fn ttl(&self) -> Option<Duration> {
        self.ttl
    }

    /// Returns a lease manager using `ttl` instead of the configured one, if given.
    pub fn with_override(self, ttl: Option<Duration>) -> Self {
        match ttl {
            Some(ttl) => LeaseManager::new(ttl),
            None => self,
        }
    }

    pub fn expires_at(&self, acquired_at: DateTime<Utc>) -> Option<DateTime<Utc>> {
        let ttl = self.ttl?;
        match TimeDelta::from_std(ttl) {
            Ok(delta) => acquired_at.checked_add_signed(delta),
            Err(err) => {
                warn!("Lease TTL {ttl:?} is out of range, record will not expire: {err}");
                None
            }
        }
    }

    pub fn stamp(&self, record: &mut LockRecord, acquired_at: DateTime<Utc>) {
        record.expires = self.expires_at(acquired_at);
    }
}
