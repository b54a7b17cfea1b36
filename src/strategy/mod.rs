use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{debug, warn};

use crate::error::Error;
use crate::lease::LeaseManager;
use crate::record::LockRecord;
use crate::store::{self, CreateOutcome, LockStore};
use crate::timer::Timer;

pub mod poller;
pub mod watcher;

/// Everything a strategy needs to attempt one acquisition.
///
/// The record's expiry is stamped at each attempt, so a lease always starts
/// when the record is actually written.
#[derive(Clone, Debug)]
pub struct AcquireRequest {
    pub store: Arc<dyn LockStore>,
    pub timer: Arc<dyn Timer>,
    pub collection: String,
    pub record: LockRecord,
    pub lease: LeaseManager,
}

impl AcquireRequest {
    pub fn lock_name(&self) -> &str {
        &self.record.id
    }

    pub async fn try_create(&self) -> Result<CreateOutcome, store::Error> {
        let mut record = self.record.clone();
        self.lease.stamp(&mut record, Utc::now());
        self.store.try_create(&self.collection, &record).await
    }

    pub async fn exists(&self) -> Result<bool, store::Error> {
        self.store.exists(&self.collection, self.lock_name()).await
    }

    pub(crate) fn timeout_error(&self, elapsed: Duration) -> Error {
        Error::AcquisitionTimeout {
            lock_name: self.lock_name().to_string(),
            elapsed,
        }
    }

    /// Delete a record created after its caller already gave up.
    pub(crate) async fn abandon(&self) {
        warn!(
            "Lock {} was acquired after its caller timed out, releasing it",
            self.lock_name()
        );
        match self.store.delete(&self.collection, self.lock_name()).await {
            Ok(removed) => debug!("Removed {removed} orphaned lock record(s)"),
            Err(err) => warn!(
                "Unable to remove orphaned lock {}, it remains until expiry: {err}",
                self.lock_name()
            ),
        }
    }
}
