use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// The persisted entry representing current ownership of a named lock.
///
/// The store's uniqueness constraint on `id` is what makes a record exclusive.
#[derive(Clone, Debug, Default, Deserialize, PartialEq, Serialize)]
pub struct LockRecord {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expires: Option<DateTime<Utc>>,
}

impl LockRecord {
    pub fn new(id: &str) -> Self {
        LockRecord {
            id: id.to_string(),
            ..LockRecord::default()
        }
    }

    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        self.expires.is_some_and(|expires| expires <= now)
    }
}
