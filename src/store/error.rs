use std::fmt;

use redis::RedisError;
use tracing::{debug, warn};

#[derive(Debug, PartialEq)]
pub enum Error {
    Backend(String),
    Serialization(String),
    Subscription(String),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::Backend(err) => write!(f, "Store backend error: {err}"),
            Error::Serialization(err) => write!(f, "Lock record serialization error: {err}"),
            Error::Subscription(err) => write!(f, "Deletion subscription error: {err}"),
        }
    }
}

impl std::error::Error for Error {}

impl From<RedisError> for Error {
    fn from(error: RedisError) -> Self {
        warn!("Redis backend error: {error}");
        Error::Backend(format!("Redis error: {error}"))
    }
}

impl From<serde_json::Error> for Error {
    fn from(error: serde_json::Error) -> Self {
        debug!("Lock record serialization error: {error}");
        Error::Serialization(error.to_string())
    }
}
