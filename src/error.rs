use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::store;

pub type BoxError = Box<dyn std::error::Error + Send + Sync>;

#[derive(Debug)]
pub enum Error {
    /// The lock name was empty; no store call was made.
    NoLockName,
    /// Every permitted attempt found the lock held.
    LockTaken { lock_name: String, elapsed: Duration },
    /// The overall timeout elapsed before the lock could be acquired.
    AcquisitionTimeout { lock_name: String, elapsed: Duration },
    /// `wait_lock` needs a store with deletion notifications.
    NotificationUnsupported,
    Store(store::Error),
    /// The caller-supplied work failed. A failed release is kept alongside.
    UserFunction {
        source: BoxError,
        release_error: Option<store::Error>,
    },
}

impl Error {
    /// A stable code for each variant, usable in logs and exit reports.
    pub fn code(&self) -> &'static str {
        match self {
            Error::NoLockName => "NO_LOCKNAME",
            Error::LockTaken { .. } => "LOCK_TAKEN",
            Error::AcquisitionTimeout { .. } => "ACQUISITION_TIMEOUT",
            Error::NotificationUnsupported => "NOTIFICATION_UNSUPPORTED",
            Error::Store(_) => "STORE_ERROR",
            Error::UserFunction { .. } => "USER_FUNCTION_ERROR",
        }
    }

    /// Time spent acquiring, for the variants that report it.
    pub fn elapsed(&self) -> Option<Duration> {
        match self {
            Error::LockTaken { elapsed, .. } | Error::AcquisitionTimeout { elapsed, .. } => {
                Some(*elapsed)
            }
            _ => None,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::NoLockName => write!(f, "no lock name"),
            Error::LockTaken { lock_name, elapsed } => {
                write!(f, "lock {lock_name} is taken (after {elapsed:?})")
            }
            Error::AcquisitionTimeout { lock_name, elapsed } => {
                write!(f, "timed out acquiring lock {lock_name} after {elapsed:?}")
            }
            Error::NotificationUnsupported => {
                write!(f, "lock store does not support deletion notifications")
            }
            Error::Store(err) => write!(f, "{err}"),
            Error::UserFunction {
                source,
                release_error,
            } => {
                write!(f, "locked function failed: {source}")?;
                if let Some(release_error) = release_error {
                    write!(f, " (release also failed: {release_error})")?;
                }
                Ok(())
            }
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Store(err) => Some(err),
            Error::UserFunction { source, .. } => Some(source.as_ref()),
            _ => None,
        }
    }
}

impl From<store::Error> for Error {
    fn from(error: store::Error) -> Self {
        debug!("Lock store error: {error}");
        Error::Store(error)
    }
}
