use std::{fmt, io};

use store_mutex::configuration;

#[derive(Debug)]
pub enum Error {
    IO(io::Error),
    Configuration(configuration::Error),
    Lock(store_mutex::Error),
    ChildExit(Option<i32>),
}

impl Error {
    /// The process exit code to report for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            Error::ChildExit(code) => code.unwrap_or(1),
            Error::Lock(store_mutex::Error::LockTaken { .. }) => 75,
            Error::Lock(store_mutex::Error::AcquisitionTimeout { .. }) => 124,
            _ => 1,
        }
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Error::IO(err) => write!(f, "IO error: {err}"),
            Error::Configuration(err) => {
                write!(f, "Configuration error: ")?;
                write!(f, "{err}")
            }
            Error::Lock(err) => write!(f, "Lock error [{}]: {err}", err.code()),
            Error::ChildExit(Some(code)) => write!(f, "Command exited with status {code}"),
            Error::ChildExit(None) => write!(f, "Command terminated by signal"),
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::IO(err)
    }
}

impl From<configuration::Error> for Error {
    fn from(err: configuration::Error) -> Self {
        Error::Configuration(err)
    }
}

impl From<store_mutex::Error> for Error {
    fn from(err: store_mutex::Error) -> Self {
        Error::Lock(err)
    }
}

impl From<store_mutex::store::Error> for Error {
    fn from(err: store_mutex::store::Error) -> Self {
        Error::Lock(store_mutex::Error::Store(err))
    }
}
