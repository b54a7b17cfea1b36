use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::Deserialize;

mod error;

use crate::coordinator::{CoordinatorConfig, PollOptions, WaitOptions};
use crate::store::StoreConfig;
pub use error::Error;

#[derive(Clone, Debug, Default, Deserialize)]
pub struct Configuration {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub mutex: CoordinatorConfig,
    #[serde(default)]
    pub lock: LockDefaultsConfig,
    #[serde(default)]
    pub observability: Option<ObservabilityConfig>,
}

/// Defaults applied to `lock` and `wait-lock` when the command line omits them.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct LockDefaultsConfig {
    #[serde(default = "LockDefaultsConfig::default_max_tries")]
    pub max_tries: u32,
    /// Milliseconds between polling attempts.
    #[serde(default = "LockDefaultsConfig::default_delay")]
    pub delay: u64,
    /// Milliseconds, 0 disables the timeout.
    #[serde(default)]
    pub timeout: u64,
}

impl Default for LockDefaultsConfig {
    fn default() -> Self {
        LockDefaultsConfig {
            max_tries: LockDefaultsConfig::default_max_tries(),
            delay: LockDefaultsConfig::default_delay(),
            timeout: 0,
        }
    }
}

impl LockDefaultsConfig {
    fn default_max_tries() -> u32 {
        1
    }

    fn default_delay() -> u64 {
        200
    }

    fn timeout(&self) -> Option<Duration> {
        (self.timeout > 0).then(|| Duration::from_millis(self.timeout))
    }

    pub fn poll_options(&self) -> PollOptions {
        PollOptions {
            max_tries: self.max_tries,
            delay: Duration::from_millis(self.delay),
            timeout: self.timeout(),
            ..PollOptions::default()
        }
    }

    pub fn wait_options(&self) -> WaitOptions {
        WaitOptions {
            timeout: self.timeout(),
            ..WaitOptions::default()
        }
    }
}

#[derive(Clone, Debug, Default, Deserialize)]
pub struct ObservabilityConfig {
    #[serde(default)]
    pub tracing: Option<TracingConfig>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct TracingConfig {
    pub endpoint: String,
    pub sampling_rate: f64,
}

impl Configuration {
    /// Load the configuration file, or the defaults if it does not exist.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self, Error> {
        let path = path.as_ref();
        if !path.exists() {
            tracing::debug!("No configuration file at {}, using defaults", path.display());
            return Ok(Configuration::default());
        }

        let config_str = fs::read_to_string(path)?;
        Self::load_from_str(&config_str)
    }

    pub fn load_from_str(slice: &str) -> Result<Self, Error> {
        let config: Configuration = toml::from_str(slice)?;

        if config.lock.max_tries == 0 {
            return Err(Error::InvalidLockDefaults(
                "max_tries must be at least 1".to_string(),
            ));
        }

        Ok(config)
    }
}
