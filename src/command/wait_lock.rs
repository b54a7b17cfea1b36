use std::time::Duration;

use argh::FromArgs;
use store_mutex::configuration::LockDefaultsConfig;
use store_mutex::{Coordinator, WaitOptions};
use tracing::info;

use crate::command;
use crate::command::child;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "wait-lock",
    description = "Run a command while holding a lock, waiting for the current holder to release it"
)]
pub struct Options {
    #[argh(positional)]
    /// the name of the lock
    pub lock_name: String,
    #[argh(option, short = 't')]
    /// how long to wait in milliseconds, 0 waits indefinitely
    pub timeout: Option<u64>,
    #[argh(option)]
    /// lease length in seconds, overriding the configured one
    pub ttl: Option<u64>,
    #[argh(option)]
    /// a description stored with the lock
    pub description: Option<String>,
    #[argh(positional, greedy)]
    /// the command to run; without one the lock is held until interrupted
    pub command: Vec<String>,
}

pub struct Command {
    coordinator: Coordinator,
    lock_name: String,
    options: WaitOptions,
    command: Vec<String>,
}

impl Command {
    pub fn new(options: &Options, defaults: &LockDefaultsConfig, coordinator: Coordinator) -> Self {
        let mut wait_options = defaults.wait_options();
        if let Some(timeout) = options.timeout {
            wait_options.timeout = (timeout > 0).then(|| Duration::from_millis(timeout));
        }
        wait_options.ttl = options.ttl.map(Duration::from_secs);
        wait_options.description.clone_from(&options.description);

        Command {
            coordinator,
            lock_name: options.lock_name.clone(),
            options: wait_options,
            command: options.command.clone(),
        }
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        if self.command.is_empty() {
            let handle = self
                .coordinator
                .wait_lock(&self.lock_name, self.options.clone())
                .await?;
            return child::hold_until_interrupted(handle).await;
        }

        let status = self
            .coordinator
            .wait_lock_with(&self.lock_name, self.options.clone(), || {
                child::run(&self.command)
            })
            .await?;
        info!("Command finished with {status}");
        child::check(status)
    }
}
