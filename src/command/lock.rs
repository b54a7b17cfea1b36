use std::time::Duration;

use argh::FromArgs;
use store_mutex::configuration::LockDefaultsConfig;
use store_mutex::{Coordinator, PollOptions};
use tracing::info;

use crate::command;
use crate::command::child;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "lock",
    description = "Run a command while holding a lock acquired by polling"
)]
pub struct Options {
    #[argh(positional)]
    /// the name of the lock
    pub lock_name: String,
    #[argh(option, short = 'n')]
    /// how many times to try acquiring the lock
    pub max_tries: Option<u32>,
    #[argh(option, short = 'd')]
    /// milliseconds to wait between attempts
    pub delay: Option<u64>,
    #[argh(option, short = 't')]
    /// overall acquisition timeout in milliseconds, 0 disables it
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
    options: PollOptions,
    command: Vec<String>,
}

impl Command {
    pub fn new(options: &Options, defaults: &LockDefaultsConfig, coordinator: Coordinator) -> Self {
        let mut poll_options = defaults.poll_options();
        if let Some(max_tries) = options.max_tries {
            poll_options.max_tries = max_tries;
        }
        if let Some(delay) = options.delay {
            poll_options.delay = Duration::from_millis(delay);
        }
        if let Some(timeout) = options.timeout {
            poll_options.timeout = (timeout > 0).then(|| Duration::from_millis(timeout));
        }
        poll_options.ttl = options.ttl.map(Duration::from_secs);
        poll_options.description.clone_from(&options.description);

        Command {
            coordinator,
            lock_name: options.lock_name.clone(),
            options: poll_options,
            command: options.command.clone(),
        }
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        if self.command.is_empty() {
            let handle = self
                .coordinator
                .lock(&self.lock_name, self.options.clone())
                .await?;
            return child::hold_until_interrupted(handle).await;
        }

        let status = self
            .coordinator
            .lock_with(&self.lock_name, self.options.clone(), || {
                child::run(&self.command)
            })
            .await?;
        info!("Command finished with {status}");
        child::check(status)
    }
}
