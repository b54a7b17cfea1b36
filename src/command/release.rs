use argh::FromArgs;
use store_mutex::Coordinator;
use tracing::warn;

use crate::command;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "release",
    description = "Remove a lock regardless of its holder"
)]
pub struct Options {
    #[argh(positional)]
    /// the name of the lock
    pub lock_name: String,
}

pub struct Command {
    coordinator: Coordinator,
    lock_name: String,
}

impl Command {
    pub fn new(options: &Options, coordinator: Coordinator) -> Self {
        Command {
            coordinator,
            lock_name: options.lock_name.clone(),
        }
    }

    pub async fn run(&self) -> Result<(), command::Error> {
        let removed = self.coordinator.release(&self.lock_name).await?;
        if removed > 0 {
            warn!("Forcibly released lock {}", self.lock_name);
        }
        println!("{removed}");
        Ok(())
    }
}
