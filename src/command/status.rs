use argh::FromArgs;
use store_mutex::Coordinator;

use crate::command;

#[derive(FromArgs, PartialEq, Debug)]
#[argh(
    subcommand,
    name = "status",
    description = "Print whether a lock is currently held"
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
        if self.coordinator.is_locked(&self.lock_name).await? {
            println!("locked");
        } else {
            println!("unlocked");
        }
        Ok(())
    }
}
