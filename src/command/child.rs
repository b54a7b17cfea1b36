use std::io;
use std::process::ExitStatus;

use store_mutex::LockHandle;
use tracing::{debug, info};

use crate::command;

/// Spawn `command` and wait for it to exit.
pub async fn run(command: &[String]) -> Result<ExitStatus, io::Error> {
    let Some((program, args)) = command.split_first() else {
        return Err(io::Error::new(io::ErrorKind::InvalidInput, "empty command"));
    };

    debug!("Running {program} with {} argument(s)", args.len());
    let mut child = tokio::process::Command::new(program).args(args).spawn()?;
    child.wait().await
}

pub fn check(status: ExitStatus) -> Result<(), command::Error> {
    if status.success() {
        Ok(())
    } else {
        Err(command::Error::ChildExit(status.code()))
    }
}

/// Keep the lock until the process is interrupted, then release it.
pub async fn hold_until_interrupted(handle: LockHandle) -> Result<(), command::Error> {
    println!("locked {}", handle.lock_name());
    info!("Holding lock until interrupted");

    tokio::signal::ctrl_c().await?;

    let removed = handle.release().await?;
    println!("released ({removed} record(s) removed)");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_empty_command() {
        let err = run(&[]).await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::InvalidInput);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exit_status() {
        let status = run(&["true".to_string()]).await.unwrap();
        assert!(check(status).is_ok());

        let status = run(&["sh".to_string(), "-c".to_string(), "exit 3".to_string()])
            .await
            .unwrap();
        assert!(matches!(check(status), Err(command::Error::ChildExit(Some(3)))));
    }
}
