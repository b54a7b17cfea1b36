use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error, warn};

use crate::error::Error;
use crate::store::{self, CreateOutcome, DeletionSubscription};
use crate::strategy::AcquireRequest;
use crate::timer;

enum Wait {
    Released,
    TimedOut,
}

/// Acquire by waiting for deletion events instead of polling.
///
/// Each failed attempt opens a subscription for the lock record, waits for it
/// to be deleted (or for the timeout), closes the subscription and tries again.
/// There is no attempt limit; without a timeout the waiter waits indefinitely.
///
/// With a timeout the rounds run as their own task and race the timer, so a
/// slow store call cannot hold the caller past the deadline. A record created
/// after the caller gave up is deleted again.
pub async fn acquire(request: &AcquireRequest, timeout: Option<Duration>) -> Result<(), Error> {
    if request.store.notifier().is_none() {
        return Err(Error::NotificationUnsupported);
    }

    let start = request.timer.now();
    let Some(timeout) = timeout else {
        return watch(request, None, start).await;
    };

    let task_request = request.clone();
    let (sender, receiver) = oneshot::channel();
    tokio::spawn(async move {
        let result = watch(&task_request, Some(start + timeout), start).await;
        if let Err(Ok(())) = sender.send(result) {
            task_request.abandon().await;
        }
    });

    match timer::race(request.timer.as_ref(), timeout, receiver).await {
        Some(Ok(result)) => result,
        Some(Err(_)) => {
            error!("Watch task for {} ended without a result", request.lock_name());
            Err(Error::Store(store::Error::Backend(
                "watch task ended without a result".to_string(),
            )))
        }
        None => {
            let elapsed = request.timer.now() - start;
            debug!("Timed out waiting for {} after {elapsed:?}", request.lock_name());
            Err(request.timeout_error(elapsed))
        }
    }
}

async fn watch(
    request: &AcquireRequest,
    deadline: Option<Instant>,
    start: Instant,
) -> Result<(), Error> {
    let notifier = request
        .store
        .notifier()
        .ok_or(Error::NotificationUnsupported)?;

    loop {
        if request.try_create().await? == CreateOutcome::Created {
            debug!("Acquired {} after {:?}", request.lock_name(), request.timer.now() - start);
            return Ok(());
        }

        let remaining = match deadline {
            Some(deadline) => {
                let now = request.timer.now();
                if now >= deadline {
                    return Err(request.timeout_error(now - start));
                }
                Some(deadline - now)
            }
            None => None,
        };

        debug!("Lock {} is taken, waiting for its release", request.lock_name());
        let mut subscription = notifier
            .subscribe_deletions(&request.collection, request.lock_name())
            .await?;

        let waited = wait_for_release(request, subscription.as_mut(), remaining).await;
        let closed = subscription.close().await;

        match waited {
            Ok(Wait::Released) => closed?,
            Ok(Wait::TimedOut) => {
                if let Err(err) = closed {
                    warn!("Unable to close deletion subscription: {err}");
                }
                return Err(request.timeout_error(request.timer.now() - start));
            }
            Err(err) => {
                if let Err(close_err) = closed {
                    warn!("Unable to close deletion subscription: {close_err}");
                }
                return Err(err);
            }
        }
    }
}

async fn wait_for_release(
    request: &AcquireRequest,
    subscription: &mut dyn DeletionSubscription,
    remaining: Option<Duration>,
) -> Result<Wait, Error> {
    // The holder may have released between the failed attempt and the subscription.
    if !request.exists().await? {
        return Ok(Wait::Released);
    }

    match remaining {
        Some(remaining) => {
            match timer::race(request.timer.as_ref(), remaining, subscription.next()).await {
                Some(result) => {
                    result?;
                    Ok(Wait::Released)
                }
                None => Ok(Wait::TimedOut),
            }
        }
        None => {
            subscription.next().await?;
            Ok(Wait::Released)
        }
    }
}
