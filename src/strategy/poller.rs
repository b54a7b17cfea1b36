use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::oneshot;
use tokio::time::Instant;
use tracing::{debug, error};

use crate::error::Error;
use crate::store::{self, CreateOutcome};
use crate::strategy::AcquireRequest;
use crate::timer;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PollSettings {
    pub max_tries: u32,
    pub delay: Duration,
    pub timeout: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        PollSettings {
            max_tries: 1,
            delay: Duration::from_millis(200),
            timeout: None,
        }
    }
}

/// Acquire by bounded retry: one immediate attempt, then up to `max_tries - 1`
/// more, each after `delay`.
///
/// With a timeout the attempt sequence runs as its own task and races the
/// timer. When the timer wins, the stop flag halts further attempts but an
/// attempt already in flight is left to finish. If that attempt creates the
/// record, the task deletes it again.
pub async fn acquire(request: AcquireRequest, settings: PollSettings) -> Result<(), Error> {
    let start = request.timer.now();
    let max_tries = settings.max_tries.max(1);

    let Some(timeout) = settings.timeout else {
        let stop = AtomicBool::new(false);
        return attempt_sequence(&request, max_tries, settings.delay, &stop, start).await;
    };

    let request = Arc::new(request);
    let stop = Arc::new(AtomicBool::new(false));
    let (sender, receiver) = oneshot::channel();

    let task_request = request.clone();
    let task_stop = stop.clone();
    tokio::spawn(async move {
        let result =
            attempt_sequence(&task_request, max_tries, settings.delay, &task_stop, start).await;
        if let Err(Ok(())) = sender.send(result) {
            task_request.abandon().await;
        }
    });

    match timer::race(request.timer.as_ref(), timeout, receiver).await {
        Some(Ok(result)) => result,
        Some(Err(_)) => {
            error!("Acquisition task for {} ended without a result", request.lock_name());
            Err(Error::Store(store::Error::Backend(
                "acquisition task ended without a result".to_string(),
            )))
        }
        None => {
            stop.store(true, Ordering::Relaxed);
            let elapsed = request.timer.now() - start;
            debug!("Timed out acquiring {} after {elapsed:?}", request.lock_name());
            Err(request.timeout_error(elapsed))
        }
    }
}

async fn attempt_sequence(
    request: &AcquireRequest,
    max_tries: u32,
    delay: Duration,
    stop: &AtomicBool,
    start: Instant,
) -> Result<(), Error> {
    for attempt in 0..max_tries {
        if attempt > 0 {
            request.timer.delay(delay).await;
            if stop.load(Ordering::Relaxed) {
                debug!("Stopped acquiring {} before attempt {attempt}", request.lock_name());
                return Err(request.timeout_error(request.timer.now() - start));
            }
        }

        match request.try_create().await? {
            CreateOutcome::Created => {
                debug!("Acquired {} on attempt {attempt}", request.lock_name());
                return Ok(());
            }
            CreateOutcome::AlreadyExists => {
                debug!(
                    "Lock {} is taken ({}/{max_tries} attempts)",
                    request.lock_name(),
                    attempt + 1
                );
            }
        }
    }

    Err(Error::LockTaken {
        lock_name: request.lock_name().to_string(),
        elapsed: request.timer.now() - start,
    })
}
