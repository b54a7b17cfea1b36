use std::fmt::Debug;
use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// Delay and clock primitives handed to the acquisition strategies.
#[async_trait]
pub trait Timer: Debug + Send + Sync {
    fn now(&self) -> Instant;

    async fn delay(&self, duration: Duration);
}

#[derive(Clone, Copy, Debug, Default)]
pub struct TokioTimer;

#[async_trait]
impl Timer for TokioTimer {
    fn now(&self) -> Instant {
        Instant::now()
    }

    async fn delay(&self, duration: Duration) {
        tokio::time::sleep(duration).await;
    }
}

/// Race `future` against `limit`. Returns `None` if the limit elapsed first.
///
/// Losing the race drops `future`; callers that must not cancel work in flight
/// race a handle to a spawned task instead.
pub async fn race<F>(timer: &dyn Timer, limit: Duration, future: F) -> Option<F::Output>
where
    F: Future,
{
    tokio::select! {
        biased;
        output = future => Some(output),
        () = timer.delay(limit) => None,
    }
}
