//! Timeout wrapping for scheduled work
//!
//! [`with_timeout`] only abandons the wait; the underlying task keeps running.
//! [`with_timeout_cancelling`] also fires a cancellation token on expiry so
//! work that observes the token is actively torn down.

use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use super::SchedulerError;

/// Race `fut` against a timer of `duration`
pub async fn with_timeout<F, T>(fut: F, duration: Duration) -> Result<T, SchedulerError>
where
    F: Future<Output = Result<T, SchedulerError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(settled) => settled,
        Err(_) => Err(SchedulerError::Timeout { duration }),
    }
}

/// Like [`with_timeout`], cancelling `token` when the timer wins
pub async fn with_timeout_cancelling<F, T>(
    fut: F,
    duration: Duration,
    token: &CancellationToken,
) -> Result<T, SchedulerError>
where
    F: Future<Output = Result<T, SchedulerError>>,
{
    let result = with_timeout(fut, duration).await;
    if matches!(result, Err(SchedulerError::Timeout { .. })) {
        debug!(timeout_ms = duration.as_millis() as u64, "cancelling timed out work");
        token.cancel();
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::Scheduler;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Arc;

    #[tokio::test(start_paused = true)]
    async fn test_settles_before_deadline() {
        let scheduler = Scheduler::new(1);
        let handle = scheduler.enqueue(async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            Ok("done")
        });
        let result = with_timeout(handle, Duration::from_millis(100)).await;
        assert_eq!(result.unwrap(), "done");
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancelling_variant_tears_work_down() {
        let scheduler = Scheduler::new(1);
        let token = CancellationToken::new();
        let torn_down = Arc::new(AtomicBool::new(false));

        let handle = {
            let token = token.clone();
            let torn_down = torn_down.clone();
            scheduler.enqueue(async move {
                tokio::select! {
                    _ = tokio::time::sleep(Duration::from_millis(500)) => {}
                    _ = token.cancelled() => torn_down.store(true, Ordering::SeqCst),
                }
                Ok(())
            })
        };

        let result = with_timeout_cancelling(handle, Duration::from_millis(100), &token).await;
        assert!(matches!(result, Err(SchedulerError::Timeout { .. })));

        scheduler.drained().await;
        assert!(torn_down.load(Ordering::SeqCst));
    }

    #[tokio::test(start_paused = true)]
    async fn test_timer_inside_task_ignores_queue_wait() {
        let scheduler = Scheduler::serial();
        let first = scheduler.enqueue(async {
            tokio::time::sleep(Duration::from_millis(300)).await;
            Ok(())
        });

        let token = CancellationToken::new();
        let timed = |ms: u64| {
            let token = token.clone();
            scheduler.enqueue(async move {
                let work = async {
                    tokio::time::sleep(Duration::from_millis(ms)).await;
                    Ok(())
                };
                with_timeout_cancelling(work, Duration::from_millis(200), &token).await?;
                Ok::<_, anyhow::Error>(())
            })
        };
        let quick = timed(100);
        let slow = timed(400);

        first.await.unwrap();
        quick.await.unwrap();
        assert!(matches!(
            slow.await,
            Err(SchedulerError::Timeout { duration }) if duration == Duration::from_millis(200)
        ));
        assert!(token.is_cancelled());
    }
}
