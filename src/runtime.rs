// src/runtime.rs
//! Pacing, per-call deadlines and overlap guards shared by all jobs.
//!
//! Everything here waits on `tokio::time`, so tests can run with paused time
//! instead of sleeping through real pacing delays.

use std::future::Future;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::error::OracleError;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("cancelled")]
pub struct Cancelled;

impl From<Cancelled> for OracleError {
    fn from(_: Cancelled) -> Self {
        OracleError::Cancelled
    }
}

/// Enforces a minimum interval between successive calls to the same service.
/// The first call never waits.
#[derive(Debug)]
pub struct Pacer {
    min_interval: Duration,
    last: Option<Instant>,
}

impl Pacer {
    pub fn new(min_interval: Duration) -> Self {
        Self {
            min_interval,
            last: None,
        }
    }

    pub fn min_interval(&self) -> Duration {
        self.min_interval
    }

    /// Wait until the next call is allowed, or until `cancel` fires.
    pub async fn ready(&mut self, cancel: &CancellationToken) -> Result<(), Cancelled> {
        if cancel.is_cancelled() {
            return Err(Cancelled);
        }
        if let Some(last) = self.last {
            let at = last + self.min_interval;
            tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Cancelled),
                _ = tokio::time::sleep_until(at) => {}
            }
        }
        self.last = Some(Instant::now());
        Ok(())
    }
}

/// Run one external call under a deadline, aborting early on cancellation.
pub async fn bounded<T, F>(
    cancel: &CancellationToken,
    limit: Duration,
    fut: F,
) -> Result<T, OracleError>
where
    F: Future<Output = Result<T, OracleError>>,
{
    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(OracleError::Cancelled),
        res = tokio::time::timeout(limit, fut) => match res {
            Ok(inner) => inner,
            Err(_) => Err(OracleError::Timeout { secs: limit.as_secs() }),
        },
    }
}

/// Skip-if-already-running flag for one job.
#[derive(Debug, Clone, Default)]
pub struct JobGuard {
    running: Arc<AtomicBool>,
}

impl JobGuard {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns `None` while another run of the same job holds the guard.
    pub fn try_start(&self) -> Option<RunningJob> {
        self.running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| RunningJob {
                flag: self.running.clone(),
            })
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }
}

/// Held for the duration of one run; releases the guard on drop (also on panic).
#[derive(Debug)]
pub struct RunningJob {
    flag: Arc<AtomicBool>,
}

impl Drop for RunningJob {
    fn drop(&mut self) {
        self.flag.store(false, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn pacer_spaces_calls_without_delaying_the_first() {
        let cancel = CancellationToken::new();
        let mut pacer = Pacer::new(Duration::from_secs(30));

        let t0 = Instant::now();
        pacer.ready(&cancel).await.unwrap();
        assert_eq!(t0.elapsed(), Duration::ZERO);

        pacer.ready(&cancel).await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(30));

        pacer.ready(&cancel).await.unwrap();
        assert!(t0.elapsed() >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn pacer_wait_is_cancellable() {
        let cancel = CancellationToken::new();
        let mut pacer = Pacer::new(Duration::from_secs(3600));
        pacer.ready(&cancel).await.unwrap();

        let c2 = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(1)).await;
            c2.cancel();
        });
        assert_eq!(pacer.ready(&cancel).await, Err(Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn bounded_times_out_hung_calls() {
        let cancel = CancellationToken::new();
        let res: Result<(), OracleError> = bounded(&cancel, Duration::from_secs(5), async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        })
        .await;
        assert!(matches!(res, Err(OracleError::Timeout { secs: 5 })));
    }

    #[tokio::test]
    async fn bounded_respects_cancellation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let res: Result<u8, OracleError> =
            bounded(&cancel, Duration::from_secs(5), async { Ok(1) }).await;
        assert!(matches!(res, Err(OracleError::Cancelled)));
    }

    #[test]
    fn guard_rejects_overlapping_runs() {
        let guard = JobGuard::new();
        let first = guard.try_start().expect("first run starts");
        assert!(guard.try_start().is_none());
        assert!(guard.is_running());
        drop(first);
        assert!(guard.try_start().is_some());
    }
}
