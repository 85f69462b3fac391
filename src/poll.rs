use crate::error::HarnessError;
use std::fmt::Display;
use std::future::Future;
use std::time::Duration;
use tokio::time::{interval, sleep_until, timeout_at, Instant, MissedTickBehavior};
use tracing::{debug, trace};

/// Bounds for one polling verifier run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    pub timeout: Duration,
    pub interval: Duration,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(5),
            interval: Duration::from_millis(100),
        }
    }
}

impl PollSettings {
    pub async fn poll<T, E, F, Fut, P>(&self, operation: F, predicate: P) -> PollOutcome<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        P: Fn(&T) -> bool,
    {
        poll_until(operation, predicate, self.timeout, self.interval).await
    }
}

/// Terminal result of a polling verifier run
#[derive(Debug, Clone, PartialEq)]
pub enum PollOutcome<T> {
    Ready {
        value: T,
        attempts: u32,
        elapsed: Duration,
    },
    DeadlineExceeded {
        attempts: u32,
        elapsed: Duration,
        timeout: Duration,
    },
}

impl<T> PollOutcome<T> {
    pub fn is_ready(&self) -> bool {
        matches!(self, Self::Ready { .. })
    }

    pub fn attempts(&self) -> u32 {
        match self {
            Self::Ready { attempts, .. } | Self::DeadlineExceeded { attempts, .. } => *attempts,
        }
    }

    pub fn elapsed(&self) -> Duration {
        match self {
            Self::Ready { elapsed, .. } | Self::DeadlineExceeded { elapsed, .. } => *elapsed,
        }
    }

    /// Convert into a result attributed to the named check
    pub fn into_result(self, check: &str) -> Result<T, HarnessError> {
        match self {
            Self::Ready { value, .. } => Ok(value),
            Self::DeadlineExceeded {
                attempts,
                elapsed,
                timeout,
            } => Err(HarnessError::DeadlineExceeded {
                check: check.to_string(),
                elapsed,
                timeout,
                attempts,
            }),
        }
    }
}

/// Roughly thirty years out; stands in for deadlines past what `Instant` can hold
const FAR_FUTURE: Duration = Duration::from_secs(86400 * 365 * 30);

/// `start + timeout`, saturating to a far-future instant instead of overflowing
pub fn deadline_after(start: Instant, timeout: Duration) -> Instant {
    start
        .checked_add(timeout)
        .unwrap_or_else(|| start + FAR_FUTURE)
}

/// Call `operation` every `interval` until it succeeds with a value that
/// satisfies `predicate`, or `timeout` elapses.
///
/// Failed calls and rejected values are both treated as "not ready yet".
/// The first attempt is made immediately, so even a zero timeout gets one
/// try, run to completion. Later attempts are cut off at the deadline, so the
/// verifier never returns after `timeout + interval`. Attempts never overlap:
/// a slow call delays the next tick instead of queueing a burst. When the
/// deadline and a tick are both due, the deadline wins.
pub async fn poll_until<T, E, F, Fut, P>(
    mut operation: F,
    predicate: P,
    timeout: Duration,
    interval_period: Duration,
) -> PollOutcome<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
    E: Display,
    P: Fn(&T) -> bool,
{
    let start = Instant::now();
    let deadline = deadline_after(start, timeout);

    // tokio intervals reject a zero period
    let mut ticker = interval(interval_period.max(Duration::from_millis(1)));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    // First tick completes immediately
    ticker.tick().await;

    let mut attempts: u32 = 0;
    loop {
        attempts += 1;
        let result = if timeout.is_zero() {
            Some(operation().await)
        } else {
            timeout_at(deadline, operation()).await.ok()
        };
        match result {
            Some(Ok(value)) if predicate(&value) => {
                let elapsed = start.elapsed();
                debug!("Ready after {} attempt(s) in {:?}", attempts, elapsed);
                return PollOutcome::Ready {
                    value,
                    attempts,
                    elapsed,
                };
            }
            Some(Ok(_)) => trace!("Attempt {} returned a value that is not ready", attempts),
            Some(Err(e)) => trace!("Attempt {} failed: {}", attempts, e),
            None => trace!("Attempt {} cut off at the deadline", attempts),
        }

        if Instant::now() >= deadline {
            break;
        }

        tokio::select! {
            biased;
            _ = sleep_until(deadline) => break,
            _ = ticker.tick() => {}
        }
    }

    let elapsed = start.elapsed();
    debug!(
        "Deadline of {:?} exceeded after {} attempt(s)",
        timeout, attempts
    );
    PollOutcome::DeadlineExceeded {
        attempts,
        elapsed,
        timeout,
    }
}
