//! Convergence poller: retry a check on a fixed interval until it yields.
//!
//! Every "wait until the directory/commit manager/ledger catches up" loop in
//! the engine goes through [`await_condition`].

use std::{future::Future, time::Duration};

use thiserror::Error;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

/// Polls are never issued more often than this.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(500);
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(2500);

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum PollError {
    #[error("condition not met within {0:?}")]
    Timeout(Duration),

    #[error("poll cancelled")]
    Cancelled,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PollConfig {
    interval: Duration,
    timeout: Option<Duration>,
}

impl PollConfig {
    /// `interval` is raised to [`MIN_POLL_INTERVAL`] if smaller.
    pub fn new(interval: Duration, timeout: Option<Duration>) -> Self {
        Self {
            interval: interval.max(MIN_POLL_INTERVAL),
            timeout,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    pub fn timeout(&self) -> Option<Duration> {
        self.timeout
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(DEFAULT_POLL_INTERVAL, None)
    }
}

/// Call `check` immediately and then once per interval until it returns
/// `Some`. Fails with [`PollError::Timeout`] once the configured budget is
/// spent, or [`PollError::Cancelled`] when `cancel` fires first.
pub async fn await_condition<T, F, Fut>(
    mut check: F,
    config: PollConfig,
    cancel: Option<&CancellationToken>,
) -> Result<T, PollError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Option<T>>,
{
    let polling = async {
        let mut ticker = interval(config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut attempts = 0u64;
        loop {
            ticker.tick().await;
            attempts += 1;
            if let Some(value) = check().await {
                debug!(attempts, "condition met");
                return value;
            }
        }
    };

    let bounded = async {
        match config.timeout {
            Some(budget) => timeout(budget, polling)
                .await
                .map_err(|_| PollError::Timeout(budget)),
            None => Ok(polling.await),
        }
    };

    match cancel {
        Some(token) => tokio::select! {
            _ = token.cancelled() => Err(PollError::Cancelled),
            result = bounded => result,
        },
        None => bounded.await,
    }
}

#[cfg(test)]
mod tests {
    use std::sync::{
        atomic::{AtomicU32, Ordering},
        Arc,
    };

    use tokio::time::Instant;

    use super::*;

    #[test]
    fn interval_is_clamped() {
        let config = PollConfig::new(Duration::from_millis(10), None);
        assert_eq!(config.interval(), MIN_POLL_INTERVAL);
        assert_eq!(PollConfig::default().interval(), DEFAULT_POLL_INTERVAL);
    }

    #[tokio::test(start_paused = true)]
    async fn never_ready_times_out_within_budget() {
        let start = Instant::now();
        let config = PollConfig::new(Duration::from_millis(500), Some(Duration::from_millis(2000)));
        let result: Result<(), _> = await_condition(|| async { None }, config, None).await;
        let elapsed = start.elapsed();

        assert_eq!(result, Err(PollError::Timeout(Duration::from_millis(2000))));
        assert!(elapsed >= Duration::from_millis(2000), "{:?}", elapsed);
        assert!(elapsed <= Duration::from_millis(2500), "{:?}", elapsed);
    }

    #[tokio::test(start_paused = true)]
    async fn returns_first_ready_value() {
        let calls = Arc::new(AtomicU32::new(0));
        let counter = calls.clone();
        let start = Instant::now();
        let value = await_condition(
            move || {
                let n = counter.fetch_add(1, Ordering::SeqCst) + 1;
                async move { (n == 3).then_some(n * 10) }
            },
            PollConfig::new(Duration::from_millis(500), None),
            None,
        )
        .await
        .unwrap();

        assert_eq!(value, 30);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
        // first check is immediate, then two intervals
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_millis(1000) && elapsed < Duration::from_millis(1500));
    }

    #[tokio::test(start_paused = true)]
    async fn cancellation_stops_polling() {
        let token = CancellationToken::new();
        let trigger = token.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(1200)).await;
            trigger.cancel();
        });

        let result: Result<(), _> =
            await_condition(|| async { None }, PollConfig::default(), Some(&token)).await;
        assert_eq!(result, Err(PollError::Cancelled));
    }
}
