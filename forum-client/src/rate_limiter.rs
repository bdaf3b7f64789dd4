use pulse_core::RateLimitConfig;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use tokio::sync::Mutex;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, warn};

#[derive(Debug, Clone)]
pub struct GovernorConfig {
    pub max_calls: u32,
    pub window: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
}

impl GovernorConfig {
    pub fn per_minute(max_calls: u32) -> Self {
        Self {
            max_calls,
            window: Duration::from_secs(60),
            initial_backoff: Duration::from_secs(1),
            max_backoff: Duration::from_secs(60),
        }
    }
}

impl From<&RateLimitConfig> for GovernorConfig {
    fn from(config: &RateLimitConfig) -> Self {
        Self {
            max_calls: config.max_calls_per_minute,
            window: Duration::from_secs(60),
            initial_backoff: config.initial_backoff(),
            max_backoff: config.max_backoff(),
        }
    }
}

impl Default for GovernorConfig {
    fn default() -> Self {
        // Reddit allows 60 requests per minute for script applications
        Self::per_minute(60)
    }
}

#[derive(Debug)]
struct GovernorState {
    calls: VecDeque<Instant>,
    backoff: Duration,
}

impl GovernorState {
    fn prune(&mut self, now: Instant, window: Duration) {
        while let Some(oldest) = self.calls.front() {
            if now.duration_since(*oldest) >= window {
                self.calls.pop_front();
            } else {
                break;
            }
        }
    }
}

/// Sliding-window limiter on outbound fetch calls, plus the exponential
/// backoff used after a rate-limited or transient response.
///
/// Shared by every collection branch of a run; the call window sits behind a
/// single mutex so parallel branches never exceed `max_calls` per window.
#[derive(Debug)]
pub struct RateGovernor {
    config: GovernorConfig,
    state: Mutex<GovernorState>,
}

impl RateGovernor {
    pub fn new(config: GovernorConfig) -> Self {
        let state = GovernorState {
            calls: VecDeque::with_capacity(config.max_calls as usize),
            backoff: config.initial_backoff,
        };

        Self {
            config,
            state: Mutex::new(state),
        }
    }

    pub fn per_minute(max_calls: u32) -> Self {
        Self::new(GovernorConfig::per_minute(max_calls))
    }

    /// Waits until a call slot is free in the trailing window, then claims it.
    ///
    /// Returns the time spent waiting.
    pub async fn acquire(&self) -> Duration {
        let start_time = Instant::now();

        loop {
            let wait_time = {
                let mut state = self.state.lock().await;
                let now = Instant::now();
                state.prune(now, self.config.window);

                if state.calls.len() < self.config.max_calls as usize {
                    state.calls.push_back(now);
                    break;
                }

                match state.calls.front() {
                    Some(oldest) => (*oldest + self.config.window).saturating_duration_since(now),
                    None => Duration::ZERO,
                }
            };

            debug!("Call window full, waiting {:?}", wait_time);
            sleep(wait_time).await;
        }

        start_time.elapsed()
    }

    /// Next delay of the backoff sequence (1s, 2s, 4s ... capped), advancing it.
    pub async fn next_backoff(&self) -> Duration {
        let mut state = self.state.lock().await;
        let delay = state.backoff;
        state.backoff = (delay * 2).min(self.config.max_backoff);
        delay
    }

    /// Sleeps for a backoff delay obtained from [`RateGovernor::next_backoff`].
    pub async fn pause(&self, delay: Duration) {
        warn!("Backing off for {:?}", delay);
        sleep(delay).await;
    }

    /// Resets the backoff sequence after a successful call.
    pub async fn record_success(&self) {
        let mut state = self.state.lock().await;
        if state.backoff != self.config.initial_backoff {
            debug!("Call succeeded, resetting backoff");
        }
        state.backoff = self.config.initial_backoff;
    }

    pub async fn status(&self) -> GovernorStatus {
        let mut state = self.state.lock().await;
        state.prune(Instant::now(), self.config.window);

        let calls_in_window = state.calls.len() as u32;
        GovernorStatus {
            max_calls: self.config.max_calls,
            calls_in_window,
            remaining: self.config.max_calls.saturating_sub(calls_in_window),
            current_backoff: state.backoff,
        }
    }
}

impl Default for RateGovernor {
    fn default() -> Self {
        Self::new(GovernorConfig::default())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GovernorStatus {
    pub max_calls: u32,
    pub calls_in_window: u32,
    pub remaining: u32,
    pub current_backoff: Duration,
}

impl GovernorStatus {
    pub fn utilization_percentage(&self) -> f64 {
        if self.max_calls == 0 {
            return 100.0;
        }
        (self.calls_in_window as f64 / self.max_calls as f64) * 100.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn test_acquire_under_capacity_is_immediate() {
        let governor = RateGovernor::per_minute(5);

        for _ in 0..5 {
            let waited = governor.acquire().await;
            assert_eq!(waited, Duration::ZERO);
        }

        let status = governor.status().await;
        assert_eq!(status.calls_in_window, 5);
        assert_eq!(status.remaining, 0);
        assert_eq!(status.utilization_percentage(), 100.0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_acquire_waits_for_window_to_slide() {
        let governor = RateGovernor::per_minute(2);

        governor.acquire().await;
        tokio::time::advance(Duration::from_secs(10)).await;
        governor.acquire().await;

        // Third call must wait until the first one leaves the 60s window.
        let start = Instant::now();
        governor.acquire().await;
        assert_eq!(start.elapsed(), Duration::from_secs(50));
    }

    #[tokio::test(start_paused = true)]
    async fn test_never_more_than_max_calls_in_window() {
        let governor = RateGovernor::per_minute(3);
        let start = Instant::now();
        let mut stamps = Vec::new();

        for _ in 0..9 {
            governor.acquire().await;
            stamps.push(start.elapsed());
        }

        for (i, stamp) in stamps.iter().enumerate() {
            let in_window = stamps[i..]
                .iter()
                .filter(|s| **s < *stamp + Duration::from_secs(60))
                .count();
            assert!(in_window <= 3, "{} calls within 60s of {:?}", in_window, stamp);
        }
    }

    #[tokio::test]
    async fn test_backoff_sequence_caps_and_resets() {
        let governor = RateGovernor::default();
        let mut delays = Vec::new();
        for _ in 0..8 {
            delays.push(governor.next_backoff().await.as_secs());
        }
        assert_eq!(delays, vec![1, 2, 4, 8, 16, 32, 60, 60]);

        governor.record_success().await;
        assert_eq!(governor.next_backoff().await, Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_pause_sleeps_for_delay() {
        let governor = RateGovernor::default();
        let start = Instant::now();
        governor.pause(Duration::from_secs(4)).await;
        assert_eq!(start.elapsed(), Duration::from_secs(4));
    }

    #[tokio::test]
    async fn test_config_from_rate_limit_settings() {
        let settings = RateLimitConfig {
            max_calls_per_minute: 30,
            initial_backoff_ms: 250,
            max_backoff_secs: 1,
        };
        let governor = RateGovernor::new(GovernorConfig::from(&settings));

        let delays: Vec<u128> = vec![
            governor.next_backoff().await.as_millis(),
            governor.next_backoff().await.as_millis(),
            governor.next_backoff().await.as_millis(),
            governor.next_backoff().await.as_millis(),
        ];
        assert_eq!(delays, vec![250, 500, 1000, 1000]);
        assert_eq!(governor.status().await.max_calls, 30);
    }
}
