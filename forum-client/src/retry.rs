use crate::metrics::FetchMetrics;
use crate::rate_limiter::RateGovernor;
use pulse_core::{CollectionConfig, EntryKind, ErrorExt, FetchError};
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, info, warn};

/// Configuration for retry behavior
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Retries allowed after transient failures (timeouts, 5xx)
    pub max_transient_retries: u32,
    /// Bound on a single external call
    pub call_timeout: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_transient_retries: 3,
            call_timeout: Duration::from_secs(30),
        }
    }
}

impl From<&CollectionConfig> for RetryPolicy {
    fn from(config: &CollectionConfig) -> Self {
        Self {
            max_transient_retries: config.max_transient_retries,
            call_timeout: config.fetch_timeout(),
        }
    }
}

/// Terminal failure of a fetch after the retry policy ran its course.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchFailure {
    /// Private, banned or missing; never retried.
    NotAccessible,
    /// Credentials rejected; aborts the run.
    Unauthorized { reason: String },
    /// Retries used up.
    Exhausted { attempts: u32, last_error: FetchError },
}

/// States of one fetch: Idle → Calling → Succeeded | Waiting → Calling ... | Fatal.
#[derive(Debug, Clone, PartialEq)]
pub enum FetchState {
    Idle,
    Waiting { delay: Duration, next_attempt: u32 },
    Calling { attempt: u32 },
    Succeeded { attempts: u32 },
    Fatal(FetchFailure),
}

impl FetchState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Succeeded { .. } | FetchState::Fatal(_))
    }
}

/// Pure transition logic for a single fetch; time and I/O are driven by
/// [`RetryExecutor`].
#[derive(Debug)]
pub struct RetryMachine {
    policy: RetryPolicy,
    state: FetchState,
    transient_failures: u32,
}

impl RetryMachine {
    pub fn new(policy: RetryPolicy) -> Self {
        Self {
            policy,
            state: FetchState::Idle,
            transient_failures: 0,
        }
    }

    pub fn state(&self) -> &FetchState {
        &self.state
    }

    pub fn start(&mut self) {
        if self.state == FetchState::Idle {
            self.state = FetchState::Calling { attempt: 1 };
        }
    }

    /// Whether `error` would lead to another call rather than a terminal state.
    ///
    /// Rate limiting is always waited out and never ends a fetch.
    pub fn will_retry(&self, error: &FetchError) -> bool {
        match error {
            FetchError::RateLimited { .. } => true,
            FetchError::Transient { .. }
            | FetchError::Timeout { .. }
            | FetchError::InvalidResponse { .. } => {
                self.transient_failures < self.policy.max_transient_retries
            }
            FetchError::NotAccessible { .. } | FetchError::Unauthorized { .. } => false,
        }
    }

    pub fn on_success(&mut self) {
        if let FetchState::Calling { attempt } = self.state {
            self.state = FetchState::Succeeded { attempts: attempt };
        }
    }

    /// Records a failed call. `delay` is the backoff to wait if the call is retried.
    pub fn on_failure(&mut self, error: FetchError, delay: Duration) {
        let attempt = match self.state {
            FetchState::Calling { attempt } => attempt,
            _ => return,
        };

        let retry = self.will_retry(&error);
        self.state = match error {
            FetchError::NotAccessible { .. } => FetchState::Fatal(FetchFailure::NotAccessible),
            FetchError::Unauthorized { reason } => {
                FetchState::Fatal(FetchFailure::Unauthorized { reason })
            }
            error if retry => {
                if !matches!(error, FetchError::RateLimited { .. }) {
                    self.transient_failures += 1;
                }
                FetchState::Waiting {
                    delay,
                    next_attempt: attempt + 1,
                }
            }
            error => FetchState::Fatal(FetchFailure::Exhausted {
                attempts: attempt,
                last_error: error,
            }),
        };
    }

    pub fn on_wait_elapsed(&mut self) {
        if let FetchState::Waiting { next_attempt, .. } = self.state {
            self.state = FetchState::Calling {
                attempt: next_attempt,
            };
        }
    }
}

/// Drives [`RetryMachine`] against the shared rate governor.
#[derive(Debug, Clone)]
pub struct RetryExecutor {
    policy: RetryPolicy,
    governor: Arc<RateGovernor>,
    metrics: Arc<FetchMetrics>,
}

impl RetryExecutor {
    pub fn new(policy: RetryPolicy, governor: Arc<RateGovernor>, metrics: Arc<FetchMetrics>) -> Self {
        Self {
            policy,
            governor,
            metrics,
        }
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `operation` until it succeeds or reaches a terminal failure.
    ///
    /// Every call goes through [`RateGovernor::acquire`] and is bounded by the
    /// policy's call timeout; a timeout counts as a transient failure.
    pub async fn execute<F, Fut, T>(
        &self,
        resource: &str,
        kind: &EntryKind,
        operation: F,
    ) -> Result<T, FetchFailure>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, FetchError>>,
    {
        let mut machine = RetryMachine::new(self.policy.clone());
        let mut output = None;

        loop {
            match machine.state().clone() {
                FetchState::Idle => machine.start(),
                FetchState::Waiting { delay, next_attempt } => {
                    debug!(
                        "Waiting {:?} before attempt {} for {} {}",
                        delay, next_attempt, resource, kind
                    );
                    self.governor.pause(delay).await;
                    machine.on_wait_elapsed();
                }
                FetchState::Calling { attempt } => {
                    self.governor.acquire().await;
                    self.metrics.record_call(kind).await;

                    let result = match timeout(self.policy.call_timeout, operation()).await {
                        Ok(result) => result,
                        Err(_) => Err(FetchError::Timeout {
                            seconds: self.policy.call_timeout.as_secs(),
                        }),
                    };

                    match result {
                        Ok(value) => {
                            self.governor.record_success().await;
                            if attempt > 1 {
                                info!(
                                    "Fetch of {} {} succeeded after {} attempts",
                                    resource, kind, attempt
                                );
                            }
                            output = Some(value);
                            machine.on_success();
                        }
                        Err(error) => {
                            warn!(
                                "Attempt {} for {} {} failed: {}",
                                attempt, resource, kind, error
                            );
                            self.metrics.record_error(&error).await;
                            let delay = if machine.will_retry(&error) {
                                let backoff = self.governor.next_backoff().await;
                                error.retry_after().map_or(backoff, |hint| backoff.max(hint))
                            } else {
                                Duration::ZERO
                            };
                            machine.on_failure(error, delay);
                        }
                    }
                }
                FetchState::Succeeded { .. } => break,
                FetchState::Fatal(failure) => return Err(failure),
            }
        }

        output.ok_or(FetchFailure::Exhausted {
            attempts: 0,
            last_error: FetchError::InvalidResponse {
                details: "fetch finished without a result".to_string(),
            },
        })
    }
}
