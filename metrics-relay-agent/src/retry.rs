//! Exponential backoff for batch delivery.
use std::time::Duration;

use metrics_relay::Batch;
use tracing::{debug, error, warn};

use crate::transport::{Transport, TransportError};

const DEFAULT_INITIAL_INTERVAL: Duration = Duration::from_secs(1);
const DEFAULT_MULTIPLIER: f64 = 2.0;
const DEFAULT_MAX_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Backoff parameters for delivering a single batch.
#[derive(Clone, Debug, PartialEq)]
pub struct RetryPolicy {
    /// Delay before the first retry.
    pub initial_interval: Duration,

    /// Growth factor applied to the delay after every retry. Must be at least `1.0`.
    pub multiplier: f64,

    /// Upper bound for any single delay.
    pub max_interval: Duration,

    /// Total number of attempts, including the first one. Must be at least `1`.
    pub max_attempts: u32,
}

impl RetryPolicy {
    /// Returns the delay to wait after the given failed attempt (1-based).
    ///
    /// The delay grows geometrically from `initial_interval` and never exceeds `max_interval`.
    pub fn delay_after(&self, attempt: u32) -> Duration {
        let exponent = i32::try_from(attempt.saturating_sub(1)).unwrap_or(i32::MAX);
        let secs = self.initial_interval.as_secs_f64() * self.multiplier.powi(exponent);
        Duration::try_from_secs_f64(secs).unwrap_or(self.max_interval).min(self.max_interval)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            initial_interval: DEFAULT_INITIAL_INTERVAL,
            multiplier: DEFAULT_MULTIPLIER,
            max_interval: DEFAULT_MAX_INTERVAL,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

/// How a single attempt ended.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum AttemptOutcome {
    /// The batch was accepted.
    Success,

    /// The attempt failed in a way that may succeed later.
    Retryable,

    /// The attempt failed in a way that will never succeed.
    Permanent,
}

impl From<&TransportError> for AttemptOutcome {
    fn from(error: &TransportError) -> Self {
        if error.is_retryable() {
            AttemptOutcome::Retryable
        } else {
            AttemptOutcome::Permanent
        }
    }
}

/// State of a [`Retry`].
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum RetryState {
    /// No attempt has been made yet.
    Idle,

    /// The given attempt (1-based) is in progress.
    Attempting {
        /// Attempt number.
        attempt: u32,
    },

    /// The last attempt failed and the next one may start after `delay`.
    Retrying {
        /// Number of attempts made so far.
        attempts: u32,

        /// Time to wait before the next attempt.
        delay: Duration,
    },

    /// The batch was delivered.
    Success {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The batch was rejected and will not be retried.
    PermanentFailure {
        /// Number of attempts made.
        attempts: u32,
    },

    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,
    },
}

impl RetryState {
    /// Returns `true` if no further attempts will be made.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryState::Success { .. }
                | RetryState::PermanentFailure { .. }
                | RetryState::Exhausted { .. }
        )
    }
}

/// Retry state machine for one batch.
///
/// Transitions are `Idle → Attempting → {Success | Retrying → Attempting | PermanentFailure}`,
/// and `Attempting → Exhausted` once the attempt budget of the policy is spent.
#[derive(Debug)]
pub struct Retry {
    policy: RetryPolicy,
    state: RetryState,
}

impl Retry {
    /// Creates a new `Retry` in the `Idle` state.
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy, state: RetryState::Idle }
    }

    /// Returns the current state.
    pub fn state(&self) -> RetryState {
        self.state
    }

    /// Starts the next attempt from `Idle` or `Retrying`, returning its number.
    ///
    /// In any other state nothing changes and the number of the latest attempt is returned.
    pub fn begin_attempt(&mut self) -> u32 {
        let attempt = match self.state {
            RetryState::Idle => 1,
            RetryState::Retrying { attempts, .. } => attempts + 1,
            RetryState::Attempting { attempt } => return attempt,
            RetryState::Success { attempts }
            | RetryState::PermanentFailure { attempts }
            | RetryState::Exhausted { attempts } => return attempts,
        };
        self.state = RetryState::Attempting { attempt };
        attempt
    }

    /// Records the outcome of the running attempt and returns the new state.
    ///
    /// Outside of `Attempting`, the state is left untouched.
    pub fn record(&mut self, outcome: AttemptOutcome) -> RetryState {
        let RetryState::Attempting { attempt } = self.state else {
            return self.state;
        };

        self.state = match outcome {
            AttemptOutcome::Success => RetryState::Success { attempts: attempt },
            AttemptOutcome::Permanent => RetryState::PermanentFailure { attempts: attempt },
            AttemptOutcome::Retryable if attempt >= self.policy.max_attempts => {
                RetryState::Exhausted { attempts: attempt }
            }
            AttemptOutcome::Retryable => RetryState::Retrying {
                attempts: attempt,
                delay: self.policy.delay_after(attempt),
            },
        };
        self.state
    }
}

/// Final result of delivering a batch.
#[derive(Debug)]
pub enum Delivery {
    /// The batch was accepted.
    Delivered {
        /// Number of attempts made.
        attempts: u32,
    },

    /// The batch was rejected with a permanent error.
    Rejected {
        /// Number of attempts made.
        attempts: u32,

        /// The error of the last attempt.
        error: TransportError,
    },

    /// Every attempt failed with a retryable error.
    Exhausted {
        /// Number of attempts made.
        attempts: u32,

        /// The error of the last attempt.
        error: TransportError,
    },
}

impl Delivery {
    /// Returns the number of attempts made.
    pub fn attempts(&self) -> u32 {
        match self {
            Delivery::Delivered { attempts }
            | Delivery::Rejected { attempts, .. }
            | Delivery::Exhausted { attempts, .. } => *attempts,
        }
    }

    /// Returns `true` if the batch was accepted.
    pub fn is_delivered(&self) -> bool {
        matches!(self, Delivery::Delivered { .. })
    }
}

/// Sends `batch` through `transport`, retrying retryable failures according to `policy`.
///
/// Failures are logged here; the returned [`Delivery`] tells the caller how it ended.
pub async fn deliver<T>(transport: &T, batch: &Batch, policy: &RetryPolicy) -> Delivery
where
    T: Transport + ?Sized,
{
    let mut retry = Retry::new(policy.clone());

    loop {
        let attempt = retry.begin_attempt();
        let error = match transport.send(batch).await {
            Ok(()) => {
                retry.record(AttemptOutcome::Success);
                debug!(attempts = attempt, metrics = batch.len(), "Delivered batch.");
                return Delivery::Delivered { attempts: attempt };
            }
            Err(e) => e,
        };

        match retry.record(AttemptOutcome::from(&error)) {
            RetryState::Retrying { delay, .. } => {
                warn!(%error, attempt, ?delay, "Batch delivery failed, retrying.");
                tokio::time::sleep(delay).await;
            }
            RetryState::Exhausted { attempts } => {
                error!(
                    %error,
                    attempts,
                    metrics = batch.len(),
                    "Retries exhausted, dropping batch."
                );
                return Delivery::Exhausted { attempts, error };
            }
            _ => {
                error!(
                    %error,
                    attempts = attempt,
                    metrics = batch.len(),
                    "Batch rejected, dropping it."
                );
                return Delivery::Rejected { attempts: attempt, error };
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::{
        collections::VecDeque,
        sync::{Arc, Mutex},
        time::Duration,
    };

    use hyper::StatusCode;
    use metrics_relay::{Batch, Metric};
    use tokio::time::Instant;

    use super::{deliver, AttemptOutcome, Delivery, Retry, RetryPolicy, RetryState};
    use crate::transport::{SendFuture, Transport, TransportError};

    /// Replays scripted results and records when each attempt happened.
    struct ScriptedTransport {
        script: Mutex<VecDeque<Result<(), TransportError>>>,
        calls: Mutex<Vec<Instant>>,
    }

    impl ScriptedTransport {
        fn new(script: Vec<Result<(), TransportError>>) -> Arc<Self> {
            Arc::new(Self { script: Mutex::new(script.into()), calls: Mutex::new(Vec::new()) })
        }

        fn calls(&self) -> Vec<Instant> {
            self.calls.lock().unwrap().clone()
        }
    }

    impl Transport for ScriptedTransport {
        fn send<'a>(&'a self, _batch: &'a Batch) -> SendFuture<'a> {
            self.calls.lock().unwrap().push(Instant::now());
            let result = self.script.lock().unwrap().pop_front().unwrap_or(Ok(()));
            Box::pin(async move { result })
        }
    }

    fn unavailable() -> Result<(), TransportError> {
        Err(TransportError::Status(StatusCode::SERVICE_UNAVAILABLE))
    }

    fn batch() -> Batch {
        Batch::seal(vec![Metric::gauge("Alloc", 1.0), Metric::counter("PollCount", 1)])
    }

    #[test]
    fn default_policy_schedule() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_after(1), Duration::from_secs(1));
        assert_eq!(policy.delay_after(2), Duration::from_secs(2));
        assert_eq!(policy.delay_after(3), Duration::from_secs(4));
        assert_eq!(policy.delay_after(4), Duration::from_secs(5));
        assert_eq!(policy.delay_after(1000), Duration::from_secs(5));
    }

    #[test]
    fn state_machine_transitions() {
        let mut retry = Retry::new(RetryPolicy::default());
        assert_eq!(retry.state(), RetryState::Idle);
        assert_eq!(retry.record(AttemptOutcome::Success), RetryState::Idle);

        assert_eq!(retry.begin_attempt(), 1);
        assert_eq!(retry.begin_attempt(), 1);
        assert_eq!(
            retry.record(AttemptOutcome::Retryable),
            RetryState::Retrying { attempts: 1, delay: Duration::from_secs(1) }
        );

        assert_eq!(retry.begin_attempt(), 2);
        assert_eq!(
            retry.record(AttemptOutcome::Retryable),
            RetryState::Retrying { attempts: 2, delay: Duration::from_secs(2) }
        );

        assert_eq!(retry.begin_attempt(), 3);
        assert_eq!(retry.record(AttemptOutcome::Retryable), RetryState::Exhausted { attempts: 3 });
        assert!(retry.state().is_terminal());
        assert_eq!(retry.begin_attempt(), 3);
        assert_eq!(retry.state(), RetryState::Exhausted { attempts: 3 });
    }

    #[test]
    fn permanent_failure_is_terminal() {
        let mut retry = Retry::new(RetryPolicy::default());
        retry.begin_attempt();
        assert_eq!(
            retry.record(AttemptOutcome::Permanent),
            RetryState::PermanentFailure { attempts: 1 }
        );
        assert_eq!(retry.begin_attempt(), 1);
        assert!(retry.state().is_terminal());
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_delivered() {
        let transport = ScriptedTransport::new(vec![unavailable(), unavailable(), Ok(())]);
        let policy = RetryPolicy::default();

        let delivery = deliver(transport.as_ref(), &batch(), &policy).await;
        assert!(delivery.is_delivered());
        assert_eq!(delivery.attempts(), 3);

        let calls = transport.calls();
        assert_eq!(calls.len(), 3);
        let delays = calls.windows(2).map(|w| w[1] - w[0]).collect::<Vec<_>>();
        assert_eq!(delays, vec![Duration::from_secs(1), Duration::from_secs(2)]);
        assert!(delays.windows(2).all(|w| w[0] <= w[1]));
        assert!(delays.iter().all(|d| *d <= policy.max_interval));
    }

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_is_not_retried() {
        let transport =
            ScriptedTransport::new(vec![Err(TransportError::Status(StatusCode::BAD_REQUEST))]);

        let delivery = deliver(transport.as_ref(), &batch(), &RetryPolicy::default()).await;
        assert!(matches!(delivery, Delivery::Rejected { attempts: 1, .. }));
        assert_eq!(transport.calls().len(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn exhausted_after_max_attempts() {
        let transport = ScriptedTransport::new((0..5).map(|_| unavailable()).collect());
        let policy = RetryPolicy { max_attempts: 4, ..RetryPolicy::default() };

        let delivery = deliver(transport.as_ref(), &batch(), &policy).await;
        assert!(matches!(delivery, Delivery::Exhausted { attempts: 4, .. }));
        assert_eq!(transport.calls().len(), 4);
    }
}
