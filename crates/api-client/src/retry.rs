//! Retry policy and the per-request retry state machine
//!
//! The client drives a [`RetryState`] through one transition per attempt:
//!
//! ```text
//! Attempting(n) --2xx--------------------------> Succeeded
//! Attempting(n) --retryable, n < max, enabled--> Waiting(n, delay) --resume--> Attempting(n + 1)
//! Attempting(n) --anything else----------------> Failed(kind)
//! ```
//!
//! Transitions are pure: given the observed [`Outcome`], the [`RetryPlan`] and
//! a [`JitterSource`], the next state is fully determined. Sleeping between
//! attempts is left to the caller through the [`Sleeper`] trait.

use rand::Rng;
use serde::{Deserialize, Serialize};
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Retry configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Retries after the first attempt (total attempts = `max_retries + 1`)
    pub max_retries: u32,
    /// Base delay for the first retry
    #[serde(with = "crate::config::millis")]
    pub initial_delay: Duration,
    /// Upper bound on any backoff delay
    #[serde(with = "crate::config::millis")]
    pub max_delay: Duration,
    /// Exclusive upper bound of the random jitter added to each backoff
    #[serde(with = "crate::config::millis")]
    pub max_jitter: Duration,
    /// Wait applied to a 429 response that has no usable `Retry-After`
    #[serde(with = "crate::config::millis")]
    pub rate_limit_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(1000),
            max_delay: Duration::from_millis(10_000),
            max_jitter: Duration::from_millis(1000),
            rate_limit_delay: Duration::from_millis(60_000),
        }
    }
}

impl RetryPolicy {
    /// Short delays, useful against a local development server
    #[must_use]
    pub fn quick() -> Self {
        Self {
            max_retries: 3,
            initial_delay: Duration::from_millis(50),
            max_delay: Duration::from_millis(500),
            max_jitter: Duration::from_millis(50),
            rate_limit_delay: Duration::from_secs(5),
        }
    }

    /// A single attempt, never retried
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Self::default()
        }
    }

    /// Builder-style method to set the retry count
    #[must_use]
    pub fn with_max_retries(mut self, max_retries: u32) -> Self {
        self.max_retries = max_retries;
        self
    }

    /// Backoff before the retry that follows `attempt` (0-indexed)
    ///
    /// `min(initial_delay * 2^attempt + jitter, max_delay)`
    #[must_use]
    pub fn backoff_delay(&self, attempt: u32, jitter: Duration) -> Duration {
        let factor = 2u32.saturating_pow(attempt);
        let exponential = self
            .initial_delay
            .checked_mul(factor)
            .unwrap_or(self.max_delay);

        exponential.saturating_add(jitter).min(self.max_delay)
    }
}

/// Source of the random jitter added to backoff delays
pub trait JitterSource: Send + Sync {
    /// A duration in `[0, max)`; zero when `max` is zero
    fn jitter(&self, max: Duration) -> Duration;
}

/// Uniform random jitter from the thread-local RNG
#[derive(Debug, Clone, Copy, Default)]
pub struct RandomJitter;

impl JitterSource for RandomJitter {
    #[allow(clippy::cast_possible_truncation)]
    fn jitter(&self, max: Duration) -> Duration {
        let max_ms = max.as_millis() as u64;
        if max_ms == 0 {
            return Duration::ZERO;
        }
        Duration::from_millis(rand::thread_rng().gen_range(0..max_ms))
    }
}

/// Always returns the same jitter, clamped below `max`
#[derive(Debug, Clone, Copy)]
pub struct FixedJitter(pub Duration);

impl JitterSource for FixedJitter {
    fn jitter(&self, max: Duration) -> Duration {
        if max.is_zero() {
            Duration::ZERO
        } else {
            self.0.min(max.saturating_sub(Duration::from_millis(1)))
        }
    }
}

/// Suspends the current task between attempts
pub trait Sleeper: Send + Sync {
    /// Wait for `delay`
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// Sleeps on the tokio timer
#[derive(Debug, Clone, Copy, Default)]
pub struct TokioSleeper;

impl Sleeper for TokioSleeper {
    fn sleep(&self, delay: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(delay))
    }
}

/// What a single attempt observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// The server answered
    Response {
        /// HTTP status code
        status: u16,
        /// Parsed `Retry-After` header, if present and valid
        retry_after: Option<Duration>,
    },
    /// The attempt's deadline elapsed first
    TimedOut,
    /// The request could not be delivered (connection refused, DNS, ...)
    TransportFailed,
}

/// Per-request retry limits
#[derive(Debug, Clone, Copy)]
pub struct RetryPlan<'a> {
    /// Policy supplying the delays
    pub policy: &'a RetryPolicy,
    /// Retries allowed for this request
    pub max_retries: u32,
    /// False when the caller disabled retries for this request
    pub enabled: bool,
}

impl<'a> RetryPlan<'a> {
    /// Plan using the policy's own retry count
    #[must_use]
    pub fn new(policy: &'a RetryPolicy) -> Self {
        Self {
            policy,
            max_retries: policy.max_retries,
            enabled: true,
        }
    }

    fn can_retry(&self, attempt: u32) -> bool {
        self.enabled && attempt < self.max_retries
    }
}

/// Why the request is waiting before its next attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryReason {
    /// The server answered 429
    RateLimited,
    /// The server answered with a retryable status
    Status(u16),
    /// The request never reached the server
    Transport,
}

/// Why the request failed for good
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// 401: credentials rejected, observers must be told
    Unauthorized,
    /// The deadline elapsed
    TimedOut,
    /// Non-2xx response that will not be retried
    Status(u16),
    /// Delivery failed and no attempts remain
    Transport,
}

/// State of one request's retry loop
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt `attempt` is in flight
    Attempting {
        /// 0-indexed attempt number
        attempt: u32,
    },
    /// Sleeping before attempt `attempt + 1`
    Waiting {
        /// The attempt that just failed
        attempt: u32,
        /// How long to wait
        delay: Duration,
        /// What triggered the retry
        reason: RetryReason,
    },
    /// A 2xx response was received
    Succeeded,
    /// Terminal failure
    Failed(Failure),
}

impl RetryState {
    /// The state before the first attempt
    #[must_use]
    pub fn start() -> Self {
        Self::Attempting { attempt: 0 }
    }

    /// Transition after an attempt completed with `outcome`
    ///
    /// Only meaningful from `Attempting`; any other state is returned as is.
    #[must_use]
    pub fn observe(self, outcome: Outcome, plan: &RetryPlan<'_>, jitter: &dyn JitterSource) -> Self {
        let Self::Attempting { attempt } = self else {
            return self;
        };

        let backoff = || {
            plan.policy
                .backoff_delay(attempt, jitter.jitter(plan.policy.max_jitter))
        };

        match outcome {
            Outcome::Response { status, .. } if (200..300).contains(&status) => Self::Succeeded,
            Outcome::Response { status: 429, retry_after } if plan.can_retry(attempt) => {
                Self::Waiting {
                    attempt,
                    delay: retry_after.unwrap_or(plan.policy.rate_limit_delay),
                    reason: RetryReason::RateLimited,
                }
            }
            Outcome::Response { status: 401, .. } => Self::Failed(Failure::Unauthorized),
            Outcome::Response { status, .. } => {
                if is_retryable_status(status) && plan.can_retry(attempt) {
                    Self::Waiting {
                        attempt,
                        delay: backoff(),
                        reason: RetryReason::Status(status),
                    }
                } else {
                    Self::Failed(Failure::Status(status))
                }
            }
            Outcome::TimedOut => Self::Failed(Failure::TimedOut),
            Outcome::TransportFailed if plan.can_retry(attempt) => Self::Waiting {
                attempt,
                delay: backoff(),
                reason: RetryReason::Transport,
            },
            Outcome::TransportFailed => Self::Failed(Failure::Transport),
        }
    }

    /// Leave `Waiting` for the next attempt
    #[must_use]
    pub fn resume(self) -> Self {
        match self {
            Self::Waiting { attempt, .. } => Self::Attempting {
                attempt: attempt + 1,
            },
            other => other,
        }
    }

    /// Whether the loop has finished
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Succeeded | Self::Failed(_))
    }
}

/// Statuses worth another attempt: any 5xx, 408 and 429
#[must_use]
pub fn is_retryable_status(status: u16) -> bool {
    status >= 500 || status == 408 || status == 429
}

/// Parse a `Retry-After` header given in whole seconds
#[must_use]
pub fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse::<u64>().ok().map(Duration::from_secs)
}

#[cfg(test)]
mod tests {
    use super::*;

    const NO_JITTER: FixedJitter = FixedJitter(Duration::ZERO);

    fn response(status: u16) -> Outcome {
        Outcome::Response {
            status,
            retry_after: None,
        }
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let policy = RetryPolicy::default();

        assert_eq!(policy.backoff_delay(0, Duration::ZERO), Duration::from_millis(1000));
        assert_eq!(policy.backoff_delay(1, Duration::ZERO), Duration::from_millis(2000));
        assert_eq!(policy.backoff_delay(2, Duration::ZERO), Duration::from_millis(4000));
        assert_eq!(policy.backoff_delay(3, Duration::ZERO), Duration::from_millis(8000));
        assert_eq!(policy.backoff_delay(4, Duration::ZERO), Duration::from_millis(10_000));
        assert_eq!(policy.backoff_delay(40, Duration::ZERO), Duration::from_millis(10_000));
    }

    #[test]
    fn test_backoff_jitter_is_capped_too() {
        let policy = RetryPolicy::default();
        assert_eq!(
            policy.backoff_delay(3, Duration::from_millis(999)),
            Duration::from_millis(8999)
        );
        assert_eq!(
            policy.backoff_delay(3, Duration::from_millis(2500)),
            Duration::from_millis(10_000)
        );
    }

    #[test]
    fn test_random_backoff_stays_in_window() {
        let policy = RetryPolicy::default();
        for attempt in 0..6u32 {
            let base = 1000u64 * 2u64.pow(attempt);
            for _ in 0..200 {
                let delay = policy.backoff_delay(attempt, RandomJitter.jitter(policy.max_jitter));
                let ms = u64::try_from(delay.as_millis()).unwrap();
                assert!(ms <= 10_000);
                if base + 1000 <= 10_000 {
                    assert!((base..base + 1000).contains(&ms), "attempt {attempt}: {ms}");
                } else {
                    assert!(ms >= base.min(10_000));
                }
            }
        }
    }

    #[test]
    fn test_fixed_jitter_stays_below_max() {
        let jitter = FixedJitter(Duration::from_millis(5000));
        assert_eq!(jitter.jitter(Duration::from_millis(1000)), Duration::from_millis(999));
        assert_eq!(jitter.jitter(Duration::ZERO), Duration::ZERO);
    }

    #[test]
    fn test_success_ends_the_loop() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        let next = RetryState::start().observe(response(204), &plan, &NO_JITTER);
        assert_eq!(next, RetryState::Succeeded);
        assert!(next.is_terminal());
    }

    #[test]
    fn test_rate_limit_uses_retry_after_or_default() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);

        let next = RetryState::start().observe(response(429), &plan, &NO_JITTER);
        assert_eq!(
            next,
            RetryState::Waiting {
                attempt: 0,
                delay: Duration::from_millis(60_000),
                reason: RetryReason::RateLimited,
            }
        );

        let with_header = Outcome::Response {
            status: 429,
            retry_after: Some(Duration::from_secs(5)),
        };
        let next = RetryState::start().observe(with_header, &plan, &NO_JITTER);
        assert!(matches!(
            next,
            RetryState::Waiting { delay, .. } if delay == Duration::from_millis(5000)
        ));
    }

    #[test]
    fn test_rate_limit_exhausted_fails_with_status() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        let last = RetryState::Attempting { attempt: 3 };
        assert_eq!(
            last.observe(response(429), &plan, &NO_JITTER),
            RetryState::Failed(Failure::Status(429))
        );
    }

    #[test]
    fn test_unauthorized_is_never_retried() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        assert_eq!(
            RetryState::start().observe(response(401), &plan, &NO_JITTER),
            RetryState::Failed(Failure::Unauthorized)
        );
    }

    #[test]
    fn test_client_errors_fail_immediately() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        for status in [400, 403, 404, 409, 422] {
            assert_eq!(
                RetryState::start().observe(response(status), &plan, &NO_JITTER),
                RetryState::Failed(Failure::Status(status))
            );
        }
    }

    #[test]
    fn test_timeout_is_terminal() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        assert_eq!(
            RetryState::start().observe(Outcome::TimedOut, &plan, &NO_JITTER),
            RetryState::Failed(Failure::TimedOut)
        );
    }

    #[test]
    fn test_server_errors_retry_until_exhausted() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        let jitter = FixedJitter(Duration::from_millis(250));

        let mut state = RetryState::start();
        let mut delays = Vec::new();
        loop {
            state = state.observe(response(503), &plan, &jitter);
            match state {
                RetryState::Waiting { delay, .. } => {
                    delays.push(delay.as_millis());
                    state = state.resume();
                }
                _ => break,
            }
        }

        assert_eq!(delays, vec![1250, 2250, 4250]);
        assert_eq!(state, RetryState::Failed(Failure::Status(503)));
    }

    #[test]
    fn test_transport_failures_retry_then_fail() {
        let policy = RetryPolicy::default().with_max_retries(1);
        let plan = RetryPlan::new(&policy);

        let waiting = RetryState::start().observe(Outcome::TransportFailed, &plan, &NO_JITTER);
        assert!(matches!(
            waiting,
            RetryState::Waiting { reason: RetryReason::Transport, .. }
        ));
        assert_eq!(
            waiting.resume().observe(Outcome::TransportFailed, &plan, &NO_JITTER),
            RetryState::Failed(Failure::Transport)
        );
    }

    #[test]
    fn test_disabled_plan_never_waits() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan {
            enabled: false,
            ..RetryPlan::new(&policy)
        };
        assert_eq!(
            RetryState::start().observe(response(500), &plan, &NO_JITTER),
            RetryState::Failed(Failure::Status(500))
        );
        assert_eq!(
            RetryState::start().observe(response(429), &plan, &NO_JITTER),
            RetryState::Failed(Failure::Status(429))
        );
    }

    #[test]
    fn test_observe_ignores_non_attempting_states() {
        let policy = RetryPolicy::default();
        let plan = RetryPlan::new(&policy);
        let done = RetryState::Succeeded;
        assert_eq!(done.observe(response(500), &plan, &NO_JITTER), done);
        assert_eq!(done.resume(), done);
    }

    #[test]
    fn test_retryable_statuses() {
        for status in [408, 429, 500, 502, 503, 504] {
            assert!(is_retryable_status(status), "{status}");
        }
        for status in [400, 401, 403, 404, 422] {
            assert!(!is_retryable_status(status), "{status}");
        }
    }

    #[test]
    fn test_parse_retry_after() {
        assert_eq!(parse_retry_after("5"), Some(Duration::from_secs(5)));
        assert_eq!(parse_retry_after(" 0 "), Some(Duration::ZERO));
        assert_eq!(parse_retry_after("soon"), None);
        assert_eq!(parse_retry_after("-1"), None);
    }

    #[test]
    fn test_policy_serializes_delays_as_millis() {
        let json = serde_json::to_value(RetryPolicy::default()).unwrap();
        assert_eq!(json["initial_delay"], 1000);
        assert_eq!(json["rate_limit_delay"], 60_000);

        let back: RetryPolicy = serde_json::from_value(json).unwrap();
        assert_eq!(back, RetryPolicy::default());
    }
}
