//! Bounded retries with a fixed pause between attempts.
//!
//! A [`RetryPolicy`] describes the budget. A [`RetryState`] tracks one
//! operation's progress through it: `Idle`, `Attempting`, and then
//! `Succeeded`, `RetryableFailure` (which loops back to `Attempting`) or
//! `Exhausted`. [`retry_with_policy`] drives the state machine around a
//! fallible closure and is the only retry loop in the workspace.

use std::fmt;
use std::time::Duration;

use log::{debug, error, warn};
use thiserror::Error;

use crate::HarvestContext;

/// Attempts made before a request is declared exhausted.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;

/// Pause between consecutive attempts.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Retry budget for a single operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    max_attempts: u32,
    delay: Duration,
}

/// Errors raised when constructing a [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetryPolicyError {
    /// A policy must permit at least one attempt.
    #[error("max attempts must be at least 1")]
    ZeroAttempts,
}

impl RetryPolicy {
    /// Build a policy allowing `max_attempts` attempts separated by `delay`.
    ///
    /// # Errors
    ///
    /// Returns [`RetryPolicyError::ZeroAttempts`] when `max_attempts` is zero.
    pub const fn new(max_attempts: u32, delay: Duration) -> Result<Self, RetryPolicyError> {
        if max_attempts == 0 {
            return Err(RetryPolicyError::ZeroAttempts);
        }
        Ok(Self {
            max_attempts,
            delay,
        })
    }

    /// Maximum number of attempts, including the first.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Pause observed between attempts.
    #[must_use]
    pub const fn delay(&self) -> Duration {
        self.delay
    }

    /// Start tracking a new operation under this policy.
    #[must_use]
    pub const fn start(&self) -> RetryState {
        RetryState {
            policy: *self,
            attempts: 0,
            phase: RetryPhase::Idle,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            delay: DEFAULT_RETRY_DELAY,
        }
    }
}

/// Where an operation currently sits in its retry lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    /// No attempt has been made yet.
    Idle,
    /// An attempt is in flight.
    Attempting,
    /// The last attempt failed and budget remains.
    RetryableFailure,
    /// An attempt succeeded.
    Succeeded,
    /// Every permitted attempt failed.
    Exhausted,
}

/// What the caller should do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    /// Pause for the given delay, then attempt again.
    RetryAfter(Duration),
    /// Stop; the budget is spent.
    GiveUp,
}

/// Progress of one operation through its [`RetryPolicy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    policy: RetryPolicy,
    attempts: u32,
    phase: RetryPhase,
}

impl RetryState {
    /// Mark the start of an attempt and return its 1-based number.
    pub const fn begin_attempt(&mut self) -> u32 {
        self.attempts = self.attempts.saturating_add(1);
        self.phase = RetryPhase::Attempting;
        self.attempts
    }

    /// Record that the current attempt succeeded.
    pub const fn record_success(&mut self) {
        self.phase = RetryPhase::Succeeded;
    }

    /// Record that the current attempt failed and decide what happens next.
    pub const fn record_failure(&mut self) -> RetryDecision {
        if self.attempts >= self.policy.max_attempts {
            self.phase = RetryPhase::Exhausted;
            RetryDecision::GiveUp
        } else {
            self.phase = RetryPhase::RetryableFailure;
            RetryDecision::RetryAfter(self.policy.delay)
        }
    }

    /// Attempts started so far.
    #[must_use]
    pub const fn attempts(&self) -> u32 {
        self.attempts
    }

    /// Current lifecycle phase.
    #[must_use]
    pub const fn phase(&self) -> RetryPhase {
        self.phase
    }
}

/// Blocks the caller between attempts.
///
/// Production code uses [`ThreadPause`]; tests inject a recorder so delays
/// are observable without sleeping.
pub trait Pause {
    /// Wait for `delay` before the next attempt.
    fn pause(&self, delay: Duration);
}

/// [`Pause`] implementation backed by [`std::thread::sleep`].
#[derive(Debug, Default, Clone, Copy)]
pub struct ThreadPause;

impl Pause for ThreadPause {
    fn pause(&self, delay: Duration) {
        std::thread::sleep(delay);
    }
}

/// Successful outcome of [`retry_with_policy`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    /// Value produced by the successful attempt.
    pub value: T,
    /// Number of attempts made, including the successful one.
    pub attempts: u32,
}

/// Every permitted attempt failed.
#[derive(Debug, Error)]
#[error("{operation} failed after {attempts} attempts: {last_error}")]
pub struct RetryExhausted<E>
where
    E: fmt::Display + fmt::Debug,
{
    /// Name of the operation that was retried.
    pub operation: String,
    /// Number of attempts made.
    pub attempts: u32,
    /// Error returned by the final attempt.
    pub last_error: E,
}

/// Run `attempt` until it succeeds or `policy` is exhausted.
///
/// The closure receives the 1-based attempt number. Failed attempts are
/// logged with `context`; the pause happens only between attempts, so `n`
/// attempts are separated by `n - 1` pauses.
///
/// # Errors
///
/// Returns [`RetryExhausted`] carrying the final error when every attempt
/// failed.
///
/// # Examples
///
/// ```
/// use std::cell::Cell;
/// use std::time::Duration;
/// use harvest_core::{HarvestContext, Pause, RetryPolicy, retry_with_policy};
///
/// struct CountingPause(Cell<u32>);
///
/// impl Pause for CountingPause {
///     fn pause(&self, _delay: Duration) {
///         self.0.set(self.0.get() + 1);
///     }
/// }
///
/// let policy = RetryPolicy::new(3, Duration::from_secs(5))?;
/// let pause = CountingPause(Cell::new(0));
/// let ctx = HarvestContext::new("ws", "layer");
/// let outcome = retry_with_policy(&policy, &pause, &ctx, "fetch", |attempt| {
///     if attempt < 2 { Err("timeout") } else { Ok(attempt) }
/// })
/// .expect("second attempt succeeds");
/// assert_eq!(outcome.attempts, 2);
/// assert_eq!(pause.0.get(), 1);
/// # Ok::<(), harvest_core::RetryPolicyError>(())
/// ```
pub fn retry_with_policy<T, E, F>(
    policy: &RetryPolicy,
    pause: &dyn Pause,
    context: &HarvestContext,
    operation: &str,
    mut attempt: F,
) -> Result<Retried<T>, RetryExhausted<E>>
where
    E: fmt::Display + fmt::Debug,
    F: FnMut(u32) -> Result<T, E>,
{
    let mut state = policy.start();
    loop {
        let number = state.begin_attempt();
        match attempt(number) {
            Ok(value) => {
                state.record_success();
                debug!(
                    "{context} {operation} succeeded on attempt {number}/{}",
                    policy.max_attempts()
                );
                return Ok(Retried {
                    value,
                    attempts: number,
                });
            }
            Err(err) => match state.record_failure() {
                RetryDecision::RetryAfter(delay) => {
                    warn!(
                        "{context} {operation} attempt {number}/{} failed: {err}; retrying in {}s",
                        policy.max_attempts(),
                        delay.as_secs_f64()
                    );
                    pause.pause(delay);
                }
                RetryDecision::GiveUp => {
                    error!("{context} {operation} gave up after {number} attempts: {err}");
                    return Err(RetryExhausted {
                        operation: operation.to_owned(),
                        attempts: number,
                        last_error: err,
                    });
                }
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::RecordingPause;
    use rstest::{fixture, rstest};

    #[fixture]
    fn ctx() -> HarvestContext {
        HarvestContext::new("ws", "layer")
    }

    fn policy(max: u32) -> RetryPolicy {
        RetryPolicy::new(max, Duration::from_millis(250)).expect("non-zero attempts")
    }

    #[rstest]
    fn defaults_match_documented_budget() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.max_attempts(), 100);
        assert_eq!(policy.delay(), Duration::from_secs(5));
    }

    #[rstest]
    fn zero_attempts_rejected() {
        assert_eq!(
            RetryPolicy::new(0, Duration::ZERO),
            Err(RetryPolicyError::ZeroAttempts)
        );
    }

    #[rstest]
    #[case(1)]
    #[case(3)]
    #[case(7)]
    fn succeeds_on_kth_attempt(ctx: HarvestContext, #[case] k: u32) {
        let pause = RecordingPause::default();
        let mut calls = 0;
        let outcome = retry_with_policy(&policy(10), &pause, &ctx, "fetch", |n| {
            calls += 1;
            if n < k { Err("boom") } else { Ok(n) }
        })
        .expect("succeeds within budget");
        assert_eq!(outcome.attempts, k);
        assert_eq!(outcome.value, k);
        assert_eq!(calls, k);
        assert_eq!(pause.delays().len(), usize::try_from(k - 1).expect("small"));
    }

    #[rstest]
    #[case(1)]
    #[case(4)]
    fn exhaustion_makes_max_attempts_and_one_fewer_pauses(ctx: HarvestContext, #[case] max: u32) {
        let pause = RecordingPause::default();
        let mut calls = 0_u32;
        let err = retry_with_policy::<(), _, _>(&policy(max), &pause, &ctx, "fetch", |n| {
            calls += 1;
            Err(format!("failure {n}"))
        })
        .expect_err("always fails");
        assert_eq!(calls, max);
        assert_eq!(err.attempts, max);
        assert_eq!(err.last_error, format!("failure {max}"));
        assert_eq!(
            pause.delays(),
            vec![Duration::from_millis(250); usize::try_from(max - 1).expect("small")]
        );
    }

    #[rstest]
    fn state_walks_through_phases() {
        let mut state = policy(2).start();
        assert_eq!(state.phase(), RetryPhase::Idle);
        assert_eq!(state.begin_attempt(), 1);
        assert_eq!(state.phase(), RetryPhase::Attempting);
        assert_eq!(
            state.record_failure(),
            RetryDecision::RetryAfter(Duration::from_millis(250))
        );
        assert_eq!(state.phase(), RetryPhase::RetryableFailure);
        assert_eq!(state.begin_attempt(), 2);
        assert_eq!(state.record_failure(), RetryDecision::GiveUp);
        assert_eq!(state.phase(), RetryPhase::Exhausted);
        assert_eq!(state.attempts(), 2);
    }
}
