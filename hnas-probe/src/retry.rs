//! Polling a probe until it reports the expected state.
//!
//! Backend state lags behind the cloud API, so checks like "does the volume
//! file exist yet" are repeated on a fixed delay. Presence checks tolerate
//! probe errors and keep polling; absence checks take any probe error as
//! confirmation that the thing is gone.

use std::fmt::{Debug, Display};
use std::future::Future;
use std::time::Duration;

use tracing::{debug, warn};

use crate::metrics;

/// Default number of retries after the first attempt
pub const DEFAULT_NUM_RETRIES: u32 = 10;
/// Default delay between attempts
pub const DEFAULT_WAIT: Duration = Duration::from_secs(15);

/// Truthiness of a probe result.
pub trait Truthy {
    fn is_truthy(&self) -> bool;
}

impl Truthy for bool {
    fn is_truthy(&self) -> bool {
        *self
    }
}

impl Truthy for String {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl Truthy for &str {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

impl<T> Truthy for Option<T> {
    fn is_truthy(&self) -> bool {
        self.is_some()
    }
}

impl<T> Truthy for Vec<T> {
    fn is_truthy(&self) -> bool {
        !self.is_empty()
    }
}

macro_rules! impl_truthy_for_int {
    ($($ty:ty),*) => {
        $(impl Truthy for $ty {
            fn is_truthy(&self) -> bool {
                *self != 0
            }
        })*
    };
}

impl_truthy_for_int!(u32, u64, usize, i32, i64);

/// What the caller is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// A truthy probe result
    Success,
    /// A falsy probe result, or a probe error
    Failure,
}

impl Expect {
    fn matches(self, truthy: bool) -> bool {
        match self {
            Expect::Success => truthy,
            Expect::Failure => !truthy,
        }
    }
}

/// How long and how often to poll.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub expect: Expect,
    /// Attempts after the first one
    pub num_retries: u32,
    /// Delay after every attempt that did not match
    pub wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            expect: Expect::Success,
            num_retries: DEFAULT_NUM_RETRIES,
            wait: DEFAULT_WAIT,
        }
    }
}

impl RetryPolicy {
    pub fn expect_success() -> Self {
        Self::default()
    }

    pub fn expect_failure() -> Self {
        Self {
            expect: Expect::Failure,
            ..Self::default()
        }
    }

    pub fn with_retries(mut self, num_retries: u32) -> Self {
        self.num_retries = num_retries;
        self
    }

    pub fn with_wait(mut self, wait: Duration) -> Self {
        self.wait = wait;
        self
    }
}

/// Result of [`retry`].
#[must_use]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryOutcome<T> {
    /// The probe returned a value matching the expectation
    Matched(T),
    /// Failure was expected and the probe returned an error
    ProbeFailed,
    /// The budget ran out; holds the last value the probe returned, if any
    Exhausted(Option<T>),
}

impl<T> RetryOutcome<T> {
    pub fn is_matched(&self) -> bool {
        !matches!(self, RetryOutcome::Exhausted(_))
    }

    pub fn last(&self) -> Option<&T> {
        match self {
            RetryOutcome::Matched(value) => Some(value),
            RetryOutcome::ProbeFailed => None,
            RetryOutcome::Exhausted(last) => last.as_ref(),
        }
    }

    pub fn into_last(self) -> Option<T> {
        match self {
            RetryOutcome::Matched(value) => Some(value),
            RetryOutcome::ProbeFailed => None,
            RetryOutcome::Exhausted(last) => last,
        }
    }
}

/// Call `probe` until its result matches `policy.expect`.
///
/// At most `1 + num_retries` attempts are made, strictly one after another.
/// Every attempt that does not match is followed by a full `wait`,
/// including the last one before giving up.
pub async fn retry<T, E, F, Fut>(name: &str, policy: &RetryPolicy, mut probe: F) -> RetryOutcome<T>
where
    T: Truthy + Debug,
    E: Display,
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, E>>,
{
    let mut last: Option<T> = None;
    let mut retries_left = policy.num_retries;
    let mut attempt: u32 = 0;

    loop {
        attempt += 1;
        match probe().await {
            Ok(value) if policy.expect.matches(value.is_truthy()) => {
                debug!(probe = name, attempt, "Probe matched expectation");
                metrics::record_retry_outcome(name, "matched");
                return RetryOutcome::Matched(value);
            }
            Ok(value) => {
                debug!(
                    probe = name,
                    attempt,
                    value = ?value,
                    expect = ?policy.expect,
                    "Probe result did not match expectation"
                );
                last = Some(value);
            }
            Err(e) if policy.expect == Expect::Failure => {
                debug!(probe = name, attempt, error = %e, "Probe failed, treating as confirmed absence");
                metrics::record_retry_outcome(name, "probe_failed");
                return RetryOutcome::ProbeFailed;
            }
            Err(e) => {
                warn!(probe = name, attempt, error = %e, "Probe failed");
            }
        }

        debug!(
            probe = name,
            wait_secs = policy.wait.as_secs_f64(),
            retries_left,
            "Waiting before next attempt"
        );
        tokio::time::sleep(policy.wait).await;

        if retries_left == 0 {
            debug!(probe = name, attempts = attempt, "Giving up");
            metrics::record_retry_outcome(name, "exhausted");
            return RetryOutcome::Exhausted(last);
        }
        retries_left -= 1;
        metrics::record_retry_attempt(name);
    }
}
