//! Bounded retry loop for transient storage conflicts.
//!
//! # Responsibility
//! - Re-run one transactional attempt while it fails with a transient
//!   conflict, up to a fixed attempt budget.
//! - Keep the backoff schedule a pure function of the attempt number.
//!
//! # Invariants
//! - Every attempt starts from scratch; callers must re-read state inside
//!   the attempt instead of reusing values from an earlier one.
//! - Non-transient failures are returned immediately and never retried.
//! - Backoff sleeps block the calling thread only.

use log::{info, warn};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Duration;

pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;
pub const DEFAULT_BASE_DELAY: Duration = Duration::from_millis(25);

/// Attempt budget and linear backoff step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Values below 1 behave as 1.
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            base_delay: DEFAULT_BASE_DELAY,
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
        }
    }

    /// Delay to wait after failed attempt `attempt` (1-based): `base * attempt`.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        self.base_delay.saturating_mul(attempt)
    }

    fn budget(&self) -> u32 {
        self.max_attempts.max(1)
    }
}

/// Successful result with the number of attempts it took.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Retried<T> {
    pub value: T,
    pub attempts: u32,
}

/// Terminal failure of a retry loop.
#[derive(Debug)]
pub enum RetryError<E> {
    /// Every attempt in the budget hit a transient conflict.
    Exhausted { attempts: u32, last: E },
    /// An attempt failed with a non-transient error.
    Aborted(E),
}

impl<E: Display> Display for RetryError<E> {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Exhausted { attempts, last } => {
                write!(f, "retry budget exhausted after {attempts} attempts: {last}")
            }
            Self::Aborted(err) => write!(f, "{err}"),
        }
    }
}

impl<E: Error + 'static> Error for RetryError<E> {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Exhausted { last, .. } => Some(last),
            Self::Aborted(err) => Some(err),
        }
    }
}

/// Runs `op` until it succeeds, fails non-transiently, or the budget runs out.
///
/// `op` receives the 1-based attempt number. `is_transient` classifies
/// failures; `operation` only labels log events.
pub fn run_with_retry<T, E, F, C>(
    policy: &RetryPolicy,
    operation: &'static str,
    is_transient: C,
    mut op: F,
) -> Result<Retried<T>, RetryError<E>>
where
    F: FnMut(u32) -> Result<T, E>,
    C: Fn(&E) -> bool,
    E: Display,
{
    let budget = policy.budget();
    let mut attempt = 1;
    loop {
        match op(attempt) {
            Ok(value) => {
                if attempt > 1 {
                    info!(
                        "event={operation} module=ordering status=recovered attempts={attempt}"
                    );
                }
                return Ok(Retried {
                    value,
                    attempts: attempt,
                });
            }
            Err(err) if is_transient(&err) => {
                if attempt >= budget {
                    warn!(
                        "event={operation} module=ordering status=exhausted attempts={attempt} error={err}"
                    );
                    return Err(RetryError::Exhausted {
                        attempts: attempt,
                        last: err,
                    });
                }
                let delay = policy.backoff_delay(attempt);
                warn!(
                    "event={operation} module=ordering status=retry attempt={attempt} delay_ms={} error={err}",
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    std::thread::sleep(delay);
                }
                attempt += 1;
            }
            Err(err) => return Err(RetryError::Aborted(err)),
        }
    }
}
