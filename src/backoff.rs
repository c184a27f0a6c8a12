//! Backoff bookkeeping after an explicit rate-limit violation.
//!
//! A scheduler told that it overshot a quota stops admitting work for a while. The length of
//! that pause comes from [`Backoff::next_delay`]:
//!
//! - with an explicit `retry_after` hint, the hint is used and the exponential state returns to
//!   its baseline;
//! - without one, the current exponential delay is used and the next one doubles.
//!
//! Either way the effective delay never drops below the configured floor.
//!
//! Example
//! ```rust
//! use std::time::Duration;
//! use quota_pacer::{Backoff, BackoffConfig};
//!
//! let mut backoff = Backoff::new(BackoffConfig::default());
//! assert_eq!(backoff.next_delay(None), Duration::from_secs(2)); // floored
//! assert_eq!(backoff.next_delay(None), Duration::from_secs(4));
//! assert_eq!(backoff.next_delay(Some(Duration::from_secs(3))), Duration::from_secs(3));
//! assert_eq!(backoff.next_delay(None), Duration::from_secs(2)); // back to baseline
//! ```
//!
//! Overflow behavior: delays saturate to `MAX_BACKOFF` (1 day).

use std::fmt;
use std::time::Duration;

/// Maximum delay used when calculations overflow (1 day).
pub const MAX_BACKOFF: Duration = Duration::from_secs(24 * 60 * 60);

/// Starting point of the exponential delay used when no retry-after hint is available.
pub const DEFAULT_BACKOFF_BASELINE: Duration = Duration::from_millis(1000);

/// Lower bound of every effective backoff delay.
pub const DEFAULT_BACKOFF_FLOOR: Duration = Duration::from_millis(2000);

/// Errors returned by backoff configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BackoffError {
    BaselineMustBePositive,
    FloorMustBePositive,
}

impl fmt::Display for BackoffError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackoffError::BaselineMustBePositive => write!(f, "baseline must be greater than zero"),
            BackoffError::FloorMustBePositive => write!(f, "floor must be greater than zero"),
        }
    }
}

impl std::error::Error for BackoffError {}

/// Validated backoff parameters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BackoffConfig {
    baseline: Duration,
    floor: Duration,
}

impl BackoffConfig {
    pub fn new(baseline: Duration, floor: Duration) -> Result<Self, BackoffError> {
        if baseline.is_zero() {
            return Err(BackoffError::BaselineMustBePositive);
        }
        if floor.is_zero() {
            return Err(BackoffError::FloorMustBePositive);
        }
        Ok(Self { baseline: baseline.min(MAX_BACKOFF), floor: floor.min(MAX_BACKOFF) })
    }

    pub fn baseline(&self) -> Duration {
        self.baseline
    }

    pub fn floor(&self) -> Duration {
        self.floor
    }
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self { baseline: DEFAULT_BACKOFF_BASELINE, floor: DEFAULT_BACKOFF_FLOOR }
    }
}

/// Exponential backoff state owned by one scheduler.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Backoff {
    config: BackoffConfig,
    current: Duration,
}

impl Backoff {
    pub fn new(config: BackoffConfig) -> Self {
        Self { config, current: config.baseline }
    }

    /// Effective delay for the next backoff, advancing the exponential state.
    ///
    /// The doubling starts from the floored delay, so consecutive unexplained backoffs are
    /// strictly increasing until they saturate.
    pub fn next_delay(&mut self, retry_after: Option<Duration>) -> Duration {
        match retry_after {
            Some(hint) => {
                self.current = self.config.baseline;
                hint.max(self.config.floor).min(MAX_BACKOFF)
            }
            None => {
                let effective = self.current.max(self.config.floor).min(MAX_BACKOFF);
                self.current = effective.checked_mul(2).unwrap_or(MAX_BACKOFF).min(MAX_BACKOFF);
                effective
            }
        }
    }

    /// Return the exponential state to its baseline.
    pub fn reset(&mut self) {
        self.current = self.config.baseline;
    }

    /// Delay the next unexplained backoff would start from, before flooring.
    pub fn current(&self) -> Duration {
        self.current
    }

    /// Whether unexplained backoffs have grown the delay past its baseline.
    pub fn is_escalated(&self) -> bool {
        self.current != self.config.baseline
    }

    pub fn config(&self) -> BackoffConfig {
        self.config
    }
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(BackoffConfig::default())
    }
}
