//! Error types for quota configuration and paced submissions
use crate::backoff::BackoffError;
use std::fmt;
use std::time::Duration;

/// Errors raised while building quotas or schedulers.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// A scheduler needs at least one quota to pace against.
    #[error("scheduler requires at least one quota")]
    NoQuotas,
    /// Quota windows must be longer than zero.
    #[error("quota window must be greater than zero (got {window:?})")]
    InvalidWindow { window: Duration },
    #[error("invalid backoff configuration: {0}")]
    Backoff(#[from] BackoffError),
}

/// Outcome of a paced submission that did not produce a value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PacingError<E> {
    /// The operation ran and failed
    Inner(E),
    /// The scheduler was dropped before the operation was admitted
    Cancelled,
}

impl<E: fmt::Display> fmt::Display for PacingError<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Inner(e) => write!(f, "{}", e),
            Self::Cancelled => write!(f, "scheduler dropped before the operation was admitted"),
        }
    }
}

impl<E: std::error::Error + 'static> std::error::Error for PacingError<E> {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Cancelled => None,
        }
    }
}

impl<E> PacingError<E> {
    /// Check if the operation itself failed
    pub fn is_inner(&self) -> bool {
        matches!(self, Self::Inner(_))
    }
    /// Check if the submission was abandoned without running
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
    /// Get the inner error if this is an Inner variant
    pub fn into_inner(self) -> Option<E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Cancelled => None,
        }
    }
    /// Borrow the inner error if present.
    pub fn as_inner(&self) -> Option<&E> {
        match self {
            Self::Inner(e) => Some(e),
            Self::Cancelled => None,
        }
    }
    /// Map the inner error, keeping `Cancelled` as is.
    pub fn map_inner<F, G>(self, f: F) -> PacingError<G>
    where
        F: FnOnce(E) -> G,
    {
        match self {
            Self::Inner(e) => PacingError::Inner(f(e)),
            Self::Cancelled => PacingError::Cancelled,
        }
    }
}
