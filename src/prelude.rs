//! Convenient re-exports for common Quota Pacer types.
pub use crate::{
    backoff::{Backoff, BackoffConfig, MAX_BACKOFF},
    error::{ConfigError, PacingError},
    jitter::Jitter,
    middleware::{PacingLayer, PacingService},
    quota::{Quota, QuotaKind, QuotaSpec, QuotaUpdate, Strategy},
    scheduler::{Scheduler, SchedulerBuilder, Submission},
    timer::{ManualTimer, Timer, TokioTimer},
};
