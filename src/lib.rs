#![forbid(unsafe_code)]
#![cfg_attr(not(test), deny(clippy::all))]

//! # Quota Pacer
//!
//! Client-side pacing of operations against remote rate limits.
//!
//! ## Features
//!
//! - **Quotas** describing "N operations per window", shared between schedulers
//! - **Burst scheduling** with a safety margin below the advertised limit
//! - **Spread scheduling** that spaces operations evenly across the window
//! - **Backoff** after explicit rate-limit violations, followed by a single probe
//! - **Injectable timers** so pacing can be tested on virtual time
//! - **Tower middleware** via [`PacingLayer`]
//!
//! ## Quick Start
//!
//! ```rust
//! use quota_pacer::{Quota, QuotaSpec, Scheduler, Strategy};
//!
//! #[tokio::main]
//! async fn main() {
//!     let per_second = Quota::new(QuotaSpec::new(10, 1)).unwrap();
//!     let per_minute = Quota::new(QuotaSpec::new(100, 60)).unwrap();
//!     let scheduler = Scheduler::new(vec![per_second, per_minute], Strategy::Burst).unwrap();
//!
//!     let answer = scheduler
//!         .submit(|_| async {
//!             // Your remote call here
//!             Ok::<_, std::io::Error>(42)
//!         })
//!         .await
//!         .unwrap();
//!     assert_eq!(answer, 42);
//! }
//! ```

pub mod backoff;
pub mod clock;
pub mod error;
pub mod jitter;
pub mod middleware;
pub mod prelude;
pub mod quota;
pub mod scheduler;
pub mod timer;

// Re-exports
pub use backoff::{Backoff, BackoffConfig, BackoffError, MAX_BACKOFF};
pub use clock::Clock;
pub use error::{ConfigError, PacingError};
pub use jitter::Jitter;
pub use middleware::{PacingLayer, PacingService};
pub use quota::{Quota, QuotaKind, QuotaSpec, QuotaUpdate, Strategy, SYNC_WINDOW};
pub use scheduler::{Scheduler, SchedulerBuilder, Submission, DRAIN_INTERVAL, DRAIN_JITTER};
pub use timer::{ManualTimer, Timer, TimerHandle, TokioTimer};
