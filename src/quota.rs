//! Quotas: one "at most N operations per window" limit.
//!
//! A [`Quota`] tracks how much of its allowance has been used in the current window and
//! resets itself when the window elapses. Quotas are shared handles: cloning one and attaching
//! the clone to several [`crate::Scheduler`]s makes those schedulers respect a single numeric
//! ceiling together.
//!
//! Under [`Strategy::Burst`] ordinary quotas keep a safety margin below the advertised limit,
//! since the remote side may count requests we have not observed yet:
//!
//! | window       | burst ceiling          |
//! |--------------|------------------------|
//! | `<= 5s`      | `floor(requests * 0.75)` |
//! | `> 5s`       | `floor(requests * 0.9)`  |
//!
//! Two placeholder kinds never use the margin. A [`QuotaKind::Sync`] quota admits a single
//! probe while the real limits are still unknown. A [`QuotaKind::Backoff`] quota admits nothing
//! and retires itself once its window elapses.
//!
//! ```rust
//! use quota_pacer::{ManualTimer, Quota, QuotaSpec, Strategy};
//! use std::time::Duration;
//!
//! let timer = ManualTimer::new();
//! let quota = Quota::with_timer(QuotaSpec::new(10, 1), timer.clone()).unwrap();
//! assert_eq!(quota.remaining(Strategy::Burst), 7);
//! assert_eq!(quota.remaining(Strategy::Spread), 10);
//!
//! quota.increment(7);
//! assert!(!quota.check(Strategy::Burst));
//! timer.advance(Duration::from_secs(1));
//! assert!(quota.check(Strategy::Burst));
//! ```

use crate::error::ConfigError;
use crate::timer::{duration_millis, Timer, TimerHandle, TokioTimer};
use std::cmp::Ordering;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Window of the placeholder quota installed while limits are being learned.
pub const SYNC_WINDOW: Duration = Duration::from_secs(7200);

/// Windows up to this length use the tighter burst margin.
pub const SHORT_WINDOW: Duration = Duration::from_secs(5);

static NEXT_QUOTA_ID: AtomicU64 = AtomicU64::new(1);

/// What a quota limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum QuotaKind {
    /// Limit shared by everything an application sends
    #[default]
    App,
    /// Limit scoped to one kind of operation
    Method,
    /// Placeholder admitting one probe while the real limits are unknown
    Sync,
    /// Placeholder admitting nothing until a backoff elapses
    Backoff,
}

impl QuotaKind {
    /// Sync and Backoff quotas stand in for limits rather than describing one.
    pub fn is_placeholder(self) -> bool {
        matches!(self, QuotaKind::Sync | QuotaKind::Backoff)
    }
}

impl fmt::Display for QuotaKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            QuotaKind::App => "app",
            QuotaKind::Method => "method",
            QuotaKind::Sync => "sync",
            QuotaKind::Backoff => "backoff",
        };
        f.write_str(name)
    }
}

/// How a scheduler admits work.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "lowercase"))]
pub enum Strategy {
    /// Admit immediately while allowance (minus the safety margin) remains
    #[default]
    Burst,
    /// Pace admissions evenly across the window
    Spread,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Burst => f.write_str("BURST"),
            Strategy::Spread => f.write_str("SPREAD"),
        }
    }
}

/// Plain description of a quota.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct QuotaSpec {
    /// Operations allowed per window
    pub requests: u64,
    /// Window length
    #[cfg_attr(feature = "serde", serde(rename = "seconds", with = "window_seconds"))]
    pub window: Duration,
    #[cfg_attr(feature = "serde", serde(default))]
    pub kind: QuotaKind,
    /// Operations already used in the current window
    #[cfg_attr(feature = "serde", serde(default))]
    pub count: u64,
}

impl QuotaSpec {
    /// `requests` per `seconds`, of kind [`QuotaKind::App`].
    pub fn new(requests: u64, seconds: u64) -> Self {
        Self::per(requests, Duration::from_secs(seconds))
    }

    pub fn per(requests: u64, window: Duration) -> Self {
        Self { requests, window, kind: QuotaKind::App, count: 0 }
    }

    /// Placeholder admitting a single probe.
    pub fn sync() -> Self {
        Self::per(1, SYNC_WINDOW).with_kind(QuotaKind::Sync)
    }

    /// Placeholder blocking all admissions for `window`.
    pub fn backoff(window: Duration) -> Self {
        Self::per(0, window).with_kind(QuotaKind::Backoff)
    }

    pub fn with_kind(mut self, kind: QuotaKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_count(mut self, count: u64) -> Self {
        self.count = count;
        self
    }

    /// Burst ceiling after the safety margin.
    pub fn safe_burst(&self) -> u64 {
        let requests = u128::from(self.requests);
        let safe = if self.window <= SHORT_WINDOW { requests * 3 / 4 } else { requests * 9 / 10 };
        u64::try_from(safe).unwrap_or(u64::MAX)
    }

    /// Whether two descriptions denote the same limit.
    ///
    /// Placeholders match on kind alone, so a scheduler never carries two of the same
    /// placeholder. Other quotas match on requests and window regardless of kind.
    pub fn equals(&self, other: &QuotaSpec) -> bool {
        if self.kind.is_placeholder() || other.kind.is_placeholder() {
            return self.kind == other.kind;
        }
        self.compare(other) == Ordering::Equal
    }

    /// Orders more permissive limits first: larger `requests`, then longer `window`.
    pub fn compare(&self, other: &QuotaSpec) -> Ordering {
        other.requests.cmp(&self.requests).then_with(|| other.window.cmp(&self.window))
    }

    pub(crate) fn validate(&self) -> Result<(), ConfigError> {
        if self.window.is_zero() {
            return Err(ConfigError::InvalidWindow { window: self.window });
        }
        Ok(())
    }
}

#[cfg(feature = "serde")]
mod window_seconds {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(window: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_f64(window.as_secs_f64())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Duration, D::Error> {
        let seconds = f64::deserialize(deserializer)?;
        Duration::try_from_secs_f64(seconds).map_err(serde::de::Error::custom)
    }
}

/// Partial replacement of a quota's values; unset fields are kept.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QuotaUpdate {
    pub requests: Option<u64>,
    pub window: Option<Duration>,
    pub kind: Option<QuotaKind>,
    pub count: Option<u64>,
}

impl QuotaUpdate {
    pub fn requests(mut self, requests: u64) -> Self {
        self.requests = Some(requests);
        self
    }

    pub fn window(mut self, window: Duration) -> Self {
        self.window = Some(window);
        self
    }

    pub fn kind(mut self, kind: QuotaKind) -> Self {
        self.kind = Some(kind);
        self
    }

    pub fn count(mut self, count: u64) -> Self {
        self.count = Some(count);
        self
    }

    fn apply_to(self, spec: QuotaSpec) -> QuotaSpec {
        QuotaSpec {
            requests: self.requests.unwrap_or(spec.requests),
            window: self.window.unwrap_or(spec.window),
            kind: self.kind.unwrap_or(spec.kind),
            count: self.count.unwrap_or(spec.count),
        }
    }
}

impl From<QuotaSpec> for QuotaUpdate {
    fn from(spec: QuotaSpec) -> Self {
        Self {
            requests: Some(spec.requests),
            window: Some(spec.window),
            kind: Some(spec.kind),
            count: Some(spec.count),
        }
    }
}

/// Transitions a quota reports to the schedulers it is attached to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum QuotaEvent {
    Updated,
    ExceededLimitReset,
    BackoffFinished,
    Removed,
}

/// Receiver of quota transitions. Quotas only hold weak references to observers.
pub(crate) trait QuotaObserver: Send + Sync {
    fn on_quota_event(&self, quota: &Quota, event: QuotaEvent);
}

struct Subscriber {
    id: u64,
    observer: Weak<dyn QuotaObserver>,
}

struct QuotaState {
    spec: QuotaSpec,
    safe_burst: u64,
    last_reset: u64,
    reset_timer: Option<TimerHandle>,
    disposed: bool,
}

impl QuotaState {
    fn replace(&mut self, spec: QuotaSpec) {
        self.spec = spec;
        self.safe_burst = spec.safe_burst();
    }

    fn uses_safety_margin(&self, strategy: Strategy) -> bool {
        strategy == Strategy::Burst && !self.spec.kind.is_placeholder()
    }

    fn max_requests(&self, strategy: Strategy) -> u64 {
        if self.uses_safety_margin(strategy) {
            self.safe_burst
        } else {
            self.spec.requests
        }
    }

    fn remaining(&self, strategy: Strategy) -> u64 {
        self.max_requests(strategy).saturating_sub(self.spec.count)
    }
}

struct QuotaInner {
    id: u64,
    timer: Arc<dyn Timer>,
    state: Mutex<QuotaState>,
    subscribers: Mutex<Vec<Subscriber>>,
}

/// Shared handle to one limit. Clones refer to the same quota.
#[derive(Clone)]
pub struct Quota {
    inner: Arc<QuotaInner>,
}

impl Quota {
    /// Create a quota driven by a [`TokioTimer`]. Must be called inside a tokio runtime for
    /// the window to reset.
    pub fn new(spec: QuotaSpec) -> Result<Self, ConfigError> {
        Self::with_timer(spec, TokioTimer::new())
    }

    pub fn with_timer<T: Timer + 'static>(spec: QuotaSpec, timer: T) -> Result<Self, ConfigError> {
        Self::with_shared_timer(spec, Arc::new(timer))
    }

    pub fn with_shared_timer(spec: QuotaSpec, timer: Arc<dyn Timer>) -> Result<Self, ConfigError> {
        spec.validate()?;
        let last_reset = timer.now_millis();
        let quota = Quota {
            inner: Arc::new(QuotaInner {
                id: NEXT_QUOTA_ID.fetch_add(1, AtomicOrdering::Relaxed),
                timer,
                state: Mutex::new(QuotaState {
                    spec,
                    safe_burst: spec.safe_burst(),
                    last_reset,
                    reset_timer: None,
                    disposed: false,
                }),
                subscribers: Mutex::new(Vec::new()),
            }),
        };
        {
            let mut state = quota.lock_state();
            quota.arm(&mut state);
        }
        Ok(quota)
    }

    fn lock_state(&self) -> MutexGuard<'_, QuotaState> {
        self.inner.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_subscribers(&self) -> MutexGuard<'_, Vec<Subscriber>> {
        self.inner.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn arm(&self, state: &mut QuotaState) {
        if state.disposed {
            return;
        }
        let weak = Arc::downgrade(&self.inner);
        let handle = self.inner.timer.schedule_once(
            state.spec.window,
            Box::new(move || {
                if let Some(inner) = weak.upgrade() {
                    Quota { inner }.reset();
                }
            }),
        );
        state.reset_timer = Some(handle);
    }

    pub(crate) fn id(&self) -> u64 {
        self.inner.id
    }

    /// Whether both handles refer to the same quota.
    pub fn ptr_eq(&self, other: &Quota) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Snapshot of the current values.
    pub fn spec(&self) -> QuotaSpec {
        self.lock_state().spec
    }

    pub fn requests(&self) -> u64 {
        self.lock_state().spec.requests
    }

    pub fn window(&self) -> Duration {
        self.lock_state().spec.window
    }

    pub fn kind(&self) -> QuotaKind {
        self.lock_state().spec.kind
    }

    pub fn count(&self) -> u64 {
        self.lock_state().spec.count
    }

    /// Burst ceiling after the safety margin.
    pub fn safe_burst(&self) -> u64 {
        self.lock_state().safe_burst
    }

    pub fn uses_safety_margin(&self, strategy: Strategy) -> bool {
        self.lock_state().uses_safety_margin(strategy)
    }

    /// Effective ceiling under `strategy`.
    pub fn max_requests(&self, strategy: Strategy) -> u64 {
        self.lock_state().max_requests(strategy)
    }

    /// Allowance left in the current window; never negative.
    pub fn remaining(&self, strategy: Strategy) -> u64 {
        self.lock_state().remaining(strategy)
    }

    /// Whether at least one more operation may be admitted.
    pub fn check(&self, strategy: Strategy) -> bool {
        self.remaining(strategy) != 0
    }

    /// Record `n` operations (one when `n` is zero). Usage is not clamped to the limit.
    pub fn increment(&self, n: u64) {
        let n = if n == 0 { 1 } else { n };
        let mut state = self.lock_state();
        state.spec.count = state.spec.count.saturating_add(n);
    }

    /// Start a new window.
    ///
    /// Driven by the reset timer; calling it directly also restarts the timer. A backoff
    /// quota does not start a new window: it reports that the backoff finished and disposes
    /// itself.
    pub fn reset(&self) {
        let still_exceeded = {
            let mut state = self.lock_state();
            if state.disposed {
                return;
            }
            if state.spec.kind == QuotaKind::Backoff {
                None
            } else {
                state.spec.count = 0;
                state.last_reset = self.inner.timer.now_millis();
                let exceeded = state.remaining(Strategy::Burst) == 0;
                self.arm(&mut state);
                Some(exceeded)
            }
        };
        match still_exceeded {
            None => {
                tracing::debug!(quota = self.inner.id, "backoff window elapsed");
                self.notify(QuotaEvent::BackoffFinished);
                self.dispose();
            }
            Some(true) => {
                tracing::warn!(quota = %self, "quota still exceeded after reset");
                self.notify(QuotaEvent::ExceededLimitReset);
            }
            Some(false) => {}
        }
    }

    /// Replace some or all values, restart the window timer if the quota was or is now
    /// exceeded, and tell every attached scheduler.
    pub fn update(&self, update: impl Into<QuotaUpdate>) -> Result<(), ConfigError> {
        let update = update.into();
        {
            let mut state = self.lock_state();
            let next = update.apply_to(state.spec);
            next.validate()?;
            let was_exceeded = state.remaining(Strategy::Burst) == 0;
            state.replace(next);
            let is_exceeded = state.remaining(Strategy::Burst) == 0;
            if is_exceeded || was_exceeded {
                self.arm(&mut state);
            }
        }
        self.notify(QuotaEvent::Updated);
        Ok(())
    }

    /// Replace all values without touching the timer or notifying anyone.
    pub fn update_silently(&self, spec: QuotaSpec) -> Result<(), ConfigError> {
        spec.validate()?;
        self.lock_state().replace(spec);
        Ok(())
    }

    /// Cancel the pending reset and start a full window from now.
    pub fn restart_timer(&self) {
        let mut state = self.lock_state();
        self.arm(&mut state);
    }

    /// Milliseconds until the window that started at `last_reset` (or one of its successors)
    /// ends.
    ///
    /// When several windows were missed, the result is folded back into one window so it
    /// never goes negative.
    pub fn ms_until_reset(window: Duration, last_reset: u64, now: u64) -> u64 {
        let window_ms = i128::from(duration_millis(window).max(1));
        let remaining = window_ms - (i128::from(now) - i128::from(last_reset));
        let folded = if remaining < 0 { remaining.abs() % window_ms } else { remaining };
        u64::try_from(folded).unwrap_or(u64::MAX)
    }

    pub fn millis_until_reset(&self) -> u64 {
        let (window, last_reset) = {
            let state = self.lock_state();
            (state.spec.window, state.last_reset)
        };
        Self::ms_until_reset(window, last_reset, self.inner.timer.now_millis())
    }

    pub fn seconds_until_reset(&self) -> f64 {
        self.millis_until_reset() as f64 / 1000.0
    }

    /// Gap between admissions that spends the remaining allowance evenly over the rest of
    /// the window.
    pub fn spread_interval(&self) -> Duration {
        let left = {
            let state = self.lock_state();
            state.spec.requests.saturating_sub(state.spec.count).max(1)
        };
        let micros = self.millis_until_reset().saturating_mul(1000) / left;
        Duration::from_micros(micros)
    }

    pub fn equals(&self, other: &Quota) -> bool {
        self.ptr_eq(other) || self.spec().equals(&other.spec())
    }

    pub fn compare(&self, other: &Quota) -> Ordering {
        self.spec().compare(&other.spec())
    }

    /// Cancel the reset timer and detach from every scheduler.
    pub fn dispose(&self) {
        {
            let mut state = self.lock_state();
            state.disposed = true;
            state.reset_timer = None;
        }
        self.notify(QuotaEvent::Removed);
        self.lock_subscribers().clear();
    }

    pub fn is_disposed(&self) -> bool {
        self.lock_state().disposed
    }

    /// Number of live schedulers this quota is attached to.
    pub fn subscriber_count(&self) -> usize {
        self.lock_subscribers().iter().filter(|s| s.observer.strong_count() > 0).count()
    }

    pub(crate) fn subscribe(&self, id: u64, observer: Weak<dyn QuotaObserver>) {
        let mut subscribers = self.lock_subscribers();
        subscribers.retain(|s| s.observer.strong_count() > 0);
        if subscribers.iter().any(|s| s.id == id) {
            return;
        }
        subscribers.push(Subscriber { id, observer });
    }

    pub(crate) fn unsubscribe(&self, id: u64) {
        self.lock_subscribers().retain(|s| s.id != id);
    }

    fn notify(&self, event: QuotaEvent) {
        let observers: Vec<Arc<dyn QuotaObserver>> =
            self.lock_subscribers().iter().filter_map(|s| s.observer.upgrade()).collect();
        for observer in observers {
            observer.on_quota_event(self, event);
        }
    }

    /// Admit one operation against every quota at once: either all of them have allowance
    /// left and all are incremented, or none is touched.
    pub(crate) fn acquire_all(quotas: &[Quota], strategy: Strategy) -> bool {
        let mut guards = Self::lock_all(quotas);
        if guards.iter().any(|state| state.remaining(strategy) == 0) {
            return false;
        }
        for state in guards.iter_mut() {
            state.spec.count = state.spec.count.saturating_add(1);
        }
        true
    }

    /// Record one operation against every quota regardless of allowance.
    pub(crate) fn increment_all(quotas: &[Quota]) {
        for state in Self::lock_all(quotas).iter_mut() {
            state.spec.count = state.spec.count.saturating_add(1);
        }
    }

    // Locks are taken in id order so concurrent schedulers sharing quotas cannot deadlock.
    fn lock_all(quotas: &[Quota]) -> Vec<MutexGuard<'_, QuotaState>> {
        let mut ordered: Vec<&Quota> = quotas.iter().collect();
        ordered.sort_by_key(|quota| quota.inner.id);
        ordered.dedup_by_key(|quota| quota.inner.id);
        ordered.into_iter().map(|quota| quota.lock_state()).collect()
    }
}

impl fmt::Debug for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.lock_state();
        f.debug_struct("Quota")
            .field("id", &self.inner.id)
            .field("spec", &state.spec)
            .field("disposed", &state.disposed)
            .finish()
    }
}

impl fmt::Display for Quota {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let spec = self.spec();
        write!(
            f,
            "{} quota: {}/{} per {}s, resets in {:.3}s",
            spec.kind,
            spec.count,
            spec.requests,
            spec.window.as_secs_f64(),
            self.seconds_until_reset()
        )
    }
}
