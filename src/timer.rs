//! Cancellable timers driving quota resets and scheduler draining.
//!
//! Enables fast, deterministic tests without real time delays:
//! - [`TokioTimer`]: spawns a tokio task per timer; honours `tokio::time::pause`.
//! - [`ManualTimer`]: virtual time that only moves when [`ManualTimer::advance`] is called.
//!
//! Every scheduled callback is owned by a [`TimerHandle`]. Cancelling or dropping the handle
//! guarantees the callback will not run again.

use crate::clock::Clock;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::AbortHandle;

/// Callback fired once when a timer elapses.
pub type TimerCallback = Box<dyn FnOnce() + Send + 'static>;

/// Callback fired on every period of a repeating timer.
pub type RepeatingCallback = Arc<dyn Fn() + Send + Sync + 'static>;

/// Source of time and of delayed callbacks.
pub trait Timer: Clock {
    /// Run `callback` once after `delay`.
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle;

    /// Run `callback` every `period` until the returned handle is cancelled or dropped.
    fn schedule_every(&self, period: Duration, callback: RepeatingCallback) -> TimerHandle;
}

/// Ownership token for a scheduled callback. Dropping it cancels the callback.
#[derive(Debug)]
pub struct TimerHandle {
    cancelled: Arc<AtomicBool>,
    task: Option<AbortHandle>,
}

impl TimerHandle {
    fn new(cancelled: Arc<AtomicBool>, task: Option<AbortHandle>) -> Self {
        Self { cancelled, task }
    }

    /// A handle that owns nothing; it reports itself as cancelled.
    pub fn inert() -> Self {
        Self { cancelled: Arc::new(AtomicBool::new(true)), task: None }
    }

    /// Prevent the callback from running again.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
        if let Some(task) = &self.task {
            task.abort();
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }
}

impl Drop for TimerHandle {
    fn drop(&mut self) {
        self.cancel();
    }
}

pub(crate) fn duration_millis(duration: Duration) -> u64 {
    u64::try_from(duration.as_millis()).unwrap_or(u64::MAX)
}

/// Production timer using the tokio runtime.
///
/// Timers are spawned on the runtime that is current when they are scheduled. Scheduling
/// outside a runtime logs a warning and returns an inert handle, so quotas created there
/// never reset on their own. Readings are measured from the moment the timer was created and
/// follow tokio's clock, so they honour paused test time.
#[derive(Debug, Clone, Copy)]
pub struct TokioTimer {
    origin: tokio::time::Instant,
}

impl TokioTimer {
    pub fn new() -> Self {
        Self { origin: tokio::time::Instant::now() }
    }
}

impl Default for TokioTimer {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TokioTimer {
    fn now_millis(&self) -> u64 {
        duration_millis(tokio::time::Instant::now().saturating_duration_since(self.origin))
    }
}

impl Timer for TokioTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(delay_ms = duration_millis(delay), "no tokio runtime; timer will not fire");
            return TimerHandle::inert();
        };
        // Deadlines are taken now, not when the spawned task is first polled.
        let deadline = tokio::time::Instant::now() + delay;
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let task = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if !flag.load(Ordering::SeqCst) {
                callback();
            }
        });
        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }

    fn schedule_every(&self, period: Duration, callback: RepeatingCallback) -> TimerHandle {
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            tracing::warn!(
                period_ms = duration_millis(period),
                "no tokio runtime; repeating timer will not fire"
            );
            return TimerHandle::inert();
        };
        let period = period.max(Duration::from_millis(1));
        let mut deadline = tokio::time::Instant::now() + period;
        let cancelled = Arc::new(AtomicBool::new(false));
        let flag = cancelled.clone();
        let task = runtime.spawn(async move {
            loop {
                tokio::time::sleep_until(deadline).await;
                if flag.load(Ordering::SeqCst) {
                    break;
                }
                callback();
                deadline += period;
            }
        });
        TimerHandle::new(cancelled, Some(task.abort_handle()))
    }
}

/// Deterministic timer for tests: time only moves through [`ManualTimer::advance`].
///
/// Clones share the same virtual clock, so one instance can be handed to every quota and
/// scheduler under test.
#[derive(Debug, Clone, Default)]
pub struct ManualTimer {
    state: Arc<Mutex<ManualState>>,
}

#[derive(Default)]
struct ManualState {
    now: u64,
    next_seq: u64,
    entries: Vec<Entry>,
}

impl fmt::Debug for ManualState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ManualState")
            .field("now", &self.now)
            .field("entries", &self.entries.len())
            .finish()
    }
}

struct Entry {
    deadline: u64,
    seq: u64,
    cancelled: Arc<AtomicBool>,
    task: ManualTask,
}

enum ManualTask {
    Once(TimerCallback),
    Every { period: u64, callback: RepeatingCallback },
}

enum Due {
    Once(TimerCallback),
    Every(RepeatingCallback),
}

impl ManualState {
    fn push(&mut self, deadline: u64, cancelled: Arc<AtomicBool>, task: ManualTask) {
        let seq = self.next_seq;
        self.next_seq += 1;
        self.entries.push(Entry { deadline, seq, cancelled, task });
    }
}

impl ManualTimer {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, ManualState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Move virtual time forward, firing every callback that falls due on the way.
    ///
    /// Callbacks fire in deadline order (ties in scheduling order) with the clock set to
    /// their deadline. Timers scheduled by a callback fire within the same call if they are
    /// due before the target.
    pub fn advance(&self, by: Duration) {
        let target = self.lock().now.saturating_add(duration_millis(by));
        while let Some(due) = self.pop_due(target) {
            match due {
                Due::Once(callback) => callback(),
                Due::Every(callback) => callback(),
            }
        }
        let mut state = self.lock();
        state.now = state.now.max(target);
    }

    fn pop_due(&self, target: u64) -> Option<Due> {
        let mut state = self.lock();
        state.entries.retain(|entry| !entry.cancelled.load(Ordering::SeqCst));
        let index = state
            .entries
            .iter()
            .enumerate()
            .filter(|(_, entry)| entry.deadline <= target)
            .min_by_key(|(_, entry)| (entry.deadline, entry.seq))
            .map(|(index, _)| index)?;
        let entry = state.entries.swap_remove(index);
        state.now = state.now.max(entry.deadline);
        match entry.task {
            ManualTask::Once(callback) => Some(Due::Once(callback)),
            ManualTask::Every { period, callback } => {
                let next = entry.deadline.saturating_add(period);
                state.push(
                    next,
                    entry.cancelled,
                    ManualTask::Every { period, callback: callback.clone() },
                );
                Some(Due::Every(callback))
            }
        }
    }

    /// Number of live (not yet fired, not cancelled) timers.
    pub fn pending(&self) -> usize {
        self.lock().entries.iter().filter(|entry| !entry.cancelled.load(Ordering::SeqCst)).count()
    }
}

impl Clock for ManualTimer {
    fn now_millis(&self) -> u64 {
        self.lock().now
    }
}

impl Timer for ManualTimer {
    fn schedule_once(&self, delay: Duration, callback: TimerCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let mut state = self.lock();
        let deadline = state.now.saturating_add(duration_millis(delay));
        state.push(deadline, cancelled.clone(), ManualTask::Once(callback));
        TimerHandle::new(cancelled, None)
    }

    fn schedule_every(&self, period: Duration, callback: RepeatingCallback) -> TimerHandle {
        let cancelled = Arc::new(AtomicBool::new(false));
        let period = duration_millis(period).max(1);
        let mut state = self.lock();
        let deadline = state.now.saturating_add(period);
        state.push(deadline, cancelled.clone(), ManualTask::Every { period, callback });
        TimerHandle::new(cancelled, None)
    }
}
