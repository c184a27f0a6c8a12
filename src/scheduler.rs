//! Scheduler: decides when each submitted operation runs.
//!
//! A [`Scheduler`] paces operations against every [`Quota`] attached to it. Two strategies
//! are available:
//!
//! - [`Strategy::Burst`]: run immediately while every quota has allowance left (minus its
//!   safety margin); queue the rest and drain the queue roughly once a second.
//! - [`Strategy::Spread`]: run one queued operation per tick, where the tick spreads the
//!   least permissive quota's remaining allowance across the rest of its window.
//!
//! While a [`QuotaKind::Sync`] placeholder is attached the real limits are unknown, and both
//! strategies fall back to draining one probe at a time. A failed probe triggers a backoff.
//!
//! Quick start:
//! ```rust
//! use quota_pacer::{ManualTimer, Quota, QuotaSpec, Scheduler};
//! use std::time::Duration;
//!
//! let timer = ManualTimer::new();
//! let quota = Quota::with_timer(QuotaSpec::new(10, 1), timer.clone()).unwrap();
//! let scheduler = Scheduler::builder().quota(quota).timer(timer.clone()).build().unwrap();
//!
//! let submissions: Vec<_> = (0..10)
//!     .map(|i| scheduler.submit(move |_| async move { Ok::<_, std::io::Error>(i) }))
//!     .collect();
//! assert_eq!(scheduler.queue_size(), 3); // 7 ran straight away
//!
//! timer.advance(Duration::from_millis(1200));
//! assert_eq!(scheduler.queue_size(), 0);
//! # drop(submissions);
//! ```

mod submission;

pub use submission::Submission;
use submission::WorkItem;

use crate::backoff::{Backoff, BackoffConfig};
use crate::error::ConfigError;
use crate::jitter::Jitter;
use crate::quota::{Quota, QuotaEvent, QuotaKind, QuotaObserver, QuotaSpec, Strategy};
use crate::timer::{duration_millis, Timer, TimerHandle, TokioTimer};
use std::collections::VecDeque;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};
use std::time::Duration;

/// Base period of the burst drain timer.
pub const DRAIN_INTERVAL: Duration = Duration::from_millis(1000);

/// Upper bound (exclusive) of the random offset added to the drain period.
pub const DRAIN_JITTER: Duration = Duration::from_millis(100);

static NEXT_SCHEDULER_ID: AtomicU64 = AtomicU64::new(1);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RunState {
    Running,
    /// Paused explicitly; everything queues and no timers run.
    Paused,
    /// Spread scheduler with nothing to do; the next submission wakes it.
    Parked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Pacing {
    Drain,
    Spread,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Placement {
    Back,
    Front,
}

struct SchedulerState {
    strategy: Strategy,
    quotas: Vec<Quota>,
    queue: VecDeque<WorkItem>,
    run: RunState,
    backoff: Backoff,
    backoff_until: Option<u64>,
    drain_timer: Option<TimerHandle>,
    spread_timer: Option<TimerHandle>,
    spread_period: Option<Duration>,
}

impl SchedulerState {
    fn is_initializing(&self) -> bool {
        self.quotas.iter().any(|quota| quota.kind() == QuotaKind::Sync)
    }

    fn pacing(&self) -> Pacing {
        if self.strategy == Strategy::Spread && !self.is_initializing() {
            Pacing::Spread
        } else {
            Pacing::Drain
        }
    }

    fn admits(&self) -> bool {
        !self.quotas.is_empty() && self.quotas.iter().all(|quota| quota.check(self.strategy))
    }

    /// The quota with the least allowance left. Placeholders win ties so a pending probe
    /// is never released in a batch.
    fn binding_quota(&self) -> Option<&Quota> {
        self.quotas
            .iter()
            .min_by_key(|quota| (quota.remaining(self.strategy), !quota.kind().is_placeholder()))
    }

    fn index_of(&self, spec: &QuotaSpec) -> Option<usize> {
        self.quotas.iter().position(|quota| quota.spec().equals(spec))
    }

    fn enqueue(&mut self, item: WorkItem, placement: Placement) {
        match placement {
            Placement::Back => self.queue.push_back(item),
            Placement::Front => self.queue.push_front(item),
        }
    }

    fn cancel_timers(&mut self) {
        self.drain_timer = None;
        self.spread_timer = None;
        self.spread_period = None;
    }
}

struct SchedulerInner {
    id: u64,
    timer: Arc<dyn Timer>,
    jitter: Jitter,
    state: Mutex<SchedulerState>,
    this: Weak<SchedulerInner>,
}

/// Paces submitted operations against a set of quotas.
///
/// `Scheduler` is a cheap handle; clones drive the same queue.
#[derive(Clone)]
pub struct Scheduler {
    inner: Arc<SchedulerInner>,
}

/// Builder for [`Scheduler`].
pub struct SchedulerBuilder {
    quotas: Vec<Quota>,
    strategy: Strategy,
    timer: Option<Arc<dyn Timer>>,
    jitter: Jitter,
    backoff: BackoffConfig,
}

impl Default for SchedulerBuilder {
    fn default() -> Self {
        Self {
            quotas: Vec::new(),
            strategy: Strategy::Burst,
            timer: None,
            jitter: Jitter::Full,
            backoff: BackoffConfig::default(),
        }
    }
}

impl SchedulerBuilder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Attach a quota. Quotas equal to one already added are ignored.
    pub fn quota(mut self, quota: Quota) -> Self {
        self.quotas.push(quota);
        self
    }

    pub fn quotas(mut self, quotas: impl IntoIterator<Item = Quota>) -> Self {
        self.quotas.extend(quotas);
        self
    }

    pub fn strategy(mut self, strategy: Strategy) -> Self {
        self.strategy = strategy;
        self
    }

    /// Timer used for draining and for quotas the scheduler creates itself. Defaults to a
    /// [`TokioTimer`].
    pub fn timer<T: Timer + 'static>(self, timer: T) -> Self {
        self.shared_timer(Arc::new(timer))
    }

    pub fn shared_timer(mut self, timer: Arc<dyn Timer>) -> Self {
        self.timer = Some(timer);
        self
    }

    /// Offset applied to each drain period. Defaults to [`Jitter::Full`].
    pub fn jitter(mut self, jitter: Jitter) -> Self {
        self.jitter = jitter;
        self
    }

    pub fn backoff(mut self, backoff: BackoffConfig) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn build(self) -> Result<Scheduler, ConfigError> {
        if self.quotas.is_empty() {
            return Err(ConfigError::NoQuotas);
        }
        let timer: Arc<dyn Timer> = match self.timer {
            Some(timer) => timer,
            None => Arc::new(TokioTimer::new()),
        };
        let inner = Arc::new_cyclic(|this| SchedulerInner {
            id: NEXT_SCHEDULER_ID.fetch_add(1, Ordering::Relaxed),
            timer,
            jitter: self.jitter,
            state: Mutex::new(SchedulerState {
                strategy: self.strategy,
                quotas: Vec::new(),
                queue: VecDeque::new(),
                run: RunState::Running,
                backoff: Backoff::new(self.backoff),
                backoff_until: None,
                drain_timer: None,
                spread_timer: None,
                spread_period: None,
            }),
            this: this.clone(),
        });
        {
            let mut state = inner.lock();
            for quota in self.quotas {
                if state.index_of(&quota.spec()).is_none() {
                    quota.subscribe(inner.id, inner.observer());
                    state.quotas.push(quota);
                }
            }
        }
        inner.refresh();
        tracing::debug!(scheduler = inner.id, strategy = %self.strategy, "scheduler created");
        Ok(Scheduler { inner })
    }
}

impl Scheduler {
    pub fn builder() -> SchedulerBuilder {
        SchedulerBuilder::new()
    }

    /// Scheduler over `quotas` with the default timer, jitter and backoff.
    pub fn new(quotas: Vec<Quota>, strategy: Strategy) -> Result<Self, ConfigError> {
        Self::builder().quotas(quotas).strategy(strategy).build()
    }

    /// Submit an operation. It runs now if the quotas allow, otherwise when its turn comes.
    ///
    /// The operation receives the scheduler so it can resubmit work cooperatively.
    pub fn submit<T, E, F, Fut>(&self, operation: F) -> Submission<T, E>
    where
        F: FnOnce(Scheduler) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (item, submission) = WorkItem::new(operation);
        self.inner.schedule(item, Placement::Back);
        submission
    }

    /// Like [`Scheduler::submit`], but if the operation has to wait it goes to the front of
    /// the queue.
    pub fn reschedule<T, E, F, Fut>(&self, operation: F) -> Submission<T, E>
    where
        F: FnOnce(Scheduler) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (item, submission) = WorkItem::new(operation);
        self.inner.schedule(item, Placement::Front);
        submission
    }

    /// Attach `quota`, or merge it into the attached placeholder of the same kind.
    ///
    /// Returns the quota that ends up attached: `quota` itself, or the existing equal one.
    pub fn add_or_update_limit(&self, quota: Quota) -> Quota {
        self.inner.add_or_update_limit(quota)
    }

    /// Detach the quota equal to `quota`, if any.
    ///
    /// Removing the last quota attaches a fresh sync placeholder, so the scheduler goes back
    /// to probing instead of running unpaced.
    pub fn remove_limit(&self, quota: &Quota) -> Option<Quota> {
        let removed = self.inner.detach_equal(&quota.spec());
        self.inner.ensure_quota_present();
        removed
    }

    /// Replace the attached quotas with `limits`.
    ///
    /// Quotas without an equal entry are detached and entries without an equal quota are
    /// attached. While initializing, quotas that stay get the new values, usage included.
    pub fn update_limits(&self, limits: &[QuotaSpec]) -> Result<(), ConfigError> {
        if limits.is_empty() {
            return Err(ConfigError::NoQuotas);
        }
        for spec in limits {
            spec.validate()?;
        }
        self.pause();
        let result = self.inner.apply_limits(limits);
        self.unpause();
        result
    }

    /// Stop admitting work after a rate-limit violation.
    ///
    /// With `retry_after` the delay is that hint and the exponential state is reset;
    /// without it the delay grows on every call. Returns the effective delay.
    pub fn backoff(&self, retry_after: Option<Duration>) -> Duration {
        self.inner.backoff(retry_after)
    }

    /// Forget previous backoffs.
    pub fn reset_backoff(&self) {
        let mut state = self.inner.lock();
        state.backoff.reset();
        state.backoff_until = None;
    }

    pub fn set_strategy(&self, strategy: Strategy) {
        self.inner.lock().strategy = strategy;
        tracing::info!(scheduler = self.inner.id, strategy = %strategy, "strategy changed");
        self.inner.refresh();
    }

    /// Queue everything and stop all timers until [`Scheduler::unpause`].
    pub fn pause(&self) {
        let mut state = self.inner.lock();
        state.run = RunState::Paused;
        state.cancel_timers();
    }

    /// Resume admissions; queued work may start immediately.
    pub fn unpause(&self) {
        {
            let mut state = self.inner.lock();
            if state.run == RunState::Paused {
                state.run = RunState::Running;
            }
        }
        self.inner.refresh();
    }

    pub fn queue_size(&self) -> usize {
        self.inner.lock().queue.len()
    }

    /// True while paused explicitly or parked for lack of work.
    pub fn is_paused(&self) -> bool {
        self.inner.lock().run != RunState::Running
    }

    /// True while a sync placeholder is attached, i.e. the real limits are still unknown.
    pub fn is_initializing(&self) -> bool {
        self.inner.lock().is_initializing()
    }

    pub fn strategy(&self) -> Strategy {
        self.inner.lock().strategy
    }

    /// Attached quotas, in attachment order.
    pub fn quotas(&self) -> Vec<Quota> {
        self.inner.lock().quotas.clone()
    }

    /// Clock reading (ms, on this scheduler's timer) when the current backoff ends.
    pub fn backoff_until(&self) -> Option<u64> {
        self.inner.lock().backoff_until
    }

    /// Delay the next unexplained backoff starts from.
    pub fn backoff_duration(&self) -> Duration {
        self.inner.lock().backoff.current()
    }

    /// Human-readable summary of the scheduler and its quotas.
    pub fn status(&self) -> String {
        self.to_string()
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.inner.lock();
        f.debug_struct("Scheduler")
            .field("id", &self.inner.id)
            .field("strategy", &state.strategy)
            .field("run", &state.run)
            .field("queued", &state.queue.len())
            .field("quotas", &state.quotas.len())
            .finish()
    }
}

impl fmt::Display for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (strategy, run, queued, quotas, spread_period, backoff_until) = {
            let state = self.inner.lock();
            (
                state.strategy,
                state.run,
                state.queue.len(),
                state.quotas.clone(),
                state.spread_period,
                state.backoff_until,
            )
        };
        let run = match run {
            RunState::Running => "running",
            RunState::Paused => "paused",
            RunState::Parked => "parked",
        };
        write!(f, "{} scheduler ({}), {} queued", strategy, run, queued)?;
        if let Some(period) = spread_period {
            write!(f, ", next spread execution every {:.3}s", period.as_secs_f64())?;
        }
        if let Some(until) = backoff_until {
            write!(f, ", backing off until {}ms", until)?;
        }
        let quotas: Vec<String> = quotas.iter().map(ToString::to_string).collect();
        write!(f, ", quotas: [{}]", quotas.join("; "))
    }
}

impl SchedulerInner {
    fn lock(&self) -> MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn handle(&self) -> Option<Scheduler> {
        self.this.upgrade().map(|inner| Scheduler { inner })
    }

    fn observer(&self) -> Weak<dyn QuotaObserver> {
        self.this.clone()
    }

    fn launch(&self, item: WorkItem, probe: bool) {
        if let Some(scheduler) = self.handle() {
            item.launch(scheduler, probe);
        }
    }

    fn schedule(&self, item: WorkItem, placement: Placement) {
        let admitted = {
            let mut state = self.lock();
            if state.run == RunState::Parked {
                state.run = RunState::Running;
            }
            let running = state.run == RunState::Running;
            match state.pacing() {
                Pacing::Drain => {
                    if running && Quota::acquire_all(&state.quotas, state.strategy) {
                        Some(item)
                    } else {
                        state.enqueue(item, placement);
                        self.ensure_drain_timer(&mut state);
                        None
                    }
                }
                Pacing::Spread => {
                    let idle = state.queue.is_empty()
                        && state.spread_timer.is_none()
                        && !state.quotas.is_empty();
                    if running && idle {
                        Quota::increment_all(&state.quotas);
                        self.ensure_spread_timer(&mut state);
                        Some(item)
                    } else {
                        state.enqueue(item, placement);
                        self.ensure_spread_timer(&mut state);
                        None
                    }
                }
            }
        };
        match admitted {
            Some(item) => {
                tracing::debug!(scheduler = self.id, "admitted immediately");
                self.launch(item, false);
            }
            None => tracing::debug!(scheduler = self.id, queued = self.lock().queue.len(), "queued"),
        }
    }

    fn ensure_drain_timer(&self, state: &mut SchedulerState) {
        if state.run != RunState::Running || state.drain_timer.is_some() {
            return;
        }
        let period = DRAIN_INTERVAL + self.jitter.apply(DRAIN_JITTER);
        let this = self.this.clone();
        state.drain_timer = Some(self.timer.schedule_every(
            period,
            Arc::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.drain();
                }
            }),
        ));
    }

    fn ensure_spread_timer(&self, state: &mut SchedulerState) {
        if state.run != RunState::Running || state.spread_timer.is_some() {
            return;
        }
        let period = state
            .quotas
            .iter()
            .map(Quota::spread_interval)
            .max()
            .unwrap_or(DRAIN_INTERVAL)
            .max(Duration::from_millis(1));
        let this = self.this.clone();
        state.spread_period = Some(period);
        state.spread_timer = Some(self.timer.schedule_every(
            period,
            Arc::new(move || {
                if let Some(inner) = this.upgrade() {
                    inner.spread_tick();
                }
            }),
        ));
    }

    /// Release as many queued items as the binding quota allows.
    fn drain(&self) {
        let (batch, probe) = {
            let mut state = self.lock();
            if state.run != RunState::Running {
                return;
            }
            if state.queue.is_empty() {
                state.drain_timer = None;
                return;
            }
            if !state.admits() {
                return;
            }
            let Some(binding) = state.binding_quota() else {
                return;
            };
            let probe = binding.kind() == QuotaKind::Sync;
            let allowance = if probe { 1 } else { binding.remaining(state.strategy) };
            let take = usize::try_from(allowance).unwrap_or(usize::MAX).min(state.queue.len());
            (state.queue.drain(..take).collect::<Vec<_>>(), probe)
        };
        tracing::debug!(scheduler = self.id, released = batch.len(), probe, "draining queue");

        let mut deferred = Vec::new();
        for item in batch {
            let admitted = {
                let state = self.lock();
                state.run == RunState::Running && Quota::acquire_all(&state.quotas, state.strategy)
            };
            if admitted {
                self.launch(item, probe);
            } else {
                deferred.push(item);
            }
        }

        let mut state = self.lock();
        for item in deferred.into_iter().rev() {
            state.queue.push_front(item);
        }
        if state.queue.is_empty() {
            state.drain_timer = None;
        } else if state.pacing() == Pacing::Drain {
            self.ensure_drain_timer(&mut state);
        }
    }

    fn spread_tick(&self) {
        let item = {
            let mut state = self.lock();
            if state.run != RunState::Running {
                return;
            }
            if state.queue.is_empty() {
                state.run = RunState::Parked;
                state.cancel_timers();
                tracing::debug!(scheduler = self.id, "queue empty; parking");
                return;
            }
            if !state.admits() {
                tracing::debug!(scheduler = self.id, "spread tick blocked by quotas");
                return;
            }
            Quota::increment_all(&state.quotas);
            state.queue.pop_front()
        };
        if let Some(item) = item {
            self.launch(item, false);
        }
    }

    /// Restart timers for the current strategy.
    fn refresh(&self) {
        let pacing = {
            let mut state = self.lock();
            state.cancel_timers();
            if state.run == RunState::Paused {
                return;
            }
            state.run = RunState::Running;
            state.pacing()
        };
        match pacing {
            Pacing::Drain => {
                self.drain();
                let mut state = self.lock();
                if !state.queue.is_empty() && state.pacing() == Pacing::Drain {
                    self.ensure_drain_timer(&mut state);
                }
            }
            Pacing::Spread => {
                let mut state = self.lock();
                self.ensure_spread_timer(&mut state);
            }
        }
    }

    fn add_or_update_limit(&self, quota: Quota) -> Quota {
        enum Outcome {
            Attached,
            Merge(Quota),
            Existing(Quota),
        }

        let spec = quota.spec();
        let (outcome, strategy) = {
            let mut state = self.lock();
            let outcome = match state.index_of(&spec) {
                None => {
                    quota.subscribe(self.id, self.observer());
                    state.quotas.push(quota.clone());
                    Outcome::Attached
                }
                Some(index) if spec.kind.is_placeholder() => Outcome::Merge(state.quotas[index].clone()),
                Some(index) => Outcome::Existing(state.quotas[index].clone()),
            };
            (outcome, state.strategy)
        };

        match outcome {
            Outcome::Attached => {
                if spec.kind.is_placeholder() {
                    tracing::info!(scheduler = self.id, quota = %quota, "placeholder quota attached");
                } else {
                    tracing::debug!(scheduler = self.id, quota = %quota, "quota attached");
                }
                if strategy == Strategy::Spread {
                    self.refresh();
                }
                quota
            }
            Outcome::Merge(existing) => {
                if let Err(err) = existing.update_silently(spec) {
                    tracing::warn!(scheduler = self.id, error = %err, "placeholder merge rejected");
                }
                existing.restart_timer();
                if spec.kind == QuotaKind::Sync {
                    let queued = {
                        let mut state = self.lock();
                        state.cancel_timers();
                        !state.queue.is_empty()
                    };
                    if queued {
                        self.refresh();
                    }
                }
                existing
            }
            Outcome::Existing(existing) => existing,
        }
    }

    fn detach_equal(&self, spec: &QuotaSpec) -> Option<Quota> {
        let removed = {
            let mut state = self.lock();
            let index = state.index_of(spec)?;
            state.quotas.remove(index)
        };
        removed.unsubscribe(self.id);
        tracing::debug!(scheduler = self.id, quota = %removed, "quota detached");
        Some(removed)
    }

    fn detach_exact(&self, quota: &Quota) -> bool {
        let removed = {
            let mut state = self.lock();
            let before = state.quotas.len();
            state.quotas.retain(|attached| !attached.ptr_eq(quota));
            before != state.quotas.len()
        };
        if removed {
            quota.unsubscribe(self.id);
        }
        removed
    }

    fn ensure_quota_present(&self) {
        if !self.lock().quotas.is_empty() {
            return;
        }
        match Quota::with_shared_timer(QuotaSpec::sync(), self.timer.clone()) {
            Ok(sync) => {
                self.add_or_update_limit(sync);
            }
            Err(err) => tracing::warn!(scheduler = self.id, error = %err, "sync quota rejected"),
        }
    }

    fn apply_limits(&self, limits: &[QuotaSpec]) -> Result<(), ConfigError> {
        let stale: Vec<QuotaSpec> = {
            let state = self.lock();
            state
                .quotas
                .iter()
                .map(Quota::spec)
                .filter(|attached| !limits.iter().any(|spec| attached.equals(spec)))
                .collect()
        };
        for spec in &stale {
            self.detach_equal(spec);
        }

        let (initializing, attached) = {
            let state = self.lock();
            (state.is_initializing(), state.quotas.clone())
        };
        if initializing {
            for quota in &attached {
                let current = quota.spec();
                if let Some(spec) = limits.iter().find(|spec| current.equals(spec)) {
                    quota.update(*spec)?;
                }
            }
        }

        for spec in limits {
            let known = self.lock().index_of(spec).is_some();
            if !known {
                let quota = Quota::with_shared_timer(*spec, self.timer.clone())?;
                self.add_or_update_limit(quota);
            }
        }
        tracing::info!(
            scheduler = self.id,
            removed = stale.len(),
            quotas = self.lock().quotas.len(),
            "limits updated"
        );
        Ok(())
    }

    fn backoff(&self, retry_after: Option<Duration>) -> Duration {
        let delay = {
            let mut state = self.lock();
            let delay = state.backoff.next_delay(retry_after);
            state.backoff_until = Some(self.timer.now_millis().saturating_add(duration_millis(delay)));
            delay
        };
        tracing::warn!(
            scheduler = self.id,
            delay_ms = duration_millis(delay),
            explicit = retry_after.is_some(),
            "backing off"
        );
        for spec in [QuotaSpec::backoff(delay), QuotaSpec::sync()] {
            match Quota::with_shared_timer(spec, self.timer.clone()) {
                Ok(quota) => {
                    self.add_or_update_limit(quota);
                }
                Err(err) => tracing::warn!(scheduler = self.id, error = %err, "placeholder rejected"),
            }
        }
        delay
    }

    fn add_sync_quota(&self) {
        match Quota::with_shared_timer(QuotaSpec::sync(), self.timer.clone()) {
            Ok(sync) => {
                self.add_or_update_limit(sync);
            }
            Err(err) => tracing::warn!(scheduler = self.id, error = %err, "sync quota rejected"),
        }
    }
}

impl QuotaObserver for SchedulerInner {
    fn on_quota_event(&self, quota: &Quota, event: QuotaEvent) {
        let (attached, strategy) = {
            let state = self.lock();
            (state.quotas.iter().any(|q| q.ptr_eq(quota)), state.strategy)
        };
        if !attached {
            tracing::debug!(
                scheduler = self.id,
                quota = quota.id(),
                ?event,
                "notified by a quota that is not attached"
            );
        }
        match event {
            QuotaEvent::Updated => {
                if strategy == Strategy::Spread {
                    self.refresh();
                }
            }
            QuotaEvent::ExceededLimitReset => self.add_sync_quota(),
            QuotaEvent::BackoffFinished => {
                self.lock().backoff_until = None;
                self.add_sync_quota();
            }
            QuotaEvent::Removed => {
                let detached = self.detach_exact(quota);
                self.ensure_quota_present();
                // The removed quota may have been the only thing blocking admission.
                if detached && !self.lock().queue.is_empty() {
                    self.refresh();
                }
            }
        }
    }
}

impl Drop for SchedulerInner {
    fn drop(&mut self) {
        let state = self.state.get_mut().unwrap_or_else(PoisonError::into_inner);
        for quota in &state.quotas {
            quota.unsubscribe(self.id);
        }
    }
}
