use quota_pacer::{Jitter, ManualTimer, Quota, QuotaSpec, Scheduler, Strategy, Submission};
use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

pub fn quota(timer: &ManualTimer, spec: QuotaSpec) -> Quota {
    Quota::with_timer(spec, timer.clone()).expect("valid quota")
}

/// Scheduler on virtual time with a fixed drain period.
pub fn scheduler(timer: &ManualTimer, quotas: Vec<Quota>, strategy: Strategy) -> Scheduler {
    Scheduler::builder()
        .quotas(quotas)
        .strategy(strategy)
        .timer(timer.clone())
        .jitter(Jitter::None)
        .build()
        .expect("scheduler with quotas")
}

/// Submit `n` operations that record when they were invoked and yield their index.
pub fn submit_many(
    scheduler: &Scheduler,
    n: usize,
    started: &Arc<AtomicUsize>,
) -> Vec<Submission<usize, io::Error>> {
    (0..n)
        .map(|i| {
            let started = started.clone();
            scheduler.submit(move |_| {
                started.fetch_add(1, Ordering::SeqCst);
                async move { Ok(i) }
            })
        })
        .collect()
}

/// Operation that records its index in `log` when invoked.
pub fn recording_op(
    log: &Arc<std::sync::Mutex<Vec<usize>>>,
    i: usize,
) -> impl FnOnce(Scheduler) -> futures::future::Ready<Result<usize, io::Error>> + Send + 'static {
    let log = log.clone();
    move |_| {
        log.lock().unwrap().push(i);
        futures::future::ready(Ok(i))
    }
}
