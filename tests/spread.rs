mod common;

use common::test_helpers::{quota, scheduler, submit_many};
use quota_pacer::{ManualTimer, QuotaSpec, Strategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn spread_runs_one_operation_per_interval() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Spread);
    let started = Arc::new(AtomicUsize::new(0));

    let _submissions = submit_many(&s, 300, &started);
    assert_eq!(s.queue_size(), 300);
    assert_eq!(started.load(Ordering::SeqCst), 0);

    timer.advance(Duration::from_millis(99));
    assert_eq!(s.queue_size(), 300);

    timer.advance(Duration::from_millis(1));
    assert_eq!(s.queue_size(), 299);
    assert_eq!(started.load(Ordering::SeqCst), 1);

    timer.advance(Duration::from_millis(400));
    assert_eq!(s.queue_size(), 295);
}

#[test]
fn the_slowest_quota_sets_the_interval() {
    let timer = ManualTimer::new();
    let s = scheduler(
        &timer,
        vec![quota(&timer, QuotaSpec::new(10, 1)), quota(&timer, QuotaSpec::new(2, 1))],
        Strategy::Spread,
    );
    let started = Arc::new(AtomicUsize::new(0));

    let _submissions = submit_many(&s, 3, &started);
    timer.advance(Duration::from_millis(499));
    assert_eq!(s.queue_size(), 3);
    timer.advance(Duration::from_millis(1));
    assert_eq!(s.queue_size(), 2);
    assert!(s.status().contains("every 0.500s"));
}

#[test]
fn idle_spread_scheduler_parks_and_wakes_on_submit() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Spread);
    let started = Arc::new(AtomicUsize::new(0));

    timer.advance(Duration::from_millis(100));
    assert!(s.is_paused());

    // Parked and idle: the first submission runs straight away.
    let _first = submit_many(&s, 1, &started);
    assert!(!s.is_paused());
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(s.queue_size(), 0);

    let _second = submit_many(&s, 1, &started);
    assert_eq!(s.queue_size(), 1);
    timer.advance(Duration::from_millis(100));
    assert_eq!(s.queue_size(), 0);
    assert_eq!(started.load(Ordering::SeqCst), 2);
}

#[test]
fn quota_updates_recompute_the_interval() {
    let timer = ManualTimer::new();
    let limit = quota(&timer, QuotaSpec::new(10, 1));
    let s = scheduler(&timer, vec![limit.clone()], Strategy::Spread);
    assert!(s.status().contains("every 0.100s"));

    limit.update(QuotaSpec::new(2, 1)).unwrap();
    assert!(s.status().contains("every 0.500s"));
}

#[test]
fn switching_to_burst_drains_immediately() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Spread);
    let started = Arc::new(AtomicUsize::new(0));

    let _submissions = submit_many(&s, 10, &started);
    assert_eq!(s.queue_size(), 10);

    s.set_strategy(Strategy::Burst);
    assert_eq!(s.strategy(), Strategy::Burst);
    assert_eq!(s.queue_size(), 3);
    assert!(!s.status().contains("every"));
}

#[test]
fn spread_waits_for_the_next_window_when_exhausted() {
    let timer = ManualTimer::new();
    let limit = quota(&timer, QuotaSpec::new(10, 1));
    let s = scheduler(&timer, vec![limit.clone()], Strategy::Spread);
    let started = Arc::new(AtomicUsize::new(0));

    limit.increment(10);
    let _submissions = submit_many(&s, 2, &started);
    timer.advance(Duration::from_millis(900));
    assert_eq!(started.load(Ordering::SeqCst), 0);

    timer.advance(Duration::from_millis(150));
    assert_eq!(started.load(Ordering::SeqCst), 1);
}
