mod common;

use common::test_helpers::{quota, scheduler, submit_many};
use quota_pacer::{ConfigError, ManualTimer, QuotaKind, QuotaSpec, Scheduler, Strategy};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[test]
fn a_scheduler_needs_at_least_one_quota() {
    let timer = ManualTimer::new();
    let err = Scheduler::builder().timer(timer).build().unwrap_err();
    assert_eq!(err, ConfigError::NoQuotas);
    assert_eq!(Scheduler::new(Vec::new(), Strategy::Burst).unwrap_err(), ConfigError::NoQuotas);
}

#[test]
fn add_or_update_limit_attaches_new_limits() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Burst);

    let hourly = quota(&timer, QuotaSpec::new(1000, 3600));
    let attached = s.add_or_update_limit(hourly.clone());
    assert!(attached.ptr_eq(&hourly));
    assert_eq!(s.quotas().len(), 2);
    assert_eq!(hourly.subscriber_count(), 1);
}

#[test]
fn equal_limits_are_not_duplicated() {
    let timer = ManualTimer::new();
    let original = quota(&timer, QuotaSpec::new(10, 1));
    let s = scheduler(&timer, vec![original.clone()], Strategy::Burst);

    let twin = quota(&timer, QuotaSpec::new(10, 1).with_kind(QuotaKind::Method));
    let attached = s.add_or_update_limit(twin.clone());
    assert!(attached.ptr_eq(&original));
    assert_eq!(s.quotas().len(), 1);
    assert_eq!(twin.subscriber_count(), 0);
}

#[test]
fn placeholders_merge_into_the_attached_one() {
    let timer = ManualTimer::new();
    let sync = quota(&timer, QuotaSpec::sync());
    let s = scheduler(&timer, vec![sync.clone()], Strategy::Burst);

    let used = quota(&timer, QuotaSpec::sync().with_count(1));
    let attached = s.add_or_update_limit(used);
    assert!(attached.ptr_eq(&sync));
    assert_eq!(sync.count(), 1);
    assert_eq!(s.quotas().len(), 1);
}

#[test]
fn remove_limit_detaches_by_equality() {
    let timer = ManualTimer::new();
    let minute = quota(&timer, QuotaSpec::new(100, 60));
    let s = scheduler(
        &timer,
        vec![quota(&timer, QuotaSpec::new(10, 1)), minute.clone()],
        Strategy::Burst,
    );

    let removed = s.remove_limit(&quota(&timer, QuotaSpec::new(100, 60))).unwrap();
    assert!(removed.ptr_eq(&minute));
    assert_eq!(minute.subscriber_count(), 0);
    assert_eq!(s.quotas().len(), 1);
    assert!(s.remove_limit(&minute).is_none());
}

#[test]
fn removing_the_last_limit_falls_back_to_probing() {
    let timer = ManualTimer::new();
    let only = quota(&timer, QuotaSpec::new(10, 1));
    let s = scheduler(&timer, vec![only.clone()], Strategy::Burst);

    s.remove_limit(&only);
    assert_eq!(s.quotas().len(), 1);
    assert!(s.is_initializing());
}

#[test]
fn update_limits_replaces_the_probe_with_real_limits() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::sync())], Strategy::Burst);
    let started = Arc::new(AtomicUsize::new(0));

    let _submissions = submit_many(&s, 3, &started);
    assert_eq!(started.load(Ordering::SeqCst), 1);
    assert_eq!(s.queue_size(), 2);

    s.update_limits(&[QuotaSpec::new(10, 1), QuotaSpec::new(100, 60)]).unwrap();
    assert!(!s.is_initializing());
    assert!(!s.is_paused());
    assert_eq!(s.quotas().len(), 2);
    assert_eq!(s.queue_size(), 0);
    assert_eq!(started.load(Ordering::SeqCst), 3);
}

#[test]
fn update_limits_updates_in_place_while_initializing() {
    let timer = ManualTimer::new();
    let second = quota(&timer, QuotaSpec::new(10, 1));
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::sync()), second.clone()], Strategy::Burst);

    s.update_limits(&[QuotaSpec::sync(), QuotaSpec::new(10, 1).with_count(4)]).unwrap();
    assert!(s.is_initializing());
    assert_eq!(second.count(), 4);
    assert!(s.quotas().iter().any(|q| q.ptr_eq(&second)));
}

#[test]
fn update_limits_keeps_usage_once_initialized() {
    let timer = ManualTimer::new();
    let second = quota(&timer, QuotaSpec::new(10, 1));
    let s = scheduler(&timer, vec![second.clone()], Strategy::Burst);
    second.increment(2);

    s.update_limits(&[QuotaSpec::new(10, 1).with_count(4)]).unwrap();
    assert_eq!(second.count(), 2);
}

#[test]
fn update_limits_rejects_bad_batches() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Burst);

    assert_eq!(s.update_limits(&[]), Err(ConfigError::NoQuotas));
    assert_eq!(
        s.update_limits(&[QuotaSpec::per(10, Duration::ZERO)]),
        Err(ConfigError::InvalidWindow { window: Duration::ZERO })
    );
    assert!(!s.is_paused());
    assert_eq!(s.quotas().len(), 1);
}

#[test]
fn attaching_to_a_spread_scheduler_recomputes_its_interval() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Spread);
    assert!(s.status().contains("every 0.100s"));

    s.add_or_update_limit(quota(&timer, QuotaSpec::new(4, 1)));
    assert!(s.status().contains("every 0.250s"));
}

#[test]
fn status_describes_the_scheduler() {
    let timer = ManualTimer::new();
    let s = scheduler(&timer, vec![quota(&timer, QuotaSpec::new(10, 1))], Strategy::Burst);
    let started = Arc::new(AtomicUsize::new(0));
    let _submissions = submit_many(&s, 9, &started);

    let status = s.status();
    assert!(status.starts_with("BURST scheduler (running), 2 queued"), "{status}");
    assert!(status.contains("app quota: 7/10 per 1s"), "{status}");
    assert_eq!(status, s.to_string());
}
