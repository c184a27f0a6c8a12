use futures::future::join_all;
use quota_pacer::{Jitter, Quota, QuotaSpec, Scheduler, Strategy};
use std::io;
use std::time::Duration;
use tokio::time::Instant;

#[tokio::test(start_paused = true)]
async fn burst_completes_every_submission_across_windows() {
    let quota = Quota::new(QuotaSpec::new(10, 1)).unwrap();
    // Offset the drain timer so it always ticks just after the quota resets.
    tokio::time::advance(Duration::from_millis(10)).await;
    let scheduler = Scheduler::builder()
        .quota(quota)
        .strategy(Strategy::Burst)
        .jitter(Jitter::None)
        .build()
        .unwrap();

    let start = Instant::now();
    let submissions =
        (0..20).map(|i| scheduler.submit(move |_| async move { Ok::<_, io::Error>(i) }));
    let results: Vec<_> = join_all(submissions).await.into_iter().map(Result::unwrap).collect();

    assert_eq!(results, (0..20).collect::<Vec<_>>());
    // 7 now, 7 after the first window, 6 after the second.
    assert!(start.elapsed() >= Duration::from_millis(2000));
    assert!(start.elapsed() < Duration::from_millis(3000));
}

#[tokio::test(start_paused = true)]
async fn spread_spaces_submissions_evenly() {
    let quota = Quota::new(QuotaSpec::new(10, 1)).unwrap();
    let scheduler = Scheduler::new(vec![quota], Strategy::Spread).unwrap();

    let start = Instant::now();
    let submissions = (0..5).map(|i| {
        scheduler.submit(move |_| async move { Ok::<_, io::Error>((i, Instant::now())) })
    });
    let results = join_all(submissions).await;

    let mut previous = start;
    for (i, result) in results.into_iter().enumerate() {
        let (index, at) = result.unwrap();
        assert_eq!(index, i);
        assert!(at.duration_since(previous) >= Duration::from_millis(100));
        previous = at;
    }
}

#[tokio::test(start_paused = true)]
async fn backoff_hint_delays_the_next_probe() {
    let quota = Quota::new(QuotaSpec::new(10, 1)).unwrap();
    let scheduler = Scheduler::new(vec![quota], Strategy::Burst).unwrap();

    let start = Instant::now();
    scheduler.backoff(Some(Duration::from_secs(3)));
    let probe = scheduler.submit(|_| async { Ok::<_, io::Error>(Instant::now()) });
    let ran_at = probe.await.unwrap();

    assert!(ran_at.duration_since(start) >= Duration::from_secs(3));
    assert_eq!(scheduler.backoff_until(), None);
}
