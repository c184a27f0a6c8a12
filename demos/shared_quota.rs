//! Two schedulers sharing one application-wide quota, each with its own method quota.
use quota_pacer::prelude::*;
use std::time::Duration;

#[tokio::main]
async fn main() -> Result<(), ConfigError> {
    tracing_subscriber::fmt().with_max_level(tracing::Level::INFO).init();

    let app = Quota::new(QuotaSpec::new(20, 1))?;
    let search = Scheduler::builder()
        .quota(app.clone())
        .quota(Quota::new(QuotaSpec::new(10, 1).with_kind(QuotaKind::Method))?)
        .build()?;
    let upload = Scheduler::builder()
        .quota(app.clone())
        .quota(Quota::new(QuotaSpec::new(5, 1).with_kind(QuotaKind::Method))?)
        .strategy(Strategy::Spread)
        .build()?;

    let started = tokio::time::Instant::now();
    let searches = (0..15).map(|i| {
        search.submit(move |_| async move {
            // Replace with your real remote call
            Ok::<_, std::io::Error>(format!("{:>7.3}s search {i}", started.elapsed().as_secs_f64()))
        })
    });
    let uploads = (0..5).map(|i| {
        upload.submit(move |_| async move {
            Ok::<_, std::io::Error>(format!("{:>7.3}s upload {i}", started.elapsed().as_secs_f64()))
        })
    });

    let (searches, uploads) =
        futures::future::join(futures::future::join_all(searches), futures::future::join_all(uploads))
            .await;
    for line in searches.into_iter().chain(uploads) {
        match line {
            Ok(line) => println!("{}", line),
            Err(err) => eprintln!("failed: {}", err),
        }
    }

    // The remote side told us to slow down.
    let delay = search.backoff(Some(Duration::from_secs(2)));
    println!("backing off for {:?}: {}", delay, search);
    Ok(())
}
