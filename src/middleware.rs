//! Tower integration: run every request of a service through a [`Scheduler`].
//!
//! ```rust
//! use quota_pacer::{ManualTimer, PacingLayer, Quota, QuotaSpec, Scheduler};
//! use tower::{service_fn, ServiceBuilder, ServiceExt};
//!
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let timer = ManualTimer::new();
//! let quota = Quota::with_timer(QuotaSpec::new(10, 1), timer.clone()).unwrap();
//! let scheduler = Scheduler::builder().quota(quota).timer(timer).build().unwrap();
//!
//! let svc = ServiceBuilder::new()
//!     .layer(PacingLayer::new(scheduler))
//!     .service(service_fn(|name: &'static str| async move {
//!         Ok::<_, std::io::Error>(format!("hello {name}"))
//!     }));
//! assert_eq!(svc.oneshot("world").await.unwrap(), "hello world");
//! # }
//! ```

use crate::error::PacingError;
use crate::scheduler::{Scheduler, Submission};
use std::task::{Context, Poll};
use tower_layer::Layer;
use tower_service::Service;

/// A layer that paces requests with a [`Scheduler`].
#[derive(Clone, Debug)]
pub struct PacingLayer {
    scheduler: Scheduler,
}

impl PacingLayer {
    pub fn new(scheduler: Scheduler) -> Self {
        Self { scheduler }
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }
}

impl<S> Layer<S> for PacingLayer {
    type Service = PacingService<S>;

    fn layer(&self, service: S) -> Self::Service {
        PacingService { inner: service, scheduler: self.scheduler.clone() }
    }
}

/// Middleware service that admits each request through a [`Scheduler`].
///
/// A request counts against the quotas when it is admitted, not when it is submitted.
#[derive(Clone, Debug)]
pub struct PacingService<S> {
    inner: S,
    scheduler: Scheduler,
}

impl<S> PacingService<S> {
    pub fn get_ref(&self) -> &S {
        &self.inner
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S, Req> Service<Req> for PacingService<S>
where
    S: Service<Req> + Clone + Send + 'static,
    S::Future: Send + 'static,
    S::Response: Send + 'static,
    S::Error: Send + 'static,
    Req: Send + 'static,
{
    type Response = S::Response;
    type Error = PacingError<S::Error>;
    type Future = Submission<S::Response, S::Error>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx).map_err(PacingError::Inner)
    }

    fn call(&mut self, req: Req) -> Self::Future {
        // The clone may not be ready; keep it and hand the ready service to the request.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);
        self.scheduler.submit(move |_| inner.call(req))
    }
}
