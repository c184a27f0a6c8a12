//! Queued work and the future handed back to the submitter.

use super::Scheduler;
use crate::error::PacingError;
use futures::future::{BoxFuture, FusedFuture};
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{ready, Context, Poll};
use tokio::sync::oneshot;

type Launch = Box<dyn FnOnce(Scheduler, bool) + Send + 'static>;

/// A submitted operation waiting for admission.
///
/// The operation is only invoked when admitted; its future is then handed to the matching
/// [`Submission`], which drives it to completion.
pub(crate) struct WorkItem {
    launch: Launch,
}

impl WorkItem {
    pub(crate) fn new<T, E, F, Fut>(operation: F) -> (Self, Submission<T, E>)
    where
        F: FnOnce(Scheduler) -> Fut + Send + 'static,
        Fut: Future<Output = Result<T, E>> + Send + 'static,
        T: Send + 'static,
        E: Send + 'static,
    {
        let (tx, rx) = oneshot::channel::<BoxFuture<'static, Result<T, E>>>();
        let launch: Launch = Box::new(move |scheduler: Scheduler, probe: bool| {
            if tx.is_closed() {
                tracing::debug!("submission dropped before admission; skipping operation");
                return;
            }
            let future = operation(scheduler.clone());
            let future: BoxFuture<'static, Result<T, E>> = if probe {
                Box::pin(async move {
                    let result = future.await;
                    if result.is_err() {
                        scheduler.backoff(None);
                    }
                    result
                })
            } else {
                Box::pin(future)
            };
            if tx.send(future).is_err() {
                tracing::debug!("submission dropped during admission");
            }
        });
        (Self { launch }, Submission { state: SubmissionState::Waiting(rx) })
    }

    /// Invoke the operation. A probe reports its own failure as a backoff.
    pub(crate) fn launch(self, scheduler: Scheduler, probe: bool) {
        (self.launch)(scheduler, probe)
    }
}

impl fmt::Debug for WorkItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorkItem").finish_non_exhaustive()
    }
}

enum SubmissionState<T, E> {
    Waiting(oneshot::Receiver<BoxFuture<'static, Result<T, E>>>),
    Running(BoxFuture<'static, Result<T, E>>),
    Done,
}

/// Result of [`Scheduler::submit`].
///
/// Resolves once the operation was admitted and completed. Dropping it before admission
/// keeps the queue slot, but the operation is skipped when its turn comes.
#[must_use = "submissions resolve only when awaited"]
pub struct Submission<T, E> {
    state: SubmissionState<T, E>,
}

impl<T, E> Future for Submission<T, E> {
    type Output = Result<T, PacingError<E>>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match &mut this.state {
                SubmissionState::Waiting(rx) => match ready!(Pin::new(rx).poll(cx)) {
                    Ok(future) => this.state = SubmissionState::Running(future),
                    Err(_) => {
                        this.state = SubmissionState::Done;
                        return Poll::Ready(Err(PacingError::Cancelled));
                    }
                },
                SubmissionState::Running(future) => {
                    let output = ready!(future.as_mut().poll(cx));
                    this.state = SubmissionState::Done;
                    return Poll::Ready(output.map_err(PacingError::Inner));
                }
                SubmissionState::Done => return Poll::Pending,
            }
        }
    }
}

impl<T, E> FusedFuture for Submission<T, E> {
    fn is_terminated(&self) -> bool {
        matches!(self.state, SubmissionState::Done)
    }
}

impl<T, E> fmt::Debug for Submission<T, E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            SubmissionState::Waiting(_) => "waiting",
            SubmissionState::Running(_) => "running",
            SubmissionState::Done => "done",
        };
        f.debug_struct("Submission").field("state", &state).finish()
    }
}
