//! Handles for effects running as independent tokio tasks.

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use takeflow_common::EffectError;
use tokio::task::JoinHandle;

/// A spawned effect. Awaiting it yields the effect's result.
///
/// Dropping a `Task` (including losing a `race`) does not stop the effect:
/// it keeps running in the background and its result is discarded. Call
/// [`abort`](Self::abort) to stop it.
#[must_use = "dropping a Task detaches it; await it to observe failures"]
pub struct Task<T> {
    handle: JoinHandle<Result<T, EffectError>>,
}

impl<T: Send + 'static> Task<T> {
    pub(crate) fn spawn<F>(future: F) -> Self
    where
        F: Future<Output = Result<T, EffectError>> + Send + 'static,
    {
        Self {
            handle: tokio::spawn(future),
        }
    }
}

impl<T> Task<T> {
    pub fn abort(&self) {
        self.handle.abort();
    }

    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }
}

impl<T> Future for Task<T> {
    type Output = Result<T, EffectError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        match Pin::new(&mut self.handle).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(Ok(result)) => Poll::Ready(result),
            Poll::Ready(Err(e)) => Poll::Ready(Err(EffectError::Join(e.to_string()))),
        }
    }
}
