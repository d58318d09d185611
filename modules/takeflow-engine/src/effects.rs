//! Effect combinators built on the waiter registry and the timer capability.
//!
//! Every combinator registers its waiter or schedules its timer when it is
//! called, not when it is first polled. Dropping an unfinished [`Take`] or
//! [`Delay`] cancels it, which is what makes `race` clean up its losers.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::future::{select_all, try_join_all};
use futures::FutureExt;
use takeflow_common::EffectError;
use tokio::sync::oneshot;
use tracing::debug;

use crate::coordinator::{Coordinator, Shared};
use crate::registry::{Delivery, EventGroup, WaiterId};
use crate::timer::CancelToken;
use crate::traits::EventLike;

// ---------------------------------------------------------------------------
// Take
// ---------------------------------------------------------------------------

/// A pending one-shot waiter. Resolves with the first event matching its group.
#[must_use = "a Take resolves nothing unless awaited; dropping it deregisters the waiter"]
pub struct Take<E, S> {
    state: TakeState<E, S>,
}

enum TakeState<E, S> {
    Waiting {
        id: WaiterId,
        rx: oneshot::Receiver<Delivery<E>>,
        shared: Weak<Shared<E, S>>,
    },
    Failed(Option<EffectError>),
    Done,
}

impl<E, S> Future for Take<E, S> {
    type Output = Result<E, EffectError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let outcome = match &mut self.state {
            TakeState::Waiting { rx, .. } => match Pin::new(rx).poll(cx) {
                Poll::Pending => return Poll::Pending,
                Poll::Ready(Ok(delivery)) => delivery,
                // The registry dropped the sender: the coordinator is gone.
                Poll::Ready(Err(_)) => Err(EffectError::Detached),
            },
            TakeState::Failed(err) => Err(err.take().unwrap_or(EffectError::Detached)),
            TakeState::Done => Err(EffectError::Detached),
        };
        self.state = TakeState::Done;
        Poll::Ready(outcome)
    }
}

impl<E, S> Drop for Take<E, S> {
    fn drop(&mut self) {
        if let TakeState::Waiting { id, shared, .. } = &self.state {
            if let Some(shared) = shared.upgrade() {
                shared.registry().cancel(*id);
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Delay
// ---------------------------------------------------------------------------

/// A scheduled timer. Resolves once the timer fires; dropping it early cancels the timer.
#[must_use = "dropping a Delay cancels its timer"]
pub struct Delay {
    rx: oneshot::Receiver<()>,
    token: CancelToken,
    settled: bool,
}

impl Future for Delay {
    type Output = Result<(), EffectError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        if self.settled {
            return Poll::Ready(Ok(()));
        }
        match Pin::new(&mut self.rx).poll(cx) {
            Poll::Pending => Poll::Pending,
            Poll::Ready(result) => {
                self.settled = true;
                Poll::Ready(result.map_err(|_| EffectError::TimerDropped))
            }
        }
    }
}

impl Drop for Delay {
    fn drop(&mut self) {
        if !self.settled {
            self.token.cancel();
        }
    }
}

// ---------------------------------------------------------------------------
// Combinators
// ---------------------------------------------------------------------------

impl<E, S> Coordinator<E, S>
where
    E: EventLike,
    S: Send + 'static,
{
    /// Suspend until an event whose type is in `group` is routed; resolves with it.
    ///
    /// The waiter is registered immediately. A single type is a one-member group.
    pub fn take(&self, group: impl Into<EventGroup>) -> Take<E, S> {
        let group = group.into();
        let registered = self.shared.registry().register_once(&group);
        let state = match registered {
            Ok((id, rx)) => TakeState::Waiting {
                id,
                rx,
                shared: Arc::downgrade(&self.shared),
            },
            Err(e) => TakeState::Failed(Some(e)),
        };
        Take { state }
    }

    /// One independent waiter per type; resolves with the events in the order of `types`.
    pub fn take_all<I, T>(&self, types: I) -> impl Future<Output = Result<Vec<E>, EffectError>>
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let takes: Vec<Take<E, S>> = types
            .into_iter()
            .map(|t| self.take(EventGroup::from(t.into())))
            .collect();
        self.all(takes)
    }

    /// Suspend for `duration`.
    pub fn delay(&self, duration: Duration) -> Delay {
        let (tx, rx) = oneshot::channel();
        let token = self.shared.timer.schedule(
            duration,
            Box::new(move || {
                let _ = tx.send(());
            }),
        );
        debug!(delay_ms = duration.as_millis() as u64, "Scheduled delay");
        Delay {
            rx,
            token,
            settled: false,
        }
    }

    /// Suspend for `duration`, then resolve with `payload` unchanged.
    pub fn delay_with<T>(
        &self,
        duration: Duration,
        payload: T,
    ) -> impl Future<Output = Result<T, EffectError>> {
        self.delay(duration).map(move |fired| fired.map(|()| payload))
    }

    /// Suspend for `duration`, then resolve with `f()`. A failure from `f`
    /// surfaces as [`EffectError::Combinator`]. For an async `f`, use
    /// [`timeout`](Self::timeout).
    pub fn delay_call<T, F>(
        &self,
        duration: Duration,
        f: F,
    ) -> impl Future<Output = Result<T, EffectError>>
    where
        F: FnOnce() -> anyhow::Result<T>,
    {
        let delay = self.delay(duration);
        async move {
            delay.await?;
            f().map_err(EffectError::Combinator)
        }
    }

    /// Suspend for `duration`, then run `f` and resolve with its outcome.
    ///
    /// Advisory: racing this against other work bounds how long the caller
    /// waits, it does not preempt anything.
    pub fn timeout<T, F, Fut>(
        &self,
        duration: Duration,
        f: F,
    ) -> impl Future<Output = Result<T, EffectError>>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let delay = self.delay(duration);
        async move {
            delay.await?;
            f().await.map_err(EffectError::Combinator)
        }
    }

    /// Wait for every operation. Results come back in the order of `ops`;
    /// the first failure fails the whole wait.
    pub fn all<I, F, T>(&self, ops: I) -> impl Future<Output = Result<Vec<T>, EffectError>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, EffectError>>,
    {
        try_join_all(ops)
    }

    /// Wait for the first operation to finish and take its outcome.
    ///
    /// The losers are dropped: pending takes deregister and pending delays
    /// cancel their timers. A spawned [`Task`](crate::Task) that loses keeps
    /// running in the background.
    pub fn race<I, F, T>(&self, ops: I) -> impl Future<Output = Result<T, EffectError>>
    where
        I: IntoIterator<Item = F>,
        F: Future<Output = Result<T, EffectError>>,
    {
        let ops: Vec<Pin<Box<F>>> = ops.into_iter().map(Box::pin).collect();
        async move {
            if ops.is_empty() {
                return Err(EffectError::EmptyRace);
            }
            let (outcome, winner, losers) = select_all(ops).await;
            debug!(winner, dropped = losers.len(), "Race settled");
            outcome
        }
    }
}
