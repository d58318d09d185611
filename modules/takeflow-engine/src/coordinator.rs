//! The coordinator: event router plus the handle handlers act through.

use std::future::{self, Future};
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use futures::task::noop_waker_ref;
use futures::FutureExt;
use takeflow_common::{EffectError, EngineConfig};
use tracing::{debug, warn, Instrument};

use crate::registry::{Handler, WaiterRegistry};
use crate::task::Task;
use crate::timer::{Timer, TokioTimer};
use crate::traits::{Dispatcher, EventLike, StateReader};

pub(crate) struct Shared<E, S> {
    pub(crate) registry: Mutex<WaiterRegistry<E, S>>,
    pub(crate) dispatcher: Arc<dyn Dispatcher<E>>,
    pub(crate) state: Arc<dyn StateReader<S>>,
    pub(crate) timer: Arc<dyn Timer>,
    pub(crate) config: EngineConfig,
}

impl<E, S> Shared<E, S> {
    pub(crate) fn registry(&self) -> MutexGuard<'_, WaiterRegistry<E, S>> {
        self.registry.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Coordinates handlers, one-shot waiters and timers for one pipeline attachment.
///
/// Cheap to clone: every clone is a handle to the same registry. The
/// coordinator is torn down when the last handle (and the pipeline holding
/// it) is dropped; suspensions still pending then fail with
/// [`EffectError::Detached`].
pub struct Coordinator<E, S> {
    pub(crate) shared: Arc<Shared<E, S>>,
}

impl<E, S> Clone for Coordinator<E, S> {
    fn clone(&self) -> Self {
        Self {
            shared: self.shared.clone(),
        }
    }
}

/// How the router disposed of one event.
#[must_use]
pub enum Routed<E> {
    /// A persistent handler consumed the event. Its task runs concurrently;
    /// awaiting the task observes the handler's failure.
    Handler(Task<()>),
    /// A one-shot waiter was resolved with the event.
    Waiter,
    /// Nobody claimed the event. It is handed back for the next stage.
    Unhandled(E),
}

impl<E> Routed<E> {
    pub fn is_handled(&self) -> bool {
        !matches!(self, Routed::Unhandled(_))
    }
}

/// Create a coordinator bound to the pipeline's dispatch function, state reader
/// and timer. `None` selects [`TokioTimer`].
pub fn attach<E, S>(
    dispatcher: impl Dispatcher<E> + 'static,
    state: impl StateReader<S> + 'static,
    timer: Option<Arc<dyn Timer>>,
) -> Coordinator<E, S>
where
    E: EventLike,
    S: Send + 'static,
{
    Coordinator::new(
        Arc::new(dispatcher),
        Arc::new(state),
        timer.unwrap_or_else(|| Arc::new(TokioTimer)),
        EngineConfig::default(),
    )
}

impl<E, S> Coordinator<E, S>
where
    E: EventLike,
    S: Send + 'static,
{
    pub fn new(
        dispatcher: Arc<dyn Dispatcher<E>>,
        state: Arc<dyn StateReader<S>>,
        timer: Arc<dyn Timer>,
        config: EngineConfig,
    ) -> Self {
        Self {
            shared: Arc::new(Shared {
                registry: Mutex::new(WaiterRegistry::new(config.registration_policy)),
                dispatcher,
                state,
                timer,
                config,
            }),
        }
    }

    /// Route one event: persistent handler first, then a one-shot waiter,
    /// otherwise hand it back unhandled.
    ///
    /// A handler runs inline up to its first suspension and is then spawned, so
    /// any `take` it issues before suspending is registered by the time this
    /// returns. Must be called from within a tokio runtime.
    pub fn route(&self, event: E) -> Routed<E> {
        let event_type = event.event_type().to_string();

        // The guard is released before anything user-provided runs.
        let claimed = {
            let mut registry = self.shared.registry();
            match registry.handler_for(&event_type) {
                Some(handler) => Ok(handler),
                None => Err(registry.claim(&event_type)),
            }
        };

        match claimed {
            Ok(handler) => {
                debug!(event_type = event_type.as_str(), "Routing to persistent handler");
                Routed::Handler(self.invoke(handler, event, &event_type))
            }
            Err(Some((waiter, tx))) => match tx.send(Ok(event)) {
                Ok(()) => {
                    debug!(event_type = event_type.as_str(), %waiter, "Resolved one-shot waiter");
                    Routed::Waiter
                }
                Err(undelivered) => {
                    // The suspension was abandoned between claim and send.
                    debug!(event_type = event_type.as_str(), %waiter, "Waiter gone, event unhandled");
                    undelivered.map_or(Routed::Waiter, |event| self.unhandled(event))
                }
            },
            Err(None) => self.unhandled(event),
        }
    }

    fn invoke(&self, handler: Handler<E, S>, event: E, event_type: &str) -> Task<()> {
        let span = tracing::info_span!("handler", event_type);
        let mut fut = handler(self.clone(), event)
            .map(|outcome| outcome.map_err(EffectError::Handler))
            .instrument(span)
            .boxed();

        // First poll happens here, not on the scheduler. The spawned task polls
        // again straight away, which replaces the no-op waker.
        let mut cx = Context::from_waker(noop_waker_ref());
        match catch_unwind(AssertUnwindSafe(|| fut.as_mut().poll(&mut cx))) {
            Ok(Poll::Pending) => Task::spawn(fut),
            Ok(Poll::Ready(outcome)) => Task::spawn(future::ready(outcome)),
            Err(_) => {
                warn!(event_type, "Handler panicked before its first suspension");
                Task::spawn(future::ready(Err(EffectError::Join(format!(
                    "handler for `{event_type}` panicked"
                )))))
            }
        }
    }

    fn unhandled(&self, event: E) -> Routed<E> {
        if self.shared.config.log_unhandled {
            debug!(event_type = event.event_type(), "Unhandled event");
        }
        Routed::Unhandled(event)
    }

    /// Register a persistent handler for `event_type`. Does not suspend.
    ///
    /// Fails with [`EffectError::RegistrationConflict`] when a handler is already
    /// bound and the registration policy is `Reject`.
    pub fn take_every<H, Fut>(&self, event_type: &str, handler: H) -> Result<(), EffectError>
    where
        H: Fn(Coordinator<E, S>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let boxed: Handler<E, S> =
            Arc::new(move |coord: Coordinator<E, S>, event: E| handler(coord, event).boxed());
        self.shared.registry().register_every(event_type, boxed)
    }

    /// The current state snapshot.
    pub fn select(&self) -> S {
        self.shared.state.snapshot()
    }

    /// Apply `selector` to the current state snapshot.
    pub fn select_with<T>(&self, selector: impl FnOnce(&S) -> T) -> T {
        selector(&self.shared.state.snapshot())
    }

    /// Forward an event to the pipeline's dispatch function.
    pub async fn dispatch(&self, event: E) -> Result<(), EffectError> {
        let dispatcher = self.shared.dispatcher.clone();
        dispatcher.dispatch(event).await.map_err(EffectError::Dispatch)
    }

    /// Run an effect as an independent task.
    pub fn spawn<T, F>(&self, future: F) -> Task<T>
    where
        T: Send + 'static,
        F: Future<Output = Result<T, EffectError>> + Send + 'static,
    {
        Task::spawn(future)
    }

    /// True if a persistent handler is bound to `event_type`.
    pub fn has_handler(&self, event_type: &str) -> bool {
        self.shared.registry().has_handler(event_type)
    }

    /// True if a one-shot waiter is pending on `event_type`.
    pub fn is_waiting_for(&self, event_type: &str) -> bool {
        self.shared.registry().has_waiter(event_type)
    }

    /// Number of pending one-shot waiters (each counted once, whatever its group size).
    pub fn pending_waiters(&self) -> usize {
        self.shared.registry().pending_waiters()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.shared.config
    }
}
