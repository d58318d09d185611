//! Core traits for the coordinator and its collaborators.

use anyhow::Result;
use async_trait::async_trait;
use takeflow_common::Event;

/// Events carry a type string the router keys on.
pub trait EventLike: Clone + Send + Sync + 'static {
    /// The discriminant matched against `take` groups and `take_every` registrations.
    fn event_type(&self) -> &str;
}

impl EventLike for Event {
    fn event_type(&self) -> &str {
        &self.event_type
    }
}

/// The surrounding pipeline's dispatch function.
///
/// Synchronous dispatch functions are wrapped in [`FnDispatcher`](crate::FnDispatcher)
/// so callers always get something to await.
#[async_trait]
pub trait Dispatcher<E>: Send + Sync {
    async fn dispatch(&self, event: E) -> Result<()>;
}

/// Reads the external state store.
pub trait StateReader<S>: Send + Sync {
    fn snapshot(&self) -> S;
}

impl<S, F> StateReader<S> for F
where
    F: Fn() -> S + Send + Sync,
{
    fn snapshot(&self) -> S {
        self()
    }
}
