//! Dispatcher implementations.

use std::marker::PhantomData;
use std::sync::{Arc, Mutex, PoisonError};

use anyhow::Result;
use async_trait::async_trait;

use crate::traits::Dispatcher;

// ---------------------------------------------------------------------------
// FnDispatcher (wraps a synchronous dispatch function)
// ---------------------------------------------------------------------------

/// Adapts a plain `Fn(E) -> Result<()>` into an awaitable [`Dispatcher`].
pub struct FnDispatcher<E, F> {
    f: F,
    _phantom: PhantomData<fn(E)>,
}

impl<E, F> FnDispatcher<E, F>
where
    F: Fn(E) -> Result<()> + Send + Sync,
{
    pub fn new(f: F) -> Self {
        Self {
            f,
            _phantom: PhantomData,
        }
    }
}

#[async_trait]
impl<E, F> Dispatcher<E> for FnDispatcher<E, F>
where
    E: Send + 'static,
    F: Fn(E) -> Result<()> + Send + Sync,
{
    async fn dispatch(&self, event: E) -> Result<()> {
        (self.f)(event)
    }
}

// ---------------------------------------------------------------------------
// RecordingDispatcher (tests: no pipeline required)
// ---------------------------------------------------------------------------

/// In-memory dispatcher for testing. Records every event it receives.
pub struct RecordingDispatcher<E> {
    events: Mutex<Vec<E>>,
}

impl<E: Clone> RecordingDispatcher<E> {
    pub fn new() -> Self {
        Self {
            events: Mutex::new(Vec::new()),
        }
    }

    /// All dispatched events, in order (for test assertions).
    pub fn events(&self) -> Vec<E> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl<E: Clone> Default for RecordingDispatcher<E> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<E> Dispatcher<E> for RecordingDispatcher<E>
where
    E: Send + 'static,
{
    async fn dispatch(&self, event: E) -> Result<()> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event);
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Arc<D> blanket (lets tests share the recorder for assertions)
// ---------------------------------------------------------------------------

#[async_trait]
impl<E, D> Dispatcher<E> for Arc<D>
where
    E: Send + 'static,
    D: Dispatcher<E> + ?Sized,
{
    async fn dispatch(&self, event: E) -> Result<()> {
        (**self).dispatch(event).await
    }
}
