//! Pipeline stage: installs a coordinator between a producer and the next stage.
//!
//! Each event passing through is routed; unhandled events go on to `next`.
//! The coordinator's own `dispatch` loops back into this stage, so events a
//! handler dispatches are routed like any other.

use std::sync::{Arc, Weak};

use anyhow::Result;
use async_trait::async_trait;
use takeflow_common::{EffectError, EngineConfig};
use tracing::debug;
use typed_builder::TypedBuilder;

use crate::coordinator::{Coordinator, Routed};
use crate::timer::{Timer, TokioTimer};
use crate::traits::{Dispatcher, EventLike, StateReader};

/// Collaborators a pipeline stage is built from.
#[derive(TypedBuilder)]
pub struct PipelineDeps<E, S> {
    /// Reads the external state store for `select`.
    pub state: Arc<dyn StateReader<S>>,
    /// The next stage; receives every event the coordinator doesn't claim.
    pub next: Arc<dyn Dispatcher<E>>,
    #[builder(default = Arc::new(TokioTimer) as Arc<dyn Timer>)]
    pub timer: Arc<dyn Timer>,
    #[builder(default)]
    pub config: EngineConfig,
}

struct PipelineInner<E, S> {
    coordinator: Coordinator<E, S>,
    next: Arc<dyn Dispatcher<E>>,
}

/// A coordinator attached to a dispatch pipeline.
pub struct Pipeline<E, S> {
    inner: Arc<PipelineInner<E, S>>,
}

impl<E, S> Clone for Pipeline<E, S> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<E, S> Pipeline<E, S>
where
    E: EventLike,
    S: Send + 'static,
{
    /// Build the stage and run `init` to register its effects.
    pub fn new<I>(deps: PipelineDeps<E, S>, init: I) -> Result<Self, EffectError>
    where
        I: FnOnce(&Coordinator<E, S>) -> Result<(), EffectError>,
    {
        let PipelineDeps {
            state,
            next,
            timer,
            config,
        } = deps;

        let inner = Arc::new_cyclic(|weak: &Weak<PipelineInner<E, S>>| {
            let loopback: Arc<dyn Dispatcher<E>> = Arc::new(Loopback {
                pipeline: weak.clone(),
            });
            PipelineInner {
                coordinator: Coordinator::new(loopback, state, timer, config),
                next,
            }
        });

        init(&inner.coordinator)?;
        Ok(Self { inner })
    }

    /// Push one event through the stage.
    ///
    /// If a persistent handler consumes it, waits for that handler and returns
    /// its outcome. If a one-shot waiter consumes it, returns at once. Otherwise
    /// forwards it to the next stage.
    pub async fn dispatch(&self, event: E) -> Result<(), EffectError> {
        match self.inner.coordinator.route(event) {
            Routed::Handler(task) => task.await,
            Routed::Waiter => Ok(()),
            Routed::Unhandled(event) => {
                debug!(event_type = event.event_type(), "Forwarding to next stage");
                self.inner
                    .next
                    .dispatch(event)
                    .await
                    .map_err(EffectError::Dispatch)
            }
        }
    }

    pub fn coordinator(&self) -> &Coordinator<E, S> {
        &self.inner.coordinator
    }
}

/// The coordinator's dispatcher: re-enters the owning pipeline.
///
/// Holds a weak reference so the coordinator doesn't keep its pipeline alive.
struct Loopback<E, S> {
    pipeline: Weak<PipelineInner<E, S>>,
}

#[async_trait]
impl<E, S> Dispatcher<E> for Loopback<E, S>
where
    E: EventLike,
    S: Send + 'static,
{
    async fn dispatch(&self, event: E) -> Result<()> {
        let inner = self
            .pipeline
            .upgrade()
            .ok_or(EffectError::Detached)?;
        Pipeline { inner }.dispatch(event).await?;
        Ok(())
    }
}
