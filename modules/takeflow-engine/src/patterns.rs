//! Looping patterns: throttle and debounce.
//!
//! Both loops run until their handler fails; the failure is returned and no
//! further iterations run. Spawn them with [`Coordinator::spawn`] to keep them
//! running alongside other handlers.

use std::future::Future;
use std::time::Duration;

use futures::FutureExt;
use takeflow_common::EffectError;
use tracing::debug;

use crate::coordinator::Coordinator;
use crate::traits::EventLike;

/// Which side of the debounce race finished first.
enum Settle<E> {
    Quiet,
    Bounced(E),
}

impl<E, S> Coordinator<E, S>
where
    E: EventLike,
    S: Send + 'static,
{
    /// Handle at most one `event_type` event per `period`.
    ///
    /// Idle → (match) → Invoking → Cooldown → Idle. Events arriving while the
    /// handler runs or during the cooldown are never observed.
    pub fn throttle<H, Fut>(
        &self,
        period: Duration,
        event_type: &str,
        handler: H,
    ) -> impl Future<Output = Result<(), EffectError>> + Send + 'static
    where
        H: Fn(Coordinator<E, S>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let coord = self.clone();
        let event_type = event_type.to_string();
        async move {
            loop {
                let event = coord.take(event_type.as_str()).await?;
                debug!(event_type = event_type.as_str(), "Throttle invoking handler");
                handler(coord.clone(), event)
                    .await
                    .map_err(EffectError::Handler)?;
                coord.delay(period).await?;
            }
        }
    }

    /// Handle an `event_type` burst once, `period` after its last event, with
    /// that last event.
    ///
    /// Idle → (match) → Pending. Each match while Pending restarts the timer;
    /// expiry → Invoking → Idle.
    pub fn debounce<H, Fut>(
        &self,
        period: Duration,
        event_type: &str,
        handler: H,
    ) -> impl Future<Output = Result<(), EffectError>> + Send + 'static
    where
        H: Fn(Coordinator<E, S>, E) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let coord = self.clone();
        let event_type = event_type.to_string();
        async move {
            loop {
                let mut pending = coord.take(event_type.as_str()).await?;
                loop {
                    let quiet = coord
                        .delay(period)
                        .map(|fired| fired.map(|()| Settle::Quiet))
                        .boxed();
                    let bounced = coord
                        .take(event_type.as_str())
                        .map(|taken| taken.map(Settle::Bounced))
                        .boxed();
                    match coord.race([quiet, bounced]).await? {
                        Settle::Bounced(event) => pending = event,
                        Settle::Quiet => break,
                    }
                }
                debug!(event_type = event_type.as_str(), "Debounce invoking handler");
                handler(coord.clone(), pending)
                    .await
                    .map_err(EffectError::Handler)?;
            }
        }
    }
}
