//! Effect-coordination runtime.
//!
//! Sits between an event producer and cooperative handlers. Handlers are
//! bound to event types with `take_every`; inside them, code suspends on
//! `take`, `delay`, `timeout`, `all` and `race`, or runs `throttle` and
//! `debounce` loops. Everything is in-memory and lives as long as the
//! [`Coordinator`].
//!
//! Consumers plug in their collaborators through [`Dispatcher`] (the
//! surrounding pipeline), [`StateReader`] (the external store) and [`Timer`]
//! (the clock), or use [`Pipeline`] to get the whole stage wired up.

pub mod coordinator;
pub mod dispatch;
pub mod effects;
pub mod patterns;
pub mod pipeline;
pub mod registry;
pub mod task;
pub mod timer;
pub mod traits;

pub use coordinator::{attach, Coordinator, Routed};
pub use dispatch::{FnDispatcher, RecordingDispatcher};
pub use effects::{Delay, Take};
pub use pipeline::{Pipeline, PipelineDeps};
pub use registry::{EventGroup, Handler, WaiterId};
pub use task::Task;
pub use timer::{CancelToken, ManualTimer, Timer, TimerCallback, TokioTimer};
pub use traits::{Dispatcher, EventLike, StateReader};

pub use takeflow_common::{EffectError, EngineConfig, Event, RegistrationPolicy};
