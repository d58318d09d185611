use std::fmt;

use thiserror::Error;

/// Which side of the registry a registration targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaiterKind {
    Persistent,
    OneShot,
}

impl fmt::Display for WaiterKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WaiterKind::Persistent => f.write_str("persistent handler"),
            WaiterKind::OneShot => f.write_str("one-shot waiter"),
        }
    }
}

#[derive(Error, Debug)]
pub enum EffectError {
    #[error("Handler failed: {0}")]
    Handler(anyhow::Error),

    #[error("Combinator failed: {0}")]
    Combinator(anyhow::Error),

    #[error("Dispatch failed: {0}")]
    Dispatch(anyhow::Error),

    #[error("Event type `{event_type}` already has a pending {kind}")]
    RegistrationConflict {
        event_type: String,
        kind: WaiterKind,
    },

    #[error("Waiter for `{event_type}` was superseded by a newer registration")]
    Superseded { event_type: String },

    #[error("take requires at least one event type")]
    EmptyGroup,

    #[error("race requires at least one operation")]
    EmptyRace,

    #[error("Timer dropped the callback before it fired")]
    TimerDropped,

    #[error("Coordinator was torn down while the suspension was pending")]
    Detached,

    #[error("Task did not complete: {0}")]
    Join(String),

    #[error("Configuration error: {0}")]
    Config(String),
}

impl EffectError {
    /// True for the two errors a caller can avoid by registering differently.
    pub fn is_registration_error(&self) -> bool {
        matches!(
            self,
            EffectError::RegistrationConflict { .. } | EffectError::Superseded { .. }
        )
    }
}
