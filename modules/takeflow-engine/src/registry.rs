//! Waiter registry: persistent handlers and one-shot waiters.
//!
//! One-shot waiters live in an arena keyed by [`WaiterId`], with a
//! `type -> WaiterId` index holding one entry per group member. Every mutation
//! keeps the two in step: a waiter is either indexed under all of its group
//! members or under none.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use futures::future::BoxFuture;
use takeflow_common::{EffectError, RegistrationPolicy, WaiterKind};
use tokio::sync::oneshot;
use tracing::{debug, warn};

use crate::coordinator::Coordinator;

/// A persistent handler, type-erased.
pub type Handler<E, S> =
    Arc<dyn Fn(Coordinator<E, S>, E) -> BoxFuture<'static, anyhow::Result<()>> + Send + Sync>;

/// What a one-shot waiter eventually receives.
pub(crate) type Delivery<E> = Result<E, EffectError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WaiterId(u64);

impl fmt::Display for WaiterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "w{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// EventGroup
// ---------------------------------------------------------------------------

/// One or more event types a single waiter answers to. Duplicates are collapsed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EventGroup(Vec<String>);

impl EventGroup {
    pub fn new<I, T>(types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<String>,
    {
        let mut members: Vec<String> = Vec::new();
        for t in types {
            let t = t.into();
            if !members.contains(&t) {
                members.push(t);
            }
        }
        Self(members)
    }

    pub fn members(&self) -> &[String] {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

impl From<&str> for EventGroup {
    fn from(t: &str) -> Self {
        Self(vec![t.to_string()])
    }
}

impl From<String> for EventGroup {
    fn from(t: String) -> Self {
        Self(vec![t])
    }
}

impl<T: Into<String>> From<Vec<T>> for EventGroup {
    fn from(types: Vec<T>) -> Self {
        Self::new(types)
    }
}

impl<T: Into<String>, const N: usize> From<[T; N]> for EventGroup {
    fn from(types: [T; N]) -> Self {
        Self::new(types)
    }
}

// ---------------------------------------------------------------------------
// WaiterRegistry
// ---------------------------------------------------------------------------

struct OneShot<E> {
    group: Vec<String>,
    tx: oneshot::Sender<Delivery<E>>,
}

pub(crate) struct WaiterRegistry<E, S> {
    every: HashMap<String, Handler<E, S>>,
    waiters: HashMap<WaiterId, OneShot<E>>,
    index: HashMap<String, WaiterId>,
    next_id: u64,
    policy: RegistrationPolicy,
}

impl<E, S> WaiterRegistry<E, S> {
    pub(crate) fn new(policy: RegistrationPolicy) -> Self {
        Self {
            every: HashMap::new(),
            waiters: HashMap::new(),
            index: HashMap::new(),
            next_id: 0,
            policy,
        }
    }

    /// Bind a persistent handler to `event_type`.
    pub(crate) fn register_every(
        &mut self,
        event_type: &str,
        handler: Handler<E, S>,
    ) -> Result<(), EffectError> {
        if self.every.contains_key(event_type) {
            match self.policy {
                RegistrationPolicy::Reject => {
                    return Err(EffectError::RegistrationConflict {
                        event_type: event_type.to_string(),
                        kind: WaiterKind::Persistent,
                    });
                }
                RegistrationPolicy::Replace => {
                    warn!(event_type, "Replacing persistent handler");
                }
            }
        }
        if self.index.contains_key(event_type) {
            warn!(
                event_type,
                "Persistent handler shadows a pending one-shot waiter; it will not resolve"
            );
        }
        self.every.insert(event_type.to_string(), handler);
        debug!(event_type, "Registered persistent handler");
        Ok(())
    }

    /// Register a one-shot waiter under every member of `group`.
    ///
    /// Under `Reject`, a conflict on any member fails the whole registration and
    /// leaves the registry untouched.
    pub(crate) fn register_once(
        &mut self,
        group: &EventGroup,
    ) -> Result<(WaiterId, oneshot::Receiver<Delivery<E>>), EffectError> {
        if group.is_empty() {
            return Err(EffectError::EmptyGroup);
        }

        let conflicting: Vec<(&String, WaiterId)> = group
            .members()
            .iter()
            .filter_map(|t| self.index.get(t).map(|id| (t, *id)))
            .collect();

        if let Some((event_type, _)) = conflicting.first() {
            match self.policy {
                RegistrationPolicy::Reject => {
                    return Err(EffectError::RegistrationConflict {
                        event_type: event_type.to_string(),
                        kind: WaiterKind::OneShot,
                    });
                }
                RegistrationPolicy::Replace => {
                    for (_, id) in conflicting {
                        if let Some(old) = self.remove(id) {
                            warn!(waiter = %id, group = ?old.group, "Superseding pending waiter");
                            let event_type = old.group.first().cloned().unwrap_or_default();
                            let _ = old.tx.send(Err(EffectError::Superseded { event_type }));
                        }
                    }
                }
            }
        }

        for t in group.members() {
            if self.every.contains_key(t) {
                warn!(
                    event_type = t.as_str(),
                    "One-shot waiter registered on a type with a persistent handler; it will not resolve from that type"
                );
            }
        }

        let id = WaiterId(self.next_id);
        self.next_id += 1;
        let (tx, rx) = oneshot::channel();
        for t in group.members() {
            self.index.insert(t.clone(), id);
        }
        self.waiters.insert(
            id,
            OneShot {
                group: group.members().to_vec(),
                tx,
            },
        );
        debug!(waiter = %id, group = ?group.members(), "Registered one-shot waiter");
        Ok((id, rx))
    }

    pub(crate) fn handler_for(&self, event_type: &str) -> Option<Handler<E, S>> {
        self.every.get(event_type).cloned()
    }

    /// Detach the waiter indexed under `event_type`, removing it under all of
    /// its group members, and hand back its sender.
    pub(crate) fn claim(
        &mut self,
        event_type: &str,
    ) -> Option<(WaiterId, oneshot::Sender<Delivery<E>>)> {
        let id = *self.index.get(event_type)?;
        self.remove(id).map(|w| (id, w.tx))
    }

    /// Drop a waiter that is no longer wanted. No-op if it already resolved.
    pub(crate) fn cancel(&mut self, id: WaiterId) -> bool {
        let removed = self.remove(id).is_some();
        if removed {
            debug!(waiter = %id, "Cancelled one-shot waiter");
        }
        removed
    }

    pub(crate) fn has_handler(&self, event_type: &str) -> bool {
        self.every.contains_key(event_type)
    }

    pub(crate) fn has_waiter(&self, event_type: &str) -> bool {
        self.index.contains_key(event_type)
    }

    pub(crate) fn pending_waiters(&self) -> usize {
        self.waiters.len()
    }

    fn remove(&mut self, id: WaiterId) -> Option<OneShot<E>> {
        let waiter = self.waiters.remove(&id)?;
        for t in &waiter.group {
            if self.index.get(t) == Some(&id) {
                self.index.remove(t);
            }
        }
        Some(waiter)
    }
}
