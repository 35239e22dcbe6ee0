//! Named event subscriptions
//!
//! Core components publish endpoint rotation, pipeline retry and pipeline
//! outcome events; the presentation layer may also route ledger events
//! (vote cast, election lifecycle, ...) through the same hub. Every
//! registration returns a [`Subscription`] that unregisters itself on drop,
//! so listeners cannot outlive the component that installed them.

use crate::rpc_manager::ErrorKind;
use dashmap::DashMap;
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tracing::debug;

pub const ENDPOINT_ROTATED: &str = "endpoint_rotated";
pub const PIPELINE_RETRY: &str = "pipeline_retry";
pub const PIPELINE_OUTCOME: &str = "pipeline_outcome";

/// Terminal state reported for a pipeline invocation
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeStatus {
    Submitted,
    Confirmed,
    Unconfirmed,
    Failed,
}

#[derive(Debug, Clone, PartialEq)]
pub enum AccessEvent {
    EndpointRotated {
        from: String,
        to: String,
    },
    PipelineRetry {
        correlation_id: String,
        attempt: u32,
        kind: ErrorKind,
        delay: Duration,
    },
    PipelineOutcome {
        correlation_id: String,
        status: OutcomeStatus,
        detail: String,
    },
    /// Opaque ledger notification keyed by its logical name
    Ledger { name: String, payload: Value },
}

impl AccessEvent {
    pub fn name(&self) -> &str {
        match self {
            AccessEvent::EndpointRotated { .. } => ENDPOINT_ROTATED,
            AccessEvent::PipelineRetry { .. } => PIPELINE_RETRY,
            AccessEvent::PipelineOutcome { .. } => PIPELINE_OUTCOME,
            AccessEvent::Ledger { name, .. } => name,
        }
    }
}

type Handler = Arc<dyn Fn(&AccessEvent) + Send + Sync>;

#[derive(Default)]
pub struct EventHub {
    handlers: DashMap<String, Vec<(u64, Handler)>>,
    next_id: AtomicU64,
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventHub")
            .field("event_names", &self.handlers.len())
            .finish_non_exhaustive()
    }
}

impl EventHub {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn subscribe<F>(self: &Arc<Self>, name: impl Into<String>, handler: F) -> Subscription
    where
        F: Fn(&AccessEvent) + Send + Sync + 'static,
    {
        let name = name.into();
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.handlers
            .entry(name.clone())
            .or_default()
            .push((id, Arc::new(handler)));
        debug!(event = %name, id, "Listener registered");

        Subscription {
            hub: Arc::downgrade(self),
            name,
            id,
        }
    }

    /// Deliver `event` to every listener registered under its name.
    ///
    /// Handlers are collected before invocation so a handler may subscribe or
    /// drop subscriptions without deadlocking the map.
    pub fn publish(&self, event: AccessEvent) {
        let handlers: Vec<Handler> = self
            .handlers
            .get(event.name())
            .map(|entry| entry.iter().map(|(_, h)| Arc::clone(h)).collect())
            .unwrap_or_default();

        for handler in handlers {
            handler(&event);
        }
    }

    pub fn listener_count(&self, name: &str) -> usize {
        self.handlers.get(name).map(|entry| entry.len()).unwrap_or(0)
    }

    fn unsubscribe(&self, name: &str, id: u64) {
        let now_empty = match self.handlers.get_mut(name) {
            Some(mut entry) => {
                entry.retain(|(handler_id, _)| *handler_id != id);
                entry.is_empty()
            }
            None => false,
        };
        if now_empty {
            self.handlers.remove_if(name, |_, handlers| handlers.is_empty());
        }
        debug!(event = %name, id, "Listener released");
    }
}

/// Registration handle; the listener is removed when this is dropped
#[must_use = "dropping a Subscription immediately unregisters the listener"]
#[derive(Debug)]
pub struct Subscription {
    hub: Weak<EventHub>,
    name: String,
    id: u64,
}

impl Subscription {
    pub fn event_name(&self) -> &str {
        &self.name
    }

    /// Explicit teardown; equivalent to dropping the handle
    pub fn unsubscribe(self) {}
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.unsubscribe(&self.name, self.id);
        }
    }
}
