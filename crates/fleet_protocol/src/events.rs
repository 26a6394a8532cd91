//! In-process domain event bus.
//!
//! Subscribers are invoked synchronously, in registration order, on the
//! publisher's task. The handler list is cloned out of the table before any
//! handler runs, so a handler may itself publish or subscribe.

use crate::error::EventError;
use crate::types::{Player, Service, ServiceGroup, ServiceState};
use dashmap::DashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, error};

/// Why a service left the registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RemovalReason {
    /// Stopped on request and reported STOPPED by its node
    Stopped,
    /// Lost without a stop request (node vanished, process died)
    Crashed,
    /// The launcher could not start it
    LaunchFailed,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    PlayerLogin,
    PlayerUpdate,
    PlayerDisconnect,
    ServiceAdded,
    ServiceStateChanged,
    ServiceRemoved,
    GroupChanged,
    GroupRemoved,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DomainEvent {
    PlayerLogin(Player),
    PlayerUpdate(Player),
    PlayerDisconnect(Player),
    ServiceAdded(Service),
    ServiceStateChanged { service: Service, previous: ServiceState },
    ServiceRemoved { service: Service, reason: RemovalReason },
    /// A group was created or edited; carries the new definition
    GroupChanged(ServiceGroup),
    GroupRemoved(String),
}

impl DomainEvent {
    pub fn kind(&self) -> EventKind {
        match self {
            Self::PlayerLogin(_) => EventKind::PlayerLogin,
            Self::PlayerUpdate(_) => EventKind::PlayerUpdate,
            Self::PlayerDisconnect(_) => EventKind::PlayerDisconnect,
            Self::ServiceAdded(_) => EventKind::ServiceAdded,
            Self::ServiceStateChanged { .. } => EventKind::ServiceStateChanged,
            Self::ServiceRemoved { .. } => EventKind::ServiceRemoved,
            Self::GroupChanged(_) => EventKind::GroupChanged,
            Self::GroupRemoved(_) => EventKind::GroupRemoved,
        }
    }
}

type EventHandler = Arc<dyn Fn(&DomainEvent) -> Result<(), EventError> + Send + Sync>;

/// Counters exposed for diagnostics.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventBusStats {
    /// Total number of registered handlers
    pub total_handlers: usize,
    /// Total number of events published since start
    pub events_published: u64,
    /// Handler invocations that returned an error
    pub handler_failures: u64,
}

#[derive(Default)]
pub struct EventBus {
    handlers: DashMap<EventKind, Vec<EventHandler>>,
    events_published: AtomicU64,
    handler_failures: AtomicU64,
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus").field("stats", &self.stats()).finish()
    }
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Appends `handler` to the subscribers of `kind`.
    pub fn subscribe<F>(&self, kind: EventKind, handler: F)
    where
        F: Fn(&DomainEvent) -> Result<(), EventError> + Send + Sync + 'static,
    {
        self.handlers.entry(kind).or_default().push(Arc::new(handler));
        debug!("📝 Subscribed handler to {:?}", kind);
    }

    /// Delivers `event` to every subscriber of its kind.
    ///
    /// A failing handler is logged and does not stop the ones after it.
    /// Returns the number of handlers that succeeded.
    pub fn publish(&self, event: DomainEvent) -> usize {
        let kind = event.kind();
        self.events_published.fetch_add(1, Ordering::Relaxed);

        let handlers = match self.handlers.get(&kind) {
            Some(entry) => entry.value().clone(),
            None => return 0,
        };

        let mut succeeded = 0;
        for handler in handlers.iter() {
            match handler(&event) {
                Ok(()) => succeeded += 1,
                Err(e) => {
                    self.handler_failures.fetch_add(1, Ordering::Relaxed);
                    error!("❌ {:?} handler failed: {}", kind, e);
                }
            }
        }
        succeeded
    }

    pub fn stats(&self) -> EventBusStats {
        EventBusStats {
            total_handlers: self.handlers.iter().map(|entry| entry.value().len()).sum(),
            events_published: self.events_published.load(Ordering::Relaxed),
            handler_failures: self.handler_failures.load(Ordering::Relaxed),
        }
    }
}
