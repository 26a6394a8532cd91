//! Authoritative registry of live service instances.
//!
//! Every mutation is mirrored to the fleet (`ServiceAdd`, `ServiceUpdate`,
//! `ServiceRemove`) and published on the event bus. Ids are group-scoped,
//! start at 1 and are never reused while the registry lives.

use crate::error::ServiceError;
use crate::groups::GroupRegistry;
use crate::launcher::ServiceLauncher;
use crate::players::PlayerRegistry;
use dashmap::{DashMap, DashSet};
use fleet_protocol::{
    DomainEvent, EventBus, ProtocolEngine, RemovalReason, Service, ServiceAddPacket,
    ServiceGroup, ServiceRemovePacket, ServiceState, ServiceUpdatePacket, ServiceVisibility,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Everything needed to register a service except its id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceSpec {
    pub group: String,
    pub node: String,
    pub host: String,
    pub port: u16,
    pub max_players: i32,
    pub motd: String,
    pub visibility: ServiceVisibility,
}

impl ServiceSpec {
    /// A visible service of `group` inheriting its node, motd and player limit.
    pub fn for_group(group: &ServiceGroup, host: impl Into<String>, port: u16) -> Self {
        Self {
            group: group.name.clone(),
            node: group.node.clone(),
            host: host.into(),
            port,
            max_players: group.default_max_players,
            motd: group.motd.clone(),
            visibility: ServiceVisibility::Visible,
        }
    }
}

pub struct ServiceRegistry {
    services: DashMap<String, Service>,
    next_ids: DashMap<String, AtomicU32>,
    /// Services the master asked to stop; a STOPPED report for anything else is a crash
    stop_requested: DashSet<String>,
    engine: Arc<ProtocolEngine>,
    bus: Arc<EventBus>,
    launcher: Arc<dyn ServiceLauncher>,
}

impl std::fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("services", &self.services.len())
            .field("launcher", &self.launcher)
            .finish()
    }
}

impl ServiceRegistry {
    pub fn new(
        engine: Arc<ProtocolEngine>,
        bus: Arc<EventBus>,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Self {
        Self {
            services: DashMap::new(),
            next_ids: DashMap::new(),
            stop_requested: DashSet::new(),
            engine,
            bus,
            launcher,
        }
    }

    // ------------------------------------------------------------------
    // Mutations
    // ------------------------------------------------------------------

    /// Inserts a PREPARED service under the next id of its group.
    pub fn register(&self, spec: ServiceSpec) -> Service {
        let id = self
            .next_ids
            .entry(spec.group.clone())
            .or_insert_with(|| AtomicU32::new(1))
            .fetch_add(1, Ordering::Relaxed);

        let service = Service {
            name: Service::name_for(&spec.group, id),
            id,
            group: spec.group,
            node: spec.node,
            host: spec.host,
            port: spec.port,
            state: ServiceState::Prepared,
            visibility: spec.visibility,
            max_players: spec.max_players,
            motd: spec.motd,
        };
        self.services.insert(service.name.clone(), service.clone());

        info!("🆕 Registered service '{}' on {}", service.name, service.address());
        self.engine.broadcast(&ServiceAddPacket { service: service.clone() });
        self.bus.publish(DomainEvent::ServiceAdded(service.clone()));
        service
    }

    /// Removes a service. Returns `None` if it was already gone.
    pub fn unregister(&self, name: &str, reason: RemovalReason) -> Option<Service> {
        let (_, service) = self.services.remove(name)?;
        self.stop_requested.remove(name);

        info!("🗑️ Service '{}' removed ({:?})", service.name, reason);
        self.engine.broadcast(&ServiceRemovePacket { name: service.name.clone() });
        self.bus.publish(DomainEvent::ServiceRemoved {
            service: service.clone(),
            reason,
        });
        Some(service)
    }

    /// Moves a service along its lifecycle.
    ///
    /// # Errors
    ///
    /// - [`ServiceError::NotFound`] for an unknown name
    /// - [`ServiceError::InvalidTransition`] when the state machine forbids the move
    pub fn set_state(&self, name: &str, state: ServiceState) -> Result<Service, ServiceError> {
        let (updated, previous) = {
            let mut entry = self
                .services
                .get_mut(name)
                .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
            let previous = entry.state;
            if !previous.can_transition_to(state) {
                return Err(ServiceError::InvalidTransition {
                    service: name.to_string(),
                    from: previous,
                    to: state,
                });
            }
            entry.state = state;
            (entry.clone(), previous)
        };

        debug!("🔄 Service '{}': {} -> {}", name, previous, state);
        self.engine.broadcast(&ServiceUpdatePacket { service: updated.clone() });
        self.bus.publish(DomainEvent::ServiceStateChanged {
            service: updated.clone(),
            previous,
        });
        Ok(updated)
    }

    /// Applies `mutator` to the editable fields of a service (max players,
    /// motd, visibility). Identity, placement and state are left untouched.
    pub fn edit<F>(&self, name: &str, mutator: F) -> Result<Service, ServiceError>
    where
        F: FnOnce(&mut Service),
    {
        let updated = {
            let mut entry = self
                .services
                .get_mut(name)
                .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;
            let mut copy = entry.clone();
            mutator(&mut copy);
            entry.max_players = copy.max_players;
            entry.motd = copy.motd;
            entry.visibility = copy.visibility;
            entry.clone()
        };

        self.engine.broadcast(&ServiceUpdatePacket { service: updated.clone() });
        Ok(updated)
    }

    /// Marks a PREPARED service STARTING and asks its node to start it.
    ///
    /// A failed launch removes the service with [`RemovalReason::LaunchFailed`].
    pub async fn start(&self, name: &str) -> Result<Service, ServiceError> {
        let service = self.set_state(name, ServiceState::Starting)?;
        if let Err(e) = self.launcher.start(&service).await {
            warn!("❌ Could not launch '{}': {}", service.name, e);
            self.unregister(&service.name, RemovalReason::LaunchFailed);
            return Err(e.into());
        }
        Ok(service)
    }

    /// Moves a service to STOPPING and asks its node to stop it.
    ///
    /// A PREPARED service was never launched and is removed right away, as is
    /// one whose node cannot be reached to confirm the stop.
    pub async fn stop(&self, name: &str) -> Result<(), ServiceError> {
        let state = self
            .services
            .get(name)
            .map(|entry| entry.state)
            .ok_or_else(|| ServiceError::NotFound(name.to_string()))?;

        if state == ServiceState::Prepared {
            self.unregister(name, RemovalReason::Stopped);
            return Ok(());
        }

        let service = self.set_state(name, ServiceState::Stopping)?;
        self.stop_requested.insert(service.name.clone());
        if let Err(e) = self.launcher.stop(&service).await {
            warn!("⚠️ Stop request for '{}' not delivered ({}), removing it", service.name, e);
            self.unregister(&service.name, RemovalReason::Stopped);
        }
        Ok(())
    }

    /// Stops every service of `group` that is not already on its way down.
    pub async fn stop_group(&self, group: &str) -> usize {
        let mut stopped = 0;
        for service in self.get_by_group(group) {
            if matches!(service.state, ServiceState::Stopping | ServiceState::Stopped) {
                continue;
            }
            match self.stop(&service.name).await {
                Ok(()) => stopped += 1,
                Err(e) => warn!("⚠️ Failed to stop '{}': {}", service.name, e),
            }
        }
        stopped
    }

    /// Whether a stop for `name` was requested by the master.
    pub fn is_stop_requested(&self, name: &str) -> bool {
        self.stop_requested.contains(name)
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get_by_name(&self, name: &str) -> Option<Service> {
        self.services.get(name).map(|entry| entry.clone())
    }

    /// Services of `group`, ordered by id.
    pub fn get_by_group(&self, group: &str) -> Vec<Service> {
        let mut services: Vec<Service> = self
            .services
            .iter()
            .filter(|entry| entry.group == group)
            .map(|entry| entry.clone())
            .collect();
        services.sort_by_key(|service| service.id);
        services
    }

    /// Every service, ordered by group then id.
    pub fn get_all(&self) -> Vec<Service> {
        let mut services: Vec<Service> = self.services.iter().map(|entry| entry.clone()).collect();
        services.sort_by(|a, b| a.group.cmp(&b.group).then(a.id.cmp(&b.id)));
        services
    }

    pub fn get_by_node(&self, node: &str) -> Vec<Service> {
        self.services
            .iter()
            .filter(|entry| entry.node == node)
            .map(|entry| entry.clone())
            .collect()
    }

    /// Number of services of `group` that are STARTING or ONLINE.
    pub fn online_count(&self, group: &str) -> usize {
        self.services
            .iter()
            .filter(|entry| entry.group == group && entry.state.counts_as_online())
            .count()
    }

    pub fn ports_in_use(&self, node: &str) -> Vec<u16> {
        self.services
            .iter()
            .filter(|entry| entry.node == node)
            .map(|entry| entry.port)
            .collect()
    }

    /// Picks where to send a player leaving `current`.
    ///
    /// Candidates are ONLINE, VISIBLE game services of fallback groups other
    /// than `current`; the one with the fewest players wins, ties going to the
    /// lower name.
    pub fn fallback_for(
        &self,
        current: Option<&str>,
        groups: &GroupRegistry,
        players: &PlayerRegistry,
    ) -> Option<Service> {
        self.services
            .iter()
            .filter(|entry| entry.state == ServiceState::Online)
            .filter(|entry| entry.visibility == ServiceVisibility::Visible)
            .filter(|entry| Some(entry.name.as_str()) != current)
            .filter(|entry| {
                groups
                    .get(&entry.group)
                    .is_some_and(|group| group.fallback && !group.version.is_proxy())
            })
            .map(|entry| entry.clone())
            .min_by(|a, b| {
                players
                    .players_on(&a.name, false)
                    .cmp(&players.players_on(&b.name, false))
                    .then_with(|| a.name.cmp(&b.name))
            })
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }
}
