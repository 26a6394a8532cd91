//! Read-only copy of the master's state kept by subordinate nodes.
//!
//! The mirror never originates changes. It applies the group, service and
//! player packets the master broadcasts; a `ServiceCacheUpdate` replaces the
//! whole service table.

use crate::engine::{PacketContext, ProtocolEngine};
use crate::error::ProtocolError;
use crate::packets::{
    GroupRemovePacket, GroupUpdatePacket, PlayerDisconnectPacket, PlayerLoginPacket,
    PlayerUpdatePacket, ServiceAddPacket, ServiceCacheUpdatePacket, ServiceRemovePacket,
    ServiceUpdatePacket,
};
use crate::types::{Player, Service, ServiceGroup};
use dashmap::DashMap;
use std::sync::{Arc, Weak};
use tracing::debug;
use uuid::Uuid;

#[derive(Debug, Default)]
pub struct ClusterMirror {
    groups: DashMap<String, ServiceGroup>,
    services: DashMap<String, Service>,
    players: DashMap<Uuid, Player>,
}

impl ClusterMirror {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Registers the mirror's packet handlers on `engine`.
    pub fn install(self: &Arc<Self>, engine: &ProtocolEngine) -> Result<(), ProtocolError> {
        let mirror = Arc::downgrade(self);
        engine.on::<GroupUpdatePacket, _>(with(&mirror, |m, packet: GroupUpdatePacket| {
            let static_service = m
                .groups
                .get(&packet.name)
                .is_some_and(|existing| existing.static_service);
            let group = packet.into_group(static_service);
            debug!("🪞 Group '{}' updated", group.name);
            m.groups.insert(group.name.clone(), group);
        }))?;

        engine.on::<GroupRemovePacket, _>(with(&mirror, |m, packet: GroupRemovePacket| {
            m.groups.remove(&packet.name);
        }))?;

        engine.on::<ServiceAddPacket, _>(with(&mirror, |m, packet: ServiceAddPacket| {
            m.services.insert(packet.service.name.clone(), packet.service);
        }))?;

        engine.on::<ServiceUpdatePacket, _>(with(&mirror, |m, packet: ServiceUpdatePacket| {
            m.services.insert(packet.service.name.clone(), packet.service);
        }))?;

        engine.on::<ServiceRemovePacket, _>(with(&mirror, |m, packet: ServiceRemovePacket| {
            m.services.remove(&packet.name);
        }))?;

        engine.on::<ServiceCacheUpdatePacket, _>(with(&mirror, |m, packet: ServiceCacheUpdatePacket| {
            m.services.clear();
            for service in packet.services {
                m.services.insert(service.name.clone(), service);
            }
            debug!("🪞 Service cache replaced ({} services)", m.services.len());
        }))?;

        engine.on::<PlayerLoginPacket, _>(with(&mirror, |m, packet: PlayerLoginPacket| {
            m.players.insert(packet.uuid, Player::new(packet.uuid, packet.username));
        }))?;

        engine.on::<PlayerUpdatePacket, _>(with(&mirror, |m, packet: PlayerUpdatePacket| {
            if let Some(mut player) = m.players.get_mut(&packet.uuid) {
                player.proxy_service = packet.proxy_service;
                player.game_service = packet.game_service;
            }
        }))?;

        engine.on::<PlayerDisconnectPacket, _>(with(&mirror, |m, packet: PlayerDisconnectPacket| {
            m.players.remove(&packet.uuid);
        }))?;

        Ok(())
    }

    pub fn group(&self, name: &str) -> Option<ServiceGroup> {
        self.groups.get(name).map(|entry| entry.clone())
    }

    pub fn groups(&self) -> Vec<ServiceGroup> {
        self.groups.iter().map(|entry| entry.clone()).collect()
    }

    pub fn service(&self, name: &str) -> Option<Service> {
        self.services.get(name).map(|entry| entry.clone())
    }

    pub fn services(&self) -> Vec<Service> {
        self.services.iter().map(|entry| entry.clone()).collect()
    }

    pub fn services_of(&self, group: &str) -> Vec<Service> {
        self.services
            .iter()
            .filter(|entry| entry.group == group)
            .map(|entry| entry.clone())
            .collect()
    }

    pub fn player(&self, uuid: &Uuid) -> Option<Player> {
        self.players.get(uuid).map(|entry| entry.clone())
    }

    pub fn player_count(&self) -> usize {
        self.players.len()
    }
}

/// Adapts a mirror update into an engine handler holding only a weak reference.
fn with<P, F>(
    mirror: &Weak<ClusterMirror>,
    apply: F,
) -> impl Fn(P, &PacketContext) -> Result<(), ProtocolError> + Send + Sync + 'static
where
    F: Fn(&ClusterMirror, P) + Send + Sync + 'static,
{
    let mirror = mirror.clone();
    move |packet: P, _ctx: &PacketContext| {
        if let Some(mirror) = mirror.upgrade() {
            apply(&mirror, packet);
        }
        Ok(())
    }
}
