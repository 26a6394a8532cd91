//! Fleet-wide cache of connected players.
//!
//! The registry is only ever changed by protocol handlers (login, update,
//! disconnect) and by the service-removal cascade. On the master every
//! applied player packet is relayed to all other connected nodes.

use crate::config::CascadePolicy;
use dashmap::DashMap;
use fleet_protocol::{
    DomainEvent, EventBus, EventKind, Player, PlayerDisconnectPacket, PlayerLoginPacket,
    PlayerUpdatePacket, ProtocolEngine, ProtocolError,
};
use std::sync::{Arc, Weak};
use tracing::{debug, info};
use uuid::Uuid;

#[derive(Debug)]
pub struct PlayerRegistry {
    players: DashMap<Uuid, Player>,
    policy: CascadePolicy,
}

impl PlayerRegistry {
    pub fn new(policy: CascadePolicy) -> Self {
        Self {
            players: DashMap::new(),
            policy,
        }
    }

    /// Wires the registry to the player packets of `engine` and to service
    /// removals on `bus`.
    ///
    /// With `relay` set, every applied packet is forwarded to all connections
    /// except the one it came from, and cascade evictions are broadcast.
    pub fn install(
        self: &Arc<Self>,
        engine: &Arc<ProtocolEngine>,
        bus: &Arc<EventBus>,
        relay: bool,
    ) -> Result<(), ProtocolError> {
        let registry = Arc::downgrade(self);
        let events = Arc::downgrade(bus);
        engine.on::<PlayerLoginPacket, _>(move |packet, ctx| {
            let (Some(registry), Some(events)) = (registry.upgrade(), events.upgrade()) else {
                return Ok(());
            };
            let player = registry.login(packet.uuid, &packet.username);
            events.publish(DomainEvent::PlayerLogin(player));
            if relay {
                ctx.engine().broadcast_except(ctx.connection, &packet);
            }
            Ok(())
        })?;

        let registry = Arc::downgrade(self);
        let events = Arc::downgrade(bus);
        engine.on::<PlayerUpdatePacket, _>(move |packet, ctx| {
            let (Some(registry), Some(events)) = (registry.upgrade(), events.upgrade()) else {
                return Ok(());
            };
            let Some(player) = registry.update(
                &packet.uuid,
                packet.proxy_service.clone(),
                packet.game_service.clone(),
            ) else {
                debug!("Ignoring update for unknown player {}", packet.uuid);
                return Ok(());
            };
            events.publish(DomainEvent::PlayerUpdate(player));
            if relay {
                ctx.engine().broadcast_except(ctx.connection, &packet);
            }
            Ok(())
        })?;

        let registry = Arc::downgrade(self);
        let events = Arc::downgrade(bus);
        engine.on::<PlayerDisconnectPacket, _>(move |packet, ctx| {
            let (Some(registry), Some(events)) = (registry.upgrade(), events.upgrade()) else {
                return Ok(());
            };
            if let Some(player) = registry.disconnect(&packet.uuid) {
                events.publish(DomainEvent::PlayerDisconnect(player));
                if relay {
                    ctx.engine().broadcast_except(ctx.connection, &packet);
                }
            }
            Ok(())
        })?;

        let registry = Arc::downgrade(self);
        let events = Arc::downgrade(bus);
        let wire = Arc::downgrade(engine);
        bus.subscribe(EventKind::ServiceRemoved, move |event| {
            let DomainEvent::ServiceRemoved { service, .. } = event else {
                return Ok(());
            };
            let (Some(registry), Some(events)) = (registry.upgrade(), events.upgrade()) else {
                return Ok(());
            };
            let evicted = registry.evict_for_service(&service.name);
            if !evicted.is_empty() {
                info!("👋 {} player(s) evicted with service '{}'", evicted.len(), service.name);
            }
            let engine = if relay { wire.upgrade() } else { None };
            for player in evicted {
                if let Some(engine) = &engine {
                    engine.broadcast(&PlayerDisconnectPacket { uuid: player.uuid });
                }
                events.publish(DomainEvent::PlayerDisconnect(player));
            }
            Ok(())
        });

        Ok(())
    }

    // ------------------------------------------------------------------
    // Mutations, reachable only through the installed handlers
    // ------------------------------------------------------------------

    /// Inserts a fresh entry, replacing any stale one for the same uuid.
    fn login(&self, uuid: Uuid, username: &str) -> Player {
        let player = Player::new(uuid, username);
        self.players.insert(uuid, player.clone());
        debug!("👤 {} ({}) logged in", username, uuid);
        player
    }

    fn update(
        &self,
        uuid: &Uuid,
        proxy_service: Option<String>,
        game_service: Option<String>,
    ) -> Option<Player> {
        let mut entry = self.players.get_mut(uuid)?;
        entry.proxy_service = proxy_service;
        entry.game_service = game_service;
        Some(entry.clone())
    }

    fn disconnect(&self, uuid: &Uuid) -> Option<Player> {
        self.players.remove(uuid).map(|(_, player)| player)
    }

    /// Removes every player attached to `service` under the cascade policy.
    fn evict_for_service(&self, service: &str) -> Vec<Player> {
        let matches = |player: &Player| {
            player.proxy_service.as_deref() == Some(service)
                || (self.policy == CascadePolicy::ProxyAndGame
                    && player.game_service.as_deref() == Some(service))
        };

        let doomed: Vec<Uuid> = self
            .players
            .iter()
            .filter(|entry| matches(entry.value()))
            .map(|entry| *entry.key())
            .collect();

        // Re-check on removal: the player may have moved since the scan.
        doomed
            .into_iter()
            .filter_map(|uuid| self.players.remove_if(&uuid, |_, player| matches(player)))
            .map(|(_, player)| player)
            .collect()
    }

    // ------------------------------------------------------------------
    // Reads
    // ------------------------------------------------------------------

    pub fn get(&self, uuid: &Uuid) -> Option<Player> {
        self.players.get(uuid).map(|entry| entry.clone())
    }

    /// Case-insensitive lookup by username.
    pub fn get_by_name(&self, username: &str) -> Option<Player> {
        self.players
            .iter()
            .find(|entry| entry.username.eq_ignore_ascii_case(username))
            .map(|entry| entry.clone())
    }

    /// Copy of every player, ordered by username.
    pub fn snapshot(&self) -> Vec<Player> {
        let mut players: Vec<Player> = self.players.iter().map(|entry| entry.clone()).collect();
        players.sort_by_key(|player| player.username.to_lowercase());
        players
    }

    /// Players on `service`: routed through it when it is a proxy, playing on it otherwise.
    pub fn players_on(&self, service: &str, proxy: bool) -> usize {
        self.players
            .iter()
            .filter(|entry| {
                let reference = if proxy {
                    &entry.proxy_service
                } else {
                    &entry.game_service
                };
                reference.as_deref() == Some(service)
            })
            .count()
    }

    pub fn policy(&self) -> CascadePolicy {
        self.policy
    }

    pub fn len(&self) -> usize {
        self.players.len()
    }

    pub fn is_empty(&self) -> bool {
        self.players.is_empty()
    }
}
