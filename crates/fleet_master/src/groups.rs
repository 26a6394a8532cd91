//! Authoritative registry of group definitions.
//!
//! Reads go straight to an in-memory cache. Mutations are serialized by an
//! async mutex and follow the same order: validate, persist, update the
//! cache, broadcast to the fleet, publish on the event bus. A failure at any
//! step before the cache update leaves both the cache and the wire untouched.

use crate::error::GroupError;
use crate::persistence::PersistenceGateway;
use crate::services::ServiceRegistry;
use dashmap::DashMap;
use fleet_protocol::{
    DomainEvent, EventBus, GroupRemovePacket, GroupUpdatePacket, ProtocolEngine, ServiceGroup,
};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

/// Checks the invariants every stored group satisfies.
pub fn validate(group: &ServiceGroup) -> Result<(), GroupError> {
    let invalid = |reason: String| Err(GroupError::Validation(reason));

    if group.name.is_empty() {
        return invalid("name must not be empty".to_string());
    }
    if !group
        .name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    {
        return invalid(format!(
            "name '{}' may only contain letters, digits, '-' and '_'",
            group.name
        ));
    }
    if group.memory <= 0 {
        return invalid(format!("memory must be positive, got {}", group.memory));
    }
    if group.min_online < 0 || group.max_online < 0 {
        return invalid("service counts must not be negative".to_string());
    }
    if group.min_online > group.max_online {
        return invalid(format!(
            "min service count ({}) exceeds max service count ({})",
            group.min_online, group.max_online
        ));
    }
    if group.default_max_players < 0 {
        return invalid("default max players must not be negative".to_string());
    }
    Ok(())
}

pub struct GroupRegistry {
    groups: DashMap<String, ServiceGroup>,
    mutation: Mutex<()>,
    gateway: Arc<dyn PersistenceGateway>,
    services: Arc<ServiceRegistry>,
    engine: Arc<ProtocolEngine>,
    bus: Arc<EventBus>,
}

impl std::fmt::Debug for GroupRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GroupRegistry")
            .field("groups", &self.groups.len())
            .field("gateway", &self.gateway)
            .finish()
    }
}

impl GroupRegistry {
    pub fn new(
        gateway: Arc<dyn PersistenceGateway>,
        services: Arc<ServiceRegistry>,
        engine: Arc<ProtocolEngine>,
        bus: Arc<EventBus>,
    ) -> Self {
        Self {
            groups: DashMap::new(),
            mutation: Mutex::new(()),
            gateway,
            services,
            engine,
            bus,
        }
    }

    /// Fills the cache from storage. Stored groups that fail validation are skipped.
    pub async fn load(&self) -> Result<usize, GroupError> {
        let _guard = self.mutation.lock().await;
        let stored = self.gateway.load_all_groups().await?;
        let mut loaded = 0;
        for group in stored {
            if let Err(e) = validate(&group) {
                warn!("⚠️ Ignoring stored group '{}': {}", group.name, e);
                continue;
            }
            self.groups.insert(group.name.clone(), group);
            loaded += 1;
        }
        info!("📂 Loaded {} group(s) from storage", loaded);
        Ok(loaded)
    }

    /// Registers a new group.
    ///
    /// # Errors
    ///
    /// - [`GroupError::Validation`] if the definition breaks an invariant
    /// - [`GroupError::DuplicateName`] if the name is taken; the existing group is untouched
    /// - [`GroupError::Persistence`] if the durable write fails
    pub async fn create(&self, group: ServiceGroup) -> Result<ServiceGroup, GroupError> {
        let _guard = self.mutation.lock().await;
        validate(&group)?;
        if self.groups.contains_key(&group.name) {
            return Err(GroupError::DuplicateName(group.name));
        }

        self.gateway.save_group(&group).await?;
        self.groups.insert(group.name.clone(), group.clone());

        info!("📦 Group '{}' created ({})", group.name, group.version.title());
        self.engine.broadcast(&GroupUpdatePacket::from(&group));
        self.bus.publish(DomainEvent::GroupChanged(group.clone()));
        Ok(group)
    }

    /// Stops the group's services, then deletes it.
    ///
    /// The group leaves the cache first so the queue controller stops
    /// balancing it. If the durable delete fails the group is put back.
    pub async fn remove(&self, name: &str) -> Result<ServiceGroup, GroupError> {
        let _guard = self.mutation.lock().await;
        let (_, group) = self
            .groups
            .remove(name)
            .ok_or_else(|| GroupError::NotFound(name.to_string()))?;

        let mut stopped = self.services.stop_group(name).await;
        if let Err(e) = self.gateway.delete_group(name).await {
            warn!("⚠️ Could not delete group '{}', restoring it: {}", name, e);
            self.groups.insert(name.to_string(), group);
            return Err(e.into());
        }
        // A pass that read the group before it left the cache may have started more.
        stopped += self.services.stop_group(name).await;

        info!("🗑️ Group '{}' removed ({} service(s) stopped)", name, stopped);
        self.engine.broadcast(&GroupRemovePacket { name: name.to_string() });
        self.bus.publish(DomainEvent::GroupRemoved(name.to_string()));
        Ok(group)
    }

    /// Edits a group all-or-nothing.
    ///
    /// `mutator` works on a copy. The copy replaces the cached group only if
    /// the mutator succeeds, the result validates and the durable write
    /// succeeds; otherwise the cache and the fleet never see the change.
    pub async fn edit<F>(&self, name: &str, mutator: F) -> Result<ServiceGroup, GroupError>
    where
        F: FnOnce(&mut ServiceGroup) -> Result<(), GroupError>,
    {
        let _guard = self.mutation.lock().await;
        let mut copy = self
            .get(name)
            .ok_or_else(|| GroupError::NotFound(name.to_string()))?;

        mutator(&mut copy)?;
        if copy.name != name {
            return Err(GroupError::Validation("a group cannot be renamed".to_string()));
        }
        validate(&copy)?;

        self.gateway.save_group(&copy).await?;
        self.groups.insert(copy.name.clone(), copy.clone());

        info!("✏️ Group '{}' updated", name);
        self.engine.broadcast(&GroupUpdatePacket::from(&copy));
        self.bus.publish(DomainEvent::GroupChanged(copy.clone()));
        Ok(copy)
    }

    pub fn get(&self, name: &str) -> Option<ServiceGroup> {
        self.groups.get(name).map(|entry| entry.clone())
    }

    /// Every group, ordered by name.
    pub fn get_all(&self) -> Vec<ServiceGroup> {
        let mut groups: Vec<ServiceGroup> = self.groups.iter().map(|entry| entry.clone()).collect();
        groups.sort_by(|a, b| a.name.cmp(&b.name));
        groups
    }

    pub fn contains(&self, name: &str) -> bool {
        self.groups.contains_key(name)
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::persistence::MemoryGateway;
    use crate::services::ServiceSpec;
    use crate::testing::RecordingLauncher;
    use fleet_protocol::{EventKind, GameServerVersion, ServiceState, DEFAULT_MAX_FRAME_LEN};
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Fixture {
        groups: GroupRegistry,
        services: Arc<ServiceRegistry>,
        gateway: Arc<MemoryGateway>,
        bus: Arc<EventBus>,
    }

    fn fixture() -> Fixture {
        let engine = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
        let bus = EventBus::new();
        let gateway = Arc::new(MemoryGateway::new());
        let services = Arc::new(ServiceRegistry::new(
            Arc::clone(&engine),
            Arc::clone(&bus),
            RecordingLauncher::new(),
        ));
        let groups = GroupRegistry::new(
            gateway.clone(),
            Arc::clone(&services),
            engine,
            Arc::clone(&bus),
        );
        Fixture { groups, services, gateway, bus }
    }

    fn lobby() -> ServiceGroup {
        ServiceGroup::new("lobby", "Master", 512, false, GameServerVersion::Paper1_20)
    }

    #[tokio::test]
    async fn duplicate_create_leaves_original_untouched() {
        let fx = fixture();
        let original = fx.groups.create(lobby()).await.unwrap();

        let mut imposter = lobby();
        imposter.memory = 4096;
        let err = fx.groups.create(imposter).await.unwrap_err();
        assert!(matches!(err, GroupError::DuplicateName(name) if name == "lobby"));
        assert_eq!(fx.groups.get("lobby"), Some(original.clone()));
        assert_eq!(fx.gateway.stored("lobby"), Some(original));
    }

    #[tokio::test]
    async fn edit_changes_exactly_the_edited_field() {
        let fx = fixture();
        let before = fx.groups.create(lobby()).await.unwrap();

        fx.groups
            .edit("lobby", |group| {
                group.max_online = 5;
                Ok(())
            })
            .await
            .unwrap();

        let after = fx.groups.get("lobby").unwrap();
        assert_eq!(after.max_online, 5);
        assert_eq!(ServiceGroup { max_online: before.max_online, ..after.clone() }, before);
        assert_eq!(fx.gateway.stored("lobby"), Some(after));
    }

    #[tokio::test]
    async fn edit_is_all_or_nothing() {
        let fx = fixture();
        let before = fx.groups.create(lobby()).await.unwrap();
        let changes = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&changes);
        fx.bus.subscribe(EventKind::GroupChanged, move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });

        // failing mutator
        let result = fx
            .groups
            .edit("lobby", |group| {
                group.memory = 1;
                Err(GroupError::Validation("nope".to_string()))
            })
            .await;
        assert!(result.is_err());

        // min above max
        let result = fx
            .groups
            .edit("lobby", |group| {
                group.min_online = 3;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GroupError::Validation(_))));

        // storage down
        fx.gateway.set_available(false);
        let result = fx
            .groups
            .edit("lobby", |group| {
                group.fallback = true;
                Ok(())
            })
            .await;
        assert!(matches!(result, Err(GroupError::Persistence(_))));

        assert_eq!(fx.groups.get("lobby"), Some(before));
        assert_eq!(changes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn failed_persist_on_create_keeps_cache_empty() {
        let fx = fixture();
        fx.gateway.set_available(false);
        assert!(fx.groups.create(lobby()).await.is_err());
        assert!(fx.groups.get("lobby").is_none());
    }

    #[tokio::test]
    async fn invalid_definitions_are_rejected() {
        let fx = fixture();
        let mut group = lobby();
        group.min_online = 2;
        group.max_online = 1;
        assert!(matches!(fx.groups.create(group).await, Err(GroupError::Validation(_))));

        let mut group = lobby();
        group.name = "../etc".to_string();
        assert!(matches!(fx.groups.create(group).await, Err(GroupError::Validation(_))));
        assert!(fx.groups.is_empty());
    }

    #[tokio::test]
    async fn remove_stops_services_then_deletes() {
        let fx = fixture();
        let group = fx.groups.create(lobby()).await.unwrap();
        fx.services.register(ServiceSpec::for_group(&group, "127.0.0.1", 30000));
        fx.services.start("lobby-1").await.unwrap();

        fx.groups.remove("lobby").await.unwrap();
        assert!(fx.groups.get("lobby").is_none());
        assert!(fx.gateway.stored("lobby").is_none());
        assert_eq!(fx.services.get_by_name("lobby-1").unwrap().state, ServiceState::Stopping);

        assert!(matches!(fx.groups.remove("lobby").await, Err(GroupError::NotFound(_))));
    }

    #[tokio::test]
    async fn failed_delete_restores_the_group() {
        let fx = fixture();
        let group = fx.groups.create(lobby()).await.unwrap();
        fx.gateway.set_available(false);

        let result = fx.groups.remove("lobby").await;
        assert!(matches!(result, Err(GroupError::Persistence(_))));
        assert_eq!(fx.groups.get("lobby"), Some(group.clone()));
        assert_eq!(fx.gateway.stored("lobby"), Some(group));
    }

    #[tokio::test]
    async fn load_populates_cache_from_storage() {
        let fx = fixture();
        fx.gateway.save_group(&lobby()).await.unwrap();
        let mut broken = ServiceGroup::new("broken", "Master", 512, false, GameServerVersion::Paper1_8);
        broken.min_online = 9;
        fx.gateway.save_group(&broken).await.unwrap();

        assert_eq!(fx.groups.load().await.unwrap(), 1);
        assert!(fx.groups.contains("lobby"));
        assert!(!fx.groups.contains("broken"));
    }
}
