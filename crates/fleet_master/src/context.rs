//! The master's explicit context object.
//!
//! Every registry, the protocol engine and the event bus are built and wired
//! together once, here, and handed around as one `Arc<CloudContext>`.

use crate::config::MasterConfig;
use crate::error::ServerError;
use crate::groups::GroupRegistry;
use crate::handlers;
use crate::launcher::{RemoteLauncher, ServiceLauncher};
use crate::persistence::PersistenceGateway;
use crate::players::PlayerRegistry;
use crate::ports::RangePortAllocator;
use crate::queue::QueueController;
use crate::services::ServiceRegistry;
use fleet_protocol::{EventBus, ProtocolEngine, Service};
use std::sync::Arc;

#[derive(Debug)]
pub struct CloudContext {
    pub config: MasterConfig,
    pub engine: Arc<ProtocolEngine>,
    pub bus: Arc<EventBus>,
    pub gateway: Arc<dyn PersistenceGateway>,
    pub groups: Arc<GroupRegistry>,
    pub services: Arc<ServiceRegistry>,
    pub players: Arc<PlayerRegistry>,
    pub queue: Arc<QueueController>,
}

impl CloudContext {
    /// Builds a master that launches services through its worker nodes.
    pub fn new(
        config: MasterConfig,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> Result<Arc<Self>, ServerError> {
        let engine = ProtocolEngine::new(config.max_frame_len);
        let launcher = Arc::new(RemoteLauncher::new(Arc::clone(&engine)));
        Self::assemble(config, gateway, engine, launcher)
    }

    /// Builds a master with a caller-supplied launcher.
    pub fn with_launcher(
        config: MasterConfig,
        gateway: Arc<dyn PersistenceGateway>,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Result<Arc<Self>, ServerError> {
        let engine = ProtocolEngine::new(config.max_frame_len);
        Self::assemble(config, gateway, engine, launcher)
    }

    fn assemble(
        config: MasterConfig,
        gateway: Arc<dyn PersistenceGateway>,
        engine: Arc<ProtocolEngine>,
        launcher: Arc<dyn ServiceLauncher>,
    ) -> Result<Arc<Self>, ServerError> {
        let bus = EventBus::new();
        let services = Arc::new(ServiceRegistry::new(
            Arc::clone(&engine),
            Arc::clone(&bus),
            launcher,
        ));
        let groups = Arc::new(GroupRegistry::new(
            Arc::clone(&gateway),
            Arc::clone(&services),
            Arc::clone(&engine),
            Arc::clone(&bus),
        ));
        let players = Arc::new(PlayerRegistry::new(config.cascade_policy));
        let ports = Arc::new(RangePortAllocator::new(
            config.proxy_port_start,
            config.server_port_start,
            config.port_range,
        ));
        let queue = Arc::new(QueueController::new(
            Arc::clone(&groups),
            Arc::clone(&services),
            Arc::clone(&engine),
            ports,
            config.default_host.clone(),
            config.queue_enabled,
        ));

        players.install(&engine, &bus, true)?;
        queue.subscribe(&bus);

        let ctx = Arc::new(Self {
            config,
            engine,
            bus,
            gateway,
            groups,
            services,
            players,
            queue,
        });
        handlers::install(&ctx)?;
        Ok(ctx)
    }

    /// Where to send a player leaving `current`, if anywhere.
    pub fn fallback_for(&self, current: Option<&str>) -> Option<Service> {
        self.services.fallback_for(current, &self.groups, &self.players)
    }

    /// Players connected to `service`, counted through the reference that
    /// matters for its group (proxy or game).
    pub fn online_players(&self, service: &Service) -> usize {
        let proxy = self
            .groups
            .get(&service.group)
            .is_some_and(|group| group.version.is_proxy());
        self.players.players_on(&service.name, proxy)
    }
}
