//! Starting and stopping service processes.
//!
//! The master never spawns processes itself. [`RemoteLauncher`] forwards the
//! request to the worker node hosting the service; the worker answers later
//! with `ServiceStateUpdate` packets.

use crate::error::LaunchError;
use async_trait::async_trait;
use fleet_protocol::{
    ConnectionId, ProtocolEngine, Service, ServiceStartRequestPacket, ServiceStopRequestPacket,
};
use std::sync::Arc;
use tracing::debug;

#[async_trait]
pub trait ServiceLauncher: Send + Sync + std::fmt::Debug {
    async fn start(&self, service: &Service) -> Result<(), LaunchError>;

    async fn stop(&self, service: &Service) -> Result<(), LaunchError>;
}

/// Sends start/stop requests to the node a service is placed on.
#[derive(Debug)]
pub struct RemoteLauncher {
    engine: Arc<ProtocolEngine>,
}

impl RemoteLauncher {
    pub fn new(engine: Arc<ProtocolEngine>) -> Self {
        Self { engine }
    }

    fn node_connection(&self, node: &str) -> Result<ConnectionId, LaunchError> {
        self.engine
            .connection_for_node(node)
            .ok_or_else(|| LaunchError::NodeUnavailable(node.to_string()))
    }
}

#[async_trait]
impl ServiceLauncher for RemoteLauncher {
    async fn start(&self, service: &Service) -> Result<(), LaunchError> {
        let connection = self.node_connection(&service.node)?;
        self.engine
            .send(connection, &ServiceStartRequestPacket { service: service.clone() })
            .map_err(|e| LaunchError::Rejected(e.to_string()))?;
        debug!("🚀 Requested start of '{}' on node '{}'", service.name, service.node);
        Ok(())
    }

    async fn stop(&self, service: &Service) -> Result<(), LaunchError> {
        let connection = self.node_connection(&service.node)?;
        self.engine
            .send(connection, &ServiceStopRequestPacket { name: service.name.clone() })
            .map_err(|e| LaunchError::Rejected(e.to_string()))?;
        debug!("🛑 Requested stop of '{}' on node '{}'", service.name, service.node);
        Ok(())
    }
}
