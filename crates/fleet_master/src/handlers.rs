//! Packet handlers and connection hooks of the master.

use crate::context::CloudContext;
use fleet_protocol::{
    GroupUpdatePacket, NodeHandshakePacket, NodeInfo, NodeKind, PlayerLoginPacket,
    PlayerUpdatePacket, ProtocolError, RemovalReason, ServiceCacheUpdatePacket, ServiceState,
    ServiceStateUpdatePacket,
};
use std::sync::Arc;
use tracing::{info, warn};

pub(crate) fn install(ctx: &Arc<CloudContext>) -> Result<(), ProtocolError> {
    let weak = Arc::downgrade(ctx);
    ctx.engine.on::<NodeHandshakePacket, _>(move |packet, conn| {
        let Some(ctx) = weak.upgrade() else {
            return Ok(());
        };
        let node = NodeInfo::from(&packet);
        info!("🤝 Node '{}' ({:?}) joined from {}", node.name, node.kind, conn.remote_addr);
        conn.set_node(node)?;

        // Bring the node's mirror up to date before anything else reaches it.
        for group in ctx.groups.get_all() {
            conn.reply(&GroupUpdatePacket::from(&group))?;
        }
        conn.reply(&ServiceCacheUpdatePacket {
            services: ctx.services.get_all(),
        })?;
        for player in ctx.players.snapshot() {
            conn.reply(&PlayerLoginPacket {
                uuid: player.uuid,
                username: player.username.clone(),
            })?;
            conn.reply(&PlayerUpdatePacket {
                uuid: player.uuid,
                proxy_service: player.proxy_service,
                game_service: player.game_service,
            })?;
        }

        if packet.kind == NodeKind::Worker {
            ctx.queue.trigger();
        }
        Ok(())
    })?;

    let weak = Arc::downgrade(ctx);
    ctx.engine.on::<ServiceStateUpdatePacket, _>(move |packet, conn| {
        let Some(ctx) = weak.upgrade() else {
            return Ok(());
        };
        if packet.state == ServiceState::Stopped {
            let reason = if ctx.services.is_stop_requested(&packet.name) {
                RemovalReason::Stopped
            } else {
                RemovalReason::Crashed
            };
            if ctx.services.unregister(&packet.name, reason).is_none() {
                warn!("STOPPED reported for unknown service '{}' by connection {}", packet.name, conn.connection);
            }
            return Ok(());
        }

        ctx.services
            .set_state(&packet.name, packet.state)
            .map(|_| ())
            .map_err(|e| ProtocolError::Handler(e.to_string()))
    })?;

    let weak = Arc::downgrade(ctx);
    ctx.engine.on_close(move |_, node| {
        let (Some(ctx), Some(node)) = (weak.upgrade(), node) else {
            return;
        };
        if node.kind != NodeKind::Worker {
            return;
        }
        let lost = ctx.services.get_by_node(&node.name);
        if !lost.is_empty() {
            warn!("💥 Worker '{}' lost with {} service(s)", node.name, lost.len());
        }
        for service in lost {
            let reason = if ctx.services.is_stop_requested(&service.name) {
                RemovalReason::Stopped
            } else {
                RemovalReason::Crashed
            };
            ctx.services.unregister(&service.name, reason);
        }
    });

    Ok(())
}
