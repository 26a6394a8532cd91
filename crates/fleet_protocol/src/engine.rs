//! # Protocol Engine
//!
//! Owns every persistent connection of a node and routes decoded packets to
//! the handler registered for their kind.
//!
//! ## Connection model
//!
//! Each attached stream is split into two tasks:
//!
//! - a **reader** that decodes frames and dispatches them on the I/O task,
//! - a **writer** fed by an unbounded channel, so [`ProtocolEngine::send`] and
//!   [`ProtocolEngine::broadcast`] never block the caller.
//!
//! Unknown opcodes and malformed payloads are logged and the single frame is
//! dropped. Only an I/O failure or an oversized frame ends a connection, at
//! which point the registered close hooks run exactly once.
//!
//! ## Handlers
//!
//! At most one handler exists per [`PacketKind`]. Handlers run synchronously
//! on the reader task and must not block; async work is spawned.

use crate::error::ProtocolError;
use crate::frame::{Frame, FrameCodec};
use crate::packets::{NodeHandshakePacket, Packet, PacketKind};
use crate::types::NodeKind;
use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use futures::{SinkExt, StreamExt};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::{TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tokio::task::AbortHandle;
use tokio_util::codec::Framed;
use tracing::{debug, info, trace, warn};

/// Identifier of one connection, unique for the engine's lifetime.
pub type ConnectionId = u64;

/// Identity a connection announced with its handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeInfo {
    pub name: String,
    pub kind: NodeKind,
    pub host: String,
}

impl From<&NodeHandshakePacket> for NodeInfo {
    fn from(packet: &NodeHandshakePacket) -> Self {
        Self {
            name: packet.name.clone(),
            kind: packet.kind,
            host: packet.host.clone(),
        }
    }
}

type PacketHandler = Arc<dyn Fn(&PacketContext, Bytes) -> Result<(), ProtocolError> + Send + Sync>;
type CloseHook = Arc<dyn Fn(ConnectionId, Option<&NodeInfo>) + Send + Sync>;

struct Peer {
    remote_addr: SocketAddr,
    outbound: mpsc::UnboundedSender<Frame>,
    node: Option<NodeInfo>,
    reader: Option<AbortHandle>,
}

/// What a handler knows about the connection a packet arrived on.
#[derive(Clone)]
pub struct PacketContext {
    pub connection: ConnectionId,
    pub remote_addr: SocketAddr,
    engine: Arc<ProtocolEngine>,
}

impl std::fmt::Debug for PacketContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PacketContext")
            .field("connection", &self.connection)
            .field("remote_addr", &self.remote_addr)
            .finish()
    }
}

impl PacketContext {
    /// Sends a packet back on the connection that delivered the current one.
    pub fn reply<P: Packet>(&self, packet: &P) -> Result<(), ProtocolError> {
        self.engine.send(self.connection, packet)
    }

    pub fn node(&self) -> Option<NodeInfo> {
        self.engine.node(self.connection)
    }

    pub fn set_node(&self, node: NodeInfo) -> Result<(), ProtocolError> {
        self.engine.set_node(self.connection, node)
    }

    pub fn engine(&self) -> &Arc<ProtocolEngine> {
        &self.engine
    }
}

/// Connection table plus per-kind dispatch table.
pub struct ProtocolEngine {
    connections: DashMap<ConnectionId, Peer>,
    handlers: DashMap<PacketKind, PacketHandler>,
    close_hooks: RwLock<Vec<CloseHook>>,
    next_connection_id: AtomicU64,
    max_frame_len: usize,
}

impl std::fmt::Debug for ProtocolEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProtocolEngine")
            .field("connections", &self.connections.len())
            .field("handlers", &self.handlers.len())
            .field("max_frame_len", &self.max_frame_len)
            .finish()
    }
}

impl ProtocolEngine {
    /// Creates an engine whose connections accept payloads up to `max_frame_len` bytes.
    pub fn new(max_frame_len: usize) -> Arc<Self> {
        Arc::new(Self {
            connections: DashMap::new(),
            handlers: DashMap::new(),
            close_hooks: RwLock::new(Vec::new()),
            next_connection_id: AtomicU64::new(1),
            max_frame_len,
        })
    }

    pub fn max_frame_len(&self) -> usize {
        self.max_frame_len
    }

    // ------------------------------------------------------------------
    // Registration
    // ------------------------------------------------------------------

    /// Registers the handler for packets of type `P`.
    ///
    /// # Errors
    ///
    /// [`ProtocolError::HandlerAlreadyRegistered`] if `P::KIND` already has one.
    pub fn on<P, F>(&self, handler: F) -> Result<(), ProtocolError>
    where
        P: Packet,
        F: Fn(P, &PacketContext) -> Result<(), ProtocolError> + Send + Sync + 'static,
    {
        match self.handlers.entry(P::KIND) {
            Entry::Occupied(_) => Err(ProtocolError::HandlerAlreadyRegistered(P::KIND)),
            Entry::Vacant(slot) => {
                let erased: PacketHandler = Arc::new(move |ctx: &PacketContext, payload: Bytes| {
                    let packet = P::decode(payload)?;
                    handler(packet, ctx)
                });
                slot.insert(erased);
                debug!("📝 Registered handler for {:?}", P::KIND);
                Ok(())
            }
        }
    }

    /// Runs `hook` whenever a connection ends, with the node it belonged to.
    pub fn on_close<F>(&self, hook: F)
    where
        F: Fn(ConnectionId, Option<&NodeInfo>) + Send + Sync + 'static,
    {
        self.close_hooks
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Arc::new(hook));
    }

    // ------------------------------------------------------------------
    // Inbound
    // ------------------------------------------------------------------

    /// Decodes `frame` and hands it to the handler for its kind.
    pub fn dispatch(self: &Arc<Self>, connection: ConnectionId, frame: Frame) -> Result<(), ProtocolError> {
        let kind = PacketKind::try_from(frame.opcode)?;
        let remote_addr = self
            .connections
            .get(&connection)
            .map(|peer| peer.remote_addr)
            .ok_or(ProtocolError::UnknownConnection(connection))?;

        // Clone out of the table so a handler may register or dispatch itself.
        let handler = self
            .handlers
            .get(&kind)
            .map(|entry| Arc::clone(entry.value()))
            .ok_or(ProtocolError::NoHandler(kind))?;

        trace!("📨 {:?} ({} bytes) from connection {}", kind, frame.payload.len(), connection);
        let ctx = PacketContext {
            connection,
            remote_addr,
            engine: Arc::clone(self),
        };
        handler(&ctx, frame.payload)
    }

    /// Takes ownership of a byte stream and starts its reader and writer tasks.
    ///
    /// # Arguments
    ///
    /// * `stream` - Any duplex byte stream (TCP socket, in-memory pipe)
    /// * `remote_addr` - Peer address reported to handlers
    ///
    /// # Returns
    ///
    /// The id of the new connection.
    pub fn attach<S>(self: &Arc<Self>, stream: S, remote_addr: SocketAddr) -> ConnectionId
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let id = self.next_connection_id.fetch_add(1, Ordering::Relaxed);
        let (mut sink, mut frames) = Framed::new(stream, FrameCodec::new(self.max_frame_len)).split();
        let (outbound, mut outbound_rx) = mpsc::unbounded_channel::<Frame>();

        self.connections.insert(
            id,
            Peer {
                remote_addr,
                outbound,
                node: None,
                reader: None,
            },
        );

        tokio::spawn(async move {
            while let Some(frame) = outbound_rx.recv().await {
                if let Err(e) = sink.send(frame).await {
                    warn!("❌ Write to connection {} failed: {}", id, e);
                    break;
                }
            }
            let _ = sink.close().await;
        });

        let engine = Arc::clone(self);
        let reader = tokio::spawn(async move {
            while let Some(next) = frames.next().await {
                match next {
                    Ok(frame) => {
                        let opcode = frame.opcode;
                        if let Err(e) = engine.dispatch(id, frame) {
                            warn!("⚠️ Dropped frame {:#06x} from connection {}: {}", opcode, id, e);
                        }
                    }
                    Err(e) => {
                        warn!("🔌 Closing connection {}: {}", id, e);
                        break;
                    }
                }
            }
            engine.disconnect(id);
        });

        if let Some(mut peer) = self.connections.get_mut(&id) {
            peer.reader = Some(reader.abort_handle());
        }

        info!("🔗 Connection {} established with {}", id, remote_addr);
        id
    }

    /// Opens a TCP connection to a master and attaches it.
    pub async fn connect(self: &Arc<Self>, addr: impl ToSocketAddrs) -> Result<ConnectionId, ProtocolError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        let remote_addr = stream.peer_addr()?;
        Ok(self.attach(stream, remote_addr))
    }

    // ------------------------------------------------------------------
    // Outbound
    // ------------------------------------------------------------------

    /// Queues `packet` for one connection.
    pub fn send<P: Packet>(&self, connection: ConnectionId, packet: &P) -> Result<(), ProtocolError> {
        self.send_frame(connection, packet.to_frame())
    }

    fn send_frame(&self, connection: ConnectionId, frame: Frame) -> Result<(), ProtocolError> {
        let peer = self
            .connections
            .get(&connection)
            .ok_or(ProtocolError::UnknownConnection(connection))?;
        peer.outbound
            .send(frame)
            .map_err(|_| ProtocolError::ConnectionClosed(connection))
    }

    /// Queues `packet` for every connection and returns how many accepted it.
    pub fn broadcast<P: Packet>(&self, packet: &P) -> usize {
        self.fan_out(packet.to_frame(), None)
    }

    /// Like [`broadcast`](Self::broadcast), skipping the originating connection.
    pub fn broadcast_except<P: Packet>(&self, except: ConnectionId, packet: &P) -> usize {
        self.fan_out(packet.to_frame(), Some(except))
    }

    fn fan_out(&self, frame: Frame, except: Option<ConnectionId>) -> usize {
        let mut delivered = 0;
        for peer in self.connections.iter() {
            if Some(*peer.key()) == except {
                continue;
            }
            if peer.outbound.send(frame.clone()).is_ok() {
                delivered += 1;
            }
        }
        trace!("📡 Broadcast {:#06x} to {} connections", frame.opcode, delivered);
        delivered
    }

    // ------------------------------------------------------------------
    // Connection table
    // ------------------------------------------------------------------

    /// Closes a connection and runs the close hooks. Returns `false` if it was already gone.
    pub fn disconnect(&self, connection: ConnectionId) -> bool {
        let Some((_, peer)) = self.connections.remove(&connection) else {
            return false;
        };
        if let Some(reader) = peer.reader {
            reader.abort();
        }
        // Dropping the sender lets the writer flush what is queued and exit.
        drop(peer.outbound);

        match &peer.node {
            Some(node) => info!("🔌 Node '{}' (connection {}) disconnected", node.name, connection),
            None => info!("🔌 Connection {} from {} closed", connection, peer.remote_addr),
        }

        let hooks: Vec<CloseHook> = self
            .close_hooks
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .clone();
        for hook in hooks {
            hook(connection, peer.node.as_ref());
        }
        true
    }

    /// Closes every connection.
    pub fn shutdown(&self) {
        let ids: Vec<ConnectionId> = self.connections.iter().map(|peer| *peer.key()).collect();
        for id in ids {
            self.disconnect(id);
        }
    }

    pub fn set_node(&self, connection: ConnectionId, node: NodeInfo) -> Result<(), ProtocolError> {
        let mut peer = self
            .connections
            .get_mut(&connection)
            .ok_or(ProtocolError::UnknownConnection(connection))?;
        peer.node = Some(node);
        Ok(())
    }

    pub fn node(&self, connection: ConnectionId) -> Option<NodeInfo> {
        self.connections.get(&connection).and_then(|peer| peer.node.clone())
    }

    /// Finds the connection of the node that handshook as `name`.
    pub fn connection_for_node(&self, name: &str) -> Option<ConnectionId> {
        self.connections
            .iter()
            .find(|peer| peer.node.as_ref().is_some_and(|node| node.name == name))
            .map(|peer| *peer.key())
    }

    pub fn nodes(&self) -> Vec<(ConnectionId, NodeInfo)> {
        self.connections
            .iter()
            .filter_map(|peer| peer.node.clone().map(|node| (*peer.key(), node)))
            .collect()
    }

    pub fn remote_addr(&self, connection: ConnectionId) -> Option<SocketAddr> {
        self.connections.get(&connection).map(|peer| peer.remote_addr)
    }

    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }
}
