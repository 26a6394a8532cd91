//! # Fleet Protocol
//!
//! Everything the master and its subordinate nodes share: the binary wire
//! codec, the packet catalogue, the connection-owning protocol engine, the
//! in-process event bus and the domain types they carry.
//!
//! ## Core Features
//!
//! - **Typed packets**: every message is a struct implementing [`Packet`] with
//!   a fixed opcode and field order
//! - **Non-blocking I/O**: per connection one reader and one writer task;
//!   sends and broadcasts only enqueue
//! - **Tagged dispatch**: one handler per [`PacketKind`], a list of
//!   subscribers per [`EventKind`]
//! - **Cluster mirror**: a read-only replica of groups, services and players
//!   for nodes that are not the master
//!
//! ## Quick Start Example
//!
//! ```rust,no_run
//! use fleet_protocol::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), ProtocolError> {
//!     let engine = ProtocolEngine::new(DEFAULT_MAX_FRAME_LEN);
//!     let mirror = ClusterMirror::new();
//!     mirror.install(&engine)?;
//!
//!     let master = engine.connect("127.0.0.1:7000").await?;
//!     engine.send(master, &NodeHandshakePacket {
//!         name: "Worker-1".to_string(),
//!         kind: NodeKind::Worker,
//!         host: "10.0.0.2".to_string(),
//!     })?;
//!     Ok(())
//! }
//! ```

pub mod codec;
pub mod engine;
pub mod error;
pub mod events;
pub mod frame;
pub mod mirror;
pub mod packets;
pub mod types;

pub use codec::{NetworkBuf, NetworkReader};
pub use engine::{ConnectionId, NodeInfo, PacketContext, ProtocolEngine};
pub use error::{CodecError, EventError, ProtocolError};
pub use events::{DomainEvent, EventBus, EventBusStats, EventKind, RemovalReason};
pub use frame::{Frame, FrameCodec, DEFAULT_MAX_FRAME_LEN};
pub use mirror::ClusterMirror;
pub use packets::*;
pub use types::*;
