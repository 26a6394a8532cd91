//! # Fleet Master
//!
//! The authoritative node of a game-server fleet. The master owns the group
//! definitions, the live service table and the player cache, and keeps every
//! subordinate node (workers and proxies) in sync with them over the
//! `fleet_protocol` wire format.
//!
//! ## Architecture Overview
//!
//! * **Group Registry** - Durable service templates, serialized mutations
//! * **Service Registry** - Live instances and their lifecycle state machine
//! * **Player Registry** - Who is connected where, with the removal cascade
//! * **Queue Controller** - Keeps each group between its min and max online
//! * **Command Surface** - Operator commands over all of the above
//!
//! All of them are created together by [`CloudContext`] and reached through
//! it; nothing in this crate is global.
//!
//! ## Change Flow
//!
//! 1. A command or packet asks a registry for a change
//! 2. The registry validates, persists when durable, and applies it
//! 3. The matching packet is broadcast to every connected node
//! 4. A domain event is published on the [`fleet_protocol::EventBus`]
//! 5. Subscribers such as the queue controller and the player cascade react
//!
//! ## Error Handling
//!
//! Each registry has its own error type ([`GroupError`], [`ServiceError`],
//! [`PersistenceError`]); the server surfaces startup failures as
//! [`ServerError`] and commands map everything to a single
//! [`commands::CommandError`] message.

pub mod commands;
pub mod config;
pub mod context;
pub mod error;
pub mod groups;
mod handlers;
pub mod launcher;
pub mod persistence;
pub mod players;
pub mod ports;
pub mod queue;
pub mod server;
pub mod services;

#[cfg(test)]
mod testing;

pub use commands::{execute, help_lines, CommandError};
pub use config::{CascadePolicy, MasterConfig};
pub use context::CloudContext;
pub use error::{GroupError, LaunchError, PersistenceError, ServerError, ServiceError};
pub use groups::GroupRegistry;
pub use launcher::{RemoteLauncher, ServiceLauncher};
pub use persistence::{JsonFileGateway, MemoryGateway, PersistenceGateway};
pub use players::PlayerRegistry;
pub use ports::{PortAllocator, RangePortAllocator};
pub use queue::{QueueController, ReconcileSummary};
pub use server::MasterServer;
pub use services::{ServiceRegistry, ServiceSpec};
