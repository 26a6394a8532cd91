//! Master configuration types and defaults.
//!
//! This module contains the runtime configuration handed to the master by
//! the binary after the TOML file and command-line overrides are merged.

use serde::{Deserialize, Serialize};
use std::net::SocketAddr;

/// Which player references a service removal evicts.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CascadePolicy {
    /// Evict players routed through the removed proxy only
    #[default]
    ProxyOnly,
    /// Also evict players whose game service was removed
    ProxyAndGame,
}

/// Configuration structure for the master.
#[derive(Debug, Clone)]
pub struct MasterConfig {
    /// Name this node uses for groups placed on it
    pub node_name: String,

    /// The socket address subordinate nodes connect to
    pub bind_address: SocketAddr,

    /// Host advertised for services when the target node did not announce one
    pub default_host: String,

    /// Largest accepted packet payload, in bytes
    pub max_frame_len: usize,

    /// Whether the queue controller starts and retires services
    pub queue_enabled: bool,

    /// First port handed to proxy services
    pub proxy_port_start: u16,

    /// First port handed to game services
    pub server_port_start: u16,

    /// Number of ports available from each start port
    pub port_range: u16,

    pub cascade_policy: CascadePolicy,
}

impl Default for MasterConfig {
    fn default() -> Self {
        Self {
            node_name: "Master".to_string(),
            bind_address: SocketAddr::from(([127, 0, 0, 1], 7000)),
            default_host: "127.0.0.1".to_string(),
            max_frame_len: fleet_protocol::DEFAULT_MAX_FRAME_LEN,
            queue_enabled: true,
            proxy_port_start: 25565,
            server_port_start: 30000,
            port_range: 1000,
            cascade_policy: CascadePolicy::ProxyOnly,
        }
    }
}
