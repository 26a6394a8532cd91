//! # Core Type Definitions
//!
//! Domain types shared by the master and every subordinate node: groups,
//! services, players and the small enumerations their wire encoding relies
//! on.
//!
//! ## Key Types
//!
//! - [`ServiceGroup`] - Named template/policy for a class of server instances
//! - [`Service`] - One running server instance spawned from a group
//! - [`Player`] - A connected player and the services it is attached to
//! - [`GameServerVersion`] - Runtime flavour of a group, proxy or game server
//! - [`ServiceState`] - Lifecycle state machine of a service

use crate::error::CodecError;
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

// ============================================================================
// Game versions
// ============================================================================

/// Runtime flavour a group's services run.
///
/// Each version has a stable wire name (used by the `GroupUpdate` packet and
/// the `group create` command) and knows whether it is a proxy front-end.
///
/// ```rust
/// use fleet_protocol::GameServerVersion;
///
/// let version = GameServerVersion::by_name("1.8").unwrap();
/// assert!(!version.is_proxy());
/// assert!(GameServerVersion::by_name("VELOCITY").unwrap().is_proxy());
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum GameServerVersion {
    #[serde(rename = "bungeecord")]
    BungeeCord,
    #[serde(rename = "waterfall")]
    Waterfall,
    #[serde(rename = "velocity")]
    Velocity,
    #[serde(rename = "1.8")]
    Paper1_8,
    #[serde(rename = "1.12")]
    Paper1_12,
    #[serde(rename = "1.16")]
    Paper1_16,
    #[serde(rename = "1.17")]
    Paper1_17,
    #[serde(rename = "1.18")]
    Paper1_18,
    #[serde(rename = "1.19")]
    Paper1_19,
    #[serde(rename = "1.20")]
    Paper1_20,
}

impl GameServerVersion {
    /// Every supported version, in listing order.
    pub const ALL: [GameServerVersion; 10] = [
        Self::BungeeCord,
        Self::Waterfall,
        Self::Velocity,
        Self::Paper1_8,
        Self::Paper1_12,
        Self::Paper1_16,
        Self::Paper1_17,
        Self::Paper1_18,
        Self::Paper1_19,
        Self::Paper1_20,
    ];

    /// Stable name used on the wire and in commands.
    pub fn name(self) -> &'static str {
        match self {
            Self::BungeeCord => "bungeecord",
            Self::Waterfall => "waterfall",
            Self::Velocity => "velocity",
            Self::Paper1_8 => "1.8",
            Self::Paper1_12 => "1.12",
            Self::Paper1_16 => "1.16",
            Self::Paper1_17 => "1.17",
            Self::Paper1_18 => "1.18",
            Self::Paper1_19 => "1.19",
            Self::Paper1_20 => "1.20",
        }
    }

    /// Human-readable title for listings.
    pub fn title(self) -> &'static str {
        match self {
            Self::BungeeCord => "BungeeCord",
            Self::Waterfall => "Waterfall",
            Self::Velocity => "Velocity",
            Self::Paper1_8 => "Paper 1.8.8",
            Self::Paper1_12 => "Paper 1.12.2",
            Self::Paper1_16 => "Paper 1.16.5",
            Self::Paper1_17 => "Paper 1.17.1",
            Self::Paper1_18 => "Paper 1.18.2",
            Self::Paper1_19 => "Paper 1.19.4",
            Self::Paper1_20 => "Paper 1.20.4",
        }
    }

    pub fn is_proxy(self) -> bool {
        matches!(self, Self::BungeeCord | Self::Waterfall | Self::Velocity)
    }

    /// Case-insensitive lookup by wire name.
    pub fn by_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|version| version.name().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for GameServerVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ============================================================================
// Service lifecycle
// ============================================================================

/// Lifecycle state of a service.
///
/// ```text
/// PREPARED -> STARTING -> ONLINE -> STOPPING -> STOPPED
///                  \_________________^
/// ```
///
/// `STARTING -> STOPPING` covers a boot that is aborted or crashes before
/// the instance reports itself online.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServiceState {
    Prepared = 0,
    Starting = 1,
    Online = 2,
    Stopping = 3,
    Stopped = 4,
}

impl ServiceState {
    pub fn can_transition_to(self, next: ServiceState) -> bool {
        use ServiceState::*;
        matches!(
            (self, next),
            (Prepared, Starting)
                | (Starting, Online)
                | (Starting, Stopping)
                | (Online, Stopping)
                | (Stopping, Stopped)
        )
    }

    /// Whether the service counts towards its group's online capacity.
    pub fn counts_as_online(self) -> bool {
        matches!(self, Self::Starting | Self::Online)
    }

    pub fn is_terminal(self) -> bool {
        self == Self::Stopped
    }
}

impl TryFrom<u8> for ServiceState {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Prepared),
            1 => Ok(Self::Starting),
            2 => Ok(Self::Online),
            3 => Ok(Self::Stopping),
            4 => Ok(Self::Stopped),
            value => Err(CodecError::InvalidDiscriminant { field: "service state", value }),
        }
    }
}

impl fmt::Display for ServiceState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Prepared => "PREPARED",
            Self::Starting => "STARTING",
            Self::Online => "ONLINE",
            Self::Stopping => "STOPPING",
            Self::Stopped => "STOPPED",
        };
        f.write_str(label)
    }
}

/// Invisible services are excluded from fallback selection and public listings.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ServiceVisibility {
    Visible = 0,
    Invisible = 1,
}

impl TryFrom<u8> for ServiceVisibility {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Visible),
            1 => Ok(Self::Invisible),
            value => Err(CodecError::InvalidDiscriminant { field: "service visibility", value }),
        }
    }
}

/// What a subordinate node is, announced in its handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum NodeKind {
    Worker = 0,
    Proxy = 1,
}

impl TryFrom<u8> for NodeKind {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        match value {
            0 => Ok(Self::Worker),
            1 => Ok(Self::Proxy),
            value => Err(CodecError::InvalidDiscriminant { field: "node kind", value }),
        }
    }
}

// ============================================================================
// Entities
// ============================================================================

/// A named template and capacity policy for a class of server instances.
///
/// Groups are the only persisted entity; the JSON form produced by serde is
/// what the file-backed persistence gateway stores.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceGroup {
    /// Globally unique, case-sensitive name
    pub name: String,
    /// Node the group's services are placed on
    pub node: String,
    /// Template directory the services are provisioned from
    pub template: String,
    pub motd: String,
    /// Memory per instance, in megabytes
    pub memory: i32,
    pub min_online: i32,
    pub max_online: i32,
    pub default_max_players: i32,
    pub version: GameServerVersion,
    pub fallback: bool,
    pub maintenance: bool,
    /// Static groups keep their working directory between restarts
    #[serde(default)]
    pub static_service: bool,
}

impl ServiceGroup {
    /// Builds a group with the defaults the `group create` command applies.
    pub fn new(
        name: impl Into<String>,
        node: impl Into<String>,
        memory: i32,
        static_service: bool,
        version: GameServerVersion,
    ) -> Self {
        let name = name.into();
        Self {
            template: name.clone(),
            name,
            node: node.into(),
            motd: "A fleet service".to_string(),
            memory,
            min_online: 1,
            max_online: 1,
            default_max_players: if version.is_proxy() { 512 } else { 50 },
            version,
            fallback: false,
            maintenance: false,
            static_service,
        }
    }
}

/// One live server instance spawned from a group.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Service {
    /// `"{group}-{id}"`
    pub name: String,
    /// Group-scoped sequential id, starting at 1
    pub id: u32,
    /// Name of the owning group
    pub group: String,
    /// Node hosting the process
    pub node: String,
    pub host: String,
    pub port: u16,
    pub state: ServiceState,
    pub visibility: ServiceVisibility,
    pub max_players: i32,
    pub motd: String,
}

impl Service {
    pub fn name_for(group: &str, id: u32) -> String {
        format!("{group}-{id}")
    }

    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// A player connected somewhere in the fleet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Player {
    pub uuid: Uuid,
    pub username: String,
    /// Name of the proxy service the player is routed through
    pub proxy_service: Option<String>,
    /// Name of the game service the player is playing on
    pub game_service: Option<String>,
}

impl Player {
    pub fn new(uuid: Uuid, username: impl Into<String>) -> Self {
        Self {
            uuid,
            username: username.into(),
            proxy_service: None,
            game_service: None,
        }
    }
}
