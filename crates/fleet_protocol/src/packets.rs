//! Packet definitions and their field order on the wire.
//!
//! Every packet implements [`Packet`]: `write` and `read` visit the fields in
//! the same order, and [`Packet::decode`] rejects payloads with bytes left
//! over. Opcodes are grouped by concern:
//!
//! | range | concern |
//! |-------|---------|
//! | `0x01` | node handshake |
//! | `0x10..` | groups |
//! | `0x20..` | services |
//! | `0x30..` | players |

use crate::codec::{NetworkBuf, NetworkReader};
use crate::error::{CodecError, ProtocolError};
use crate::frame::Frame;
use crate::types::{
    GameServerVersion, NodeKind, Service, ServiceGroup, ServiceState, ServiceVisibility,
};
use bytes::Bytes;
use uuid::Uuid;

/// Tag of every packet the engine understands, keyed by opcode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum PacketKind {
    NodeHandshake = 0x01,
    GroupUpdate = 0x10,
    GroupRemove = 0x11,
    ServiceAdd = 0x20,
    ServiceRemove = 0x21,
    ServiceUpdate = 0x22,
    ServiceCacheUpdate = 0x23,
    ServiceStateUpdate = 0x24,
    ServiceStartRequest = 0x25,
    ServiceStopRequest = 0x26,
    PlayerLogin = 0x30,
    PlayerUpdate = 0x31,
    PlayerDisconnect = 0x32,
}

impl PacketKind {
    pub fn opcode(self) -> u16 {
        self as u16
    }
}

impl TryFrom<u16> for PacketKind {
    type Error = ProtocolError;

    fn try_from(opcode: u16) -> Result<Self, Self::Error> {
        Ok(match opcode {
            0x01 => Self::NodeHandshake,
            0x10 => Self::GroupUpdate,
            0x11 => Self::GroupRemove,
            0x20 => Self::ServiceAdd,
            0x21 => Self::ServiceRemove,
            0x22 => Self::ServiceUpdate,
            0x23 => Self::ServiceCacheUpdate,
            0x24 => Self::ServiceStateUpdate,
            0x25 => Self::ServiceStartRequest,
            0x26 => Self::ServiceStopRequest,
            0x30 => Self::PlayerLogin,
            0x31 => Self::PlayerUpdate,
            0x32 => Self::PlayerDisconnect,
            other => return Err(ProtocolError::UnknownOpcode(other)),
        })
    }
}

/// A typed message with a fixed opcode and field order.
pub trait Packet: Sized + Send + Sync + 'static {
    const KIND: PacketKind;

    fn write(&self, buf: &mut NetworkBuf);

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError>;

    fn encode(&self) -> Bytes {
        let mut buf = NetworkBuf::new();
        self.write(&mut buf);
        buf.freeze()
    }

    /// Decodes a complete payload, failing on truncation or trailing bytes.
    fn decode(payload: Bytes) -> Result<Self, CodecError> {
        let mut reader = NetworkReader::new(payload);
        let packet = Self::read(&mut reader)?;
        reader.finish()?;
        Ok(packet)
    }

    fn to_frame(&self) -> Frame {
        Frame::new(Self::KIND.opcode(), self.encode())
    }
}

fn to_u32(field: &'static str, value: i32) -> Result<u32, CodecError> {
    u32::try_from(value).map_err(|_| CodecError::OutOfRange { field, value: value.into() })
}

fn to_u16(field: &'static str, value: i32) -> Result<u16, CodecError> {
    u16::try_from(value).map_err(|_| CodecError::OutOfRange { field, value: value.into() })
}

fn write_service(buf: &mut NetworkBuf, service: &Service) {
    buf.write_string(&service.name)
        .write_i32(service.id as i32)
        .write_string(&service.group)
        .write_string(&service.node)
        .write_string(&service.host)
        .write_i32(i32::from(service.port))
        .write_u8(service.state as u8)
        .write_u8(service.visibility as u8)
        .write_i32(service.max_players)
        .write_string(&service.motd);
}

fn read_service(reader: &mut NetworkReader) -> Result<Service, CodecError> {
    Ok(Service {
        name: reader.read_string()?,
        id: to_u32("service id", reader.read_i32()?)?,
        group: reader.read_string()?,
        node: reader.read_string()?,
        host: reader.read_string()?,
        port: to_u16("service port", reader.read_i32()?)?,
        state: ServiceState::try_from(reader.read_u8()?)?,
        visibility: ServiceVisibility::try_from(reader.read_u8()?)?,
        max_players: reader.read_i32()?,
        motd: reader.read_string()?,
    })
}

// ============================================================================
// Node
// ============================================================================

/// First packet a subordinate node sends after connecting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NodeHandshakePacket {
    pub name: String,
    pub kind: NodeKind,
    pub host: String,
}

impl Packet for NodeHandshakePacket {
    const KIND: PacketKind = PacketKind::NodeHandshake;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_string(&self.name)
            .write_u8(self.kind as u8)
            .write_string(&self.host);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: reader.read_string()?,
            kind: NodeKind::try_from(reader.read_u8()?)?,
            host: reader.read_string()?,
        })
    }
}

// ============================================================================
// Groups
// ============================================================================

/// Full definition of a group, sent on every create and edit.
///
/// The version travels as its wire name; a name no [`GameServerVersion`]
/// answers to fails decoding with [`CodecError::UnknownVersion`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupUpdatePacket {
    pub name: String,
    pub node: String,
    pub template: String,
    pub motd: String,
    pub memory: i32,
    pub min_online: i32,
    pub max_online: i32,
    pub default_max_players: i32,
    pub version: GameServerVersion,
    pub fallback: bool,
    pub maintenance: bool,
}

impl GroupUpdatePacket {
    /// Rebuilds a group; `static_service` is not carried on the wire.
    pub fn into_group(self, static_service: bool) -> ServiceGroup {
        ServiceGroup {
            name: self.name,
            node: self.node,
            template: self.template,
            motd: self.motd,
            memory: self.memory,
            min_online: self.min_online,
            max_online: self.max_online,
            default_max_players: self.default_max_players,
            version: self.version,
            fallback: self.fallback,
            maintenance: self.maintenance,
            static_service,
        }
    }
}

impl From<&ServiceGroup> for GroupUpdatePacket {
    fn from(group: &ServiceGroup) -> Self {
        Self {
            name: group.name.clone(),
            node: group.node.clone(),
            template: group.template.clone(),
            motd: group.motd.clone(),
            memory: group.memory,
            min_online: group.min_online,
            max_online: group.max_online,
            default_max_players: group.default_max_players,
            version: group.version,
            fallback: group.fallback,
            maintenance: group.maintenance,
        }
    }
}

impl Packet for GroupUpdatePacket {
    const KIND: PacketKind = PacketKind::GroupUpdate;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_string(&self.name)
            .write_string(&self.node)
            .write_string(&self.template)
            .write_string(&self.motd)
            .write_i32(self.memory)
            .write_i32(self.min_online)
            .write_i32(self.max_online)
            .write_i32(self.default_max_players)
            .write_string(self.version.name())
            .write_bool(self.fallback)
            .write_bool(self.maintenance);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        let name = reader.read_string()?;
        let node = reader.read_string()?;
        let template = reader.read_string()?;
        let motd = reader.read_string()?;
        let memory = reader.read_i32()?;
        let min_online = reader.read_i32()?;
        let max_online = reader.read_i32()?;
        let default_max_players = reader.read_i32()?;
        let version_name = reader.read_string()?;
        let version = GameServerVersion::by_name(&version_name)
            .ok_or(CodecError::UnknownVersion(version_name))?;
        Ok(Self {
            name,
            node,
            template,
            motd,
            memory,
            min_online,
            max_online,
            default_max_players,
            version,
            fallback: reader.read_bool()?,
            maintenance: reader.read_bool()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GroupRemovePacket {
    pub name: String,
}

impl Packet for GroupRemovePacket {
    const KIND: PacketKind = PacketKind::GroupRemove;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_string(&self.name);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { name: reader.read_string()? })
    }
}

// ============================================================================
// Services
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceAddPacket {
    pub service: Service,
}

impl Packet for ServiceAddPacket {
    const KIND: PacketKind = PacketKind::ServiceAdd;

    fn write(&self, buf: &mut NetworkBuf) {
        write_service(buf, &self.service);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { service: read_service(reader)? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRemovePacket {
    pub name: String,
}

impl Packet for ServiceRemovePacket {
    const KIND: PacketKind = PacketKind::ServiceRemove;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_string(&self.name);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { name: reader.read_string()? })
    }
}

/// Replaces a node's copy of one service (state, visibility, players, motd).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceUpdatePacket {
    pub service: Service,
}

impl Packet for ServiceUpdatePacket {
    const KIND: PacketKind = PacketKind::ServiceUpdate;

    fn write(&self, buf: &mut NetworkBuf) {
        write_service(buf, &self.service);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { service: read_service(reader)? })
    }
}

/// Full service cache, sent to a node right after its handshake.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ServiceCacheUpdatePacket {
    pub services: Vec<Service>,
}

impl Packet for ServiceCacheUpdatePacket {
    const KIND: PacketKind = PacketKind::ServiceCacheUpdate;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_i32(self.services.len() as i32);
        for service in &self.services {
            write_service(buf, service);
        }
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        let count = to_u32("service count", reader.read_i32()?)? as usize;
        // The count is untrusted; cap the preallocation by what the payload can hold.
        let mut services = Vec::with_capacity(count.min(reader.remaining() / 4));
        for _ in 0..count {
            services.push(read_service(reader)?);
        }
        Ok(Self { services })
    }
}

/// Lifecycle feedback from the node hosting a service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStateUpdatePacket {
    pub name: String,
    pub state: ServiceState,
}

impl Packet for ServiceStateUpdatePacket {
    const KIND: PacketKind = PacketKind::ServiceStateUpdate;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_string(&self.name).write_u8(self.state as u8);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self {
            name: reader.read_string()?,
            state: ServiceState::try_from(reader.read_u8()?)?,
        })
    }
}

/// Asks the hosting node to start the process for a registered service.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStartRequestPacket {
    pub service: Service,
}

impl Packet for ServiceStartRequestPacket {
    const KIND: PacketKind = PacketKind::ServiceStartRequest;

    fn write(&self, buf: &mut NetworkBuf) {
        write_service(buf, &self.service);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { service: read_service(reader)? })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceStopRequestPacket {
    pub name: String,
}

impl Packet for ServiceStopRequestPacket {
    const KIND: PacketKind = PacketKind::ServiceStopRequest;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_string(&self.name);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { name: reader.read_string()? })
    }
}

// ============================================================================
// Players
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerLoginPacket {
    pub uuid: Uuid,
    pub username: String,
}

impl Packet for PlayerLoginPacket {
    const KIND: PacketKind = PacketKind::PlayerLogin;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_uuid(&self.uuid).write_string(&self.username);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self {
            uuid: reader.read_uuid()?,
            username: reader.read_string()?,
        })
    }
}

/// New proxy/game assignment of a player; `None` clears the reference.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerUpdatePacket {
    pub uuid: Uuid,
    pub proxy_service: Option<String>,
    pub game_service: Option<String>,
}

impl Packet for PlayerUpdatePacket {
    const KIND: PacketKind = PacketKind::PlayerUpdate;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_uuid(&self.uuid)
            .write_optional_string(self.proxy_service.as_deref())
            .write_optional_string(self.game_service.as_deref());
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self {
            uuid: reader.read_uuid()?,
            proxy_service: reader.read_optional_string()?,
            game_service: reader.read_optional_string()?,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PlayerDisconnectPacket {
    pub uuid: Uuid,
}

impl Packet for PlayerDisconnectPacket {
    const KIND: PacketKind = PacketKind::PlayerDisconnect;

    fn write(&self, buf: &mut NetworkBuf) {
        buf.write_uuid(&self.uuid);
    }

    fn read(reader: &mut NetworkReader) -> Result<Self, CodecError> {
        Ok(Self { uuid: reader.read_uuid()? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lobby_service() -> Service {
        Service {
            name: "lobby-3".to_string(),
            id: 3,
            group: "lobby".to_string(),
            node: "Master".to_string(),
            host: "10.0.0.4".to_string(),
            port: 30002,
            state: ServiceState::Online,
            visibility: ServiceVisibility::Visible,
            max_players: 50,
            motd: "Welcome".to_string(),
        }
    }

    #[test]
    fn group_update_reproduces_every_field() {
        let packet = GroupUpdatePacket {
            name: "bedwars".to_string(),
            node: "Worker-1".to_string(),
            template: "templates/bedwars".to_string(),
            motd: "Beds & wars".to_string(),
            memory: 1024,
            min_online: 2,
            max_online: 6,
            default_max_players: 16,
            version: GameServerVersion::Paper1_8,
            fallback: false,
            maintenance: true,
        };
        let decoded = GroupUpdatePacket::decode(packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn group_update_field_order_is_stable() {
        let packet = GroupUpdatePacket {
            name: "a".to_string(),
            node: "b".to_string(),
            template: "c".to_string(),
            motd: "d".to_string(),
            memory: 1,
            min_online: 2,
            max_online: 3,
            default_max_players: 4,
            version: GameServerVersion::Paper1_8,
            fallback: true,
            maintenance: false,
        };
        let expected: Vec<u8> = [
            &[0, 0, 0, 1, b'a'][..],
            &[0, 0, 0, 1, b'b'],
            &[0, 0, 0, 1, b'c'],
            &[0, 0, 0, 1, b'd'],
            &[0, 0, 0, 1],
            &[0, 0, 0, 2],
            &[0, 0, 0, 3],
            &[0, 0, 0, 4],
            &[0, 0, 0, 3, b'1', b'.', b'8'],
            &[1],
            &[0],
        ]
        .concat();
        assert_eq!(&packet.encode()[..], &expected[..]);
    }

    #[test]
    fn group_update_rejects_unknown_version() {
        let mut group = GroupUpdatePacket::from(&ServiceGroup::new(
            "lobby",
            "Master",
            256,
            false,
            GameServerVersion::Paper1_20,
        ))
        .encode()
        .to_vec();
        // Patch the version string "1.20" into "1.99".
        let at = group.windows(4).position(|w| w == b"1.20").unwrap();
        group[at + 2] = b'9';
        group[at + 3] = b'9';

        let err = GroupUpdatePacket::decode(Bytes::from(group)).unwrap_err();
        assert_eq!(err, CodecError::UnknownVersion("1.99".to_string()));
    }

    #[test]
    fn group_round_trip_keeps_static_flag_local() {
        let group = ServiceGroup::new("lobby", "Master", 256, true, GameServerVersion::Paper1_20);
        let packet = GroupUpdatePacket::from(&group);
        assert_eq!(packet.into_group(true), group);
    }

    #[test]
    fn service_cache_update_carries_every_snapshot() {
        let mut second = lobby_service();
        second.name = "lobby-4".to_string();
        second.id = 4;
        second.state = ServiceState::Starting;
        second.visibility = ServiceVisibility::Invisible;

        let packet = ServiceCacheUpdatePacket {
            services: vec![lobby_service(), second],
        };
        let decoded = ServiceCacheUpdatePacket::decode(packet.encode()).unwrap();
        assert_eq!(decoded, packet);
    }

    #[test]
    fn negative_cache_count_is_rejected() {
        let mut buf = NetworkBuf::new();
        buf.write_i32(-1);
        let err = ServiceCacheUpdatePacket::decode(buf.freeze()).unwrap_err();
        assert_eq!(err, CodecError::OutOfRange { field: "service count", value: -1 });
    }

    #[test]
    fn snapshot_rejects_unknown_state() {
        let mut bytes = ServiceAddPacket { service: lobby_service() }.encode().to_vec();
        // state byte sits right before visibility, max players and motd
        let state_at = bytes.len() - (1 + 4 + 4 + "Welcome".len()) - 1;
        bytes[state_at] = 9;
        let err = ServiceAddPacket::decode(Bytes::from(bytes)).unwrap_err();
        assert_eq!(err, CodecError::InvalidDiscriminant { field: "service state", value: 9 });
    }

    #[test]
    fn player_update_preserves_absent_references() {
        let packet = PlayerUpdatePacket {
            uuid: Uuid::new_v4(),
            proxy_service: Some("proxy-1".to_string()),
            game_service: None,
        };
        assert_eq!(PlayerUpdatePacket::decode(packet.encode()).unwrap(), packet);
    }

    #[test]
    fn trailing_bytes_fail_decoding() {
        let mut buf = NetworkBuf::new();
        buf.write_string("lobby-1").write_u8(0);
        let err = ServiceRemovePacket::decode(buf.freeze()).unwrap_err();
        assert_eq!(err, CodecError::TrailingBytes(1));
    }

    #[test]
    fn opcodes_map_back_to_kinds() {
        for kind in [
            PacketKind::NodeHandshake,
            PacketKind::GroupUpdate,
            PacketKind::ServiceCacheUpdate,
            PacketKind::PlayerDisconnect,
        ] {
            assert_eq!(PacketKind::try_from(kind.opcode()).unwrap(), kind);
        }
        assert!(matches!(
            PacketKind::try_from(0x7f),
            Err(ProtocolError::UnknownOpcode(0x7f))
        ));
    }
}
