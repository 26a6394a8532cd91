//! Error types shared by the codec, the protocol engine and the event bus.

use crate::packets::PacketKind;

/// Failure while reading a packet payload.
///
/// Codec errors never tear a connection down: the engine logs them and drops
/// the single frame that produced them.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum CodecError {
    /// The payload ended before a field could be read
    #[error("unexpected end of payload: needed {needed} bytes, {remaining} remaining")]
    UnexpectedEof { needed: usize, remaining: usize },
    /// A string field did not contain valid UTF-8
    #[error("string field is not valid UTF-8")]
    InvalidUtf8,
    /// A boolean byte other than 0 or 1
    #[error("invalid boolean byte: {0}")]
    InvalidBool(u8),
    /// An enumerated field carried an unknown discriminant
    #[error("invalid {field} discriminant: {value}")]
    InvalidDiscriminant { field: &'static str, value: u8 },
    /// A game version name that no runtime flavour answers to
    #[error("unknown game version: {0}")]
    UnknownVersion(String),
    /// A numeric field that is out of range for its target type
    #[error("{field} out of range: {value}")]
    OutOfRange { field: &'static str, value: i64 },
    /// Bytes left over after every field of the packet was read
    #[error("{0} trailing bytes after packet payload")]
    TrailingBytes(usize),
}

/// Failure inside the protocol engine.
#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed payload: {0}")]
    Codec(#[from] CodecError),
    #[error("unknown opcode: {0:#06x}")]
    UnknownOpcode(u16),
    #[error("no handler registered for {0:?}")]
    NoHandler(PacketKind),
    #[error("a handler for {0:?} is already registered")]
    HandlerAlreadyRegistered(PacketKind),
    #[error("frame of {len} bytes exceeds the {max} byte limit")]
    FrameTooLarge { len: usize, max: usize },
    #[error("unknown connection: {0}")]
    UnknownConnection(u64),
    #[error("connection {0} is closed")]
    ConnectionClosed(u64),
    /// A handler rejected an otherwise well-formed packet
    #[error("handler failed: {0}")]
    Handler(String),
}

/// Failure reported by an event bus subscriber.
#[derive(Debug, thiserror::Error)]
pub enum EventError {
    #[error("handler execution error: {0}")]
    HandlerExecution(String),
}
