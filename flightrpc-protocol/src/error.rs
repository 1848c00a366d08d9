//! Protocol error types.

use crate::codec::FieldKind;
use thiserror::Error;

/// Errors raised while encoding or decoding records.
///
/// Codec errors never abort the process. The dispatcher turns them into a
/// dropped request or a `MarshallerError` status code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    #[error("top-level value must be a record, got {0:?}")]
    NotARecord(FieldKind),

    #[error("sequences of sequences are not supported")]
    NestedSequence,

    #[error("buffer truncated at offset {offset}: need {needed} bytes, {available} available")]
    Truncated {
        offset: usize,
        needed: usize,
        available: usize,
    },

    #[error("string at offset {0} has no NUL terminator")]
    MissingTerminator(usize),

    #[error("string contains an embedded NUL byte")]
    EmbeddedNul,

    #[error("invalid UTF-8 in string at offset {0}")]
    InvalidUtf8(usize),

    #[error("invalid sequence length: {0}")]
    InvalidLength(i64),

    #[error("invalid value {value} for {what}")]
    InvalidValue { what: &'static str, value: u8 },

    #[error("{0} trailing bytes after record")]
    TrailingBytes(usize),
}

/// Errors raised while framing or parsing packets.
#[derive(Debug, Error)]
pub enum ProtocolError {
    #[error("packet too short: {len} bytes (header is {header} bytes)")]
    Truncated { len: usize, header: usize },

    #[error("packet too large: {size} bytes (max {max})")]
    PacketTooLarge { size: usize, max: usize },

    #[error("invalid packet count: {0}")]
    InvalidPacketCount(i64),

    #[error("packet index {index} out of range 1..={total}")]
    InvalidPacketIndex { index: i64, total: u64 },

    #[error("packet capacity {0} cannot hold the header")]
    CapacityTooSmall(usize),
}
