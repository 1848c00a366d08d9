//! # flightrpc-protocol
//!
//! Wire protocol implementation for flightrpc.
//!
//! This crate provides:
//! - A binary record codec driven by a per-type field visit order
//! - Fixed-size packet framing with a 26-byte header
//! - Request IDs, message type tag ranges and status codes
//! - The `ResponseEnvelope` wrapped around every reply and callback

pub mod codec;
pub mod error;
pub mod frame;
pub mod message;

pub use codec::{Decoder, Encoder, FieldKind, Wire};
pub use error::{CodecError, ProtocolError};
pub use frame::{Packet, PacketHeader, HEADER_SIZE, MAX_BODY_SIZE, PACKET_SIZE};
pub use message::{
    response_tag, Empty, MessageKind, RequestId, ResponseEnvelope, StatusCode, StatusCoded,
    REQUEST_ID_LEN,
};

/// Default UDP port for the flightrpc server.
pub const DEFAULT_PORT: u16 = 8080;
