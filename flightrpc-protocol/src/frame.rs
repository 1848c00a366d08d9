//! Fixed-size packet framing.
//!
//! Every datagram is at most 512 bytes and starts with a 26-byte header:
//!
//! ```text
//! +----------+------------+--------------+--------------+----------------+
//! | type tag | request id | packet index | packet total | body fragment  |
//! | 1 byte   | 9 bytes    | 8 bytes (LE) | 8 bytes (LE) | up to 486 bytes|
//! +----------+------------+--------------+--------------+----------------+
//! ```
//!
//! The index is 1-based. All packets of one logical message share the type
//! tag, the request ID and the total. An empty message is still sent as a
//! single packet with an empty body.

use crate::error::ProtocolError;
use crate::message::{RequestId, REQUEST_ID_LEN};
use bytes::{BufMut, Bytes, BytesMut};

/// Maximum datagram size.
pub const PACKET_SIZE: usize = 512;

/// Size of the type tag field.
pub const TYPE_TAG_SIZE: usize = 1;

/// Size of each of the index and total fields.
pub const COUNTER_SIZE: usize = 8;

/// Size of the packet header in bytes (1 + 9 + 8 + 8 = 26).
pub const HEADER_SIZE: usize = TYPE_TAG_SIZE + REQUEST_ID_LEN + 2 * COUNTER_SIZE;

/// Body capacity of a full-size packet.
pub const MAX_BODY_SIZE: usize = PACKET_SIZE - HEADER_SIZE;

/// Parsed packet header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    pub type_tag: u8,
    pub request_id: RequestId,
    /// 1-based position of this packet in its message.
    pub index: u64,
    /// Number of packets in the message.
    pub total: u64,
}

impl PacketHeader {
    /// Slot of this packet in a 0-based fragment array.
    pub fn slot(&self) -> usize {
        (self.index - 1) as usize
    }

    fn write(&self, buf: &mut BytesMut) {
        buf.put_u8(self.type_tag);
        buf.put_slice(self.request_id.as_bytes());
        buf.put_i64_le(self.index as i64);
        buf.put_i64_le(self.total as i64);
    }
}

/// A single datagram: header plus body fragment.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Packet {
    pub header: PacketHeader,
    pub body: Bytes,
}

impl Packet {
    /// Parses a received datagram.
    pub fn parse(datagram: Bytes) -> Result<Self, ProtocolError> {
        if datagram.len() < HEADER_SIZE {
            return Err(ProtocolError::Truncated {
                len: datagram.len(),
                header: HEADER_SIZE,
            });
        }
        if datagram.len() > PACKET_SIZE {
            return Err(ProtocolError::PacketTooLarge {
                size: datagram.len(),
                max: PACKET_SIZE,
            });
        }

        let type_tag = datagram[0];
        let id_end = TYPE_TAG_SIZE + REQUEST_ID_LEN;
        let request_id = RequestId::from_slice(&datagram[TYPE_TAG_SIZE..id_end]).ok_or(
            ProtocolError::Truncated {
                len: datagram.len(),
                header: HEADER_SIZE,
            },
        )?;
        let index = read_i64_le(&datagram[id_end..id_end + COUNTER_SIZE]);
        let total = read_i64_le(&datagram[id_end + COUNTER_SIZE..HEADER_SIZE]);

        if total < 1 {
            return Err(ProtocolError::InvalidPacketCount(total));
        }
        let total = total as u64;
        if index < 1 || index as u64 > total {
            return Err(ProtocolError::InvalidPacketIndex { index, total });
        }

        Ok(Self {
            header: PacketHeader {
                type_tag,
                request_id,
                index: index as u64,
                total,
            },
            body: datagram.slice(HEADER_SIZE..),
        })
    }

    /// Encodes the packet into a datagram.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(HEADER_SIZE + self.body.len());
        self.header.write(&mut buf);
        buf.put_slice(&self.body);
        buf.freeze()
    }
}

fn read_i64_le(bytes: &[u8]) -> i64 {
    let mut raw = [0u8; COUNTER_SIZE];
    raw.copy_from_slice(bytes);
    i64::from_le_bytes(raw)
}

/// Number of packets needed for a payload: `ceil(len / body)`, at least 1.
pub fn packet_count(payload_len: usize, capacity: usize) -> usize {
    let body = capacity.saturating_sub(HEADER_SIZE).max(1);
    payload_len.div_ceil(body).max(1)
}

/// Splits a payload into full-size datagrams.
pub fn frame(type_tag: u8, request_id: RequestId, payload: &[u8]) -> Vec<Bytes> {
    split(type_tag, request_id, payload, MAX_BODY_SIZE)
}

/// Splits a payload into datagrams of at most `capacity` bytes.
pub fn frame_with_capacity(
    type_tag: u8,
    request_id: RequestId,
    payload: &[u8],
    capacity: usize,
) -> Result<Vec<Bytes>, ProtocolError> {
    if capacity <= HEADER_SIZE {
        return Err(ProtocolError::CapacityTooSmall(capacity));
    }
    Ok(split(type_tag, request_id, payload, capacity - HEADER_SIZE))
}

fn split(type_tag: u8, request_id: RequestId, payload: &[u8], body_size: usize) -> Vec<Bytes> {
    let chunks: Vec<&[u8]> = if payload.is_empty() {
        vec![payload]
    } else {
        payload.chunks(body_size).collect()
    };
    let total = chunks.len() as u64;

    chunks
        .into_iter()
        .enumerate()
        .map(|(i, chunk)| {
            let header = PacketHeader {
                type_tag,
                request_id,
                index: i as u64 + 1,
                total,
            };
            let mut buf = BytesMut::with_capacity(HEADER_SIZE + chunk.len());
            header.write(&mut buf);
            buf.put_slice(chunk);
            buf.freeze()
        })
        .collect()
}
