//! Binary record codec.
//!
//! Records are flattened field by field, in declaration order, with no
//! field names or type markers on the wire:
//!
//! ```text
//! +-----------+---------------------------------------------+
//! | kind      | encoding                                    |
//! +-----------+---------------------------------------------+
//! | i32       | 4 bytes, little-endian                      |
//! | i64       | 8 bytes, little-endian                      |
//! | u8        | 1 byte                                      |
//! | f64       | 8 bytes, IEEE-754 bits, little-endian       |
//! | String    | raw UTF-8 bytes followed by a single NUL    |
//! | Vec<T>    | 8-byte element count, then each element     |
//! | record    | each field in turn, no prefix               |
//! +-----------+---------------------------------------------+
//! ```
//!
//! Each record type declares its field visit order once, through
//! [`wire_record!`](crate::wire_record), and the same order drives both
//! directions. Maps have no `Wire` impl. Sequences of sequences are rejected
//! at runtime with [`CodecError::NestedSequence`].

use crate::error::CodecError;
use bytes::{BufMut, Bytes, BytesMut};

/// String terminator byte.
pub const STRING_TERMINATOR: u8 = 0;

/// Byte width of a sequence element count.
pub const SEQUENCE_LEN_SIZE: usize = 8;

/// Declared kind of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FieldKind {
    Int32,
    Int64,
    Uint8,
    Float64,
    String,
    Record,
    Sequence,
}

/// A value with a fixed binary layout.
pub trait Wire: Sized {
    /// Declared kind of this type.
    const KIND: FieldKind;

    /// Appends this value to the encoder.
    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError>;

    /// Reads a value of this type at the decoder's cursor.
    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError>;
}

/// Implements [`Wire`] for a struct by visiting the listed fields in order.
///
/// ```
/// use flightrpc_protocol::wire_record;
///
/// #[derive(Debug, PartialEq)]
/// struct Seat {
///     row: i32,
///     label: String,
/// }
/// wire_record!(Seat { row, label });
///
/// let seat = Seat { row: 12, label: "C".into() };
/// let bytes = flightrpc_protocol::codec::encode(&seat).unwrap();
/// assert_eq!(flightrpc_protocol::codec::decode::<Seat>(&bytes).unwrap(), seat);
/// ```
#[macro_export]
macro_rules! wire_record {
    ($ty:ty { $($field:ident),* $(,)? }) => {
        impl $crate::codec::Wire for $ty {
            const KIND: $crate::codec::FieldKind = $crate::codec::FieldKind::Record;

            #[allow(unused_variables)]
            fn encode(
                &self,
                enc: &mut $crate::codec::Encoder,
            ) -> ::std::result::Result<(), $crate::error::CodecError> {
                $( enc.field(&self.$field)?; )*
                Ok(())
            }

            #[allow(unused_variables)]
            fn decode(
                dec: &mut $crate::codec::Decoder<'_>,
            ) -> ::std::result::Result<Self, $crate::error::CodecError> {
                Ok(Self {
                    $( $field: dec.field()?, )*
                })
            }
        }
    };
}

/// Encodes a record into bytes.
pub fn encode<T: Wire>(value: &T) -> Result<Bytes, CodecError> {
    if T::KIND != FieldKind::Record {
        return Err(CodecError::NotARecord(T::KIND));
    }
    let mut enc = Encoder::new();
    value.encode(&mut enc)?;
    Ok(enc.finish())
}

/// Decodes a record from bytes. The whole buffer must be consumed.
pub fn decode<T: Wire>(bytes: &[u8]) -> Result<T, CodecError> {
    if T::KIND != FieldKind::Record {
        return Err(CodecError::NotARecord(T::KIND));
    }
    let mut dec = Decoder::new(bytes);
    let value = T::decode(&mut dec)?;
    if !dec.is_empty() {
        return Err(CodecError::TrailingBytes(dec.remaining()));
    }
    Ok(value)
}

/// Append-only byte sink for encoding.
#[derive(Debug, Default)]
pub struct Encoder {
    buf: BytesMut,
}

impl Encoder {
    pub fn new() -> Self {
        Self {
            buf: BytesMut::with_capacity(64),
        }
    }

    /// Encodes a nested field.
    pub fn field<T: Wire>(&mut self, value: &T) -> Result<(), CodecError> {
        value.encode(self)
    }

    pub fn put_i32(&mut self, v: i32) {
        self.buf.put_i32_le(v);
    }

    pub fn put_i64(&mut self, v: i64) {
        self.buf.put_i64_le(v);
    }

    pub fn put_u8(&mut self, v: u8) {
        self.buf.put_u8(v);
    }

    pub fn put_f64(&mut self, v: f64) {
        self.buf.put_f64_le(v);
    }

    /// Writes a NUL-terminated string.
    pub fn put_str(&mut self, s: &str) -> Result<(), CodecError> {
        if s.as_bytes().contains(&STRING_TERMINATOR) {
            return Err(CodecError::EmbeddedNul);
        }
        self.buf.put_slice(s.as_bytes());
        self.buf.put_u8(STRING_TERMINATOR);
        Ok(())
    }

    /// Writes a sequence element count.
    pub fn put_len(&mut self, len: usize) {
        self.buf.put_i64_le(len as i64);
    }

    /// Returns the number of bytes written so far.
    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }

    /// Consumes the encoder and returns the encoded bytes.
    pub fn finish(self) -> Bytes {
        self.buf.freeze()
    }
}

/// Cursor over an encoded buffer.
///
/// The cursor only moves forward. Every read checks the remaining length
/// first and fails with [`CodecError::Truncated`] instead of panicking.
#[derive(Debug)]
pub struct Decoder<'a> {
    buf: &'a [u8],
    pos: usize,
}

impl<'a> Decoder<'a> {
    pub fn new(buf: &'a [u8]) -> Self {
        Self { buf, pos: 0 }
    }

    /// Decodes a nested field.
    pub fn field<T: Wire>(&mut self) -> Result<T, CodecError> {
        T::decode(self)
    }

    /// Current cursor offset.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Bytes left after the cursor.
    pub fn remaining(&self) -> usize {
        self.buf.len() - self.pos
    }

    pub fn is_empty(&self) -> bool {
        self.remaining() == 0
    }

    fn take(&mut self, n: usize) -> Result<&'a [u8], CodecError> {
        if self.remaining() < n {
            return Err(CodecError::Truncated {
                offset: self.pos,
                needed: n,
                available: self.remaining(),
            });
        }
        let slice = &self.buf[self.pos..self.pos + n];
        self.pos += n;
        Ok(slice)
    }

    fn take_array<const N: usize>(&mut self) -> Result<[u8; N], CodecError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N)?);
        Ok(out)
    }

    pub fn get_i32(&mut self) -> Result<i32, CodecError> {
        Ok(i32::from_le_bytes(self.take_array()?))
    }

    pub fn get_i64(&mut self) -> Result<i64, CodecError> {
        Ok(i64::from_le_bytes(self.take_array()?))
    }

    pub fn get_u8(&mut self) -> Result<u8, CodecError> {
        Ok(self.take(1)?[0])
    }

    pub fn get_f64(&mut self) -> Result<f64, CodecError> {
        Ok(f64::from_le_bytes(self.take_array()?))
    }

    /// Reads bytes up to the next NUL and skips the terminator.
    pub fn get_str(&mut self) -> Result<String, CodecError> {
        let start = self.pos;
        let rest = &self.buf[start..];
        let end = rest
            .iter()
            .position(|&b| b == STRING_TERMINATOR)
            .ok_or(CodecError::MissingTerminator(start))?;
        let s = std::str::from_utf8(&rest[..end]).map_err(|_| CodecError::InvalidUtf8(start))?;
        self.pos += end + 1;
        Ok(s.to_owned())
    }

    /// Reads a sequence element count.
    pub fn get_len(&mut self) -> Result<usize, CodecError> {
        let len = self.get_i64()?;
        usize::try_from(len).map_err(|_| CodecError::InvalidLength(len))
    }
}

impl Wire for i32 {
    const KIND: FieldKind = FieldKind::Int32;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.put_i32(*self);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        dec.get_i32()
    }
}

impl Wire for i64 {
    const KIND: FieldKind = FieldKind::Int64;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.put_i64(*self);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        dec.get_i64()
    }
}

impl Wire for u8 {
    const KIND: FieldKind = FieldKind::Uint8;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.put_u8(*self);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        dec.get_u8()
    }
}

impl Wire for f64 {
    const KIND: FieldKind = FieldKind::Float64;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.put_f64(*self);
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        dec.get_f64()
    }
}

impl Wire for String {
    const KIND: FieldKind = FieldKind::String;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.put_str(self)
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        dec.get_str()
    }
}

impl<T: Wire> Wire for Vec<T> {
    const KIND: FieldKind = FieldKind::Sequence;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        if T::KIND == FieldKind::Sequence {
            return Err(CodecError::NestedSequence);
        }
        enc.put_len(self.len());
        for item in self {
            item.encode(enc)?;
        }
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        if T::KIND == FieldKind::Sequence {
            return Err(CodecError::NestedSequence);
        }
        let len = dec.get_len()?;
        // Every element takes at least one byte, which bounds a hostile count.
        let mut items = Vec::with_capacity(len.min(dec.remaining()));
        for _ in 0..len {
            items.push(T::decode(dec)?);
        }
        Ok(items)
    }
}
