//! Request IDs, type tags, status codes and the response envelope.

use crate::codec::{Decoder, Encoder, FieldKind, Wire};
use crate::error::CodecError;
use std::fmt;

/// Length of a request ID on the wire.
pub const REQUEST_ID_LEN: usize = 9;

/// Offset between a request tag and its response tag.
pub const RESPONSE_TAG_OFFSET: u8 = 100;

/// Fixed-length printable token identifying one logical request.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RequestId([u8; REQUEST_ID_LEN]);

impl RequestId {
    pub fn new(bytes: [u8; REQUEST_ID_LEN]) -> Self {
        Self(bytes)
    }

    /// Generates a fresh random ID.
    pub fn generate() -> Self {
        let hex = uuid::Uuid::new_v4().simple().to_string();
        let mut bytes = [0u8; REQUEST_ID_LEN];
        bytes.copy_from_slice(&hex.as_bytes()[..REQUEST_ID_LEN]);
        Self(bytes)
    }

    /// Reads an ID from the first `REQUEST_ID_LEN` bytes of a slice.
    pub fn from_slice(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; REQUEST_ID_LEN] = bytes.get(..REQUEST_ID_LEN)?.try_into().ok()?;
        Some(Self(bytes))
    }

    pub fn as_bytes(&self) -> &[u8; REQUEST_ID_LEN] {
        &self.0
    }
}

impl TryFrom<&str> for RequestId {
    type Error = CodecError;

    fn try_from(s: &str) -> Result<Self, Self::Error> {
        let bytes: [u8; REQUEST_ID_LEN] =
            s.as_bytes()
                .try_into()
                .map_err(|_| CodecError::Truncated {
                    offset: 0,
                    needed: REQUEST_ID_LEN,
                    available: s.len(),
                })?;
        Ok(Self(bytes))
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", String::from_utf8_lossy(&self.0))
    }
}

impl fmt::Debug for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "RequestId({})", self)
    }
}

/// Direction and kind of a message, derived from its type tag.
///
/// Tags `1..=100` are requests, `101..=200` responses and `201..=255`
/// server-initiated callbacks. Tag `0` is reserved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MessageKind {
    Request,
    Response,
    Callback,
    Reserved,
}

impl MessageKind {
    pub fn of(tag: u8) -> Self {
        match tag {
            1..=100 => MessageKind::Request,
            101..=200 => MessageKind::Response,
            201..=255 => MessageKind::Callback,
            0 => MessageKind::Reserved,
        }
    }
}

/// Maps a request tag to the tag of its response.
pub fn response_tag(request_tag: u8) -> Option<u8> {
    match MessageKind::of(request_tag) {
        MessageKind::Request => Some(request_tag + RESPONSE_TAG_OFFSET),
        _ => None,
    }
}

/// Status code carried by every response envelope.
///
/// These values are part of the wire contract and must remain stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum StatusCode {
    Success = 1,
    BusinessLogicError = 2,
    MarshallerError = 3,
    NoMatchForSourceAndDestination = 4,
    NoSuchFlightIdentifier = 5,
    InsufficientSeats = 6,
}

impl StatusCode {
    pub fn is_success(&self) -> bool {
        *self == StatusCode::Success
    }

    pub fn as_u8(&self) -> u8 {
        *self as u8
    }
}

impl TryFrom<u8> for StatusCode {
    type Error = CodecError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Ok(match value {
            1 => StatusCode::Success,
            2 => StatusCode::BusinessLogicError,
            3 => StatusCode::MarshallerError,
            4 => StatusCode::NoMatchForSourceAndDestination,
            5 => StatusCode::NoSuchFlightIdentifier,
            6 => StatusCode::InsufficientSeats,
            _ => {
                return Err(CodecError::InvalidValue {
                    what: "status code",
                    value,
                })
            }
        })
    }
}

impl fmt::Display for StatusCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StatusCode::Success => write!(f, "SUCCESS"),
            StatusCode::BusinessLogicError => write!(f, "BUSINESS_LOGIC_ERROR"),
            StatusCode::MarshallerError => write!(f, "MARSHALLER_ERROR"),
            StatusCode::NoMatchForSourceAndDestination => {
                write!(f, "NO_MATCH_FOR_SOURCE_AND_DESTINATION")
            }
            StatusCode::NoSuchFlightIdentifier => write!(f, "NO_SUCH_FLIGHT_IDENTIFIER"),
            StatusCode::InsufficientSeats => write!(f, "INSUFFICIENT_SEATS"),
        }
    }
}

impl Wire for StatusCode {
    const KIND: FieldKind = FieldKind::Uint8;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.put_u8(self.as_u8());
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        StatusCode::try_from(dec.get_u8()?)
    }
}

/// Errors that know which status code they surface as.
///
/// The default maps to the generic business logic code, so an error kind
/// without a specific mapping still produces a well-formed reply.
pub trait StatusCoded {
    fn status_code(&self) -> StatusCode {
        StatusCode::BusinessLogicError
    }
}

impl StatusCoded for CodecError {
    fn status_code(&self) -> StatusCode {
        StatusCode::MarshallerError
    }
}

/// A record with no fields.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Empty;

crate::wire_record!(Empty {});

/// Wrapper around every RPC result and callback payload.
///
/// `data` is encoded after the status code and only when the status is
/// `Success`. It is omitted entirely otherwise, so on decode it is present
/// exactly when bytes remain after the status code.
#[derive(Debug, Clone, PartialEq)]
pub struct ResponseEnvelope<T> {
    pub status: StatusCode,
    pub data: Option<T>,
}

impl<T> ResponseEnvelope<T> {
    /// Successful envelope carrying data.
    pub fn ok(data: T) -> Self {
        Self {
            status: StatusCode::Success,
            data: Some(data),
        }
    }

    /// Envelope with a status and no data.
    pub fn empty(status: StatusCode) -> Self {
        Self { status, data: None }
    }

    /// Wraps a handler result, mapping the error through its status code.
    pub fn from_result<E: StatusCoded>(result: Result<Option<T>, E>) -> Self {
        match result {
            Ok(data) => Self {
                status: StatusCode::Success,
                data,
            },
            Err(e) => Self::empty(e.status_code()),
        }
    }

    pub fn is_success(&self) -> bool {
        self.status.is_success()
    }
}

impl<T: Wire> Wire for ResponseEnvelope<T> {
    const KIND: FieldKind = FieldKind::Record;

    fn encode(&self, enc: &mut Encoder) -> Result<(), CodecError> {
        enc.field(&self.status)?;
        if let (true, Some(data)) = (self.status.is_success(), &self.data) {
            enc.field(data)?;
        }
        Ok(())
    }

    fn decode(dec: &mut Decoder<'_>) -> Result<Self, CodecError> {
        let status: StatusCode = dec.field()?;
        let data = if dec.is_empty() {
            None
        } else {
            Some(dec.field()?)
        };
        Ok(Self { status, data })
    }
}
