//! Server error types.

use crate::config::ConfigError;
use flightrpc_protocol::CodecError;
use std::net::SocketAddr;
use std::time::Duration;
use thiserror::Error;

/// Server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("server is already running")]
    AlreadyRunning,
}

/// Reasons a complete request is dropped without a reply.
#[derive(Debug, Error)]
pub enum DispatchError {
    #[error("no handler registered for type tag {0}")]
    UnknownRoute(u8),

    #[error("type tag {0} is not a request tag")]
    NotARequest(u8),

    #[error("failed to decode request body: {0}")]
    Decode(#[from] CodecError),
}

/// Reasons a fragment is rejected by the reassembly buffer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ReassemblyError {
    #[error("message spans {total} packets (max {max})")]
    TooManyPackets { total: u64, max: u64 },

    #[error("fragment declares {got} packets but the pending request has {expected}")]
    TotalMismatch { expected: u64, got: u64 },

    #[error("fragment has type tag {got} but the pending request has {expected}")]
    TagMismatch { expected: u8, got: u8 },
}

/// Callback delivery errors.
#[derive(Debug, Error)]
pub enum CallbackError {
    #[error("callback payload is {size} bytes, only single-packet callbacks are supported")]
    PayloadTooLarge { size: usize },

    #[error("subscription duration {0:?} is out of range")]
    DurationOutOfRange(Duration),

    #[error("failed to deliver callback to {addr}: {source}")]
    Delivery {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },
}

impl CallbackError {
    /// Subscriber address of a delivery failure.
    pub fn addr(&self) -> Option<SocketAddr> {
        match self {
            CallbackError::Delivery { addr, .. } => Some(*addr),
            CallbackError::PayloadTooLarge { .. } | CallbackError::DurationOutOfRange(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = DispatchError::UnknownRoute(42);
        assert!(err.to_string().contains("42"));

        let err = DispatchError::NotARequest(150);
        assert_eq!(err.to_string(), "type tag 150 is not a request tag");

        let err: DispatchError = CodecError::EmbeddedNul.into();
        assert!(err.to_string().contains("decode"));

        let err = ReassemblyError::TotalMismatch {
            expected: 3,
            got: 4,
        };
        assert!(err.to_string().contains("4 packets"));
    }

    #[test]
    fn test_callback_error_addr() {
        let addr: SocketAddr = "127.0.0.1:9000".parse().unwrap();
        let err = CallbackError::Delivery {
            addr,
            source: std::io::Error::new(std::io::ErrorKind::Other, "unreachable"),
        };
        assert_eq!(err.addr(), Some(addr));
        assert!(err.to_string().contains("127.0.0.1:9000"));

        let err = CallbackError::PayloadTooLarge { size: 600 };
        assert_eq!(err.addr(), None);

        let err = CallbackError::DurationOutOfRange(Duration::MAX);
        assert_eq!(err.addr(), None);
        assert!(err.to_string().contains("out of range"));
    }
}
