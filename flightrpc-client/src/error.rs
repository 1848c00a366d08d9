//! Client error types.

use flightrpc_protocol::{CodecError, ProtocolError};
use thiserror::Error;

/// Client errors.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    #[error("no reply after {attempts} attempts")]
    Timeout { attempts: u32 },

    #[error("type tag {0} is not a request tag")]
    NotARequest(u8),

    #[error("expected reply tag {expected}, got {got}")]
    UnexpectedTag { expected: u8, got: u8 },
}

impl ClientError {
    /// Returns whether this error is retryable.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ClientError::Io(_) | ClientError::Timeout { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable() {
        assert!(ClientError::Timeout { attempts: 3 }.is_retryable());
        assert!(!ClientError::NotARequest(150).is_retryable());
        assert!(ClientError::Timeout { attempts: 4 }
            .to_string()
            .contains("4 attempts"));
    }
}
