//! Flight service errors.

use flightrpc_protocol::{StatusCode, StatusCoded};
use thiserror::Error;

/// Business errors surfaced to clients as status codes.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlightError {
    #[error("no flights from '{from}' to '{to}'")]
    NoMatchForSourceAndDestination { from: String, to: String },

    #[error("no such flight: {0}")]
    NoSuchFlight(i32),

    #[error("flight {flight_id} has {available} seats, {requested} requested")]
    InsufficientSeats {
        flight_id: i32,
        requested: i32,
        available: i32,
    },

    #[error("invalid seat count: {0}")]
    InvalidSeatCount(i32),

    #[error("invalid monitor interval: {0}s")]
    InvalidMonitorInterval(i64),
}

impl StatusCoded for FlightError {
    fn status_code(&self) -> StatusCode {
        match self {
            FlightError::NoMatchForSourceAndDestination { .. } => {
                StatusCode::NoMatchForSourceAndDestination
            }
            FlightError::NoSuchFlight(_) => StatusCode::NoSuchFlightIdentifier,
            FlightError::InsufficientSeats { .. } => StatusCode::InsufficientSeats,
            FlightError::InvalidSeatCount(_) | FlightError::InvalidMonitorInterval(_) => {
                StatusCode::BusinessLogicError
            }
        }
    }
}
