//! Request and response records for the flight RPCs.
//!
//! Field order in each `wire_record!` is the wire order.

use flightrpc_protocol::message::RESPONSE_TAG_OFFSET;
use flightrpc_protocol::wire_record;
use std::fmt;

/// Request type tags (1..=100).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum RequestType {
    Ping = 1,
    GetFlightIdentifiers = 2,
    GetFlightInformation = 3,
    MakeSeatReservation = 4,
    MonitorSeatUpdates = 5,
    UpdateFlightPrice = 6,
    CreateFlight = 7,
}

impl RequestType {
    pub const ALL: [RequestType; 7] = [
        RequestType::Ping,
        RequestType::GetFlightIdentifiers,
        RequestType::GetFlightInformation,
        RequestType::MakeSeatReservation,
        RequestType::MonitorSeatUpdates,
        RequestType::UpdateFlightPrice,
        RequestType::CreateFlight,
    ];

    pub fn tag(&self) -> u8 {
        *self as u8
    }

    /// Tag of the matching response (request tag + 100).
    pub fn response_tag(&self) -> u8 {
        self.tag() + RESPONSE_TAG_OFFSET
    }

    pub fn from_tag(tag: u8) -> Option<Self> {
        Self::ALL.into_iter().find(|t| t.tag() == tag)
    }
}

impl fmt::Display for RequestType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestType::Ping => write!(f, "Ping"),
            RequestType::GetFlightIdentifiers => write!(f, "GetFlightIdentifiers"),
            RequestType::GetFlightInformation => write!(f, "GetFlightInformation"),
            RequestType::MakeSeatReservation => write!(f, "MakeSeatReservation"),
            RequestType::MonitorSeatUpdates => write!(f, "MonitorSeatUpdates"),
            RequestType::UpdateFlightPrice => write!(f, "UpdateFlightPrice"),
            RequestType::CreateFlight => write!(f, "CreateFlight"),
        }
    }
}

/// Callback tag pushed to seat update subscribers.
pub const MONITOR_SEAT_UPDATES_CALLBACK: u8 = 201;

/// A flight as stored and as returned by `UpdateFlightPrice`.
#[derive(Debug, Clone, PartialEq)]
pub struct Flight {
    pub flight_identifier: i32,
    pub source_location: String,
    pub destination_location: String,
    /// Unix seconds.
    pub departure_time: i64,
    pub airfare: f64,
    pub total_available_seats: i32,
}
wire_record!(Flight {
    flight_identifier,
    source_location,
    destination_location,
    departure_time,
    airfare,
    total_available_seats,
});

#[derive(Debug, Clone, PartialEq)]
pub struct GetFlightIdentifiersRequest {
    pub source_location: String,
    pub destination_location: String,
}
wire_record!(GetFlightIdentifiersRequest {
    source_location,
    destination_location,
});

#[derive(Debug, Clone, PartialEq)]
pub struct GetFlightIdentifiersResponse {
    pub flight_identifiers: Vec<i32>,
}
wire_record!(GetFlightIdentifiersResponse { flight_identifiers });

#[derive(Debug, Clone, PartialEq)]
pub struct GetFlightInformationRequest {
    pub flight_identifier: i32,
}
wire_record!(GetFlightInformationRequest { flight_identifier });

#[derive(Debug, Clone, PartialEq)]
pub struct GetFlightInformationResponse {
    pub departure_time: i64,
    pub airfare: f64,
    pub total_available_seats: i32,
}
wire_record!(GetFlightInformationResponse {
    departure_time,
    airfare,
    total_available_seats,
});

#[derive(Debug, Clone, PartialEq)]
pub struct MakeSeatReservationRequest {
    pub flight_identifier: i32,
    pub seats_to_reserve: i32,
}
wire_record!(MakeSeatReservationRequest {
    flight_identifier,
    seats_to_reserve,
});

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorSeatUpdatesRequest {
    pub flight_identifier: i32,
    pub monitor_interval_secs: i64,
}
wire_record!(MonitorSeatUpdatesRequest {
    flight_identifier,
    monitor_interval_secs,
});

/// Payload of the seat update callback.
#[derive(Debug, Clone, PartialEq)]
pub struct SeatUpdateCallback {
    pub total_available_seats: i32,
}
wire_record!(SeatUpdateCallback {
    total_available_seats
});

#[derive(Debug, Clone, PartialEq)]
pub struct UpdateFlightPriceRequest {
    pub flight_identifier: i32,
    pub new_price: f64,
}
wire_record!(UpdateFlightPriceRequest {
    flight_identifier,
    new_price,
});

pub type UpdateFlightPriceResponse = Flight;

#[derive(Debug, Clone, PartialEq)]
pub struct CreateFlightRequest {
    pub source_location: String,
    pub destination_location: String,
    pub departure_time: i64,
    pub airfare: f64,
    pub total_available_seats: i32,
}
wire_record!(CreateFlightRequest {
    source_location,
    destination_location,
    departure_time,
    airfare,
    total_available_seats,
});

#[derive(Debug, Clone, PartialEq)]
pub struct CreateFlightResponse {
    pub flight_identifier: i32,
}
wire_record!(CreateFlightResponse { flight_identifier });
