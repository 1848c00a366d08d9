//! # flightrpc-flights
//!
//! Flight information service served over flightrpc.
//!
//! This crate provides:
//! - Request, response and callback records for the seven flight RPCs
//! - An in-memory flight store seeded with sample flights
//! - `FlightError` and its status code mapping
//! - The handlers and the route table that registers them

pub mod dto;
pub mod error;
pub mod service;
pub mod store;

pub use dto::{RequestType, MONITOR_SEAT_UPDATES_CALLBACK};
pub use error::FlightError;
pub use service::{routes, FlightService};
pub use store::FlightStore;
