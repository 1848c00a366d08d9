//! In-memory flight store.

use crate::dto::{CreateFlightRequest, Flight};
use crate::error::FlightError;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Flights keyed by identifier. New identifiers continue from the largest one.
#[derive(Debug, Default)]
pub struct FlightStore {
    flights: RwLock<BTreeMap<i32, Flight>>,
}

impl FlightStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store holding the six built-in flights.
    pub fn seeded() -> Self {
        let store = Self::new();
        let seed = [
            ("Singapore", "San Francisco", 1701388800, 2050.6, 99),
            ("Singapore", "San Francisco", 1701388900, 3239.20, 54),
            ("Singapore", "Kular Lumpur", 1701287800, 99.9, 22),
            ("Singapore", "Bali", 1701176800, 325.1, 2),
            ("Tokyo", "Seoul", 1701065800, 892.2, 1),
            ("Tokyo", "Shanghai", 1701054800, 239.2, 2),
        ];
        for (from, to, departure_time, airfare, seats) in seed {
            store.insert(CreateFlightRequest {
                source_location: from.to_string(),
                destination_location: to.to_string(),
                departure_time,
                airfare,
                total_available_seats: seats,
            });
        }
        store
    }

    /// Adds a flight and returns its new identifier.
    pub fn insert(&self, request: CreateFlightRequest) -> i32 {
        let mut flights = self.flights.write();
        let id = flights.keys().next_back().copied().unwrap_or(0) + 1;
        flights.insert(
            id,
            Flight {
                flight_identifier: id,
                source_location: request.source_location,
                destination_location: request.destination_location,
                departure_time: request.departure_time,
                airfare: request.airfare,
                total_available_seats: request.total_available_seats,
            },
        );
        id
    }

    pub fn get(&self, id: i32) -> Option<Flight> {
        self.flights.read().get(&id).cloned()
    }

    pub fn contains(&self, id: i32) -> bool {
        self.flights.read().contains_key(&id)
    }

    /// Identifiers of flights on a route, in ascending order.
    pub fn find_by_route(&self, from: &str, to: &str) -> Vec<i32> {
        self.flights
            .read()
            .values()
            .filter(|f| f.source_location == from && f.destination_location == to)
            .map(|f| f.flight_identifier)
            .collect()
    }

    /// Takes seats from a flight and returns the updated flight.
    pub fn reserve(&self, id: i32, seats: i32) -> Result<Flight, FlightError> {
        let mut flights = self.flights.write();
        let flight = flights.get_mut(&id).ok_or(FlightError::NoSuchFlight(id))?;
        if flight.total_available_seats < seats {
            return Err(FlightError::InsufficientSeats {
                flight_id: id,
                requested: seats,
                available: flight.total_available_seats,
            });
        }
        flight.total_available_seats -= seats;
        Ok(flight.clone())
    }

    /// Sets a new airfare and returns the updated flight.
    pub fn update_price(&self, id: i32, airfare: f64) -> Result<Flight, FlightError> {
        let mut flights = self.flights.write();
        let flight = flights.get_mut(&id).ok_or(FlightError::NoSuchFlight(id))?;
        flight.airfare = airfare;
        Ok(flight.clone())
    }

    pub fn len(&self) -> usize {
        self.flights.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.flights.read().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_seeded() {
        let store = FlightStore::seeded();
        assert_eq!(store.len(), 6);

        let first = store.get(1).unwrap();
        assert_eq!(first.source_location, "Singapore");
        assert_eq!(first.destination_location, "San Francisco");
        assert_eq!(first.departure_time, 1701388800);
        assert_eq!(first.total_available_seats, 99);
        assert!(store.get(7).is_none());
    }

    #[test]
    fn test_find_by_route() {
        let store = FlightStore::seeded();
        assert_eq!(store.find_by_route("Singapore", "San Francisco"), vec![1, 2]);
        assert_eq!(store.find_by_route("Tokyo", "Seoul"), vec![5]);
        assert!(store.find_by_route("Seoul", "Tokyo").is_empty());
    }

    #[test]
    fn test_insert_continues_ids() {
        let store = FlightStore::seeded();
        let id = store.insert(CreateFlightRequest {
            source_location: "Paris".into(),
            destination_location: "Rome".into(),
            departure_time: 1702000000,
            airfare: 120.0,
            total_available_seats: 150,
        });
        assert_eq!(id, 7);
        assert!(store.contains(7));

        let empty = FlightStore::new();
        assert!(empty.is_empty());
    }

    #[test]
    fn test_reserve() {
        let store = FlightStore::seeded();
        let flight = store.reserve(4, 2).unwrap();
        assert_eq!(flight.total_available_seats, 0);

        assert_eq!(
            store.reserve(4, 1),
            Err(FlightError::InsufficientSeats {
                flight_id: 4,
                requested: 1,
                available: 0
            })
        );
        assert_eq!(store.reserve(42, 1), Err(FlightError::NoSuchFlight(42)));
    }

    #[test]
    fn test_update_price() {
        let store = FlightStore::seeded();
        let flight = store.update_price(3, 149.5).unwrap();
        assert_eq!(flight.airfare, 149.5);
        assert_eq!(store.get(3).unwrap().airfare, 149.5);
        assert!(store.update_price(0, 1.0).is_err());
    }
}
