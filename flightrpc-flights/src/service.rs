//! Flight RPC handlers and their route table.

use crate::dto::{
    CreateFlightRequest, CreateFlightResponse, Flight, GetFlightIdentifiersRequest,
    GetFlightIdentifiersResponse, GetFlightInformationRequest, GetFlightInformationResponse,
    MakeSeatReservationRequest, MonitorSeatUpdatesRequest, RequestType, SeatUpdateCallback,
    UpdateFlightPriceRequest, UpdateFlightPriceResponse, MONITOR_SEAT_UPDATES_CALLBACK,
};
use crate::error::FlightError;
use crate::store::FlightStore;
use flightrpc_protocol::Empty;
use flightrpc_server::{RequestContext, Router, SubscriptionRegistry};
use std::future::ready;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

type HandlerResult<T> = Result<Option<T>, FlightError>;

/// Business logic behind the flight RPCs.
pub struct FlightService {
    store: Arc<FlightStore>,
    seat_updates: SubscriptionRegistry<i32>,
}

impl FlightService {
    pub fn new(store: Arc<FlightStore>, seat_updates: SubscriptionRegistry<i32>) -> Self {
        Self {
            store,
            seat_updates,
        }
    }

    pub fn store(&self) -> &FlightStore {
        &self.store
    }

    pub fn seat_updates(&self) -> &SubscriptionRegistry<i32> {
        &self.seat_updates
    }

    pub fn ping(&self) -> HandlerResult<Empty> {
        tracing::info!("Received ping, pong");
        Ok(None)
    }

    pub fn get_flight_identifiers(
        &self,
        request: GetFlightIdentifiersRequest,
    ) -> HandlerResult<GetFlightIdentifiersResponse> {
        let flight_identifiers = self
            .store
            .find_by_route(&request.source_location, &request.destination_location);
        if flight_identifiers.is_empty() {
            return Err(FlightError::NoMatchForSourceAndDestination {
                from: request.source_location,
                to: request.destination_location,
            });
        }
        Ok(Some(GetFlightIdentifiersResponse { flight_identifiers }))
    }

    pub fn get_flight_information(
        &self,
        request: GetFlightInformationRequest,
    ) -> HandlerResult<GetFlightInformationResponse> {
        let flight = self
            .store
            .get(request.flight_identifier)
            .ok_or(FlightError::NoSuchFlight(request.flight_identifier))?;
        Ok(Some(GetFlightInformationResponse {
            departure_time: flight.departure_time,
            airfare: flight.airfare,
            total_available_seats: flight.total_available_seats,
        }))
    }

    /// Reserves seats, then pushes the new seat count to subscribers.
    ///
    /// A failed callback delivery is logged and does not fail the reservation.
    pub async fn make_seat_reservation(
        &self,
        request: MakeSeatReservationRequest,
    ) -> HandlerResult<Empty> {
        if request.seats_to_reserve <= 0 {
            return Err(FlightError::InvalidSeatCount(request.seats_to_reserve));
        }
        let flight = self
            .store
            .reserve(request.flight_identifier, request.seats_to_reserve)?;
        tracing::info!(
            "Reserved {} seats on flight {} ({} left)",
            request.seats_to_reserve,
            flight.flight_identifier,
            flight.total_available_seats
        );

        self.notify_seat_update(&flight).await;
        Ok(None)
    }

    /// Subscribes the caller to seat updates of one flight.
    pub fn monitor_seat_updates(
        &self,
        peer: SocketAddr,
        request: MonitorSeatUpdatesRequest,
    ) -> HandlerResult<Empty> {
        if !self.store.contains(request.flight_identifier) {
            return Err(FlightError::NoSuchFlight(request.flight_identifier));
        }
        let interval = request.monitor_interval_secs;
        let secs = u64::try_from(interval)
            .map_err(|_| FlightError::InvalidMonitorInterval(interval))?;

        self.seat_updates
            .subscribe(peer, request.flight_identifier, Duration::from_secs(secs))
            .map_err(|e| {
                tracing::debug!("Rejected monitor interval {}s from {}: {}", interval, peer, e);
                FlightError::InvalidMonitorInterval(interval)
            })?;
        Ok(None)
    }

    pub fn update_flight_price(
        &self,
        request: UpdateFlightPriceRequest,
    ) -> HandlerResult<UpdateFlightPriceResponse> {
        let flight = self
            .store
            .update_price(request.flight_identifier, request.new_price)?;
        Ok(Some(flight))
    }

    pub fn create_flight(&self, request: CreateFlightRequest) -> HandlerResult<CreateFlightResponse> {
        if request.total_available_seats < 0 {
            return Err(FlightError::InvalidSeatCount(request.total_available_seats));
        }
        let flight_identifier = self.store.insert(request);
        tracing::info!("Created flight {}", flight_identifier);
        Ok(Some(CreateFlightResponse { flight_identifier }))
    }

    async fn notify_seat_update(&self, flight: &Flight) {
        let update = SeatUpdateCallback {
            total_available_seats: flight.total_available_seats,
        };
        if let Err(e) = self
            .seat_updates
            .notify(&flight.flight_identifier, MONITOR_SEAT_UPDATES_CALLBACK, update)
            .await
        {
            tracing::warn!(
                "Failed to deliver seat update for flight {} to one or more clients: {}",
                flight.flight_identifier,
                e
            );
        }
    }
}

/// Builds the route table for all flight RPCs.
pub fn routes(service: Arc<FlightService>) -> Router {
    let ping = service.clone();
    let identifiers = service.clone();
    let information = service.clone();
    let reservation = service.clone();
    let monitor = service.clone();
    let price = service.clone();
    let create = service;

    Router::new()
        .route(RequestType::Ping.tag(), move |_ctx, _req: Empty| {
            ready(ping.ping())
        })
        .route(
            RequestType::GetFlightIdentifiers.tag(),
            move |_ctx, req: GetFlightIdentifiersRequest| {
                ready(identifiers.get_flight_identifiers(req))
            },
        )
        .route(
            RequestType::GetFlightInformation.tag(),
            move |_ctx, req: GetFlightInformationRequest| {
                ready(information.get_flight_information(req))
            },
        )
        .route(
            RequestType::MakeSeatReservation.tag(),
            move |_ctx, req: MakeSeatReservationRequest| {
                let service = reservation.clone();
                async move { service.make_seat_reservation(req).await }
            },
        )
        .route(
            RequestType::MonitorSeatUpdates.tag(),
            move |ctx: RequestContext, req: MonitorSeatUpdatesRequest| {
                ready(monitor.monitor_seat_updates(ctx.peer, req))
            },
        )
        .route(
            RequestType::UpdateFlightPrice.tag(),
            move |_ctx, req: UpdateFlightPriceRequest| ready(price.update_flight_price(req)),
        )
        .route(
            RequestType::CreateFlight.tag(),
            move |_ctx, req: CreateFlightRequest| ready(create.create_flight(req)),
        )
}
