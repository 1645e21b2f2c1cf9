//! HTTP API server

use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::service::BookingService;

pub mod handlers;
pub mod state;

pub use state::AppState;

/// Build the API router using the provided application state
pub fn create_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(handlers::health))
        .nest(
            "/v1",
            Router::new()
                .route("/bookings", post(handlers::create_booking))
                .route("/bookings/:booking_id", get(handlers::get_booking))
                .route("/bookings/:booking_id/payment", post(handlers::confirm_payment))
                .route("/bookings/:booking_id/cancel", post(handlers::cancel_booking))
                .route("/bookings/:booking_id/check-in", post(handlers::check_in))
                .route("/bookings/:booking_id/complete", post(handlers::complete_service))
                .route("/bookings/:booking_id/no-show", post(handlers::mark_no_show))
                .route("/bookings/:booking_id/assign", post(handlers::resolve_assignment))
                .route("/customers/:customer_id/bookings", get(handlers::list_bookings)),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Convenience helper wrapping a façade in router state
pub fn create_engine_router(engine: Arc<BookingService>) -> Router {
    create_router(AppState::new(engine))
}
