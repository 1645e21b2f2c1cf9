//! API handlers
//!
//! Thin translation layer: parses requests, calls the booking façade,
//! and maps internal error kinds onto HTTP status codes. No booking
//! logic lives here.

use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    Json,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::api::AppState;
use crate::booking::Booking;
use crate::service::CreateBookingRequest;
use crate::types::{Actor, BookingStatus};
use crate::Error;

/// Maps internal error kinds onto HTTP status codes. Retryable
/// contention becomes 409, missing therapists 503, so clients back off
/// and retry.
fn error_response(err: Error) -> (StatusCode, String) {
    let status = match &err {
        Error::SlotConflict(_) | Error::HoldExpired(_) | Error::InvalidTransition { .. } => {
            StatusCode::CONFLICT
        }
        Error::NoTherapistAvailable(_) => StatusCode::SERVICE_UNAVAILABLE,
        Error::NotFound(_) => StatusCode::NOT_FOUND,
        Error::Validation(_) => StatusCode::BAD_REQUEST,
        Error::Serialization(_) | Error::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, err.to_string())
}

/// Health check with system status
pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        bookings: state.engine.booking_count().await,
    })
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: String,
    pub version: String,
    pub bookings: usize,
}

/// Create a booking
pub async fn create_booking(
    State(state): State<AppState>,
    Json(payload): Json<CreateBookingRequest>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .create_booking(payload)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

/// Fetch a booking by id
pub async fn get_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .get_booking(booking_id)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
pub struct ListBookingsQuery {
    pub status: Option<BookingStatus>,
}

/// List a customer's bookings with optional status filter
pub async fn list_bookings(
    State(state): State<AppState>,
    Path(customer_id): Path<String>,
    Query(query): Query<ListBookingsQuery>,
) -> Json<Vec<Booking>> {
    Json(state.engine.list_bookings(&customer_id, query.status).await)
}

#[derive(Debug, Deserialize)]
pub struct ConfirmPaymentRequest {
    pub payment_ref: String,
}

/// Payment authorized: confirm the slot and assign a therapist
pub async fn confirm_payment(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<ConfirmPaymentRequest>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .confirm_payment(booking_id, &payload.payment_ref)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
pub struct CancelBookingRequest {
    pub actor: Actor,
    #[serde(default)]
    pub reason: Option<String>,
}

pub async fn cancel_booking(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<CancelBookingRequest>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .cancel_booking(booking_id, payload.actor, payload.reason)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

#[derive(Debug, Deserialize)]
pub struct CheckInRequest {
    pub therapist_id: String,
}

pub async fn check_in(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
    Json(payload): Json<CheckInRequest>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .check_in_therapist(booking_id, &payload.therapist_id)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

pub async fn complete_service(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .complete_service(booking_id)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

pub async fn mark_no_show(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .mark_no_show(booking_id)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}

/// Manual/retry path when no therapist was available at confirmation
pub async fn resolve_assignment(
    State(state): State<AppState>,
    Path(booking_id): Path<Uuid>,
) -> Result<Json<Booking>, (StatusCode, String)> {
    let booking = state
        .engine
        .resolve_assignment(booking_id)
        .await
        .map_err(error_response)?;
    Ok(Json(booking))
}
