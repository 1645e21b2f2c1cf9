//! Booking entity and state machine
//!
//! A booking is owned exclusively by this module: the façade never
//! assigns fields directly, every status change goes through
//! [`Booking::apply`] and lands in the append-only status history.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use tokio::sync::RwLock;
use uuid::Uuid;

use crate::types::{
    Actor, BookingId, BookingStatus, CustomerId, Location, PaymentStatus, ReservationId,
    ServiceItem, StatusChange, TherapistId, TimeSlot, VendorId,
};
use crate::{Error, Result};

/// Events that drive the booking state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingEvent {
    /// Payment collaborator authorized the charge.
    PaymentAuthorized,
    /// Capacity model converted the tentative hold into a firm
    /// reservation.
    SlotReserved,
    /// Payment collaborator declined the charge.
    PaymentFailed,
    /// Assigned therapist checked in at the scheduled location.
    TherapistCheckedIn,
    /// Service finished.
    ServiceCompleted,
    /// Customer, vendor, admin, or the system asked to cancel.
    CancelRequested,
    /// Scheduled start passed with no therapist check-in.
    MissedCheckin,
}

impl fmt::Display for BookingEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingEvent::PaymentAuthorized => "payment_authorized",
            BookingEvent::SlotReserved => "slot_reserved",
            BookingEvent::PaymentFailed => "payment_failed",
            BookingEvent::TherapistCheckedIn => "therapist_checked_in",
            BookingEvent::ServiceCompleted => "service_completed",
            BookingEvent::CancelRequested => "cancel_requested",
            BookingEvent::MissedCheckin => "missed_checkin",
        };
        f.write_str(s)
    }
}

/// The transition table. Returns the next state, or `None` when the
/// event is not legal from `from`.
fn transition(from: BookingStatus, event: BookingEvent) -> Option<BookingStatus> {
    use BookingEvent::*;
    use BookingStatus::*;

    match (from, event) {
        (Pending, PaymentAuthorized) => Some(AwaitingPayment),
        (AwaitingPayment, SlotReserved) => Some(Confirmed),
        (Pending | AwaitingPayment, PaymentFailed) => Some(Cancelled),
        (Pending | AwaitingPayment | Confirmed, CancelRequested) => Some(Cancelled),
        (Confirmed, TherapistCheckedIn) => Some(InProgress),
        (InProgress, ServiceCompleted) => Some(Completed),
        (Confirmed, MissedCheckin) => Some(NoShow),
        _ => None,
    }
}

/// A single booking. `total_amount` is a price snapshot taken at
/// creation and never recomputed afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Booking {
    pub id: BookingId,
    pub customer_id: CustomerId,
    pub vendor_id: VendorId,
    pub services: Vec<ServiceItem>,
    pub slot: TimeSlot,
    pub location: Location,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub special_requests: Option<String>,
    pub status: BookingStatus,
    pub payment_status: PaymentStatus,
    pub total_amount: f64,
    pub assigned_therapist_id: Option<TherapistId>,
    /// References to reservations owned by the capacity model.
    pub reservation_ids: Vec<ReservationId>,
    pub created_at: DateTime<Utc>,
    pub status_history: Vec<StatusChange>,
}

impl Booking {
    pub fn new(
        customer_id: CustomerId,
        vendor_id: VendorId,
        services: Vec<ServiceItem>,
        slot: TimeSlot,
        location: Location,
        special_requests: Option<String>,
        actor: Actor,
    ) -> Self {
        let now = Utc::now();
        let total_amount = services.iter().map(|s| s.line_total()).sum();

        Self {
            id: Uuid::new_v4(),
            customer_id,
            vendor_id,
            services,
            slot,
            location,
            special_requests,
            status: BookingStatus::Pending,
            payment_status: PaymentStatus::Pending,
            total_amount,
            assigned_therapist_id: None,
            reservation_ids: Vec::new(),
            created_at: now,
            status_history: vec![StatusChange {
                status: BookingStatus::Pending,
                at: now,
                actor,
                reason: None,
            }],
        }
    }

    /// Apply an event, moving to the next state and appending to the
    /// status history. Fails with `InvalidTransition` and mutates
    /// nothing when the event is not legal from the current state.
    pub fn apply(&mut self, event: BookingEvent, actor: Actor, reason: Option<String>) -> Result<()> {
        let next = transition(self.status, event).ok_or(Error::InvalidTransition {
            from: self.status,
            event,
        })?;

        self.status = next;
        self.status_history.push(StatusChange {
            status: next,
            at: Utc::now(),
            actor,
            reason,
        });
        Ok(())
    }

    /// Whether the given event would be accepted from the current state.
    pub fn can_apply(&self, event: BookingEvent) -> bool {
        transition(self.status, event).is_some()
    }
}

/// In-memory booking registry. Mutations run under the store's write
/// lock through [`BookingStore::update`], so a transition and its
/// history entry commit together or not at all.
pub struct BookingStore {
    bookings: RwLock<HashMap<BookingId, Booking>>,
}

impl BookingStore {
    pub fn new() -> Self {
        Self {
            bookings: RwLock::new(HashMap::new()),
        }
    }

    pub async fn insert(&self, booking: Booking) -> Booking {
        let mut bookings = self.bookings.write().await;
        bookings.insert(booking.id, booking.clone());
        booking
    }

    pub async fn get(&self, id: BookingId) -> Result<Booking> {
        let bookings = self.bookings.read().await;
        bookings
            .get(&id)
            .cloned()
            .ok_or_else(|| Error::not_found(format!("booking {}", id)))
    }

    /// Mutate a booking in place. If the closure fails, no change is
    /// published.
    pub async fn update<F>(&self, id: BookingId, f: F) -> Result<Booking>
    where
        F: FnOnce(&mut Booking) -> Result<()>,
    {
        let mut bookings = self.bookings.write().await;
        let booking = bookings
            .get_mut(&id)
            .ok_or_else(|| Error::not_found(format!("booking {}", id)))?;

        let mut draft = booking.clone();
        f(&mut draft)?;
        *booking = draft.clone();
        Ok(draft)
    }

    pub async fn list_for_customer(
        &self,
        customer_id: &str,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        let bookings = self.bookings.read().await;
        let mut result: Vec<Booking> = bookings
            .values()
            .filter(|b| b.customer_id == customer_id)
            .filter(|b| status.map_or(true, |s| b.status == s))
            .cloned()
            .collect();
        result.sort_by_key(|b| b.created_at);
        result
    }

    pub async fn len(&self) -> usize {
        self.bookings.read().await.len()
    }
}

impl Default for BookingStore {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn sample_booking() -> Booking {
        let slot = TimeSlot::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 14, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 15, 0, 0).unwrap(),
        )
        .unwrap();

        Booking::new(
            "customer_1".to_string(),
            "vendor_1".to_string(),
            vec![ServiceItem {
                service_id: "service_1".to_string(),
                quantity: 2,
                duration_minutes: 30,
                price: 1500.0,
            }],
            slot,
            Location {
                address: "Koramangala, Bangalore".to_string(),
                latitude: None,
                longitude: None,
            },
            None,
            Actor::Customer("customer_1".to_string()),
        )
    }

    #[test]
    fn test_total_amount_is_snapshot_of_price_times_quantity() {
        let booking = sample_booking();
        assert_eq!(booking.total_amount, 3000.0);
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.status_history.len(), 1);
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut booking = sample_booking();

        booking
            .apply(BookingEvent::PaymentAuthorized, Actor::System, None)
            .unwrap();
        assert_eq!(booking.status, BookingStatus::AwaitingPayment);

        booking
            .apply(BookingEvent::SlotReserved, Actor::System, None)
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Confirmed);

        booking
            .apply(
                BookingEvent::TherapistCheckedIn,
                Actor::Therapist("therapist_1".to_string()),
                None,
            )
            .unwrap();
        assert_eq!(booking.status, BookingStatus::InProgress);

        booking
            .apply(BookingEvent::ServiceCompleted, Actor::System, None)
            .unwrap();
        assert_eq!(booking.status, BookingStatus::Completed);

        let states: Vec<BookingStatus> =
            booking.status_history.iter().map(|c| c.status).collect();
        assert_eq!(
            states,
            vec![
                BookingStatus::Pending,
                BookingStatus::AwaitingPayment,
                BookingStatus::Confirmed,
                BookingStatus::InProgress,
                BookingStatus::Completed,
            ]
        );
    }

    #[test]
    fn test_no_check_in_without_confirmation() {
        let mut booking = sample_booking();

        let err = booking
            .apply(BookingEvent::TherapistCheckedIn, Actor::System, None)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidTransition { .. }));
        // Failed transitions leave no trace
        assert_eq!(booking.status, BookingStatus::Pending);
        assert_eq!(booking.status_history.len(), 1);
    }

    #[test]
    fn test_cancel_from_terminal_state_rejected() {
        let mut booking = sample_booking();
        booking
            .apply(BookingEvent::PaymentAuthorized, Actor::System, None)
            .unwrap();
        booking
            .apply(BookingEvent::SlotReserved, Actor::System, None)
            .unwrap();
        booking
            .apply(BookingEvent::TherapistCheckedIn, Actor::System, None)
            .unwrap();
        booking
            .apply(BookingEvent::ServiceCompleted, Actor::System, None)
            .unwrap();

        let err = booking
            .apply(
                BookingEvent::CancelRequested,
                Actor::Customer("customer_1".to_string()),
                None,
            )
            .unwrap_err();
        assert!(matches!(
            err,
            Error::InvalidTransition {
                from: BookingStatus::Completed,
                event: BookingEvent::CancelRequested,
            }
        ));
    }

    #[test]
    fn test_cancel_not_allowed_in_progress() {
        let mut booking = sample_booking();
        booking
            .apply(BookingEvent::PaymentAuthorized, Actor::System, None)
            .unwrap();
        booking
            .apply(BookingEvent::SlotReserved, Actor::System, None)
            .unwrap();
        booking
            .apply(BookingEvent::TherapistCheckedIn, Actor::System, None)
            .unwrap();

        assert!(!booking.can_apply(BookingEvent::CancelRequested));
    }

    #[test]
    fn test_missed_checkin_only_from_confirmed() {
        let mut booking = sample_booking();
        assert!(!booking.can_apply(BookingEvent::MissedCheckin));

        booking
            .apply(BookingEvent::PaymentAuthorized, Actor::System, None)
            .unwrap();
        booking
            .apply(BookingEvent::SlotReserved, Actor::System, None)
            .unwrap();

        booking
            .apply(BookingEvent::MissedCheckin, Actor::System, None)
            .unwrap();
        assert_eq!(booking.status, BookingStatus::NoShow);
    }

    #[tokio::test]
    async fn test_store_update_rolls_back_on_error() {
        let store = BookingStore::new();
        let booking = store.insert(sample_booking()).await;

        let result = store
            .update(booking.id, |b| {
                b.apply(BookingEvent::ServiceCompleted, Actor::System, None)
            })
            .await;
        assert!(result.is_err());

        let unchanged = store.get(booking.id).await.unwrap();
        assert_eq!(unchanged.status, BookingStatus::Pending);
        assert_eq!(unchanged.status_history.len(), 1);
    }

    #[tokio::test]
    async fn test_store_list_filters_by_status() {
        let store = BookingStore::new();
        let first = store.insert(sample_booking()).await;
        store.insert(sample_booking()).await;

        store
            .update(first.id, |b| {
                b.apply(
                    BookingEvent::CancelRequested,
                    Actor::Customer("customer_1".to_string()),
                    Some("changed plans".to_string()),
                )
            })
            .await
            .unwrap();

        let cancelled = store
            .list_for_customer("customer_1", Some(BookingStatus::Cancelled))
            .await;
        assert_eq!(cancelled.len(), 1);
        assert_eq!(cancelled[0].id, first.id);

        let all = store.list_for_customer("customer_1", None).await;
        assert_eq!(all.len(), 2);
    }
}
