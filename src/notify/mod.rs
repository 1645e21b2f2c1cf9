//! Notification collaborator boundary
//!
//! The façade emits a [`BookingEvent`] on every state transition.
//! Delivery is fire-and-forget: the trait is infallible by signature and
//! a failing transport must swallow its own errors, so notifications can
//! never roll back a booking transition.

use async_trait::async_trait;
use serde::Serialize;

use crate::types::{BookingId, TherapistId};

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum BookingNotification {
    BookingCreated {
        booking_id: BookingId,
    },
    BookingConfirmed {
        booking_id: BookingId,
    },
    TherapistAssigned {
        booking_id: BookingId,
        therapist_id: TherapistId,
    },
    /// No therapist qualified yet; resolution will be retried.
    AssignmentPending {
        booking_id: BookingId,
    },
    /// Retry cutoff passed without an assignment.
    AssignmentEscalated {
        booking_id: BookingId,
    },
    ServiceStarted {
        booking_id: BookingId,
        therapist_id: TherapistId,
    },
    BookingCompleted {
        booking_id: BookingId,
    },
    BookingCancelled {
        booking_id: BookingId,
        reason: Option<String>,
    },
    BookingNoShow {
        booking_id: BookingId,
    },
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, notification: BookingNotification);
}

/// Logs every notification through tracing. Stands in for the SMS/push
/// dispatch service.
pub struct TracingNotifier;

#[async_trait]
impl Notifier for TracingNotifier {
    async fn notify(&self, notification: BookingNotification) {
        match serde_json::to_string(&notification) {
            Ok(payload) => tracing::info!(%payload, "booking notification"),
            Err(err) => tracing::warn!(error = %err, "failed to encode notification"),
        }
    }
}
