//! Core types for ombaro-booking

use chrono::{DateTime, NaiveTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use uuid::Uuid;

use crate::{Error, Result};

/// Booking ID type
pub type BookingId = Uuid;

/// Hold ID type (tentative claim on a slot)
pub type HoldId = Uuid;

/// Reservation ID type (firm claim on a slot)
pub type ReservationId = Uuid;

pub type CustomerId = String;
pub type VendorId = String;
pub type TherapistId = String;
pub type ServiceId = String;

/// A bookable resource: either a vendor's capacity or a specific
/// therapist's time.
///
/// The `Ord` derive gives vendors precedence over therapists and orders
/// ids lexicographically within each kind. The coordinator relies on this
/// for its global lock acquisition order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "id", rename_all = "lowercase")]
pub enum ResourceId {
    Vendor(VendorId),
    Therapist(TherapistId),
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ResourceId::Vendor(id) => write!(f, "vendor/{}", id),
            ResourceId::Therapist(id) => write!(f, "therapist/{}", id),
        }
    }
}

/// Half-open time interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSlot {
    pub start: DateTime<Utc>,
    pub end: DateTime<Utc>,
}

impl TimeSlot {
    pub fn new(start: DateTime<Utc>, end: DateTime<Utc>) -> Result<Self> {
        if start >= end {
            return Err(Error::validation(format!(
                "slot start {} must precede end {}",
                start, end
            )));
        }
        Ok(Self { start, end })
    }

    /// Two half-open intervals overlap iff each starts before the other
    /// ends.
    pub fn overlaps(&self, other: &TimeSlot) -> bool {
        self.start < other.end && other.start < self.end
    }

    /// The full calendar day containing this slot's start, used for
    /// load-balancing queries.
    pub fn containing_day(&self) -> TimeSlot {
        let day_start = self
            .start
            .date_naive()
            .and_hms_opt(0, 0, 0)
            .expect("midnight is always valid")
            .and_utc();
        TimeSlot {
            start: day_start,
            end: day_start + chrono::Duration::days(1),
        }
    }
}

impl fmt::Display for TimeSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}, {})",
            self.start.format("%Y-%m-%d %H:%M"),
            self.end.format("%Y-%m-%d %H:%M")
        )
    }
}

/// Booking lifecycle states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BookingStatus {
    Pending,
    AwaitingPayment,
    Confirmed,
    InProgress,
    Completed,
    Cancelled,
    NoShow,
}

impl BookingStatus {
    /// Terminal states are immutable; a new booking must be created for
    /// re-service.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BookingStatus::Completed | BookingStatus::Cancelled | BookingStatus::NoShow
        )
    }
}

impl fmt::Display for BookingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            BookingStatus::Pending => "pending",
            BookingStatus::AwaitingPayment => "awaiting_payment",
            BookingStatus::Confirmed => "confirmed",
            BookingStatus::InProgress => "in_progress",
            BookingStatus::Completed => "completed",
            BookingStatus::Cancelled => "cancelled",
            BookingStatus::NoShow => "no_show",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
}

/// Who drove a transition, recorded in the status history.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "role", content = "id", rename_all = "snake_case")]
pub enum Actor {
    Customer(CustomerId),
    Vendor(VendorId),
    Therapist(TherapistId),
    Admin(String),
    System,
}

/// One entry in a booking's append-only status history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusChange {
    pub status: BookingStatus,
    pub at: DateTime<Utc>,
    pub actor: Actor,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// One requested service line, with price and duration snapshotted from
/// the catalog at creation time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceItem {
    pub service_id: ServiceId,
    pub quantity: u32,
    pub duration_minutes: u32,
    pub price: f64,
}

impl ServiceItem {
    pub fn line_total(&self) -> f64 {
        self.price * self.quantity as f64
    }

    pub fn total_minutes(&self) -> u32 {
        self.duration_minutes * self.quantity
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Location {
    pub address: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub latitude: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub longitude: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AvailabilityStatus {
    Available,
    Busy,
    Offline,
}

/// Daily working-hours template (UTC). A slot fits iff it falls entirely
/// inside the window on its own day.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct WorkingHours {
    pub start: NaiveTime,
    pub end: NaiveTime,
}

impl WorkingHours {
    pub fn covers(&self, slot: &TimeSlot) -> bool {
        if slot.start.date_naive() != slot.end.date_naive()
            && slot.end.time() != NaiveTime::MIN
        {
            return false;
        }
        let end_time = if slot.end.time() == NaiveTime::MIN {
            // Slot runs to midnight; compare against end-of-day.
            NaiveTime::from_hms_opt(23, 59, 59).expect("valid time")
        } else {
            slot.end.time()
        };
        slot.start.time() >= self.start && end_time <= self.end
    }
}

impl Default for WorkingHours {
    fn default() -> Self {
        Self {
            start: NaiveTime::from_hms_opt(0, 0, 0).expect("valid time"),
            end: NaiveTime::from_hms_opt(23, 59, 59).expect("valid time"),
        }
    }
}

/// What a therapist can do and when, as supplied by the profile/catalog
/// store. Single-vendor affiliation is assumed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TherapistCapability {
    pub therapist_id: TherapistId,
    pub vendor_id: VendorId,
    pub qualified_services: HashSet<ServiceId>,
    #[serde(default)]
    pub working_hours: WorkingHours,
    pub availability_status: AvailabilityStatus,
    pub rating: f64,
}
