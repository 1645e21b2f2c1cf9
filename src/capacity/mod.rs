//! Capacity model
//!
//! Tracks per-resource time-slot availability. Each vendor or therapist
//! owns a slot book holding firm reservations and tentative, expiring
//! holds. Firm reservations never overlap for a resource; holds are
//! optimistic and may coexist until exactly one is confirmed.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

use crate::types::{BookingId, HoldId, ReservationId, ResourceId, TimeSlot};
use crate::{Error, Result};

pub mod sweep;

pub use sweep::{HoldSweeper, SweepConfig};

/// Default time a tentative hold stays valid before the sweep frees it.
pub const DEFAULT_HOLD_TTL_SECS: u64 = 600;

/// A tentative, expiring claim on a time slot. Not yet guaranteed: the
/// slot is only exclusive once the hold is confirmed.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HoldToken {
    pub id: HoldId,
    pub resource: ResourceId,
    pub slot: TimeSlot,
    pub booking_id: BookingId,
    pub expires_at: DateTime<Utc>,
}

impl HoldToken {
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at <= now
    }
}

/// A firm, exclusive claim on a time slot tied to a confirmed booking.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Reservation {
    pub id: ReservationId,
    pub resource: ResourceId,
    pub slot: TimeSlot,
    pub booking_id: BookingId,
}

/// Per-resource slot state.
#[derive(Default)]
struct SlotBook {
    firm: Vec<Reservation>,
    holds: HashMap<HoldId, HoldToken>,
}

impl SlotBook {
    fn firm_overlap(&self, slot: &TimeSlot) -> Option<&Reservation> {
        self.firm.iter().find(|r| r.slot.overlaps(slot))
    }

    fn prune_expired(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.holds.len();
        self.holds.retain(|_, h| !h.is_expired(now));
        before - self.holds.len()
    }
}

/// Owns all reservations and holds. Internally sharded by resource via
/// `DashMap`, so operations on disjoint resources proceed in parallel.
/// Critical sections are short and never perform I/O.
pub struct CapacityModel {
    books: DashMap<ResourceId, SlotBook>,
    /// Maps each reservation id to its resource so release by id stays
    /// O(1) per book.
    reservation_index: DashMap<ReservationId, ResourceId>,
    hold_ttl: Duration,
}

impl CapacityModel {
    pub fn new(hold_ttl_secs: u64) -> Self {
        Self {
            books: DashMap::new(),
            reservation_index: DashMap::new(),
            hold_ttl: Duration::seconds(hold_ttl_secs as i64),
        }
    }

    /// Place a tentative hold on `slot` for `resource`.
    ///
    /// Fails with `SlotConflict` if a firm reservation already overlaps.
    /// Holds from different bookings may coexist on the same window;
    /// only the first to confirm wins.
    pub fn hold(
        &self,
        resource: ResourceId,
        slot: TimeSlot,
        booking_id: BookingId,
    ) -> Result<HoldToken> {
        let now = Utc::now();
        let mut book = self.books.entry(resource.clone()).or_default();
        book.prune_expired(now);

        if let Some(existing) = book.firm_overlap(&slot) {
            return Err(Error::slot_conflict(format!(
                "{} already reserved over {}",
                resource, existing.slot
            )));
        }

        let token = HoldToken {
            id: Uuid::new_v4(),
            resource,
            slot,
            booking_id,
            expires_at: now + self.hold_ttl,
        };
        book.holds.insert(token.id, token.clone());
        Ok(token)
    }

    /// Convert a hold into a firm reservation.
    ///
    /// Fails with `HoldExpired` if the hold lapsed or was already
    /// released, and with `SlotConflict` if a competing hold on an
    /// overlapping window confirmed first (the losing hold is dropped).
    pub fn confirm(&self, token: &HoldToken) -> Result<Reservation> {
        let now = Utc::now();
        let mut book = self
            .books
            .get_mut(&token.resource)
            .ok_or_else(|| Error::HoldExpired(format!("no holds for {}", token.resource)))?;

        let hold = book
            .holds
            .remove(&token.id)
            .ok_or_else(|| Error::HoldExpired(format!("hold {} for {}", token.id, token.resource)))?;

        if hold.is_expired(now) {
            return Err(Error::HoldExpired(format!(
                "hold {} for {} lapsed at {}",
                hold.id, hold.resource, hold.expires_at
            )));
        }

        // First confirm wins: a competing hold that confirmed earlier is
        // now a firm reservation and blocks this one.
        if let Some(existing) = book.firm_overlap(&hold.slot) {
            return Err(Error::slot_conflict(format!(
                "{} already reserved over {}",
                hold.resource, existing.slot
            )));
        }

        let reservation = Reservation {
            id: Uuid::new_v4(),
            resource: hold.resource,
            slot: hold.slot,
            booking_id: hold.booking_id,
        };
        self.reservation_index
            .insert(reservation.id, reservation.resource.clone());
        book.firm.push(reservation.clone());
        Ok(reservation)
    }

    /// Free a firm reservation. Idempotent: releasing an unknown or
    /// already-released id is a no-op.
    pub fn release(&self, reservation_id: ReservationId) {
        let Some((_, resource)) = self.reservation_index.remove(&reservation_id) else {
            return;
        };
        if let Some(mut book) = self.books.get_mut(&resource) {
            book.firm.retain(|r| r.id != reservation_id);
        }
    }

    /// Drop a tentative hold without confirming it. Idempotent.
    pub fn release_hold(&self, token: &HoldToken) {
        if let Some(mut book) = self.books.get_mut(&token.resource) {
            book.holds.remove(&token.id);
        }
    }

    /// True iff no firm reservation overlaps `slot` for `resource`.
    /// Tentative holds do not affect availability.
    pub fn is_available(&self, resource: &ResourceId, slot: &TimeSlot) -> bool {
        match self.books.get(resource) {
            Some(book) => book.firm_overlap(slot).is_none(),
            None => true,
        }
    }

    /// Number of firm reservations for `resource` overlapping `window`.
    /// Used by the assignment resolver for load balancing.
    pub fn reservations_within(&self, resource: &ResourceId, window: &TimeSlot) -> usize {
        match self.books.get(resource) {
            Some(book) => book.firm.iter().filter(|r| r.slot.overlaps(window)).count(),
            None => 0,
        }
    }

    /// Drop every expired hold, locking one resource at a time. Returns
    /// the number of holds freed. Called by the background sweep.
    pub fn sweep_expired(&self) -> usize {
        let now = Utc::now();
        let mut freed = 0;
        for mut book in self.books.iter_mut() {
            freed += book.prune_expired(now);
        }
        freed
    }
}

impl Default for CapacityModel {
    fn default() -> Self {
        Self::new(DEFAULT_HOLD_TTL_SECS)
    }
}
