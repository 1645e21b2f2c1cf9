//! Booking service façade
//!
//! The only entry point external callers use. Orchestrates the
//! coordinator, state machine, capacity model, and assignment resolver,
//! and is the single layer allowed to translate internal error kinds
//! into caller-facing outcomes.
//!
//! Lock discipline: validation and catalog reads happen before any lock
//! is acquired; capacity and state mutations run under the coordinator's
//! per-resource guards with no I/O inside the critical section.

use chrono::{NaiveDate, NaiveTime, Utc};
use dashmap::DashMap;
use serde::Deserialize;
use std::sync::Arc;

use crate::assignment::{AssignmentPolicy, AssignmentResolver};
use crate::booking::{Booking, BookingEvent, BookingStore};
use crate::capacity::{CapacityModel, HoldToken};
use crate::catalog::{CachedCatalog, CatalogStore};
use crate::coordinator::Coordinator;
use crate::notify::{BookingNotification, Notifier, TracingNotifier};
use crate::types::{
    Actor, BookingId, BookingStatus, CustomerId, Location, PaymentStatus, ResourceId, ServiceId,
    ServiceItem, TherapistCapability, TimeSlot, VendorId,
};
use crate::{Error, Result};

/// Tuning knobs for the engine, filled from `AppConfig`.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub hold_ttl_secs: u64,
    pub catalog_cache_ttl_secs: u64,
    pub assignment: AssignmentPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            hold_ttl_secs: crate::capacity::DEFAULT_HOLD_TTL_SECS,
            catalog_cache_ttl_secs: 300,
            assignment: AssignmentPolicy::default(),
        }
    }
}

/// One requested service line in a create-booking call. Price and
/// duration are looked up from the catalog, never trusted from the
/// client.
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceRequest {
    pub service_id: ServiceId,
    #[serde(default = "default_quantity")]
    pub quantity: u32,
}

fn default_quantity() -> u32 {
    1
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateBookingRequest {
    pub customer_id: CustomerId,
    pub vendor_id: VendorId,
    pub services: Vec<ServiceRequest>,
    pub booking_date: NaiveDate,
    pub booking_time: NaiveTime,
    pub location: Location,
    #[serde(default)]
    pub special_requests: Option<String>,
}

pub struct BookingService {
    store: BookingStore,
    capacity: Arc<CapacityModel>,
    coordinator: Coordinator,
    resolver: AssignmentResolver,
    catalog: Arc<dyn CatalogStore>,
    notifier: Arc<dyn Notifier>,
    /// Outstanding tentative holds, keyed by booking. Consumed on
    /// confirm or cancel; the sweep frees the capacity-side state if the
    /// booking is simply abandoned.
    holds: DashMap<BookingId, HoldToken>,
}

impl BookingService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        notifier: Arc<dyn Notifier>,
        config: EngineConfig,
    ) -> Self {
        let capacity = Arc::new(CapacityModel::new(config.hold_ttl_secs));
        let catalog: Arc<dyn CatalogStore> = Arc::new(CachedCatalog::new(
            catalog,
            config.catalog_cache_ttl_secs,
        ));
        let resolver =
            AssignmentResolver::new(catalog.clone(), capacity.clone(), config.assignment);

        Self {
            store: BookingStore::new(),
            capacity,
            coordinator: Coordinator::new(),
            resolver,
            catalog,
            notifier,
            holds: DashMap::new(),
        }
    }

    /// Engine with a tracing notifier and default tuning.
    pub fn with_defaults(catalog: Arc<dyn CatalogStore>) -> Self {
        Self::new(catalog, Arc::new(TracingNotifier), EngineConfig::default())
    }

    /// The capacity model, shared with the hold-expiry sweep.
    pub fn capacity(&self) -> Arc<CapacityModel> {
        self.capacity.clone()
    }

    pub async fn booking_count(&self) -> usize {
        self.store.len().await
    }

    /// Create a booking in `pending` with a tentative hold on the
    /// vendor's slot.
    pub async fn create_booking(&self, request: CreateBookingRequest) -> Result<Booking> {
        // Lapsed tokens of abandoned bookings; the sweep already freed
        // the capacity side of each.
        let now = Utc::now();
        self.holds.retain(|_, token| !token.is_expired(now));
        self.coordinator.prune_idle();

        // Validation and catalog reads happen before any lock.
        if request.services.is_empty() {
            return Err(Error::validation("at least one service is required"));
        }
        if request.services.iter().any(|s| s.quantity == 0) {
            return Err(Error::validation("service quantity must be at least 1"));
        }

        let mut services = Vec::with_capacity(request.services.len());
        for item in &request.services {
            let offering = self
                .catalog
                .service(&request.vendor_id, &item.service_id)
                .await?;
            services.push(ServiceItem {
                service_id: offering.service_id,
                quantity: item.quantity,
                duration_minutes: offering.duration_minutes,
                price: offering.price,
            });
        }

        let start = request
            .booking_date
            .and_time(request.booking_time)
            .and_utc();
        if start <= Utc::now() {
            return Err(Error::validation("booking must start in the future"));
        }
        let total_minutes: u32 = services.iter().map(|s| s.total_minutes()).sum();
        let slot = TimeSlot::new(start, start + chrono::Duration::minutes(total_minutes as i64))?;

        let booking = Booking::new(
            request.customer_id.clone(),
            request.vendor_id.clone(),
            services,
            slot,
            request.location,
            request.special_requests,
            Actor::Customer(request.customer_id),
        );

        let vendor = ResourceId::Vendor(booking.vendor_id.clone());
        {
            let _guard = self.coordinator.lock_one(vendor.clone()).await;
            let token = self.capacity.hold(vendor, slot, booking.id)?;
            self.holds.insert(booking.id, token);
            self.store.insert(booking.clone()).await;
        }

        self.notifier
            .notify(BookingNotification::BookingCreated {
                booking_id: booking.id,
            })
            .await;
        tracing::info!(booking_id = %booking.id, vendor_id = %booking.vendor_id, "booking created");
        Ok(booking)
    }

    /// Consume a `payment_authorized` event: firm up the vendor slot and
    /// move the booking to `confirmed`, then attempt therapist
    /// assignment. If the slot was lost in the meantime the booking is
    /// cancelled with reason `slot_conflict` and the capacity error
    /// propagates to the caller.
    pub async fn confirm_payment(&self, booking_id: BookingId, payment_ref: &str) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        let vendor = ResourceId::Vendor(booking.vendor_id.clone());
        let _guard = self.coordinator.lock_one(vendor).await;

        // Cancel racing with confirm serializes on the vendor lock: if
        // the cancel won, this transition fails and nothing is mutated.
        self.store
            .update(booking_id, |b| {
                b.apply(
                    BookingEvent::PaymentAuthorized,
                    Actor::System,
                    Some(format!("payment_ref={}", payment_ref)),
                )?;
                b.payment_status = PaymentStatus::Paid;
                Ok(())
            })
            .await?;

        let token = self.holds.remove(&booking_id).map(|(_, t)| t);
        let confirm_result = match token {
            Some(token) => self.capacity.confirm(&token),
            None => Err(Error::HoldExpired(format!(
                "no outstanding hold for booking {}",
                booking_id
            ))),
        };

        match confirm_result {
            Ok(reservation) => {
                self.store
                    .update(booking_id, |b| {
                        b.apply(BookingEvent::SlotReserved, Actor::System, None)?;
                        b.reservation_ids.push(reservation.id);
                        Ok(())
                    })
                    .await?;
            }
            Err(err) => {
                self.store
                    .update(booking_id, |b| {
                        b.apply(
                            BookingEvent::CancelRequested,
                            Actor::System,
                            Some("slot_conflict".to_string()),
                        )
                    })
                    .await?;
                self.notifier
                    .notify(BookingNotification::BookingCancelled {
                        booking_id,
                        reason: Some("slot_conflict".to_string()),
                    })
                    .await;
                tracing::warn!(booking_id = %booking_id, error = %err, "slot lost before confirm");
                return Err(err);
            }
        }

        self.notifier
            .notify(BookingNotification::BookingConfirmed { booking_id })
            .await;

        // Assignment failure is not fatal: the booking stays confirmed
        // and resolution is retried later.
        match self.assign_locked(booking_id).await {
            Ok(_) => {}
            Err(Error::NoTherapistAvailable(_)) => {
                self.notifier
                    .notify(BookingNotification::AssignmentPending { booking_id })
                    .await;
            }
            Err(err) => return Err(err),
        }

        self.store.get(booking_id).await
    }

    /// Consume a `payment_failed` event from the payment collaborator.
    pub async fn fail_payment(&self, booking_id: BookingId, reason: &str) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        let vendor = ResourceId::Vendor(booking.vendor_id.clone());
        let _guard = self.coordinator.lock_one(vendor).await;

        let updated = self
            .store
            .update(booking_id, |b| {
                b.apply(
                    BookingEvent::PaymentFailed,
                    Actor::System,
                    Some(reason.to_string()),
                )?;
                b.payment_status = PaymentStatus::Failed;
                Ok(())
            })
            .await?;

        self.release_claims(&updated);
        self.notifier
            .notify(BookingNotification::BookingCancelled {
                booking_id,
                reason: Some(reason.to_string()),
            })
            .await;
        Ok(updated)
    }

    pub async fn cancel_booking(
        &self,
        booking_id: BookingId,
        actor: Actor,
        reason: Option<String>,
    ) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        let _guard = self.coordinator.lock(self.resources_of(&booking)).await;

        let updated = self
            .store
            .update(booking_id, |b| {
                b.apply(BookingEvent::CancelRequested, actor, reason.clone())
            })
            .await?;

        self.release_claims(&updated);
        self.notifier
            .notify(BookingNotification::BookingCancelled { booking_id, reason })
            .await;
        tracing::info!(booking_id = %booking_id, "booking cancelled");
        Ok(updated)
    }

    pub async fn get_booking(&self, booking_id: BookingId) -> Result<Booking> {
        self.store.get(booking_id).await
    }

    pub async fn list_bookings(
        &self,
        customer_id: &str,
        status: Option<BookingStatus>,
    ) -> Vec<Booking> {
        self.store.list_for_customer(customer_id, status).await
    }

    /// Assigned therapist checks in at the scheduled location; the
    /// booking moves to `in_progress`.
    pub async fn check_in_therapist(
        &self,
        booking_id: BookingId,
        therapist_id: &str,
    ) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        if booking.assigned_therapist_id.as_deref() != Some(therapist_id) {
            return Err(Error::validation(format!(
                "therapist {} is not assigned to booking {}",
                therapist_id, booking_id
            )));
        }

        let _guard = self.coordinator.lock(self.resources_of(&booking)).await;
        let updated = self
            .store
            .update(booking_id, |b| {
                b.apply(
                    BookingEvent::TherapistCheckedIn,
                    Actor::Therapist(therapist_id.to_string()),
                    None,
                )
            })
            .await?;

        self.notifier
            .notify(BookingNotification::ServiceStarted {
                booking_id,
                therapist_id: therapist_id.to_string(),
            })
            .await;
        Ok(updated)
    }

    /// Service finished; reservations are released for reuse.
    pub async fn complete_service(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        let _guard = self.coordinator.lock(self.resources_of(&booking)).await;

        let updated = self
            .store
            .update(booking_id, |b| {
                b.apply(BookingEvent::ServiceCompleted, Actor::System, None)
            })
            .await?;

        self.release_claims(&updated);
        self.notifier
            .notify(BookingNotification::BookingCompleted { booking_id })
            .await;
        Ok(updated)
    }

    /// Timeout past the scheduled start with no check-in. Valid only
    /// from `confirmed`; releases the held reservations.
    pub async fn mark_no_show(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        if Utc::now() < booking.slot.start {
            return Err(Error::validation(format!(
                "booking {} has not reached its scheduled start",
                booking_id
            )));
        }

        let _guard = self.coordinator.lock(self.resources_of(&booking)).await;
        let updated = self
            .store
            .update(booking_id, |b| {
                b.apply(BookingEvent::MissedCheckin, Actor::System, None)
            })
            .await?;

        self.release_claims(&updated);
        self.notifier
            .notify(BookingNotification::BookingNoShow { booking_id })
            .await;
        Ok(updated)
    }

    /// Single resolution attempt for a confirmed, unassigned booking.
    /// Used for manual assignment and client-driven retries.
    pub async fn resolve_assignment(&self, booking_id: BookingId) -> Result<Booking> {
        self.assign_locked(booking_id).await
    }

    /// Drive the resolver's backoff loop until a therapist is found or
    /// the cutoff before the scheduled start passes, at which point the
    /// booking is escalated toward the no-show workflow.
    pub async fn resolve_assignment_with_retry(&self, booking_id: BookingId) -> Result<Booking> {
        loop {
            let booking = self.store.get(booking_id).await?;
            if booking.status != BookingStatus::Confirmed {
                return Err(Error::validation(format!(
                    "booking {} is {}, not confirmed",
                    booking_id, booking.status
                )));
            }

            match self.resolver.resolve_with_retry(&booking).await {
                Ok(_) => match self.assign_locked(booking_id).await {
                    Ok(updated) => return Ok(updated),
                    // Candidate raced away between resolve and reserve;
                    // go around again (still inside the cutoff).
                    Err(Error::NoTherapistAvailable(_)) | Err(Error::SlotConflict(_)) => continue,
                    Err(err) => return Err(err),
                },
                Err(Error::NoTherapistAvailable(msg)) => {
                    self.notifier
                        .notify(BookingNotification::AssignmentEscalated { booking_id })
                        .await;
                    return Err(Error::NoTherapistAvailable(msg));
                }
                Err(err) => return Err(err),
            }
        }
    }

    /// Resolve a candidate and firm-reserve them under the therapist
    /// lock. Only the therapist is locked here, so the booking's status
    /// is re-validated at the commit point in `reserve_therapist`.
    async fn assign_locked(&self, booking_id: BookingId) -> Result<Booking> {
        let booking = self.store.get(booking_id).await?;
        if booking.status != BookingStatus::Confirmed {
            return Err(Error::InvalidTransition {
                from: booking.status,
                event: BookingEvent::SlotReserved,
            });
        }
        if booking.assigned_therapist_id.is_some() {
            return Ok(booking);
        }

        // A chosen candidate can be firm-reserved by a competing booking
        // between resolve and reserve; re-resolve a bounded number of
        // times before reporting no availability.
        for _ in 0..3 {
            let candidate = self.resolver.resolve(&booking).await?;
            match self.reserve_therapist(&booking, &candidate).await {
                Ok(updated) => {
                    self.notifier
                        .notify(BookingNotification::TherapistAssigned {
                            booking_id,
                            therapist_id: candidate.therapist_id.clone(),
                        })
                        .await;
                    tracing::info!(
                        booking_id = %booking_id,
                        therapist_id = %candidate.therapist_id,
                        "therapist assigned"
                    );
                    return Ok(updated);
                }
                Err(Error::SlotConflict(_)) => continue,
                Err(err) => return Err(err),
            }
        }

        Err(Error::NoTherapistAvailable(format!(
            "assignment contention for booking {}",
            booking_id
        )))
    }

    async fn reserve_therapist(
        &self,
        booking: &Booking,
        candidate: &TherapistCapability,
    ) -> Result<Booking> {
        let resource = ResourceId::Therapist(candidate.therapist_id.clone());
        let _guard = self.coordinator.lock_one(resource.clone()).await;

        let token = self.capacity.hold(resource, booking.slot, booking.id)?;
        let reservation = self.capacity.confirm(&token)?;

        // A cancel only holds the vendor lock while no therapist is
        // assigned, so the booking can leave `confirmed` between the
        // status check in `assign_locked` and this commit. Re-check
        // under the store write and give the reservation back if the
        // booking moved on.
        let updated = self
            .store
            .update(booking.id, |b| {
                if b.status != BookingStatus::Confirmed {
                    return Err(Error::InvalidTransition {
                        from: b.status,
                        event: BookingEvent::SlotReserved,
                    });
                }
                b.assigned_therapist_id = Some(candidate.therapist_id.clone());
                b.reservation_ids.push(reservation.id);
                Ok(())
            })
            .await;
        if updated.is_err() {
            self.capacity.release(reservation.id);
        }
        updated
    }

    fn resources_of(&self, booking: &Booking) -> Vec<ResourceId> {
        let mut resources = vec![ResourceId::Vendor(booking.vendor_id.clone())];
        if let Some(therapist_id) = &booking.assigned_therapist_id {
            resources.push(ResourceId::Therapist(therapist_id.clone()));
        }
        resources
    }

    /// Free every claim a booking holds: the tentative hold, if still
    /// outstanding, and all firm reservations. Idempotent.
    fn release_claims(&self, booking: &Booking) {
        if let Some((_, token)) = self.holds.remove(&booking.id) {
            self.capacity.release_hold(&token);
        }
        for reservation_id in &booking.reservation_ids {
            self.capacity.release(*reservation_id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::{ServiceOffering, StaticCatalog};
    use crate::notify::testing::RecordingNotifier;
    use crate::types::AvailabilityStatus;
    use chrono::Duration;
    use std::collections::HashSet;

    fn seeded_catalog() -> StaticCatalog {
        let catalog = StaticCatalog::new();
        catalog.add_service(
            "vendor_1",
            ServiceOffering {
                service_id: "service_1".to_string(),
                name: "Swedish Massage".to_string(),
                duration_minutes: 60,
                price: 2000.0,
            },
        );
        catalog.add_therapist(TherapistCapability {
            therapist_id: "therapist_1".to_string(),
            vendor_id: "vendor_1".to_string(),
            qualified_services: HashSet::from(["service_1".to_string()]),
            working_hours: Default::default(),
            availability_status: AvailabilityStatus::Available,
            rating: 4.8,
        });
        catalog
    }

    fn request() -> CreateBookingRequest {
        let start = Utc::now() + Duration::days(1);
        CreateBookingRequest {
            customer_id: "customer_1".to_string(),
            vendor_id: "vendor_1".to_string(),
            services: vec![ServiceRequest {
                service_id: "service_1".to_string(),
                quantity: 1,
            }],
            booking_date: start.date_naive(),
            booking_time: start.time(),
            location: Location {
                address: "Koramangala, Bangalore".to_string(),
                latitude: None,
                longitude: None,
            },
            special_requests: None,
        }
    }

    fn engine_with(notifier: Arc<dyn Notifier>) -> BookingService {
        BookingService::new(Arc::new(seeded_catalog()), notifier, EngineConfig::default())
    }

    #[tokio::test]
    async fn test_create_rejects_empty_services_before_locks() {
        let engine = engine_with(Arc::new(TracingNotifier));
        let mut req = request();
        req.services.clear();

        let err = engine.create_booking(req).await.unwrap_err();
        assert!(matches!(err, Error::Validation(_)));
        assert_eq!(engine.booking_count().await, 0);
    }

    #[tokio::test]
    async fn test_confirm_assigns_therapist_and_notifies() {
        let notifier = Arc::new(RecordingNotifier::new());
        let engine = engine_with(notifier.clone());

        let booking = engine.create_booking(request()).await.unwrap();
        let confirmed = engine.confirm_payment(booking.id, "pay_001").await.unwrap();

        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert_eq!(confirmed.payment_status, PaymentStatus::Paid);
        assert_eq!(confirmed.assigned_therapist_id.as_deref(), Some("therapist_1"));
        assert_eq!(confirmed.reservation_ids.len(), 2);

        let events = notifier.events.lock().await;
        assert!(events
            .iter()
            .any(|e| matches!(e, BookingNotification::BookingConfirmed { .. })));
        assert!(events
            .iter()
            .any(|e| matches!(e, BookingNotification::TherapistAssigned { .. })));
    }

    #[tokio::test]
    async fn test_no_therapist_keeps_booking_confirmed() {
        let catalog = StaticCatalog::new();
        catalog.add_service(
            "vendor_1",
            ServiceOffering {
                service_id: "service_1".to_string(),
                name: "Swedish Massage".to_string(),
                duration_minutes: 60,
                price: 2000.0,
            },
        );
        let engine = BookingService::new(
            Arc::new(catalog),
            Arc::new(TracingNotifier),
            EngineConfig::default(),
        );

        let booking = engine.create_booking(request()).await.unwrap();
        let confirmed = engine.confirm_payment(booking.id, "pay_001").await.unwrap();

        assert_eq!(confirmed.status, BookingStatus::Confirmed);
        assert!(confirmed.assigned_therapist_id.is_none());

        let err = engine.resolve_assignment(booking.id).await.unwrap_err();
        assert!(matches!(err, Error::NoTherapistAvailable(_)));
        let still = engine.get_booking(booking.id).await.unwrap();
        assert_eq!(still.status, BookingStatus::Confirmed);
    }

    #[tokio::test]
    async fn test_cancel_releases_vendor_slot() {
        let engine = engine_with(Arc::new(TracingNotifier));

        let booking = engine.create_booking(request()).await.unwrap();
        let confirmed = engine.confirm_payment(booking.id, "pay_001").await.unwrap();
        let vendor = ResourceId::Vendor("vendor_1".to_string());
        assert!(!engine.capacity.is_available(&vendor, &confirmed.slot));

        engine
            .cancel_booking(
                booking.id,
                Actor::Customer("customer_1".to_string()),
                Some("changed plans".to_string()),
            )
            .await
            .unwrap();

        assert!(engine.capacity.is_available(&vendor, &confirmed.slot));
        let therapist = ResourceId::Therapist("therapist_1".to_string());
        assert!(engine.capacity.is_available(&therapist, &confirmed.slot));
    }

    #[tokio::test]
    async fn test_payment_failure_cancels_and_frees_hold() {
        let engine = engine_with(Arc::new(TracingNotifier));

        let booking = engine.create_booking(request()).await.unwrap();
        let cancelled = engine
            .fail_payment(booking.id, "card_declined")
            .await
            .unwrap();

        assert_eq!(cancelled.status, BookingStatus::Cancelled);
        assert_eq!(cancelled.payment_status, PaymentStatus::Failed);
        assert!(engine.holds.get(&booking.id).is_none());
    }

    #[tokio::test]
    async fn test_create_purges_lapsed_hold_tokens() {
        let engine = BookingService::new(
            Arc::new(seeded_catalog()),
            Arc::new(TracingNotifier),
            EngineConfig {
                hold_ttl_secs: 0,
                ..EngineConfig::default()
            },
        );

        let first = engine.create_booking(request()).await.unwrap();
        assert!(engine.holds.contains_key(&first.id));

        // The next create sweeps the lapsed token out of the map
        let second = engine.create_booking(request()).await.unwrap();
        assert!(!engine.holds.contains_key(&first.id));
        assert!(engine.holds.contains_key(&second.id));
    }

    #[tokio::test]
    async fn test_check_in_requires_assigned_therapist() {
        let engine = engine_with(Arc::new(TracingNotifier));

        let booking = engine.create_booking(request()).await.unwrap();
        engine.confirm_payment(booking.id, "pay_001").await.unwrap();

        let err = engine
            .check_in_therapist(booking.id, "therapist_9")
            .await
            .unwrap_err();
        assert!(matches!(err, Error::Validation(_)));

        let started = engine
            .check_in_therapist(booking.id, "therapist_1")
            .await
            .unwrap();
        assert_eq!(started.status, BookingStatus::InProgress);
    }
}
