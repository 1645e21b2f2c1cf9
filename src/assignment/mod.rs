//! Assignment resolver
//!
//! Matches a confirmed booking to a qualified, available therapist.
//! Candidates must work for the booking's vendor, cover every requested
//! service, report themselves available, have the window inside their
//! working hours, and have no firm reservation overlapping it.
//!
//! Ranking: highest rating first, then fewest reservations on the
//! booking's day (load balancing), then lowest therapist id so the
//! outcome is deterministic.

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;

use crate::booking::Booking;
use crate::capacity::CapacityModel;
use crate::catalog::CatalogStore;
use crate::types::{AvailabilityStatus, ResourceId, ServiceId, TherapistCapability};
use crate::{Error, Result};

/// Retry policy for resolution attempts. A failed attempt is retried on
/// a fixed backoff until the cutoff before the scheduled start, after
/// which the booking is escalated toward the no-show workflow.
#[derive(Debug, Clone)]
pub struct AssignmentPolicy {
    pub retry_backoff_secs: u64,
    pub cutoff_before_start_secs: u64,
}

impl Default for AssignmentPolicy {
    fn default() -> Self {
        Self {
            retry_backoff_secs: 30,
            cutoff_before_start_secs: 1800,
        }
    }
}

pub struct AssignmentResolver {
    catalog: Arc<dyn CatalogStore>,
    capacity: Arc<CapacityModel>,
    policy: AssignmentPolicy,
}

impl AssignmentResolver {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        capacity: Arc<CapacityModel>,
        policy: AssignmentPolicy,
    ) -> Self {
        Self {
            catalog,
            capacity,
            policy,
        }
    }

    pub fn policy(&self) -> &AssignmentPolicy {
        &self.policy
    }

    /// Select the best therapist for `booking`. Read-only: reserving the
    /// therapist's slot is the façade's job, under the coordinator lock.
    pub async fn resolve(&self, booking: &Booking) -> Result<TherapistCapability> {
        let requested: HashSet<ServiceId> = booking
            .services
            .iter()
            .map(|s| s.service_id.clone())
            .collect();

        let mut candidates: Vec<TherapistCapability> = self
            .catalog
            .therapists_for_vendor(&booking.vendor_id)
            .await?
            .into_iter()
            .filter(|c| c.availability_status == AvailabilityStatus::Available)
            .filter(|c| requested.is_subset(&c.qualified_services))
            .filter(|c| c.working_hours.covers(&booking.slot))
            .filter(|c| {
                self.capacity.is_available(
                    &ResourceId::Therapist(c.therapist_id.clone()),
                    &booking.slot,
                )
            })
            .collect();

        if candidates.is_empty() {
            return Err(Error::NoTherapistAvailable(format!(
                "no qualified therapist at vendor {} for {}",
                booking.vendor_id, booking.slot
            )));
        }

        let day = booking.slot.containing_day();
        candidates.sort_by(|a, b| {
            b.rating
                .total_cmp(&a.rating)
                .then_with(|| {
                    let load_a = self
                        .capacity
                        .reservations_within(&ResourceId::Therapist(a.therapist_id.clone()), &day);
                    let load_b = self
                        .capacity
                        .reservations_within(&ResourceId::Therapist(b.therapist_id.clone()), &day);
                    load_a.cmp(&load_b)
                })
                .then_with(|| a.therapist_id.cmp(&b.therapist_id))
        });

        let chosen = candidates.remove(0);
        tracing::debug!(
            booking_id = %booking.id,
            therapist_id = %chosen.therapist_id,
            rating = chosen.rating,
            "resolved therapist assignment"
        );
        Ok(chosen)
    }

    /// Retry resolution on the policy's backoff until the cutoff before
    /// the scheduled start. Only `NoTherapistAvailable` is retried;
    /// other errors propagate immediately.
    pub async fn resolve_with_retry(&self, booking: &Booking) -> Result<TherapistCapability> {
        let cutoff =
            booking.slot.start - Duration::seconds(self.policy.cutoff_before_start_secs as i64);

        loop {
            match self.resolve(booking).await {
                Ok(candidate) => return Ok(candidate),
                Err(Error::NoTherapistAvailable(msg)) => {
                    let next_attempt =
                        Utc::now() + Duration::seconds(self.policy.retry_backoff_secs as i64);
                    if next_attempt >= cutoff {
                        tracing::warn!(
                            booking_id = %booking.id,
                            "assignment retry cutoff reached"
                        );
                        return Err(Error::NoTherapistAvailable(msg));
                    }
                    tokio::time::sleep(std::time::Duration::from_secs(
                        self.policy.retry_backoff_secs,
                    ))
                    .await;
                }
                Err(err) => return Err(err),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::StaticCatalog;
    use crate::types::{Actor, Location, ServiceItem, TimeSlot};
    use chrono::TimeZone;
    use chrono::Utc;

    fn capability(id: &str, rating: f64) -> TherapistCapability {
        TherapistCapability {
            therapist_id: id.to_string(),
            vendor_id: "vendor_1".to_string(),
            qualified_services: HashSet::from(["service_1".to_string(), "service_2".to_string()]),
            working_hours: Default::default(),
            availability_status: AvailabilityStatus::Available,
            rating,
        }
    }

    fn booking() -> Booking {
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
                quantity: 1,
                duration_minutes: 60,
                price: 2000.0,
            }],
            slot,
            Location {
                address: "Indiranagar, Bangalore".to_string(),
                latitude: None,
                longitude: None,
            },
            None,
            Actor::Customer("customer_1".to_string()),
        )
    }

    fn resolver(catalog: StaticCatalog, capacity: Arc<CapacityModel>) -> AssignmentResolver {
        AssignmentResolver::new(Arc::new(catalog), capacity, AssignmentPolicy::default())
    }

    #[tokio::test]
    async fn test_highest_rating_wins() {
        let catalog = StaticCatalog::new();
        catalog.add_therapist(capability("therapist_1", 4.2));
        catalog.add_therapist(capability("therapist_2", 4.9));

        let resolver = resolver(catalog, Arc::new(CapacityModel::default()));
        let chosen = resolver.resolve(&booking()).await.unwrap();
        assert_eq!(chosen.therapist_id, "therapist_2");
    }

    #[tokio::test]
    async fn test_rating_tie_breaks_on_day_load() {
        let capacity = Arc::new(CapacityModel::default());
        let catalog = StaticCatalog::new();
        catalog.add_therapist(capability("therapist_1", 4.5));
        catalog.add_therapist(capability("therapist_2", 4.5));

        // therapist_1 already has a firm reservation earlier that day
        let morning = TimeSlot::new(
            Utc.with_ymd_and_hms(2025, 6, 1, 9, 0, 0).unwrap(),
            Utc.with_ymd_and_hms(2025, 6, 1, 10, 0, 0).unwrap(),
        )
        .unwrap();
        let token = capacity
            .hold(
                ResourceId::Therapist("therapist_1".to_string()),
                morning,
                uuid::Uuid::new_v4(),
            )
            .unwrap();
        capacity.confirm(&token).unwrap();

        let resolver = resolver(catalog, capacity);
        let chosen = resolver.resolve(&booking()).await.unwrap();
        assert_eq!(chosen.therapist_id, "therapist_2");
    }

    #[tokio::test]
    async fn test_full_tie_breaks_on_lowest_id() {
        let catalog = StaticCatalog::new();
        catalog.add_therapist(capability("therapist_9", 4.5));
        catalog.add_therapist(capability("therapist_3", 4.5));

        let resolver = resolver(catalog, Arc::new(CapacityModel::default()));
        let chosen = resolver.resolve(&booking()).await.unwrap();
        assert_eq!(chosen.therapist_id, "therapist_3");
    }

    #[tokio::test]
    async fn test_unqualified_and_offline_filtered_out() {
        let catalog = StaticCatalog::new();

        let mut unqualified = capability("therapist_1", 5.0);
        unqualified.qualified_services = HashSet::from(["service_2".to_string()]);
        catalog.add_therapist(unqualified);

        let mut offline = capability("therapist_2", 5.0);
        offline.availability_status = AvailabilityStatus::Offline;
        catalog.add_therapist(offline);

        catalog.add_therapist(capability("therapist_3", 3.0));

        let resolver = resolver(catalog, Arc::new(CapacityModel::default()));
        let chosen = resolver.resolve(&booking()).await.unwrap();
        assert_eq!(chosen.therapist_id, "therapist_3");
    }

    #[tokio::test]
    async fn test_booked_therapist_filtered_out() {
        let capacity = Arc::new(CapacityModel::default());
        let catalog = StaticCatalog::new();
        catalog.add_therapist(capability("therapist_1", 4.9));

        let token = capacity
            .hold(
                ResourceId::Therapist("therapist_1".to_string()),
                booking().slot,
                uuid::Uuid::new_v4(),
            )
            .unwrap();
        capacity.confirm(&token).unwrap();

        let resolver = resolver(catalog, capacity);
        let err = resolver.resolve(&booking()).await.unwrap_err();
        assert!(matches!(err, Error::NoTherapistAvailable(_)));
    }

    #[tokio::test]
    async fn test_no_candidates_is_not_fatal_error_kind() {
        let resolver = resolver(StaticCatalog::new(), Arc::new(CapacityModel::default()));
        let err = resolver.resolve(&booking()).await.unwrap_err();
        assert!(err.is_retryable());
    }
}
