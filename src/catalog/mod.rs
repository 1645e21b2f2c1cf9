//! Catalog/profile collaborator boundary
//!
//! The booking core does not own service pricing or therapist profiles;
//! it reads them through [`CatalogStore`] with short-lived caching.
//! Booking and capacity state are never cached; they stay strongly
//! consistent inside this process.

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::types::{ServiceId, TherapistCapability, TherapistId, VendorId};
use crate::{Error, Result};

/// Price and duration for one service as listed by a vendor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceOffering {
    pub service_id: ServiceId,
    pub name: String,
    pub duration_minutes: u32,
    pub price: f64,
}

/// Read-only view of the profile/catalog store.
#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn service(&self, vendor_id: &str, service_id: &str) -> Result<ServiceOffering>;

    async fn therapists_for_vendor(&self, vendor_id: &str) -> Result<Vec<TherapistCapability>>;
}

/// Read-through cache in front of a [`CatalogStore`]. Entries expire
/// after a short TTL; a miss or expired entry falls through to the
/// backing store.
pub struct CachedCatalog {
    inner: Arc<dyn CatalogStore>,
    services: DashMap<(VendorId, ServiceId), (ServiceOffering, DateTime<Utc>)>,
    therapists: DashMap<VendorId, (Vec<TherapistCapability>, DateTime<Utc>)>,
    ttl: Duration,
}

impl CachedCatalog {
    pub fn new(inner: Arc<dyn CatalogStore>, ttl_secs: u64) -> Self {
        Self {
            inner,
            services: DashMap::new(),
            therapists: DashMap::new(),
            ttl: Duration::seconds(ttl_secs as i64),
        }
    }
}

#[async_trait]
impl CatalogStore for CachedCatalog {
    async fn service(&self, vendor_id: &str, service_id: &str) -> Result<ServiceOffering> {
        let key = (vendor_id.to_string(), service_id.to_string());
        let now = Utc::now();

        if let Some(entry) = self.services.get(&key) {
            let (offering, cached_at) = entry.value();
            if now - *cached_at < self.ttl {
                return Ok(offering.clone());
            }
        }

        let offering = self.inner.service(vendor_id, service_id).await?;
        self.services.insert(key, (offering.clone(), now));
        Ok(offering)
    }

    async fn therapists_for_vendor(&self, vendor_id: &str) -> Result<Vec<TherapistCapability>> {
        let now = Utc::now();

        if let Some(entry) = self.therapists.get(vendor_id) {
            let (capabilities, cached_at) = entry.value();
            if now - *cached_at < self.ttl {
                return Ok(capabilities.clone());
            }
        }

        let capabilities = self.inner.therapists_for_vendor(vendor_id).await?;
        self.therapists
            .insert(vendor_id.to_string(), (capabilities.clone(), now));
        Ok(capabilities)
    }
}

/// In-memory catalog used by tests and the demo binary. In production
/// this seam is a client for the profile/catalog service.
pub struct StaticCatalog {
    services: DashMap<(VendorId, ServiceId), ServiceOffering>,
    therapists: DashMap<TherapistId, TherapistCapability>,
}

impl StaticCatalog {
    pub fn new() -> Self {
        Self {
            services: DashMap::new(),
            therapists: DashMap::new(),
        }
    }

    pub fn add_service(&self, vendor_id: impl Into<VendorId>, offering: ServiceOffering) {
        self.services
            .insert((vendor_id.into(), offering.service_id.clone()), offering);
    }

    pub fn add_therapist(&self, capability: TherapistCapability) {
        self.therapists
            .insert(capability.therapist_id.clone(), capability);
    }
}

impl Default for StaticCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CatalogStore for StaticCatalog {
    async fn service(&self, vendor_id: &str, service_id: &str) -> Result<ServiceOffering> {
        self.services
            .get(&(vendor_id.to_string(), service_id.to_string()))
            .map(|entry| entry.value().clone())
            .ok_or_else(|| {
                Error::not_found(format!("service {} at vendor {}", service_id, vendor_id))
            })
    }

    async fn therapists_for_vendor(&self, vendor_id: &str) -> Result<Vec<TherapistCapability>> {
        Ok(self
            .therapists
            .iter()
            .filter(|entry| entry.value().vendor_id == vendor_id)
            .map(|entry| entry.value().clone())
            .collect())
    }
}
