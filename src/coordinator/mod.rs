//! Concurrency coordinator
//!
//! Serializes mutating operations per resource. Every hold, confirm,
//! release, assign, or cancel for a given resource runs under that
//! resource's async mutex, so interleavings reduce to a total order per
//! resource while disjoint resources proceed fully in parallel.
//!
//! Cross-resource operations acquire locks in the fixed global order
//! given by `ResourceId`'s `Ord` (vendor before therapist, ids
//! lexicographic) to prevent deadlock.

use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::types::ResourceId;

pub struct Coordinator {
    locks: DashMap<ResourceId, Arc<Mutex<()>>>,
}

/// Guards for a set of resources. Dropping releases every lock.
pub struct ResourceGuard {
    _guards: Vec<OwnedMutexGuard<()>>,
}

impl Coordinator {
    pub fn new() -> Self {
        Self {
            locks: DashMap::new(),
        }
    }

    fn handle(&self, resource: &ResourceId) -> Arc<Mutex<()>> {
        self.locks
            .entry(resource.clone())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    /// Acquire the locks for every given resource, in global order.
    /// Duplicates are collapsed.
    pub async fn lock(&self, resources: impl IntoIterator<Item = ResourceId>) -> ResourceGuard {
        let mut ordered: Vec<ResourceId> = resources.into_iter().collect();
        ordered.sort();
        ordered.dedup();

        let mut guards = Vec::with_capacity(ordered.len());
        for resource in ordered {
            let lock = self.handle(&resource);
            guards.push(lock.lock_owned().await);
        }
        ResourceGuard { _guards: guards }
    }

    /// Acquire a single resource's lock.
    pub async fn lock_one(&self, resource: ResourceId) -> ResourceGuard {
        self.lock([resource]).await
    }

    /// Drop lock entries nobody holds or waits on. A task keeps a clone
    /// of the handle from acquisition until its guard drops, so a strong
    /// count of one means the entry is idle and safe to remove.
    pub fn prune_idle(&self) {
        self.locks.retain(|_, lock| Arc::strong_count(lock) > 1);
    }
}

impl Default for Coordinator {
    fn default() -> Self {
        Self::new()
    }
}
