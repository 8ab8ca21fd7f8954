//! Published snapshot cache
//!
//! Holds the last successfully translated resource set per proxy. A new set
//! replaces the old one only once its pass has fully succeeded, and only when
//! its fingerprint differs; otherwise the cached generation stays
//! authoritative. Subscribers are notified of every replacement.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use crate::domain::ResourceRef;
use crate::xds::fingerprint::SnapshotFingerprint;
use crate::xds::translator::ProxyResourceSet;

const UPDATE_CHANNEL_CAPACITY: usize = 128;

/// A resource set that has been published for one proxy.
#[derive(Debug, Clone)]
pub struct PublishedSnapshot {
    pub proxy: ResourceRef,
    pub version: u64,
    pub fingerprint: SnapshotFingerprint,
    pub resources: Arc<ProxyResourceSet>,
}

/// Broadcast payload sent whenever a proxy's snapshot is replaced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotUpdate {
    pub proxy: ResourceRef,
    pub version: u64,
    pub fingerprint: SnapshotFingerprint,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PublishOutcome {
    /// The set replaced the cached one under a new version.
    Published { version: u64 },
    /// The fingerprint matched the cached set; nothing was replaced.
    Unchanged { version: u64 },
}

impl PublishOutcome {
    pub fn version(&self) -> u64 {
        match self {
            PublishOutcome::Published { version } | PublishOutcome::Unchanged { version } => *version,
        }
    }

    pub fn is_published(&self) -> bool {
        matches!(self, PublishOutcome::Published { .. })
    }
}

#[derive(Debug)]
pub struct SnapshotCache {
    version: AtomicU64,
    snapshots: RwLock<HashMap<ResourceRef, Arc<PublishedSnapshot>>>,
    update_tx: broadcast::Sender<Arc<SnapshotUpdate>>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (update_tx, _) = broadcast::channel(UPDATE_CHANNEL_CAPACITY);
        Self { version: AtomicU64::new(0), snapshots: RwLock::new(HashMap::new()), update_tx }
    }

    /// Highest version handed out so far, across all proxies.
    pub fn version(&self) -> u64 {
        self.version.load(Ordering::Relaxed)
    }

    /// Swap in `resources` for `proxy` unless the cached fingerprint matches.
    pub fn publish(
        &self,
        proxy: &ResourceRef,
        resources: ProxyResourceSet,
        fingerprint: SnapshotFingerprint,
    ) -> PublishOutcome {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);

        if let Some(existing) = snapshots.get(proxy) {
            if existing.fingerprint == fingerprint {
                debug!(
                    proxy = %proxy,
                    version = existing.version,
                    fingerprint = %fingerprint,
                    "Fingerprint unchanged; keeping published snapshot"
                );
                return PublishOutcome::Unchanged { version: existing.version };
            }
        }

        let version = self.version.fetch_add(1, Ordering::Relaxed) + 1;
        let snapshot = Arc::new(PublishedSnapshot {
            proxy: proxy.clone(),
            version,
            fingerprint,
            resources: Arc::new(resources),
        });
        snapshots.insert(proxy.clone(), snapshot);
        drop(snapshots);

        info!(proxy = %proxy, version, fingerprint = %fingerprint, "Published snapshot");
        let _ = self.update_tx.send(Arc::new(SnapshotUpdate { proxy: proxy.clone(), version, fingerprint }));

        PublishOutcome::Published { version }
    }

    pub fn get(&self, proxy: &ResourceRef) -> Option<Arc<PublishedSnapshot>> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        snapshots.get(proxy).cloned()
    }

    /// Proxies with a published snapshot, sorted.
    pub fn proxies(&self) -> Vec<ResourceRef> {
        let snapshots = self.snapshots.read().unwrap_or_else(PoisonError::into_inner);
        let mut proxies: Vec<ResourceRef> = snapshots.keys().cloned().collect();
        proxies.sort();
        proxies
    }

    /// Drop the snapshot of a proxy that no longer exists.
    pub fn remove(&self, proxy: &ResourceRef) -> Option<Arc<PublishedSnapshot>> {
        let mut snapshots = self.snapshots.write().unwrap_or_else(PoisonError::into_inner);
        snapshots.remove(proxy)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Arc<SnapshotUpdate>> {
        self.update_tx.subscribe()
    }
}
