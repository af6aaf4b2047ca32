//! The versioned snapshot cache between the reconciler and the streams.
//!
//! Each resource type carries an independent monotonic version counter.
//! Installing a snapshot whose encoded bytes match the current one is
//! suppressed entirely: no version bump, no notification, so downstream
//! Envoys never see a no-op update.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tokio::sync::broadcast;
use tracing::{debug, info};

use super::{BuiltResource, ResourceType};

/// Notification that a resource type moved to a new version.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnapshotUpdate {
    pub resource_type: ResourceType,
    pub version: u64,
}

#[derive(Debug, Clone)]
struct TypedSnapshot {
    version: u64,
    resources: Arc<Vec<BuiltResource>>,
}

/// Holds the latest rendered snapshot per resource type.
#[derive(Debug)]
pub struct SnapshotCache {
    snapshots: RwLock<HashMap<ResourceType, TypedSnapshot>>,
    updates: broadcast::Sender<SnapshotUpdate>,
}

impl Default for SnapshotCache {
    fn default() -> Self {
        Self::new()
    }
}

impl SnapshotCache {
    pub fn new() -> Self {
        let (updates, _) = broadcast::channel(64);
        Self { snapshots: RwLock::new(HashMap::new()), updates }
    }

    /// Install a freshly rendered resource set.
    ///
    /// Returns the new version, or `None` when the set was byte-identical to
    /// the current snapshot and the install was suppressed. Version 0 is
    /// reserved for "nothing installed yet"; the first install lands at 1.
    pub fn install(
        &self,
        resource_type: ResourceType,
        resources: Vec<BuiltResource>,
    ) -> Option<u64> {
        let mut snapshots = self.snapshots.write().expect("snapshot cache lock poisoned");

        if let Some(current) = snapshots.get(&resource_type) {
            if *current.resources == resources {
                debug!(
                    %resource_type,
                    version = current.version,
                    "Snapshot unchanged, suppressing install"
                );
                return None;
            }
        }

        let version = snapshots.get(&resource_type).map(|s| s.version).unwrap_or(0) + 1;
        snapshots.insert(
            resource_type,
            TypedSnapshot { version, resources: Arc::new(resources) },
        );
        drop(snapshots);

        info!(%resource_type, version, "Installed snapshot");
        // Send fails only when no stream is connected, which is fine.
        let _ = self.updates.send(SnapshotUpdate { resource_type, version });
        Some(version)
    }

    /// Current version and resources for a type. Version 0 with an empty set
    /// means nothing has been installed yet.
    pub fn get(&self, resource_type: ResourceType) -> (u64, Arc<Vec<BuiltResource>>) {
        let snapshots = self.snapshots.read().expect("snapshot cache lock poisoned");
        match snapshots.get(&resource_type) {
            Some(snapshot) => (snapshot.version, Arc::clone(&snapshot.resources)),
            None => (0, Arc::new(Vec::new())),
        }
    }

    pub fn version(&self, resource_type: ResourceType) -> u64 {
        self.get(resource_type).0
    }

    /// Subscribe to install notifications. Streams pair this with `get` so a
    /// missed notification only ever delays, never loses, an update.
    pub fn subscribe(&self) -> broadcast::Receiver<SnapshotUpdate> {
        self.updates.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::google::protobuf::Any;

    fn resource(name: &str, payload: &[u8]) -> BuiltResource {
        BuiltResource {
            name: name.to_string(),
            resource: Any {
                type_url: ResourceType::Cluster.type_url().to_string(),
                value: payload.to_vec(),
            },
        }
    }

    #[test]
    fn versions_start_at_one_and_increase_monotonically() {
        let cache = SnapshotCache::new();
        assert_eq!(cache.version(ResourceType::Cluster), 0);

        assert_eq!(cache.install(ResourceType::Cluster, vec![resource("a", b"1")]), Some(1));
        assert_eq!(cache.install(ResourceType::Cluster, vec![resource("a", b"2")]), Some(2));

        let (version, resources) = cache.get(ResourceType::Cluster);
        assert_eq!(version, 2);
        assert_eq!(resources[0].resource.value, b"2");
    }

    #[test]
    fn identical_install_is_suppressed() {
        let cache = SnapshotCache::new();
        let mut receiver = cache.subscribe();

        assert_eq!(cache.install(ResourceType::Cluster, vec![resource("a", b"1")]), Some(1));
        assert_eq!(cache.install(ResourceType::Cluster, vec![resource("a", b"1")]), None);
        assert_eq!(cache.version(ResourceType::Cluster), 1);

        assert_eq!(
            receiver.try_recv().unwrap(),
            SnapshotUpdate { resource_type: ResourceType::Cluster, version: 1 }
        );
        assert!(receiver.try_recv().is_err(), "suppressed install must not notify");
    }

    #[test]
    fn resource_types_are_versioned_independently() {
        let cache = SnapshotCache::new();

        cache.install(ResourceType::Cluster, vec![resource("a", b"1")]);
        cache.install(ResourceType::Cluster, vec![resource("a", b"2")]);
        cache.install(ResourceType::Route, vec![resource("r", b"1")]);

        assert_eq!(cache.version(ResourceType::Cluster), 2);
        assert_eq!(cache.version(ResourceType::Route), 1);
        assert_eq!(cache.version(ResourceType::Listener), 0);
    }

    #[test]
    fn empty_set_replacing_content_is_a_real_update() {
        let cache = SnapshotCache::new();

        cache.install(ResourceType::Listener, vec![resource("ingress_http", b"1")]);
        assert_eq!(cache.install(ResourceType::Listener, Vec::new()), Some(2));

        let (version, resources) = cache.get(ResourceType::Listener);
        assert_eq!(version, 2);
        assert!(resources.is_empty());
    }
}
