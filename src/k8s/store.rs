//! The resource store: latest known copy of every watched object.
//!
//! Pure lookup/replace keyed by (kind, namespace, name). Writers to
//! different keys do not contend beyond the map lock; readers take
//! point-in-time snapshots that stay coherent while further upserts land.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use super::object::{Endpoints, HttpProxy, Ingress, Kind, Object, ObjectRef, Secret, Service};

/// Mutable store of watched objects. Most recent write wins per key.
#[derive(Debug, Default)]
pub struct ResourceStore {
    inner: RwLock<HashMap<ObjectRef, Arc<Object>>>,
}

impl ResourceStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace an object. Returns false when the stored copy was
    /// already identical, which lets callers skip a rebuild trigger.
    pub fn upsert(&self, object: Object) -> bool {
        let key = object.object_ref();
        let mut map = self.inner.write().expect("resource store lock poisoned");
        match map.get(&key) {
            Some(existing) if existing.as_ref() == &object => false,
            _ => {
                map.insert(key, Arc::new(object));
                true
            }
        }
    }

    /// Remove an object. Returns false when it was not present.
    pub fn delete(&self, key: &ObjectRef) -> bool {
        let mut map = self.inner.write().expect("resource store lock poisoned");
        map.remove(key).is_some()
    }

    /// Take an immutable point-in-time view. Values are shared `Arc`s, so
    /// the clone is cheap and later upserts never show through.
    pub fn snapshot(&self) -> StoreSnapshot {
        let map = self.inner.read().expect("resource store lock poisoned");
        StoreSnapshot { objects: map.clone() }
    }

    pub fn len(&self) -> usize {
        self.inner.read().expect("resource store lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Immutable view of the store contents at one instant.
#[derive(Debug, Clone)]
pub struct StoreSnapshot {
    objects: HashMap<ObjectRef, Arc<Object>>,
}

impl StoreSnapshot {
    pub fn get(&self, key: &ObjectRef) -> Option<&Object> {
        self.objects.get(key).map(|o| o.as_ref())
    }

    pub fn service(&self, namespace: &str, name: &str) -> Option<&Service> {
        match self.get(&ObjectRef::new(Kind::Service, namespace, name)) {
            Some(Object::Service(s)) => Some(s),
            _ => None,
        }
    }

    pub fn endpoints(&self, namespace: &str, name: &str) -> Option<&Endpoints> {
        match self.get(&ObjectRef::new(Kind::Endpoints, namespace, name)) {
            Some(Object::Endpoints(e)) => Some(e),
            _ => None,
        }
    }

    pub fn secret(&self, namespace: &str, name: &str) -> Option<&Secret> {
        match self.get(&ObjectRef::new(Kind::Secret, namespace, name)) {
            Some(Object::Secret(s)) => Some(s),
            _ => None,
        }
    }

    /// All HttpProxy objects, sorted by (namespace, name) for determinism.
    pub fn proxies(&self) -> Vec<&HttpProxy> {
        let mut out: Vec<&HttpProxy> = self
            .objects
            .values()
            .filter_map(|o| match o.as_ref() {
                Object::HttpProxy(p) => Some(p),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.meta.namespace, &a.meta.name).cmp(&(&b.meta.namespace, &b.meta.name))
        });
        out
    }

    /// All Ingress objects, sorted by (namespace, name) for determinism.
    pub fn ingresses(&self) -> Vec<&Ingress> {
        let mut out: Vec<&Ingress> = self
            .objects
            .values()
            .filter_map(|o| match o.as_ref() {
                Object::Ingress(i) => Some(i),
                _ => None,
            })
            .collect();
        out.sort_by(|a, b| {
            (&a.meta.namespace, &a.meta.name).cmp(&(&b.meta.namespace, &b.meta.name))
        });
        out
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::k8s::object::{ObjectMeta, ServicePort};

    fn service(namespace: &str, name: &str, port: u16) -> Object {
        Object::Service(Service {
            meta: ObjectMeta::new(namespace, name),
            ports: vec![ServicePort { name: None, port }],
        })
    }

    #[test]
    fn upsert_reports_changes_and_replaces_by_key() {
        let store = ResourceStore::new();
        let svc = service("default", "kuard", 8080);

        assert!(store.upsert(svc.clone()));
        assert!(!store.upsert(svc), "identical replacement is a no-op");
        assert!(store.upsert(service("default", "kuard", 9090)), "changed content is an update");
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn delete_is_idempotent() {
        let store = ResourceStore::new();
        store.upsert(service("default", "kuard", 8080));

        let key = ObjectRef::new(Kind::Service, "default", "kuard");
        assert!(store.delete(&key));
        assert!(!store.delete(&key));
        assert!(store.is_empty());
    }

    #[test]
    fn snapshot_is_unaffected_by_later_writes() {
        let store = ResourceStore::new();
        store.upsert(service("default", "kuard", 8080));

        let snapshot = store.snapshot();
        store.upsert(service("default", "mirror", 8080));
        store.delete(&ObjectRef::new(Kind::Service, "default", "kuard"));

        assert_eq!(snapshot.len(), 1);
        assert!(snapshot.service("default", "kuard").is_some());
        assert!(snapshot.service("default", "mirror").is_none());
    }

    #[test]
    fn typed_accessors_filter_by_kind() {
        let store = ResourceStore::new();
        store.upsert(service("default", "kuard", 8080));
        let snapshot = store.snapshot();

        assert!(snapshot.endpoints("default", "kuard").is_none());
        assert!(snapshot.proxies().is_empty());
        assert!(snapshot.ingresses().is_empty());
    }
}
