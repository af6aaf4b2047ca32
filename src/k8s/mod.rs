//! Watched Kubernetes objects and the resource store.
//!
//! The watch mechanism itself lives outside this crate; collaborators feed
//! the store one object at a time through [`crate::reconciler::ObjectEvent`]s.
//! This module only defines what is stored and how snapshots are taken.

pub mod object;
pub mod store;

pub use object::{
    EndpointSubset, Endpoints, HttpProxy, Ingress, Kind, Object, ObjectMeta, ObjectRef, Secret,
    Service,
};
pub use store::{ResourceStore, StoreSnapshot};
