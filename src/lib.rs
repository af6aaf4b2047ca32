//! Stratus: a Kubernetes ingress control plane for Envoy.
//!
//! Watched cluster objects flow through a single pipeline: the resource
//! store holds the latest copy of every object, the graph builder turns a
//! store snapshot into a validated routing graph, the renderers encode the
//! graph as Envoy resources, the snapshot cache versions them per resource
//! type, and the ADS server streams them to connected proxies using the
//! state-of-the-world protocol.
//!
//! The pipeline is one-directional and rebuilds are wholesale: no component
//! ever patches a previous output, which keeps every layer deterministic
//! and lets change suppression work on byte equality.

pub mod config;
pub mod errors;
pub mod graph;
pub mod k8s;
pub mod observability;
pub mod reconciler;
pub mod xds;

pub use errors::{Error, Result};

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Application name
pub const APP_NAME: &str = env!("CARGO_PKG_NAME");
