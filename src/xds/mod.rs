//! xDS resource rendering, the versioned snapshot cache, and the ADS server.
//!
//! Renderers turn a routing graph into encoded protobuf resources; the cache
//! versions them per resource type; the stream/server modules speak the
//! state-of-the-world discovery protocol to connected Envoys.

pub mod cache;
pub mod cluster;
pub mod endpoint;
pub mod listener;
pub mod route;
pub mod secret;
pub mod server;
pub mod stream;

use std::collections::BTreeMap;
use std::fmt;

use envoy_types::pb::envoy::config::core::v3::{
    config_source::ConfigSourceSpecifier, AggregatedConfigSource, ConfigSource,
};
use envoy_types::pb::google::protobuf::{Any, Duration, UInt32Value};

use crate::graph::RoutingGraph;

pub use cache::{SnapshotCache, SnapshotUpdate};
pub use server::AggregatedDiscoveryServer;

pub const CLUSTER_TYPE_URL: &str = "type.googleapis.com/envoy.config.cluster.v3.Cluster";
pub const ROUTE_TYPE_URL: &str = "type.googleapis.com/envoy.config.route.v3.RouteConfiguration";
pub const LISTENER_TYPE_URL: &str = "type.googleapis.com/envoy.config.listener.v3.Listener";
pub const ENDPOINT_TYPE_URL: &str =
    "type.googleapis.com/envoy.config.endpoint.v3.ClusterLoadAssignment";
pub const SECRET_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.Secret";

/// The five resource types served over the aggregated stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum ResourceType {
    Cluster,
    Endpoint,
    Listener,
    Route,
    Secret,
}

impl ResourceType {
    pub const ALL: [ResourceType; 5] = [
        ResourceType::Cluster,
        ResourceType::Endpoint,
        ResourceType::Listener,
        ResourceType::Route,
        ResourceType::Secret,
    ];

    pub fn type_url(&self) -> &'static str {
        match self {
            ResourceType::Cluster => CLUSTER_TYPE_URL,
            ResourceType::Endpoint => ENDPOINT_TYPE_URL,
            ResourceType::Listener => LISTENER_TYPE_URL,
            ResourceType::Route => ROUTE_TYPE_URL,
            ResourceType::Secret => SECRET_TYPE_URL,
        }
    }

    pub fn from_type_url(url: &str) -> Option<Self> {
        match url {
            CLUSTER_TYPE_URL => Some(ResourceType::Cluster),
            ENDPOINT_TYPE_URL => Some(ResourceType::Endpoint),
            LISTENER_TYPE_URL => Some(ResourceType::Listener),
            ROUTE_TYPE_URL => Some(ResourceType::Route),
            SECRET_TYPE_URL => Some(ResourceType::Secret),
            _ => None,
        }
    }
}

impl fmt::Display for ResourceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ResourceType::Cluster => "cluster",
            ResourceType::Endpoint => "endpoint",
            ResourceType::Listener => "listener",
            ResourceType::Route => "route",
            ResourceType::Secret => "secret",
        };
        f.write_str(name)
    }
}

/// Wrapper for a built Envoy resource along with its name.
#[derive(Clone, Debug, PartialEq)]
pub struct BuiltResource {
    pub name: String,
    pub resource: Any,
}

impl BuiltResource {
    pub fn into_any(self) -> Any {
        self.resource
    }

    pub fn type_url(&self) -> &str {
        &self.resource.type_url
    }
}

/// Render every resource type from one routing graph.
///
/// Output order inside each Vec follows the graph's sorted collections, so
/// identical graphs render byte-identically.
pub fn render(graph: &RoutingGraph) -> BTreeMap<ResourceType, Vec<BuiltResource>> {
    let mut out = BTreeMap::new();
    out.insert(ResourceType::Cluster, cluster::clusters_from_graph(graph));
    out.insert(ResourceType::Endpoint, endpoint::endpoints_from_graph(graph));
    out.insert(ResourceType::Listener, listener::listeners_from_graph(graph));
    out.insert(ResourceType::Route, route::routes_from_graph(graph));
    out.insert(ResourceType::Secret, secret::secrets_from_graph(graph));
    out
}

/// ConfigSource pointing subscriptions back at the aggregated stream.
pub(crate) fn ads_config_source() -> ConfigSource {
    ConfigSource {
        config_source_specifier: Some(ConfigSourceSpecifier::Ads(
            AggregatedConfigSource::default(),
        )),
        ..Default::default()
    }
}

pub(crate) fn seconds_to_duration(value: u64) -> Duration {
    Duration { seconds: value as i64, nanos: 0 }
}

pub(crate) fn optional_duration(value: Option<u64>) -> Option<Duration> {
    value.map(seconds_to_duration)
}

pub(crate) fn uint32(value: Option<u32>) -> Option<UInt32Value> {
    value.map(|v| UInt32Value { value: v })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_urls_round_trip() {
        for rt in ResourceType::ALL {
            assert_eq!(ResourceType::from_type_url(rt.type_url()), Some(rt));
        }
        assert_eq!(ResourceType::from_type_url("type.googleapis.com/unknown.Type"), None);
    }
}
