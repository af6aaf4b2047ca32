//! CDS: render graph clusters as EDS-backed Envoy clusters.

use std::collections::HashMap;

use envoy_types::pb::envoy::config::cluster::v3::circuit_breakers::Thresholds;
use envoy_types::pb::envoy::config::cluster::v3::cluster::{
    ClusterDiscoveryType, DiscoveryType, EdsClusterConfig,
};
use envoy_types::pb::envoy::config::cluster::v3::{CircuitBreakers, Cluster, OutlierDetection};
use envoy_types::pb::envoy::config::core::v3::{Http2ProtocolOptions, RoutingPriority};
use envoy_types::pb::envoy::extensions::upstreams::http::v3::http_protocol_options::explicit_http_config::ProtocolConfig;
use envoy_types::pb::envoy::extensions::upstreams::http::v3::{
    http_protocol_options::{ExplicitHttpConfig, UpstreamProtocolOptions},
    HttpProtocolOptions,
};
use envoy_types::pb::google::protobuf::{Any, Duration};
use prost::Message;
use tracing::debug;

use crate::graph::{self, RoutingGraph};
use crate::k8s::object::{CircuitBreakerSpec, OutlierDetectionSpec, UpstreamProtocol};

use super::{optional_duration, uint32, BuiltResource, CLUSTER_TYPE_URL};

const HTTP_PROTOCOL_OPTIONS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.upstreams.http.v3.HttpProtocolOptions";

/// Build cluster resources for every graph cluster, in name order.
pub fn clusters_from_graph(graph: &RoutingGraph) -> Vec<BuiltResource> {
    let mut built = Vec::with_capacity(graph.clusters.len());
    let mut total_bytes = 0;

    for cluster in graph.clusters.values() {
        let envoy_cluster = cluster_from_node(cluster);
        let encoded = envoy_cluster.encode_to_vec();
        total_bytes += encoded.len();
        built.push(BuiltResource {
            name: cluster.name.clone(),
            resource: Any { type_url: CLUSTER_TYPE_URL.to_string(), value: encoded },
        });
    }

    if !built.is_empty() {
        debug!(cluster_count = built.len(), total_bytes, "Built cluster resources from graph");
    }

    built
}

fn cluster_from_node(node: &graph::Cluster) -> Cluster {
    let mut cluster = Cluster {
        name: node.name.clone(),
        alt_stat_name: node.alt_stat_name(),
        connect_timeout: Some(Duration { seconds: 0, nanos: 250_000_000 }),
        cluster_discovery_type: Some(ClusterDiscoveryType::Type(DiscoveryType::Eds as i32)),
        eds_cluster_config: Some(EdsClusterConfig {
            eds_config: Some(super::ads_config_source()),
            // Endpoints are requested under the full cluster name so EDS
            // responses pair up without a separate mapping.
            service_name: node.name.clone(),
        }),
        ..Default::default()
    };

    if let Some(cb) = &node.policy.circuit_breakers {
        cluster.circuit_breakers = Some(build_circuit_breakers(cb));
    }

    if let Some(outlier) = &node.policy.outlier_detection {
        cluster.outlier_detection = Some(build_outlier_detection(outlier));
    }

    if node.policy.protocol == UpstreamProtocol::Http2 {
        cluster.typed_extension_protocol_options = http2_protocol_options();
    }

    cluster
}

fn build_circuit_breakers(spec: &CircuitBreakerSpec) -> CircuitBreakers {
    CircuitBreakers {
        thresholds: vec![Thresholds {
            priority: RoutingPriority::Default as i32,
            max_connections: uint32(spec.max_connections),
            max_pending_requests: uint32(spec.max_pending_requests),
            max_requests: uint32(spec.max_requests),
            max_retries: uint32(spec.max_retries),
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn build_outlier_detection(spec: &OutlierDetectionSpec) -> OutlierDetection {
    OutlierDetection {
        consecutive_5xx: uint32(spec.consecutive_errors),
        interval: optional_duration(spec.interval_seconds),
        base_ejection_time: optional_duration(spec.base_ejection_seconds),
        ..Default::default()
    }
}

/// HTTP/2 upstream options via the typed extension, replacing the deprecated
/// `http2_protocol_options` field.
fn http2_protocol_options() -> HashMap<String, Any> {
    let options = HttpProtocolOptions {
        upstream_protocol_options: Some(UpstreamProtocolOptions::ExplicitHttpConfig(
            ExplicitHttpConfig {
                protocol_config: Some(ProtocolConfig::Http2ProtocolOptions(
                    Http2ProtocolOptions::default(),
                )),
            },
        )),
        ..Default::default()
    };

    let mut map = HashMap::new();
    map.insert(
        "envoy.extensions.upstreams.http.v3.HttpProtocolOptions".to_string(),
        Any {
            type_url: HTTP_PROTOCOL_OPTIONS_TYPE_URL.to_string(),
            value: options.encode_to_vec(),
        },
    );
    map
}
