//! EDS: render per-cluster load assignments.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, SocketAddress,
};
use envoy_types::pb::envoy::config::endpoint::v3::{
    lb_endpoint, ClusterLoadAssignment, Endpoint, LbEndpoint, LocalityLbEndpoints,
};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::debug;

use crate::graph::RoutingGraph;

use super::{BuiltResource, ENDPOINT_TYPE_URL};

/// Build one load assignment per graph cluster, in name order.
///
/// A cluster without ready addresses still gets an assignment; the empty
/// endpoint list is what tells Envoy to fail requests rather than retry a
/// stale address set.
pub fn endpoints_from_graph(graph: &RoutingGraph) -> Vec<BuiltResource> {
    let mut built = Vec::with_capacity(graph.endpoints.len());

    for (cluster_name, addresses) in &graph.endpoints {
        let assignment = ClusterLoadAssignment {
            cluster_name: cluster_name.clone(),
            endpoints: if addresses.is_empty() {
                Vec::new()
            } else {
                vec![LocalityLbEndpoints {
                    lb_endpoints: addresses
                        .iter()
                        .map(|(address, port)| lb_endpoint(address, *port))
                        .collect(),
                    ..Default::default()
                }]
            },
            ..Default::default()
        };

        let encoded = assignment.encode_to_vec();
        built.push(BuiltResource {
            name: cluster_name.clone(),
            resource: Any { type_url: ENDPOINT_TYPE_URL.to_string(), value: encoded },
        });
    }

    if !built.is_empty() {
        debug!(assignment_count = built.len(), "Built endpoint resources from graph");
    }

    built
}

fn lb_endpoint(address: &str, port: u16) -> LbEndpoint {
    LbEndpoint {
        host_identifier: Some(lb_endpoint::HostIdentifier::Endpoint(Endpoint {
            address: Some(Address {
                address: Some(AddressType::SocketAddress(SocketAddress {
                    address: address.to_string(),
                    port_specifier: Some(socket_address::PortSpecifier::PortValue(port.into())),
                    ..Default::default()
                })),
            }),
            ..Default::default()
        })),
        ..Default::default()
    }
}
