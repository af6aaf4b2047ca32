//! LDS: render the `ingress_http` and `ingress_https` listeners.
//!
//! Listeners are only emitted when they would carry at least one filter
//! chain; an empty graph produces no listeners at all, so an Envoy with
//! nothing to serve holds no open ports beyond the admin surface.

use envoy_types::pb::envoy::config::core::v3::{
    address::Address as AddressType, socket_address, Address, SocketAddress,
    TransportSocket,
};
use envoy_types::pb::envoy::config::core::v3::transport_socket::ConfigType as TransportSocketConfigType;
use envoy_types::pb::envoy::config::listener::v3::{
    filter::ConfigType as FilterConfigType, listener_filter::ConfigType as ListenerFilterConfigType,
    Filter, FilterChain, FilterChainMatch, Listener, ListenerFilter,
};
use envoy_types::pb::envoy::extensions::filters::http::router::v3::Router;
use envoy_types::pb::envoy::extensions::filters::listener::tls_inspector::v3::TlsInspector;
use envoy_types::pb::envoy::extensions::filters::network::http_connection_manager::v3::{
    http_connection_manager::RouteSpecifier, http_filter::ConfigType as HttpFilterConfigType,
    HttpConnectionManager, HttpFilter, Rds,
};
use envoy_types::pb::envoy::extensions::filters::network::tcp_proxy::v3::{
    tcp_proxy::ClusterSpecifier as TcpClusterSpecifier, TcpProxy,
};
use envoy_types::pb::envoy::extensions::transport_sockets::tls::v3::{
    CommonTlsContext, DownstreamTlsContext, SdsSecretConfig,
};
use envoy_types::pb::google::protobuf::Any;
use prost::Message;
use tracing::debug;

use crate::graph::RoutingGraph;

use super::{ads_config_source, route, BuiltResource, LISTENER_TYPE_URL};

pub const INGRESS_HTTP: &str = "ingress_http";
pub const INGRESS_HTTPS: &str = "ingress_https";

pub const HTTP_PORT: u32 = 8080;
pub const HTTPS_PORT: u32 = 8443;

const HCM_FILTER_NAME: &str = "envoy.filters.network.http_connection_manager";
const HCM_TYPE_URL: &str = "type.googleapis.com/envoy.extensions.filters.network.http_connection_manager.v3.HttpConnectionManager";
const TCP_PROXY_FILTER_NAME: &str = "envoy.filters.network.tcp_proxy";
const TCP_PROXY_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.network.tcp_proxy.v3.TcpProxy";
const TLS_INSPECTOR_FILTER_NAME: &str = "envoy.filters.listener.tls_inspector";
const TLS_INSPECTOR_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.listener.tls_inspector.v3.TlsInspector";
const ROUTER_FILTER_NAME: &str = "envoy.filters.http.router";
const ROUTER_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.filters.http.router.v3.Router";
const DOWNSTREAM_TLS_TYPE_URL: &str =
    "type.googleapis.com/envoy.extensions.transport_sockets.tls.v3.DownstreamTlsContext";

/// Build listener resources for every populated listener.
pub fn listeners_from_graph(graph: &RoutingGraph) -> Vec<BuiltResource> {
    let mut built = Vec::new();

    if !graph.http_hosts.is_empty() {
        built.push(encode(http_listener()));
    }

    if !graph.https_hosts.is_empty() || !graph.passthrough_hosts.is_empty() {
        built.push(encode(https_listener(graph)));
    }

    debug!(listener_count = built.len(), "Built listener resources from graph");
    built
}

fn encode(listener: Listener) -> BuiltResource {
    let encoded = listener.encode_to_vec();
    BuiltResource {
        name: listener.name,
        resource: Any { type_url: LISTENER_TYPE_URL.to_string(), value: encoded },
    }
}

fn http_listener() -> Listener {
    Listener {
        name: INGRESS_HTTP.to_string(),
        address: Some(listen_address(HTTP_PORT)),
        filter_chains: vec![FilterChain {
            filters: vec![http_connection_manager(route::INGRESS_HTTP, INGRESS_HTTP)],
            ..Default::default()
        }],
        ..Default::default()
    }
}

/// The HTTPS listener demultiplexes by SNI: one filter chain per secure
/// virtual host (terminating TLS via SDS) and one per passthrough host
/// (forwarding the raw stream).
fn https_listener(graph: &RoutingGraph) -> Listener {
    let mut filter_chains = Vec::new();

    for host in &graph.https_hosts {
        filter_chains.push(FilterChain {
            filter_chain_match: Some(FilterChainMatch {
                server_names: vec![host.host.fqdn.clone()],
                ..Default::default()
            }),
            transport_socket: Some(downstream_tls_socket(&host.secret_name)),
            filters: vec![http_connection_manager(route::INGRESS_HTTPS, INGRESS_HTTPS)],
            ..Default::default()
        });
    }

    for host in &graph.passthrough_hosts {
        filter_chains.push(FilterChain {
            filter_chain_match: Some(FilterChainMatch {
                server_names: vec![host.fqdn.clone()],
                ..Default::default()
            }),
            filters: vec![tcp_proxy_filter(&host.cluster)],
            ..Default::default()
        });
    }

    Listener {
        name: INGRESS_HTTPS.to_string(),
        address: Some(listen_address(HTTPS_PORT)),
        listener_filters: vec![tls_inspector_filter()],
        filter_chains,
        ..Default::default()
    }
}

fn listen_address(port: u32) -> Address {
    Address {
        address: Some(AddressType::SocketAddress(SocketAddress {
            address: "0.0.0.0".to_string(),
            port_specifier: Some(socket_address::PortSpecifier::PortValue(port)),
            ..Default::default()
        })),
    }
}

fn http_connection_manager(route_config_name: &str, stat_prefix: &str) -> Filter {
    let hcm = HttpConnectionManager {
        stat_prefix: stat_prefix.to_string(),
        route_specifier: Some(RouteSpecifier::Rds(Rds {
            config_source: Some(ads_config_source()),
            route_config_name: route_config_name.to_string(),
        })),
        http_filters: vec![default_router_filter()],
        ..Default::default()
    };

    Filter {
        name: HCM_FILTER_NAME.to_string(),
        config_type: Some(FilterConfigType::TypedConfig(Any {
            type_url: HCM_TYPE_URL.to_string(),
            value: hcm.encode_to_vec(),
        })),
    }
}

fn default_router_filter() -> HttpFilter {
    HttpFilter {
        name: ROUTER_FILTER_NAME.to_string(),
        config_type: Some(HttpFilterConfigType::TypedConfig(Any {
            type_url: ROUTER_TYPE_URL.to_string(),
            value: Router::default().encode_to_vec(),
        })),
        ..Default::default()
    }
}

fn tcp_proxy_filter(cluster: &str) -> Filter {
    let tcp_proxy = TcpProxy {
        stat_prefix: "ingress_tcp".to_string(),
        cluster_specifier: Some(TcpClusterSpecifier::Cluster(cluster.to_string())),
        ..Default::default()
    };

    Filter {
        name: TCP_PROXY_FILTER_NAME.to_string(),
        config_type: Some(FilterConfigType::TypedConfig(Any {
            type_url: TCP_PROXY_TYPE_URL.to_string(),
            value: tcp_proxy.encode_to_vec(),
        })),
    }
}

fn tls_inspector_filter() -> ListenerFilter {
    ListenerFilter {
        name: TLS_INSPECTOR_FILTER_NAME.to_string(),
        config_type: Some(ListenerFilterConfigType::TypedConfig(Any {
            type_url: TLS_INSPECTOR_TYPE_URL.to_string(),
            value: TlsInspector::default().encode_to_vec(),
        })),
        ..Default::default()
    }
}

fn downstream_tls_socket(secret_name: &str) -> TransportSocket {
    let downstream = DownstreamTlsContext {
        common_tls_context: Some(CommonTlsContext {
            tls_certificate_sds_secret_configs: vec![SdsSecretConfig {
                name: secret_name.to_string(),
                sds_config: Some(ads_config_source()),
            }],
            ..Default::default()
        }),
        ..Default::default()
    };

    TransportSocket {
        name: "envoy.transport_sockets.tls".to_string(),
        config_type: Some(TransportSocketConfigType::TypedConfig(Any {
            type_url: DOWNSTREAM_TLS_TYPE_URL.to_string(),
            value: downstream.encode_to_vec(),
        })),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::{PassthroughHost, PathMatch, Route, SecureVirtualHost, VirtualHost, WeightedCluster};

    fn plain_route() -> Route {
        Route {
            path: PathMatch::Prefix("/".into()),
            headers: Vec::new(),
            query_params: Vec::new(),
            clusters: vec![WeightedCluster {
                name: "default/kuard/8080/e3b0c44298".into(),
                weight: 1,
            }],
            mirror: None,
            timeout_seconds: None,
            retry: None,
        }
    }

    fn decode(built: &BuiltResource) -> Listener {
        Listener::decode(&built.resource.value[..]).expect("decode listener")
    }

    fn decode_hcm(filter: &Filter) -> HttpConnectionManager {
        let any = match filter.config_type.as_ref() {
            Some(FilterConfigType::TypedConfig(any)) => any,
            other => panic!("expected typed config, got {:?}", other),
        };
        HttpConnectionManager::decode(&any.value[..]).expect("decode hcm")
    }

    #[test]
    fn empty_graph_emits_no_listeners() {
        assert!(listeners_from_graph(&RoutingGraph::default()).is_empty());
    }

    #[test]
    fn http_hosts_produce_the_plaintext_listener_only() {
        let mut graph = RoutingGraph::default();
        graph
            .http_hosts
            .push(VirtualHost { fqdn: "example.com".into(), routes: vec![plain_route()] });

        let built = listeners_from_graph(&graph);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name, INGRESS_HTTP);

        let listener = decode(&built[0]);
        let hcm = decode_hcm(&listener.filter_chains[0].filters[0]);
        assert_eq!(hcm.stat_prefix, INGRESS_HTTP);
        match hcm.route_specifier.as_ref() {
            Some(RouteSpecifier::Rds(rds)) => {
                assert_eq!(rds.route_config_name, route::INGRESS_HTTP)
            }
            other => panic!("expected rds, got {:?}", other),
        }
        assert_eq!(hcm.http_filters.last().unwrap().name, ROUTER_FILTER_NAME);
    }

    #[test]
    fn https_listener_has_sni_chains_for_terminated_and_passthrough_hosts() {
        let mut graph = RoutingGraph::default();
        graph.https_hosts.push(SecureVirtualHost {
            host: VirtualHost { fqdn: "secure.example.com".into(), routes: vec![plain_route()] },
            secret_name: "default/cert".into(),
        });
        graph.passthrough_hosts.push(PassthroughHost {
            fqdn: "tcp.example.com".into(),
            cluster: "default/kuard/8080/e3b0c44298".into(),
        });

        let built = listeners_from_graph(&graph);
        assert_eq!(built.len(), 1);
        assert_eq!(built[0].name, INGRESS_HTTPS);

        let listener = decode(&built[0]);
        assert_eq!(listener.listener_filters[0].name, TLS_INSPECTOR_FILTER_NAME);
        assert_eq!(listener.filter_chains.len(), 2);

        let secure = &listener.filter_chains[0];
        assert_eq!(
            secure.filter_chain_match.as_ref().unwrap().server_names,
            vec!["secure.example.com"]
        );
        assert!(secure.transport_socket.is_some());
        let hcm = decode_hcm(&secure.filters[0]);
        match hcm.route_specifier.as_ref() {
            Some(RouteSpecifier::Rds(rds)) => {
                assert_eq!(rds.route_config_name, route::INGRESS_HTTPS)
            }
            other => panic!("expected rds, got {:?}", other),
        }

        let passthrough = &listener.filter_chains[1];
        assert_eq!(
            passthrough.filter_chain_match.as_ref().unwrap().server_names,
            vec!["tcp.example.com"]
        );
        assert!(passthrough.transport_socket.is_none(), "passthrough never terminates");
        assert_eq!(passthrough.filters[0].name, TCP_PROXY_FILTER_NAME);
    }

    #[test]
    fn sds_reference_carries_the_qualified_secret_name() {
        let socket = downstream_tls_socket("default/cert");
        let any = match socket.config_type.as_ref() {
            Some(TransportSocketConfigType::TypedConfig(any)) => any,
            other => panic!("expected typed config, got {:?}", other),
        };
        let downstream =
            DownstreamTlsContext::decode(&any.value[..]).expect("decode downstream tls");
        let sds = &downstream.common_tls_context.unwrap().tls_certificate_sds_secret_configs[0];
        assert_eq!(sds.name, "default/cert");
        assert!(sds.sds_config.is_some());
    }
}
