//! RDS: render the `ingress_http` and `ingress_https` route configurations.

use envoy_types::pb::envoy::config::route::v3::{
    header_matcher::HeaderMatchSpecifier,
    query_parameter_matcher::QueryParameterMatchSpecifier,
    route::Action,
    route_action::ClusterSpecifier,
    route_match::PathSpecifier,
    weighted_cluster::ClusterWeight,
    HeaderMatcher, QueryParameterMatcher, RetryPolicy, Route as EnvoyRoute, RouteAction,
    RouteConfiguration, RouteMatch, VirtualHost as EnvoyVirtualHost, WeightedCluster,
};
use envoy_types::pb::envoy::config::route::v3::route_action::RequestMirrorPolicy;
use envoy_types::pb::envoy::r#type::matcher::v3::{string_matcher::MatchPattern, StringMatcher};
use envoy_types::pb::google::protobuf::{Any, UInt32Value};
use prost::Message;
use tracing::debug;

use crate::graph::{self, PathMatch, RoutingGraph};

use super::{optional_duration, seconds_to_duration, BuiltResource, ROUTE_TYPE_URL};

/// Name of the route configuration consumed by the plaintext listener.
pub const INGRESS_HTTP: &str = "ingress_http";
/// Name of the route configuration consumed by terminated-TLS filter chains.
pub const INGRESS_HTTPS: &str = "ingress_https";

/// Build both route configurations. Both are always present so subscribers
/// see explicit emptiness rather than resource absence.
pub fn routes_from_graph(graph: &RoutingGraph) -> Vec<BuiltResource> {
    let http = RouteConfiguration {
        name: INGRESS_HTTP.to_string(),
        virtual_hosts: graph.http_hosts.iter().map(envoy_virtual_host).collect(),
        ..Default::default()
    };
    let https = RouteConfiguration {
        name: INGRESS_HTTPS.to_string(),
        virtual_hosts: graph.https_hosts.iter().map(|h| envoy_virtual_host(&h.host)).collect(),
        ..Default::default()
    };

    debug!(
        http_vhosts = http.virtual_hosts.len(),
        https_vhosts = https.virtual_hosts.len(),
        "Built route configurations from graph"
    );

    [http, https]
        .into_iter()
        .map(|config| {
            let encoded = config.encode_to_vec();
            BuiltResource {
                name: config.name,
                resource: Any { type_url: ROUTE_TYPE_URL.to_string(), value: encoded },
            }
        })
        .collect()
}

fn envoy_virtual_host(host: &graph::VirtualHost) -> EnvoyVirtualHost {
    EnvoyVirtualHost {
        name: host.fqdn.clone(),
        domains: vec![host.fqdn.clone()],
        routes: host.routes.iter().map(envoy_route).collect(),
        ..Default::default()
    }
}

fn envoy_route(route: &graph::Route) -> EnvoyRoute {
    EnvoyRoute {
        r#match: Some(envoy_route_match(route)),
        action: Some(Action::Route(envoy_route_action(route))),
        ..Default::default()
    }
}

fn envoy_route_match(route: &graph::Route) -> RouteMatch {
    let path_specifier = match &route.path {
        PathMatch::Exact(path) => PathSpecifier::Path(path.clone()),
        PathMatch::Prefix(prefix) => PathSpecifier::Prefix(prefix.clone()),
        PathMatch::Regex(regex) => PathSpecifier::SafeRegex(
            envoy_types::pb::envoy::r#type::matcher::v3::RegexMatcher {
                regex: regex.clone(),
                ..Default::default()
            },
        ),
    };

    RouteMatch {
        path_specifier: Some(path_specifier),
        headers: route.headers.iter().map(envoy_header_matcher).collect(),
        query_parameters: route.query_params.iter().map(envoy_query_matcher).collect(),
        ..Default::default()
    }
}

fn envoy_header_matcher(header: &graph::HeaderMatch) -> HeaderMatcher {
    let specifier = match &header.exact {
        Some(value) => HeaderMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(value.clone())),
            ..Default::default()
        }),
        None => HeaderMatchSpecifier::PresentMatch(true),
    };
    HeaderMatcher {
        name: header.name.clone(),
        header_match_specifier: Some(specifier),
        ..Default::default()
    }
}

fn envoy_query_matcher(param: &graph::QueryParamMatch) -> QueryParameterMatcher {
    let specifier = match &param.exact {
        Some(value) => QueryParameterMatchSpecifier::StringMatch(StringMatcher {
            match_pattern: Some(MatchPattern::Exact(value.clone())),
            ..Default::default()
        }),
        None => QueryParameterMatchSpecifier::PresentMatch(true),
    };
    QueryParameterMatcher {
        name: param.name.clone(),
        query_parameter_match_specifier: Some(specifier),
    }
}

fn envoy_route_action(route: &graph::Route) -> RouteAction {
    let cluster_specifier = if route.clusters.len() == 1 {
        ClusterSpecifier::Cluster(route.clusters[0].name.clone())
    } else {
        ClusterSpecifier::WeightedClusters(WeightedCluster {
            clusters: route
                .clusters
                .iter()
                .map(|wc| ClusterWeight {
                    name: wc.name.clone(),
                    weight: Some(UInt32Value { value: wc.weight }),
                    ..Default::default()
                })
                .collect(),
            ..Default::default()
        })
    };

    RouteAction {
        cluster_specifier: Some(cluster_specifier),
        timeout: optional_duration(route.timeout_seconds),
        request_mirror_policies: route
            .mirror
            .iter()
            .map(|cluster| RequestMirrorPolicy { cluster: cluster.clone(), ..Default::default() })
            .collect(),
        retry_policy: route.retry.as_ref().map(|retry| RetryPolicy {
            retry_on: "5xx".to_string(),
            num_retries: Some(UInt32Value { value: retry.count }),
            per_try_timeout: retry.per_try_timeout_seconds.map(seconds_to_duration),
            ..Default::default()
        }),
        ..Default::default()
    }
}
