//! The watched-object data model.
//!
//! These are deliberately narrow views of the corresponding Kubernetes
//! types: only the fields the graph builder consumes are modeled. Objects
//! arrive from the (out-of-scope) watcher already deserialized; the serde
//! derives double as the fixture format used by tests and the optional YAML
//! seed loader in the binary.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kinds of objects the control plane watches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Kind {
    Service,
    Endpoints,
    Secret,
    Ingress,
    HttpProxy,
}

impl fmt::Display for Kind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Kind::Service => "Service",
            Kind::Endpoints => "Endpoints",
            Kind::Secret => "Secret",
            Kind::Ingress => "Ingress",
            Kind::HttpProxy => "HTTPProxy",
        };
        f.write_str(s)
    }
}

/// Identity of a watched object: (kind, namespace, name).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectRef {
    pub kind: Kind,
    pub namespace: String,
    pub name: String,
}

impl ObjectRef {
    pub fn new(kind: Kind, namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self { kind, namespace: namespace.into(), name: name.into() }
    }
}

impl fmt::Display for ObjectRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.kind, self.namespace, self.name)
    }
}

/// Metadata shared by every watched object.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectMeta {
    pub namespace: String,
    pub name: String,
    pub creation_timestamp: DateTime<Utc>,
}

impl ObjectMeta {
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            creation_timestamp: Utc::now(),
        }
    }

    pub fn object_ref(&self, kind: Kind) -> ObjectRef {
        ObjectRef::new(kind, self.namespace.clone(), self.name.clone())
    }
}

/// A named Service port.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServicePort {
    #[serde(default)]
    pub name: Option<String>,
    pub port: u16,
}

/// A Kubernetes Service, reduced to its addressable ports.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Service {
    pub meta: ObjectMeta,
    pub ports: Vec<ServicePort>,
}

impl Service {
    /// Look up a port by number.
    pub fn port(&self, number: u16) -> Option<&ServicePort> {
        self.ports.iter().find(|p| p.port == number)
    }
}

/// One endpoints subset: ready addresses and the ports they serve.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EndpointSubset {
    pub addresses: Vec<String>,
    pub ports: Vec<ServicePort>,
}

/// Resolved endpoints for a Service, by (namespace, name) convention.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoints {
    pub meta: ObjectMeta,
    pub subsets: Vec<EndpointSubset>,
}

impl Endpoints {
    /// Resolve the IP:port tuples serving the given Service port.
    ///
    /// Subset ports are matched by name: a named service port matches a
    /// subset port of the same name, an unnamed one matches any unnamed
    /// subset port. The result is sorted for deterministic rendering.
    pub fn addresses_for(&self, service_port: &ServicePort) -> Vec<(String, u16)> {
        let mut out = Vec::new();
        for subset in &self.subsets {
            for port in &subset.ports {
                if port.name == service_port.name {
                    for addr in &subset.addresses {
                        out.push((addr.clone(), port.port));
                    }
                }
            }
        }
        out.sort();
        out.dedup();
        out
    }
}

/// Well-known secret data key for the certificate chain.
pub const TLS_CERT_KEY: &str = "tls.crt";
/// Well-known secret data key for the private key.
pub const TLS_PRIVATE_KEY_KEY: &str = "tls.key";

/// A TLS secret: opaque PEM blobs under the two well-known keys.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Secret {
    pub meta: ObjectMeta,
    pub data: BTreeMap<String, Vec<u8>>,
}

impl Secret {
    pub fn certificate(&self) -> Option<&[u8]> {
        self.data.get(TLS_CERT_KEY).map(|v| v.as_slice())
    }

    pub fn private_key(&self) -> Option<&[u8]> {
        self.data.get(TLS_PRIVATE_KEY_KEY).map(|v| v.as_slice())
    }
}

/// Path match specification shared by Ingress paths and HttpProxy routes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PathMatchSpec {
    Exact(String),
    Prefix(String),
    Regex(String),
}

/// A header match condition: present, or present with an exact value.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeaderMatchSpec {
    pub name: String,
    #[serde(default)]
    pub exact: Option<String>,
}

/// A query parameter match condition, same shape as header matches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueryParamMatchSpec {
    pub name: String,
    #[serde(default)]
    pub exact: Option<String>,
}

/// Ingress TLS block: hosts secured by one secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressTls {
    pub hosts: Vec<String>,
    pub secret_name: String,
}

/// One Ingress backend reference.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressBackend {
    pub service_name: String,
    pub service_port: u16,
}

/// One Ingress path rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressPath {
    pub path: PathMatchSpec,
    pub backend: IngressBackend,
}

/// One Ingress host rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngressRule {
    pub host: String,
    pub paths: Vec<IngressPath>,
}

/// A Kubernetes Ingress, reduced to host rules and TLS blocks.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Ingress {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub tls: Vec<IngressTls>,
    pub rules: Vec<IngressRule>,
}

/// TLS settings on an HttpProxy virtual host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyTls {
    /// Secret reference, `name` or `namespace/name`. Ignored for passthrough.
    #[serde(default)]
    pub secret_name: Option<String>,
    #[serde(default)]
    pub passthrough: bool,
}

/// The virtual host an HttpProxy claims.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProxyVirtualHost {
    pub fqdn: String,
    #[serde(default)]
    pub tls: Option<ProxyTls>,
}

/// Upstream protocol selection for a backend service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum UpstreamProtocol {
    #[default]
    Http1,
    Http2,
}

/// Circuit breaker thresholds applied to a backend cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CircuitBreakerSpec {
    #[serde(default)]
    pub max_connections: Option<u32>,
    #[serde(default)]
    pub max_pending_requests: Option<u32>,
    #[serde(default)]
    pub max_requests: Option<u32>,
    #[serde(default)]
    pub max_retries: Option<u32>,
}

/// Outlier detection (passive health) settings for a backend cluster.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OutlierDetectionSpec {
    #[serde(default)]
    pub consecutive_errors: Option<u32>,
    #[serde(default)]
    pub interval_seconds: Option<u64>,
    #[serde(default)]
    pub base_ejection_seconds: Option<u64>,
}

/// A weighted (or mirrored) backend service reference on a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRef {
    pub name: String,
    pub port: u16,
    #[serde(default)]
    pub weight: Option<u32>,
    /// Mirror backends receive a copy of the traffic and carry no weight.
    #[serde(default)]
    pub mirror: bool,
    #[serde(default)]
    pub protocol: UpstreamProtocol,
    #[serde(default)]
    pub circuit_breakers: Option<CircuitBreakerSpec>,
    #[serde(default)]
    pub outlier_detection: Option<OutlierDetectionSpec>,
}

/// Retry policy attached to a route.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetryPolicySpec {
    pub count: u32,
    #[serde(default)]
    pub per_try_timeout_seconds: Option<u64>,
}

/// One HttpProxy route: match conditions plus backends and policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RouteSpec {
    #[serde(default = "RouteSpec::default_match")]
    pub r#match: PathMatchSpec,
    #[serde(default)]
    pub headers: Vec<HeaderMatchSpec>,
    #[serde(default)]
    pub query_parameters: Vec<QueryParamMatchSpec>,
    pub services: Vec<ServiceRef>,
    #[serde(default)]
    pub timeout_seconds: Option<u64>,
    #[serde(default)]
    pub retry: Option<RetryPolicySpec>,
}

impl RouteSpec {
    fn default_match() -> PathMatchSpec {
        PathMatchSpec::Prefix("/".to_string())
    }
}

/// TCP proxy delegation: forward the TLS stream to one backend service.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TcpProxySpec {
    pub services: Vec<ServiceRef>,
}

/// The higher-level HTTP proxy custom resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HttpProxy {
    pub meta: ObjectMeta,
    #[serde(default)]
    pub virtual_host: Option<ProxyVirtualHost>,
    #[serde(default)]
    pub routes: Vec<RouteSpec>,
    #[serde(default)]
    pub tcp_proxy: Option<TcpProxySpec>,
}

/// Any watched object, as delivered by the watcher collaborator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind")]
pub enum Object {
    Service(Service),
    Endpoints(Endpoints),
    Secret(Secret),
    Ingress(Ingress),
    HttpProxy(HttpProxy),
}

impl Object {
    pub fn kind(&self) -> Kind {
        match self {
            Object::Service(_) => Kind::Service,
            Object::Endpoints(_) => Kind::Endpoints,
            Object::Secret(_) => Kind::Secret,
            Object::Ingress(_) => Kind::Ingress,
            Object::HttpProxy(_) => Kind::HttpProxy,
        }
    }

    pub fn meta(&self) -> &ObjectMeta {
        match self {
            Object::Service(o) => &o.meta,
            Object::Endpoints(o) => &o.meta,
            Object::Secret(o) => &o.meta,
            Object::Ingress(o) => &o.meta,
            Object::HttpProxy(o) => &o.meta,
        }
    }

    pub fn object_ref(&self) -> ObjectRef {
        self.meta().object_ref(self.kind())
    }
}
