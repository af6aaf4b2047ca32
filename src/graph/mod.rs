//! The routing graph: the builder's output model.
//!
//! A graph is rebuilt wholesale on every cycle from a store snapshot and is
//! immutable afterwards. Nodes reference each other one-directionally
//! (listener -> virtual host -> route -> cluster -> endpoints), so the graph
//! is acyclic by construction. Cluster identity is a deterministic
//! fingerprint over the policy attributes that change wire behavior, which
//! is what makes cross-virtual-host deduplication and downstream change
//! suppression safe.

pub mod builder;

use std::collections::BTreeMap;
use std::fmt;

use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::k8s::object::{
    CircuitBreakerSpec, ObjectRef, OutlierDetectionSpec, ServicePort, UpstreamProtocol,
};

pub use builder::build;

/// Validity verdict for one source object after a rebuild.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Verdict {
    Valid,
    Invalid,
}

/// A per-object validity finding, addressed to the (out-of-scope) status
/// writer. The builder never mutates source objects.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Finding {
    pub object: ObjectRef,
    pub verdict: Verdict,
    pub reason: String,
}

impl Finding {
    pub fn valid(object: ObjectRef, reason: impl Into<String>) -> Self {
        Self { object, verdict: Verdict::Valid, reason: reason.into() }
    }

    pub fn invalid(object: ObjectRef, reason: impl Into<String>) -> Self {
        Self { object, verdict: Verdict::Invalid, reason: reason.into() }
    }
}

impl fmt::Display for Finding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let verdict = match self.verdict {
            Verdict::Valid => "valid",
            Verdict::Invalid => "invalid",
        };
        write!(f, "{}: {}: {}", self.object, verdict, self.reason)
    }
}

/// Path match on a route, validated during the build.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum PathMatch {
    Exact(String),
    Regex(String),
    Prefix(String),
}

impl PathMatch {
    /// Precedence class: exact beats regex beats prefix.
    fn rank(&self) -> u8 {
        match self {
            PathMatch::Exact(_) => 0,
            PathMatch::Regex(_) => 1,
            PathMatch::Prefix(_) => 2,
        }
    }

    fn len(&self) -> usize {
        match self {
            PathMatch::Exact(s) | PathMatch::Regex(s) | PathMatch::Prefix(s) => s.len(),
        }
    }

    /// Ordering for routes within a virtual host: exact first, then longer
    /// regexes, then longer prefixes.
    pub fn precedence(&self, other: &Self) -> std::cmp::Ordering {
        self.rank().cmp(&other.rank()).then(other.len().cmp(&self.len()))
    }
}

/// A header match condition attached to a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct HeaderMatch {
    pub name: String,
    /// `None` means presence-only matching.
    pub exact: Option<String>,
}

/// A query parameter match condition attached to a route.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct QueryParamMatch {
    pub name: String,
    /// `None` means presence-only matching.
    pub exact: Option<String>,
}

/// Retry policy carried on a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub count: u32,
    pub per_try_timeout_seconds: Option<u64>,
}

/// One weighted backend reference on a route.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WeightedCluster {
    pub name: String,
    pub weight: u32,
}

/// A resolved route: match specification plus backends and policy.
///
/// The mirror cluster, when present, is referenced separately from the
/// weighted set and never participates in weight accounting.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Route {
    pub path: PathMatch,
    pub headers: Vec<HeaderMatch>,
    pub query_params: Vec<QueryParamMatch>,
    pub clusters: Vec<WeightedCluster>,
    pub mirror: Option<String>,
    pub timeout_seconds: Option<u64>,
    pub retry: Option<RetryPolicy>,
}

/// A virtual host and its precedence-ordered routes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VirtualHost {
    pub fqdn: String,
    pub routes: Vec<Route>,
}

/// A virtual host served with terminated TLS.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SecureVirtualHost {
    pub host: VirtualHost,
    /// `namespace/name` of the SDS secret carrying the certificate pair.
    pub secret_name: String,
}

/// A virtual host whose TLS stream is proxied unterminated by SNI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PassthroughHost {
    pub fqdn: String,
    pub cluster: String,
}

/// Policy attributes that participate in cluster identity.
///
/// Weights, mirroring, and per-route timeout/retry policy live on the route
/// and deliberately stay out of the fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize)]
pub struct ClusterPolicy {
    pub protocol: UpstreamProtocol,
    pub circuit_breakers: Option<CircuitBreakerSpec>,
    pub outlier_detection: Option<OutlierDetectionSpec>,
}

impl ClusterPolicy {
    /// Deterministic short fingerprint over the identity-relevant policy.
    ///
    /// A fully default policy hashes the empty byte string so the common
    /// unset-policy suffix is stable and recognizable across rebuilds and
    /// process restarts.
    pub fn fingerprint(&self) -> String {
        let bytes = if *self == ClusterPolicy::default() {
            Vec::new()
        } else {
            serde_json::to_vec(self).expect("cluster policy serialization cannot fail")
        };
        let digest = Sha256::digest(&bytes);
        hex::encode(digest)[..10].to_string()
    }
}

/// The addressable backend unit. Name is `namespace/service/port/<fingerprint>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cluster {
    pub name: String,
    pub namespace: String,
    pub service: String,
    pub port: ServicePort,
    pub policy: ClusterPolicy,
}

impl Cluster {
    pub fn new(
        namespace: impl Into<String>,
        service: impl Into<String>,
        port: ServicePort,
        policy: ClusterPolicy,
    ) -> Self {
        let namespace = namespace.into();
        let service = service.into();
        let name =
            format!("{}/{}/{}/{}", namespace, service, port.port, policy.fingerprint());
        Self { name, namespace, service, port, policy }
    }

    /// Stat name in the `ns_svc_port` convention.
    pub fn alt_stat_name(&self) -> String {
        format!("{}_{}_{}", self.namespace, self.service, self.port.port)
    }
}

/// A rendered TLS certificate/key pair, keyed `namespace/name`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TlsSecret {
    pub name: String,
    pub certificate: Vec<u8>,
    pub private_key: Vec<u8>,
}

/// The complete routing graph for one rebuild cycle.
///
/// All collections are sorted, so rendering identical graph content always
/// produces byte-identical wire resources.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoutingGraph {
    /// Virtual hosts served plaintext on the HTTP listener.
    pub http_hosts: Vec<VirtualHost>,
    /// Virtual hosts served with terminated TLS on the HTTPS listener.
    pub https_hosts: Vec<SecureVirtualHost>,
    /// SNI passthrough hosts on the HTTPS listener.
    pub passthrough_hosts: Vec<PassthroughHost>,
    /// All referenced clusters, keyed by fingerprinted name.
    pub clusters: BTreeMap<String, Cluster>,
    /// Resolved endpoint sets per cluster name; empty means traffic-dark.
    pub endpoints: BTreeMap<String, Vec<(String, u16)>>,
    /// TLS secrets referenced by secure virtual hosts.
    pub secrets: BTreeMap<String, TlsSecret>,
}

impl RoutingGraph {
    /// True when nothing routable was produced.
    pub fn is_empty(&self) -> bool {
        self.http_hosts.is_empty()
            && self.https_hosts.is_empty()
            && self.passthrough_hosts.is_empty()
    }
}
