//! State-of-the-world ADS stream handling.
//!
//! Each connected Envoy gets one [`Session`] holding per-resource-type
//! subscription bookkeeping: the last sent version and nonce, the name
//! filter, and whether the client acknowledged or rejected what it was
//! sent. The protocol rules live in the synchronous `Session` methods;
//! [`run_stream_loop`] only wires them to the gRPC stream and the cache's
//! update broadcast.
//!
//! Protocol summary:
//! - An empty `response_nonce` opens (or reopens) a subscription and always
//!   gets the current snapshot.
//! - A request echoing the last sent nonce without an error is an ACK and
//!   gets no response.
//! - A request echoing the last sent nonce with an error is a NACK; the
//!   client keeps running on its previous good config and hears from us
//!   again when a newer version is installed.
//! - A request carrying any other nonce raced a push we already superseded;
//!   it is answered with the current snapshot.

use std::collections::{BTreeSet, HashMap};
use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{DiscoveryRequest, DiscoveryResponse};
use tokio::sync::mpsc;
use tokio_stream::{wrappers::ReceiverStream, StreamExt};
use tonic::Status;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{BuiltResource, ResourceType, SnapshotCache, SnapshotUpdate};

/// How a discovery request relates to the subscription it addresses.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum RequestAction {
    /// New subscription, or an explicit re-subscription with empty nonce.
    Initial,
    /// Client accepted the last response.
    Ack,
    /// Client rejected the last response.
    Nack,
    /// Nonce does not match the last response; the request raced a push.
    Stale,
    /// Type URL we do not serve.
    UnknownType,
}

/// Classify a request against the subscription state, without side effects.
pub(crate) fn classify_request(
    subscription: Option<&Subscription>,
    request: &DiscoveryRequest,
) -> RequestAction {
    if ResourceType::from_type_url(&request.type_url).is_none() {
        return RequestAction::UnknownType;
    }
    let Some(subscription) = subscription else {
        return RequestAction::Initial;
    };
    if request.response_nonce.is_empty() {
        return RequestAction::Initial;
    }
    if Some(request.response_nonce.as_str()) != subscription.last_sent_nonce.as_deref() {
        return RequestAction::Stale;
    }
    if request.error_detail.is_some() {
        RequestAction::Nack
    } else {
        RequestAction::Ack
    }
}

/// Per-resource-type subscription bookkeeping for one stream.
#[derive(Debug, Clone, Default)]
pub(crate) struct Subscription {
    /// Requested resource names; empty means wildcard.
    names: BTreeSet<String>,
    /// Version of the last response sent; 0 while waiting for the first
    /// snapshot install.
    last_sent_version: u64,
    last_sent_nonce: Option<String>,
    /// Version string the client last acknowledged.
    acked_version: Option<String>,
}

/// Protocol state for one connected client.
#[derive(Debug)]
pub(crate) struct Session {
    cache: Arc<SnapshotCache>,
    subscriptions: HashMap<ResourceType, Subscription>,
    node_id: Option<String>,
}

impl Session {
    pub(crate) fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache, subscriptions: HashMap::new(), node_id: None }
    }

    /// Handle one incoming request, returning the response to send, if any.
    pub(crate) fn handle_request(
        &mut self,
        request: &DiscoveryRequest,
    ) -> Option<DiscoveryResponse> {
        if self.node_id.is_none() {
            if let Some(node) = &request.node {
                self.node_id = Some(node.id.clone());
            }
        }

        let action = classify_request(
            ResourceType::from_type_url(&request.type_url)
                .and_then(|rt| self.subscriptions.get(&rt)),
            request,
        );

        let resource_type = match action {
            RequestAction::UnknownType => {
                warn!(
                    type_url = %request.type_url,
                    node_id = ?self.node_id,
                    "Ignoring discovery request for unknown type URL"
                );
                return None;
            }
            _ => ResourceType::from_type_url(&request.type_url).expect("classified as known"),
        };

        let names: BTreeSet<String> = request.resource_names.iter().cloned().collect();

        match action {
            RequestAction::Initial | RequestAction::Stale => {
                if action == RequestAction::Stale {
                    debug!(
                        %resource_type,
                        nonce = %request.response_nonce,
                        node_id = ?self.node_id,
                        "Nonce does not match last response, resubscribing"
                    );
                }
                let subscription = self.subscriptions.entry(resource_type).or_default();
                subscription.names = names;
                self.respond(resource_type)
            }
            RequestAction::Ack => {
                let subscription =
                    self.subscriptions.get_mut(&resource_type).expect("ack implies subscription");
                subscription.acked_version = Some(request.version_info.clone());
                debug!(
                    %resource_type,
                    version = %request.version_info,
                    node_id = ?self.node_id,
                    "[ACK] Response acknowledged"
                );
                // An ACK that changes the name filter needs fresh content
                // even though the version did not move.
                if subscription.names != names {
                    subscription.names = names;
                    self.respond(resource_type)
                } else {
                    None
                }
            }
            RequestAction::Nack => {
                let error = request.error_detail.as_ref();
                warn!(
                    %resource_type,
                    version = %request.version_info,
                    error_code = error.map(|e| e.code).unwrap_or_default(),
                    error_message = %error.map(|e| e.message.as_str()).unwrap_or_default(),
                    node_id = ?self.node_id,
                    "[NACK] Envoy rejected response, holding until next version"
                );
                let subscription =
                    self.subscriptions.get_mut(&resource_type).expect("nack implies subscription");
                subscription.names = names;
                None
            }
            RequestAction::UnknownType => unreachable!("handled above"),
        }
    }

    /// React to a snapshot install notification.
    pub(crate) fn handle_update(&mut self, update: SnapshotUpdate) -> Option<DiscoveryResponse> {
        let subscription = self.subscriptions.get(&update.resource_type)?;
        // Equal or older versions were already delivered (or superseded by a
        // response built after the install); never send them again.
        if update.version <= subscription.last_sent_version {
            return None;
        }
        self.respond(update.resource_type)
    }

    /// Re-check every subscription against the cache. Used after the update
    /// channel lags: versions are re-read, so nothing is lost.
    pub(crate) fn refresh_all(&mut self) -> Vec<DiscoveryResponse> {
        let behind: Vec<ResourceType> = self
            .subscriptions
            .iter()
            .filter(|(rt, sub)| self.cache.version(**rt) > sub.last_sent_version)
            .map(|(rt, _)| *rt)
            .collect();
        behind.into_iter().filter_map(|rt| self.respond(rt)).collect()
    }

    /// Build a response from the current snapshot and record it as sent.
    ///
    /// Returns `None` while the cache holds nothing for the type; the
    /// subscription stays parked until the first install arrives.
    fn respond(&mut self, resource_type: ResourceType) -> Option<DiscoveryResponse> {
        let (version, resources) = self.cache.get(resource_type);
        if version == 0 {
            debug!(
                %resource_type,
                node_id = ?self.node_id,
                "No snapshot installed yet, holding subscription"
            );
            return None;
        }

        let subscription = self.subscriptions.get_mut(&resource_type)?;
        let nonce = Uuid::new_v4().to_string();
        let response = DiscoveryResponse {
            version_info: version.to_string(),
            type_url: resource_type.type_url().to_string(),
            nonce: nonce.clone(),
            resources: filter_resources(&resources, &subscription.names),
            ..Default::default()
        };

        subscription.last_sent_version = version;
        subscription.last_sent_nonce = Some(nonce);

        info!(
            %resource_type,
            version,
            nonce = %response.nonce,
            resource_count = response.resources.len(),
            node_id = ?self.node_id,
            "Sending discovery response"
        );
        Some(response)
    }
}

/// Apply the subscription's name filter. Names with no matching resource are
/// simply absent from the response, which is how state-of-the-world signals
/// deletion.
fn filter_resources(
    resources: &[BuiltResource],
    names: &BTreeSet<String>,
) -> Vec<envoy_types::pb::google::protobuf::Any> {
    resources
        .iter()
        .filter(|r| names.is_empty() || names.contains(&r.name))
        .map(|r| r.resource.clone())
        .collect()
}

/// Drive a session over one gRPC stream until the client disconnects.
///
/// Request handling and push updates are serialized through the session, so
/// per-type version and nonce bookkeeping never races.
pub fn run_stream_loop(
    cache: Arc<SnapshotCache>,
    mut in_stream: tonic::Streaming<DiscoveryRequest>,
) -> ReceiverStream<std::result::Result<DiscoveryResponse, Status>> {
    let (tx, rx) = mpsc::channel(100);
    let mut update_rx = cache.subscribe();
    let mut session = Session::new(cache);

    tokio::spawn(async move {
        loop {
            tokio::select! {
                result = in_stream.next() => {
                    match result {
                        Some(Ok(request)) => {
                            debug!(
                                type_url = %request.type_url,
                                version_info = %request.version_info,
                                nonce = %request.response_nonce,
                                "Received discovery request"
                            );
                            if let Some(response) = session.handle_request(&request) {
                                if tx.send(Ok(response)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Some(Err(e)) => {
                            warn!(error = %e, "Error receiving discovery request");
                            let _ = tx.send(Err(e)).await;
                            break;
                        }
                        None => {
                            info!(node_id = ?session.node_id, "ADS stream ended by client");
                            break;
                        }
                    }
                }
                update = update_rx.recv() => {
                    match update {
                        Ok(update) => {
                            if let Some(response) = session.handle_update(update) {
                                if tx.send(Ok(response)).await.is_err() {
                                    break;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(skipped, "Missed update notifications, refreshing from cache");
                            for response in session.refresh_all() {
                                if tx.send(Ok(response)).await.is_err() {
                                    return;
                                }
                            }
                        }
                        Err(tokio::sync::broadcast::error::RecvError::Closed) => {
                            warn!("Update notification channel closed");
                            break;
                        }
                    }
                }
            }
        }
    });

    ReceiverStream::new(rx)
}

#[cfg(test)]
mod tests {
    use super::*;
    use envoy_types::pb::google::protobuf::Any;
    use envoy_types::pb::google::rpc::Status as RpcStatus;

    fn resource(name: &str, payload: &[u8]) -> BuiltResource {
        BuiltResource {
            name: name.to_string(),
            resource: Any {
                type_url: ResourceType::Cluster.type_url().to_string(),
                value: payload.to_vec(),
            },
        }
    }

    fn request(type_url: &str, version: &str, nonce: &str) -> DiscoveryRequest {
        DiscoveryRequest {
            type_url: type_url.to_string(),
            version_info: version.to_string(),
            response_nonce: nonce.to_string(),
            ..Default::default()
        }
    }

    fn session_with_cluster_snapshot() -> (Session, Arc<SnapshotCache>) {
        let cache = Arc::new(SnapshotCache::new());
        cache.install(ResourceType::Cluster, vec![resource("a", b"1")]);
        (Session::new(Arc::clone(&cache)), cache)
    }

    #[test]
    fn initial_request_receives_current_snapshot() {
        let (mut session, _cache) = session_with_cluster_snapshot();

        let response = session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .expect("initial response");

        assert_eq!(response.version_info, "1");
        assert_eq!(response.resources.len(), 1);
        assert!(!response.nonce.is_empty());
    }

    #[test]
    fn ack_is_recorded_and_not_answered() {
        let (mut session, _cache) = session_with_cluster_snapshot();
        let sent = session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .expect("initial response");

        let ack = request(ResourceType::Cluster.type_url(), &sent.version_info, &sent.nonce);
        assert!(session.handle_request(&ack).is_none());
        assert_eq!(
            session.subscriptions[&ResourceType::Cluster].acked_version.as_deref(),
            Some("1")
        );
    }

    #[test]
    fn nack_parks_until_a_newer_version_is_installed() {
        let (mut session, cache) = session_with_cluster_snapshot();
        let sent = session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .expect("initial response");

        let mut nack = request(ResourceType::Cluster.type_url(), "", &sent.nonce);
        nack.error_detail =
            Some(RpcStatus { code: 3, message: "rejected".into(), ..Default::default() });
        assert!(session.handle_request(&nack).is_none(), "nack is never answered directly");

        // Re-announcing the same version must not retrigger a send.
        assert!(session
            .handle_update(SnapshotUpdate { resource_type: ResourceType::Cluster, version: 1 })
            .is_none());

        cache.install(ResourceType::Cluster, vec![resource("a", b"2")]);
        let response = session
            .handle_update(SnapshotUpdate { resource_type: ResourceType::Cluster, version: 2 })
            .expect("new version reaches a nacked client");
        assert_eq!(response.version_info, "2");
    }

    #[test]
    fn stale_nonce_is_answered_with_the_current_snapshot() {
        let (mut session, _cache) = session_with_cluster_snapshot();
        session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .expect("initial response");

        let stale = request(ResourceType::Cluster.type_url(), "1", "some-old-nonce");
        let response = session.handle_request(&stale).expect("stale request gets fresh snapshot");
        assert_eq!(response.version_info, "1");
    }

    #[test]
    fn unknown_type_url_is_ignored_without_closing_the_session() {
        let (mut session, _cache) = session_with_cluster_snapshot();

        assert!(session.handle_request(&request("type.googleapis.com/not.a.Thing", "", "")).is_none());
        assert!(session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .is_some());
    }

    #[test]
    fn update_for_an_unsubscribed_type_is_dropped() {
        let (mut session, _cache) = session_with_cluster_snapshot();

        assert!(session
            .handle_update(SnapshotUpdate { resource_type: ResourceType::Cluster, version: 1 })
            .is_none());
    }

    #[test]
    fn update_with_an_already_sent_version_is_suppressed() {
        let (mut session, _cache) = session_with_cluster_snapshot();
        session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .expect("initial response");

        assert!(session
            .handle_update(SnapshotUpdate { resource_type: ResourceType::Cluster, version: 1 })
            .is_none());
    }

    #[test]
    fn subscription_before_first_install_waits_for_the_snapshot() {
        let cache = Arc::new(SnapshotCache::new());
        let mut session = Session::new(Arc::clone(&cache));

        assert!(session
            .handle_request(&request(ResourceType::Listener.type_url(), "", ""))
            .is_none());

        cache.install(ResourceType::Listener, vec![resource("ingress_http", b"1")]);
        let response = session
            .handle_update(SnapshotUpdate { resource_type: ResourceType::Listener, version: 1 })
            .expect("first install reaches the waiting subscription");
        assert_eq!(response.version_info, "1");
    }

    #[test]
    fn name_filter_limits_the_response() {
        let cache = Arc::new(SnapshotCache::new());
        cache.install(
            ResourceType::Endpoint,
            vec![resource("default/a/80/e3b0c44298", b"1"), resource("default/b/80/e3b0c44298", b"2")],
        );
        let mut session = Session::new(Arc::clone(&cache));

        let mut req = request(ResourceType::Endpoint.type_url(), "", "");
        req.resource_names = vec!["default/a/80/e3b0c44298".into(), "default/gone/80/x".into()];

        let response = session.handle_request(&req).expect("filtered response");
        // The unknown name is silently absent; SOTW has no per-name errors.
        assert_eq!(response.resources.len(), 1);
    }

    #[test]
    fn ack_with_a_changed_name_filter_is_answered() {
        let cache = Arc::new(SnapshotCache::new());
        cache.install(
            ResourceType::Endpoint,
            vec![resource("default/a/80/e3b0c44298", b"1"), resource("default/b/80/e3b0c44298", b"2")],
        );
        let mut session = Session::new(Arc::clone(&cache));

        let mut req = request(ResourceType::Endpoint.type_url(), "", "");
        req.resource_names = vec!["default/a/80/e3b0c44298".into()];
        let sent = session.handle_request(&req).expect("initial response");

        let mut ack = request(ResourceType::Endpoint.type_url(), &sent.version_info, &sent.nonce);
        ack.resource_names =
            vec!["default/a/80/e3b0c44298".into(), "default/b/80/e3b0c44298".into()];
        let response = session.handle_request(&ack).expect("widened subscription gets content");
        assert_eq!(response.resources.len(), 2);
    }

    #[test]
    fn refresh_after_lag_resends_only_stale_subscriptions() {
        let (mut session, cache) = session_with_cluster_snapshot();
        cache.install(ResourceType::Route, vec![resource("ingress_http", b"r")]);

        session
            .handle_request(&request(ResourceType::Cluster.type_url(), "", ""))
            .expect("cluster response");
        session
            .handle_request(&request(ResourceType::Route.type_url(), "", ""))
            .expect("route response");

        cache.install(ResourceType::Cluster, vec![resource("a", b"2")]);

        let refreshed = session.refresh_all();
        assert_eq!(refreshed.len(), 1);
        assert_eq!(refreshed[0].type_url, ResourceType::Cluster.type_url());
        assert_eq!(refreshed[0].version_info, "2");
    }

    #[test]
    fn classify_distinguishes_all_actions() {
        let sub = Subscription {
            last_sent_nonce: Some("nonce-1".into()),
            last_sent_version: 1,
            ..Default::default()
        };
        let url = ResourceType::Cluster.type_url();

        assert_eq!(classify_request(None, &request(url, "", "")), RequestAction::Initial);
        assert_eq!(classify_request(Some(&sub), &request(url, "", "")), RequestAction::Initial);
        assert_eq!(
            classify_request(Some(&sub), &request(url, "1", "nonce-1")),
            RequestAction::Ack
        );
        assert_eq!(
            classify_request(Some(&sub), &request(url, "1", "other")),
            RequestAction::Stale
        );

        let mut nack = request(url, "1", "nonce-1");
        nack.error_detail = Some(RpcStatus::default());
        assert_eq!(classify_request(Some(&sub), &nack), RequestAction::Nack);

        assert_eq!(
            classify_request(None, &request("type.googleapis.com/nope", "", "")),
            RequestAction::UnknownType
        );
    }
}
