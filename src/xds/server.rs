//! The ADS gRPC server: one aggregated stream per connected Envoy.

use std::sync::Arc;

use envoy_types::pb::envoy::service::discovery::v3::{
    aggregated_discovery_service_server::{
        AggregatedDiscoveryService, AggregatedDiscoveryServiceServer,
    },
    DeltaDiscoveryRequest, DeltaDiscoveryResponse, DiscoveryRequest, DiscoveryResponse,
};
use tokio_stream::wrappers::ReceiverStream;
use tonic::{transport::Server, Request, Response, Status};
use tracing::info;

use crate::config::XdsConfig;
use crate::xds::{stream::run_stream_loop, SnapshotCache};
use crate::Result;

/// Aggregated discovery service backed by the snapshot cache.
#[derive(Debug)]
pub struct AggregatedDiscoveryServer {
    cache: Arc<SnapshotCache>,
}

impl AggregatedDiscoveryServer {
    pub fn new(cache: Arc<SnapshotCache>) -> Self {
        Self { cache }
    }
}

#[tonic::async_trait]
impl AggregatedDiscoveryService for AggregatedDiscoveryServer {
    type StreamAggregatedResourcesStream =
        ReceiverStream<std::result::Result<DiscoveryResponse, Status>>;
    type DeltaAggregatedResourcesStream =
        ReceiverStream<std::result::Result<DeltaDiscoveryResponse, Status>>;

    async fn stream_aggregated_resources(
        &self,
        request: Request<tonic::Streaming<DiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::StreamAggregatedResourcesStream>, Status> {
        info!(remote = ?request.remote_addr(), "New ADS stream connection established");

        let in_stream = request.into_inner();
        Ok(Response::new(run_stream_loop(Arc::clone(&self.cache), in_stream)))
    }

    async fn delta_aggregated_resources(
        &self,
        _request: Request<tonic::Streaming<DeltaDiscoveryRequest>>,
    ) -> std::result::Result<Response<Self::DeltaAggregatedResourcesStream>, Status> {
        // Only state-of-the-world is served; Envoy falls back cleanly.
        Err(Status::unimplemented("incremental xDS is not supported"))
    }
}

/// Serve the ADS endpoint until the shutdown future resolves.
pub async fn serve(
    config: &XdsConfig,
    cache: Arc<SnapshotCache>,
    shutdown: impl std::future::Future<Output = ()> + Send + 'static,
) -> Result<()> {
    let addr = config.listen_addr()?;
    let service = AggregatedDiscoveryServer::new(cache);

    info!(address = %addr, "Starting xDS server");

    Server::builder()
        .add_service(AggregatedDiscoveryServiceServer::new(service))
        .serve_with_shutdown(addr, shutdown)
        .await?;

    info!("xDS server stopped");
    Ok(())
}
