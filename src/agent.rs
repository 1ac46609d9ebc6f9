//! Top-level owner of the buffer, both publishers, and the ingress server.
//!
//! Build a `Config` once, construct `AggregatorAgent` from it, then `run()`
//! until a cancellation signal arrives.

use std::sync::Arc;

use futures::future::join_all;
use tonic::transport::Server;

use crate::buffer::EventBuffer;
use crate::cancel::CancellationToken;
use crate::config::Config;
use crate::filter::FilterPredicate;
use crate::ingress::IngressHandler;
use crate::metadata_buffer::TaskMetadataBuffer;
use crate::pb::event_aggregator_service_server::EventAggregatorServiceServer;
use crate::publisher::{NoopPublisher, Publisher, RunForever};
use crate::publisher_client::{ControlPlanePublisherClient, HttpPublisherClient, PublisherClient};
use crate::retry::RetryConfig;

const METRIC_PREFIX: &str = "aggregator";

/// How long `wait_for_batch` fills a partial batch once the first event has
/// arrived. Matches the 1-second default of the buffer this agent is
/// modeled on.
const PULL_TIMEOUT: std::time::Duration = std::time::Duration::from_secs(1);

/// Owns every long-lived piece of the agent: the shared buffer, the task
/// metadata side channel, both publishers (real or `NoopPublisher` when a
/// sink is disabled), and the ingress gRPC service.
pub struct AggregatorAgent {
    config: Config,
    buffer: Arc<EventBuffer>,
    ingress: Arc<IngressHandler>,
    http_publisher: Arc<dyn RunForever>,
    control_plane_publisher: Arc<dyn RunForever>,
}

impl AggregatorAgent {
    pub fn new(config: Config) -> Result<Self, crate::error::AggregatorError> {
        let buffer = Arc::new(EventBuffer::new(
            config.max_event_buffer_size,
            config.max_event_send_batch_size,
        ));
        let task_metadata = Arc::new(TaskMetadataBuffer::new());
        let processing_enabled = config.http_sink_enabled() || config.control_plane_sink_enabled();
        let ingress = Arc::new(IngressHandler::new(
            buffer.clone(),
            task_metadata.clone(),
            METRIC_PREFIX,
            processing_enabled,
        ));

        let http_publisher: Arc<dyn RunForever> = if config.http_sink_enabled() {
            let filter = FilterPredicate::new(&config.exposable_event_kinds);
            let client: Arc<dyn PublisherClient> =
                Arc::new(HttpPublisherClient::new(config.events_export_addr.clone(), filter)?);
            Arc::new(Publisher::new(
                "http",
                buffer.clone(),
                None,
                client,
                RetryConfig::new(),
                PULL_TIMEOUT,
                METRIC_PREFIX,
            ))
        } else {
            Arc::new(NoopPublisher::new())
        };

        let control_plane_publisher: Arc<dyn RunForever> = if config.control_plane_sink_enabled() {
            let client: Arc<dyn PublisherClient> =
                Arc::new(ControlPlanePublisherClient::new(config.control_plane_addr.clone()));
            Arc::new(Publisher::new(
                "control_plane",
                buffer.clone(),
                Some(task_metadata.clone()),
                client,
                RetryConfig::new(),
                PULL_TIMEOUT,
                METRIC_PREFIX,
            ))
        } else {
            Arc::new(NoopPublisher::new())
        };

        Ok(Self {
            config,
            buffer,
            ingress,
            http_publisher,
            control_plane_publisher,
        })
    }

    pub fn buffer(&self) -> &Arc<EventBuffer> {
        &self.buffer
    }

    pub fn ingress(&self) -> &Arc<IngressHandler> {
        &self.ingress
    }

    /// Starts the gRPC ingress server and both publisher loops; resolves
    /// once `cancel` fires, after every publisher has reached `STOPPED`.
    pub async fn run(&self, cancel: CancellationToken) -> Result<(), crate::error::AggregatorError> {
        let addr = self
            .config
            .grpc_listen_addr
            .parse()
            .map_err(|e| crate::error::AggregatorError::ConfigError {
                field: "grpc_listen_addr".to_string(),
                message: format!("{e}"),
            })?;

        let http = self.http_publisher.clone();
        let control_plane = self.control_plane_publisher.clone();
        let http_cancel = cancel.clone();
        let control_plane_cancel = cancel.clone();

        let http_task = tokio::spawn(async move { http.run_forever(http_cancel).await });
        let control_plane_task =
            tokio::spawn(async move { control_plane.run_forever(control_plane_cancel).await });

        self.http_publisher
            .wait_until_running(std::time::Duration::from_secs(5))
            .await;
        self.control_plane_publisher
            .wait_until_running(std::time::Duration::from_secs(5))
            .await;

        tracing::info!(%addr, "starting ingress gRPC server");
        let ingress = self.ingress.clone();
        let server = Server::builder()
            .add_service(EventAggregatorServiceServer::from_arc(ingress))
            .serve_with_shutdown(addr, cancel.cancelled());

        let server_result = server.await;
        for joined in join_all([http_task, control_plane_task]).await {
            if let Err(err) = joined {
                tracing::error!(error = %err, "publisher task panicked");
            }
        }

        server_result.map_err(|e| crate::error::AggregatorError::ConfigError {
            field: "grpc_listen_addr".to_string(),
            message: format!("{e}"),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn disabled_sinks_select_noop_publishers() {
        let config = Config::default();
        let agent = AggregatorAgent::new(config).unwrap();
        assert_eq!(agent.buffer().len(), 0);
    }
}
