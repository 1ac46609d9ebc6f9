//! Telemetry event aggregator agent.
//!
//! A co-located sidecar that ingests structured runtime events from local
//! producers over gRPC, buffers them in a bounded multi-consumer
//! [`buffer::EventBuffer`], and fans them out to independent downstream
//! sinks (an HTTP collector and an internal control-plane stream) through
//! per-sink [`publisher::Publisher`] loops.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use event_aggregator_agent::{AggregatorAgent, CancellationToken, Config};
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let config = Config::from_env()?;
//! let agent = AggregatorAgent::new(config)?;
//! agent.run(CancellationToken::new()).await?;
//! # Ok(())
//! # }
//! ```

mod agent;
mod buffer;
mod cancel;
mod config;
mod error;
mod filter;
mod ingress;
pub mod liveness;
mod metadata_buffer;
pub mod pb;
mod publisher;
mod publisher_client;
mod retry;

pub use agent::AggregatorAgent;
pub use buffer::{EventBuffer, EvictionRecorder, MetricsEvictionRecorder, NoopEvictionRecorder};
pub use cancel::CancellationToken;
pub use config::Config;
pub use error::AggregatorError;
pub use filter::FilterPredicate;
pub use ingress::IngressHandler;
pub use metadata_buffer::TaskMetadataBuffer;
pub use publisher::{NoopPublisher, Publisher, PublisherCounters, RunForever};
pub use publisher_client::{
    ControlPlanePublisherClient, HttpPublisherClient, PublishStats, PublisherClient,
};
pub use retry::{RetryConfig, INFINITE_RETRIES};
