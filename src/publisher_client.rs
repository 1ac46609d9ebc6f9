//! Stateless transport capability consumed by the `Publisher` loop.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use prost::Message;

use crate::error::AggregatorError;
use crate::filter::FilterPredicate;
use crate::pb::control_plane_service_client::ControlPlaneServiceClient;
use crate::pb::{Event, EventsData, PublishEventsRequest, TaskMetadata};

/// Outcome of a single `publish` call.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PublishStats {
    pub success: bool,
    pub filtered_count: usize,
    pub accepted_count: usize,
}

/// Sink-specific serializer and transport. Implementations must not panic
/// or propagate on remote failure: a failed publish is reported through
/// `PublishStats::success = false`, never as an `Err`.
#[async_trait]
pub trait PublisherClient: Send + Sync {
    async fn publish(
        &self,
        batch: &[Arc<Event>],
        task_metadata: HashMap<String, TaskMetadata>,
    ) -> PublishStats;

    fn count_events_in_batch(&self, batch: &[Arc<Event>]) -> usize {
        batch.len()
    }

    async fn close(&self) {}
}

/// Publishes a filtered, protobuf-encoded batch over HTTP.
pub struct HttpPublisherClient {
    http: reqwest::Client,
    endpoint: String,
    filter: FilterPredicate,
}

impl HttpPublisherClient {
    pub fn new(endpoint: impl Into<String>, filter: FilterPredicate) -> Result<Self, reqwest::Error> {
        let http = reqwest::Client::builder()
            .pool_max_idle_per_host(10)
            .pool_idle_timeout(Duration::from_secs(90))
            .build()?;
        Ok(Self {
            http,
            endpoint: endpoint.into(),
            filter,
        })
    }
}

#[async_trait]
impl PublisherClient for HttpPublisherClient {
    async fn publish(
        &self,
        batch: &[Arc<Event>],
        _task_metadata: HashMap<String, TaskMetadata>,
    ) -> PublishStats {
        let mut filtered_count = 0;
        let kept: Vec<Event> = batch
            .iter()
            .filter(|event| {
                let allowed = self.filter.allows(event);
                if !allowed {
                    filtered_count += 1;
                }
                allowed
            })
            .map(|event| event.as_ref().clone())
            .collect();

        if kept.is_empty() {
            return PublishStats {
                success: true,
                filtered_count,
                accepted_count: 0,
            };
        }

        let accepted_count = kept.len();
        // Encoding is CPU-bound and can be non-trivial for a full-size
        // batch; offload it to the blocking pool sized by `worker_pool_size`
        // so it never steals time from the async reactor.
        let payload = match tokio::task::spawn_blocking(move || {
            EventsData {
                events: kept,
                task_events_metadata: HashMap::new(),
            }
            .encode_to_vec()
        })
        .await
        {
            Ok(bytes) => bytes,
            Err(_) => {
                return PublishStats {
                    success: false,
                    filtered_count,
                    accepted_count: 0,
                };
            }
        };

        match self
            .http
            .post(&self.endpoint)
            .header("content-type", "application/x-protobuf")
            .body(payload)
            .send()
            .await
        {
            Ok(resp) if resp.status().is_success() => PublishStats {
                success: true,
                filtered_count,
                accepted_count,
            },
            Ok(_) | Err(_) => PublishStats {
                success: false,
                filtered_count,
                accepted_count: 0,
            },
        }
    }

    async fn close(&self) {}
}

/// Publishes a batch plus drained task metadata to the co-located
/// control-plane stub. Applies no filter of its own.
pub struct ControlPlanePublisherClient {
    addr: String,
    client: tokio::sync::Mutex<Option<ControlPlaneServiceClient<tonic::transport::Channel>>>,
}

impl ControlPlanePublisherClient {
    pub fn new(addr: impl Into<String>) -> Self {
        Self {
            addr: addr.into(),
            client: tokio::sync::Mutex::new(None),
        }
    }

    async fn connected_client(
        &self,
    ) -> Result<ControlPlaneServiceClient<tonic::transport::Channel>, AggregatorError> {
        let mut guard = self.client.lock().await;
        if let Some(client) = guard.as_ref() {
            return Ok(client.clone());
        }
        let endpoint = tonic::transport::Endpoint::from_shared(self.addr.clone())
            .map_err(|e| AggregatorError::SerializationFailure(e.to_string()))?;
        let channel = endpoint
            .connect()
            .await
            .map_err(|e| AggregatorError::SerializationFailure(e.to_string()))?;
        let client = ControlPlaneServiceClient::new(channel);
        *guard = Some(client.clone());
        Ok(client)
    }
}

#[async_trait]
impl PublisherClient for ControlPlanePublisherClient {
    async fn publish(
        &self,
        batch: &[Arc<Event>],
        task_metadata: HashMap<String, TaskMetadata>,
    ) -> PublishStats {
        let mut client = match self.connected_client().await {
            Ok(c) => c,
            Err(_) => {
                return PublishStats {
                    success: false,
                    filtered_count: 0,
                    accepted_count: 0,
                }
            }
        };

        let request = PublishEventsRequest {
            events: batch.iter().map(|e| e.as_ref().clone()).collect(),
            task_events_metadata: task_metadata,
        };

        match client.publish_events(request).await {
            Ok(resp) => {
                let reply = resp.into_inner();
                PublishStats {
                    success: reply.success,
                    filtered_count: 0,
                    accepted_count: reply.accepted_count as usize,
                }
            }
            Err(_) => PublishStats {
                success: false,
                filtered_count: 0,
                accepted_count: 0,
            },
        }
    }

    async fn close(&self) {
        *self.client.lock().await = None;
    }
}

#[cfg(test)]
pub mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Client whose `publish` outcome is scripted call-by-call. Grounded on
    /// the mock client used to exercise `publish_with_retry`.
    pub struct ScriptedClient {
        outcomes: std::sync::Mutex<std::collections::VecDeque<bool>>,
        pub calls: AtomicUsize,
    }

    impl ScriptedClient {
        pub fn new(outcomes: Vec<bool>) -> Self {
            Self {
                outcomes: std::sync::Mutex::new(outcomes.into()),
                calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl PublisherClient for ScriptedClient {
        async fn publish(
            &self,
            batch: &[Arc<Event>],
            _task_metadata: HashMap<String, TaskMetadata>,
        ) -> PublishStats {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let success = self
                .outcomes
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(false);
            PublishStats {
                success,
                filtered_count: 0,
                accepted_count: if success { batch.len() } else { 0 },
            }
        }
    }
}
