//! Long-running per-sink publish loop: pull a batch, publish with
//! retry/backoff, record metrics.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::Notify;

use crate::buffer::EventBuffer;
use crate::cancel::CancellationToken;
use crate::metadata_buffer::TaskMetadataBuffer;
use crate::publisher_client::PublisherClient;
use crate::retry::RetryConfig;

#[async_trait]
pub trait RunForever: Send + Sync {
    /// Runs until `cancel` fires, then calls the underlying client's
    /// `close()` and returns.
    async fn run_forever(&self, cancel: CancellationToken);

    /// Resolves once the publisher has registered itself as a buffer
    /// consumer and is ready to pull batches, or `timeout` elapses.
    async fn wait_until_running(&self, timeout: Duration) -> bool;
}

#[derive(Default)]
pub struct PublisherCounters {
    pub published: AtomicU64,
    pub filtered: AtomicU64,
    pub failed: AtomicU64,
}

/// One sink's publish loop: buffer consumer + client + retry policy.
pub struct Publisher {
    name: String,
    buffer: Arc<EventBuffer>,
    task_metadata: Option<Arc<TaskMetadataBuffer>>,
    client: Arc<dyn PublisherClient>,
    retry: RetryConfig,
    pull_timeout: Duration,
    metric_prefix: String,
    counters: PublisherCounters,
    consumer_id: parking_lot::Mutex<Option<u64>>,
    running: Notify,
}

impl Publisher {
    pub fn new(
        name: impl Into<String>,
        buffer: Arc<EventBuffer>,
        task_metadata: Option<Arc<TaskMetadataBuffer>>,
        client: Arc<dyn PublisherClient>,
        retry: RetryConfig,
        pull_timeout: Duration,
        metric_prefix: impl Into<String>,
    ) -> Self {
        Self {
            name: name.into(),
            buffer,
            task_metadata,
            client,
            retry,
            pull_timeout,
            metric_prefix: metric_prefix.into(),
            counters: PublisherCounters::default(),
            consumer_id: parking_lot::Mutex::new(None),
            running: Notify::new(),
        }
    }

    pub fn counters(&self) -> &PublisherCounters {
        &self.counters
    }

    /// Publish one batch, retrying on failure per `self.retry`. Drops the
    /// batch on retry exhaustion — there is no durable re-enqueue path.
    async fn publish_with_retry(
        &self,
        batch: &[Arc<crate::pb::Event>],
        cancel: &CancellationToken,
    ) -> bool {
        let task_metadata = self
            .task_metadata
            .as_ref()
            .map(|m| m.drain())
            .unwrap_or_default();

        let mut attempt = 0u32;
        loop {
            let stats = self.client.publish(batch, task_metadata.clone()).await;

            if stats.success {
                self.counters
                    .published
                    .fetch_add(stats.accepted_count as u64, Ordering::Relaxed);
                self.counters
                    .filtered
                    .fetch_add(stats.filtered_count as u64, Ordering::Relaxed);
                metrics::counter!(format!("{}_published_total", self.metric_prefix))
                    .increment(stats.accepted_count as u64);
                metrics::counter!(format!("{}_filtered_total", self.metric_prefix))
                    .increment(stats.filtered_count as u64);
                return true;
            }

            if !self.retry.should_retry(attempt) {
                let failed = self.client.count_events_in_batch(batch) as u64;
                self.counters.failed.fetch_add(failed, Ordering::Relaxed);
                metrics::counter!(format!("{}_failed_total", self.metric_prefix)).increment(failed);
                tracing::warn!(publisher = %self.name, batch_size = batch.len(), "retry exhausted, dropping batch");
                return false;
            }

            let delay = self.retry.backoff_for_attempt(attempt);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = cancel.cancelled() => return false,
            }
            attempt += 1;
        }
    }
}

#[async_trait]
impl RunForever for Publisher {
    async fn run_forever(&self, cancel: CancellationToken) {
        let consumer_id = self.buffer.register_consumer(self.name.clone());
        *self.consumer_id.lock() = Some(consumer_id);
        self.running.notify_waiters();

        loop {
            let batch = tokio::select! {
                result = self.buffer.wait_for_batch(consumer_id, self.pull_timeout) => result,
                _ = cancel.cancelled() => break,
            };

            let batch = match batch {
                Ok(batch) => batch,
                Err(err) => {
                    tracing::error!(publisher = %self.name, error = %err, "wait_for_batch failed");
                    break;
                }
            };

            self.publish_with_retry(&batch, &cancel).await;
        }

        self.client.close().await;
    }

    async fn wait_until_running(&self, timeout: Duration) -> bool {
        if self.consumer_id.lock().is_some() {
            return true;
        }
        let notified = self.running.notified();
        tokio::pin!(notified);
        if self.consumer_id.lock().is_some() {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }
}

/// No-op publisher used when a sink is disabled in configuration. Sleeps
/// until cancelled; every counter stays at zero.
pub struct NoopPublisher {
    ready: Notify,
    started: std::sync::atomic::AtomicBool,
}

impl Default for NoopPublisher {
    fn default() -> Self {
        Self {
            ready: Notify::new(),
            started: std::sync::atomic::AtomicBool::new(false),
        }
    }
}

impl NoopPublisher {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl RunForever for NoopPublisher {
    async fn run_forever(&self, cancel: CancellationToken) {
        self.started.store(true, Ordering::SeqCst);
        self.ready.notify_waiters();
        cancel.cancelled().await;
    }

    async fn wait_until_running(&self, timeout: Duration) -> bool {
        if self.started.load(Ordering::SeqCst) {
            return true;
        }
        let notified = self.ready.notified();
        tokio::pin!(notified);
        if self.started.load(Ordering::SeqCst) {
            return true;
        }
        tokio::time::timeout(timeout, notified).await.is_ok()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb::Event;
    use crate::publisher_client::test_support::ScriptedClient;
    use std::time::Duration as StdDuration;

    fn event() -> Arc<Event> {
        Arc::new(Event {
            event_id: vec![],
            source_kind: 0,
            event_kind: 1,
            timestamp_seconds: 0,
            timestamp_nanos: 0,
            severity: 0,
            message: String::new(),
        })
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let buffer = Arc::new(EventBuffer::new(10, 10));
        let client = Arc::new(ScriptedClient::new(vec![false, true]));
        let retry = RetryConfig::new()
            .with_max_retries(2)
            .with_initial_backoff(StdDuration::ZERO)
            .with_max_backoff(StdDuration::ZERO)
            .with_jitter_ratio(0.0);
        let publisher = Arc::new(Publisher::new(
            "test",
            buffer.clone(),
            None,
            client.clone(),
            retry,
            StdDuration::from_millis(10),
            "agg",
        ));

        let cancel = CancellationToken::new();
        let p = publisher.clone();
        let cancel_clone = cancel.clone();
        let task = tokio::spawn(async move { p.run_forever(cancel_clone).await });
        assert!(publisher.wait_until_running(StdDuration::from_secs(1)).await);

        buffer.append(event(), &crate::buffer::NoopEvictionRecorder);

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 2);
        assert_eq!(publisher.counters().published.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.counters().failed.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn retry_exhaustion_drops_batch() {
        let buffer = Arc::new(EventBuffer::new(10, 10));
        let client = Arc::new(ScriptedClient::new(vec![false, false, false]));
        let retry = RetryConfig::new()
            .with_max_retries(2)
            .with_initial_backoff(StdDuration::ZERO)
            .with_max_backoff(StdDuration::ZERO)
            .with_jitter_ratio(0.0);
        let publisher = Arc::new(Publisher::new(
            "test",
            buffer.clone(),
            None,
            client.clone(),
            retry,
            StdDuration::from_millis(10),
            "agg",
        ));

        let cancel = CancellationToken::new();
        let p = publisher.clone();
        let cancel_clone = cancel.clone();
        let task = tokio::spawn(async move { p.run_forever(cancel_clone).await });
        assert!(publisher.wait_until_running(StdDuration::from_secs(1)).await);

        buffer.append(event(), &crate::buffer::NoopEvictionRecorder);

        tokio::time::sleep(StdDuration::from_millis(100)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(client.calls.load(Ordering::SeqCst), 3);
        assert_eq!(publisher.counters().failed.load(Ordering::SeqCst), 1);
        assert_eq!(publisher.counters().published.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn noop_publisher_has_zero_counters_and_exits_on_cancel() {
        let publisher = NoopPublisher::new();
        let cancel = CancellationToken::new();
        let cancel_clone = cancel.clone();
        let task = tokio::spawn(async move {
            publisher.run_forever(cancel_clone).await;
        });
        tokio::time::sleep(StdDuration::from_millis(20)).await;
        cancel.cancel();
        task.await.unwrap();
    }
}
