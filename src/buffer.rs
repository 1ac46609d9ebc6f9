//! Bounded multi-consumer event buffer with per-consumer cursors.
//!
//! Grounded on the classic monitor pattern: a `parking_lot::Mutex` guards
//! only bounded-time state (the FIFO, cursors, counters); every suspension
//! point lives outside the lock, same discipline `ProducerState` uses in
//! the batching producer this crate started from.

use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::sync::Notify;
use tokio::time::Instant;

use crate::error::AggregatorError;
use crate::pb::Event;

/// Level-triggered wake signal over tokio's edge-triggered `Notify`.
///
/// `Notify::notified()` only wakes tasks that subscribed *before* the next
/// `notify_one`/`notify_waiters` call, so a flag is kept alongside it: a
/// waiter checks the flag, and only awaits the notification if the flag was
/// still clear, re-checking after each wake. This closes the race between
/// observing "nothing to do" and actually starting to wait.
#[derive(Default)]
struct WakeSignal {
    set: AtomicBool,
    notify: Notify,
}

impl WakeSignal {
    fn new() -> Self {
        Self {
            set: AtomicBool::new(true),
            notify: Notify::new(),
        }
    }

    /// Called under the buffer lock on every append.
    fn set(&self) {
        self.set.store(true, Ordering::SeqCst);
        self.notify.notify_one();
    }

    /// Called under the buffer lock once a consumer has drained everything
    /// currently available to it.
    fn clear(&self) {
        self.set.store(false, Ordering::SeqCst);
    }

    /// Wait until the signal is set, or `timeout` elapses. Returns `false`
    /// on timeout. Must be called without the buffer lock held.
    async fn wait(&self, timeout: Option<Duration>) -> bool {
        if self.set.load(Ordering::SeqCst) {
            return true;
        }
        let notified = self.notify.notified();
        tokio::pin!(notified);
        // Re-check after subscribing: an append between the load above and
        // the subscribe would otherwise be missed.
        if self.set.load(Ordering::SeqCst) {
            return true;
        }
        match timeout {
            Some(d) => tokio::time::timeout(d, notified).await.is_ok(),
            None => {
                notified.await;
                true
            }
        }
    }
}

struct ConsumerState {
    consumer_name: String,
    cursor_index: usize,
    wake: Arc<WakeSignal>,
}

/// Bounded FIFO of events shared by any number of independent consumers.
pub struct EventBuffer {
    max_size: usize,
    max_batch_size: usize,
    inner: Mutex<Inner>,
    next_consumer_id: AtomicU64,
}

struct Inner {
    events: VecDeque<Arc<Event>>,
    consumers: HashMap<u64, ConsumerState>,
}

/// Metrics sink the buffer reports evictions to. Kept as a trait so tests
/// can assert on eviction counts without a real `metrics` recorder.
pub trait EvictionRecorder: Send + Sync {
    fn record_eviction(&self, consumer_name: &str, event_kind: i32);
}

pub struct NoopEvictionRecorder;
impl EvictionRecorder for NoopEvictionRecorder {
    fn record_eviction(&self, _consumer_name: &str, _event_kind: i32) {}
}

pub struct MetricsEvictionRecorder {
    pub metric_prefix: String,
}

impl EvictionRecorder for MetricsEvictionRecorder {
    fn record_eviction(&self, consumer_name: &str, event_kind: i32) {
        metrics::counter!(
            format!("{}_{}_queue_dropped_events_total", self.metric_prefix, consumer_name),
            "event_kind" => event_kind.to_string(),
        )
        .increment(1);
    }
}

impl EventBuffer {
    pub fn new(max_size: usize, max_batch_size: usize) -> Self {
        Self {
            max_size,
            max_batch_size,
            inner: Mutex::new(Inner {
                events: VecDeque::with_capacity(max_size.min(1024)),
                consumers: HashMap::new(),
            }),
            next_consumer_id: AtomicU64::new(1),
        }
    }

    pub fn len(&self) -> usize {
        self.inner.lock().events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Register a new consumer, starting at the current tail. Returns an
    /// opaque id used by `wait_for_batch`.
    pub fn register_consumer(&self, consumer_name: impl Into<String>) -> u64 {
        let id = self.next_consumer_id.fetch_add(1, Ordering::SeqCst);
        let mut inner = self.inner.lock();
        inner.consumers.insert(
            id,
            ConsumerState {
                consumer_name: consumer_name.into(),
                cursor_index: 0,
                wake: Arc::new(WakeSignal::new()),
            },
        );
        id
    }

    /// Append an event, evicting the oldest one if the buffer is full.
    /// Never fails and never blocks on a consumer.
    pub fn append(&self, event: Arc<Event>, recorder: &dyn EvictionRecorder) {
        let mut inner = self.inner.lock();

        let dropped = if inner.events.len() >= self.max_size {
            inner.events.pop_front()
        } else {
            None
        };
        inner.events.push_back(event);

        if let Some(dropped) = dropped {
            for consumer in inner.consumers.values_mut() {
                if consumer.cursor_index == 0 {
                    recorder.record_eviction(&consumer.consumer_name, dropped.event_kind);
                } else {
                    consumer.cursor_index -= 1;
                }
            }
        }

        for consumer in inner.consumers.values() {
            consumer.wake.set();
        }
    }

    /// Pull the next batch for `consumer_id`, blocking up to `timeout` after
    /// the first event arrives. See module docs for the two-phase algorithm.
    pub async fn wait_for_batch(
        &self,
        consumer_id: u64,
        timeout: Duration,
    ) -> Result<Vec<Arc<Event>>, AggregatorError> {
        let wake = self.consumer_wake(consumer_id)?;

        // Phase 1: unbounded wait for the first event.
        let mut batch = loop {
            {
                let mut inner = self.inner.lock();
                let consumer = inner
                    .consumers
                    .get_mut(&consumer_id)
                    .ok_or(AggregatorError::UnknownConsumer(consumer_id))?;
                if consumer.cursor_index < inner.events.len() {
                    let event = inner.events[consumer.cursor_index].clone();
                    consumer.cursor_index += 1;
                    break vec![event];
                }
                consumer.wake.clear();
            }
            wake.wait(None).await;
        };

        // Phase 2: bounded fill.
        let deadline = Instant::now() + timeout;
        loop {
            if batch.len() >= self.max_batch_size {
                return Ok(batch);
            }
            let remaining = {
                let mut inner = self.inner.lock();
                let consumer = inner
                    .consumers
                    .get_mut(&consumer_id)
                    .ok_or(AggregatorError::UnknownConsumer(consumer_id))?;
                while consumer.cursor_index < inner.events.len() && batch.len() < self.max_batch_size {
                    batch.push(inner.events[consumer.cursor_index].clone());
                    consumer.cursor_index += 1;
                }
                if batch.len() >= self.max_batch_size {
                    return Ok(batch);
                }
                consumer.wake.clear();
                deadline.saturating_duration_since(Instant::now())
            };
            if remaining.is_zero() {
                return Ok(batch);
            }
            if !wake.wait(Some(remaining)).await {
                return Ok(batch);
            }
        }
    }

    fn consumer_wake(&self, consumer_id: u64) -> Result<Arc<WakeSignal>, AggregatorError> {
        self.inner
            .lock()
            .consumers
            .get(&consumer_id)
            .map(|c| c.wake.clone())
            .ok_or(AggregatorError::UnknownConsumer(consumer_id))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pb::{EventKind, SourceKind};

    fn event(kind: EventKind) -> Arc<Event> {
        Arc::new(Event {
            event_id: vec![],
            source_kind: SourceKind::CoreWorker as i32,
            event_kind: kind as i32,
            timestamp_seconds: 0,
            timestamp_nanos: 0,
            severity: 0,
            message: String::new(),
        })
    }

    #[tokio::test]
    async fn overflow_single_consumer_no_reader() {
        let buf = EventBuffer::new(3, 10);
        let id = buf.register_consumer("sink");
        let recorder = NoopEvictionRecorder;
        for _ in 0..5 {
            buf.append(event(EventKind::TaskExecutionEvent), &recorder);
        }
        let batch = buf.wait_for_batch(id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn overflow_with_reader_caught_up() {
        let buf = EventBuffer::new(3, 10);
        let id = buf.register_consumer("sink");
        let recorder = NoopEvictionRecorder;
        buf.append(event(EventKind::TaskExecutionEvent), &recorder);
        buf.append(event(EventKind::TaskExecutionEvent), &recorder);
        let batch = buf.wait_for_batch(id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 2);

        for _ in 0..4 {
            buf.append(event(EventKind::TaskExecutionEvent), &recorder);
        }
        let batch = buf.wait_for_batch(id, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 3);
    }

    #[tokio::test]
    async fn batch_is_bounded_and_nonempty() {
        let buf = EventBuffer::new(100, 2);
        let id = buf.register_consumer("sink");
        let recorder = NoopEvictionRecorder;
        for _ in 0..10 {
            buf.append(event(EventKind::TaskExecutionEvent), &recorder);
        }
        let batch = buf.wait_for_batch(id, Duration::from_millis(50)).await.unwrap();
        assert!(!batch.is_empty());
        assert!(batch.len() <= 2);
    }

    #[tokio::test]
    async fn independent_consumers_do_not_block_each_other() {
        let buf = EventBuffer::new(10, 10);
        let fast = buf.register_consumer("fast");
        let _slow = buf.register_consumer("slow");
        let recorder = NoopEvictionRecorder;
        buf.append(event(EventKind::TaskExecutionEvent), &recorder);

        let batch = buf.wait_for_batch(fast, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 1);
    }

    #[tokio::test]
    async fn unknown_consumer_errors() {
        let buf = EventBuffer::new(10, 10);
        let result = buf.wait_for_batch(999, Duration::from_millis(10)).await;
        assert!(matches!(result, Err(AggregatorError::UnknownConsumer(999))));
    }
}
