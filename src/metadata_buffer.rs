//! Coalescing buffer for task metadata accompanying dropped-event accounting.

use std::collections::HashMap;

use parking_lot::Mutex;

use crate::pb::TaskMetadata;

/// Grow-and-drain map from task-attempt id to its latest metadata record.
/// Not nested under the `EventBuffer` lock.
#[derive(Default)]
pub struct TaskMetadataBuffer {
    inner: Mutex<HashMap<String, TaskMetadata>>,
}

impl TaskMetadataBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Union `incoming` into the buffer; later entries win on key collision.
    pub fn merge(&self, incoming: HashMap<String, TaskMetadata>) {
        let mut inner = self.inner.lock();
        for (key, value) in incoming {
            inner.insert(key, value);
        }
    }

    /// Atomically take everything currently buffered, resetting to empty.
    pub fn drain(&self) -> HashMap<String, TaskMetadata> {
        std::mem::take(&mut *self.inner.lock())
    }

    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn meta(attempt: &str) -> TaskMetadata {
        TaskMetadata {
            task_attempt_id: attempt.to_string(),
            job_id: "job-1".to_string(),
            task_name: "f".to_string(),
            attempt_number: 0,
        }
    }

    #[test]
    fn merge_then_drain_round_trips() {
        let buf = TaskMetadataBuffer::new();
        buf.merge(HashMap::from([("a".to_string(), meta("a"))]));
        buf.merge(HashMap::from([("b".to_string(), meta("b"))]));
        assert_eq!(buf.len(), 2);

        let drained = buf.drain();
        assert_eq!(drained.len(), 2);
        assert!(buf.is_empty());
    }

    #[test]
    fn later_merge_wins_on_collision() {
        let buf = TaskMetadataBuffer::new();
        buf.merge(HashMap::from([(
            "a".to_string(),
            TaskMetadata {
                attempt_number: 0,
                ..meta("a")
            },
        )]));
        buf.merge(HashMap::from([(
            "a".to_string(),
            TaskMetadata {
                attempt_number: 1,
                ..meta("a")
            },
        )]));
        let drained = buf.drain();
        assert_eq!(drained["a"].attempt_number, 1);
    }
}
