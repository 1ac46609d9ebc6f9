//! Per-sink allowlist of event kinds.

use std::collections::HashSet;

use crate::pb::{Event, EventKind};

/// Pure predicate deciding whether an event may leave the process via a
/// given sink. Evaluated inside the sink's `PublisherClient` so filtering
/// cost is attributed to that sink's counters.
#[derive(Clone, Debug)]
pub struct FilterPredicate {
    allowed_kinds: HashSet<i32>,
}

impl FilterPredicate {
    pub fn new(allowed_kind_names: &HashSet<String>) -> Self {
        let allowed_kinds = allowed_kind_names
            .iter()
            .filter_map(|name| kind_from_name(name))
            .map(|kind| kind as i32)
            .collect();
        Self { allowed_kinds }
    }

    /// A predicate that allows every event kind (used by sinks with no
    /// configured filter, e.g. the control plane).
    pub fn allow_all() -> Self {
        Self {
            allowed_kinds: HashSet::new(),
        }
    }

    pub fn allows(&self, event: &Event) -> bool {
        self.allowed_kinds.is_empty() || self.allowed_kinds.contains(&event.event_kind)
    }
}

fn kind_from_name(name: &str) -> Option<EventKind> {
    match name {
        "TASK_DEFINITION_EVENT" => Some(EventKind::TaskDefinitionEvent),
        "TASK_EXECUTION_EVENT" => Some(EventKind::TaskExecutionEvent),
        "ACTOR_TASK_DEFINITION_EVENT" => Some(EventKind::ActorTaskDefinitionEvent),
        "ACTOR_TASK_EXECUTION_EVENT" => Some(EventKind::ActorTaskExecutionEvent),
        "DRIVER_JOB_DEFINITION_EVENT" => Some(EventKind::DriverJobDefinitionEvent),
        "DRIVER_JOB_EXECUTION_EVENT" => Some(EventKind::DriverJobExecutionEvent),
        "TASK_PROFILE_EVENT" => Some(EventKind::TaskProfileEvent),
        _ => None,
    }
}
