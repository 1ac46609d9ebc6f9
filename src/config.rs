//! Process configuration, loaded once at startup from environment variables.

use crate::error::AggregatorError;
use std::collections::HashSet;
use std::time::Duration;

const DEFAULT_EXPOSABLE_EVENT_KINDS: &[&str] = &[
    "TASK_DEFINITION_EVENT",
    "TASK_EXECUTION_EVENT",
    "ACTOR_TASK_DEFINITION_EVENT",
    "ACTOR_TASK_EXECUTION_EVENT",
    "DRIVER_JOB_DEFINITION_EVENT",
    "DRIVER_JOB_EXECUTION_EVENT",
];

/// Immutable configuration snapshot for the agent's lifetime. Dynamic
/// reconfiguration is a non-goal; every field here is fixed at startup.
#[derive(Clone, Debug)]
pub struct Config {
    pub worker_pool_size: usize,
    pub liveness_check_interval: Duration,
    pub max_event_buffer_size: usize,
    pub max_event_send_batch_size: usize,
    pub events_export_addr: String,
    pub exposable_event_kinds: HashSet<String>,
    pub publish_to_http: bool,
    pub publish_to_control_plane: bool,
    pub control_plane_addr: String,
    pub grpc_listen_addr: String,
    pub metrics_listen_addr: String,
    pub log_level: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            worker_pool_size: 1,
            liveness_check_interval: Duration::from_millis(100),
            max_event_buffer_size: 1_000_000,
            max_event_send_batch_size: 10_000,
            events_export_addr: String::new(),
            exposable_event_kinds: DEFAULT_EXPOSABLE_EVENT_KINDS
                .iter()
                .map(|s| s.to_string())
                .collect(),
            publish_to_http: true,
            publish_to_control_plane: false,
            control_plane_addr: String::new(),
            grpc_listen_addr: "0.0.0.0:50060".to_string(),
            metrics_listen_addr: "0.0.0.0:9477".to_string(),
            log_level: "info".to_string(),
        }
    }
}

impl Config {
    /// Load from environment, falling back to defaults for anything unset.
    pub fn from_env() -> Result<Self, AggregatorError> {
        let defaults = Self::default();

        Ok(Self {
            worker_pool_size: env_usize("AGGREGATOR_WORKER_POOL_SIZE", defaults.worker_pool_size)?,
            liveness_check_interval: Duration::from_secs_f64(env_f64(
                "AGGREGATOR_LIVENESS_CHECK_INTERVAL_S",
                defaults.liveness_check_interval.as_secs_f64(),
            )?),
            max_event_buffer_size: env_usize(
                "AGGREGATOR_MAX_EVENT_BUFFER_SIZE",
                defaults.max_event_buffer_size,
            )?,
            max_event_send_batch_size: env_usize(
                "AGGREGATOR_MAX_EVENT_SEND_BATCH_SIZE",
                defaults.max_event_send_batch_size,
            )?,
            events_export_addr: env_string(
                "AGGREGATOR_EVENTS_EXPORT_ADDR",
                &defaults.events_export_addr,
            ),
            exposable_event_kinds: env_csv_set(
                "AGGREGATOR_EXPOSABLE_EVENT_TYPES",
                &defaults.exposable_event_kinds,
            ),
            publish_to_http: env_bool("AGGREGATOR_PUBLISH_TO_HTTP", defaults.publish_to_http)?,
            publish_to_control_plane: env_bool(
                "AGGREGATOR_PUBLISH_TO_CONTROL_PLANE",
                defaults.publish_to_control_plane,
            )?,
            control_plane_addr: env_string(
                "AGGREGATOR_CONTROL_PLANE_ADDR",
                &defaults.control_plane_addr,
            ),
            grpc_listen_addr: env_string("AGGREGATOR_GRPC_LISTEN_ADDR", &defaults.grpc_listen_addr),
            metrics_listen_addr: env_string(
                "AGGREGATOR_METRICS_LISTEN_ADDR",
                &defaults.metrics_listen_addr,
            ),
            log_level: env_string("AGGREGATOR_LOG_LEVEL", &defaults.log_level),
        })
    }

    /// HTTP publisher is active only when enabled and an address is configured.
    pub fn http_sink_enabled(&self) -> bool {
        self.publish_to_http && !self.events_export_addr.is_empty()
    }

    pub fn control_plane_sink_enabled(&self) -> bool {
        self.publish_to_control_plane && !self.control_plane_addr.is_empty()
    }
}

fn env_string(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_usize(name: &str, default: usize) -> Result<usize, AggregatorError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| AggregatorError::ConfigError {
            field: name.to_string(),
            message: format!("expected an unsigned integer, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_f64(name: &str, default: f64) -> Result<f64, AggregatorError> {
    match std::env::var(name) {
        Ok(raw) => raw.parse().map_err(|_| AggregatorError::ConfigError {
            field: name.to_string(),
            message: format!("expected a float, got {raw:?}"),
        }),
        Err(_) => Ok(default),
    }
}

fn env_bool(name: &str, default: bool) -> Result<bool, AggregatorError> {
    match std::env::var(name) {
        Ok(raw) => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" => Ok(true),
            "0" | "false" | "no" => Ok(false),
            _ => Err(AggregatorError::ConfigError {
                field: name.to_string(),
                message: format!("expected a boolean, got {raw:?}"),
            }),
        },
        Err(_) => Ok(default),
    }
}

fn env_csv_set(name: &str, default: &HashSet<String>) -> HashSet<String> {
    match std::env::var(name) {
        Ok(raw) if !raw.trim().is_empty() => raw
            .split(',')
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default.clone(),
    }
}
