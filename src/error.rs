//! Error types for the aggregator agent.

use thiserror::Error;

/// Main error type for the aggregator core.
#[derive(Debug, Error)]
pub enum AggregatorError {
    /// Raised by `wait_for_batch` against a consumer id that was never
    /// registered. Should be impossible in practice since publishers
    /// register themselves before pulling.
    #[error("unknown consumer: {0}")]
    UnknownConsumer(u64),

    /// A publish attempt failed at the transport layer; recovered by
    /// the retry/backoff loop in `publish_with_retry`.
    #[error("transport failure: {0}")]
    TransportFailure(#[source] reqwest::Error),

    /// A publish attempt failed because the batch could not be encoded.
    /// Treated identically to `TransportFailure` by the publisher.
    #[error("serialization failure: {0}")]
    SerializationFailure(String),

    /// `append` failed while handling an `AddEvents` call. Logged,
    /// counted, and swallowed so the rest of the batch is still tried.
    #[error("failed to enqueue event: {0}")]
    IngressEnqueueFailure(String),

    /// Malformed or missing required environment variable at startup.
    #[error("invalid configuration for {field}: {message}")]
    ConfigError { field: String, message: String },

    /// A control-plane RPC failed.
    #[error("control plane rpc failed: {0}")]
    ControlPlane(#[source] tonic::Status),
}

impl AggregatorError {
    /// Whether the underlying condition is worth a retry attempt.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AggregatorError::TransportFailure(_)
                | AggregatorError::SerializationFailure(_)
                | AggregatorError::ControlPlane(_)
        )
    }
}

impl From<reqwest::Error> for AggregatorError {
    fn from(err: reqwest::Error) -> Self {
        AggregatorError::TransportFailure(err)
    }
}

impl From<tonic::Status> for AggregatorError {
    fn from(err: tonic::Status) -> Self {
        AggregatorError::ControlPlane(err)
    }
}

/// Only the `IngressHandler`'s RPC boundary needs to speak `tonic::Status`;
/// every other path keeps `AggregatorError` internal.
impl From<AggregatorError> for tonic::Status {
    fn from(err: AggregatorError) -> Self {
        match err {
            AggregatorError::UnknownConsumer(_) => tonic::Status::internal(err.to_string()),
            AggregatorError::ConfigError { .. } => tonic::Status::failed_precondition(err.to_string()),
            other => tonic::Status::unavailable(other.to_string()),
        }
    }
}
