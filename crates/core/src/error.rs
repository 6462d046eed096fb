//! Unified error model for query jobs.

use serde_json::Value as JsonValue;
use thiserror::Error;

/// Result type used across the workspace.
pub type QueryResult<T> = Result<T, QueryError>;

/// Every failure a caller of the orchestration layer can observe.
///
/// Remote-originated variants carry the human-readable message and, when the
/// remote service supplied one, its structured error payload.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum QueryError {
    /// Rate limiting or a transient server-side failure. Retryable.
    #[error("{message}")]
    TransientRemote {
        message: String,
        payload: Option<JsonValue>,
    },

    /// The remote resource does not exist. Never retried.
    #[error("{message}")]
    NotFound {
        message: String,
        payload: Option<JsonValue>,
    },

    /// Every retry attempt failed with a transient error.
    #[error("{attempts} times retried but failed")]
    RetryExhausted { attempts: u32 },

    /// The remote service reported the query itself as failed.
    #[error("{message}")]
    RemoteJob {
        message: String,
        payload: Option<JsonValue>,
    },

    /// The wait deadline passed before the remote job finished.
    #[error("timeout")]
    Timeout,

    /// The wait was abandoned because a sibling in the same group failed.
    #[error("cancelled")]
    Cancelled,

    /// A field type or raw value was not textual.
    #[error("type mismatch: {0}")]
    TypeMismatch(String),

    /// The field type is not one of the supported scalar types.
    #[error("unsupported field type: {0}")]
    UnsupportedType(String),

    /// A textual value could not be parsed as its field type.
    #[error("cannot parse {value:?} as {field_type}: {reason}")]
    Parse {
        field_type: String,
        value: String,
        reason: String,
    },

    /// No admission token became available before the admission deadline.
    #[error("no admission token available within {waited_ms} ms")]
    AdmissionTimeout { waited_ms: u64 },

    /// The admission controller's backing store failed.
    #[error("admission control failed: {0}")]
    Admission(String),

    /// An operation was invoked in a lifecycle state that does not allow it.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// Construction-time configuration was rejected.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),
}

impl QueryError {
    pub fn transient(message: impl Into<String>) -> Self {
        Self::TransientRemote {
            message: message.into(),
            payload: None,
        }
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::NotFound {
            message: message.into(),
            payload: None,
        }
    }

    pub fn remote_job(message: impl Into<String>) -> Self {
        Self::RemoteJob {
            message: message.into(),
            payload: None,
        }
    }

    pub fn type_mismatch(msg: impl Into<String>) -> Self {
        Self::TypeMismatch(msg.into())
    }

    pub fn unsupported_type(field_type: impl Into<String>) -> Self {
        Self::UnsupportedType(field_type.into())
    }

    pub fn parse(
        field_type: impl Into<String>,
        value: impl Into<String>,
        reason: impl ToString,
    ) -> Self {
        Self::Parse {
            field_type: field_type.into(),
            value: value.into(),
            reason: reason.to_string(),
        }
    }

    pub fn invalid_state(msg: impl Into<String>) -> Self {
        Self::InvalidState(msg.into())
    }

    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Self::InvalidConfig(msg.into())
    }

    /// Attach the remote service's structured error payload.
    ///
    /// Has no effect on variants that do not originate remotely.
    pub fn with_payload(mut self, value: JsonValue) -> Self {
        match &mut self {
            Self::TransientRemote { payload, .. }
            | Self::NotFound { payload, .. }
            | Self::RemoteJob { payload, .. } => *payload = Some(value),
            _ => {}
        }
        self
    }

    /// Human-readable message.
    pub fn message(&self) -> String {
        self.to_string()
    }

    /// Structured payload from the remote service, when one was supplied.
    pub fn payload(&self) -> Option<&JsonValue> {
        match self {
            Self::TransientRemote { payload, .. }
            | Self::NotFound { payload, .. }
            | Self::RemoteJob { payload, .. } => payload.as_ref(),
            _ => None,
        }
    }

    /// Whether the backoff retrier may try the failed call again.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::TransientRemote { .. })
    }
}
