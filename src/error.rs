//! Error types for the Collective core.
//!
//! Every fallible operation across the six components (Identity & Clock,
//! Memory Store, Semantic Index, Sync Engine, Agent Registry & Router,
//! Coordination Bus) returns a [`CollectiveError`] from this single closed
//! taxonomy, so callers can match on `kind()` without caring which
//! component raised it.
use thiserror::Error;

/// The closed set of error kinds shared across all components.
///
/// Callers retry on `Unavailable`/`Transport` with backoff; the other
/// kinds are not meaningfully retryable without changing the request.
#[derive(Error, Debug)]
pub enum CollectiveError {
    /// A request failed local validation before any state was touched.
    #[error("validation failed: {reason}")]
    Validation {
        /// What was wrong with the request.
        reason: String,
    },

    /// The requested entity does not exist (or is already purged).
    #[error("{kind} '{id}' not found")]
    NotFound {
        /// Kind of entity, e.g. "memory", "agent", "task".
        kind: String,
        /// The id that was looked up.
        id: String,
    },

    /// A write lost to a concurrent write with a dominating version.
    #[error("conflict on '{id}': {reason}")]
    Conflict {
        /// The id whose write conflicted.
        id: String,
        /// Why the write was rejected.
        reason: String,
    },

    /// The component or a dependency is temporarily unable to serve the
    /// request (e.g. quarantined peer, lease not yet acquired). Safe to
    /// retry with backoff.
    #[error("unavailable: {reason}")]
    Unavailable {
        /// Why the component is unavailable.
        reason: String,
        /// Suggested minimum delay before retrying, if known.
        retry_after_ms: Option<u64>,
    },

    /// A network/transport-level failure talking to a peer.
    #[error("transport error: {0}")]
    Transport(String),

    /// A request was well-formed but violates a policy (capability
    /// mismatch, lease expired, scope boundary).
    #[error("policy violation: {reason}")]
    Policy {
        /// Why the request is not permitted.
        reason: String,
    },

    /// Serialization or encoding failure.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Anything else: bugs, invariant violations, I/O failures that are
    /// not transport. Logged with a correlation id for cross-referencing.
    #[error("internal error ({correlation_id}): {reason}")]
    Internal {
        /// Description of the failure.
        reason: String,
        /// Id echoed in logs so operators can find the matching span.
        correlation_id: String,
    },
}

impl CollectiveError {
    /// Short, stable name of the error kind for metrics/log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation { .. } => "validation",
            Self::NotFound { .. } => "not_found",
            Self::Conflict { .. } => "conflict",
            Self::Unavailable { .. } => "unavailable",
            Self::Transport(_) => "transport",
            Self::Policy { .. } => "policy",
            Self::Serialization(_) => "validation",
            Self::Internal { .. } => "internal",
        }
    }

    /// Whether a caller should retry this error with backoff.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Unavailable { .. } | Self::Transport(_))
    }

    /// Construct an [`Internal`](Self::Internal) error, generating a
    /// correlation id from a ULID so it can be grepped in logs.
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
            correlation_id: ulid::Ulid::new().to_string(),
        }
    }

    /// Construct an [`Unavailable`](Self::Unavailable) error with a
    /// suggested retry delay.
    pub fn unavailable(reason: impl Into<String>, retry_after_ms: Option<u64>) -> Self {
        Self::Unavailable {
            reason: reason.into(),
            retry_after_ms,
        }
    }

    pub fn not_found(kind: impl Into<String>, id: impl Into<String>) -> Self {
        Self::NotFound {
            kind: kind.into(),
            id: id.into(),
        }
    }

    pub fn validation(reason: impl Into<String>) -> Self {
        Self::Validation {
            reason: reason.into(),
        }
    }

    pub fn conflict(id: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Conflict {
            id: id.into(),
            reason: reason.into(),
        }
    }

    pub fn policy(reason: impl Into<String>) -> Self {
        Self::Policy {
            reason: reason.into(),
        }
    }
}

/// Result type alias used throughout the crate.
pub type CollectiveResult<T> = Result<T, CollectiveError>;
