//! Error types for swarm-bench-core

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::config::ConfigError;
use crate::context::UserId;

/// Core error type
///
/// Per-action failures never show up here; they are recorded as
/// [`ActionError`]s on the event stream and the user keeps running.
#[derive(Error, Debug)]
pub enum BenchError {
    /// Invalid task tree or run configuration, detected before the run starts
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// A builder was finalized without a required field
    #[error("missing required configuration: {0}")]
    MissingConfig(&'static str),

    /// The start hook of a virtual user failed; the user never joined the population
    #[error("user {user_id} failed to start: {source}")]
    UserStartup {
        /// User that was discarded
        user_id: UserId,
        /// Error returned by the start hook
        #[source]
        source: ActionError,
    },

    /// The scheduler cannot continue the run
    #[error("scheduler error: {0}")]
    SchedulerFatal(String),

    /// A control handle was used after the scheduler finished
    #[error("scheduler is no longer running")]
    SchedulerGone,

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BenchError {
    /// Create a missing-configuration error
    pub fn missing_config(field: &'static str) -> Self {
        Self::MissingConfig(field)
    }

    /// Create a fatal scheduler error
    pub fn fatal(message: impl Into<String>) -> Self {
        Self::SchedulerFatal(message.into())
    }
}

/// Result type alias
pub type BenchResult<T> = std::result::Result<T, BenchError>;

/// Failure of a single action (or lifecycle hook) invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ActionError {
    /// The target answered with an unexpected status
    #[error("unexpected status {status}: {message}")]
    Status {
        /// Status code returned by the target
        status: u16,
        /// Short description
        message: String,
    },

    /// The request never produced a response
    #[error("transport error: {0}")]
    Transport(String),

    /// The request did not complete in time
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Any other failure reported by the callback
    #[error("{0}")]
    Failed(String),
}

impl ActionError {
    /// Create a generic failure
    pub fn failed(message: impl Into<String>) -> Self {
        Self::Failed(message.into())
    }

    /// Create a status failure
    pub fn status(status: u16, message: impl Into<String>) -> Self {
        Self::Status {
            status,
            message: message.into(),
        }
    }

    /// Classify the failure for reporting
    pub fn kind(&self) -> ErrorKind {
        match self {
            ActionError::Status { status, .. } => ErrorKind::from_status(*status),
            ActionError::Transport(_) => ErrorKind::ConnectionError,
            ActionError::Timeout(_) => ErrorKind::Timeout,
            ActionError::Failed(_) => ErrorKind::Unknown,
        }
    }
}

/// Result of one action invocation
pub type ActionResult = std::result::Result<(), ActionError>;

/// Failure classification carried on the event stream
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Request timed out
    Timeout,
    /// Target applied rate limiting (429)
    RateLimited,
    /// Credentials rejected (401/403)
    AuthenticationFailed,
    /// Payload rejected as too large (413)
    PayloadTooLarge,
    /// Endpoint not found (404)
    NotFound,
    /// Other client error (4xx)
    ClientError,
    /// Server error (5xx)
    ServerError,
    /// Connection could not be established or was dropped
    ConnectionError,
    /// Unclassified failure
    Unknown,
}

impl ErrorKind {
    /// Map an HTTP-like status code to an error kind
    pub fn from_status(status: u16) -> Self {
        match status {
            401 | 403 => ErrorKind::AuthenticationFailed,
            404 => ErrorKind::NotFound,
            413 => ErrorKind::PayloadTooLarge,
            429 => ErrorKind::RateLimited,
            400..=499 => ErrorKind::ClientError,
            500..=599 => ErrorKind::ServerError,
            _ => ErrorKind::Unknown,
        }
    }
}
