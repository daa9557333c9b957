//! Error types for feedmatch
//!
//! This module provides error handling for the pipeline and its HTTP surface:
//! - A single [`Error`] enum covering configuration, report-service, stream and feed failures
//! - The [`ServiceStage`] that tags every report-service failure with where it happened
//! - HTTP status code mapping for the upload API
//! - Structured error responses with machine-readable error codes

use serde::{Deserialize, Serialize};
use std::time::Duration;
use thiserror::Error;
use utoipa::ToSchema;

/// Result type alias for feedmatch operations
pub type Result<T> = std::result::Result<T, Error>;

/// Which report-service call an error belongs to
///
/// Retry classification depends on the stage: the same status code can be transient
/// for one call and fatal for another.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ServiceStage {
    /// `POST <base_url>` report submission
    Submit,
    /// `GET <report_status_url>/<id>` status query
    Status,
    /// `GET <base_url>/<id>` artifact download
    Fetch,
}

impl std::fmt::Display for ServiceStage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            ServiceStage::Submit => "submit",
            ServiceStage::Status => "status",
            ServiceStage::Fetch => "fetch",
        };
        f.write_str(name)
    }
}

/// Main error type for feedmatch
#[derive(Debug, Error)]
pub enum Error {
    /// Configuration error with context about which setting is invalid
    #[error("configuration error: {message}")]
    Config {
        /// Human-readable error message describing the configuration issue
        message: String,
        /// The configuration key that caused the error (e.g., "CHUNK_SIZE")
        key: Option<String>,
    },

    /// The report service answered with a non-success status
    #[error("report service {stage} request failed with HTTP {status}: {body}")]
    Service {
        /// The call that failed
        stage: ServiceStage,
        /// HTTP status code returned by the service
        status: u16,
        /// Response body, kept for manual diagnosis
        body: String,
    },

    /// The request never produced a response (connect, timeout, reset)
    #[error("report service {stage} request failed: {source}")]
    Transport {
        /// The call that failed
        stage: ServiceStage,
        /// Underlying client error
        #[source]
        source: reqwest::Error,
    },

    /// A job did not reach a terminal status before the poll deadline
    #[error("job {job_id} did not finish within {elapsed:?}")]
    PollTimeout {
        /// The job being polled
        job_id: String,
        /// How long polling ran before giving up
        elapsed: Duration,
    },

    /// The report service reported the job as failed
    #[error("job {job_id} failed with status {status}")]
    JobFailed {
        /// The failed job
        job_id: String,
        /// Raw status value reported by the service
        status: String,
    },

    /// The artifact was not a readable archive or an entry was not valid JSON
    #[error("corrupt artifact for job {job_id}: {reason}")]
    StreamCorruption {
        /// The job whose artifact was being aggregated
        job_id: String,
        /// What was wrong with the stream
        reason: String,
    },

    /// The uploaded feed could not be turned into products
    #[error("invalid feed: {0}")]
    InvalidFeed(String),

    /// A group failed and the run was aborted
    #[error("group {group} failed: {source}")]
    GroupFailed {
        /// Zero-based index of the failed group
        group: usize,
        /// Job id, if submission got that far
        job_id: Option<String>,
        /// The error that failed the group
        #[source]
        source: Box<Error>,
    },

    /// The run was cancelled at a suspension point
    #[error("pipeline run cancelled")]
    Cancelled,

    /// A pipeline run is already in progress
    #[error("a pipeline run is already in progress")]
    Busy,

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Network error outside a report-service call (e.g. building the client)
    #[error("network error: {0}")]
    Network(#[from] reqwest::Error),

    /// Serialization error
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Other error
    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Shorthand for a configuration error tied to one key
    pub fn config(key: &str, message: impl Into<String>) -> Self {
        Error::Config {
            message: message.into(),
            key: Some(key.to_string()),
        }
    }
}

/// API error response format
///
/// # Example JSON Response
///
/// ```json
/// {
///   "error": {
///     "code": "poll_timeout",
///     "message": "job abc did not finish within 1800s",
///     "details": { "job_id": "abc" }
///   }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ApiError {
    /// The error details
    pub error: ErrorDetail,
}

/// Detailed error information for API responses
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorDetail {
    /// Machine-readable error code (e.g., "invalid_feed", "pipeline_busy")
    pub code: String,

    /// Human-readable error message
    pub message: String,

    /// Optional additional context (job id, group index, status code)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl ApiError {
    /// Create a new API error with code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error: ErrorDetail {
                code: code.into(),
                message: message.into(),
                details: None,
            },
        }
    }

    /// Create a "validation error" error
    pub fn validation(message: impl Into<String>) -> Self {
        Self::new("validation_error", message)
    }
}

/// Convert errors to HTTP status codes for API responses
pub trait ToHttpStatus {
    /// Get the HTTP status code for this error
    fn status_code(&self) -> u16;

    /// Get the machine-readable error code
    fn error_code(&self) -> &str;
}

impl ToHttpStatus for Error {
    fn status_code(&self) -> u16 {
        match self {
            Error::Config { .. } => 400,
            Error::InvalidFeed(_) => 422,
            Error::Busy => 409,

            // 502 Bad Gateway - the report service misbehaved
            Error::Service { .. } => 502,
            Error::Transport { .. } => 502,
            Error::Network(_) => 502,
            Error::JobFailed { .. } => 502,
            Error::StreamCorruption { .. } => 502,

            // 504 Gateway Timeout
            Error::PollTimeout { .. } => 504,

            Error::GroupFailed { source, .. } => source.status_code(),

            Error::Cancelled => 503,

            Error::Io(_) => 500,
            Error::Serialization(_) => 500,
            Error::Other(_) => 500,
        }
    }

    fn error_code(&self) -> &str {
        match self {
            Error::Config { .. } => "config_error",
            Error::Service { .. } => "service_error",
            Error::Transport { .. } => "transport_error",
            Error::PollTimeout { .. } => "poll_timeout",
            Error::JobFailed { .. } => "job_failed",
            Error::StreamCorruption { .. } => "stream_corruption",
            Error::InvalidFeed(_) => "invalid_feed",
            Error::GroupFailed { source, .. } => source.error_code(),
            Error::Cancelled => "cancelled",
            Error::Busy => "pipeline_busy",
            Error::Io(_) => "io_error",
            Error::Network(_) => "network_error",
            Error::Serialization(_) => "serialization_error",
            Error::Other(_) => "internal_error",
        }
    }
}

impl From<Error> for ApiError {
    fn from(error: Error) -> Self {
        let code = error.error_code().to_string();
        let message = error.to_string();

        let details = match &error {
            Error::Config { key: Some(key), .. } => Some(serde_json::json!({ "key": key })),
            Error::Service { stage, status, .. } => Some(serde_json::json!({
                "stage": stage,
                "status": status,
            })),
            Error::PollTimeout { job_id, elapsed } => Some(serde_json::json!({
                "job_id": job_id,
                "elapsed_secs": elapsed.as_secs(),
            })),
            Error::JobFailed { job_id, status } => Some(serde_json::json!({
                "job_id": job_id,
                "status": status,
            })),
            Error::StreamCorruption { job_id, .. } => Some(serde_json::json!({
                "job_id": job_id,
            })),
            Error::GroupFailed { group, job_id, .. } => Some(serde_json::json!({
                "group": group,
                "job_id": job_id,
            })),
            _ => None,
        };

        ApiError {
            error: ErrorDetail {
                code,
                message,
                details,
            },
        }
    }
}
