//! Core types for feedmatch

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use utoipa::ToSchema;

/// A product parsed from the uploaded feed
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Product {
    /// Merchant product id
    pub id: String,
    /// Product title
    pub title: String,
    /// Listed price with the currency stripped
    pub approximate_price: f64,
    /// Markup threshold used by the matching service
    pub price_difference: f64,
    /// Optional free-form note
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
}

/// Body of one report submission
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReportRequest {
    /// The group of products to match
    pub products: Vec<Product>,
    /// Sources the service should search
    pub sources: Vec<String>,
    /// Whether the service matches with AI
    pub match_by_ai: bool,
    /// Optional note attached to the report
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub note: Option<String>,
    /// Optional URL the service calls on status changes
    #[serde(
        default,
        rename = "reportStatusCallbackUrl",
        skip_serializing_if = "Option::is_none"
    )]
    pub callback_url: Option<String>,
}

/// Status of a report job as reported by the service
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum JobStatus {
    /// Accepted, not started
    Submitted,
    /// In progress
    Processing,
    /// Finished, artifact available
    Fulfilled,
    /// Finished and archived, artifact available
    Archived,
    /// Finished without a result
    Failed,
    /// A value this client does not recognise
    Unknown(String),
}

impl JobStatus {
    /// Parse a raw `reportStatus` value (case-insensitive)
    pub fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "submitted" => JobStatus::Submitted,
            "processing" => JobStatus::Processing,
            "fulfilled" => JobStatus::Fulfilled,
            "archived" => JobStatus::Archived,
            "failed" => JobStatus::Failed,
            _ => JobStatus::Unknown(raw.to_string()),
        }
    }

    /// Terminal success: the artifact can be fetched
    pub fn is_success(&self) -> bool {
        matches!(self, JobStatus::Fulfilled | JobStatus::Archived)
    }

    /// Terminal failure
    pub fn is_failure(&self) -> bool {
        matches!(self, JobStatus::Failed)
    }
}

impl std::fmt::Display for JobStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            JobStatus::Submitted => f.write_str("Submitted"),
            JobStatus::Processing => f.write_str("Processing"),
            JobStatus::Fulfilled => f.write_str("Fulfilled"),
            JobStatus::Archived => f.write_str("Archived"),
            JobStatus::Failed => f.write_str("Failed"),
            JobStatus::Unknown(raw) => f.write_str(raw),
        }
    }
}

/// A submitted report job
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobHandle {
    /// Service-assigned job id
    pub id: String,
    /// Last observed status
    pub status: JobStatus,
}

impl JobHandle {
    /// A freshly submitted job
    pub fn submitted(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            status: JobStatus::Submitted,
        }
    }
}

/// Stage of a group inside one pipeline run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum GroupState {
    /// Split from the feed, not yet sent
    Chunked,
    /// Report request in flight
    Submitting,
    /// Waiting for the job to finish
    Polling,
    /// Downloading the artifact
    Fetching,
    /// Streaming records into the sink
    Aggregating,
    /// All records appended
    Done,
    /// Rolled back after a fatal error
    Failed,
}

impl std::fmt::Display for GroupState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            GroupState::Chunked => "chunked",
            GroupState::Submitting => "submitting",
            GroupState::Polling => "polling",
            GroupState::Fetching => "fetching",
            GroupState::Aggregating => "aggregating",
            GroupState::Done => "done",
            GroupState::Failed => "failed",
        };
        f.write_str(name)
    }
}

/// A group skipped under the `skip` failure policy
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct GroupFailure {
    /// Zero-based group index
    pub index: usize,
    /// Job id, if submission succeeded
    pub job_id: Option<String>,
    /// The error that failed the group
    pub error: String,
}

/// Summary of one pipeline run
#[derive(Clone, Debug, Serialize, Deserialize, ToSchema)]
pub struct RunReport {
    /// Number of groups the feed was split into
    pub groups_total: usize,
    /// Groups whose records made it into the output
    pub groups_completed: usize,
    /// Groups skipped after a fatal error
    pub failed_groups: Vec<GroupFailure>,
    /// Records in the sealed output document
    pub records: u64,
    /// Where the output document was published, if written to a file
    #[schema(value_type = Option<String>)]
    pub output_path: Option<PathBuf>,
    /// When the run started
    pub started_at: DateTime<Utc>,
    /// When the output was sealed
    pub finished_at: DateTime<Utc>,
}
