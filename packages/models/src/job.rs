//! Job, stage, and log-entry models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::pipeline::{DemoStory, GoldenQuery, Schema};

/// Errors returned by [`JobStore`](../capi_demo_db/trait.JobStore.html)
/// operations.
#[derive(Debug, Error)]
pub enum JobError {
    /// No job exists with the given id.
    #[error("job not found: {0}")]
    NotFound(String),

    /// The caller does not own the job.
    #[error("owner mismatch for job {0}")]
    Unauthorized(String),

    /// An operation attempted to mutate a terminal job.
    #[error("job {0} is already in a terminal state")]
    Conflict(String),

    /// The underlying storage backend failed.
    #[error("storage error: {0}")]
    Storage(String),
}

/// Lifecycle status of a [`JobRecord`]. Transitions are monotone:
/// `Pending -> Running -> {Completed | Failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    /// Created, not yet picked up by the orchestrator.
    Pending,
    /// The orchestrator is actively running stages.
    Running,
    /// All stages completed and artifacts were populated.
    Completed,
    /// A stage failed and the pipeline stopped.
    Failed,
}

impl JobStatus {
    /// Terminal statuses accept no further field mutation except admin
    /// delete.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

/// The seven stages of the provisioning pipeline, in graph order.
///
/// `Validation` is retained in the enum (it is addressable by
/// `update_stage`/history) but is excluded from the default stage graph
/// built by the orchestrator; it only runs when explicitly requested.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageName {
    /// Web crawl + identity/domain summarization.
    Research,
    /// Narrative design + golden-query generation.
    DemoStory,
    /// Schema design.
    DataModeling,
    /// Per-table synthetic NDJSON generation.
    SyntheticData,
    /// BigQuery dataset/table/load + CAPI agent creation.
    Infrastructure,
    /// CAPI published-context YAML synthesis.
    CapiInstructions,
    /// Golden-query-through-CAPI validation. Disabled by default.
    Validation,
}

impl StageName {
    /// The default stage graph, in execution order, with the validator
    /// excluded unless explicitly requested.
    #[must_use]
    pub const fn default_graph() -> &'static [Self] {
        &[
            Self::Research,
            Self::DemoStory,
            Self::DataModeling,
            Self::SyntheticData,
            Self::Infrastructure,
            Self::CapiInstructions,
        ]
    }

    /// A human-readable name, used for log sources and API responses.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Research => "research",
            Self::DemoStory => "demo_story",
            Self::DataModeling => "data_modeling",
            Self::SyntheticData => "synthetic_data",
            Self::Infrastructure => "infrastructure",
            Self::CapiInstructions => "capi_instructions",
            Self::Validation => "validation",
        }
    }
}

/// Status of a single [`StageRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageStatus {
    /// Not yet started.
    Pending,
    /// Currently executing. At most one stage per job may be `Running`.
    Running,
    /// Finished without error.
    Completed,
    /// Finished with an error; the job is terminal.
    Failed,
    /// Skipped (the validator, when disabled, is recorded this way).
    Skipped,
}

/// One row of a job's per-stage timeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRecord {
    /// The stage this record describes.
    pub name: StageName,
    /// 1-based position in the graph.
    pub index: u32,
    /// Current status.
    pub status: StageStatus,
    /// When the stage started running, if it has.
    pub start: Option<DateTime<Utc>>,
    /// When the stage finished, if it has.
    pub end: Option<DateTime<Utc>>,
    /// A short, operator-actionable error kind + message, if failed.
    pub error: Option<StageError>,
}

impl StageRecord {
    /// Creates a fresh, not-yet-started stage record.
    #[must_use]
    pub const fn pending(name: StageName, index: u32) -> Self {
        Self {
            name,
            index,
            status: StageStatus::Pending,
            start: None,
            end: None,
            error: None,
        }
    }
}

/// The kind of error that terminated a stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad input (unreachable URL, zero usable pages).
    Input,
    /// Transient upstream failure that exhausted its retries.
    Upstream,
    /// A generated schema violated a hard constraint.
    SchemaViolation,
    /// Synthetic-data generation violated a hard constraint.
    DataGeneration,
    /// BigQuery/CAPI infrastructure provisioning failed.
    Infrastructure,
    /// A stage or job deadline was exceeded.
    Timeout,
    /// A runtime safeguard refused to proceed.
    Safeguard,
}

/// A structured, user-visible stage failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageError {
    /// The stage that failed.
    pub stage: StageName,
    /// A short, machine-matchable kind.
    pub kind: ErrorKind,
    /// An operator-actionable human message.
    pub message: String,
}

/// Severity of a [`LogEntry`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    /// Informational progress message.
    Info,
    /// A recoverable problem (e.g. a retry).
    Warn,
    /// A terminal problem.
    Error,
}

/// A single append-only log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// Monotone sequence number within the job (insertion order).
    pub sequence: i64,
    /// Wall-clock timestamp.
    pub timestamp: DateTime<Utc>,
    /// Severity.
    pub level: LogLevel,
    /// The stage name, or `"system"` for entries emitted by the stream hub.
    pub source: String,
    /// The message body.
    pub message: String,
}

/// Final artifacts populated on a job once the relevant stage completes.
///
/// Populated iff `status = Completed` OR at least the infrastructure
/// stage completed (partial success).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct JobArtifacts {
    /// The BigQuery dataset id, if the infrastructure stage completed.
    pub dataset_id: Option<String>,
    /// The CAPI agent id, if agent creation succeeded.
    pub agent_id: Option<String>,
    /// The generated demo story, if the demo-story stage completed.
    pub demo_story: Option<DemoStory>,
    /// The curated golden queries (mirrors `demo_story.golden_queries`,
    /// kept as its own field so partial-success snapshots can surface it
    /// even before the infrastructure stage runs).
    pub golden_queries: Vec<GoldenQuery>,
    /// The generated schema, if the data-modeling stage completed.
    pub schema: Option<Schema>,
    /// The published CAPI system-instruction YAML document.
    pub yaml_instructions: Option<String>,
    /// Path to a generated presentation/report artifact, if any.
    pub report_path: Option<String>,
}

/// The root entity: one customer provisioning run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    /// Opaque unique job id.
    pub id: String,
    /// The customer URL that was submitted.
    pub customer_url: String,
    /// Opaque tenancy identity; the filter for history/stats/delete.
    pub owner: String,
    /// When the job was created.
    pub created_at: DateTime<Utc>,
    /// Current lifecycle status.
    pub status: JobStatus,
    /// Name of the stage currently running, if any.
    pub current_phase: Option<StageName>,
    /// Overall progress, 0-100, non-decreasing while running.
    pub overall_progress: u8,
    /// Per-stage timeline, in graph order.
    pub stages: Vec<StageRecord>,
    /// Append-only log buffer, in insertion order.
    pub logs: Vec<LogEntry>,
    /// Final artifacts, populated per the partial-success rule above.
    pub artifacts: JobArtifacts,
    /// Ordered list of errors encountered.
    pub errors: Vec<StageError>,
}

impl JobRecord {
    /// Creates a new `Pending` job with an empty stage graph matching
    /// [`StageName::default_graph`].
    #[must_use]
    pub fn new(id: String, customer_url: String, owner: String, now: DateTime<Utc>) -> Self {
        let stages = StageName::default_graph()
            .iter()
            .enumerate()
            .map(|(i, &name)| {
                #[allow(clippy::cast_possible_truncation)]
                StageRecord::pending(name, (i + 1) as u32)
            })
            .collect();

        Self {
            id,
            customer_url,
            owner,
            created_at: now,
            status: JobStatus::Pending,
            current_phase: None,
            overall_progress: 0,
            stages,
            logs: Vec::new(),
            artifacts: JobArtifacts::default(),
            errors: Vec::new(),
        }
    }
}

/// Filter criteria for [`JobStore::list`](../capi_demo_db/trait.JobStore.html).
#[derive(Debug, Clone, Default)]
pub struct JobFilters {
    /// Exact status match.
    pub status: Option<JobStatus>,
    /// Substring match against `customer_url`.
    pub search: Option<String>,
}

/// Pagination parameters shared by list-style queries.
#[derive(Debug, Clone, Copy)]
pub struct Pagination {
    /// Maximum rows to return.
    pub limit: u32,
    /// Rows to skip.
    pub offset: u32,
}

impl Default for Pagination {
    fn default() -> Self {
        Self {
            limit: 50,
            offset: 0,
        }
    }
}

/// Owner-scoped aggregate statistics.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct JobStats {
    /// Total jobs owned.
    pub total: u64,
    /// Jobs that reached `Completed`.
    pub completed: u64,
    /// Jobs that reached `Failed`.
    pub failed: u64,
    /// Jobs currently `Running`.
    pub running: u64,
    /// `completed / total`, or 0.0 when `total == 0`.
    pub success_rate: f64,
    /// Mean wall-clock seconds for completed jobs.
    pub avg_completion_seconds: f64,
    /// `completed * baseline_manual_seconds`.
    pub total_time_saved_seconds: u64,
}
