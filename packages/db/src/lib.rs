#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Job persistence backed by `SQLite`.
//!
//! Stores jobs in `data/capi_demo.db` so that in-flight and historical
//! provisioning runs survive server restarts. Stage records and log
//! entries are kept in their own normalized child tables rather than as
//! JSON blobs, so history and stats queries stay plain SQL. Uses
//! `switchy_database` for all database operations, the same pattern the
//! conversation-history store uses.

mod sqlite_store;

use async_trait::async_trait;
use capi_demo_models::{
    JobError, JobFilters, JobRecord, JobStats, LogLevel, Pagination, StageError, StageName,
    StageStatus,
};

pub use sqlite_store::{open_shared, SqliteJobStore};

/// Default path for the job database.
pub const DEFAULT_DB_PATH: &str = "data/capi_demo.db";

/// Storage abstraction over job records, implemented today by
/// [`SqliteJobStore`]. Kept as a trait so the orchestrator and server
/// crates depend on a seam rather than a concrete backend.
#[async_trait]
pub trait JobStore: Send + Sync {
    /// Persists a newly created job.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if the insert fails.
    async fn create(&self, job: &JobRecord) -> Result<(), JobError>;

    /// Fetches a job by id, regardless of owner.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if the query fails.
    async fn get(&self, id: &str) -> Result<Option<JobRecord>, JobError>;

    /// Fetches a job by id, enforcing ownership.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if no such job exists, or
    /// [`JobError::Unauthorized`] if `owner` does not match.
    async fn get_owned(&self, id: &str, owner: &str) -> Result<JobRecord, JobError> {
        match self.get(id).await? {
            None => Err(JobError::NotFound(id.to_string())),
            Some(job) if job.owner == owner => Ok(job),
            Some(_) => Err(JobError::Unauthorized(id.to_string())),
        }
    }

    /// Lists jobs for `owner` matching `filters`, most recent first.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if the query fails.
    async fn list(
        &self,
        owner: &str,
        filters: &JobFilters,
        page: Pagination,
    ) -> Result<Vec<JobRecord>, JobError>;

    /// Deletes a job owned by `owner`.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if no such job exists for that owner.
    async fn delete(&self, id: &str, owner: &str) -> Result<(), JobError>;

    /// Appends one log line, assigning it the next sequence number.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if the insert fails.
    async fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        source: &str,
        message: &str,
    ) -> Result<(), JobError>;

    /// Updates one stage's status, timestamps, and optional error.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if the job does not exist.
    async fn update_stage(
        &self,
        id: &str,
        stage: StageName,
        status: StageStatus,
        error: Option<StageError>,
    ) -> Result<(), JobError>;

    /// Updates the job's overall progress and currently running phase.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if the job does not exist, or
    /// [`JobError::Conflict`] if the job is already terminal.
    async fn set_progress(
        &self,
        id: &str,
        progress: u8,
        phase: Option<StageName>,
    ) -> Result<(), JobError>;

    /// Transitions the job's lifecycle status.
    ///
    /// Enforces the monotone `Pending -> Running -> {Completed | Failed}`
    /// invariant at the storage layer: attempting to leave a terminal
    /// status is a no-op that returns [`JobError::Conflict`].
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] or [`JobError::Conflict`].
    async fn set_status(&self, id: &str, status: capi_demo_models::JobStatus)
    -> Result<(), JobError>;

    /// Overwrites the job's artifact bundle.
    ///
    /// Callers read the current artifacts via [`JobStore::get`], mutate
    /// the relevant field, and write the whole bundle back; artifacts
    /// are populated incrementally as stages complete.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if the job does not exist.
    async fn update_artifacts(
        &self,
        id: &str,
        artifacts: &capi_demo_models::JobArtifacts,
    ) -> Result<(), JobError>;

    /// Appends a structured error to the job's error list.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::NotFound`] if the job does not exist.
    async fn push_error(&self, id: &str, error: StageError) -> Result<(), JobError>;

    /// Computes owner-scoped aggregate statistics.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if the query fails.
    async fn stats(&self, owner: &str) -> Result<JobStats, JobError>;
}
