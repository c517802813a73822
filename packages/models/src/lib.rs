#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Shared data model for the provisioning pipeline.
//!
//! Defines the [`Job`] root entity and the transient [`PipelineState`]
//! threaded through the orchestrator's stage graph. These types double as
//! wire DTOs: the server crate serializes them directly rather than
//! maintaining a separate API-model layer, since the job snapshot returned
//! over HTTP is close to the persisted shape.

pub mod job;
pub mod pipeline;
pub mod tier;

pub use job::{
    ErrorKind, JobArtifacts, JobError, JobFilters, JobRecord, JobStats, JobStatus, LogEntry,
    LogLevel, Pagination, StageError, StageName, StageRecord, StageStatus,
};
pub use pipeline::{
    CapiAgentRef, Complexity, DemoStory, Field, FieldMode, FieldType, ForeignKeyRef,
    GoldenQuery, GoldenQueryResult, ProvisionedDataset, ResearchOutput, Schema, SchemaError,
    SyntheticDataBatch, Table, TableStats, ValidationResult,
};
pub use tier::ModelTier;
