use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use capi_demo_models::{
    ErrorKind, JobArtifacts, JobError, JobFilters, JobRecord, JobStats, JobStatus, LogEntry,
    LogLevel, Pagination, StageError, StageName, StageRecord, StageStatus,
};
use chrono::{DateTime, Utc};
use moosicbox_json_utils::database::ToValue as _;
use switchy_database::{Database, DatabaseValue};
use switchy_database_connection::init_sqlite_rusqlite;

use crate::JobStore;

/// Assumed manual-provisioning baseline used to report time saved in
/// [`JobStats::total_time_saved_seconds`].
const BASELINE_MANUAL_SECONDS: u64 = 4 * 60 * 60;

fn db_err<E: std::fmt::Display>(e: E) -> JobError {
    JobError::Storage(e.to_string())
}

fn json_err(e: serde_json::Error) -> JobError {
    JobError::Storage(format!("serialization error: {e}"))
}

fn job_status_to_str(status: JobStatus) -> &'static str {
    match status {
        JobStatus::Pending => "pending",
        JobStatus::Running => "running",
        JobStatus::Completed => "completed",
        JobStatus::Failed => "failed",
    }
}

fn job_status_from_str(s: &str) -> JobStatus {
    match s {
        "running" => JobStatus::Running,
        "completed" => JobStatus::Completed,
        "failed" => JobStatus::Failed,
        _ => JobStatus::Pending,
    }
}

fn stage_status_to_str(status: StageStatus) -> &'static str {
    match status {
        StageStatus::Pending => "pending",
        StageStatus::Running => "running",
        StageStatus::Completed => "completed",
        StageStatus::Failed => "failed",
        StageStatus::Skipped => "skipped",
    }
}

fn stage_status_from_str(s: &str) -> StageStatus {
    match s {
        "running" => StageStatus::Running,
        "completed" => StageStatus::Completed,
        "failed" => StageStatus::Failed,
        "skipped" => StageStatus::Skipped,
        _ => StageStatus::Pending,
    }
}

fn stage_name_from_str(s: &str) -> Option<StageName> {
    StageName::default_graph()
        .iter()
        .chain(std::iter::once(&StageName::Validation))
        .find(|n| n.as_str() == s)
        .copied()
}

fn log_level_to_str(level: LogLevel) -> &'static str {
    match level {
        LogLevel::Info => "info",
        LogLevel::Warn => "warn",
        LogLevel::Error => "error",
    }
}

fn log_level_from_str(s: &str) -> LogLevel {
    match s {
        "warn" => LogLevel::Warn,
        "error" => LogLevel::Error,
        _ => LogLevel::Info,
    }
}

fn parse_rfc3339(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

/// `SQLite`-backed [`JobStore`].
///
/// Jobs are stored in a single `jobs` row per job, with stage history
/// and log lines in their own child tables so that history/stats
/// queries stay plain SQL instead of JSON-blob scans.
pub struct SqliteJobStore {
    db: Box<dyn Database>,
}

impl SqliteJobStore {
    /// Opens (or creates) the job database at `path` and ensures the
    /// schema exists.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if the database cannot be opened
    /// or schema creation fails.
    pub async fn open(path: &Path) -> Result<Self, JobError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(db_err)?;
        }

        let db = init_sqlite_rusqlite(Some(path)).map_err(db_err)?;
        let store = Self { db };
        store.ensure_schema().await?;
        Ok(store)
    }

    /// Wraps an already-open database handle, e.g. an in-memory
    /// database used by tests.
    ///
    /// # Errors
    ///
    /// Returns [`JobError::Storage`] if schema creation fails.
    pub async fn from_database(db: Box<dyn Database>) -> Result<Self, JobError> {
        let store = Self { db };
        store.ensure_schema().await?;
        Ok(store)
    }

    async fn ensure_schema(&self) -> Result<(), JobError> {
        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS jobs (
                    id               TEXT PRIMARY KEY,
                    customer_url     TEXT NOT NULL,
                    owner            TEXT NOT NULL,
                    created_at       TEXT NOT NULL,
                    completed_at     TEXT,
                    status           TEXT NOT NULL,
                    current_phase    TEXT,
                    overall_progress INTEGER NOT NULL,
                    artifacts_json   TEXT NOT NULL,
                    errors_json      TEXT NOT NULL
                )",
            )
            .await
            .map_err(db_err)?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS stage_records (
                    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    name       TEXT NOT NULL,
                    idx        INTEGER NOT NULL,
                    status     TEXT NOT NULL,
                    start_at   TEXT,
                    end_at     TEXT,
                    error_json TEXT,
                    PRIMARY KEY (job_id, name)
                )",
            )
            .await
            .map_err(db_err)?;

        self.db
            .exec_raw(
                "CREATE TABLE IF NOT EXISTS log_entries (
                    id         INTEGER PRIMARY KEY AUTOINCREMENT,
                    job_id     TEXT NOT NULL REFERENCES jobs(id) ON DELETE CASCADE,
                    sequence   INTEGER NOT NULL,
                    timestamp  TEXT NOT NULL,
                    level      TEXT NOT NULL,
                    source     TEXT NOT NULL,
                    message    TEXT NOT NULL
                )",
            )
            .await
            .map_err(db_err)?;

        self.db
            .exec_raw("CREATE INDEX IF NOT EXISTS idx_jobs_owner_created ON jobs (owner, created_at DESC)")
            .await
            .map_err(db_err)?;
        self.db
            .exec_raw("CREATE INDEX IF NOT EXISTS idx_jobs_owner_status ON jobs (owner, status)")
            .await
            .map_err(db_err)?;
        self.db
            .exec_raw("CREATE INDEX IF NOT EXISTS idx_stage_records_job ON stage_records (job_id, idx)")
            .await
            .map_err(db_err)?;
        self.db
            .exec_raw("CREATE INDEX IF NOT EXISTS idx_log_entries_job ON log_entries (job_id, sequence)")
            .await
            .map_err(db_err)?;

        self.db
            .exec_raw("PRAGMA foreign_keys = ON")
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn load_stages(&self, job_id: &str) -> Result<Vec<StageRecord>, JobError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT name, idx, status, start_at, end_at, error_json
                 FROM stage_records WHERE job_id = $1 ORDER BY idx",
                &[DatabaseValue::String(job_id.to_string())],
            )
            .await
            .map_err(db_err)?;

        let mut stages = Vec::with_capacity(rows.len());
        for row in &rows {
            let name_str: String = row.to_value("name").unwrap_or_default();
            let Some(name) = stage_name_from_str(&name_str) else {
                continue;
            };
            let status_str: String = row.to_value("status").unwrap_or_default();
            let error_json: Option<String> = row.to_value("error_json").unwrap_or(None);
            let start_at: Option<String> = row.to_value("start_at").unwrap_or(None);
            let end_at: Option<String> = row.to_value("end_at").unwrap_or(None);

            stages.push(StageRecord {
                name,
                index: row.to_value::<i64>("idx").unwrap_or(0).try_into().unwrap_or(0),
                status: stage_status_from_str(&status_str),
                start: start_at.as_deref().map(parse_rfc3339),
                end: end_at.as_deref().map(parse_rfc3339),
                error: error_json
                    .map(|j| serde_json::from_str(&j))
                    .transpose()
                    .map_err(json_err)?,
            });
        }
        Ok(stages)
    }

    async fn load_logs(&self, job_id: &str) -> Result<Vec<LogEntry>, JobError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT sequence, timestamp, level, source, message
                 FROM log_entries WHERE job_id = $1 ORDER BY sequence",
                &[DatabaseValue::String(job_id.to_string())],
            )
            .await
            .map_err(db_err)?;

        let mut logs = Vec::with_capacity(rows.len());
        for row in &rows {
            let level_str: String = row.to_value("level").unwrap_or_default();
            let timestamp: String = row.to_value("timestamp").unwrap_or_default();
            logs.push(LogEntry {
                sequence: row.to_value("sequence").unwrap_or(0),
                timestamp: parse_rfc3339(&timestamp),
                level: log_level_from_str(&level_str),
                source: row.to_value("source").unwrap_or_default(),
                message: row.to_value("message").unwrap_or_default(),
            });
        }
        Ok(logs)
    }
}

#[async_trait]
impl JobStore for SqliteJobStore {
    async fn create(&self, job: &JobRecord) -> Result<(), JobError> {
        let artifacts_json = serde_json::to_string(&job.artifacts).map_err(json_err)?;
        let errors_json = serde_json::to_string(&job.errors).map_err(json_err)?;

        self.db
            .exec_raw_params(
                "INSERT INTO jobs
                    (id, customer_url, owner, created_at, completed_at, status,
                     current_phase, overall_progress, artifacts_json, errors_json)
                 VALUES ($1, $2, $3, $4, NULL, $5, $6, $7, $8, $9)",
                &[
                    DatabaseValue::String(job.id.clone()),
                    DatabaseValue::String(job.customer_url.clone()),
                    DatabaseValue::String(job.owner.clone()),
                    DatabaseValue::String(job.created_at.to_rfc3339()),
                    DatabaseValue::String(job_status_to_str(job.status).to_string()),
                    job.current_phase
                        .map_or(DatabaseValue::Null, |p| DatabaseValue::String(p.as_str().to_string())),
                    DatabaseValue::Int32(i32::from(job.overall_progress)),
                    DatabaseValue::String(artifacts_json),
                    DatabaseValue::String(errors_json),
                ],
            )
            .await
            .map_err(db_err)?;

        for stage in &job.stages {
            self.db
                .exec_raw_params(
                    "INSERT INTO stage_records (job_id, name, idx, status, start_at, end_at, error_json)
                     VALUES ($1, $2, $3, $4, NULL, NULL, NULL)",
                    &[
                        DatabaseValue::String(job.id.clone()),
                        DatabaseValue::String(stage.name.as_str().to_string()),
                        DatabaseValue::Int32(i32::try_from(stage.index).unwrap_or(0)),
                        DatabaseValue::String(stage_status_to_str(stage.status).to_string()),
                    ],
                )
                .await
                .map_err(db_err)?;
        }

        Ok(())
    }

    async fn get(&self, id: &str) -> Result<Option<JobRecord>, JobError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT id, customer_url, owner, created_at, status, current_phase,
                        overall_progress, artifacts_json, errors_json
                 FROM jobs WHERE id = $1",
                &[DatabaseValue::String(id.to_string())],
            )
            .await
            .map_err(db_err)?;

        let Some(row) = rows.first() else {
            return Ok(None);
        };

        let artifacts_json: String = row.to_value("artifacts_json").unwrap_or_default();
        let errors_json: String = row.to_value("errors_json").unwrap_or_default();
        let current_phase: Option<String> = row.to_value("current_phase").unwrap_or(None);
        let created_at: String = row.to_value("created_at").unwrap_or_default();
        let status_str: String = row.to_value("status").unwrap_or_default();

        Ok(Some(JobRecord {
            id: row.to_value("id").unwrap_or_default(),
            customer_url: row.to_value("customer_url").unwrap_or_default(),
            owner: row.to_value("owner").unwrap_or_default(),
            created_at: parse_rfc3339(&created_at),
            status: job_status_from_str(&status_str),
            current_phase: current_phase.as_deref().and_then(stage_name_from_str),
            overall_progress: row
                .to_value::<i64>("overall_progress")
                .unwrap_or(0)
                .clamp(0, 100)
                .try_into()
                .unwrap_or(0),
            stages: self.load_stages(id).await?,
            logs: self.load_logs(id).await?,
            artifacts: serde_json::from_str(&artifacts_json).map_err(json_err)?,
            errors: serde_json::from_str(&errors_json).map_err(json_err)?,
        }))
    }

    async fn list(
        &self,
        owner: &str,
        filters: &JobFilters,
        page: Pagination,
    ) -> Result<Vec<JobRecord>, JobError> {
        let mut sql = String::from(
            "SELECT id FROM jobs WHERE owner = $1",
        );
        let mut params = vec![DatabaseValue::String(owner.to_string())];

        if let Some(status) = filters.status {
            sql.push_str(&format!(" AND status = ${}", params.len() + 1));
            params.push(DatabaseValue::String(job_status_to_str(status).to_string()));
        }
        if let Some(search) = &filters.search {
            sql.push_str(&format!(" AND customer_url LIKE ${}", params.len() + 1));
            params.push(DatabaseValue::String(format!("%{search}%")));
        }

        sql.push_str(&format!(
            " ORDER BY created_at DESC LIMIT ${} OFFSET ${}",
            params.len() + 1,
            params.len() + 2
        ));
        params.push(DatabaseValue::Int32(i32::try_from(page.limit).unwrap_or(50)));
        params.push(DatabaseValue::Int32(i32::try_from(page.offset).unwrap_or(0)));

        let rows = self
            .db
            .query_raw_params(&sql, &params)
            .await
            .map_err(db_err)?;

        let mut jobs = Vec::with_capacity(rows.len());
        for row in &rows {
            let id: String = row.to_value("id").unwrap_or_default();
            if let Some(job) = self.get(&id).await? {
                jobs.push(job);
            }
        }
        Ok(jobs)
    }

    async fn delete(&self, id: &str, owner: &str) -> Result<(), JobError> {
        let rows = self
            .db
            .exec_raw_params(
                "DELETE FROM jobs WHERE id = $1 AND owner = $2",
                &[
                    DatabaseValue::String(id.to_string()),
                    DatabaseValue::String(owner.to_string()),
                ],
            )
            .await
            .map_err(db_err)?;

        if rows == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn append_log(
        &self,
        id: &str,
        level: LogLevel,
        source: &str,
        message: &str,
    ) -> Result<(), JobError> {
        let next_seq_rows = self
            .db
            .query_raw_params(
                "SELECT COALESCE(MAX(sequence), -1) + 1 AS next FROM log_entries WHERE job_id = $1",
                &[DatabaseValue::String(id.to_string())],
            )
            .await
            .map_err(db_err)?;
        let next: i64 = next_seq_rows
            .first()
            .map_or(0, |r| r.to_value("next").unwrap_or(0));

        self.db
            .exec_raw_params(
                "INSERT INTO log_entries (job_id, sequence, timestamp, level, source, message)
                 VALUES ($1, $2, $3, $4, $5, $6)",
                &[
                    DatabaseValue::String(id.to_string()),
                    DatabaseValue::Int64(next),
                    DatabaseValue::String(Utc::now().to_rfc3339()),
                    DatabaseValue::String(log_level_to_str(level).to_string()),
                    DatabaseValue::String(source.to_string()),
                    DatabaseValue::String(message.to_string()),
                ],
            )
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn update_stage(
        &self,
        id: &str,
        stage: StageName,
        status: StageStatus,
        error: Option<StageError>,
    ) -> Result<(), JobError> {
        let error_json = error
            .as_ref()
            .map(serde_json::to_string)
            .transpose()
            .map_err(json_err)?;
        let now = Utc::now().to_rfc3339();
        let status_str = stage_status_to_str(status).to_string();

        let rows = match status {
            StageStatus::Running => self
                .db
                .exec_raw_params(
                    "UPDATE stage_records SET status = $1, start_at = COALESCE(start_at, $2)
                     WHERE job_id = $3 AND name = $4",
                    &[
                        DatabaseValue::String(status_str),
                        DatabaseValue::String(now),
                        DatabaseValue::String(id.to_string()),
                        DatabaseValue::String(stage.as_str().to_string()),
                    ],
                )
                .await,
            StageStatus::Completed | StageStatus::Failed => self
                .db
                .exec_raw_params(
                    "UPDATE stage_records SET status = $1, end_at = $2, error_json = $3
                     WHERE job_id = $4 AND name = $5",
                    &[
                        DatabaseValue::String(status_str),
                        DatabaseValue::String(now),
                        error_json.clone().map_or(DatabaseValue::Null, DatabaseValue::String),
                        DatabaseValue::String(id.to_string()),
                        DatabaseValue::String(stage.as_str().to_string()),
                    ],
                )
                .await,
            StageStatus::Pending | StageStatus::Skipped => self
                .db
                .exec_raw_params(
                    "UPDATE stage_records SET status = $1 WHERE job_id = $2 AND name = $3",
                    &[
                        DatabaseValue::String(status_str),
                        DatabaseValue::String(id.to_string()),
                        DatabaseValue::String(stage.as_str().to_string()),
                    ],
                )
                .await,
        }
        .map_err(db_err)?;

        if rows == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }

        if let Some(error) = error {
            self.push_error(id, error).await?;
        }

        Ok(())
    }

    async fn set_progress(
        &self,
        id: &str,
        progress: u8,
        phase: Option<StageName>,
    ) -> Result<(), JobError> {
        let job = self.get(id).await?.ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Err(JobError::Conflict(id.to_string()));
        }

        self.db
            .exec_raw_params(
                "UPDATE jobs SET overall_progress = $1, current_phase = $2 WHERE id = $3",
                &[
                    DatabaseValue::Int32(i32::from(progress)),
                    phase.map_or(DatabaseValue::Null, |p| DatabaseValue::String(p.as_str().to_string())),
                    DatabaseValue::String(id.to_string()),
                ],
            )
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn set_status(&self, id: &str, status: JobStatus) -> Result<(), JobError> {
        let job = self.get(id).await?.ok_or_else(|| JobError::NotFound(id.to_string()))?;
        if job.status.is_terminal() {
            return Err(JobError::Conflict(id.to_string()));
        }

        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());

        self.db
            .exec_raw_params(
                "UPDATE jobs SET status = $1, completed_at = $2 WHERE id = $3",
                &[
                    DatabaseValue::String(job_status_to_str(status).to_string()),
                    completed_at.map_or(DatabaseValue::Null, DatabaseValue::String),
                    DatabaseValue::String(id.to_string()),
                ],
            )
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn update_artifacts(&self, id: &str, artifacts: &JobArtifacts) -> Result<(), JobError> {
        let json = serde_json::to_string(artifacts).map_err(json_err)?;
        let rows = self
            .db
            .exec_raw_params(
                "UPDATE jobs SET artifacts_json = $1 WHERE id = $2",
                &[DatabaseValue::String(json), DatabaseValue::String(id.to_string())],
            )
            .await
            .map_err(db_err)?;

        if rows == 0 {
            return Err(JobError::NotFound(id.to_string()));
        }
        Ok(())
    }

    async fn push_error(&self, id: &str, error: StageError) -> Result<(), JobError> {
        let job = self.get(id).await?.ok_or_else(|| JobError::NotFound(id.to_string()))?;
        let mut errors = job.errors;
        errors.push(error);
        let json = serde_json::to_string(&errors).map_err(json_err)?;

        self.db
            .exec_raw_params(
                "UPDATE jobs SET errors_json = $1 WHERE id = $2",
                &[DatabaseValue::String(json), DatabaseValue::String(id.to_string())],
            )
            .await
            .map_err(db_err)?;

        Ok(())
    }

    async fn stats(&self, owner: &str) -> Result<JobStats, JobError> {
        let rows = self
            .db
            .query_raw_params(
                "SELECT status, created_at, completed_at FROM jobs WHERE owner = $1",
                &[DatabaseValue::String(owner.to_string())],
            )
            .await
            .map_err(db_err)?;

        let mut stats = JobStats::default();
        let mut completed_seconds_total = 0.0_f64;

        for row in &rows {
            stats.total += 1;
            let status_str: String = row.to_value("status").unwrap_or_default();
            match job_status_from_str(&status_str) {
                JobStatus::Completed => {
                    stats.completed += 1;
                    let created_at: String = row.to_value("created_at").unwrap_or_default();
                    let completed_at: Option<String> = row.to_value("completed_at").unwrap_or(None);
                    if let Some(completed_at) = completed_at {
                        let delta = parse_rfc3339(&completed_at) - parse_rfc3339(&created_at);
                        completed_seconds_total += delta.num_seconds().max(0) as f64;
                    }
                }
                JobStatus::Failed => stats.failed += 1,
                JobStatus::Running => stats.running += 1,
                JobStatus::Pending => {}
            }
        }

        if stats.total > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                stats.success_rate = f64::from(u32::try_from(stats.completed).unwrap_or(0))
                    / f64::from(u32::try_from(stats.total).unwrap_or(1));
            }
        }
        if stats.completed > 0 {
            #[allow(clippy::cast_precision_loss)]
            {
                stats.avg_completion_seconds =
                    completed_seconds_total / f64::from(u32::try_from(stats.completed).unwrap_or(1));
            }
        }
        stats.total_time_saved_seconds = stats.completed * BASELINE_MANUAL_SECONDS;

        Ok(stats)
    }
}

/// Convenience constructor mirroring [`SqliteJobStore::open`] but
/// wrapped for callers that want an `Arc` directly (the server and
/// orchestrator crates share a single store instance).
///
/// # Errors
///
/// Returns [`JobError::Storage`] if the database cannot be opened.
pub async fn open_shared(path: &Path) -> Result<Arc<dyn JobStore>, JobError> {
    Ok(Arc::new(SqliteJobStore::open(path).await?))
}

#[cfg(test)]
mod tests {
    use capi_demo_models::{JobRecord, StageName};
    use switchy_database_connection::init_sqlite_rusqlite;

    use super::*;

    async fn test_store() -> SqliteJobStore {
        let db = init_sqlite_rusqlite(None).expect("in-memory sqlite");
        SqliteJobStore::from_database(db).await.expect("schema")
    }

    #[tokio::test]
    async fn create_then_get_round_trips_stage_graph() {
        let store = test_store().await;
        let job = JobRecord::new(
            "job-1".into(),
            "https://example.com".into(),
            "owner-1".into(),
            Utc::now(),
        );

        store.create(&job).await.unwrap();
        let loaded = store.get("job-1").await.unwrap().unwrap();

        assert_eq!(loaded.id, "job-1");
        assert_eq!(loaded.stages.len(), StageName::default_graph().len());
        assert_eq!(loaded.status, JobStatus::Pending);
    }

    #[tokio::test]
    async fn get_owned_rejects_wrong_owner() {
        let store = test_store().await;
        let job = JobRecord::new("job-2".into(), "https://a.test".into(), "alice".into(), Utc::now());
        store.create(&job).await.unwrap();

        let err = store.get_owned("job-2", "bob").await.unwrap_err();
        assert!(matches!(err, JobError::Unauthorized(_)));
    }

    #[tokio::test]
    async fn set_status_rejects_leaving_terminal_state() {
        let store = test_store().await;
        let job = JobRecord::new("job-3".into(), "https://a.test".into(), "alice".into(), Utc::now());
        store.create(&job).await.unwrap();

        store.set_status("job-3", JobStatus::Running).await.unwrap();
        store.set_status("job-3", JobStatus::Completed).await.unwrap();

        let err = store.set_status("job-3", JobStatus::Running).await.unwrap_err();
        assert!(matches!(err, JobError::Conflict(_)));
    }

    #[tokio::test]
    async fn append_log_assigns_monotone_sequence() {
        let store = test_store().await;
        let job = JobRecord::new("job-4".into(), "https://a.test".into(), "alice".into(), Utc::now());
        store.create(&job).await.unwrap();

        store.append_log("job-4", LogLevel::Info, "research", "starting").await.unwrap();
        store.append_log("job-4", LogLevel::Info, "research", "done").await.unwrap();

        let loaded = store.get("job-4").await.unwrap().unwrap();
        assert_eq!(loaded.logs.len(), 2);
        assert_eq!(loaded.logs[0].sequence, 0);
        assert_eq!(loaded.logs[1].sequence, 1);
    }

    #[tokio::test]
    async fn update_stage_records_error_and_job_error_list() {
        let store = test_store().await;
        let job = JobRecord::new("job-5".into(), "https://a.test".into(), "alice".into(), Utc::now());
        store.create(&job).await.unwrap();

        let error = StageError {
            stage: StageName::Research,
            kind: ErrorKind::Upstream,
            message: "timed out".into(),
        };
        store
            .update_stage("job-5", StageName::Research, StageStatus::Failed, Some(error))
            .await
            .unwrap();

        let loaded = store.get("job-5").await.unwrap().unwrap();
        let research = loaded
            .stages
            .iter()
            .find(|s| s.name == StageName::Research)
            .unwrap();
        assert_eq!(research.status, StageStatus::Failed);
        assert!(research.error.is_some());
        assert_eq!(loaded.errors.len(), 1);
    }

    #[tokio::test]
    async fn stats_counts_by_status() {
        let store = test_store().await;
        for (id, status) in [
            ("j1", JobStatus::Completed),
            ("j2", JobStatus::Failed),
            ("j3", JobStatus::Running),
        ] {
            let job = JobRecord::new(id.into(), "https://a.test".into(), "alice".into(), Utc::now());
            store.create(&job).await.unwrap();
            if status != JobStatus::Pending {
                store.set_status(id, JobStatus::Running).await.unwrap();
            }
            if status == JobStatus::Completed || status == JobStatus::Failed {
                store.set_status(id, status).await.unwrap();
            }
        }

        let stats = store.stats("alice").await.unwrap();
        assert_eq!(stats.total, 3);
        assert_eq!(stats.completed, 1);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.running, 1);
    }
}
