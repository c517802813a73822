#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! The stage-graph orchestrator and its progress stream hub.
//!
//! [`Orchestrator::start`] spawns one `tokio::task` per job and returns
//! immediately; the task runs the six-stage graph in order (the
//! validator is excluded unless explicitly requested), persisting stage
//! transitions and log lines through [`JobStore`] and mirroring every
//! update into the [`StreamHub`] for SSE subscribers.

pub mod safeguard;
pub mod stream;

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use capi_demo_agents::demo_story::DemoStoryConfig;
use capi_demo_agents::infrastructure::PartialFailure;
use capi_demo_agents::{AgentError, ProgressReporter};
use capi_demo_db::JobStore;
use capi_demo_llm::bigquery::BigQueryClient;
use capi_demo_llm::capi::CapiClient;
use capi_demo_llm::crawler::CrawlLimits;
use capi_demo_llm::providers::LlmProvider;
use capi_demo_llm::LlmError;
use capi_demo_models::{
    CapiAgentRef, ErrorKind, JobArtifacts, JobStatus, LogLevel, ModelTier, ProvisionedDataset,
    StageError, StageName, StageStatus,
};
use thiserror::Error;
use tokio_util::sync::CancellationToken;

pub use safeguard::SafeguardError;
pub use stream::{StreamEvent, StreamHub};

/// Errors raised constructing an [`Orchestrator`].
#[derive(Debug, Error)]
pub enum OrchestratorError {
    /// The safeguard rejected the bound synthetic-data generator.
    #[error(transparent)]
    Safeguard(#[from] SafeguardError),
    /// A required client could not be configured from the environment.
    #[error("configuration error: {0}")]
    Config(#[from] LlmError),
}

/// Per-stage deadline: the two LLM-heavy narrative/YAML
/// stages get the longer budget, everything else gets the shorter one.
const fn stage_timeout(stage: StageName) -> Duration {
    match stage {
        StageName::DemoStory | StageName::CapiInstructions => Duration::from_secs(10 * 60),
        _ => Duration::from_secs(5 * 60),
    }
}

/// Overall job deadline, independent of any single stage's timeout: a job
/// stuck alternating between slow-but-not-timed-out stages still gets
/// killed eventually.
const OVERALL_JOB_DEADLINE: Duration = Duration::from_secs(60 * 60);

/// Reads `DEMO_NUM_QUERIES` from the environment and spreads it evenly
/// across the four complexity buckets, falling back to
/// [`DemoStoryConfig::default`] when unset or unparsable.
fn demo_story_config_from_env() -> DemoStoryConfig {
    std::env::var("DEMO_NUM_QUERIES")
        .ok()
        .and_then(|v| v.parse().ok())
        .map_or_else(DemoStoryConfig::default, DemoStoryConfig::even_mix)
}

fn map_error_kind(err: &AgentError) -> ErrorKind {
    match err {
        AgentError::Llm(LlmError::Crawl(_)) => ErrorKind::Input,
        AgentError::Llm(_) | AgentError::MalformedOutput(_) => ErrorKind::Upstream,
        AgentError::Schema(_) => ErrorKind::SchemaViolation,
        AgentError::DataGeneration(_) => ErrorKind::DataGeneration,
        AgentError::Infrastructure(_) => ErrorKind::Infrastructure,
        AgentError::Safeguard(_) => ErrorKind::Safeguard,
    }
}

/// Runs the six/seven-stage provisioning pipeline for jobs created
/// through [`JobStore`].
pub struct Orchestrator {
    db: Arc<dyn JobStore>,
    llm_fast: Arc<dyn LlmProvider>,
    llm_research: Arc<dyn LlmProvider>,
    llm_demo_story: Arc<dyn LlmProvider>,
    llm_data_modeling: Arc<dyn LlmProvider>,
    llm_capi_instructions: Arc<dyn LlmProvider>,
    bq: BigQueryClient,
    capi: CapiClient,
    data_dir: PathBuf,
    stream: Arc<StreamHub>,
    crawl_limits: CrawlLimits,
    demo_story_config: DemoStoryConfig,
    enable_validation: bool,
    /// Cancellation tokens for jobs currently running under [`Self::start`],
    /// keyed by job id. Removed once the job's task finishes, whether it
    /// completed, failed, or was cancelled.
    cancellations: Mutex<HashMap<String, CancellationToken>>,
}

impl Orchestrator {
    /// Constructs an orchestrator.
    ///
    /// `synthetic_data_generator_name` must be
    /// [`capi_demo_agents::synthetic_data::GENERATOR_MARKER`]; any other
    /// value (in particular the forbidden one) is rejected immediately
    /// unless `FORCE_LLM_DATA_GENERATION` is explicitly disabled.
    ///
    /// `llm_fast` backs the synthetic-data stage, which has no per-agent
    /// model override in the configuration surface. The narrative/schema
    /// stages (research, demo story, data modeling, CAPI instructions)
    /// each get their own provider, resolved through
    /// `{AGENT}_AGENT_MODEL` environment overrides via
    /// [`capi_demo_llm::create_provider_for_agent`].
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError::Safeguard`] if the generator name is
    /// forbidden, or [`OrchestratorError::Config`] if the `BigQuery`/CAPI
    /// clients or any LLM provider cannot be configured from the
    /// environment.
    pub async fn new(
        db: Arc<dyn JobStore>,
        llm_fast: Arc<dyn LlmProvider>,
        gcp_project_id: &str,
        data_dir: PathBuf,
        stream: Arc<StreamHub>,
        synthetic_data_generator_name: &str,
    ) -> Result<Arc<Self>, OrchestratorError> {
        safeguard::check_generator_name(
            synthetic_data_generator_name,
            safeguard::force_llm_data_generation_from_env(),
        )?;

        let bq = BigQueryClient::from_env(gcp_project_id)?;
        let capi = CapiClient::from_env()?;

        let llm_research: Arc<dyn LlmProvider> = Arc::from(
            capi_demo_llm::create_provider_for_agent("RESEARCH_AGENT_MODEL", ModelTier::Fast).await?,
        );
        let llm_demo_story: Arc<dyn LlmProvider> = Arc::from(
            capi_demo_llm::create_provider_for_agent("DEMO_STORY_AGENT_MODEL", ModelTier::Strong)
                .await?,
        );
        let llm_data_modeling: Arc<dyn LlmProvider> = Arc::from(
            capi_demo_llm::create_provider_for_agent("DATA_MODELING_AGENT_MODEL", ModelTier::Strong)
                .await?,
        );
        let llm_capi_instructions: Arc<dyn LlmProvider> = Arc::from(
            capi_demo_llm::create_provider_for_agent("CAPI_AGENT_MODEL", ModelTier::Strong).await?,
        );

        Ok(Arc::new(Self {
            db,
            llm_fast,
            llm_research,
            llm_demo_story,
            llm_data_modeling,
            llm_capi_instructions,
            bq,
            capi,
            data_dir,
            stream,
            crawl_limits: CrawlLimits::from_env(),
            demo_story_config: demo_story_config_from_env(),
            enable_validation: std::env::var("CAPI_DEMO_ENABLE_VALIDATION")
                .is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true")),
            cancellations: Mutex::new(HashMap::new()),
        }))
    }

    /// Spawns the pipeline for an already-persisted, `Pending` job.
    /// Returns immediately; progress is observable through
    /// [`StreamHub::subscribe`] and [`JobStore::get`].
    pub fn start(self: &Arc<Self>, job_id: String) {
        let token = CancellationToken::new();
        self.cancellations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(job_id.clone(), token.clone());

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_job(&job_id, token).await;
            this.cancellations
                .lock()
                .unwrap_or_else(std::sync::PoisonError::into_inner)
                .remove(&job_id);
        });
    }

    /// Cancels the running task for `job_id`, if one is still in flight.
    /// No-op if the job already finished or was never started under this
    /// orchestrator instance.
    pub fn cancel(&self, job_id: &str) {
        if let Some(token) = self
            .cancellations
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(job_id)
        {
            token.cancel();
        }
    }

    async fn run_job(&self, job_id: &str, cancel: CancellationToken) {
        tokio::select! {
            () = cancel.cancelled() => {
                log::info!("job {job_id} cancelled");
            }
            () = tokio::time::sleep(OVERALL_JOB_DEADLINE) => {
                let stage = self.current_stage(job_id).await;
                self.fail_job(
                    job_id,
                    stage,
                    ErrorKind::Timeout,
                    "job exceeded its overall deadline".to_string(),
                )
                .await;
            }
            () = self.run_job_stages(job_id) => {}
        }
    }

    async fn current_stage(&self, job_id: &str) -> StageName {
        self.db
            .get(job_id)
            .await
            .ok()
            .flatten()
            .and_then(|job| job.current_phase)
            .unwrap_or(StageName::Research)
    }

    async fn run_job_stages(&self, job_id: &str) {
        let Ok(Some(job)) = self.db.get(job_id).await else {
            log::error!("job {job_id} vanished before the orchestrator could start it");
            return;
        };
        let customer_url = job.customer_url.clone();

        if self.db.set_status(job_id, JobStatus::Running).await.is_err() {
            return;
        }
        self.stream.open(job).await;
        self.refresh_stream(job_id).await;

        let stages = StageName::default_graph();
        let total = stages.len();

        let Ok(research) = self
            .run_stage(job_id, StageName::Research, 0, total, async {
                capi_demo_agents::research::run(
                    self.llm_research.as_ref(),
                    &self.reporter(job_id, StageName::Research),
                    &customer_url,
                    self.crawl_limits,
                )
                .await
            })
            .await
        else {
            return;
        };

        let Ok(story) = self
            .run_stage(job_id, StageName::DemoStory, 1, total, async {
                capi_demo_agents::demo_story::run(
                    self.llm_demo_story.as_ref(),
                    &self.reporter(job_id, StageName::DemoStory),
                    &research,
                    &self.demo_story_config,
                )
                .await
            })
            .await
        else {
            return;
        };
        self.merge_artifacts(job_id, |a| {
            a.demo_story = Some(story.clone());
            a.golden_queries = story.golden_queries.clone();
        })
        .await;

        let Ok(schema) = self
            .run_stage(job_id, StageName::DataModeling, 2, total, async {
                capi_demo_agents::data_modeling::run(
                    self.llm_data_modeling.as_ref(),
                    &self.reporter(job_id, StageName::DataModeling),
                    &research,
                    &story,
                )
                .await
            })
            .await
        else {
            return;
        };
        self.merge_artifacts(job_id, |a| a.schema = Some(schema.clone())).await;

        let out_dir = self.data_dir.join(job_id);
        let domain_summary = format!(
            "{} ({}): {}",
            research.company_name,
            research.domain_classification,
            research.key_capabilities.join(", ")
        );
        let Ok(batches) = self
            .run_stage(job_id, StageName::SyntheticData, 3, total, async {
                capi_demo_agents::synthetic_data::run(
                    self.llm_fast.as_ref(),
                    &self.reporter(job_id, StageName::SyntheticData),
                    &schema,
                    &domain_summary,
                    &out_dir,
                )
                .await
            })
            .await
        else {
            return;
        };

        let Ok((dataset, agent)) = self
            .run_infrastructure_stage(job_id, 4, total, async {
                capi_demo_agents::infrastructure::run(
                    &self.bq,
                    &self.capi,
                    &self.reporter(job_id, StageName::Infrastructure),
                    &schema,
                    &batches,
                    &slugify(&research.company_name),
                    &research.company_name,
                )
                .await
            })
            .await
        else {
            return;
        };
        self.merge_artifacts(job_id, |a| {
            a.dataset_id = Some(dataset.dataset_id.clone());
            a.agent_id = Some(agent.agent_id.clone());
        })
        .await;

        let Ok(yaml) = self
            .run_stage(job_id, StageName::CapiInstructions, 5, total, async {
                capi_demo_agents::capi_instructions::run(
                    self.llm_capi_instructions.as_ref(),
                    &self.reporter(job_id, StageName::CapiInstructions),
                    &research,
                    &story,
                    &schema,
                )
                .await
            })
            .await
        else {
            return;
        };

        if self.capi.set_instructions(&agent.agent_id, &yaml).await.is_ok() {
            self.merge_artifacts(job_id, |a| a.yaml_instructions = Some(yaml.clone())).await;
        } else {
            log::warn!("failed to publish instructions for agent {}", agent.agent_id);
        }

        if self.enable_validation {
            let reporter = self.reporter(job_id, StageName::Validation);
            let _ = self
                .db
                .update_stage(job_id, StageName::Validation, StageStatus::Running, None)
                .await;
            let result = capi_demo_agents::validation::run(&self.capi, &reporter, &agent, &story.golden_queries).await;
            let _ = self
                .db
                .update_stage(job_id, StageName::Validation, StageStatus::Completed, None)
                .await;
            log::info!("validation success rate: {:.0}%", result.success_rate * 100.0);
        }

        let _ = self.db.set_status(job_id, JobStatus::Completed).await;
        self.refresh_and_finish_stream(job_id).await;
    }

    fn reporter(&self, job_id: &str, stage: StageName) -> JobProgressReporter {
        JobProgressReporter {
            db: Arc::clone(&self.db),
            stream: Arc::clone(&self.stream),
            job_id: job_id.to_string(),
            stage,
        }
    }

    async fn run_stage<T, F>(
        &self,
        job_id: &str,
        stage: StageName,
        index: usize,
        total: usize,
        fut: F,
    ) -> Result<T, ()>
    where
        F: std::future::Future<Output = Result<T, AgentError>>,
    {
        let _ = self.db.update_stage(job_id, stage, StageStatus::Running, None).await;
        #[allow(clippy::cast_possible_truncation)]
        let start_progress = (index * 100 / total) as u8;
        let _ = self.db.set_progress(job_id, start_progress, Some(stage)).await;
        self.refresh_stream(job_id).await;

        match tokio::time::timeout(stage_timeout(stage), fut).await {
            Ok(Ok(value)) => {
                let _ = self.db.update_stage(job_id, stage, StageStatus::Completed, None).await;
                #[allow(clippy::cast_possible_truncation)]
                let end_progress = ((index + 1) * 100 / total) as u8;
                let _ = self.db.set_progress(job_id, end_progress, Some(stage)).await;
                self.refresh_stream(job_id).await;
                Ok(value)
            }
            Ok(Err(err)) => {
                self.fail_job(job_id, stage, map_error_kind(&err), err.to_string()).await;
                Err(())
            }
            Err(_elapsed) => {
                self.fail_job(
                    job_id,
                    stage,
                    ErrorKind::Timeout,
                    format!("stage {} exceeded its deadline", stage.as_str()),
                )
                .await;
                Err(())
            }
        }
    }

    /// Runs the infrastructure stage, which unlike every other stage can
    /// fail with a dataset already provisioned. On that partial-failure
    /// path, `dataset_id` is persisted before the job is marked failed.
    async fn run_infrastructure_stage<F>(
        &self,
        job_id: &str,
        index: usize,
        total: usize,
        fut: F,
    ) -> Result<(ProvisionedDataset, CapiAgentRef), ()>
    where
        F: std::future::Future<Output = Result<(ProvisionedDataset, CapiAgentRef), PartialFailure>>,
    {
        let stage = StageName::Infrastructure;
        let _ = self.db.update_stage(job_id, stage, StageStatus::Running, None).await;
        #[allow(clippy::cast_possible_truncation)]
        let start_progress = (index * 100 / total) as u8;
        let _ = self.db.set_progress(job_id, start_progress, Some(stage)).await;
        self.refresh_stream(job_id).await;

        match tokio::time::timeout(stage_timeout(stage), fut).await {
            Ok(Ok(value)) => {
                let _ = self.db.update_stage(job_id, stage, StageStatus::Completed, None).await;
                #[allow(clippy::cast_possible_truncation)]
                let end_progress = ((index + 1) * 100 / total) as u8;
                let _ = self.db.set_progress(job_id, end_progress, Some(stage)).await;
                self.refresh_stream(job_id).await;
                Ok(value)
            }
            Ok(Err(PartialFailure { dataset, source })) => {
                if let Some(dataset) = dataset {
                    self.merge_artifacts(job_id, |a| a.dataset_id = Some(dataset.dataset_id.clone()))
                        .await;
                }
                self.fail_job(job_id, stage, map_error_kind(&source), source.to_string()).await;
                Err(())
            }
            Err(_elapsed) => {
                self.fail_job(
                    job_id,
                    stage,
                    ErrorKind::Timeout,
                    format!("stage {} exceeded its deadline", stage.as_str()),
                )
                .await;
                Err(())
            }
        }
    }

    async fn fail_job(&self, job_id: &str, stage: StageName, kind: ErrorKind, message: String) {
        let error = StageError {
            stage,
            kind,
            message,
        };
        let _ = self
            .db
            .update_stage(job_id, stage, StageStatus::Failed, Some(error.clone()))
            .await;
        let _ = self.db.push_error(job_id, error).await;
        let _ = self.db.set_status(job_id, JobStatus::Failed).await;
        self.refresh_and_finish_stream(job_id).await;
    }

    async fn merge_artifacts(&self, job_id: &str, f: impl FnOnce(&mut JobArtifacts)) {
        let Ok(Some(mut job)) = self.db.get(job_id).await else {
            return;
        };
        f(&mut job.artifacts);
        let _ = self.db.update_artifacts(job_id, &job.artifacts).await;
    }

    async fn refresh_stream(&self, job_id: &str) {
        if let Ok(Some(job)) = self.db.get(job_id).await {
            self.stream.publish_update(job).await;
        }
    }

    async fn refresh_and_finish_stream(&self, job_id: &str) {
        if let Ok(Some(job)) = self.db.get(job_id).await {
            self.stream.finish(job).await;
        }
    }
}

/// Bridges stage agents' [`ProgressReporter`] calls into the job store's
/// log table and the stream hub's live updates.
struct JobProgressReporter {
    db: Arc<dyn JobStore>,
    stream: Arc<StreamHub>,
    job_id: String,
    stage: StageName,
}

#[async_trait]
impl ProgressReporter for JobProgressReporter {
    async fn log(&self, level: LogLevel, message: &str) {
        let _ = self
            .db
            .append_log(&self.job_id, level, self.stage.as_str(), message)
            .await;
        if let Ok(Some(job)) = self.db.get(&self.job_id).await {
            self.stream.publish_update(job).await;
        }
    }
}

/// Lowercase, hyphenated dataset-name-safe slug for a company name.
fn slugify(name: &str) -> String {
    let mut slug = String::with_capacity(name.len());
    let mut last_was_sep = true;
    for ch in name.chars() {
        if ch.is_ascii_alphanumeric() {
            slug.push(ch.to_ascii_lowercase());
            last_was_sep = false;
        } else if !last_was_sep {
            slug.push('_');
            last_was_sep = true;
        }
    }
    slug.trim_end_matches('_').to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn slugify_normalizes_punctuation_and_case() {
        assert_eq!(slugify("Acme, Inc."), "acme_inc");
        assert_eq!(slugify("  Foo--Bar "), "foo_bar");
    }

    #[test]
    fn stage_timeout_is_longer_for_narrative_stages() {
        assert_eq!(stage_timeout(StageName::DemoStory), Duration::from_secs(600));
        assert_eq!(stage_timeout(StageName::CapiInstructions), Duration::from_secs(600));
        assert_eq!(stage_timeout(StageName::Research), Duration::from_secs(300));
    }

    #[test]
    fn map_error_kind_covers_every_variant() {
        assert_eq!(
            map_error_kind(&AgentError::DataGeneration("x".into())),
            ErrorKind::DataGeneration
        );
        assert_eq!(map_error_kind(&AgentError::Safeguard("x".into())), ErrorKind::Safeguard);
    }

    #[test]
    fn map_error_kind_classifies_crawl_failures_as_input_errors() {
        let err = AgentError::Llm(LlmError::Crawl("unreachable host".into()));
        assert_eq!(map_error_kind(&err), ErrorKind::Input);
    }

    #[test]
    fn map_error_kind_classifies_other_llm_failures_as_upstream() {
        let err = AgentError::Llm(LlmError::Provider { message: "rate limited".into() });
        assert_eq!(map_error_kind(&err), ErrorKind::Upstream);
    }

    #[test]
    fn overall_job_deadline_is_one_hour() {
        assert_eq!(OVERALL_JOB_DEADLINE, Duration::from_secs(3600));
    }

    #[test]
    fn demo_story_config_from_env_falls_back_to_default_when_unset() {
        std::env::remove_var("DEMO_NUM_QUERIES");
        let config = demo_story_config_from_env();
        assert_eq!(config.num_golden_queries, DemoStoryConfig::default().num_golden_queries);
    }

    #[tokio::test]
    async fn cancelling_a_token_is_observed_by_its_clone() {
        let token = CancellationToken::new();
        let clone = token.clone();
        assert!(!clone.is_cancelled());
        token.cancel();
        assert!(clone.is_cancelled());
    }
}
