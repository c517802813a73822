#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Headless CLI for the CAPI demo provisioning pipeline.
//!
//! Runs the same orchestrator the server uses, against the same job
//! database, so a job started from the CLI is visible through the
//! server's `/api/provision/status/{job_id}` and vice versa.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use capi_demo_cli_utils::{MultiProgress, ProgressCallback};
use capi_demo_models::{JobStatus, ModelTier};
use capi_demo_orchestrator::Orchestrator;
use clap::{Parser, Subcommand};

/// Operate the CAPI demo provisioning pipeline from the command line.
#[derive(Parser)]
#[command(name = "capi_demo_cli")]
#[command(about = "Start and track CAPI demo provisioning jobs")]
struct Cli {
    /// Path to the job `SQLite` database.
    #[arg(long, default_value = capi_demo_db::DEFAULT_DB_PATH)]
    db_path: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Starts a new provisioning job and tails its progress.
    Start {
        /// The customer website to provision a demo for.
        customer_url: String,
    },
    /// Prints the current status of an existing job.
    Status {
        /// The job id returned by `start`.
        job_id: String,
    },
}

const OWNER: &str = "cli";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    pretty_env_logger::init();
    let cli = Cli::parse();

    let db = capi_demo_db::open_shared(&cli.db_path).await?;

    match cli.command {
        Commands::Start { customer_url } => start(db, customer_url).await,
        Commands::Status { job_id } => status(db.as_ref(), &job_id).await,
    }
}

async fn start(
    db: Arc<dyn capi_demo_db::JobStore>,
    customer_url: String,
) -> Result<(), Box<dyn std::error::Error>> {
    let llm_fast = Arc::from(capi_demo_llm::create_provider_from_env(ModelTier::Fast).await?);
    let gcp_project_id = std::env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "capi-demo".to_string());
    let stream = capi_demo_orchestrator::StreamHub::new();

    let orchestrator = Orchestrator::new(
        Arc::clone(&db),
        llm_fast,
        &gcp_project_id,
        PathBuf::from("data/jobs"),
        stream,
        capi_demo_agents::synthetic_data::GENERATOR_MARKER,
    )
    .await?;

    let job_id = uuid::Uuid::new_v4().to_string();
    let job = capi_demo_models::JobRecord::new(
        job_id.clone(),
        customer_url,
        OWNER.to_string(),
        chrono::Utc::now(),
    );
    db.create(&job).await?;
    println!("started job {job_id}");

    orchestrator.start(job_id.clone());
    tail(db.as_ref(), &job_id).await
}

async fn status(db: &dyn capi_demo_db::JobStore, job_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let job = db.get_owned(job_id, OWNER).await?;
    print_snapshot(&job);
    Ok(())
}

async fn tail(db: &dyn capi_demo_db::JobStore, job_id: &str) -> Result<(), Box<dyn std::error::Error>> {
    let multi = MultiProgress::new();
    let bar = capi_demo_cli_utils::IndicatifProgress::stages_bar(&multi, "provisioning", 100);

    loop {
        let Some(job) = db.get(job_id).await? else {
            bar.finish_and_clear();
            println!("job {job_id} disappeared");
            return Ok(());
        };

        bar.set_position(u64::from(job.overall_progress));
        if let Some(phase) = job.current_phase {
            bar.set_message(phase.as_str().to_string());
        }

        if matches!(job.status, JobStatus::Completed | JobStatus::Failed) {
            bar.finish_and_clear();
            print_snapshot(&job);
            return Ok(());
        }

        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

fn print_snapshot(job: &capi_demo_models::JobRecord) {
    println!("job {}: {:?}", job.id, job.status);
    println!("progress: {}%", job.overall_progress);
    for stage in &job.stages {
        println!("  {:?}: {:?}", stage.name, stage.status);
    }
    if let Some(dataset_id) = &job.artifacts.dataset_id {
        println!("dataset: {dataset_id}");
    }
    if let Some(agent_id) = &job.artifacts.agent_id {
        println!("agent: {agent_id}");
    }
    for error in &job.errors {
        println!("error [{:?}/{:?}]: {}", error.stage, error.kind, error.message);
    }
}
