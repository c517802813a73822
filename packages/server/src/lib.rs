#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! Actix-Web API server for the CAPI demo provisioning pipeline.
//!
//! Exposes job lifecycle endpoints under `/api/provision` and
//! `/api/user`, an SSE progress stream, and a health check. Every job
//! is owned by an opaque identity resolved by [`resolve_owner`]; when
//! `AUTH_ENABLED` isn't set all jobs share one owner, which is the
//! right default for a single-tenant demo deployment.

mod handlers;

use std::path::PathBuf;
use std::sync::Arc;

use actix_cors::Cors;
use actix_web::{middleware, web, App, HttpRequest, HttpServer};
use capi_demo_db::JobStore;
use capi_demo_llm::providers::LlmProvider;
use capi_demo_models::ModelTier;
use capi_demo_orchestrator::{Orchestrator, StreamHub};

/// Owner identity used for every job when `AUTH_ENABLED` is unset.
const SHARED_OWNER: &str = "shared";

/// Shared application state injected into every handler.
pub struct AppState {
    pub db: Arc<dyn JobStore>,
    pub orchestrator: Arc<Orchestrator>,
    pub stream: Arc<StreamHub>,
}

/// Resolves the caller's owner identity.
///
/// Reads the bearer token from the `Authorization` header when
/// `AUTH_ENABLED=true`; otherwise every caller shares [`SHARED_OWNER`].
/// A plain function call rather than an actix extractor or guard, to
/// match the handler style the rest of this crate follows.
#[must_use]
pub fn resolve_owner(req: &HttpRequest) -> String {
    let auth_enabled = std::env::var("AUTH_ENABLED").is_ok_and(|v| v == "1" || v.eq_ignore_ascii_case("true"));
    if !auth_enabled {
        return SHARED_OWNER.to_string();
    }
    req.headers()
        .get("Authorization")
        .and_then(|h| h.to_str().ok())
        .and_then(|h| h.strip_prefix("Bearer "))
        .map_or_else(|| SHARED_OWNER.to_string(), std::string::ToString::to_string)
}

/// Builds the two `LlmProvider`s, the job store, the stream hub, and the
/// orchestrator, then binds and runs the HTTP server.
///
/// # Panics
///
/// Panics if a required LLM provider cannot be configured from the
/// environment, or if the orchestrator's safeguard rejects its bound
/// synthetic-data generator.
#[allow(clippy::future_not_send)]
pub async fn run_server() -> std::io::Result<()> {
    pretty_env_logger::init_custom_env("RUST_LOG");

    log::info!("Opening job database...");
    let db = capi_demo_db::open_shared(std::path::Path::new(capi_demo_db::DEFAULT_DB_PATH))
        .await
        .expect("failed to open job database");

    log::info!("Configuring LLM providers...");
    let llm_fast: Arc<dyn LlmProvider> = Arc::from(
        capi_demo_llm::create_provider_from_env(ModelTier::Fast)
            .await
            .expect("failed to configure fast-tier LLM provider"),
    );

    let data_dir = PathBuf::from("data/jobs");
    let gcp_project_id =
        std::env::var("GCP_PROJECT_ID").unwrap_or_else(|_| "capi-demo".to_string());

    let stream = StreamHub::new();
    let orchestrator = Orchestrator::new(
        Arc::clone(&db),
        llm_fast,
        &gcp_project_id,
        data_dir,
        Arc::clone(&stream),
        capi_demo_agents::synthetic_data::GENERATOR_MARKER,
    )
    .await
    .expect("failed to construct orchestrator");

    let state = web::Data::new(AppState {
        db,
        orchestrator,
        stream,
    });

    let bind_addr = std::env::var("BIND_ADDR").unwrap_or_else(|_| "127.0.0.1".to_string());
    let port: u16 = std::env::var("PORT")
        .ok()
        .and_then(|p| p.parse().ok())
        .unwrap_or(8080);

    log::info!("Starting server on {bind_addr}:{port}");

    HttpServer::new(move || {
        App::new()
            .wrap(Cors::permissive())
            .wrap(middleware::Logger::default())
            .app_data(state.clone())
            .service(
                web::scope("/api")
                    .route("/health", web::get().to(handlers::health))
                    .route("/provision/start", web::post().to(handlers::provision_start))
                    .route(
                        "/provision/status/{job_id}",
                        web::get().to(handlers::provision_status),
                    )
                    .route(
                        "/provision/stream/{job_id}",
                        web::get().to(handlers::provision_stream),
                    )
                    .route("/provision/history", web::get().to(handlers::provision_history))
                    .route("/user/jobs/{job_id}", web::delete().to(handlers::delete_job))
                    .route("/user/stats", web::get().to(handlers::user_stats)),
            )
    })
    .bind((bind_addr, port))?
    .run()
    .await
}
