//! HTTP handler functions for the provisioning API.

use actix_web::{web, HttpRequest, HttpResponse};
use capi_demo_models::{JobFilters, JobStatus, Pagination, StageRecord, StageStatus};
use chrono::Utc;
use serde::{Deserialize, Serialize};

use crate::{resolve_owner, AppState};

/// `GET /api/health`
pub async fn health() -> HttpResponse {
    HttpResponse::Ok().json(serde_json::json!({
        "status": "healthy",
        "environment": std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        "timestamp": Utc::now().to_rfc3339(),
    }))
}

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    customer_url: String,
}

/// `POST /api/provision/start`
pub async fn provision_start(
    state: web::Data<AppState>,
    req: HttpRequest,
    body: web::Json<StartRequest>,
) -> HttpResponse {
    let owner = resolve_owner(&req);
    let job_id = uuid::Uuid::new_v4().to_string();
    let job = capi_demo_models::JobRecord::new(
        job_id.clone(),
        body.customer_url.clone(),
        owner,
        Utc::now(),
    );

    if let Err(e) = state.db.create(&job).await {
        log::error!("failed to create job {job_id}: {e}");
        return HttpResponse::InternalServerError().json(serde_json::json!({
            "error": e.to_string(),
        }));
    }

    state.stream.open(job.clone()).await;
    state.orchestrator.start(job_id.clone());

    HttpResponse::Ok().json(serde_json::json!({
        "job_id": job_id,
        "status": "pending",
        "customer_url": job.customer_url,
    }))
}

#[derive(Debug, Serialize)]
struct StageView {
    name: &'static str,
    status: StageStatus,
    progress_percentage: u8,
    start: Option<chrono::DateTime<Utc>>,
    end: Option<chrono::DateTime<Utc>>,
}

impl From<&StageRecord> for StageView {
    fn from(stage: &StageRecord) -> Self {
        Self {
            name: stage.name.as_str(),
            status: stage.status,
            progress_percentage: stage_progress_percentage(stage.status),
            start: stage.start,
            end: stage.end,
        }
    }
}

const fn stage_progress_percentage(status: StageStatus) -> u8 {
    match status {
        StageStatus::Pending => 0,
        StageStatus::Running => 50,
        StageStatus::Completed | StageStatus::Failed | StageStatus::Skipped => 100,
    }
}

/// `GET /api/provision/status/{job_id}`
pub async fn provision_status(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    let owner = resolve_owner(&req);
    let job_id = path.into_inner();

    match state.db.get_owned(&job_id, &owner).await {
        Ok(job) => {
            let agents: Vec<StageView> = job.stages.iter().map(StageView::from).collect();
            let recent_logs = job.logs.iter().rev().take(50).rev().collect::<Vec<_>>();
            HttpResponse::Ok().json(serde_json::json!({
                "status": job.status,
                "current_phase": job.current_phase,
                "overall_progress": job.overall_progress,
                "agents": agents,
                "recent_logs": recent_logs,
                "errors": job.errors,
                "metadata": {
                    "dataset_id": job.artifacts.dataset_id,
                    "agent_id": job.artifacts.agent_id,
                    "demo_title": job.artifacts.demo_story.as_ref().map(|s| s.title.clone()),
                    "golden_queries": job.artifacts.golden_queries,
                    "schema": job.artifacts.schema,
                },
            }))
        }
        Err(e) => job_error_response(&e),
    }
}

/// `GET /api/provision/stream/{job_id}` — SSE.
pub async fn provision_stream(state: web::Data<AppState>, path: web::Path<String>) -> HttpResponse {
    let job_id = path.into_inner();
    let Some(stream) = state.stream.subscribe(&job_id).await else {
        return HttpResponse::NotFound().json(serde_json::json!({
            "error": format!("job not found: {job_id}"),
        }));
    };

    let body = async_stream::stream! {
        futures::pin_mut!(stream);
        while let Some(event) = futures::StreamExt::next(&mut stream).await {
            match serde_json::to_string(&event) {
                Ok(payload) => yield Ok::<_, actix_web::Error>(web::Bytes::from(format!("data: {payload}\n\n"))),
                Err(e) => log::error!("failed to serialize stream event: {e}"),
            }
        }
    };

    HttpResponse::Ok()
        .content_type("text/event-stream")
        .streaming(body)
}

#[derive(Debug, Deserialize)]
pub struct HistoryParams {
    status: Option<JobStatus>,
    search: Option<String>,
    limit: Option<u32>,
    offset: Option<u32>,
}

/// `GET /api/provision/history?status=&search=&limit=&offset=`
pub async fn provision_history(
    state: web::Data<AppState>,
    req: HttpRequest,
    params: web::Query<HistoryParams>,
) -> HttpResponse {
    let owner = resolve_owner(&req);
    let filters = JobFilters {
        status: params.status,
        search: params.search.clone(),
    };
    let page = Pagination {
        limit: params.limit.unwrap_or(50),
        offset: params.offset.unwrap_or(0),
    };

    match state.db.list(&owner, &filters, page).await {
        Ok(jobs) => HttpResponse::Ok().json(jobs),
        Err(e) => {
            log::error!("failed to list jobs for {owner}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string(),
            }))
        }
    }
}

/// `DELETE /api/user/jobs/{job_id}`
pub async fn delete_job(
    state: web::Data<AppState>,
    req: HttpRequest,
    path: web::Path<String>,
) -> HttpResponse {
    let owner = resolve_owner(&req);
    let job_id = path.into_inner();

    match state.db.delete(&job_id, &owner).await {
        Ok(()) => {
            state.orchestrator.cancel(&job_id);
            state.stream.evict(&job_id).await;
            HttpResponse::Ok().json(serde_json::json!({ "deleted": job_id }))
        }
        Err(e) => job_error_response(&e),
    }
}

/// `GET /api/user/stats`
pub async fn user_stats(state: web::Data<AppState>, req: HttpRequest) -> HttpResponse {
    let owner = resolve_owner(&req);
    match state.db.stats(&owner).await {
        Ok(stats) => HttpResponse::Ok().json(stats),
        Err(e) => {
            log::error!("failed to compute stats for {owner}: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({
                "error": e.to_string(),
            }))
        }
    }
}

fn job_error_response(e: &capi_demo_models::JobError) -> HttpResponse {
    match e {
        capi_demo_models::JobError::NotFound(_) => {
            HttpResponse::NotFound().json(serde_json::json!({ "error": e.to_string() }))
        }
        capi_demo_models::JobError::Unauthorized(_) => {
            HttpResponse::Forbidden().json(serde_json::json!({ "error": e.to_string() }))
        }
        capi_demo_models::JobError::Conflict(_) | capi_demo_models::JobError::Storage(_) => {
            log::error!("job store error: {e}");
            HttpResponse::InternalServerError().json(serde_json::json!({ "error": e.to_string() }))
        }
    }
}
