use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Json, Router,
};
use serde::Serialize;
use std::sync::Arc;
use tracing::{error, info};

use super::{authorize, ApiError, ApiResult};
use crate::auth::Permission;
use crate::schedule::scheduler::ActiveSession;
use crate::schedule::{JobParams, SubmissionError, Task};
use crate::utils::http::HttpResponse;
use crate::AppContext;

pub fn jobs_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/", get(list_jobs).post(create_job))
        .route("/:label", get(get_job).delete(cancel_job))
}

#[derive(Debug, Serialize)]
pub struct JobView {
    pub label: String,
    pub active: bool,
    pub task: Task,
}

#[derive(Debug, Serialize)]
pub struct CancelResult {
    pub label: String,
    pub cancelled: bool,
}

pub(crate) fn submission_error(e: &SubmissionError) -> ApiError {
    let status = match e {
        SubmissionError::InvalidParams(_) => StatusCode::BAD_REQUEST,
        SubmissionError::MissingCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
        SubmissionError::Transport(_)
        | SubmissionError::Http { .. }
        | SubmissionError::NoTaskId { .. } => StatusCode::BAD_GATEWAY,
    };
    HttpResponse::error(status, e.to_string())
}

async fn create_job(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(params): Json<JobParams>,
) -> ApiResult<Task> {
    authorize(&ctx, &headers, Permission::Generate).await?;

    match ctx.orchestrator.run_job(params).await {
        Ok(task) => Ok(HttpResponse::new(
            StatusCode::CREATED.as_u16(),
            "submitted".to_string(),
            task,
        )),
        Err(e) => {
            error!("Failed to submit job: {}", e);
            Err(submission_error(&e))
        }
    }
}

async fn list_jobs(State(ctx): State<Arc<AppContext>>) -> ApiResult<Vec<ActiveSession>> {
    Ok(HttpResponse::ok(ctx.sessions.active()))
}

async fn get_job(
    State(ctx): State<Arc<AppContext>>,
    Path(label): Path<String>,
) -> ApiResult<JobView> {
    let task = ctx
        .store
        .latest_for_label(&label)
        .ok_or_else(|| HttpResponse::error(StatusCode::NOT_FOUND, "No job for label"))?;

    let active = ctx.sessions.task_for(&label).as_deref() == Some(task.id.as_str());
    Ok(HttpResponse::ok(JobView { label, active, task }))
}

async fn cancel_job(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(label): Path<String>,
) -> ApiResult<CancelResult> {
    authorize(&ctx, &headers, Permission::Generate).await?;

    let cancelled = ctx.orchestrator.cancel(&label);
    info!(label = %label, cancelled, "Cancel requested");
    Ok(HttpResponse::ok(CancelResult { label, cancelled }))
}
