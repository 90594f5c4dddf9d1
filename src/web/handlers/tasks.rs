use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    routing::get,
    Router,
};
use serde::Deserialize;
use std::str::FromStr;
use std::sync::Arc;
use tracing::error;

use super::{authorize, internal_error, ApiError, ApiResult};
use crate::auth::Permission;
use crate::schedule::{JobKind, PollError, StatusCheck, Task};
use crate::utils::http::HttpResponse;
use crate::web::Pagination;
use crate::AppContext;

pub fn tasks_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/", get(list_tasks))
        .route("/:task_id", get(get_task))
        .route("/:task_id/check", get(check_task))
}

#[derive(Debug, Deserialize)]
pub struct CheckQuery {
    pub kind: Option<String>,
}

fn poll_error(e: &PollError) -> ApiError {
    let status = match e {
        PollError::MissingCredentials(_) => StatusCode::SERVICE_UNAVAILABLE,
        PollError::Http { .. } | PollError::Transport(_) | PollError::Decode(_) => {
            StatusCode::BAD_GATEWAY
        }
    };
    HttpResponse::error(status, e.to_string())
}

async fn find_task(ctx: &AppContext, task_id: &str) -> Result<Option<Task>, ApiError> {
    if let Some(task) = ctx.store.get(task_id) {
        return Ok(Some(task));
    }
    ctx.storage.get(task_id).await.map_err(|e| {
        error!("Failed to load task {}: {}", task_id, e);
        internal_error(e)
    })
}

async fn list_tasks(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Query(pagination): Query<Pagination>,
) -> ApiResult<Vec<Task>> {
    authorize(&ctx, &headers, Permission::Read).await?;

    match ctx.storage.list(&pagination).await {
        Ok(tasks) => Ok(HttpResponse::ok(tasks)),
        Err(e) => {
            error!("Failed to list tasks: {}", e);
            Err(internal_error(e))
        }
    }
}

async fn get_task(
    State(ctx): State<Arc<AppContext>>,
    Path(task_id): Path<String>,
) -> ApiResult<Task> {
    match find_task(&ctx, &task_id).await? {
        Some(task) => Ok(HttpResponse::ok(task)),
        None => Err(HttpResponse::error(StatusCode::NOT_FOUND, "Task not found")),
    }
}

async fn check_task(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(task_id): Path<String>,
    Query(query): Query<CheckQuery>,
) -> ApiResult<StatusCheck> {
    authorize(&ctx, &headers, Permission::Generate).await?;

    // an explicit kind wins, otherwise use the recorded one
    let kind = match query.kind {
        Some(kind) => JobKind::from_str(&kind)
            .map_err(|e| HttpResponse::error(StatusCode::BAD_REQUEST, e))?,
        None => find_task(&ctx, &task_id)
            .await?
            .map(|task| task.job_kind)
            .ok_or_else(|| {
                HttpResponse::error(StatusCode::BAD_REQUEST, "Unknown task; pass ?kind=")
            })?,
    };

    ctx.orchestrator
        .check_status(kind, &task_id)
        .await
        .map(HttpResponse::ok)
        .map_err(|e| {
            error!("Status check for {} failed: {}", task_id, e);
            poll_error(&e)
        })
}
