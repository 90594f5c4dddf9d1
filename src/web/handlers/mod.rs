use axum::{http::HeaderMap, http::StatusCode, routing::get, Router};
use std::sync::Arc;
use crate::auth::{AuthError, Permission};
use crate::utils::http::HttpResponse;
use crate::AppContext;

pub mod auth;
pub mod callback;
pub mod events;
pub mod jobs;
pub mod tasks;


pub(crate) type ApiError = HttpResponse<Option<()>>;
pub(crate) type ApiResult<T> = Result<HttpResponse<T>, ApiError>;

pub fn router(ctx: Arc<AppContext>) -> Router {
    Router::new()
        .nest("/jobs", jobs::jobs_router())
        .nest("/tasks", tasks::tasks_router())
        .nest("/callback", callback::callback_router())
        .nest("/auth", auth::auth_router())
        .route("/events", get(events::stream_events))
        .with_state(ctx)
}

/// Checks `X-API-Key`, falling back to `Authorization: Bearer`.
pub(crate) async fn authorize(
    ctx: &AppContext,
    headers: &HeaderMap,
    permission: Permission,
) -> Result<(), ApiError> {
    let api_key = headers
        .get("X-API-Key")
        .or_else(|| headers.get("Authorization"))
        .and_then(|value| value.to_str().ok());

    ctx.auth
        .verify_api_key(api_key, permission)
        .await
        .map_err(auth_error)
}

pub(crate) fn auth_error(e: AuthError) -> ApiError {
    HttpResponse::error(e.status_code(), e.to_string())
}

pub(crate) fn internal_error(e: impl std::fmt::Display) -> ApiError {
    HttpResponse::error(StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}
