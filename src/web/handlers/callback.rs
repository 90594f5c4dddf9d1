use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::post,
    Json, Router,
};
use serde_json::Value;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, warn};

use super::ApiResult;
use crate::schedule::{JobKind, PushOutcome};
use crate::utils::http::HttpResponse;
use crate::AppContext;

/// Provider push notifications. Providers cannot send our API key, so these
/// routes are open.
pub fn callback_router() -> Router<Arc<AppContext>> {
    Router::new().route("/:kind", post(receive_push))
}

async fn receive_push(
    State(ctx): State<Arc<AppContext>>,
    Path(kind): Path<String>,
    Json(payload): Json<Value>,
) -> ApiResult<PushOutcome> {
    let kind = JobKind::from_str(&kind)
        .map_err(|e| HttpResponse::error(StatusCode::BAD_REQUEST, e))?;
    info!(kind = %kind, "Received provider callback");

    match ctx.orchestrator.accept_push(kind, payload).await {
        Ok(outcome) => Ok(HttpResponse::ok(outcome)),
        Err(e) => {
            warn!("Rejected {} callback: {}", kind, e);
            Err(HttpResponse::error(StatusCode::BAD_REQUEST, e.to_string()))
        }
    }
}
