use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    routing::{delete, post},
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;

use super::{auth_error, authorize, ApiResult};
use crate::auth::{ApiKeyInfo, Permission, RateLimit};
use crate::utils::http::HttpResponse;
use crate::AppContext;

pub fn auth_router() -> Router<Arc<AppContext>> {
    Router::new()
        .route("/api-keys", post(create_api_key).get(list_api_keys))
        .route("/api-keys/:api_key", delete(revoke_api_key))
}

#[derive(Debug, Deserialize)]
pub struct CreateApiKeyRequest {
    pub name: String,
    pub permissions: Vec<Permission>,
    #[serde(default)]
    pub rate_limit: RateLimit,
    pub expires_in_days: Option<i64>,
}

async fn create_api_key(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Json(req): Json<CreateApiKeyRequest>,
) -> ApiResult<ApiKeyInfo> {
    authorize(&ctx, &headers, Permission::Admin).await?;

    let key_info = ctx
        .auth
        .create_api_key(req.name, req.permissions, req.rate_limit, req.expires_in_days)
        .map_err(auth_error)?;
    Ok(HttpResponse::new(StatusCode::CREATED.as_u16(), "created".to_string(), key_info))
}

async fn list_api_keys(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
) -> ApiResult<Vec<ApiKeyInfo>> {
    authorize(&ctx, &headers, Permission::Admin).await?;
    ctx.auth.list_api_keys().map(HttpResponse::ok).map_err(auth_error)
}

async fn revoke_api_key(
    State(ctx): State<Arc<AppContext>>,
    headers: HeaderMap,
    Path(api_key): Path<String>,
) -> ApiResult<()> {
    authorize(&ctx, &headers, Permission::Admin).await?;
    ctx.auth.revoke_api_key(&api_key).await.map_err(auth_error)?;
    Ok(HttpResponse::ok(()))
}
