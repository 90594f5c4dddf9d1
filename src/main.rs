#![allow(clippy::uninlined_format_args)]

use anyhow::Result;
use tracing::{info, warn};
use std::sync::Arc;
use std::net::SocketAddr;
use vibegen_rs::{
    auth::{Auth, InMemoryApiKeyStorage, Permission, RateLimit},
    storage::task::SqliteTaskStorage,
    utils::logger,
    AppContext, BIND_ADDR, LOG_DIR, SQLITE_PATH,
};

#[tokio::main]
async fn main() -> Result<()> {
    vibegen_rs::init_env();

    // 初始化日志系统
    let _guard = logger::init(LOG_DIR.to_string())?;

    info!(version = env!("CARGO_PKG_VERSION"), git = env!("GIT_HASH"), "Starting vibegen service...");

    // 初始化 storage
    info!("Initializing Storage...");
    let storage = SqliteTaskStorage::new(&SQLITE_PATH).await?;

    // 初始化认证管理器
    info!("Initializing Auth Manager...");
    let auth = Auth::new(Arc::new(InMemoryApiKeyStorage::new()));
    match std::env::var("VIBE_ADMIN_KEY").or_else(|_| dotenv::var("VIBE_ADMIN_KEY")) {
        Ok(key) if !key.trim().is_empty() => {
            auth.register_api_key(
                key.trim().to_string(),
                "admin".to_string(),
                vec![Permission::Admin],
                RateLimit::default(),
                None,
            )?;
        }
        _ => warn!("VIBE_ADMIN_KEY is not set, job submission is disabled"),
    }

    // 创建应用上下文
    info!("Initializing Orchestrator...");
    let ctx = Arc::new(AppContext::from_env(Arc::new(auth), Arc::new(storage))?);

    // 配置服务器地址
    let addr: SocketAddr = BIND_ADDR.parse()?;
    info!("Starting HTTP server at http://{}", addr);

    let shutdown = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    };

    // 启动 HTTP 服务器
    match vibegen_rs::web::start_server(ctx.clone(), addr, shutdown).await {
        Ok(_) => info!("Server stopped gracefully"),
        Err(e) => {
            tracing::error!("Server error: {}", e);
            ctx.orchestrator.shutdown();
            return Err(e);
        }
    }

    // 优雅关闭
    info!("Shutting down...");
    let cancelled = ctx.orchestrator.shutdown();
    info!("Cancelled {} active poll sessions", cancelled);

    Ok(())
}
