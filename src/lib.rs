pub mod auth;
pub mod schedule;
pub mod utils;
pub mod web;
pub mod storage;

use std::{env, sync::Arc};
use auth::Auth;
use once_cell::sync::Lazy;
use schedule::callback::{HttpSink, StorageSink};
use schedule::{
    EventSink, Orchestrator, PollOptions, PollSessionManager, ProviderClient, ProviderSettings,
    ResultSink, ResultStore, SinkSet,
};
use storage::task::TaskStorage;

const VIBE_SQLITE_PATH: &str = "sqlite://./vibe_data/jobs.db?mode=rwc";
const VIBE_LOG_DIR: &str = "./logs";
const VIBE_BIND_ADDR: &str = "127.0.0.1:7300";
const EVENT_CAPACITY: usize = 256;

/// Process environment first, then `.env`.
pub(crate) fn env_opt(key: &str) -> Option<String> {
    match env::var(key) {
        Ok(value) => Some(value),
        Err(_) => dotenv::var(key).ok(),
    }
    .filter(|value| !value.trim().is_empty())
}

pub(crate) fn env_or(key: &str, default: &str) -> String {
    env_opt(key).unwrap_or_else(|| default.to_string())
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env_opt(key).and_then(|v| v.trim().parse().ok()).unwrap_or(default)
}

pub static SQLITE_PATH: Lazy<String> = Lazy::new(|| env_or("VIBE_SQLITE_PATH", VIBE_SQLITE_PATH));

pub static LOG_DIR: Lazy<String> = Lazy::new(|| env_or("VIBE_LOG_DIR", VIBE_LOG_DIR));

pub static BIND_ADDR: Lazy<String> = Lazy::new(|| env_or("VIBE_BIND_ADDR", VIBE_BIND_ADDR));

pub static POLL_INTERVAL_MS: Lazy<u64> = Lazy::new(|| env_parse("VIBE_POLL_INTERVAL_MS", 5000));

pub static POLL_MAX_ATTEMPTS: Lazy<u32> = Lazy::new(|| env_parse("VIBE_POLL_MAX_ATTEMPTS", 60));

pub fn init_env() {
    dotenv::dotenv().ok();

    // 确保数据目录存在
    if let Some(db_path) = SQLITE_PATH.strip_prefix("sqlite://") {
        let db_path = db_path.split('?').next().unwrap_or(db_path);
        if let Some(dir) = std::path::Path::new(db_path).parent() {
            std::fs::create_dir_all(dir).unwrap_or_else(|e| {
                eprintln!("Failed to create database directory: {}", e);
            });
        }
    }
}

pub struct AppContext {
    pub auth: Arc<Auth>,
    pub orchestrator: Arc<Orchestrator>,
    pub sessions: Arc<PollSessionManager>,
    pub store: Arc<ResultStore>,
    pub events: EventSink,
    pub storage: Arc<dyn TaskStorage>,
}

impl AppContext {
    /// Wires the provider client from the environment.
    pub fn from_env(auth: Arc<Auth>, storage: Arc<dyn TaskStorage>) -> anyhow::Result<Self> {
        let client = ProviderClient::new(ProviderSettings::from_env())?;
        Ok(Self::with_client(auth, storage, client, PollOptions::from_env(), env_opt("VIBE_WEBHOOK_URL")))
    }

    pub fn with_client(
        auth: Arc<Auth>,
        storage: Arc<dyn TaskStorage>,
        client: ProviderClient,
        options: PollOptions,
        webhook_url: Option<String>,
    ) -> Self {
        let events = EventSink::new(EVENT_CAPACITY);
        let store = Arc::new(ResultStore::new());

        let mut sinks = SinkSet::new()
            .with(store.clone())
            .with(Arc::new(events.clone()))
            .with(Arc::new(StorageSink::new(storage.clone())));
        if let Some(url) = webhook_url {
            sinks = sinks.with(Arc::new(HttpSink::new(url)));
        }
        let sink: Arc<dyn ResultSink> = Arc::new(sinks);

        let orchestrator = schedule::create_orchestrator(client, sink, options);
        let sessions = orchestrator.sessions().clone();

        Self {
            auth,
            orchestrator: Arc::new(orchestrator),
            sessions,
            store,
            events,
            storage,
        }
    }
}
