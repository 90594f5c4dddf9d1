use serde::{Deserialize, Serialize};
use std::fmt::Display;

use crate::schedule::types::JobKind;
use crate::{env_opt, env_or};

const SUNO_API_BASE: &str = "https://api.sunoapi.org";
const COMET_API_BASE: &str = "https://api.cometapi.com";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Provider {
    Suno,
    Midjourney,
}

impl Display for Provider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:?}", self)
    }
}

/// Where a task's status is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusEndpoint {
    /// `GET {path}?{param}={task_id}`
    Query { path: &'static str, param: &'static str },
    /// `GET {prefix}{task_id}{suffix}`
    Path { prefix: &'static str, suffix: &'static str },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    pub provider: Provider,
    pub create_path: &'static str,
    pub status: StatusEndpoint,
    // body field carrying the push notification url
    pub callback_field: &'static str,
}

const fn suno(create_path: &'static str, status_path: &'static str) -> Endpoint {
    Endpoint {
        provider: Provider::Suno,
        create_path,
        status: StatusEndpoint::Query { path: status_path, param: "taskId" },
        callback_field: "callBackUrl",
    }
}

impl JobKind {
    pub fn endpoint(&self) -> Endpoint {
        match self {
            JobKind::Music => suno("/api/v1/generate", "/api/v1/generate/record-info"),
            JobKind::Lyrics => suno("/api/v1/lyrics", "/api/v1/lyrics/record-info"),
            JobKind::CoverArt => suno("/api/v1/suno/cover/generate", "/api/v1/suno/cover/record-info"),
            JobKind::WavConversion => suno("/api/v1/wav/generate", "/api/v1/wav/record-info"),
            JobKind::VocalSeparation => {
                suno("/api/v1/vocal-removal/generate", "/api/v1/vocal-removal/record-info")
            }
            JobKind::Mp4Render => suno("/api/v1/mp4/generate", "/api/v1/mp4/record-info"),
            JobKind::Image => Endpoint {
                provider: Provider::Midjourney,
                create_path: "/mj/submit/imagine",
                status: StatusEndpoint::Path { prefix: "/mj/task/", suffix: "/fetch" },
                callback_field: "notifyHook",
            },
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct ProviderConfig {
    pub base_url: String,
    pub api_key: Option<String>,
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { base_url, api_key }
    }

    pub fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }
}

/// Base urls and credentials for every provider, plus the push callback url
/// handed to providers on submission.
#[derive(Debug, Clone, Default)]
pub struct ProviderSettings {
    suno: ProviderConfig,
    midjourney: ProviderConfig,
    pub callback_url: Option<String>,
}

impl ProviderSettings {
    pub fn from_env() -> Self {
        Self {
            suno: ProviderConfig::new(env_or("SUNO_API_BASE", SUNO_API_BASE), env_opt("SUNO_API_KEY")),
            midjourney: ProviderConfig::new(
                env_or("COMET_API_BASE", COMET_API_BASE),
                env_opt("COMET_API_KEY"),
            ),
            callback_url: env_opt("VIBE_CALLBACK_URL"),
        }
    }

    pub fn with_provider(mut self, provider: Provider, config: ProviderConfig) -> Self {
        match provider {
            Provider::Suno => self.suno = config,
            Provider::Midjourney => self.midjourney = config,
        }
        self
    }

    pub fn with_callback_url(mut self, url: Option<String>) -> Self {
        self.callback_url = url;
        self
    }

    pub fn get(&self, provider: Provider) -> &ProviderConfig {
        match provider {
            Provider::Suno => &self.suno,
            Provider::Midjourney => &self.midjourney,
        }
    }
}
