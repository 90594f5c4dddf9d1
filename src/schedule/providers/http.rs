use std::time::Duration;

use async_trait::async_trait;
use reqwest::{Client, RequestBuilder};
use serde_json::Value;
use tracing::{debug, info, warn};

use super::endpoint::{ProviderConfig, ProviderSettings, StatusEndpoint};
use super::{StatusSource, TaskSubmitter};
use crate::schedule::error::{PollError, SubmissionError};
use crate::schedule::extract;
use crate::schedule::params::JobParams;
use crate::schedule::types::JobKind;

/// reqwest-backed client for every generation provider.
#[derive(Debug, Clone)]
pub struct ProviderClient {
    http: Client,
    settings: ProviderSettings,
}

impl ProviderClient {
    const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

    pub fn new(settings: ProviderSettings) -> anyhow::Result<Self> {
        let http = Client::builder()
            .timeout(Self::REQUEST_TIMEOUT)
            .user_agent(concat!("vibegen-rs/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self { http, settings })
    }

    pub fn settings(&self) -> &ProviderSettings {
        &self.settings
    }

    fn status_request(&self, config: &ProviderConfig, endpoint: StatusEndpoint, task_id: &str) -> RequestBuilder {
        match endpoint {
            StatusEndpoint::Query { path, param } => {
                self.http.get(config.url(path)).query(&[(param, task_id)])
            }
            StatusEndpoint::Path { prefix, suffix } => {
                self.http.get(config.url(&format!("{}{}{}", prefix, task_id, suffix)))
            }
        }
    }
}

#[async_trait]
impl TaskSubmitter for ProviderClient {
    async fn submit(&self, params: &JobParams) -> Result<String, SubmissionError> {
        let kind = params.kind();
        let endpoint = kind.endpoint();
        let config = self.settings.get(endpoint.provider);
        let api_key = config
            .api_key
            .as_deref()
            .ok_or(SubmissionError::MissingCredentials(endpoint.provider))?;

        let mut body = params
            .body()
            .map_err(|e| SubmissionError::InvalidParams(e.to_string()))?;
        if let (Some(url), Some(map)) = (&self.settings.callback_url, body.as_object_mut()) {
            map.insert(endpoint.callback_field.to_string(), Value::String(url.clone()));
        }

        info!("Submitting {} job to {}", kind, endpoint.provider);
        let response = self
            .http
            .post(config.url(endpoint.create_path))
            .bearer_auth(api_key)
            .json(&body)
            .send()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| SubmissionError::Transport(e.to_string()))?;

        if !status.is_success() {
            warn!("{} submission rejected with {}: {}", kind, status, text);
            return Err(SubmissionError::Http { status: status.as_u16(), body: text });
        }

        let payload: Value = match serde_json::from_str(&text) {
            Ok(payload) => payload,
            Err(_) => return Err(SubmissionError::NoTaskId { body: text }),
        };

        match extract::task_id(&payload) {
            Some(task_id) => {
                info!("{} job accepted as task {}", kind, task_id);
                Ok(task_id)
            }
            None => Err(SubmissionError::NoTaskId { body: text }),
        }
    }
}

#[async_trait]
impl StatusSource for ProviderClient {
    async fn fetch(&self, kind: JobKind, task_id: &str) -> Result<Value, PollError> {
        let endpoint = kind.endpoint();
        let config = self.settings.get(endpoint.provider);
        let api_key = config
            .api_key
            .as_deref()
            .ok_or(PollError::MissingCredentials(endpoint.provider))?;

        let response = self
            .status_request(config, endpoint.status, task_id)
            .bearer_auth(api_key)
            .send()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| PollError::Transport(e.to_string()))?;
        debug!(task_id, status = status.as_u16(), "status response");

        if !status.is_success() {
            return Err(PollError::Http { status: status.as_u16(), body: text });
        }

        serde_json::from_str(&text).map_err(|e| PollError::Decode(e.to_string()))
    }
}
