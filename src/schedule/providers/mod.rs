
pub mod endpoint;
pub mod http;

use async_trait::async_trait;
use serde_json::Value;

use crate::schedule::error::{PollError, SubmissionError};
use crate::schedule::params::JobParams;
use crate::schedule::types::JobKind;

pub use endpoint::{Endpoint, Provider, ProviderConfig, ProviderSettings, StatusEndpoint};
pub use http::ProviderClient;

/// Creates a job on the provider and returns its task id.
#[async_trait]
pub trait TaskSubmitter: Send + Sync {
    async fn submit(&self, params: &JobParams) -> Result<String, SubmissionError>;
}

/// Reads the current status payload of a submitted task.
#[async_trait]
pub trait StatusSource: Send + Sync {
    async fn fetch(&self, kind: JobKind, task_id: &str) -> Result<Value, PollError>;
}
