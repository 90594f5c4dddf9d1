use thiserror::Error;

use crate::schedule::providers::Provider;

/// Failure to create a job. Never retried automatically; no poll session is
/// started.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum SubmissionError {
    #[error("missing api key for provider {0}")]
    MissingCredentials(Provider),
    #[error("invalid job params: {0}")]
    InvalidParams(String),
    #[error("network error: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("no task id in provider response: {body}")]
    NoTaskId { body: String },
}

/// Failure of a single status check. The poll loop records it and tries again
/// on the next tick.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PollError {
    #[error("missing api key for provider {0}")]
    MissingCredentials(Provider),
    #[error("network error: {0}")]
    Transport(String),
    #[error("http {status}: {body}")]
    Http { status: u16, body: String },
    #[error("invalid status payload: {0}")]
    Decode(String),
}

impl PollError {
    /// Errors that will not resolve by asking again.
    pub fn is_fatal(&self) -> bool {
        match self {
            Self::MissingCredentials(_) => true,
            Self::Http { status, .. } => {
                (400..500).contains(status) && *status != 408 && *status != 429
            }
            Self::Transport(_) | Self::Decode(_) => false,
        }
    }
}
