use std::sync::Arc;

use chrono::Utc;
use serde::Serialize;
use serde_json::Value;
use tracing::{info, warn};

use crate::schedule::callback::ResultSink;
use crate::schedule::error::{PollError, SubmissionError};
use crate::schedule::extract;
use crate::schedule::params::JobParams;
use crate::schedule::predicate::PredicateRegistry;
use crate::schedule::providers::{StatusSource, TaskSubmitter};
use crate::schedule::scheduler::{Delivery, PollOptions, PollRequest, PollSessionManager, SessionHandle};
use crate::schedule::types::{Classification, JobKind, Task, TaskStatus};

/// Result of a one-off status check.
#[derive(Debug, Clone, Serialize)]
pub struct StatusCheck {
    pub task_id: String,
    pub kind: JobKind,
    pub classification: Classification,
    pub artifact: Option<String>,
    pub payload: Value,
    // whether a running session received the payload
    pub delivered: bool,
}

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum PushOutcome {
    /// Handed to the session polling this task.
    Delivered { task_id: String },
    /// No session owns the task; the terminal snapshot was recorded directly.
    Recorded { task: Task },
    /// The owning session's push buffer is full; it keeps polling.
    Busy { task_id: String },
    /// Non-terminal push for a task nobody is polling. Nothing is recorded,
    /// so a cancelled or timed-out task never reads as in progress again.
    Ignored { task_id: String },
}

/// Wires submitter, scheduler, predicates and sinks for every job kind.
pub struct Orchestrator {
    submitter: Arc<dyn TaskSubmitter>,
    source: Arc<dyn StatusSource>,
    predicates: PredicateRegistry,
    sessions: Arc<PollSessionManager>,
    sink: Arc<dyn ResultSink>,
    options: PollOptions,
}

impl Orchestrator {
    pub fn new(
        submitter: Arc<dyn TaskSubmitter>,
        source: Arc<dyn StatusSource>,
        sessions: Arc<PollSessionManager>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            submitter,
            source,
            predicates: PredicateRegistry::default(),
            sessions,
            sink,
            options: PollOptions::default(),
        }
    }

    pub fn with_options(mut self, options: PollOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_predicates(mut self, predicates: PredicateRegistry) -> Self {
        self.predicates = predicates;
        self
    }

    pub fn sessions(&self) -> &Arc<PollSessionManager> {
        &self.sessions
    }

    /// Submit a job and start polling it under its kind's label. Returns the
    /// pending task as soon as the provider has accepted it.
    pub async fn run_job(&self, params: JobParams) -> Result<Task, SubmissionError> {
        self.start_job(params).await.map(|(task, _)| task)
    }

    /// Same as [`Orchestrator::run_job`], also returning the session handle.
    pub async fn start_job(&self, params: JobParams) -> Result<(Task, SessionHandle), SubmissionError> {
        let kind = params.kind();
        params.validate()?;

        let task_id = match self.submitter.submit(&params).await {
            Ok(task_id) => task_id,
            Err(e) => {
                warn!("Failed to submit {} job: {}", kind, e);
                return Err(e);
            }
        };

        let task = Task::new(task_id, kind, self.options.max_attempts);
        info!(label = kind.label(), task_id = %task.id, "Job submitted");
        if let Err(e) = self.sink.on_update(&task).await {
            warn!("Failed to record submitted task {}: {}", task.id, e);
        }

        let handle = self.sessions.start(PollRequest {
            label: kind.label().to_string(),
            task: task.clone(),
            source: self.source.clone(),
            predicate: self.predicates.get(kind),
            options: self.options.clone(),
        });
        Ok((task, handle))
    }

    /// Check a task's status once, outside the tick schedule. A running
    /// session for the task gets the payload as well.
    pub async fn check_status(&self, kind: JobKind, task_id: &str) -> Result<StatusCheck, PollError> {
        let payload = self.source.fetch(kind, task_id).await?;
        let predicate = self.predicates.get(kind);
        let classification = predicate.classify(&payload);
        let artifact = predicate.artifact(&payload);
        let delivered = self.sessions.deliver(task_id, payload.clone()) == Delivery::Delivered;

        Ok(StatusCheck {
            task_id: task_id.to_string(),
            kind,
            classification,
            artifact,
            payload,
            delivered,
        })
    }

    /// Handle a provider push notification.
    pub async fn accept_push(&self, kind: JobKind, payload: Value) -> anyhow::Result<PushOutcome> {
        let task_id = extract::push_task_id(&payload)
            .ok_or_else(|| anyhow::anyhow!("No task id in {} callback", kind))?;

        match self.sessions.deliver(&task_id, payload.clone()) {
            Delivery::Delivered => {
                info!(task_id = %task_id, "Push delivered to poll session");
                return Ok(PushOutcome::Delivered { task_id });
            }
            Delivery::Busy => return Ok(PushOutcome::Busy { task_id }),
            Delivery::NoSession => {}
        }

        let predicate = self.predicates.get(kind);
        let mut task = Task::new(task_id, kind, self.options.max_attempts);
        match predicate.classify(&payload) {
            Classification::Succeeded => task.status = TaskStatus::Succeeded,
            Classification::Failed(reason) => {
                task.status = TaskStatus::Failed;
                task.error = Some(reason);
            }
            Classification::Pending => {
                info!(task_id = %task.id, "Ignoring progress push for task without session");
                return Ok(PushOutcome::Ignored { task_id: task.id });
            }
        }
        task.artifact = predicate.artifact(&payload);
        task.last_payload = Some(payload);
        task.completed_at = Some(Utc::now());

        self.sink.on_finished(&task).await?;
        info!(task_id = %task.id, status = %task.status, "Push recorded without session");
        Ok(PushOutcome::Recorded { task })
    }

    pub fn cancel(&self, label: &str) -> bool {
        self.sessions.cancel(label)
    }

    pub fn shutdown(&self) -> usize {
        self.sessions.cancel_all()
    }
}
