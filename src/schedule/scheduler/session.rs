use std::sync::Arc;

use chrono::Utc;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::time::{sleep_until, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{PollOptions, Registry};
use crate::schedule::callback::ResultSink;
use crate::schedule::error::PollError;
use crate::schedule::predicate::CompletionPredicate;
use crate::schedule::providers::StatusSource;
use crate::schedule::types::{Classification, Task, TaskStatus};

enum Wake {
    Due,
    Pushed(Value),
}

enum Step {
    Continue,
    Finish,
}

/// One task being driven to completion. Owns the task exclusively until the
/// session ends.
pub(crate) struct PollSession {
    pub(crate) label: String,
    pub(crate) task: Task,
    pub(crate) options: PollOptions,
    pub(crate) attempt_count: u32,
    pub(crate) started_at: Instant,
    pub(crate) generation: u64,
    pub(crate) source: Arc<dyn StatusSource>,
    pub(crate) predicate: CompletionPredicate,
    pub(crate) sink: Arc<dyn ResultSink>,
    pub(crate) token: CancellationToken,
    pub(crate) pushes: mpsc::Receiver<Value>,
    pub(crate) registry: Registry,
}

impl PollSession {
    pub(crate) async fn run(mut self) -> Task {
        info!(
            label = %self.label,
            task_id = %self.task.id,
            interval_ms = self.options.interval.as_millis() as u64,
            max_attempts = self.options.max_attempts,
            "Poll session started"
        );

        // first check is one interval out, never immediate
        let mut next_tick = self.started_at + self.options.interval;

        loop {
            let wake = tokio::select! {
                biased;
                _ = self.token.cancelled() => return self.cancelled().await,
                Some(payload) = self.pushes.recv() => Wake::Pushed(payload),
                _ = sleep_until(next_tick) => Wake::Due,
            };

            let step = match wake {
                Wake::Pushed(payload) => {
                    debug!(task_id = %self.task.id, "Applying pushed status");
                    self.apply_payload(payload, false).await
                }
                Wake::Due => {
                    self.attempt_count += 1;
                    self.task.attempt = self.attempt_count;
                    let outcome = self.source.fetch(self.task.job_kind, &self.task.id).await;

                    // in-flight request finished after cancel: drop it
                    if self.token.is_cancelled() {
                        debug!(task_id = %self.task.id, "Discarding response for cancelled session");
                        return self.cancelled().await;
                    }

                    next_tick = Instant::now() + self.options.interval;
                    match outcome {
                        Ok(payload) => self.apply_payload(payload, true).await,
                        Err(e) => self.apply_error(e).await,
                    }
                }
            };

            if let Step::Finish = step {
                return self.finish().await;
            }
        }
    }

    fn budget_exhausted(&self) -> bool {
        self.attempt_count >= self.options.max_attempts
    }

    async fn apply_payload(&mut self, payload: Value, counted: bool) -> Step {
        let classification = self.predicate.classify(&payload);
        if let Some(artifact) = self.predicate.artifact(&payload) {
            self.task.artifact = Some(artifact);
        }
        self.task.last_payload = Some(payload);
        self.task.updated_at = Utc::now();

        match classification {
            Classification::Succeeded => {
                self.task.status = TaskStatus::Succeeded;
                Step::Finish
            }
            Classification::Failed(reason) => {
                self.task.status = TaskStatus::Failed;
                self.task.error = Some(reason);
                Step::Finish
            }
            Classification::Pending if counted && self.budget_exhausted() => {
                self.timed_out();
                Step::Finish
            }
            Classification::Pending => {
                self.task.status = TaskStatus::Processing;
                if let Err(e) = self.sink.on_update(&self.task).await {
                    warn!("Failed to publish update for task {}: {}", self.task.id, e);
                }
                Step::Continue
            }
        }
    }

    async fn apply_error(&mut self, error: PollError) -> Step {
        let fatal = error.is_fatal();
        warn!(
            label = %self.label,
            task_id = %self.task.id,
            attempt = self.attempt_count,
            fatal,
            "Status check failed: {}",
            error
        );
        self.task.updated_at = Utc::now();

        let step = if fatal && self.options.abort_on_fatal {
            self.task.status = TaskStatus::Failed;
            self.task.error = Some(error.to_string());
            Step::Finish
        } else if self.budget_exhausted() {
            self.timed_out();
            Step::Finish
        } else {
            Step::Continue
        };

        if let Err(e) = self.sink.on_poll_error(&self.task, &error).await {
            warn!("Failed to publish poll error for task {}: {}", self.task.id, e);
        }
        step
    }

    fn timed_out(&mut self) {
        self.task.status = TaskStatus::TimedOut;
        self.task.error = Some(format!(
            "no terminal status after {} attempts",
            self.attempt_count
        ));
    }

    async fn finish(mut self) -> Task {
        // release the slot before anyone hears about the outcome
        super::release(&self.registry, &self.label, self.generation);

        let now = Utc::now();
        self.task.completed_at = Some(now);
        self.task.updated_at = now;
        info!(
            label = %self.label,
            task_id = %self.task.id,
            status = %self.task.status,
            attempts = self.attempt_count,
            elapsed_ms = self.started_at.elapsed().as_millis() as u64,
            "Poll session finished"
        );

        if let Err(e) = self.sink.on_finished(&self.task).await {
            warn!("Failed to publish result for task {}: {}", self.task.id, e);
        }
        self.task
    }

    async fn cancelled(mut self) -> Task {
        self.task.status = TaskStatus::Cancelled;
        self.task.updated_at = Utc::now();
        info!(
            label = %self.label,
            task_id = %self.task.id,
            attempts = self.attempt_count,
            "Poll session cancelled"
        );

        if let Err(e) = self.sink.on_finished(&self.task).await {
            warn!("Failed to publish cancellation for task {}: {}", self.task.id, e);
        }
        self.task
    }
}
