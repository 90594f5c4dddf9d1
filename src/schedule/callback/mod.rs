use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;
use tracing::warn;

use crate::schedule::error::PollError;
use crate::schedule::types::{Task, TaskStatus};
use crate::storage::task::TaskStorage;

/// Receives every observation a poll session makes.
#[async_trait]
pub trait ResultSink: Send + Sync {
    /// A tick (or push) produced a non-terminal payload.
    async fn on_update(&self, task: &Task) -> Result<()>;
    /// A status check failed. The session keeps going unless `task` is terminal.
    async fn on_poll_error(&self, task: &Task, error: &PollError) -> Result<()>;
    /// The session ended: terminal status or cancelled.
    async fn on_finished(&self, task: &Task) -> Result<()>;
}

// 内部事件回调实现
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PollEvent {
    Update {
        task: Task,
    },
    PollError {
        task_id: String,
        label: String,
        attempt: u32,
        max_attempts: u32,
        error: String,
        fatal: bool,
    },
    Finished {
        task: Task,
    },
}

impl PollEvent {
    pub fn task_id(&self) -> &str {
        match self {
            PollEvent::Update { task } | PollEvent::Finished { task } => &task.id,
            PollEvent::PollError { task_id, .. } => task_id,
        }
    }

    pub fn label(&self) -> &str {
        match self {
            PollEvent::Update { task } | PollEvent::Finished { task } => &task.label,
            PollEvent::PollError { label, .. } => label,
        }
    }
}

/// In-process event bus the UI layer subscribes to.
#[derive(Clone)]
pub struct EventSink {
    sender: tokio::sync::broadcast::Sender<PollEvent>,
}

impl EventSink {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = tokio::sync::broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<PollEvent> {
        self.sender.subscribe()
    }

    fn publish(&self, event: PollEvent) {
        // no subscribers is fine
        let _ = self.sender.send(event);
    }
}

#[async_trait]
impl ResultSink for EventSink {
    async fn on_update(&self, task: &Task) -> Result<()> {
        self.publish(PollEvent::Update { task: task.clone() });
        Ok(())
    }

    async fn on_poll_error(&self, task: &Task, error: &PollError) -> Result<()> {
        self.publish(PollEvent::PollError {
            task_id: task.id.clone(),
            label: task.label.clone(),
            attempt: task.attempt,
            max_attempts: task.max_attempts,
            error: error.to_string(),
            fatal: error.is_fatal(),
        });
        Ok(())
    }

    async fn on_finished(&self, task: &Task) -> Result<()> {
        self.publish(PollEvent::Finished { task: task.clone() });
        Ok(())
    }
}

/// Latest snapshot per task id, plus the last task seen for each label.
#[derive(Default)]
pub struct ResultStore {
    tasks: RwLock<HashMap<String, Task>>,
    labels: RwLock<HashMap<String, String>>,
}

impl ResultStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Provider outcomes (succeeded/failed) are final; later snapshots for the
    /// same task are dropped. Returns whether the snapshot was stored.
    pub fn record(&self, task: &Task) -> bool {
        let mut tasks = match self.tasks.write() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(existing) = tasks.get(&task.id) {
            if existing.status.is_settled() && existing.status != task.status {
                return false;
            }
            // a stopped task only moves on to a provider outcome
            let stopped = matches!(existing.status, TaskStatus::Cancelled | TaskStatus::TimedOut);
            if stopped && !task.status.is_settled() && existing.status != task.status {
                return false;
            }
        }
        let mut labels = match self.labels.write() {
            Ok(labels) => labels,
            Err(poisoned) => poisoned.into_inner(),
        };
        // a late snapshot of a superseded task keeps the label on its successor
        let newest = labels
            .get(&task.label)
            .and_then(|id| tasks.get(id))
            .map_or(true, |current| {
                current.id == task.id || task.submitted_at >= current.submitted_at
            });
        if newest {
            labels.insert(task.label.clone(), task.id.clone());
        }
        tasks.insert(task.id.clone(), task.clone());
        true
    }

    pub fn get(&self, task_id: &str) -> Option<Task> {
        let tasks = match self.tasks.read() {
            Ok(tasks) => tasks,
            Err(poisoned) => poisoned.into_inner(),
        };
        tasks.get(task_id).cloned()
    }

    pub fn latest_for_label(&self, label: &str) -> Option<Task> {
        let task_id = {
            let labels = match self.labels.read() {
                Ok(labels) => labels,
                Err(poisoned) => poisoned.into_inner(),
            };
            labels.get(label).cloned()
        }?;
        self.get(&task_id)
    }
}

#[async_trait]
impl ResultSink for ResultStore {
    async fn on_update(&self, task: &Task) -> Result<()> {
        self.record(task);
        Ok(())
    }

    async fn on_poll_error(&self, _task: &Task, _error: &PollError) -> Result<()> {
        Ok(())
    }

    async fn on_finished(&self, task: &Task) -> Result<()> {
        self.record(task);
        Ok(())
    }
}

/// Persists the submission snapshot and the final snapshot of every task.
pub struct StorageSink {
    storage: Arc<dyn TaskStorage>,
}

impl StorageSink {
    pub fn new(storage: Arc<dyn TaskStorage>) -> Self {
        Self { storage }
    }
}

#[async_trait]
impl ResultSink for StorageSink {
    async fn on_update(&self, task: &Task) -> Result<()> {
        if task.attempt == 0 && task.status == TaskStatus::Pending {
            self.storage.save(task).await?;
        }
        Ok(())
    }

    async fn on_poll_error(&self, _task: &Task, _error: &PollError) -> Result<()> {
        Ok(())
    }

    async fn on_finished(&self, task: &Task) -> Result<()> {
        self.storage.save(task).await
    }
}

// HTTP 回调实现
pub struct HttpSink {
    client: reqwest::Client,
    callback_url: String,
}

#[derive(Debug, Serialize)]
struct WebhookPayload<'a> {
    task_id: &'a str,
    status: TaskStatus,
    data: &'a Task,
}

impl HttpSink {
    pub fn new(callback_url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            callback_url,
        }
    }

    async fn send(&self, task: &Task) -> Result<()> {
        let payload = WebhookPayload {
            task_id: &task.id,
            status: task.status,
            data: task,
        };
        self.client
            .post(&self.callback_url)
            .json(&payload)
            .send()
            .await?
            .error_for_status()?;
        Ok(())
    }
}

#[async_trait]
impl ResultSink for HttpSink {
    async fn on_update(&self, _task: &Task) -> Result<()> {
        Ok(())
    }

    async fn on_poll_error(&self, _task: &Task, _error: &PollError) -> Result<()> {
        Ok(())
    }

    async fn on_finished(&self, task: &Task) -> Result<()> {
        if task.status == TaskStatus::Cancelled {
            return Ok(());
        }
        self.send(task).await
    }
}

/// Fans out to several sinks. A failing sink is logged and does not stop the
/// others.
#[derive(Default, Clone)]
pub struct SinkSet {
    sinks: Vec<Arc<dyn ResultSink>>,
}

impl SinkSet {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ResultSink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

#[async_trait]
impl ResultSink for SinkSet {
    async fn on_update(&self, task: &Task) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_update(task).await {
                warn!("Result sink failed on update for task {}: {}", task.id, e);
            }
        }
        Ok(())
    }

    async fn on_poll_error(&self, task: &Task, error: &PollError) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_poll_error(task, error).await {
                warn!("Result sink failed on poll error for task {}: {}", task.id, e);
            }
        }
        Ok(())
    }

    async fn on_finished(&self, task: &Task) -> Result<()> {
        for sink in &self.sinks {
            if let Err(e) = sink.on_finished(task).await {
                warn!("Result sink failed on finish for task {}: {}", task.id, e);
            }
        }
        Ok(())
    }
}
