mod session;

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::mpsc;
use tokio::task::{JoinError, JoinHandle};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::schedule::callback::ResultSink;
use crate::schedule::predicate::CompletionPredicate;
use crate::schedule::providers::StatusSource;
use crate::schedule::types::Task;
use crate::{POLL_INTERVAL_MS, POLL_MAX_ATTEMPTS};
use session::PollSession;

const PUSH_BUFFER: usize = 8;

#[derive(Debug, Clone)]
pub struct PollOptions {
    // delay before every status check, including the first
    pub interval: Duration,
    pub max_attempts: u32,
    /// Stop on errors that will not go away (401, 404, missing key) instead
    /// of retrying until the budget runs out.
    pub abort_on_fatal: bool,
}

impl Default for PollOptions {
    fn default() -> Self {
        Self {
            interval: Duration::from_millis(5000),
            max_attempts: 60,
            abort_on_fatal: true,
        }
    }
}

impl PollOptions {
    pub fn from_env() -> Self {
        Self::default()
            .with_interval(Duration::from_millis(*POLL_INTERVAL_MS))
            .with_max_attempts(*POLL_MAX_ATTEMPTS)
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    pub fn with_abort_on_fatal(mut self, abort_on_fatal: bool) -> Self {
        self.abort_on_fatal = abort_on_fatal;
        self
    }
}

/// Everything needed to drive one task.
pub struct PollRequest {
    pub label: String,
    pub task: Task,
    pub source: Arc<dyn StatusSource>,
    pub predicate: CompletionPredicate,
    pub options: PollOptions,
}

struct SessionEntry {
    task_id: String,
    generation: u64,
    token: CancellationToken,
    pushes: mpsc::Sender<Value>,
    started_at: DateTime<Utc>,
}

type Registry = Arc<Mutex<HashMap<String, SessionEntry>>>;

fn lock(registry: &Registry) -> MutexGuard<'_, HashMap<String, SessionEntry>> {
    match registry.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// Remove the label's entry, but only if it still belongs to `generation`.
/// A superseded session must never evict its successor.
fn release(registry: &Registry, label: &str, generation: u64) {
    let mut sessions = lock(registry);
    if sessions.get(label).is_some_and(|entry| entry.generation == generation) {
        sessions.remove(label);
    }
}

/// What happened to a pushed payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    /// A session owns the task but its push buffer is full. The payload was
    /// dropped; the session keeps polling.
    Busy,
    NoSession,
}

#[derive(Debug, Clone, Serialize)]
pub struct ActiveSession {
    pub label: String,
    pub task_id: String,
    pub started_at: DateTime<Utc>,
}

/// Handle to a spawned session. Dropping it leaves the session running.
pub struct SessionHandle {
    pub label: String,
    pub task_id: String,
    join: JoinHandle<Task>,
}

impl SessionHandle {
    /// Wait for the session to end and return the final task snapshot.
    pub async fn join(self) -> Result<Task, JoinError> {
        self.join.await
    }
}

/// Owns every active poll session, keyed by label. At most one session per
/// label; starting another cancels the first.
pub struct PollSessionManager {
    registry: Registry,
    sink: Arc<dyn ResultSink>,
    next_generation: AtomicU64,
}

impl PollSessionManager {
    pub fn new(sink: Arc<dyn ResultSink>) -> Self {
        Self {
            registry: Arc::new(Mutex::new(HashMap::new())),
            sink,
            next_generation: AtomicU64::new(1),
        }
    }

    pub fn start(&self, request: PollRequest) -> SessionHandle {
        let PollRequest { label, task, source, predicate, options } = request;
        let generation = self.next_generation.fetch_add(1, Ordering::Relaxed);
        let token = CancellationToken::new();
        let (push_tx, push_rx) = mpsc::channel(PUSH_BUFFER);
        let task_id = task.id.clone();

        {
            let mut sessions = lock(&self.registry);
            if let Some(previous) = sessions.remove(&label) {
                info!(
                    label = %label,
                    previous_task = %previous.task_id,
                    task_id = %task_id,
                    "Superseding running poll session"
                );
                previous.token.cancel();
            }
            sessions.insert(
                label.clone(),
                SessionEntry {
                    task_id: task_id.clone(),
                    generation,
                    token: token.clone(),
                    pushes: push_tx,
                    started_at: Utc::now(),
                },
            );
        }

        let session = PollSession {
            label: label.clone(),
            task,
            options,
            attempt_count: 0,
            started_at: Instant::now(),
            generation,
            source,
            predicate,
            sink: self.sink.clone(),
            token,
            pushes: push_rx,
            registry: self.registry.clone(),
        };

        SessionHandle {
            label,
            task_id,
            join: tokio::spawn(session.run()),
        }
    }

    /// Stop the label's session. Returns false when nothing was running.
    pub fn cancel(&self, label: &str) -> bool {
        let entry = lock(&self.registry).remove(label);
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_task(&self, task_id: &str) -> bool {
        let entry = {
            let mut sessions = lock(&self.registry);
            let label = sessions
                .iter()
                .find(|(_, entry)| entry.task_id == task_id)
                .map(|(label, _)| label.clone());
            label.and_then(|label| sessions.remove(&label))
        };
        match entry {
            Some(entry) => {
                entry.token.cancel();
                true
            }
            None => false,
        }
    }

    pub fn cancel_all(&self) -> usize {
        let entries: Vec<SessionEntry> = lock(&self.registry).drain().map(|(_, e)| e).collect();
        for entry in &entries {
            entry.token.cancel();
        }
        if !entries.is_empty() {
            info!("Cancelled {} poll sessions", entries.len());
        }
        entries.len()
    }

    /// Hand a pushed status payload to the session polling `task_id`.
    pub fn deliver(&self, task_id: &str, payload: Value) -> Delivery {
        let sender = lock(&self.registry)
            .values()
            .find(|entry| entry.task_id == task_id)
            .map(|entry| entry.pushes.clone());
        let Some(sender) = sender else {
            return Delivery::NoSession;
        };
        match sender.try_send(payload) {
            Ok(()) => Delivery::Delivered,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(task_id = %task_id, "Push buffer full, dropping payload");
                Delivery::Busy
            }
            // session ended between lookup and send
            Err(mpsc::error::TrySendError::Closed(_)) => Delivery::NoSession,
        }
    }

    pub fn is_active(&self, label: &str) -> bool {
        lock(&self.registry).contains_key(label)
    }

    pub fn task_for(&self, label: &str) -> Option<String> {
        lock(&self.registry).get(label).map(|entry| entry.task_id.clone())
    }

    pub fn active(&self) -> Vec<ActiveSession> {
        let mut active: Vec<ActiveSession> = lock(&self.registry)
            .iter()
            .map(|(label, entry)| ActiveSession {
                label: label.clone(),
                task_id: entry.task_id.clone(),
                started_at: entry.started_at,
            })
            .collect();
        active.sort_by(|a, b| a.label.cmp(&b.label));
        active
    }
}

// make sure no timer outlives its owner
impl Drop for PollSessionManager {
    fn drop(&mut self) {
        self.cancel_all();
    }
}
