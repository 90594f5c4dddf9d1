use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use crate::schedule::types::{Task, TaskStatus};
use crate::web::Pagination;
pub mod sqlite;

pub use sqlite::SqliteTaskStorage;

/// Job history. Holds the submission snapshot and the final snapshot of
/// every task.
#[async_trait]
pub trait TaskStorage: Send + Sync + 'static {
    /// Insert or replace the snapshot for `task.id`.
    async fn save(&self, task: &Task) -> Result<()>;
    async fn get(&self, task_id: &str) -> Result<Option<Task>>;
    async fn list(&self, pagination: &Pagination) -> Result<Vec<Task>>;
    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>>;
    async fn delete(&self, task_id: &str) -> Result<()>;
    /// Drop finished records last updated before `before`.
    async fn cleanup_old(&self, before: DateTime<Utc>) -> Result<u64>;
}
