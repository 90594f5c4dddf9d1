use async_trait::async_trait;
use anyhow::Result;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use std::path::Path;
use std::str::FromStr;
use tracing::info;

use super::TaskStorage;
use crate::schedule::types::{JobKind, Task, TaskStatus};
use crate::web::Pagination;

pub struct SqliteTaskStorage {
    pool: SqlitePool,
}

fn parse_time(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)?.with_timezone(&Utc))
}

impl SqliteTaskStorage {
    pub async fn new(database_url: &str) -> Result<Self> {
        info!("Initializing SQLite task storage at {}", database_url);
        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        Self::connect(options).await
    }

    pub async fn open(path: &Path) -> Result<Self> {
        info!("Initializing SQLite task storage at {}", path.display());
        let options = SqliteConnectOptions::new().filename(path).create_if_missing(true);
        Self::connect(options).await
    }

    async fn connect(options: SqliteConnectOptions) -> Result<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        // 创建任务表
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                job_kind TEXT NOT NULL,
                label TEXT NOT NULL,
                status TEXT NOT NULL,
                attempt INTEGER NOT NULL DEFAULT 0,
                max_attempts INTEGER NOT NULL,
                submitted_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                completed_at TEXT,
                last_payload TEXT,
                artifact TEXT,
                error TEXT
            )
            "#,
        )
        .execute(&pool)
        .await?;

        Ok(Self { pool })
    }

    fn row_to_task(&self, row: SqliteRow) -> Result<Task> {
        let job_kind: String = row.get("job_kind");
        let status: String = row.get("status");
        let last_payload: Option<String> = row.get("last_payload");

        Ok(Task {
            id: row.get("id"),
            job_kind: JobKind::from_str(&job_kind).map_err(|e| anyhow::anyhow!(e))?,
            label: row.get("label"),
            status: TaskStatus::try_from(status).map_err(|e| anyhow::anyhow!(e))?,
            attempt: row.get::<i64, _>("attempt") as u32,
            max_attempts: row.get::<i64, _>("max_attempts") as u32,
            submitted_at: parse_time(row.get("submitted_at"))?,
            updated_at: parse_time(row.get("updated_at"))?,
            completed_at: row
                .get::<Option<String>, _>("completed_at")
                .map(|t| parse_time(&t))
                .transpose()?,
            last_payload: last_payload.map(|p| serde_json::from_str(&p)).transpose()?,
            artifact: row.get("artifact"),
            error: row.get("error"),
        })
    }

    fn rows_to_tasks(&self, rows: Vec<SqliteRow>) -> Result<Vec<Task>> {
        rows.into_iter().map(|row| self.row_to_task(row)).collect()
    }
}

#[async_trait]
impl TaskStorage for SqliteTaskStorage {
    async fn save(&self, task: &Task) -> Result<()> {
        let last_payload = task.last_payload.as_ref().map(serde_json::to_string).transpose()?;

        sqlx::query(
            r#"
            INSERT INTO tasks
            (id, job_kind, label, status, attempt, max_attempts, submitted_at, updated_at, completed_at, last_payload, artifact, error)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                attempt = excluded.attempt,
                updated_at = excluded.updated_at,
                completed_at = excluded.completed_at,
                last_payload = excluded.last_payload,
                artifact = excluded.artifact,
                error = excluded.error
            "#,
        )
        .bind(&task.id)
        .bind(task.job_kind.as_str())
        .bind(&task.label)
        .bind(task.status.to_string())
        .bind(task.attempt as i64)
        .bind(task.max_attempts as i64)
        .bind(task.submitted_at.to_rfc3339())
        .bind(task.updated_at.to_rfc3339())
        .bind(task.completed_at.map(|t| t.to_rfc3339()))
        .bind(last_payload)
        .bind(&task.artifact)
        .bind(&task.error)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn get(&self, task_id: &str) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.map(|row| self.row_to_task(row)).transpose()
    }

    async fn list(&self, pagination: &Pagination) -> Result<Vec<Task>> {
        let pagination = pagination.check();
        let rows = sqlx::query("SELECT * FROM tasks ORDER BY submitted_at DESC LIMIT ? OFFSET ?")
            .bind(pagination.limit() as i64)
            .bind(pagination.offset() as i64)
            .fetch_all(&self.pool)
            .await?;

        self.rows_to_tasks(rows)
    }

    async fn get_by_status(&self, status: TaskStatus) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE status = ? ORDER BY submitted_at ASC")
            .bind(status.to_string())
            .fetch_all(&self.pool)
            .await?;

        self.rows_to_tasks(rows)
    }

    async fn delete(&self, task_id: &str) -> Result<()> {
        sqlx::query("DELETE FROM tasks WHERE id = ?")
            .bind(task_id)
            .execute(&self.pool)
            .await?;

        Ok(())
    }

    async fn cleanup_old(&self, before: DateTime<Utc>) -> Result<u64> {
        let result = sqlx::query(
            r#"
            DELETE FROM tasks
            WHERE status IN ('Succeeded', 'Failed', 'TimedOut', 'Cancelled')
            AND updated_at < ?
            "#,
        )
        .bind(before.to_rfc3339())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }
}
