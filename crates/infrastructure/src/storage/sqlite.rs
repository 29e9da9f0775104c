use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{Row, SqlitePool};
use tracing::{debug, instrument};
use uuid::Uuid;

use scheduler_core::{
    ItemKind, Job, JobStore, PrioritizedItem, SchedulerError, SchedulerResult, Task, TaskFilter,
    TaskStatus, TaskStore,
};

const TASK_COLUMNS: &str =
    "id, scheduler_id, type, hash, item, status, job_id, created_at, modified_at";
const JOB_COLUMNS: &str =
    "id, scheduler_id, hash, enabled, item, created_at, modified_at, checked_at";

enum SqlParam {
    Text(String),
    Time(DateTime<Utc>),
}

/// SQLite 任务/作业存储
pub struct SqliteStore {
    pool: SqlitePool,
}

impl SqliteStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 连接数据库并建表；内存数据库只使用单个连接
    pub async fn connect(url: &str, max_connections: u32) -> SchedulerResult<Self> {
        debug!("连接SQLite任务存储: {}", url);

        let connect_options = SqliteConnectOptions::from_str(url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let max_connections = if url.contains(":memory:") {
            1
        } else {
            max_connections
        };

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> SchedulerResult<()> {
        debug!("执行SQLite建表");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS tasks (
                id TEXT PRIMARY KEY,
                scheduler_id TEXT NOT NULL,
                type TEXT NOT NULL,
                hash TEXT,
                item TEXT NOT NULL,
                status TEXT NOT NULL,
                job_id TEXT,
                created_at DATETIME NOT NULL,
                modified_at DATETIME NOT NULL
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS jobs (
                id TEXT PRIMARY KEY,
                scheduler_id TEXT NOT NULL,
                hash TEXT NOT NULL,
                enabled INTEGER NOT NULL DEFAULT 1,
                item TEXT NOT NULL,
                created_at DATETIME NOT NULL,
                modified_at DATETIME NOT NULL,
                checked_at DATETIME NOT NULL,
                UNIQUE (scheduler_id, hash)
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_hash ON tasks(hash)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_scheduler_id ON tasks(scheduler_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_created_at ON tasks(created_at)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_hash ON jobs(hash)",
            "CREATE INDEX IF NOT EXISTS idx_jobs_checked_at ON jobs(scheduler_id, checked_at)",
        ];

        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        Ok(())
    }

    fn parse_uuid(value: &str) -> SchedulerResult<Uuid> {
        Uuid::parse_str(value)
            .map_err(|e| SchedulerError::store_error(format!("无效的UUID {value}: {e}")))
    }

    fn row_to_task(row: &SqliteRow) -> SchedulerResult<Task> {
        let id: String = row.try_get("id")?;
        let task_type: String = row.try_get("type")?;
        let item: String = row.try_get("item")?;
        let status: String = row.try_get("status")?;
        let job_id: Option<String> = row.try_get("job_id")?;

        Ok(Task {
            id: Self::parse_uuid(&id)?,
            scheduler_id: row.try_get("scheduler_id")?,
            task_type: ItemKind::from_str(&task_type).map_err(SchedulerError::store_error)?,
            item: serde_json::from_str::<PrioritizedItem>(&item)?,
            status: TaskStatus::from_str(&status).map_err(SchedulerError::store_error)?,
            job_id: job_id.as_deref().map(Self::parse_uuid).transpose()?,
            created_at: row.try_get("created_at")?,
            modified_at: row.try_get("modified_at")?,
        })
    }

    fn row_to_job(row: &SqliteRow) -> SchedulerResult<Job> {
        let id: String = row.try_get("id")?;
        let item: String = row.try_get("item")?;

        Ok(Job {
            id: Self::parse_uuid(&id)?,
            scheduler_id: row.try_get("scheduler_id")?,
            hash: row.try_get("hash")?,
            enabled: row.try_get("enabled")?,
            item: serde_json::from_str::<PrioritizedItem>(&item)?,
            created_at: row.try_get("created_at")?,
            modified_at: row.try_get("modified_at")?,
            checked_at: row.try_get("checked_at")?,
        })
    }

    fn build_where(filter: &TaskFilter) -> (String, Vec<SqlParam>) {
        let mut conditions = Vec::new();
        let mut params = Vec::new();

        if let Some(scheduler_id) = &filter.scheduler_id {
            conditions.push("scheduler_id = ?");
            params.push(SqlParam::Text(scheduler_id.clone()));
        }
        if let Some(task_type) = filter.task_type {
            conditions.push("type = ?");
            params.push(SqlParam::Text(task_type.as_str().to_string()));
        }
        if let Some(status) = filter.status {
            conditions.push("status = ?");
            params.push(SqlParam::Text(status.as_str().to_string()));
        }
        if let Some(min) = filter.min_created_at {
            conditions.push("created_at >= ?");
            params.push(SqlParam::Time(min));
        }
        if let Some(max) = filter.max_created_at {
            conditions.push("created_at <= ?");
            params.push(SqlParam::Time(max));
        }

        let clause = if conditions.is_empty() {
            String::new()
        } else {
            format!(" WHERE {}", conditions.join(" AND "))
        };
        (clause, params)
    }
}

#[async_trait]
impl TaskStore for SqliteStore {
    async fn get_task_by_id(&self, id: Uuid) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!("SELECT {TASK_COLUMNS} FROM tasks WHERE id = ?"))
            .bind(id.to_string())
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    #[instrument(skip(self, task), fields(task_id = %task.id, scheduler_id = %task.scheduler_id))]
    async fn create_task(&self, task: &Task) -> SchedulerResult<Task> {
        sqlx::query(&format!(
            "INSERT INTO tasks ({TASK_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(task.id.to_string())
        .bind(&task.scheduler_id)
        .bind(task.task_type.as_str())
        .bind(task.hash())
        .bind(serde_json::to_string(&task.item)?)
        .bind(task.status.as_str())
        .bind(task.job_id.map(|id| id.to_string()))
        .bind(task.created_at)
        .bind(task.modified_at)
        .execute(&self.pool)
        .await?;

        debug!("创建任务记录成功");
        Ok(task.clone())
    }

    #[instrument(skip(self, task), fields(task_id = %task.id))]
    async fn update_task(&self, task: &Task) -> SchedulerResult<Task> {
        let result = sqlx::query(
            "UPDATE tasks SET scheduler_id = ?, type = ?, hash = ?, item = ?, status = ?, job_id = ?, modified_at = ? WHERE id = ?",
        )
        .bind(&task.scheduler_id)
        .bind(task.task_type.as_str())
        .bind(task.hash())
        .bind(serde_json::to_string(&task.item)?)
        .bind(task.status.as_str())
        .bind(task.job_id.map(|id| id.to_string()))
        .bind(task.modified_at)
        .bind(task.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::task_not_found(task.id.to_string()));
        }
        Ok(task.clone())
    }

    async fn get_tasks_by_hash(&self, hash: &str) -> SchedulerResult<Vec<Task>> {
        let rows = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE hash = ? ORDER BY created_at DESC, rowid DESC"
        ))
        .bind(hash)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_task).collect()
    }

    async fn get_latest_task_by_hash(&self, hash: &str) -> SchedulerResult<Option<Task>> {
        let row = sqlx::query(&format!(
            "SELECT {TASK_COLUMNS} FROM tasks WHERE hash = ? ORDER BY created_at DESC, rowid DESC LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn get_tasks(&self, filter: &TaskFilter) -> SchedulerResult<(Vec<Task>, usize)> {
        let (clause, params) = Self::build_where(filter);

        let count_sql = format!("SELECT COUNT(*) AS count FROM tasks{clause}");
        let mut count_query = sqlx::query(&count_sql);
        for param in &params {
            count_query = match param {
                SqlParam::Text(v) => count_query.bind(v.clone()),
                SqlParam::Time(v) => count_query.bind(*v),
            };
        }
        let count: i64 = count_query.fetch_one(&self.pool).await?.try_get("count")?;

        let select_sql = format!(
            "SELECT {TASK_COLUMNS} FROM tasks{clause} ORDER BY created_at DESC, rowid DESC LIMIT ? OFFSET ?"
        );
        let mut query = sqlx::query(&select_sql);
        for param in &params {
            query = match param {
                SqlParam::Text(v) => query.bind(v.clone()),
                SqlParam::Time(v) => query.bind(*v),
            };
        }
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let rows = query
            .bind(limit)
            .bind(filter.offset as i64)
            .fetch_all(&self.pool)
            .await?;

        let tasks = rows
            .iter()
            .map(Self::row_to_task)
            .collect::<SchedulerResult<Vec<_>>>()?;
        Ok((tasks, count as usize))
    }

    async fn cancel_tasks(&self, scheduler_id: &str, ids: &[Uuid]) -> SchedulerResult<usize> {
        if ids.is_empty() {
            return Ok(0);
        }

        let placeholders = vec!["?"; ids.len()].join(", ");
        let sql = format!(
            "UPDATE tasks SET status = ?, modified_at = ? WHERE scheduler_id = ? AND status NOT IN ('completed', 'failed', 'cancelled') AND id IN ({placeholders})"
        );

        let mut query = sqlx::query(&sql)
            .bind(TaskStatus::Cancelled.as_str())
            .bind(Utc::now())
            .bind(scheduler_id);
        for id in ids {
            query = query.bind(id.to_string());
        }

        let result = query.execute(&self.pool).await?;
        Ok(result.rows_affected() as usize)
    }
}

#[async_trait]
impl JobStore for SqliteStore {
    async fn get_job_by_hash(&self, hash: &str) -> SchedulerResult<Option<Job>> {
        let row = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE hash = ? LIMIT 1"
        ))
        .bind(hash)
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_job).transpose()
    }

    #[instrument(skip(self, job), fields(job_id = %job.id, hash = %job.hash))]
    async fn create_job(&self, job: &Job) -> SchedulerResult<Job> {
        sqlx::query(&format!(
            "INSERT INTO jobs ({JOB_COLUMNS}) VALUES (?, ?, ?, ?, ?, ?, ?, ?)"
        ))
        .bind(job.id.to_string())
        .bind(&job.scheduler_id)
        .bind(&job.hash)
        .bind(job.enabled)
        .bind(serde_json::to_string(&job.item)?)
        .bind(job.created_at)
        .bind(job.modified_at)
        .bind(job.checked_at)
        .execute(&self.pool)
        .await?;

        Ok(job.clone())
    }

    async fn update_job(&self, job: &Job) -> SchedulerResult<Job> {
        let result = sqlx::query(
            "UPDATE jobs SET enabled = ?, item = ?, modified_at = ?, checked_at = ? WHERE id = ?",
        )
        .bind(job.enabled)
        .bind(serde_json::to_string(&job.item)?)
        .bind(job.modified_at)
        .bind(job.checked_at)
        .bind(job.id.to_string())
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            return Err(SchedulerError::store_error(format!("作业不存在: {}", job.id)));
        }
        Ok(job.clone())
    }

    async fn get_jobs(&self, scheduler_id: &str, enabled: Option<bool>) -> SchedulerResult<Vec<Job>> {
        let rows = match enabled {
            Some(enabled) => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE scheduler_id = ? AND enabled = ? ORDER BY created_at DESC"
                ))
                .bind(scheduler_id)
                .bind(enabled)
                .fetch_all(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!(
                    "SELECT {JOB_COLUMNS} FROM jobs WHERE scheduler_id = ? ORDER BY created_at DESC"
                ))
                .bind(scheduler_id)
                .fetch_all(&self.pool)
                .await?
            }
        };

        rows.iter().map(Self::row_to_job).collect()
    }

    async fn get_scheduled_jobs(
        &self,
        scheduler_id: &str,
        max_checked_at: DateTime<Utc>,
    ) -> SchedulerResult<Vec<Job>> {
        let rows = sqlx::query(&format!(
            "SELECT {JOB_COLUMNS} FROM jobs WHERE scheduler_id = ? AND enabled = 1 AND checked_at <= ? ORDER BY checked_at ASC"
        ))
        .bind(scheduler_id)
        .bind(max_checked_at)
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_job).collect()
    }
}
