//! 嵌入式SQLite持久化
//!
//! 调度器的可选镜像存储：任务与批次的快照写入（UPSERT），供重启后
//! 追溯历史与对外查询。内存状态是调度事实来源，这里不做状态机校验。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};
use tracing::debug;

use aqueue_domain::{
    AnalysisBatch, AnalysisTask, BatchStatus, BatchStore, TaskFilter, TaskPriority, TaskStatus,
    TaskStore,
};
use aqueue_errors::{QueueError, QueueResult};

pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    /// 创建嵌入式存储，自动建库建表
    pub async fn new_embedded(database_url: &str, max_connections: u32) -> QueueResult<Self> {
        use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
        use std::str::FromStr;

        debug!("创建嵌入式SQLite存储: {}", database_url);

        let connect_options = SqliteConnectOptions::from_str(database_url)?
            .create_if_missing(true)
            .journal_mode(sqlx::sqlite::SqliteJournalMode::Wal);

        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections)
            .min_connections(1)
            .connect_with(connect_options)
            .await?;

        Self::run_migrations(&pool).await?;

        debug!("嵌入式SQLite存储初始化完成");
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn run_migrations(pool: &SqlitePool) -> QueueResult<()> {
        debug!("执行SQLite迁移");

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_tasks (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                symbol TEXT NOT NULL,
                parameters TEXT NOT NULL DEFAULT '{}',
                priority TEXT NOT NULL DEFAULT 'normal',
                status TEXT NOT NULL DEFAULT 'queued',
                batch_id TEXT,
                worker_id TEXT,
                created_at DATETIME NOT NULL,
                enqueued_at DATETIME NOT NULL,
                started_at DATETIME,
                completed_at DATETIME,
                cancelled_at DATETIME,
                requeued_at DATETIME,
                retry_count INTEGER NOT NULL DEFAULT 0,
                result TEXT,
                error_message TEXT
            )
            "#,
        )
        .execute(pool)
        .await?;

        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS analysis_batches (
                id TEXT PRIMARY KEY,
                user_id TEXT NOT NULL,
                task_ids TEXT NOT NULL DEFAULT '[]',
                total_tasks INTEGER NOT NULL DEFAULT 0,
                completed_tasks INTEGER NOT NULL DEFAULT 0,
                failed_tasks INTEGER NOT NULL DEFAULT 0,
                cancelled_tasks INTEGER NOT NULL DEFAULT 0,
                status TEXT NOT NULL DEFAULT 'pending',
                created_at DATETIME NOT NULL,
                completed_at DATETIME
            )
            "#,
        )
        .execute(pool)
        .await?;

        let indexes = [
            "CREATE INDEX IF NOT EXISTS idx_tasks_user_id ON analysis_tasks(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_status ON analysis_tasks(status)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_batch_id ON analysis_tasks(batch_id)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_symbol ON analysis_tasks(symbol)",
            "CREATE INDEX IF NOT EXISTS idx_tasks_completed_at ON analysis_tasks(completed_at)",
            "CREATE INDEX IF NOT EXISTS idx_batches_user_id ON analysis_batches(user_id)",
            "CREATE INDEX IF NOT EXISTS idx_batches_status ON analysis_batches(status)",
        ];
        for index_sql in indexes {
            sqlx::query(index_sql).execute(pool).await?;
        }

        debug!("SQLite迁移完成");
        Ok(())
    }

    fn row_to_task(row: &sqlx::sqlite::SqliteRow) -> QueueResult<AnalysisTask> {
        let parameters_text: String = row.try_get("parameters")?;
        let parameters = serde_json::from_str(&parameters_text)?;

        let result = row
            .try_get::<Option<String>, _>("result")?
            .map(|text| serde_json::from_str(&text))
            .transpose()?;

        let priority_text: String = row.try_get("priority")?;
        let priority = TaskPriority::parse(&priority_text).ok_or_else(|| {
            QueueError::Persistence(format!("无法识别的优先级: {priority_text}"))
        })?;

        let status_text: String = row.try_get("status")?;
        let status = TaskStatus::parse(&status_text).ok_or_else(|| {
            QueueError::Persistence(format!("无法识别的任务状态: {status_text}"))
        })?;

        Ok(AnalysisTask {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            symbol: row.try_get("symbol")?,
            parameters,
            priority,
            status,
            batch_id: row.try_get("batch_id")?,
            worker_id: row.try_get("worker_id")?,
            created_at: row.try_get("created_at")?,
            enqueued_at: row.try_get("enqueued_at")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            cancelled_at: row.try_get("cancelled_at")?,
            requeued_at: row.try_get("requeued_at")?,
            retry_count: row.try_get("retry_count")?,
            result,
            error_message: row.try_get("error_message")?,
        })
    }

    fn row_to_batch(row: &sqlx::sqlite::SqliteRow) -> QueueResult<AnalysisBatch> {
        let task_ids_text: String = row.try_get("task_ids")?;
        let task_ids = serde_json::from_str(&task_ids_text)?;

        let status_text: String = row.try_get("status")?;
        let status = BatchStatus::parse(&status_text).ok_or_else(|| {
            QueueError::Persistence(format!("无法识别的批次状态: {status_text}"))
        })?;

        Ok(AnalysisBatch {
            id: row.try_get("id")?,
            user_id: row.try_get("user_id")?,
            task_ids,
            total_tasks: row.try_get("total_tasks")?,
            completed_tasks: row.try_get("completed_tasks")?,
            failed_tasks: row.try_get("failed_tasks")?,
            cancelled_tasks: row.try_get("cancelled_tasks")?,
            status,
            created_at: row.try_get("created_at")?,
            completed_at: row.try_get("completed_at")?,
        })
    }
}

#[async_trait]
impl TaskStore for SqliteQueueStore {
    async fn save_task(&self, task: &AnalysisTask) -> QueueResult<()> {
        let parameters = serde_json::to_string(&task.parameters)?;
        let result = task
            .result
            .as_ref()
            .map(serde_json::to_string)
            .transpose()?;

        sqlx::query(
            r#"
            INSERT INTO analysis_tasks (
                id, user_id, symbol, parameters, priority, status, batch_id, worker_id,
                created_at, enqueued_at, started_at, completed_at, cancelled_at, requeued_at,
                retry_count, result, error_message
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                status = excluded.status,
                worker_id = excluded.worker_id,
                started_at = excluded.started_at,
                completed_at = excluded.completed_at,
                cancelled_at = excluded.cancelled_at,
                requeued_at = excluded.requeued_at,
                retry_count = excluded.retry_count,
                result = excluded.result,
                error_message = excluded.error_message
            "#,
        )
        .bind(&task.id)
        .bind(&task.user_id)
        .bind(&task.symbol)
        .bind(parameters)
        .bind(task.priority.as_str())
        .bind(task.status.as_str())
        .bind(&task.batch_id)
        .bind(&task.worker_id)
        .bind(task.created_at)
        .bind(task.enqueued_at)
        .bind(task.started_at)
        .bind(task.completed_at)
        .bind(task.cancelled_at)
        .bind(task.requeued_at)
        .bind(task.retry_count)
        .bind(result)
        .bind(&task.error_message)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_task(&self, task_id: &str) -> QueueResult<Option<AnalysisTask>> {
        let row = sqlx::query("SELECT * FROM analysis_tasks WHERE id = ?")
            .bind(task_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_task).transpose()
    }

    async fn query_tasks(&self, filter: &TaskFilter) -> QueueResult<Vec<AnalysisTask>> {
        let mut sql = String::from("SELECT * FROM analysis_tasks WHERE 1=1");
        if filter.user_id.is_some() {
            sql.push_str(" AND user_id = ?");
        }
        if filter.status.is_some() {
            sql.push_str(" AND status = ?");
        }
        if filter.batch_id.is_some() {
            sql.push_str(" AND batch_id = ?");
        }
        if filter.symbol.is_some() {
            sql.push_str(" AND symbol = ?");
        }
        sql.push_str(" ORDER BY created_at DESC LIMIT ? OFFSET ?");

        let mut query = sqlx::query(&sql);
        if let Some(user_id) = &filter.user_id {
            query = query.bind(user_id);
        }
        if let Some(status) = &filter.status {
            query = query.bind(status.as_str());
        }
        if let Some(batch_id) = &filter.batch_id {
            query = query.bind(batch_id);
        }
        if let Some(symbol) = &filter.symbol {
            query = query.bind(symbol);
        }
        query = query
            .bind(filter.limit.unwrap_or(100))
            .bind(filter.offset.unwrap_or(0));

        let rows = query.fetch_all(&self.pool).await?;
        rows.iter().map(Self::row_to_task).collect()
    }

    async fn delete_terminal_before(&self, cutoff: DateTime<Utc>) -> QueueResult<u64> {
        let deleted = sqlx::query(
            r#"
            DELETE FROM analysis_tasks
            WHERE status IN ('completed', 'failed', 'cancelled')
              AND COALESCE(completed_at, cancelled_at) < ?
            "#,
        )
        .bind(cutoff)
        .execute(&self.pool)
        .await?
        .rows_affected();

        if deleted > 0 {
            debug!("SQLite清理了 {} 条历史任务", deleted);
        }
        Ok(deleted)
    }
}

#[async_trait]
impl BatchStore for SqliteQueueStore {
    async fn save_batch(&self, batch: &AnalysisBatch) -> QueueResult<()> {
        let task_ids = serde_json::to_string(&batch.task_ids)?;

        sqlx::query(
            r#"
            INSERT INTO analysis_batches (
                id, user_id, task_ids, total_tasks, completed_tasks, failed_tasks,
                cancelled_tasks, status, created_at, completed_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                task_ids = excluded.task_ids,
                total_tasks = excluded.total_tasks,
                completed_tasks = excluded.completed_tasks,
                failed_tasks = excluded.failed_tasks,
                cancelled_tasks = excluded.cancelled_tasks,
                status = excluded.status,
                completed_at = excluded.completed_at
            "#,
        )
        .bind(&batch.id)
        .bind(&batch.user_id)
        .bind(task_ids)
        .bind(batch.total_tasks)
        .bind(batch.completed_tasks)
        .bind(batch.failed_tasks)
        .bind(batch.cancelled_tasks)
        .bind(batch.status.as_str())
        .bind(batch.created_at)
        .bind(batch.completed_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn load_batch(&self, batch_id: &str) -> QueueResult<Option<AnalysisBatch>> {
        let row = sqlx::query("SELECT * FROM analysis_batches WHERE id = ?")
            .bind(batch_id)
            .fetch_optional(&self.pool)
            .await?;

        row.as_ref().map(Self::row_to_batch).transpose()
    }

    async fn list_batches_by_user(&self, user_id: &str) -> QueueResult<Vec<AnalysisBatch>> {
        let rows =
            sqlx::query("SELECT * FROM analysis_batches WHERE user_id = ? ORDER BY created_at DESC")
                .bind(user_id)
                .fetch_all(&self.pool)
                .await?;

        rows.iter().map(Self::row_to_batch).collect()
    }
}
