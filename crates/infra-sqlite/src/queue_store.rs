// SQLite QueueStore Implementation
//
// State transitions are conditional UPDATEs (`... AND state = ?`), so a
// transition that lost a race affects zero rows instead of clobbering the
// winner. Transitions that also touch the outbox run in one transaction.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use citewatch_core::domain::{
    FailureCategory, QueueEntry, SourceIds, TaskResult, TaskState, WorkItem, WorkItemId,
};
use citewatch_core::error::{AppError, Result};
use citewatch_core::port::{FailureOutcome, QueueCounts, QueueStore};
use sqlx::{QueryBuilder, Sqlite, SqliteConnection, SqlitePool};

pub struct SqliteQueueStore {
    pool: SqlitePool,
}

impl SqliteQueueStore {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

/// Put a result into the outbox. A second result for the same task is ignored.
async fn insert_result(
    conn: &mut SqliteConnection,
    result: &TaskResult,
    now_millis: i64,
) -> Result<()> {
    let payload = serde_json::to_string(result)?;
    sqlx::query("INSERT OR IGNORE INTO results (task_id, payload, created_at) VALUES (?, ?, ?)")
        .bind(&result.task_id)
        .bind(payload)
        .bind(now_millis)
        .execute(conn)
        .await
        .map_err(map_sqlx_error)?;
    Ok(())
}

#[async_trait]
impl QueueStore for SqliteQueueStore {
    async fn insert_if_absent(&self, entry: &QueueEntry) -> Result<bool> {
        let item = &entry.work_item;
        let result = sqlx::query(
            r#"
            INSERT OR IGNORE INTO work_items (
                id, target_id, query_text, query_item_id, project_id, created_at,
                state, retry_count, last_error, failure_category,
                available_at, started_at, finished_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&item.id)
        .bind(&item.target_id)
        .bind(&item.query_text)
        .bind(&item.source_ids.query_item_id)
        .bind(&item.source_ids.project_id)
        .bind(item.created_at)
        .bind(entry.state.as_str())
        .bind(entry.retry_count)
        .bind(&entry.last_error)
        .bind(entry.failure_category.map(|c| c.as_str()))
        .bind(entry.available_at)
        .bind(entry.started_at)
        .bind(entry.finished_at)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn find(&self, id: &str) -> Result<Option<QueueEntry>> {
        let row = sqlx::query_as::<_, WorkItemRow>("SELECT * FROM work_items WHERE id = ?")
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(WorkItemRow::into_entry).transpose()
    }

    async fn requeue_running(&self, now_millis: i64) -> Result<u64> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET state = ?, started_at = NULL, available_at = ?
            WHERE state = ?
            "#,
        )
        .bind(TaskState::Pending.as_str())
        .bind(now_millis)
        .bind(TaskState::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected())
    }

    async fn requeue(&self, id: &str, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET state = ?, started_at = NULL, available_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(TaskState::Pending.as_str())
        .bind(now_millis)
        .bind(id)
        .bind(TaskState::Running.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn count_running(&self) -> Result<i64> {
        sqlx::query_scalar("SELECT COUNT(*) FROM work_items WHERE state = ?")
            .bind(TaskState::Running.as_str())
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)
    }

    async fn next_pending(
        &self,
        now_millis: i64,
        exclude_targets: &[String],
    ) -> Result<Option<QueueEntry>> {
        let mut query: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT * FROM work_items WHERE state = ");
        query.push_bind(TaskState::Pending.as_str());
        query.push(" AND available_at <= ");
        query.push_bind(now_millis);
        if !exclude_targets.is_empty() {
            query.push(" AND target_id NOT IN (");
            let mut separated = query.separated(", ");
            for target in exclude_targets {
                separated.push_bind(target);
            }
            separated.push_unseparated(")");
        }
        query.push(" ORDER BY seq ASC LIMIT 1");

        let row = query
            .build_query_as::<WorkItemRow>()
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        row.map(WorkItemRow::into_entry).transpose()
    }

    async fn mark_running(&self, id: &str, now_millis: i64) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE work_items
            SET state = ?, started_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(TaskState::Running.as_str())
        .bind(now_millis)
        .bind(id)
        .bind(TaskState::Pending.as_str())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        Ok(result.rows_affected() == 1)
    }

    async fn mark_completed(
        &self,
        id: &str,
        result: &TaskResult,
        now_millis: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let updated = sqlx::query(
            r#"
            UPDATE work_items
            SET state = ?, finished_at = ?
            WHERE id = ? AND state = ?
            "#,
        )
        .bind(TaskState::Completed.as_str())
        .bind(now_millis)
        .bind(id)
        .bind(TaskState::Running.as_str())
        .execute(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        insert_result(&mut tx, result, now_millis).await?;
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn record_failure(
        &self,
        id: &str,
        message: &str,
        category: FailureCategory,
        outcome: &FailureOutcome,
        now_millis: i64,
    ) -> Result<bool> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let updated = match outcome {
            FailureOutcome::Retry { available_at } => sqlx::query(
                r#"
                UPDATE work_items
                SET state = ?, retry_count = retry_count + 1, last_error = ?,
                    failure_category = ?, available_at = ?, started_at = NULL
                WHERE id = ? AND state = ?
                "#,
            )
            .bind(TaskState::Pending.as_str())
            .bind(message)
            .bind(category.as_str())
            .bind(*available_at)
            .bind(id)
            .bind(TaskState::Running.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?,
            FailureOutcome::Terminal { .. } => sqlx::query(
                r#"
                UPDATE work_items
                SET state = ?, retry_count = retry_count + 1, last_error = ?,
                    failure_category = ?, finished_at = ?
                WHERE id = ? AND state = ?
                "#,
            )
            .bind(TaskState::Failed.as_str())
            .bind(message)
            .bind(category.as_str())
            .bind(now_millis)
            .bind(id)
            .bind(TaskState::Running.as_str())
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?,
        };

        if updated.rows_affected() == 0 {
            tx.rollback().await.map_err(map_sqlx_error)?;
            return Ok(false);
        }

        if let FailureOutcome::Terminal { result } = outcome {
            insert_result(&mut tx, result, now_millis).await?;
        }
        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(true)
    }

    async fn unsubmitted_results(&self, limit: usize) -> Result<Vec<TaskResult>> {
        let payloads: Vec<String> =
            sqlx::query_scalar("SELECT payload FROM results ORDER BY seq ASC LIMIT ?")
                .bind(limit as i64)
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        payloads
            .iter()
            .map(|p| serde_json::from_str(p).map_err(AppError::from))
            .collect()
    }

    async fn remove_submitted(&self, ids: &[WorkItemId]) -> Result<u64> {
        if ids.is_empty() {
            return Ok(0);
        }
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let mut delete_results: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM results WHERE task_id IN (");
        let mut separated = delete_results.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        let removed = delete_results
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?
            .rows_affected();

        let mut delete_entries: QueryBuilder<Sqlite> =
            QueryBuilder::new("DELETE FROM work_items WHERE state IN (");
        delete_entries.push_bind(TaskState::Completed.as_str());
        delete_entries.push(", ");
        delete_entries.push_bind(TaskState::Failed.as_str());
        delete_entries.push(") AND id IN (");
        let mut separated = delete_entries.separated(", ");
        for id in ids {
            separated.push_bind(id);
        }
        separated.push_unseparated(")");
        delete_entries
            .build()
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx_error)?;

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(removed)
    }

    async fn counts(&self) -> Result<QueueCounts> {
        let rows: Vec<(String, i64)> =
            sqlx::query_as("SELECT state, COUNT(*) FROM work_items GROUP BY state")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        let unsubmitted: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM results")
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx_error)?;

        let mut counts = QueueCounts {
            unsubmitted,
            ..Default::default()
        };
        for (state, n) in rows {
            match TaskState::parse(&state) {
                Some(TaskState::Pending) => counts.pending = n,
                Some(TaskState::Running) => counts.running = n,
                Some(TaskState::Completed) => counts.completed = n,
                Some(TaskState::Failed) => counts.failed = n,
                None => tracing::warn!(state = %state, "Unknown work item state in database"),
            }
        }
        Ok(counts)
    }
}

/// SQLite row representation
#[derive(Debug, sqlx::FromRow)]
struct WorkItemRow {
    id: String,
    target_id: String,
    query_text: String,
    query_item_id: String,
    project_id: Option<String>,
    created_at: i64,
    state: String,
    retry_count: i32,
    last_error: Option<String>,
    failure_category: Option<String>,
    available_at: i64,
    started_at: Option<i64>,
    finished_at: Option<i64>,
}

impl WorkItemRow {
    fn into_entry(self) -> Result<QueueEntry> {
        let state = TaskState::parse(&self.state).ok_or_else(|| {
            AppError::Database(format!("work item {} has unknown state {}", self.id, self.state))
        })?;

        Ok(QueueEntry {
            work_item: WorkItem {
                id: self.id,
                target_id: self.target_id,
                query_text: self.query_text,
                source_ids: SourceIds {
                    query_item_id: self.query_item_id,
                    project_id: self.project_id,
                },
                created_at: self.created_at,
            },
            state,
            retry_count: self.retry_count,
            last_error: self.last_error,
            failure_category: self
                .failure_category
                .as_deref()
                .and_then(FailureCategory::parse),
            available_at: self.available_at,
            started_at: self.started_at,
            finished_at: self.finished_at,
        })
    }
}
