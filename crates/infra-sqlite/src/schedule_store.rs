// SQLite DurableScheduler Implementation
//
// Alarms are rows; the orchestrator loop asks for due ones every tick, so
// alarms armed before a restart keep firing after it.

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use citewatch_core::error::Result;
use citewatch_core::port::{Alarm, DurableScheduler, ScheduleSpec};
use sqlx::SqlitePool;
use tracing::debug;

pub struct SqliteScheduler {
    pool: SqlitePool,
}

impl SqliteScheduler {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct AlarmRow {
    name: String,
    next_fire_at: i64,
    period_ms: Option<i64>,
}

impl From<AlarmRow> for Alarm {
    fn from(row: AlarmRow) -> Self {
        Alarm {
            name: row.name,
            next_fire_at: row.next_fire_at,
            period_ms: row.period_ms,
        }
    }
}

#[async_trait]
impl DurableScheduler for SqliteScheduler {
    async fn schedule(&self, name: &str, spec: ScheduleSpec, now_millis: i64) -> Result<()> {
        let alarm = Alarm::from_spec(name, spec, now_millis);
        sqlx::query(
            r#"
            INSERT INTO schedules (name, next_fire_at, period_ms) VALUES (?, ?, ?)
            ON CONFLICT(name) DO UPDATE SET
                next_fire_at = excluded.next_fire_at,
                period_ms = excluded.period_ms
            "#,
        )
        .bind(&alarm.name)
        .bind(alarm.next_fire_at)
        .bind(alarm.period_ms)
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;

        debug!(alarm = %name, next_fire_at = %alarm.next_fire_at, "Alarm scheduled");
        Ok(())
    }

    async fn cancel(&self, name: &str) -> Result<bool> {
        let result = sqlx::query("DELETE FROM schedules WHERE name = ?")
            .bind(name)
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() > 0)
    }

    async fn cancel_all(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM schedules")
            .execute(&self.pool)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected())
    }

    async fn take_due(&self, now_millis: i64) -> Result<Vec<String>> {
        let mut tx = self.pool.begin().await.map_err(map_sqlx_error)?;

        let due: Vec<AlarmRow> = sqlx::query_as(
            "SELECT name, next_fire_at, period_ms FROM schedules WHERE next_fire_at <= ? ORDER BY next_fire_at ASC, name ASC",
        )
        .bind(now_millis)
        .fetch_all(&mut *tx)
        .await
        .map_err(map_sqlx_error)?;

        for alarm in &due {
            match alarm.period_ms {
                // Missed periods collapse into this one fire
                Some(period) => {
                    sqlx::query("UPDATE schedules SET next_fire_at = ? WHERE name = ?")
                        .bind(now_millis + period)
                        .bind(&alarm.name)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
                None => {
                    sqlx::query("DELETE FROM schedules WHERE name = ?")
                        .bind(&alarm.name)
                        .execute(&mut *tx)
                        .await
                        .map_err(map_sqlx_error)?;
                }
            }
        }

        tx.commit().await.map_err(map_sqlx_error)?;
        Ok(due.into_iter().map(|a| a.name).collect())
    }

    async fn list(&self) -> Result<Vec<Alarm>> {
        let rows: Vec<AlarmRow> =
            sqlx::query_as("SELECT name, next_fire_at, period_ms FROM schedules ORDER BY name")
                .fetch_all(&self.pool)
                .await
                .map_err(map_sqlx_error)?;
        Ok(rows.into_iter().map(Alarm::from).collect())
    }
}
