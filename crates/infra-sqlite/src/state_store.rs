// SQLite StateStore Implementation (single JSON document)

use crate::error::map_sqlx_error;
use async_trait::async_trait;
use citewatch_core::domain::AgentState;
use citewatch_core::error::Result;
use citewatch_core::port::{StateStore, TimeProvider};
use sqlx::SqlitePool;
use std::sync::Arc;

pub struct SqliteStateStore {
    pool: SqlitePool,
    time_provider: Arc<dyn TimeProvider>,
}

impl SqliteStateStore {
    pub fn new(pool: SqlitePool, time_provider: Arc<dyn TimeProvider>) -> Self {
        Self {
            pool,
            time_provider,
        }
    }
}

#[async_trait]
impl StateStore for SqliteStateStore {
    async fn load(&self) -> Result<AgentState> {
        let payload: Option<String> =
            sqlx::query_scalar("SELECT payload FROM agent_state WHERE id = 1")
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx_error)?;

        match payload {
            Some(p) => Ok(serde_json::from_str(&p)?),
            None => Ok(AgentState::default()),
        }
    }

    async fn save(&self, state: &AgentState) -> Result<()> {
        let payload = serde_json::to_string(state)?;
        sqlx::query(
            r#"
            INSERT INTO agent_state (id, payload, updated_at) VALUES (1, ?, ?)
            ON CONFLICT(id) DO UPDATE SET payload = excluded.payload, updated_at = excluded.updated_at
            "#,
        )
        .bind(payload)
        .bind(self.time_provider.now_millis())
        .execute(&self.pool)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }
}
