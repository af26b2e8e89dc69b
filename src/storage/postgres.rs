use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{PgPool, Row};

use crate::storage::traits::PersistenceGateway;
use crate::types::{AgentId, AgentRecord, ConversationId};

pub struct PostgresGateway {
    pool: PgPool,
}

impl PostgresGateway {
    pub async fn new(database_url: &str) -> Result<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(10)
            .connect(database_url)
            .await?;
        Ok(Self { pool })
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> Result<()> {
        sqlx::raw_sql(include_str!("../../migrations/V001__agents.sql"))
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    pub async fn create_agent(&self, conversation_id: Option<ConversationId>) -> Result<AgentId> {
        let row = sqlx::query(
            r#"
            INSERT INTO agents (conversation_id, created_at, updated_at)
            VALUES ($1, NOW(), NOW())
            RETURNING id
            "#,
        )
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(row.get("id"))
    }

    pub async fn attach_conversation(
        &self,
        id: AgentId,
        conversation_id: ConversationId,
    ) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET conversation_id = $2, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(conversation_id)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("No agent found with ID {}", id);
        }
        Ok(())
    }

    pub async fn delete_agent(&self, id: AgentId) -> Result<bool> {
        let result = sqlx::query("DELETE FROM agents WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}

#[async_trait]
impl PersistenceGateway for PostgresGateway {
    async fn load_agent(&self, id: AgentId) -> Result<Option<AgentRecord>> {
        let row = sqlx::query(
            r#"
            SELECT id, conversation_id, agent_type, config
            FROM agents
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        match row {
            Some(r) => Ok(Some(row_to_record(&r)?)),
            None => Ok(None),
        }
    }

    async fn save_agent(&self, id: AgentId, type_name: &str, config: &Value) -> Result<()> {
        let result = sqlx::query(
            r#"
            UPDATE agents
            SET agent_type = $2, config = $3, updated_at = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(type_name)
        .bind(config)
        .execute(&self.pool)
        .await?;

        if result.rows_affected() == 0 {
            bail!("cannot save agent {}: no such record", id);
        }
        Ok(())
    }
}

fn row_to_record(r: &PgRow) -> Result<AgentRecord> {
    Ok(AgentRecord {
        id: r.try_get("id")?,
        conversation_id: r.try_get("conversation_id")?,
        type_name: r.try_get("agent_type")?,
        config: r.try_get("config")?,
    })
}
