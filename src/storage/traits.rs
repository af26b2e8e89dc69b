use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;

use crate::types::{AgentId, AgentRecord};

/// The only view of storage the agent core depends on.
#[async_trait]
pub trait PersistenceGateway: Send + Sync {
    async fn load_agent(&self, id: AgentId) -> Result<Option<AgentRecord>>;

    /// Overwrite the stored type tag and config of an existing record.
    async fn save_agent(&self, id: AgentId, type_name: &str, config: &Value) -> Result<()>;
}
