use anyhow::{bail, Result};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, AtomicUsize, Ordering};
use std::sync::{Arc, RwLock};

use super::traits::PersistenceGateway;
use crate::types::{AgentId, AgentRecord, ConversationId};

#[derive(Clone)]
pub struct InMemoryGateway {
    agents: Arc<RwLock<HashMap<AgentId, AgentRecord>>>,
    next_id: Arc<AtomicI64>,
    loads: Arc<AtomicUsize>,
}

impl InMemoryGateway {
    pub fn new() -> Self {
        Self {
            agents: Arc::new(RwLock::new(HashMap::new())),
            next_id: Arc::new(AtomicI64::new(1)),
            loads: Arc::new(AtomicUsize::new(0)),
        }
    }

    /// Insert an empty, unconnected record and return its id.
    pub fn create_agent(&self) -> AgentId {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.insert(AgentRecord::new(id));
        id
    }

    /// Insert or replace a record as-is.
    pub fn insert(&self, record: AgentRecord) {
        self.next_id.fetch_max(record.id + 1, Ordering::SeqCst);
        let mut agents = self.agents.write().unwrap();
        agents.insert(record.id, record);
    }

    pub fn attach_conversation(&self, id: AgentId, conversation_id: ConversationId) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        match agents.get_mut(&id) {
            Some(record) => {
                record.conversation_id = Some(conversation_id);
                Ok(())
            }
            None => bail!("No agent found with ID {}", id),
        }
    }

    pub fn delete_agent(&self, id: AgentId) -> bool {
        let mut agents = self.agents.write().unwrap();
        agents.remove(&id).is_some()
    }

    pub fn get(&self, id: AgentId) -> Option<AgentRecord> {
        let agents = self.agents.read().unwrap();
        agents.get(&id).cloned()
    }

    /// Number of `load_agent` calls served so far.
    pub fn load_count(&self) -> usize {
        self.loads.load(Ordering::SeqCst)
    }
}

impl Default for InMemoryGateway {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl PersistenceGateway for InMemoryGateway {
    async fn load_agent(&self, id: AgentId) -> Result<Option<AgentRecord>> {
        self.loads.fetch_add(1, Ordering::SeqCst);
        Ok(self.get(id))
    }

    async fn save_agent(&self, id: AgentId, type_name: &str, config: &Value) -> Result<()> {
        let mut agents = self.agents.write().unwrap();
        match agents.get_mut(&id) {
            Some(record) => {
                record.type_name = Some(type_name.to_string());
                record.config = Some(config.clone());
                Ok(())
            }
            None => bail!("cannot save agent {}: no such record", id),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_create_assigns_increasing_ids() {
        let store = InMemoryGateway::new();
        let a = store.create_agent();
        let b = store.create_agent();
        assert!(b > a);
        assert!(!store.get(a).unwrap().is_connected());
    }

    #[test]
    fn test_insert_moves_id_counter_past_explicit_ids() {
        let store = InMemoryGateway::new();
        store.insert(AgentRecord::new(7));
        assert_eq!(store.create_agent(), 8);
    }

    #[test]
    fn test_attach_conversation() {
        let store = InMemoryGateway::new();
        let id = store.create_agent();
        store.attach_conversation(id, 3).unwrap();
        assert_eq!(store.get(id).unwrap().conversation_id, Some(3));

        assert!(store.attach_conversation(999, 3).is_err());
    }

    #[tokio::test]
    async fn test_save_and_load() {
        let store = InMemoryGateway::new();
        let id = store.create_agent();

        store
            .save_agent(id, "EchoAgent", &json!({"name": "E"}))
            .await
            .unwrap();

        let record = store.load_agent(id).await.unwrap().unwrap();
        assert_eq!(record.type_name.as_deref(), Some("EchoAgent"));
        assert_eq!(record.config, Some(json!({"name": "E"})));
        assert_eq!(store.load_count(), 1);
    }

    #[tokio::test]
    async fn test_save_missing_record_fails() {
        let store = InMemoryGateway::new();
        let result = store.save_agent(42, "EchoAgent", &json!({})).await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_delete() {
        let store = InMemoryGateway::new();
        let id = store.create_agent();
        assert!(store.delete_agent(id));
        assert!(!store.delete_agent(id));
        assert!(store.load_agent(id).await.unwrap().is_none());
    }
}
