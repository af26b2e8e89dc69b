use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::{AgentId, ConversationId};

/// Persisted row describing one agent.
///
/// `type_name` and `config` are empty until the agent has been saved at least
/// once; such a record can back a fresh construction but not a reconstruction.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentRecord {
    pub id: AgentId,
    pub conversation_id: Option<ConversationId>,
    pub type_name: Option<String>,
    pub config: Option<Value>,
}

impl AgentRecord {
    pub fn new(id: AgentId) -> Self {
        Self {
            id,
            conversation_id: None,
            type_name: None,
            config: None,
        }
    }

    pub fn with_conversation(mut self, conversation_id: ConversationId) -> Self {
        self.conversation_id = Some(conversation_id);
        self
    }

    pub fn with_config(mut self, type_name: impl Into<String>, config: Value) -> Self {
        self.type_name = Some(type_name.into());
        self.config = Some(config);
        self
    }

    pub fn is_connected(&self) -> bool {
        self.conversation_id.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_record_is_inert() {
        let record = AgentRecord::new(4);
        assert!(!record.is_connected());
        assert!(record.type_name.is_none());
        assert!(record.config.is_none());
    }

    #[test]
    fn test_builder_sets_fields() {
        let record = AgentRecord::new(7)
            .with_conversation(3)
            .with_config("EchoAgent", serde_json::json!({"name": "E"}));

        assert!(record.is_connected());
        assert_eq!(record.conversation_id, Some(3));
        assert_eq!(record.type_name.as_deref(), Some("EchoAgent"));
        assert_eq!(record.config.unwrap()["name"], "E");
    }
}
