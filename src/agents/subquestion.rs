use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use super::settings::AgentConfig;
use super::{AgentBehavior, AgentContext, AgentType};
use crate::error::ValidationError;
use crate::providers::{CompletionOptions, LLMProvider, Message};
use crate::types::ConversationId;

/// Configuration for the SubquestionAgent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct SubquestionConfig {
    #[schemars(title = "Agent Name")]
    pub name: String,
    #[schemars(
        title = "Language Model Name",
        description = "Chat model used to answer the sub-questions"
    )]
    pub language_model_name: String,
    #[schemars(title = "Temperature", range(min = 0.0, max = 1.0))]
    pub temperature: f64,
}

impl AgentConfig for SubquestionConfig {
    fn name(&self) -> &str {
        &self.name
    }

    fn check(&self) -> Result<(), ValidationError> {
        if self.language_model_name.trim().is_empty() {
            return Err(ValidationError::Malformed(
                "language_model_name must not be empty".to_string(),
            ));
        }
        Ok(())
    }
}

/// An agent that answers questions about a conversation's documents by
/// posing sub-questions to a language model.
pub struct SubquestionAgent {
    provider: Arc<dyn LLMProvider>,
}

impl SubquestionAgent {
    pub const TYPE_NAME: &'static str = "SubquestionAgent";

    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }
}

struct SubquestionRuntime {
    provider: Arc<dyn LLMProvider>,
    system_prompt: String,
    options: CompletionOptions,
}

fn system_prompt(name: &str, conversation_id: Option<ConversationId>) -> String {
    let scope = match conversation_id {
        Some(id) => format!("the documents attached to conversation {}", id),
        None => "the user's documents".to_string(),
    };
    format!(
        "You are {}, an assistant answering questions about {}. \
         Break each question into focused sub-questions, answer them one by one, \
         then combine the answers into a single reply.",
        name, scope
    )
}

#[async_trait]
impl AgentType for SubquestionAgent {
    type Config = SubquestionConfig;

    async fn setup(
        &self,
        ctx: &AgentContext,
        config: &SubquestionConfig,
    ) -> anyhow::Result<Box<dyn AgentBehavior>> {
        Ok(Box::new(SubquestionRuntime {
            provider: self.provider.clone(),
            system_prompt: system_prompt(&config.name, ctx.conversation_id()),
            options: CompletionOptions {
                model: Some(config.language_model_name.clone()),
                temperature: Some(config.temperature),
                max_tokens: None,
            },
        }))
    }
}

#[async_trait]
impl AgentBehavior for SubquestionRuntime {
    async fn on_query(&self, query: &str) -> anyhow::Result<String> {
        let messages = vec![Message::system(self.system_prompt.clone()), Message::user(query)];
        self.provider.complete(messages, &self.options).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agents::settings::{serialize, validate};
    use crate::agents::Agent;
    use crate::error::AgentError;
    use crate::providers::MockLLMProvider;
    use crate::registry::AgentTypeRegistry;
    use crate::storage::InMemoryGateway;
    use serde_json::json;

    fn config_json() -> serde_json::Value {
        json!({
            "name": "SubquestionAgentTest",
            "language_model_name": "gpt-3.5-turbo",
            "temperature": 0.3,
        })
    }

    #[test]
    fn test_config_round_trip() {
        let config: SubquestionConfig = validate(&config_json()).unwrap();
        assert_eq!(serialize(&config).unwrap(), config_json());
        assert_eq!(validate::<SubquestionConfig>(&serialize(&config).unwrap()).unwrap(), config);
    }

    #[test]
    fn test_temperature_bounded() {
        let mut raw = config_json();
        raw["temperature"] = json!(1.5);
        match validate::<SubquestionConfig>(&raw) {
            Err(ValidationError::Schema(errors)) => assert!(errors[0].starts_with("/temperature")),
            other => panic!("expected a range violation, got {:?}", other),
        }

        raw["temperature"] = json!(-0.1);
        assert!(validate::<SubquestionConfig>(&raw).is_err());
    }

    #[test]
    fn test_blank_model_rejected() {
        let mut raw = config_json();
        raw["language_model_name"] = json!("  ");
        assert!(matches!(
            validate::<SubquestionConfig>(&raw),
            Err(ValidationError::Malformed(_))
        ));
    }

    #[test]
    fn test_schema_fields() {
        let schema = SubquestionConfig::schema();
        assert_eq!(
            schema.field_names(),
            vec!["name", "language_model_name", "temperature"]
        );
        assert_eq!(schema.field("temperature").unwrap()["maximum"], 1.0);
        assert_eq!(
            schema.field("language_model_name").unwrap()["description"],
            "Chat model used to answer the sub-questions"
        );
        assert!(["name", "language_model_name", "temperature"]
            .iter()
            .all(|field| schema.is_required(field)));
    }

    #[tokio::test]
    async fn test_query_forwards_settings_to_provider() {
        let provider = Arc::new(MockLLMProvider::with_response("Mocked aquery result".into()));
        let registry = AgentTypeRegistry::new();
        registry.register(
            SubquestionAgent::TYPE_NAME,
            SubquestionAgent::new(provider.clone()),
        );

        let store = Arc::new(InMemoryGateway::new());
        let id = store.create_agent();
        store.attach_conversation(id, 9).unwrap();

        let agent = Agent::construct(&registry, SubquestionAgent::TYPE_NAME, &config_json(), id, store)
            .await
            .unwrap();
        let answer = agent.query("What is in the report?").await.unwrap();
        assert_eq!(answer, "Mocked aquery result");

        let calls = provider.calls();
        assert_eq!(calls.len(), 1);
        let (messages, options) = &calls[0];
        assert_eq!(messages[0].role, "system");
        assert!(messages[0].content.contains("conversation 9"));
        assert_eq!(messages[1], Message::user("What is in the report?"));
        assert_eq!(options.model.as_deref(), Some("gpt-3.5-turbo"));
        assert_eq!(options.temperature, Some(0.3));
    }

    #[tokio::test]
    async fn test_out_of_range_config_fails_construction() {
        let registry = AgentTypeRegistry::new();
        registry.register(
            SubquestionAgent::TYPE_NAME,
            SubquestionAgent::new(Arc::new(MockLLMProvider::new())),
        );
        let store = Arc::new(InMemoryGateway::new());
        let id = store.create_agent();
        store.attach_conversation(id, 1).unwrap();

        let mut raw = config_json();
        raw["temperature"] = json!(3);
        let err = Agent::construct(&registry, SubquestionAgent::TYPE_NAME, &raw, id, store)
            .await
            .unwrap_err();
        assert!(matches!(err, AgentError::Validation(_)));
    }
}
