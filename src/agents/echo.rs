use async_trait::async_trait;

use super::{AgentBehavior, AgentContext, AgentType, BaseAgentConfig};

/// An agent that echoes the query.
#[derive(Debug, Clone, Copy, Default)]
pub struct EchoAgent;

impl EchoAgent {
    pub const TYPE_NAME: &'static str = "EchoAgent";
}

struct EchoRuntime;

#[async_trait]
impl AgentType for EchoAgent {
    type Config = BaseAgentConfig;

    async fn setup(
        &self,
        _ctx: &AgentContext,
        _config: &BaseAgentConfig,
    ) -> anyhow::Result<Box<dyn AgentBehavior>> {
        Ok(Box::new(EchoRuntime))
    }
}

#[async_trait]
impl AgentBehavior for EchoRuntime {
    async fn on_query(&self, query: &str) -> anyhow::Result<String> {
        Ok(format!("Echo: {}", query))
    }
}
