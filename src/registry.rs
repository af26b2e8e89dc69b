use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::agents::{Agent, AgentFactory, AgentType, BuildMode, ConfigSchema};
use crate::error::{AgentError, AgentResult};
use crate::storage::PersistenceGateway;
use crate::types::{AgentId, AgentRecord};

/// Name-keyed table of agent factories.
///
/// Built once by the application's composition root and shared by reference.
/// Re-registering a name swaps the factory but keeps the name's original
/// position in [`list_types`](Self::list_types); agents already built keep
/// the behavior they were built with.
#[derive(Default)]
pub struct AgentTypeRegistry {
    inner: RwLock<RegistryInner>,
}

#[derive(Default)]
struct RegistryInner {
    order: Vec<String>,
    factories: HashMap<String, Arc<dyn AgentFactory>>,
}

impl AgentTypeRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register<T: AgentType>(&self, type_name: impl Into<String>, agent_type: T) {
        self.register_factory(type_name, Arc::new(agent_type));
    }

    pub fn register_factory(&self, type_name: impl Into<String>, factory: Arc<dyn AgentFactory>) {
        let type_name = type_name.into();
        let mut inner = self.inner.write().unwrap();
        if inner.factories.insert(type_name.clone(), factory).is_none() {
            inner.order.push(type_name);
        }
    }

    pub fn contains(&self, type_name: &str) -> bool {
        self.inner.read().unwrap().factories.contains_key(type_name)
    }

    /// Registered names, in registration order.
    pub fn list_types(&self) -> Vec<String> {
        self.inner.read().unwrap().order.clone()
    }

    pub fn settings_schema(&self, type_name: &str) -> AgentResult<ConfigSchema> {
        Ok(self.factory(type_name)?.settings_schema())
    }

    /// Validate `raw` against `type_name`'s settings, returning the canonical form.
    pub fn validate_config(&self, type_name: &str, raw: &Value) -> AgentResult<Value> {
        Ok(self.factory(type_name)?.validate(raw)?)
    }

    fn factory(&self, type_name: &str) -> AgentResult<Arc<dyn AgentFactory>> {
        self.inner
            .read()
            .unwrap()
            .factories
            .get(type_name)
            .cloned()
            .ok_or_else(|| AgentError::UnknownType(type_name.to_string()))
    }

    /// Build a fresh agent of `type_name` for the record `id`.
    pub async fn construct(
        &self,
        type_name: &str,
        config: &Value,
        id: AgentId,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> AgentResult<Agent> {
        let factory = self.factory(type_name)?;
        let config = factory.validate(config)?;
        let record = fetch_record(gateway.as_ref(), id).await?;

        Agent::build(
            factory.as_ref(),
            type_name,
            config,
            record,
            gateway,
            BuildMode::Fresh,
        )
        .await
    }

    /// Rebuild the agent stored under `id` using the type named in its record.
    pub async fn load(&self, id: AgentId, gateway: Arc<dyn PersistenceGateway>) -> AgentResult<Agent> {
        let record = fetch_record(gateway.as_ref(), id).await?;
        let (type_name, stored) = match (&record.type_name, &record.config) {
            (Some(type_name), Some(config)) => (type_name.clone(), config.clone()),
            _ => return Err(AgentError::Unconfigured(id)),
        };

        let factory = self.factory(&type_name)?;
        let config = factory.validate(&stored)?;

        Agent::build(
            factory.as_ref(),
            &type_name,
            config,
            record,
            gateway,
            BuildMode::Reconstruct,
        )
        .await
    }
}

async fn fetch_record(gateway: &dyn PersistenceGateway, id: AgentId) -> AgentResult<AgentRecord> {
    gateway
        .load_agent(id)
        .await
        .map_err(AgentError::Storage)?
        .ok_or(AgentError::NotFound(id))
}
