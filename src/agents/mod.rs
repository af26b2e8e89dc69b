pub mod echo;
pub mod settings;
pub mod subquestion;

pub use echo::EchoAgent;
pub use settings::{AgentConfig, BaseAgentConfig, ConfigSchema};
pub use subquestion::{SubquestionAgent, SubquestionConfig};

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde_json::Value;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::{Mutex, MutexGuard};

use crate::error::{AgentError, AgentResult, ValidationError};
use crate::registry::AgentTypeRegistry;
use crate::storage::PersistenceGateway;
use crate::types::{AgentId, AgentRecord, ConversationId};

/// What a type-specific hook gets to see while an agent is being built.
pub struct AgentContext {
    pub record: AgentRecord,
    pub gateway: Arc<dyn PersistenceGateway>,
}

impl AgentContext {
    pub fn id(&self) -> AgentId {
        self.record.id
    }

    pub fn conversation_id(&self) -> Option<ConversationId> {
        self.record.conversation_id
    }
}

/// Per-instance hooks of a built agent.
#[async_trait]
pub trait AgentBehavior: Send + Sync {
    async fn on_query(&self, query: &str) -> anyhow::Result<String>;

    async fn on_save(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Per-type hooks; registered under a name in the [`AgentTypeRegistry`].
#[async_trait]
pub trait AgentType: Send + Sync + 'static {
    type Config: AgentConfig;

    /// First-time construction of an agent for a connected record.
    async fn setup(
        &self,
        ctx: &AgentContext,
        config: &Self::Config,
    ) -> anyhow::Result<Box<dyn AgentBehavior>>;

    /// Rebuild from already-persisted state. Types whose setup has side
    /// effects override this to only wire up what was stored.
    async fn reconstruct(
        &self,
        ctx: &AgentContext,
        config: &Self::Config,
    ) -> anyhow::Result<Box<dyn AgentBehavior>> {
        self.setup(ctx, config).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildMode {
    Fresh,
    Reconstruct,
}

/// Object-safe face of an [`AgentType`], as stored by the registry.
#[async_trait]
pub trait AgentFactory: Send + Sync {
    fn settings_schema(&self) -> ConfigSchema;

    /// Validate raw settings and return them in canonical serialized form.
    fn validate(&self, raw: &Value) -> Result<Value, ValidationError>;

    async fn build(
        &self,
        ctx: &AgentContext,
        config: &Value,
        mode: BuildMode,
    ) -> AgentResult<Box<dyn AgentBehavior>>;
}

#[async_trait]
impl<T: AgentType> AgentFactory for T {
    fn settings_schema(&self) -> ConfigSchema {
        T::Config::schema()
    }

    fn validate(&self, raw: &Value) -> Result<Value, ValidationError> {
        let config: T::Config = settings::validate(raw)?;
        settings::serialize(&config)
    }

    async fn build(
        &self,
        ctx: &AgentContext,
        config: &Value,
        mode: BuildMode,
    ) -> AgentResult<Box<dyn AgentBehavior>> {
        let config: T::Config = settings::validate(config)?;
        let built = match mode {
            BuildMode::Fresh => self.setup(ctx, &config).await,
            BuildMode::Reconstruct => self.reconstruct(ctx, &config).await,
        };
        built.map_err(AgentError::Setup)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AgentState {
    /// Not running anything; config differs from (or was never written to) storage.
    Idle,
    /// Not running anything; config matches what was last saved or loaded.
    Persisted,
    /// Inside `query` or `save`.
    Busy,
}

/// A built agent. `query` and `save` on one instance run one at a time.
pub struct Agent {
    id: AgentId,
    type_name: String,
    config: Value,
    record: AgentRecord,
    gateway: Arc<dyn PersistenceGateway>,
    behavior: Box<dyn AgentBehavior>,
    busy: AtomicBool,
    persisted: AtomicBool,
    guard: Mutex<()>,
}

/// Holds the per-instance lock; clears `busy` on every exit path, including
/// errors, panics and dropped futures.
struct BusyGuard<'a> {
    busy: &'a AtomicBool,
    _lock: MutexGuard<'a, ()>,
}

impl Drop for BusyGuard<'_> {
    fn drop(&mut self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

impl Agent {
    /// Build a fresh agent of `type_name` for the existing record `id`.
    pub async fn construct(
        registry: &AgentTypeRegistry,
        type_name: &str,
        config: &Value,
        id: AgentId,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> AgentResult<Self> {
        registry.construct(type_name, config, id, gateway).await
    }

    /// Rebuild the agent stored under `id` from its saved type and config.
    pub async fn load(
        registry: &AgentTypeRegistry,
        id: AgentId,
        gateway: Arc<dyn PersistenceGateway>,
    ) -> AgentResult<Self> {
        registry.load(id, gateway).await
    }

    pub(crate) async fn build(
        factory: &dyn AgentFactory,
        type_name: &str,
        config: Value,
        record: AgentRecord,
        gateway: Arc<dyn PersistenceGateway>,
        mode: BuildMode,
    ) -> AgentResult<Self> {
        if !record.is_connected() {
            return Err(AgentError::NotConnected(record.id));
        }

        let ctx = AgentContext {
            record,
            gateway,
        };
        let behavior = factory.build(&ctx, &config, mode).await?;
        let AgentContext { record, gateway } = ctx;

        Ok(Self {
            id: record.id,
            type_name: type_name.to_string(),
            config,
            record,
            gateway,
            behavior,
            busy: AtomicBool::new(false),
            persisted: AtomicBool::new(mode == BuildMode::Reconstruct),
            guard: Mutex::new(()),
        })
    }

    pub fn id(&self) -> AgentId {
        self.id
    }

    pub fn type_name(&self) -> &str {
        &self.type_name
    }

    /// Validated config in serialized form.
    pub fn config(&self) -> &Value {
        &self.config
    }

    pub fn config_as<C: DeserializeOwned>(&self) -> AgentResult<C> {
        serde_json::from_value(self.config.clone())
            .map_err(|e| AgentError::Validation(ValidationError::Malformed(e.to_string())))
    }

    /// Snapshot of the record this agent was built from.
    pub fn record(&self) -> &AgentRecord {
        &self.record
    }

    pub fn is_busy(&self) -> bool {
        self.busy.load(Ordering::SeqCst)
    }

    pub fn state(&self) -> AgentState {
        if self.is_busy() {
            AgentState::Busy
        } else if self.persisted.load(Ordering::SeqCst) {
            AgentState::Persisted
        } else {
            AgentState::Idle
        }
    }

    async fn enter(&self) -> BusyGuard<'_> {
        let lock = self.guard.lock().await;
        self.busy.store(true, Ordering::SeqCst);
        BusyGuard {
            busy: &self.busy,
            _lock: lock,
        }
    }

    pub async fn query(&self, text: &str) -> AgentResult<String> {
        let _busy = self.enter().await;
        log::debug!("agent {} ({}) answering query", self.id, self.type_name);
        self.behavior.on_query(text).await.map_err(AgentError::Query)
    }

    /// Write the type tag and config back to storage, then run the type's save hook.
    pub async fn save(&self) -> AgentResult<()> {
        let _busy = self.enter().await;
        self.gateway
            .save_agent(self.id, &self.type_name, &self.config)
            .await
            .map_err(AgentError::Storage)?;
        self.behavior.on_save().await.map_err(AgentError::Storage)?;
        self.persisted.store(true, Ordering::SeqCst);
        log::debug!("agent {} ({}) saved", self.id, self.type_name);
        Ok(())
    }
}

impl fmt::Debug for Agent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Agent")
            .field("id", &self.id)
            .field("type_name", &self.type_name)
            .field("config", &self.config)
            .field("state", &self.state())
            .finish()
    }
}
