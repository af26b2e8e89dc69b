pub mod agents;
pub mod cache;
pub mod clock;
pub mod config;
pub mod error;
pub mod providers;
pub mod registry;
pub mod storage;
pub mod types;

pub use agents::{Agent, AgentState};
pub use cache::{AgentCache, SweepReport, Sweeper};
pub use config::{CacheConfig, Config};
pub use error::{AgentError, AgentResult, ValidationError};
pub use registry::AgentTypeRegistry;
pub use types::*;
