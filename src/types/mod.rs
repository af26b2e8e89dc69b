pub mod record;

pub use record::AgentRecord;

pub type AgentId = i64;
pub type ConversationId = i64;
