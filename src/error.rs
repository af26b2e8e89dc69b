use thiserror::Error;

use crate::types::AgentId;

#[derive(Debug, Error)]
pub enum AgentError {
    #[error("No agent found with ID {0} in database.")]
    NotFound(AgentId),

    #[error("Agent {0} is not connected to a conversation.")]
    NotConnected(AgentId),

    #[error("Agent type {0} not found.")]
    UnknownType(String),

    #[error("Agent with id {0} has no saved type or config.")]
    Unconfigured(AgentId),

    #[error("invalid agent config: {0}")]
    Validation(#[from] ValidationError),

    #[error("agent setup failed: {0}")]
    Setup(#[source] anyhow::Error),

    #[error("storage error: {0}")]
    Storage(#[source] anyhow::Error),

    #[error("query failed: {0}")]
    Query(#[source] anyhow::Error),
}

impl AgentError {
    /// Errors caused by the caller's input rather than by the backend.
    pub fn is_client_error(&self) -> bool {
        matches!(
            self,
            AgentError::NotFound(_)
                | AgentError::NotConnected(_)
                | AgentError::UnknownType(_)
                | AgentError::Unconfigured(_)
                | AgentError::Validation(_)
        )
    }
}

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ValidationError {
    /// Violations reported by the settings' JSON Schema, one per entry.
    #[error("{}", .0.join("; "))]
    Schema(Vec<String>),

    #[error("{0}")]
    Malformed(String),
}

pub type AgentResult<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_error_classification() {
        assert!(AgentError::NotFound(1).is_client_error());
        assert!(AgentError::NotConnected(1).is_client_error());
        assert!(AgentError::UnknownType("x".into()).is_client_error());
        assert!(AgentError::Validation(ValidationError::Malformed("x".into())).is_client_error());
        assert!(!AgentError::Storage(anyhow::anyhow!("db down")).is_client_error());
        assert!(!AgentError::Setup(anyhow::anyhow!("no index")).is_client_error());
    }

    #[test]
    fn test_unknown_type_message() {
        let err = AgentError::UnknownType("nonexistent_type".to_string());
        assert_eq!(err.to_string(), "Agent type nonexistent_type not found.");
    }

    #[test]
    fn test_schema_violations_joined() {
        let err = ValidationError::Schema(vec!["/a: bad".into(), "/b: worse".into()]);
        assert_eq!(err.to_string(), "/a: bad; /b: worse");
    }
}
