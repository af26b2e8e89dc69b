use schemars::{schema_for, JsonSchema};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::error::ValidationError;

/// Settings of one agent type. The JSON Schema is derived from the struct, so
/// the schema shown to callers and the one enforced on input cannot diverge.
pub trait AgentConfig:
    Serialize
    + DeserializeOwned
    + JsonSchema
    + Clone
    + PartialEq
    + std::fmt::Debug
    + Send
    + Sync
    + 'static
{
    fn schema() -> ConfigSchema {
        ConfigSchema::of::<Self>()
    }

    /// Display name shown to users.
    fn name(&self) -> &str;

    /// Checks JSON Schema cannot express.
    fn check(&self) -> Result<(), ValidationError> {
        Ok(())
    }
}

/// Check `raw` against `C`'s schema and build the typed config.
pub fn validate<C: AgentConfig>(raw: &Value) -> Result<C, ValidationError> {
    C::schema().validate_json(raw)?;
    let config: C = serde_json::from_value(raw.clone())
        .map_err(|e| ValidationError::Malformed(e.to_string()))?;
    config.check()?;
    Ok(config)
}

pub fn serialize<C: AgentConfig>(config: &C) -> Result<Value, ValidationError> {
    serde_json::to_value(config).map_err(|e| ValidationError::Malformed(e.to_string()))
}

/// Generated JSON Schema (draft 7) of a settings struct.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(transparent)]
pub struct ConfigSchema(Value);

impl ConfigSchema {
    pub fn of<C: JsonSchema>() -> Self {
        Self(serde_json::to_value(schema_for!(C)).unwrap_or_default())
    }

    pub fn as_json(&self) -> &Value {
        &self.0
    }

    /// Per-field schemas, in declaration order.
    pub fn properties(&self) -> Option<&Map<String, Value>> {
        self.0.get("properties")?.as_object()
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.properties()?.get(name)
    }

    pub fn field_names(&self) -> Vec<&str> {
        self.properties()
            .map(|props| props.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    pub fn is_required(&self, name: &str) -> bool {
        self.0
            .get("required")
            .and_then(Value::as_array)
            .is_some_and(|required| required.iter().any(|field| field == name))
    }

    /// Report every schema violation in `raw`, each prefixed with its JSON pointer.
    pub fn validate_json(&self, raw: &Value) -> Result<(), ValidationError> {
        let validator = jsonschema::draft7::new(&self.0)
            .map_err(|e| ValidationError::Malformed(format!("invalid settings schema: {}", e)))?;

        let errors: Vec<String> = validator
            .iter_errors(raw)
            .map(|e| format!("{}: {}", e.instance_path(), e))
            .collect();

        if errors.is_empty() {
            Ok(())
        } else {
            Err(ValidationError::Schema(errors))
        }
    }
}

/// Settings shared by every agent type; sufficient on its own for simple agents.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, JsonSchema)]
pub struct BaseAgentConfig {
    #[schemars(title = "Agent Name")]
    pub name: String,
}

impl BaseAgentConfig {
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl AgentConfig for BaseAgentConfig {
    fn name(&self) -> &str {
        &self.name
    }
}
