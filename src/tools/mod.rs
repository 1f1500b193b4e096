// Copyright 2026 Forge Contributors
// SPDX-License-Identifier: AGPL-3.0-or-later

//! Declarative tool catalogue (spec §3 "Tool Definition", §4.3).
//!
//! The registry is built once at construction and is read-only afterwards;
//! no runtime mutation happens during a turn.

pub mod handlers;

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use jsonschema::Validator;
use tokio_util::sync::CancellationToken;

use crate::types::ToolDefinition;

#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    #[error("tool {0:?} is already registered")]
    DuplicateTool(String),

    #[error("tool {0:?} is not registered")]
    UnknownTool(String),

    #[error("arguments for {tool:?} failed schema validation: {detail}")]
    SchemaError { tool: String, detail: String },

    #[error("invalid JSON-Schema for tool {tool:?}: {source}")]
    InvalidSchema {
        tool: String,
        #[source]
        source: jsonschema::ValidationError<'static>,
    },
}

/// Executed by the Dispatcher once a call has been approved. Handlers never
/// mutate Memory directly (spec §6 "Tool handlers").
#[async_trait]
pub trait ToolHandler: Send + Sync {
    async fn execute(
        &self,
        args: serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<String, String>;

    /// Per-invocation wall-clock deadline; `None` opts out (spec §4.5).
    fn deadline(&self) -> Option<std::time::Duration> {
        Some(std::time::Duration::from_secs(30))
    }
}

/// Catalogue of tool definitions, keyed by name.
pub struct ToolRegistry {
    tools: HashMap<String, ToolDefinition>,
    schemas: HashMap<String, Validator>,
}

impl ToolRegistry {
    pub fn builder() -> ToolRegistryBuilder {
        ToolRegistryBuilder::default()
    }

    pub fn lookup(&self, name: &str) -> Option<&ToolDefinition> {
        self.tools.get(name)
    }

    pub fn list(&self) -> impl Iterator<Item = &ToolDefinition> {
        self.tools.values()
    }

    pub fn validate(&self, def: &ToolDefinition, args: &serde_json::Value) -> Result<(), RegistryError> {
        let schema = self
            .schemas
            .get(&def.name)
            .ok_or_else(|| RegistryError::UnknownTool(def.name.clone()))?;

        if let Err(err) = schema.validate(args) {
            return Err(RegistryError::SchemaError {
                tool: def.name.clone(),
                detail: err.to_string(),
            });
        }
        Ok(())
    }
}

/// Builds a [`ToolRegistry`], rejecting duplicate tool names.
#[derive(Default)]
pub struct ToolRegistryBuilder {
    tools: HashMap<String, ToolDefinition>,
}

impl ToolRegistryBuilder {
    pub fn register(mut self, def: ToolDefinition) -> Result<Self, RegistryError> {
        if self.tools.contains_key(&def.name) {
            return Err(RegistryError::DuplicateTool(def.name));
        }
        self.tools.insert(def.name.clone(), def);
        Ok(self)
    }

    pub fn build(self) -> Result<ToolRegistry, RegistryError> {
        let mut schemas = HashMap::with_capacity(self.tools.len());
        for def in self.tools.values() {
            let validator =
                jsonschema::validator_for(&def.args_schema).map_err(|source| RegistryError::InvalidSchema {
                    tool: def.name.clone(),
                    source,
                })?;
            schemas.insert(def.name.clone(), validator);
        }
        Ok(ToolRegistry {
            tools: self.tools,
            schemas,
        })
    }
}

pub type SharedToolHandler = Arc<dyn ToolHandler>;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::handlers::control::TaskCompletionHandler;
    use crate::types::{ApprovalClass, OutputContract, SideEffect};

    fn def(name: &str) -> ToolDefinition {
        ToolDefinition {
            name: name.into(),
            description: "test".into(),
            args_schema: serde_json::json!({"type": "object"}),
            output_contract: OutputContract::Plain,
            side_effect: SideEffect::PurelyInternal,
            approval_class: ApprovalClass::Never,
            handler: Arc::new(TaskCompletionHandler),
        }
    }

    #[test]
    fn rejects_duplicate_registration() {
        let result = ToolRegistry::builder().register(def("a")).unwrap().register(def("a"));
        assert!(matches!(result, Err(RegistryError::DuplicateTool(_))));
    }

    #[test]
    fn validate_rejects_schema_mismatch() {
        let registry = ToolRegistry::builder().register(def("a")).unwrap().build().unwrap();
        let d = registry.lookup("a").unwrap();
        let result = registry.validate(d, &serde_json::json!("not an object"));
        assert!(result.is_err());
    }

    #[test]
    fn validate_accepts_matching_schema() {
        let registry = ToolRegistry::builder().register(def("a")).unwrap().build().unwrap();
        let d = registry.lookup("a").unwrap();
        assert!(registry.validate(d, &serde_json::json!({})).is_ok());
    }
}
