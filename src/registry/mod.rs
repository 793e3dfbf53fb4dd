//! Component A — Tool Registry. In-memory catalog mapping tool names to
//! typed parameter schemas and handlers. Write-once at startup, read-only
//! thereafter (spec.md §5: "Tool registry: mutated only during startup").

use crate::dispatch::ExecutionContext;
use crate::errors::{Result, WardenError};
use crate::safeguard::Level;
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

/// The six primitive parameter kinds allowed by the tool schema (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ParamType {
    String,
    Integer,
    Number,
    Boolean,
    Array,
    Object,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct ParamSchema {
    pub name: String,
    #[serde(rename = "type")]
    pub param_type: ParamType,
    pub required: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub default: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub r#enum: Option<Vec<Value>>,
}

/// Public, discoverable description of a tool — what `/mcp/tools` and
/// `/mcp/sse` hand back to callers.
#[derive(Debug, Clone, serde::Serialize)]
pub struct ToolDefinition {
    pub name: String,
    pub description: String,
    pub parameters: Vec<ParamSchema>,
    pub security_level: Level,
}

impl ToolDefinition {
    /// JSON-Schema-shaped `{type, properties, required}` rendering used by
    /// the SSE discovery stream and `/mcp/tools`.
    pub fn input_schema(&self) -> Value {
        let mut properties = serde_json::Map::new();
        let mut required = Vec::new();
        for p in &self.parameters {
            let mut prop = serde_json::json!({ "type": type_name(p.param_type) });
            if let Some(default) = &p.default {
                prop["default"] = default.clone();
            }
            if let Some(values) = &p.r#enum {
                prop["enum"] = Value::Array(values.clone());
            }
            properties.insert(p.name.clone(), prop);
            if p.required {
                required.push(Value::String(p.name.clone()));
            }
        }
        serde_json::json!({
            "type": "object",
            "properties": Value::Object(properties),
            "required": required,
        })
    }
}

fn type_name(t: ParamType) -> &'static str {
    match t {
        ParamType::String => "string",
        ParamType::Integer => "integer",
        ParamType::Number => "number",
        ParamType::Boolean => "boolean",
        ParamType::Array => "array",
        ParamType::Object => "object",
    }
}

/// A registered operation: typed schema plus a handler closing over whatever
/// external collaborator it needs (spec.md §9 — "polymorphism over tool
/// handlers... close over those clients at registration time").
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str;
    fn parameters(&self) -> Vec<ParamSchema>;
    fn level(&self) -> Level;

    /// Deadline for a single invocation; the dispatcher enforces this.
    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    async fn execute(&self, arguments: Value, ctx: &ExecutionContext) -> Result<Value>;

    fn to_definition(&self) -> ToolDefinition {
        ToolDefinition {
            name: self.name().to_string(),
            description: self.description().to_string(),
            parameters: self.parameters(),
            security_level: self.level(),
        }
    }
}

pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self {
            tools: HashMap::new(),
        }
    }

    /// Rejects duplicate names outright — diverges from the teacher's
    /// warn-and-overwrite `register()`, per spec.md's registry invariant
    /// that a fixed, introspectable surface is required; original source
    /// (`mcp/registry.py::register`) raises on duplicate for the same
    /// reason.
    pub fn register(&mut self, tool: Arc<dyn Tool>) -> Result<()> {
        let name = tool.name().to_string();
        if name.is_empty() || name.len() > 256 || name.chars().any(char::is_control) {
            return Err(WardenError::Validation(format!(
                "tool name '{name}' is invalid"
            )));
        }
        if self.tools.contains_key(&name) {
            return Err(WardenError::Validation(format!(
                "tool '{name}' already registered"
            )));
        }
        tracing::info!(tool = %name, level = ?tool.level(), "tool registered");
        self.tools.insert(name, tool);
        Ok(())
    }

    pub fn lookup(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    /// `level` for a tool not present in the registry defaults to the most
    /// restrictive non-forbidden reading (L0 for discovery, deny for
    /// execution) per spec.md §3's registry invariant.
    pub fn level_or_default(&self, name: &str) -> Level {
        self.tools.get(name).map_or(Level::L4, |t| t.level())
    }

    pub fn list(&self) -> Vec<ToolDefinition> {
        let mut defs: Vec<_> = self.tools.values().map(|t| t.to_definition()).collect();
        defs.sort_by(|a, b| a.name.cmp(&b.name));
        defs
    }

    pub fn schema(&self, name: &str) -> Option<Value> {
        self.tools.get(name).map(|t| t.to_definition().input_schema())
    }
}

impl Default for ToolRegistry {
    fn default() -> Self {
        Self::new()
    }
}
