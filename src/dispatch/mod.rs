//! Component B — Dispatcher. Resolves a tool, validates its arguments
//! against the registered schema, invokes the handler under a deadline with
//! panic isolation, and returns a uniform result envelope.
//!
//! Grounded on `agent/tools/registry/mod.rs::execute`/`execute_with_guards`
//! (spawn + timeout + `JoinError::is_panic`/`into_panic` panic-message
//! extraction). The validation branching mirrors original source
//! `mcp/registry.py::execute` (`TypeError` -> invalid params, generic
//! exception -> tool execution error).

use crate::errors::{Result, WardenError};
use crate::registry::{ParamType, Tool, ToolDefinition, ToolRegistry};
use crate::secrets::redact;
use serde_json::Value;
use std::sync::Arc;
use std::time::Instant;
use uuid::Uuid;

/// One audit entry: a tool call, its redacted arguments, outcome, duration.
#[derive(Debug, Clone, serde::Serialize)]
pub struct AuditEntry {
    pub tool: String,
    pub arguments_redacted: Value,
    pub success: bool,
    pub duration_ms: u64,
}

/// Per-request audit and state object carried through validation, dispatch,
/// and response (spec.md §3, Execution Context). Frozen at response
/// emission; never persisted beyond logs.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub request_id: String,
    pub caller_address: String,
    pub caller_principal: Option<String>,
    started_at: Instant,
    audit: Vec<AuditEntry>,
}

impl ExecutionContext {
    pub fn new(caller_address: impl Into<String>) -> Self {
        Self {
            request_id: Uuid::new_v4().to_string(),
            caller_address: caller_address.into(),
            caller_principal: None,
            started_at: Instant::now(),
            audit: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    fn record(&mut self, tool: &str, arguments: &Value, success: bool, duration_ms: u64) {
        self.audit.push(AuditEntry {
            tool: tool.to_string(),
            arguments_redacted: redact(arguments),
            success,
            duration_ms,
        });
    }

    pub fn audit_log(&self) -> &[AuditEntry] {
        &self.audit
    }
}

fn type_matches(value: &Value, expected: ParamType) -> bool {
    match expected {
        ParamType::String => value.is_string(),
        ParamType::Integer => value.is_i64() || value.is_u64(),
        ParamType::Number => value.is_number(),
        ParamType::Boolean => value.is_boolean(),
        ParamType::Array => value.is_array(),
        ParamType::Object => value.is_object(),
    }
}

/// Validates `arguments` against a tool's parameter schema: types, required
/// presence, enum membership. Fills in declared defaults for absent,
/// non-required parameters.
fn validate_arguments(def: &ToolDefinition, arguments: &Value) -> Result<Value> {
    let obj = arguments
        .as_object()
        .ok_or_else(|| WardenError::Validation("arguments must be a JSON object".into()))?;

    let mut filled = obj.clone();
    for param in &def.parameters {
        match filled.get(&param.name) {
            Some(value) => {
                if !type_matches(value, param.param_type) {
                    return Err(WardenError::Validation(format!(
                        "parameter '{}' must be of type {:?}",
                        param.name, param.param_type
                    )));
                }
                if let Some(allowed) = &param.r#enum {
                    if !allowed.contains(value) {
                        return Err(WardenError::Validation(format!(
                            "parameter '{}' must be one of {:?}",
                            param.name, allowed
                        )));
                    }
                }
            }
            None => {
                if param.required {
                    return Err(WardenError::Validation(format!(
                        "missing required parameter '{}'",
                        param.name
                    )));
                }
                if let Some(default) = &param.default {
                    filled.insert(param.name.clone(), default.clone());
                }
            }
        }
    }
    Ok(Value::Object(filled))
}

pub struct Dispatcher {
    registry: Arc<ToolRegistry>,
}

impl Dispatcher {
    pub fn new(registry: Arc<ToolRegistry>) -> Self {
        Self { registry }
    }

    /// `discover()` — enumerates registered schemas with level annotations.
    pub fn discover(&self) -> Vec<ToolDefinition> {
        self.registry.list()
    }

    /// `call(name, arguments, context)`: resolve, validate, invoke under
    /// timeout with panic isolation, record the audit entry, return a
    /// uniform envelope. Callers are expected to have already passed the
    /// SAFEGUARD gate (see `gateway`).
    pub async fn call(
        &self,
        name: &str,
        arguments: Value,
        ctx: &mut ExecutionContext,
    ) -> Result<Value> {
        let tool = self
            .registry
            .lookup(name)
            .ok_or_else(|| WardenError::NotFound(format!("tool '{name}' not found")))?;

        let validated = match validate_arguments(&tool.to_definition(), &arguments) {
            Ok(v) => v,
            Err(e) => {
                ctx.record(name, &arguments, false, 0);
                return Err(e);
            }
        };

        let start = Instant::now();
        let result = Self::execute_with_guards(tool.clone(), validated.clone(), ctx.clone()).await;
        let duration_ms = start.elapsed().as_millis() as u64;

        ctx.record(name, &validated, result.is_ok(), duration_ms);
        result
    }

    /// Spawns the tool in its own task so panics are caught (`JoinError::
    /// is_panic`) and timeouts are enforced (`tokio::time::timeout`), rather
    /// than letting either crash the request loop (spec.md §4.B: "Handler
    /// exceptions never propagate uncaught").
    async fn execute_with_guards(
        tool: Arc<dyn Tool>,
        arguments: Value,
        ctx: ExecutionContext,
    ) -> Result<Value> {
        let timeout = tool.execution_timeout();
        let tool_name = tool.name().to_string();

        let handle = tokio::task::spawn(async move {
            tokio::time::timeout(timeout, tool.execute(arguments, &ctx)).await
        });

        match handle.await {
            Ok(Ok(Ok(value))) => Ok(value),
            Ok(Ok(Err(e))) => Err(e),
            Ok(Err(_elapsed)) => Err(WardenError::Timeout(timeout)),
            Err(join_err) => {
                if join_err.is_panic() {
                    let payload = join_err.into_panic();
                    let message = payload
                        .downcast_ref::<String>()
                        .map(String::as_str)
                        .or_else(|| payload.downcast_ref::<&str>().copied())
                        .unwrap_or("unknown cause");
                    tracing::error!(tool = %tool_name, %message, "tool panicked");
                    Err(WardenError::ToolExecution {
                        tool: tool_name,
                        message: message.to_string(),
                        error_type: Some("panic".to_string()),
                    })
                } else {
                    Err(WardenError::ToolExecution {
                        tool: tool_name,
                        message: "task cancelled".to_string(),
                        error_type: Some("cancelled".to_string()),
                    })
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::ParamSchema;
    use crate::safeguard::Level;
    use async_trait::async_trait;

    struct Slow;

    #[async_trait]
    impl Tool for Slow {
        fn name(&self) -> &str {
            "slow"
        }
        fn description(&self) -> &str {
            "sleeps past its deadline"
        }
        fn parameters(&self) -> Vec<ParamSchema> {
            vec![]
        }
        fn level(&self) -> Level {
            Level::L0
        }
        fn execution_timeout(&self) -> std::time::Duration {
            std::time::Duration::from_millis(50)
        }
        async fn execute(&self, _arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
            tokio::time::sleep(std::time::Duration::from_secs(5)).await;
            Ok(Value::Null)
        }
    }

    struct Panicky;

    #[async_trait]
    impl Tool for Panicky {
        fn name(&self) -> &str {
            "panicky"
        }
        fn description(&self) -> &str {
            "always panics"
        }
        fn parameters(&self) -> Vec<ParamSchema> {
            vec![]
        }
        fn level(&self) -> Level {
            Level::L0
        }
        async fn execute(&self, _arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
            panic!("boom");
        }
    }

    struct Required;

    #[async_trait]
    impl Tool for Required {
        fn name(&self) -> &str {
            "required"
        }
        fn description(&self) -> &str {
            "needs a device_name string"
        }
        fn parameters(&self) -> Vec<ParamSchema> {
            vec![ParamSchema {
                name: "device_name".into(),
                param_type: ParamType::String,
                required: true,
                default: None,
                r#enum: None,
            }]
        }
        fn level(&self) -> Level {
            Level::L0
        }
        async fn execute(&self, arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
            Ok(arguments)
        }
    }

    fn dispatcher_with(tool: Arc<dyn Tool>) -> Dispatcher {
        let mut reg = ToolRegistry::new();
        reg.register(tool).unwrap();
        Dispatcher::new(Arc::new(reg))
    }

    #[tokio::test]
    async fn timeout_never_aborts_the_process() {
        let d = dispatcher_with(Arc::new(Slow));
        let mut ctx = ExecutionContext::new("test");
        let err = d.call("slow", Value::Object(Default::default()), &mut ctx).await.unwrap_err();
        assert!(matches!(err, WardenError::Timeout(_)));
    }

    #[tokio::test]
    async fn panics_are_caught_not_propagated() {
        let d = dispatcher_with(Arc::new(Panicky));
        let mut ctx = ExecutionContext::new("test");
        let err = d.call("panicky", Value::Object(Default::default()), &mut ctx).await.unwrap_err();
        assert!(matches!(err, WardenError::ToolExecution { .. }));
    }

    #[tokio::test]
    async fn missing_required_param_is_validation_error() {
        let d = dispatcher_with(Arc::new(Required));
        let mut ctx = ExecutionContext::new("test");
        let err = d.call("required", serde_json::json!({}), &mut ctx).await.unwrap_err();
        assert!(matches!(err, WardenError::Validation(_)));
    }

    #[tokio::test]
    async fn unknown_tool_is_not_found() {
        let d = dispatcher_with(Arc::new(Required));
        let mut ctx = ExecutionContext::new("test");
        let err = d.call("nope", Value::Null, &mut ctx).await.unwrap_err();
        assert!(matches!(err, WardenError::NotFound(_)));
    }

    #[tokio::test]
    async fn audit_entries_redact_sensitive_arguments() {
        let d = dispatcher_with(Arc::new(Required));
        let mut ctx = ExecutionContext::new("test");
        d.call("required", serde_json::json!({"device_name": "sw-01"}), &mut ctx)
            .await
            .unwrap();
        assert_eq!(ctx.audit_log().len(), 1);
        assert_eq!(ctx.audit_log()[0].arguments_redacted["device_name"], "sw-01");
    }
}
