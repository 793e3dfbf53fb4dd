//! Component H — Workflow Base Contract. Subclasses (in Rust: trait
//! implementors) supply identity, timeout, and `execute`; the trait's
//! default `run()` method guarantees exactly-once lifecycle callbacks,
//! a monotonic `elapsed_ms`, and a uniform result envelope regardless of
//! how `execute` fails.
//!
//! Grounded on the original source's `workflows/core/base.py::WorkflowBase`:
//! same `run()` structure (validate -> execute under timeout -> on_success,
//! or timeout/known-error/unknown-error -> on_error), same envelope shape,
//! same `call_tool` audit contract. `WorkflowStatus` carries the original's
//! `WaitingApproval` variant, a SUPPLEMENT the distilled spec's prose omits
//! (see SPEC_FULL.md §2).

use crate::mcp_client::{McpCallError, McpClient};
use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Idle,
    Running,
    WaitingApproval,
    Completed,
    Failed,
    Timeout,
    Skipped,
}

#[derive(Debug, Clone, Copy, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    Interval,
    Cron,
    Webhook,
    Manual,
}

/// Records one `call_tool` invocation: name, success, duration — the same
/// audit shape the dispatcher keeps for direct tool calls (spec.md §4.H:
/// "records an audit entry including duration and success").
#[derive(Debug, Clone, Serialize)]
pub struct ToolCallAudit {
    pub tool: String,
    pub success: bool,
    pub duration_ms: u64,
}

pub struct WorkflowContext {
    pub workflow_id: String,
    pub trigger_type: TriggerType,
    pub trigger_data: Value,
    pub caller_address: Option<String>,
    started_at: Instant,
    audit: Vec<ToolCallAudit>,
}

impl WorkflowContext {
    fn new(trigger_type: TriggerType, trigger_data: Value, caller_address: Option<String>) -> Self {
        Self {
            workflow_id: Uuid::new_v4().to_string(),
            trigger_type,
            trigger_data,
            caller_address,
            started_at: Instant::now(),
            audit: Vec::new(),
        }
    }

    pub fn elapsed_ms(&self) -> u64 {
        self.started_at.elapsed().as_millis() as u64
    }

    pub fn tools_called_count(&self) -> usize {
        self.audit.len()
    }

    pub fn audit_log(&self) -> &[ToolCallAudit] {
        &self.audit
    }

    /// Calls a tool through the in-process MCP client and records an audit
    /// entry regardless of outcome.
    pub async fn call_tool(
        &mut self,
        client: &McpClient,
        tool: &str,
        arguments: Value,
    ) -> Result<Value, McpCallError> {
        self.call_tool_with_confidence(client, tool, arguments, None).await
    }

    pub async fn call_tool_with_confidence(
        &mut self,
        client: &McpClient,
        tool: &str,
        arguments: Value,
        confidence: Option<u8>,
    ) -> Result<Value, McpCallError> {
        let start = Instant::now();
        let result = client.call(tool, arguments, confidence).await;
        self.audit.push(ToolCallAudit {
            tool: tool.to_string(),
            success: result.is_ok(),
            duration_ms: start.elapsed().as_millis() as u64,
        });
        result
    }
}

/// A typed failure reason for the run envelope — distinct from
/// `WardenError` because the envelope's `error.kind` field is part of the
/// wire contract (spec.md §8 scenario 6: `error.kind == "timeout"`).
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum WorkflowError {
    Timeout,
    Validation { message: String },
    Known { message: String },
    Unknown { message: String },
}

#[derive(Debug, Clone, Serialize)]
pub struct RunOutcome {
    pub success: bool,
    pub workflow_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<WorkflowError>,
    pub elapsed_ms: u64,
    pub tools_called_count: usize,
}

#[async_trait]
pub trait Workflow: Send + Sync {
    fn name(&self) -> &str;
    fn description(&self) -> &str {
        ""
    }
    /// Documentary only — the dispatcher's SAFEGUARD gate governs tool
    /// calls a workflow makes, not the workflow's own trigger.
    fn safeguard_level(&self) -> crate::safeguard::Level {
        crate::safeguard::Level::L0
    }
    fn timeout(&self) -> Duration {
        Duration::from_secs(30)
    }

    /// Pre-execution check; a validation failure short-circuits `execute`
    /// entirely and is reported distinctly from a mid-run failure.
    async fn validate(&self, _ctx: &WorkflowContext) -> Result<(), String> {
        Ok(())
    }

    async fn execute(&self, ctx: &mut WorkflowContext) -> Result<Value, WorkflowError>;

    async fn on_success(&self, _ctx: &WorkflowContext, _result: &Value) {}
    async fn on_error(&self, _ctx: &WorkflowContext, _error: &WorkflowError) {}

    /// The shared run path (spec.md §4.G/§4.H): new context, validate,
    /// execute under `timeout()`, exactly one of `on_success`/`on_error`,
    /// uniform envelope. Never implement this directly — override
    /// `execute`/`validate`/`on_success`/`on_error` instead.
    async fn run(
        &self,
        trigger_data: Value,
        trigger_type: TriggerType,
        caller_address: Option<String>,
    ) -> RunOutcome {
        let mut ctx = WorkflowContext::new(trigger_type, trigger_data, caller_address);

        if let Err(message) = self.validate(&ctx).await {
            let error = WorkflowError::Validation { message };
            self.on_error(&ctx, &error).await;
            return RunOutcome {
                success: false,
                workflow_id: ctx.workflow_id,
                result: None,
                error: Some(error),
                elapsed_ms: ctx.elapsed_ms(),
                tools_called_count: ctx.tools_called_count(),
            };
        }

        let timeout = self.timeout();
        match tokio::time::timeout(timeout, self.execute(&mut ctx)).await {
            Ok(Ok(result)) => {
                self.on_success(&ctx, &result).await;
                RunOutcome {
                    success: true,
                    workflow_id: ctx.workflow_id,
                    result: Some(result),
                    error: None,
                    elapsed_ms: ctx.elapsed_ms(),
                    tools_called_count: ctx.tools_called_count(),
                }
            }
            Ok(Err(error)) => {
                self.on_error(&ctx, &error).await;
                RunOutcome {
                    success: false,
                    workflow_id: ctx.workflow_id,
                    result: None,
                    error: Some(error),
                    elapsed_ms: ctx.elapsed_ms(),
                    tools_called_count: ctx.tools_called_count(),
                }
            }
            Err(_elapsed) => {
                let error = WorkflowError::Timeout;
                self.on_error(&ctx, &error).await;
                RunOutcome {
                    success: false,
                    workflow_id: ctx.workflow_id,
                    result: None,
                    error: Some(error),
                    elapsed_ms: ctx.elapsed_ms(),
                    tools_called_count: ctx.tools_called_count(),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    struct SlowWorkflow {
        on_error_calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Workflow for SlowWorkflow {
        fn name(&self) -> &str {
            "slow"
        }
        fn timeout(&self) -> Duration {
            Duration::from_millis(50)
        }
        async fn execute(&self, _ctx: &mut WorkflowContext) -> Result<Value, WorkflowError> {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(Value::Null)
        }
        async fn on_error(&self, _ctx: &WorkflowContext, error: &WorkflowError) {
            assert!(matches!(error, WorkflowError::Timeout));
            self.on_error_calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[tokio::test]
    async fn timeout_produces_failed_envelope_and_calls_on_error_exactly_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let wf = SlowWorkflow { on_error_calls: calls.clone() };
        let outcome = wf.run(Value::Null, TriggerType::Manual, None).await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(WorkflowError::Timeout)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    struct ValidatingWorkflow;

    #[async_trait]
    impl Workflow for ValidatingWorkflow {
        fn name(&self) -> &str {
            "validated"
        }
        async fn validate(&self, _ctx: &WorkflowContext) -> Result<(), String> {
            Err("missing required trigger field".to_string())
        }
        async fn execute(&self, _ctx: &mut WorkflowContext) -> Result<Value, WorkflowError> {
            panic!("execute must not run when validate fails");
        }
    }

    #[tokio::test]
    async fn failed_validation_short_circuits_execute() {
        let outcome = ValidatingWorkflow.run(Value::Null, TriggerType::Manual, None).await;
        assert!(!outcome.success);
        assert!(matches!(outcome.error, Some(WorkflowError::Validation { .. })));
    }

    struct HappyWorkflow;

    #[async_trait]
    impl Workflow for HappyWorkflow {
        fn name(&self) -> &str {
            "happy"
        }
        async fn execute(&self, _ctx: &mut WorkflowContext) -> Result<Value, WorkflowError> {
            Ok(serde_json::json!({"ok": true}))
        }
    }

    #[tokio::test]
    async fn success_envelope_carries_result_and_zero_tool_calls() {
        let outcome = HappyWorkflow.run(Value::Null, TriggerType::Manual, None).await;
        assert!(outcome.success);
        assert_eq!(outcome.result.unwrap()["ok"], true);
        assert_eq!(outcome.tools_called_count, 0);
    }
}
