//! Component J — MCP Client, workflow side. Wraps the registry + dispatcher
//! with the SAFEGUARD gate check workflows must pass before every tool call,
//! plus the retry/backoff discipline for the calls that do go through:
//! transport and tool-execution failures get bounded retries, validation
//! failures and gate blocks never do.
//!
//! Grounded on `providers/circuit_breaker/mod.rs`'s transient/non-transient
//! classification discipline, adapted from wrapping an LLM provider call to
//! wrapping `Dispatcher::call`. The original source has no standalone
//! client module — `workflows/core/base.py::call_mcp`'s duration/success
//! logging contract implies this is a thin wrapper, not a new subsystem.

use crate::dispatch::{Dispatcher, ExecutionContext};
use crate::errors::WardenError;
use crate::registry::ToolRegistry;
use crate::safeguard::{self, Level};
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tracing::warn;

const MAX_RETRIES: u32 = 3;
const BACKOFF_CAP: Duration = Duration::from_secs(10);

/// A typed failure from calling a tool through the client — distinct from
/// `WardenError` so callers can match on `Blocked` without reaching into
/// the dispatcher's error taxonomy.
#[derive(Debug, Clone)]
pub enum McpCallError {
    /// The SAFEGUARD gate refused the call outright.
    Blocked { level: Level, message: String },
    /// Exhausted retries, or a non-retryable failure.
    Failed(String),
}

impl std::fmt::Display for McpCallError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            McpCallError::Blocked { level, message } => write!(f, "blocked at {level}: {message}"),
            McpCallError::Failed(message) => write!(f, "{message}"),
        }
    }
}

impl std::error::Error for McpCallError {}

pub struct McpClient {
    dispatcher: Arc<Dispatcher>,
    registry: Arc<ToolRegistry>,
    safeguard_enabled: bool,
}

impl McpClient {
    pub fn new(dispatcher: Arc<Dispatcher>, registry: Arc<ToolRegistry>, safeguard_enabled: bool) -> Self {
        Self { dispatcher, registry, safeguard_enabled }
    }

    /// Calls `tool` through the SAFEGUARD gate and, if allowed, the
    /// dispatcher, with bounded exponential backoff on retryable failures.
    /// `confidence` is forwarded for L1 threshold evaluation; `None` is
    /// treated as 0 by the gate, same as an unauthenticated caller.
    pub async fn call(
        &self,
        tool: &str,
        arguments: Value,
        confidence: Option<u8>,
    ) -> Result<Value, McpCallError> {
        let level = self.registry.level_or_default(tool);
        let decision = safeguard::decide(level, confidence.unwrap_or(0), self.safeguard_enabled);
        if !decision.allowed {
            return Err(McpCallError::Blocked { level, message: decision.reason });
        }

        let mut ctx = ExecutionContext::new("workflow-scheduler");
        let mut attempt = 0u32;
        loop {
            match self.dispatcher.call(tool, arguments.clone(), &mut ctx).await {
                Ok(result) => return Ok(result),
                Err(err) => {
                    if let Some(mapped) = classify_terminal(&err) {
                        return Err(mapped);
                    }
                    if attempt >= MAX_RETRIES {
                        return Err(McpCallError::Failed(err.to_string()));
                    }
                    let delay = backoff_delay(attempt);
                    warn!(tool, attempt, ?delay, error = %err, "retrying tool call");
                    tokio::time::sleep(delay).await;
                    attempt += 1;
                }
            }
        }
    }
}

/// Returns `Some` for errors that must never be retried (validation,
/// not-found, auth); `None` for transport/timeout/tool-execution errors
/// worth another attempt.
fn classify_terminal(err: &WardenError) -> Option<McpCallError> {
    match err {
        WardenError::Validation(message) => Some(McpCallError::Failed(message.clone())),
        WardenError::NotFound(message) => Some(McpCallError::Failed(message.clone())),
        WardenError::Authentication(message) => Some(McpCallError::Failed(message.clone())),
        WardenError::GateBlock { message, .. } => Some(McpCallError::Failed(message.clone())),
        WardenError::ApprovalTerminal { .. } => Some(McpCallError::Failed(err.to_string())),
        WardenError::Transport(_) | WardenError::Timeout(_) | WardenError::ToolExecution { .. } | WardenError::Internal(_) => None,
    }
}

fn backoff_delay(attempt: u32) -> Duration {
    let millis = 250u64.saturating_mul(1u64 << attempt.min(5));
    Duration::from_millis(millis).min(BACKOFF_CAP)
}
