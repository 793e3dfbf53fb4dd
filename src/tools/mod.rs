//! Example tool handlers exercising each SAFEGUARD level end to end
//! (spec.md §8's concrete scenarios): a read (L0), a minor mutation gated
//! on confidence (L1), a sensitive mutation that always queues for human
//! approval (L3), and a forbidden operation with no approval path (L4).
//!
//! Grounded on spec.md §9's polymorphism note: each handler closes over
//! the HTTP client and collaborator URL it needs at registration time
//! rather than threading them through every call, the same shape the
//! teacher uses for provider-backed tools in `agent/tools/`.

use crate::dispatch::ExecutionContext;
use crate::errors::{Result, WardenError};
use crate::registry::{ParamSchema, ParamType, Tool, ToolRegistry};
use crate::safeguard::Level;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;

fn field(name: &str, param_type: ParamType, required: bool) -> ParamSchema {
    ParamSchema { name: name.to_string(), param_type, required, default: None, r#enum: None }
}

async fn get_json(client: &reqwest::Client, url: &str) -> anyhow::Result<Value> {
    let response = client.get(url).send().await?.error_for_status()?;
    Ok(response.json::<Value>().await?)
}

async fn post_json(client: &reqwest::Client, url: &str, body: &Value) -> anyhow::Result<Value> {
    let response = client.post(url).json(body).send().await?.error_for_status()?;
    Ok(response.json::<Value>().await?)
}

/// L0 — read-only device lookup against the inventory collaborator.
pub struct GetDeviceStatusTool {
    http: reqwest::Client,
    inventory_url: String,
}

impl GetDeviceStatusTool {
    pub fn new(http: reqwest::Client, inventory_url: impl Into<String>) -> Self {
        Self { http, inventory_url: inventory_url.into() }
    }
}

#[async_trait]
impl Tool for GetDeviceStatusTool {
    fn name(&self) -> &str {
        "get_device_status"
    }
    fn description(&self) -> &str {
        "Looks up the current status of a network device"
    }
    fn parameters(&self) -> Vec<ParamSchema> {
        vec![field("device_name", ParamType::String, true)]
    }
    fn level(&self) -> Level {
        Level::L0
    }
    fn execution_timeout(&self) -> Duration {
        Duration::from_secs(10)
    }
    async fn execute(&self, arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let device_name = arguments["device_name"]
            .as_str()
            .ok_or_else(|| WardenError::Validation("device_name must be a string".into()))?;
        let url = format!("{}/devices/{device_name}", self.inventory_url);
        get_json(&self.http, &url)
            .await
            .map_err(|e| WardenError::ToolExecution { tool: self.name().to_string(), message: e.to_string(), error_type: None })
    }
}

/// L1 — minor mutation; SAFEGUARD gates this on caller-supplied confidence
/// before the handler ever runs, so the handler itself does no gating.
pub struct CreateTicketTool {
    http: reqwest::Client,
    ticketing_url: String,
}

impl CreateTicketTool {
    pub fn new(http: reqwest::Client, ticketing_url: impl Into<String>) -> Self {
        Self { http, ticketing_url: ticketing_url.into() }
    }
}

#[async_trait]
impl Tool for CreateTicketTool {
    fn name(&self) -> &str {
        "create_ticket"
    }
    fn description(&self) -> &str {
        "Opens a support ticket"
    }
    fn parameters(&self) -> Vec<ParamSchema> {
        vec![
            field("title", ParamType::String, true),
            field("description", ParamType::String, true),
        ]
    }
    fn level(&self) -> Level {
        Level::L1
    }
    async fn execute(&self, arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let url = format!("{}/tickets", self.ticketing_url);
        post_json(&self.http, &url, &arguments)
            .await
            .map_err(|e| WardenError::ToolExecution { tool: self.name().to_string(), message: e.to_string(), error_type: None })
    }
}

/// L3 — sensitive mutation. `new_password` is redacted from the audit log
/// by the dispatcher automatically; this handler never sees a redacted
/// value itself since it only runs after the approval queue hands back
/// the real arguments via `full_arguments`.
pub struct ResetPasswordTool {
    http: reqwest::Client,
    identity_url: String,
}

impl ResetPasswordTool {
    pub fn new(http: reqwest::Client, identity_url: impl Into<String>) -> Self {
        Self { http, identity_url: identity_url.into() }
    }
}

#[async_trait]
impl Tool for ResetPasswordTool {
    fn name(&self) -> &str {
        "reset_password"
    }
    fn description(&self) -> &str {
        "Resets a user account's password"
    }
    fn parameters(&self) -> Vec<ParamSchema> {
        vec![
            field("account_id", ParamType::String, true),
            field("new_password", ParamType::String, true),
        ]
    }
    fn level(&self) -> Level {
        Level::L3
    }
    async fn execute(&self, arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
        let account_id = arguments["account_id"]
            .as_str()
            .ok_or_else(|| WardenError::Validation("account_id must be a string".into()))?;
        let url = format!("{}/accounts/{account_id}/password", self.identity_url);
        post_json(&self.http, &url, &arguments)
            .await
            .map_err(|e| WardenError::ToolExecution { tool: self.name().to_string(), message: e.to_string(), error_type: None })
    }
}

/// L4 — forbidden. Registered only so discovery can show it exists and
/// explain why it can never run; `execute` is unreachable in practice
/// because the gate blocks every L4 call before dispatch.
pub struct CreateUserTool;

#[async_trait]
impl Tool for CreateUserTool {
    fn name(&self) -> &str {
        "create_user"
    }
    fn description(&self) -> &str {
        "Creates a new user account (forbidden: no approval path exists)"
    }
    fn parameters(&self) -> Vec<ParamSchema> {
        vec![field("username", ParamType::String, true), field("email", ParamType::String, true)]
    }
    fn level(&self) -> Level {
        Level::L4
    }
    async fn execute(&self, _arguments: Value, _ctx: &ExecutionContext) -> Result<Value> {
        Err(WardenError::Validation("create_user has no approval path and cannot execute".into()))
    }
}

/// Registers the built-in catalog against the collaborator URLs configured
/// for this deployment.
pub fn register_builtins(registry: &mut ToolRegistry, config: &crate::config::Config) -> Result<()> {
    let http = reqwest::Client::builder()
        .timeout(config.tool_timeout)
        .build()
        .map_err(|e| WardenError::Internal(anyhow::anyhow!(e)))?;

    let find_url = |name: &str| -> String {
        config
            .collaborators
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.url.clone())
            .unwrap_or_default()
    };

    registry.register(Arc::new(GetDeviceStatusTool::new(http.clone(), find_url("inventory"))))?;
    registry.register(Arc::new(CreateTicketTool::new(http.clone(), find_url("ticketing"))))?;
    registry.register(Arc::new(ResetPasswordTool::new(http.clone(), find_url("identity"))))?;
    registry.register(Arc::new(CreateUserTool))?;
    Ok(())
}
