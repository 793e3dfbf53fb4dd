//! Typed error taxonomy shared by the dispatcher, transport layer, and
//! workflow runner. Every surfaced error carries a stable JSON-RPC numeric
//! code and an HTTP status; the two never drift from the mapping below.

use serde::Serialize;
use serde_json::Value;

/// JSON-RPC 2.0 standard codes plus the control-plane's own `-3200x` range.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RpcCode {
    ParseError,
    InvalidRequest,
    MethodNotFound,
    InvalidParams,
    Internal,
    ToolNotFound,
    ToolExecution,
    Authentication,
    RateLimitOrGate,
    ExternalApi,
    Validation,
    Timeout,
}

impl RpcCode {
    pub const fn code(self) -> i64 {
        match self {
            Self::ParseError => -32700,
            Self::InvalidRequest => -32600,
            Self::MethodNotFound => -32601,
            Self::InvalidParams => -32602,
            Self::Internal => -32603,
            Self::ToolNotFound => -32000,
            Self::ToolExecution => -32001,
            Self::Authentication => -32002,
            Self::RateLimitOrGate => -32003,
            Self::ExternalApi => -32004,
            Self::Validation => -32005,
            Self::Timeout => -32006,
        }
    }
}

/// The error taxonomy from the error-handling design: transport, validation,
/// auth, not-found, gate-block, tool-execution, timeout, expired/rejected.
#[derive(thiserror::Error, Debug)]
pub enum WardenError {
    #[error("transport failure: {0}")]
    Transport(String),

    #[error("validation failed: {0}")]
    Validation(String),

    #[error("authentication failed: {0}")]
    Authentication(String),

    #[error("not found: {0}")]
    NotFound(String),

    /// SAFEGUARD refused the operation. Never retried; carries enough data
    /// for the caller to open an approval.
    #[error("blocked by SAFEGUARD at level {level}: {message}")]
    GateBlock {
        level: String,
        message: String,
        requires_human: bool,
        pending_approval_id: Option<String>,
    },

    #[error("tool '{tool}' execution failed: {message}")]
    ToolExecution {
        tool: String,
        message: String,
        error_type: Option<String>,
    },

    #[error("deadline exceeded after {0:?}")]
    Timeout(std::time::Duration),

    #[error("approval {id} is {status}")]
    ApprovalTerminal { id: String, status: String },

    #[error(transparent)]
    Internal(#[from] anyhow::Error),
}

impl WardenError {
    pub fn rpc_code(&self) -> RpcCode {
        match self {
            Self::Transport(_) => RpcCode::ExternalApi,
            Self::Validation(_) => RpcCode::Validation,
            Self::Authentication(_) => RpcCode::Authentication,
            Self::NotFound(_) => RpcCode::ToolNotFound,
            Self::GateBlock { .. } => RpcCode::RateLimitOrGate,
            Self::ToolExecution { .. } => RpcCode::ToolExecution,
            Self::Timeout(_) => RpcCode::Timeout,
            Self::ApprovalTerminal { .. } => RpcCode::Validation,
            Self::Internal(_) => RpcCode::Internal,
        }
    }

    /// HTTP status mirroring the error class, per the error-handling design:
    /// 400 validation, 403 auth failure or gate block, 404 missing resource,
    /// 500 execution failure, 503 unhealthy. The 401-missing-auth case never
    /// reaches this enum: the gateway's auth middleware rejects a request
    /// with no `authorization` header before a `WardenError` is ever built.
    pub fn http_status(&self) -> u16 {
        match self {
            Self::Validation(_) => 400,
            Self::Authentication(_) => 403,
            Self::NotFound(_) => 404,
            Self::GateBlock { .. } => 403,
            Self::ToolExecution { .. } => 500,
            Self::Timeout(_) => 504,
            Self::ApprovalTerminal { .. } => 409,
            Self::Transport(_) => 502,
            Self::Internal(_) => 500,
        }
    }

    /// Structured `data` payload for the JSON-RPC error envelope.
    pub fn rpc_data(&self) -> Option<Value> {
        match self {
            Self::GateBlock {
                level,
                requires_human,
                pending_approval_id,
                ..
            } => Some(serde_json::json!({
                "allowed": false,
                "level": level,
                "requires_human": requires_human,
                "pending_approval_id": pending_approval_id,
            })),
            Self::ToolExecution { error_type, .. } => {
                error_type.as_ref().map(|t| serde_json::json!({ "error_type": t }))
            }
            _ => None,
        }
    }

    /// True for faults worth retrying with backoff at the call site (§4.J):
    /// transport failures and nothing else — validation, auth, gate blocks,
    /// and tool errors are never retried.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

#[derive(Serialize)]
pub struct RpcErrorBody {
    pub code: i64,
    pub message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data: Option<Value>,
}

impl From<&WardenError> for RpcErrorBody {
    fn from(err: &WardenError) -> Self {
        Self {
            code: err.rpc_code().code(),
            message: err.to_string(),
            data: err.rpc_data(),
        }
    }
}

pub type Result<T> = std::result::Result<T, WardenError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gate_block_carries_structured_data() {
        let err = WardenError::GateBlock {
            level: "L3".into(),
            message: "sensitive mutation requires approval".into(),
            requires_human: true,
            pending_approval_id: None,
        };
        assert_eq!(err.rpc_code().code(), -32003);
        assert_eq!(err.http_status(), 403);
        let data = err.rpc_data().unwrap();
        assert_eq!(data["level"], "L3");
        assert_eq!(data["requires_human"], true);
    }

    #[test]
    fn only_transport_errors_are_retryable() {
        assert!(WardenError::Transport("connect refused".into()).is_retryable());
        assert!(!WardenError::Validation("bad enum".into()).is_retryable());
        assert!(
            !WardenError::ToolExecution {
                tool: "x".into(),
                message: "boom".into(),
                error_type: None
            }
            .is_retryable()
        );
    }

    #[test]
    fn http_status_mirrors_class() {
        assert_eq!(WardenError::Validation("x".into()).http_status(), 400);
        assert_eq!(WardenError::NotFound("x".into()).http_status(), 404);
        assert_eq!(
            WardenError::ToolExecution {
                tool: "x".into(),
                message: "x".into(),
                error_type: None
            }
            .http_status(),
            500
        );
    }
}
