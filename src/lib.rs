#![warn(clippy::pedantic)]
// Noisy doc/signature lints — would require annotating hundreds of pub functions
#![allow(clippy::missing_errors_doc)]
#![allow(clippy::missing_panics_doc)]
#![allow(clippy::must_use_candidate)]
// Style preference — keeping format!("{}", x) over format!("{x}") for readability with complex exprs
#![allow(clippy::uninlined_format_args)]
// Intentional casts throughout LLM/API integration code (token counts, timestamps, sizes)
#![allow(clippy::cast_possible_truncation)]
#![allow(clippy::cast_sign_loss)]
#![allow(clippy::cast_precision_loss)]
#![allow(clippy::cast_possible_wrap)]
// Complex tool/loop functions are naturally long; splitting would be artificial
#![allow(clippy::too_many_lines)]
// Module structure — our tool module has foo::FooTool pattern by design
#![allow(clippy::module_name_repetitions)]

pub mod approvals;
pub mod cli;
pub mod config;
pub mod dispatch;
pub mod errors;
pub mod gateway;
pub mod health;
pub mod mcp_client;
pub mod registry;
pub mod safeguard;
pub mod scheduler;
pub mod secrets;
pub mod state_store;
pub mod tools;
pub mod workflow;

/// Re-exports for fuzz targets. Not part of the public API.
#[doc(hidden)]
pub mod fuzz_api {
    /// Wrapper around `gateway::validate_hmac_signature` for fuzz targets.
    pub fn validate_hmac_signature(secret: &str, signature: &str, body: &[u8]) -> bool {
        crate::gateway::validate_hmac_signature(secret, signature, body)
    }

    /// Wrapper around `scheduler::validate_cron_expr` for fuzz targets.
    pub fn validate_cron_expr(expr: &str) -> Result<String, String> {
        crate::scheduler::validate_cron_expr(expr)
    }
}

pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const LOGO: &str = "🤖";
