//! Ambient configuration. Environment variables drive every setting
//! (spec.md §6); there is no config file on disk. `Config::validate`
//! enforces the production fail-fast checks the teacher's own loader
//! applies at a different layer (`config/loader/mod.rs::load_config`'s
//! "production startup must fail if..." discipline, reused here against a
//! different set of conditions since this crate has no file-based config).
//!
//! The `redact_debug!` macro is carried over unmodified from the teacher's
//! `config/schema/mod.rs` so secrets never leak through a `{:?}` log line.
//!
//! `credentials/`, `loader/`, `schema/`, and `watcher.rs` are the teacher's
//! file-based config stack, kept on disk as reference and no longer wired
//! into this module — this crate's configuration model is env-var-only.

use std::time::Duration;

macro_rules! redact_debug {
    (@field $builder:ident, $self:ident, redact($field:ident)) => {
        $builder.field(
            stringify!($field),
            &if $self.$field.is_empty() {
                "[empty]"
            } else {
                "[REDACTED]"
            },
        );
    };
    (@field $builder:ident, $self:ident, redact_option($field:ident)) => {
        $builder.field(
            stringify!($field),
            &$self.$field.as_ref().map(|_| "[REDACTED]"),
        );
    };
    (@field $builder:ident, $self:ident, $field:ident) => {
        $builder.field(stringify!($field), &$self.$field);
    };

    (@fields $builder:ident, $self:ident,) => {};
    (@fields $builder:ident, $self:ident, redact($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, redact_option($field:ident), $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, redact_option($field));
        redact_debug!(@fields $builder, $self, $($rest)*);
    };
    (@fields $builder:ident, $self:ident, $field:ident, $($rest:tt)*) => {
        redact_debug!(@field $builder, $self, $field);
        redact_debug!(@fields $builder, $self, $($rest)*);
    };

    ($struct_name:ident, $($fields:tt)*) => {
        impl std::fmt::Debug for $struct_name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                let mut builder = f.debug_struct(stringify!($struct_name));
                redact_debug!(@fields builder, self, $($fields)*);
                builder.finish()
            }
        }
    };
}

const MIN_AUTH_KEY_LEN: usize = 32;

#[derive(Clone)]
pub struct CollaboratorConfig {
    pub name: String,
    pub url: String,
    pub critical: bool,
}

#[derive(Clone)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub production: bool,

    pub auth_enabled: bool,
    pub auth_key: String,
    pub allowed_origins: Vec<String>,

    pub safeguard_enabled: bool,
    pub encryption_key: String,

    pub sqlite_path: String,
    pub collaborators: Vec<CollaboratorConfig>,
    pub scheduler_timezone: Option<String>,

    pub tool_timeout: Duration,
}

redact_debug!(
    Config,
    host,
    port,
    production,
    auth_enabled,
    redact(auth_key),
    allowed_origins,
    safeguard_enabled,
    redact(encryption_key),
    sqlite_path,
    scheduler_timezone,
    tool_timeout,
);

fn env_or(name: &str, default: &str) -> String {
    std::env::var(name).unwrap_or_else(|_| default.to_string())
}

fn env_bool(name: &str, default: bool) -> bool {
    match std::env::var(name) {
        Ok(v) => matches!(v.trim().to_ascii_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => default,
    }
}

/// `name=url=critical` triples separated by `;` (spec.md §6's collaborator
/// list has no prescribed wire format; semicolon/equals keeps env values
/// shell-quotable without JSON escaping).
fn parse_collaborators(raw: &str) -> Vec<CollaboratorConfig> {
    raw.split(';')
        .filter(|s| !s.trim().is_empty())
        .filter_map(|entry| {
            let parts: Vec<&str> = entry.splitn(3, '=').collect();
            match parts.as_slice() {
                [name, url, critical] => Some(CollaboratorConfig {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                    critical: critical.trim().eq_ignore_ascii_case("true"),
                }),
                [name, url] => Some(CollaboratorConfig {
                    name: name.trim().to_string(),
                    url: url.trim().to_string(),
                    critical: false,
                }),
                _ => {
                    tracing::warn!(entry, "skipping malformed collaborator entry");
                    None
                }
            }
        })
        .collect()
}

impl Config {
    pub fn from_env() -> Self {
        let collaborators_raw = env_or("WARDEN_COLLABORATORS", "");
        Self {
            host: env_or("WARDEN_HOST", "0.0.0.0"),
            port: env_or("WARDEN_PORT", "8787").parse().unwrap_or(8787),
            production: env_bool("WARDEN_PRODUCTION", false),

            auth_enabled: env_bool("WARDEN_AUTH_ENABLED", true),
            auth_key: env_or("WARDEN_AUTH_KEY", ""),
            allowed_origins: env_or("WARDEN_ALLOWED_ORIGINS", "")
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),

            safeguard_enabled: env_bool("WARDEN_SAFEGUARD_ENABLED", true),
            encryption_key: env_or("WARDEN_ENCRYPTION_KEY", ""),

            sqlite_path: env_or("WARDEN_SQLITE_PATH", "warden.db"),
            collaborators: parse_collaborators(&collaborators_raw),
            scheduler_timezone: std::env::var("WARDEN_TIMEZONE").ok().or_else(crate::scheduler::detect_system_timezone),

            tool_timeout: Duration::from_secs(env_or("WARDEN_TOOL_TIMEOUT_SECS", "30").parse().unwrap_or(30)),
        }
    }

    /// Fail-fast checks that apply only in production (spec.md §6): auth
    /// must be on with a key of at least 32 characters, SAFEGUARD must be
    /// enabled, the encryption key must be set, and the origin allowlist
    /// must not be empty — an empty allowlist in production means every
    /// cross-origin request is silently rejected, which is a configuration
    /// mistake worth refusing to start over.
    pub fn validate(&self) -> Result<(), String> {
        if !self.production {
            return Ok(());
        }
        if !self.auth_enabled {
            return Err("WARDEN_AUTH_ENABLED must be true in production".to_string());
        }
        if self.auth_key.len() < MIN_AUTH_KEY_LEN {
            return Err(format!(
                "WARDEN_AUTH_KEY must be at least {MIN_AUTH_KEY_LEN} characters in production"
            ));
        }
        if !self.safeguard_enabled {
            return Err("WARDEN_SAFEGUARD_ENABLED must be true in production".to_string());
        }
        if self.encryption_key.is_empty() {
            return Err("WARDEN_ENCRYPTION_KEY must be set in production".to_string());
        }
        if self.allowed_origins.is_empty() {
            return Err("WARDEN_ALLOWED_ORIGINS must not be empty in production".to_string());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    static ENV_LOCK: Mutex<()> = Mutex::new(());

    fn clear_env() {
        for key in [
            "WARDEN_PRODUCTION",
            "WARDEN_AUTH_ENABLED",
            "WARDEN_AUTH_KEY",
            "WARDEN_SAFEGUARD_ENABLED",
            "WARDEN_ENCRYPTION_KEY",
            "WARDEN_ALLOWED_ORIGINS",
        ] {
            std::env::remove_var(key);
        }
    }

    #[test]
    fn non_production_config_always_validates() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        let config = Config::from_env();
        assert!(config.validate().is_ok());
    }

    #[test]
    fn production_requires_auth_key_of_minimum_length() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("WARDEN_PRODUCTION", "true");
        std::env::set_var("WARDEN_AUTH_KEY", "short");
        std::env::set_var("WARDEN_ENCRYPTION_KEY", "k");
        std::env::set_var("WARDEN_ALLOWED_ORIGINS", "https://example.com");
        let config = Config::from_env();
        assert!(config.validate().is_err());
        clear_env();
    }

    #[test]
    fn production_with_every_requirement_met_validates() {
        let _guard = ENV_LOCK.lock().unwrap();
        clear_env();
        std::env::set_var("WARDEN_PRODUCTION", "true");
        std::env::set_var("WARDEN_AUTH_KEY", "a".repeat(32));
        std::env::set_var("WARDEN_ENCRYPTION_KEY", "k");
        std::env::set_var("WARDEN_ALLOWED_ORIGINS", "https://example.com");
        let config = Config::from_env();
        assert!(config.validate().is_ok());
        clear_env();
    }

    #[test]
    fn debug_output_redacts_secrets() {
        let mut config = Config::from_env();
        config.auth_key = "super-secret-value".to_string();
        config.encryption_key = "another-secret".to_string();
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret-value"));
        assert!(!rendered.contains("another-secret"));
        assert!(rendered.contains("[REDACTED]"));
    }

    #[test]
    fn parses_collaborator_list() {
        let collaborators = parse_collaborators("inventory=http://inv:8080/health=true;billing=http://bill:9090/health");
        assert_eq!(collaborators.len(), 2);
        assert_eq!(collaborators[0].name, "inventory");
        assert!(collaborators[0].critical);
        assert!(!collaborators[1].critical);
    }
}
