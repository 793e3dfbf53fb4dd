#![allow(dead_code)]

use rusqlite::Connection;
use std::sync::Arc;
use warden::approvals::ApprovalStore;
use warden::config::Config;
use warden::dispatch::Dispatcher;
use warden::gateway::AppState;
use warden::health::HealthMonitor;
use warden::registry::ToolRegistry;
use warden::secrets::EncryptionKey;
use warden::state_store::MokaStateStore;

pub fn test_state() -> AppState {
    std::env::set_var("WARDEN_AUTH_ENABLED", "false");
    let mut registry = ToolRegistry::new();
    let config = Config::from_env();
    warden::tools::register_builtins(&mut registry, &config).unwrap();
    let registry = Arc::new(registry);
    let dispatcher = Arc::new(Dispatcher::new(registry.clone()));
    let conn = Connection::open_in_memory().unwrap();
    let secrets: Arc<dyn warden::state_store::StateStore> = Arc::new(MokaStateStore::new());
    let approvals = Arc::new(ApprovalStore::open(conn, secrets.clone(), EncryptionKey::derive("integration-test-key")).unwrap());
    let health = Arc::new(HealthMonitor::new(secrets, vec![]));
    AppState { registry, dispatcher, approvals, health, config: Arc::new(config) }
}
