//! Component I — Health Monitor / Circuit Breaker. Probes configured
//! collaborators on a fixed interval, classifies each as ok/degraded/down,
//! and caches the verdict plus an anti-spam alert flag in the shared state
//! store so a flapping collaborator doesn't re-page on every tick.
//!
//! Grounded on `heartbeat/service.rs`'s running-flag + spawn/sleep/callback
//! shape for the probe loop, and `providers/circuit_breaker/mod.rs`'s
//! enum-driven state classification discipline (reused here for
//! ok/degraded/down rather than closed/open/half-open). Original source:
//! `workflows/health_check/workflow.py`.

use crate::state_store::{StateStore, StateStoreExt};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

const PROBE_INTERVAL: Duration = Duration::from_secs(30);
const PROBE_TIMEOUT: Duration = Duration::from_secs(5);
const STATUS_TTL_SECONDS: u64 = 60;
const ALERT_TTL_SECONDS: u64 = 300;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Ok,
    Degraded,
    Down,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthRecord {
    pub status: Status,
    pub checked_at: chrono::DateTime<chrono::Utc>,
}

#[derive(Debug, Clone)]
pub struct Collaborator {
    pub name: String,
    pub url: String,
    /// A critical collaborator being non-ok flips the aggregate `/health`
    /// response to unhealthy; a non-critical one only degrades it.
    pub critical: bool,
}

fn status_key(name: &str) -> String {
    format!("health:{name}")
}

fn alert_key(name: &str) -> String {
    format!("alert:{name}")
}

fn classify(status: reqwest::StatusCode) -> Status {
    if status.is_success() {
        Status::Ok
    } else if status.as_u16() == 401 || status.as_u16() == 403 {
        Status::Degraded
    } else {
        Status::Down
    }
}

pub struct HealthMonitor {
    http: reqwest::Client,
    store: Arc<dyn StateStore>,
    collaborators: Vec<Collaborator>,
    running: Arc<AtomicBool>,
}

impl HealthMonitor {
    pub fn new(store: Arc<dyn StateStore>, collaborators: Vec<Collaborator>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(PROBE_TIMEOUT)
            .build()
            .expect("reqwest client builds with static configuration");
        Self {
            http,
            store,
            collaborators,
            running: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Starts the 30s probe loop as a background task. Idempotent.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let monitor = self.clone();
        tokio::spawn(async move {
            while monitor.running.load(Ordering::SeqCst) {
                monitor.tick().await;
                tokio::time::sleep(PROBE_INTERVAL).await;
            }
        });
    }

    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
    }

    pub async fn tick(&self) {
        for collaborator in &self.collaborators {
            self.probe_one(collaborator).await;
        }
    }

    async fn probe_one(&self, collaborator: &Collaborator) {
        let previous_status: Option<Status> = self
            .store
            .get_json::<HealthRecord>(&status_key(&collaborator.name))
            .ok()
            .flatten()
            .map(|r| r.status);

        let status = match tokio::time::timeout(PROBE_TIMEOUT, self.http.get(&collaborator.url).send()).await {
            Ok(Ok(response)) => classify(response.status()),
            Ok(Err(_)) => Status::Down,
            Err(_) => Status::Down,
        };

        let record = HealthRecord { status, checked_at: chrono::Utc::now() };
        let _ = self.store.set_json(&status_key(&collaborator.name), &record, Some(STATUS_TTL_SECONDS));

        let alert_key = alert_key(&collaborator.name);
        match (previous_status, status) {
            (_, Status::Down) if !self.store.exists(&alert_key) => {
                warn!(collaborator = %collaborator.name, "collaborator is down");
                self.store.set_bytes(&alert_key, b"1".to_vec(), Some(ALERT_TTL_SECONDS));
                self.store.publish(
                    "health:transitions",
                    serde_json::json!({"collaborator": collaborator.name, "to": "down"}),
                );
            }
            (Some(Status::Down), Status::Ok) => {
                info!(collaborator = %collaborator.name, "collaborator recovered");
                self.store.delete(&alert_key);
                self.store.publish(
                    "health:transitions",
                    serde_json::json!({"collaborator": collaborator.name, "to": "ok"}),
                );
            }
            _ => {}
        }
    }

    pub fn status(&self, name: &str) -> Option<HealthRecord> {
        self.store.get_json(&status_key(name)).ok().flatten()
    }

    /// `(overall_healthy, per_collaborator)` — overall is false only when a
    /// critical collaborator is non-ok (spec.md §4.I).
    pub fn aggregate(&self) -> (bool, Vec<(String, Status, bool)>) {
        let mut overall = true;
        let mut rows = Vec::with_capacity(self.collaborators.len());
        for collaborator in &self.collaborators {
            let status = self.status(&collaborator.name).map(|r| r.status).unwrap_or(Status::Down);
            if collaborator.critical && status != Status::Ok {
                overall = false;
            }
            rows.push((collaborator.name.clone(), status, collaborator.critical));
        }
        (overall, rows)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::MokaStateStore;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn monitor_for(server: &MockServer, critical: bool) -> (Arc<HealthMonitor>, Arc<MokaStateStore>) {
        let store = Arc::new(MokaStateStore::new());
        let monitor = Arc::new(HealthMonitor::new(
            store.clone() as Arc<dyn StateStore>,
            vec![Collaborator { name: "upstream".into(), url: format!("{}/health", server.uri()), critical }],
        ));
        (monitor, store)
    }

    #[tokio::test]
    async fn healthy_response_is_classified_ok_and_cached() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
        let (monitor, _store) = monitor_for(&server, true).await;

        monitor.tick().await;

        assert_eq!(monitor.status("upstream").unwrap().status, Status::Ok);
        let (overall, _) = monitor.aggregate();
        assert!(overall);
    }

    #[tokio::test]
    async fn unauthorized_response_is_degraded_not_down() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(401)).mount(&server).await;
        let (monitor, _store) = monitor_for(&server, true).await;

        monitor.tick().await;

        assert_eq!(monitor.status("upstream").unwrap().status, Status::Degraded);
    }

    #[tokio::test]
    async fn server_error_transitions_to_down_and_raises_alert_once() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(500)).mount(&server).await;
        let (monitor, store) = monitor_for(&server, true).await;

        monitor.tick().await;
        assert_eq!(monitor.status("upstream").unwrap().status, Status::Down);
        assert!(store.exists("alert:upstream"));

        let (overall, _) = monitor.aggregate();
        assert!(!overall);
    }

    #[tokio::test]
    async fn recovery_clears_the_alert_flag() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(500)).up_to_n_times(1).mount(&server).await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(200)).mount(&server).await;
        let (monitor, store) = monitor_for(&server, true).await;

        monitor.tick().await;
        assert_eq!(monitor.status("upstream").unwrap().status, Status::Down);
        assert!(store.exists("alert:upstream"));

        monitor.tick().await;
        assert_eq!(monitor.status("upstream").unwrap().status, Status::Ok);
        assert!(!store.exists("alert:upstream"));
    }

    #[tokio::test]
    async fn non_critical_down_collaborator_does_not_flip_overall_health() {
        let server = MockServer::start().await;
        Mock::given(method("GET")).and(path("/health")).respond_with(ResponseTemplate::new(503)).mount(&server).await;
        let (monitor, _store) = monitor_for(&server, false).await;

        monitor.tick().await;

        let (overall, rows) = monitor.aggregate();
        assert!(overall);
        assert_eq!(rows[0].1, Status::Down);
    }
}
