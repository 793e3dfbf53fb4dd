//! Component G — Scheduler. Registers workflows against interval, cron, or
//! webhook triggers and drives them through `Workflow::run` on an adaptive
//! poll loop, tracking in-flight runs so shutdown can wait for them rather
//! than abort mid-execution.
//!
//! Grounded on `cron/service.rs::CronService` (`validate_cron_expr`,
//! `compute_next_run`, the adaptive-sleep poll loop and its
//! `MIN_SLEEP_MS`/`MAX_SLEEP_MS`/`POLL_WHEN_EMPTY_SEC` constants) generalized
//! from user-authored cron jobs to the three trigger kinds of the original
//! source's `workflows/core/scheduler.py::WorkflowScheduler`
//! (`register_interval`/`register_cron`/`register_webhook`/`trigger`/
//! `trigger_webhook`/`list_jobs`/`pause_job`/`resume_job`/`shutdown`). Unlike
//! `CronService`, job state lives in memory only — workflows are registered
//! fresh at process startup, not authored by users and persisted to disk.

use crate::workflow::{RunOutcome, TriggerType, Workflow};
use chrono::{DateTime, Utc};
use chrono_tz::Tz;
use cron::Schedule as CronSchedule;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const POLL_WHEN_EMPTY_SEC: u64 = 30;
const MIN_SLEEP_MS: i64 = 1000;
const MAX_SLEEP_MS: u64 = 30000;

pub fn detect_system_timezone() -> Option<String> {
    iana_time_zone::get_timezone().ok()
}

/// Normalizes a 5-field cron expression to the 6-field form the `cron`
/// crate expects, then validates it parses.
pub fn validate_cron_expr(expr: &str) -> Result<String, String> {
    let normalized = if expr.trim().split_whitespace().count() == 5 {
        format!("0 {expr}")
    } else {
        expr.to_string()
    };
    CronSchedule::from_str(&normalized)
        .map(|_| normalized)
        .map_err(|e| format!("invalid cron expression '{expr}': {e}"))
}

#[derive(Debug, Clone)]
pub enum Trigger {
    Interval(Duration),
    Cron { expr: String, tz: Option<String> },
    Webhook { path: String },
}

fn compute_next_run(trigger: &Trigger, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    match trigger {
        Trigger::Interval(period) => chrono::Duration::from_std(*period).ok().map(|d| now + d),
        Trigger::Cron { expr, tz } => {
            let schedule = CronSchedule::from_str(expr).ok()?;
            match tz {
                Some(tz_str) => match tz_str.parse::<Tz>() {
                    Ok(zone) => {
                        let local_now = now.with_timezone(&zone);
                        schedule.after(&local_now).next().map(|dt| dt.with_timezone(&Utc))
                    }
                    Err(_) => {
                        warn!(tz = %tz_str, "unknown timezone, falling back to UTC");
                        schedule.after(&now).next()
                    }
                },
                None => schedule.after(&now).next(),
            }
        }
        Trigger::Webhook { .. } => None,
    }
}

struct Job {
    id: String,
    name: String,
    workflow: Arc<dyn Workflow>,
    trigger: Trigger,
    enabled: bool,
    next_run_at: Option<DateTime<Utc>>,
    last_outcome: Option<RunOutcome>,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct JobStatus {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub next_run_at: Option<DateTime<Utc>>,
    pub last_success: Option<bool>,
}

/// Drives registered workflows to completion and tracks in-flight
/// `JoinHandle`s so `shutdown` can await them instead of aborting — the
/// opposite of `TaskTracker::cancel_all`'s abort-on-drop semantics, chosen
/// because an in-flight workflow run may already have mutated external
/// state (spec.md §4.G: "shutdown waits for in-flight runs").
pub struct Scheduler {
    jobs: Arc<Mutex<Vec<Job>>>,
    inflight: Arc<Mutex<Vec<JoinHandle<()>>>>,
    running: Arc<AtomicBool>,
    loop_handle: Mutex<Option<JoinHandle<()>>>,
}

impl Scheduler {
    pub fn new() -> Self {
        Self {
            jobs: Arc::new(Mutex::new(Vec::new())),
            inflight: Arc::new(Mutex::new(Vec::new())),
            running: Arc::new(AtomicBool::new(false)),
            loop_handle: Mutex::new(None),
        }
    }

    async fn register(&self, id: String, name: String, workflow: Arc<dyn Workflow>, trigger: Trigger) {
        let now = Utc::now();
        let next_run_at = compute_next_run(&trigger, now);
        let mut jobs = self.jobs.lock().await;
        jobs.push(Job {
            id,
            name,
            workflow,
            trigger,
            enabled: true,
            next_run_at,
            last_outcome: None,
        });
    }

    pub async fn register_interval(&self, name: impl Into<String>, workflow: Arc<dyn Workflow>, every: Duration) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.register(id.clone(), name.into(), workflow, Trigger::Interval(every)).await;
        id
    }

    pub async fn register_cron(
        &self,
        name: impl Into<String>,
        workflow: Arc<dyn Workflow>,
        expr: &str,
        tz: Option<String>,
    ) -> Result<String, String> {
        let normalized = validate_cron_expr(expr)?;
        let id = uuid::Uuid::new_v4().to_string();
        self.register(id.clone(), name.into(), workflow, Trigger::Cron { expr: normalized, tz }).await;
        Ok(id)
    }

    pub async fn register_webhook(&self, name: impl Into<String>, workflow: Arc<dyn Workflow>, path: impl Into<String>) -> String {
        let id = uuid::Uuid::new_v4().to_string();
        self.register(id.clone(), name.into(), workflow, Trigger::Webhook { path: path.into() }).await;
        id
    }

    /// Fires the job bound to `path` regardless of its own schedule.
    /// Returns `None` if no webhook-triggered job matches.
    pub async fn trigger_webhook(&self, path: &str, trigger_data: Value, caller_address: Option<String>) -> Option<RunOutcome> {
        let workflow = {
            let jobs = self.jobs.lock().await;
            jobs.iter()
                .find(|j| matches!(&j.trigger, Trigger::Webhook { path: p } if p == path) && j.enabled)
                .map(|j| j.workflow.clone())
        }?;
        Some(run_tracked(workflow, TriggerType::Webhook, trigger_data, caller_address).await)
    }

    pub async fn pause_job(&self, id: &str) -> bool {
        let mut jobs = self.jobs.lock().await;
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(j) => {
                j.enabled = false;
                true
            }
            None => false,
        }
    }

    pub async fn resume_job(&self, id: &str) -> bool {
        let now = Utc::now();
        let mut jobs = self.jobs.lock().await;
        match jobs.iter_mut().find(|j| j.id == id) {
            Some(j) => {
                j.enabled = true;
                if j.next_run_at.is_none() {
                    j.next_run_at = compute_next_run(&j.trigger, now);
                }
                true
            }
            None => false,
        }
    }

    pub async fn list_jobs(&self) -> Vec<JobStatus> {
        let jobs = self.jobs.lock().await;
        jobs.iter()
            .map(|j| JobStatus {
                id: j.id.clone(),
                name: j.name.clone(),
                enabled: j.enabled,
                next_run_at: j.next_run_at,
                last_success: j.last_outcome.as_ref().map(|o| o.success),
            })
            .collect()
    }

    /// Starts the adaptive poll loop as a background task. Idempotent: a
    /// second call is a no-op while already running.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        let scheduler = self.clone();
        let handle = tokio::spawn(async move {
            scheduler.run_loop().await;
        });
        // `try_lock` is safe here: nothing else holds `loop_handle` this
        // early, and `start` is not meant to be called concurrently.
        if let Ok(mut guard) = self.loop_handle.try_lock() {
            *guard = Some(handle);
        }
    }

    /// Whether the adaptive poll loop is currently active.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    async fn run_loop(self: Arc<Self>) {
        while self.running.load(Ordering::SeqCst) {
            let now = Utc::now();
            let mut due = Vec::new();

            {
                let mut jobs = self.jobs.lock().await;
                for job in jobs.iter_mut() {
                    if !job.enabled {
                        continue;
                    }
                    if let Some(next_run) = job.next_run_at {
                        if next_run <= now {
                            due.push((job.workflow.clone(), trigger_type_of(&job.trigger)));
                            job.next_run_at = compute_next_run(&job.trigger, now);
                        }
                    }
                }
            }

            for (workflow, trigger_type) in due {
                let name = workflow.name().to_string();
                let jobs = self.jobs.clone();
                let inflight = self.inflight.clone();
                let handle = tokio::spawn(async move {
                    let outcome = workflow.run(Value::Null, trigger_type, None).await;
                    if !outcome.success {
                        warn!(workflow = %name, error = ?outcome.error, "workflow run did not succeed");
                    } else {
                        info!(workflow = %name, elapsed_ms = outcome.elapsed_ms, "workflow run completed");
                    }
                    let mut jobs = jobs.lock().await;
                    if let Some(job) = jobs.iter_mut().find(|j| j.name == name) {
                        job.last_outcome = Some(outcome);
                    }
                });
                inflight.lock().await.push(handle);
            }

            self.inflight.lock().await.retain(|h| !h.is_finished());

            let sleep_ms = self.next_sleep(now).await;
            tokio::time::sleep(Duration::from_millis(sleep_ms)).await;
        }
    }

    async fn next_sleep(&self, now: DateTime<Utc>) -> u64 {
        let jobs = self.jobs.lock().await;
        let next = jobs
            .iter()
            .filter(|j| j.enabled)
            .filter_map(|j| j.next_run_at)
            .min();
        match next {
            Some(next_run) => {
                let delta_ms = (next_run - now).num_milliseconds().max(MIN_SLEEP_MS);
                (delta_ms as u64).min(MAX_SLEEP_MS)
            }
            None => POLL_WHEN_EMPTY_SEC * 1000,
        }
    }

    /// Stops the poll loop and awaits every in-flight run to completion.
    pub async fn shutdown(&self) {
        self.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.loop_handle.lock().await.take() {
            let _ = handle.await;
        }
        let handles: Vec<_> = self.inflight.lock().await.drain(..).collect();
        for handle in handles {
            let _ = handle.await;
        }
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

async fn run_tracked(
    workflow: Arc<dyn Workflow>,
    trigger_type: TriggerType,
    trigger_data: Value,
    caller_address: Option<String>,
) -> RunOutcome {
    let outcome = workflow.run(trigger_data, trigger_type, caller_address).await;
    if !outcome.success {
        error!(workflow = workflow.name(), error = ?outcome.error, "webhook-triggered run failed");
    }
    outcome
}

fn trigger_type_of(trigger: &Trigger) -> TriggerType {
    match trigger {
        Trigger::Interval(_) => TriggerType::Interval,
        Trigger::Cron { .. } => TriggerType::Cron,
        Trigger::Webhook { .. } => TriggerType::Webhook,
    }
}
