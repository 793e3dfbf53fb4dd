//! Component D — Approval Queue. Durable store of pending sensitive
//! operations, keyed by the state machine:
//! `pending -> {approved, rejected, expired}`, `approved -> {executed, failed}`.
//!
//! Grounded method-for-method on the original source's
//! `mcp/safeguard_queue.py::SafeguardQueue`: same table shape, same
//! redact-before-insert + encrypt-if-secrets flow, same expire-before-
//! approve check, same recursive secret merge. Persistence moved from
//! asyncpg/PostgreSQL to `rusqlite` (SPEC_FULL.md — "relational store",
//! technology not prescribed) following the `std::sync::Mutex<Connection>`
//! pattern used by `agent/memory/memory_db/mod.rs`.

use crate::errors::{Result, WardenError};
use crate::safeguard::Level;
use crate::secrets::{extract, merge, EncryptionKey};
use crate::state_store::StateStore;
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use serde::Serialize;
use serde_json::Value;
use std::sync::{Arc, Mutex};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ApprovalStatus {
    Pending,
    Approved,
    Rejected,
    Expired,
    Executed,
    Failed,
}

impl ApprovalStatus {
    fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Expired => "expired",
            Self::Executed => "executed",
            Self::Failed => "failed",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "approved" => Self::Approved,
            "rejected" => Self::Rejected,
            "expired" => Self::Expired,
            "executed" => Self::Executed,
            "failed" => Self::Failed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ApprovalRecord {
    pub approval_id: String,
    pub tool_name: String,
    pub arguments: Value,
    pub security_level: String,
    pub requester_ip: Option<String>,
    pub context: Value,
    pub status: ApprovalStatus,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    pub time_remaining_seconds: i64,
    pub approved_at: Option<DateTime<Utc>>,
    pub approver: Option<String>,
    pub approval_comment: Option<String>,
    pub executed_at: Option<DateTime<Utc>>,
    pub execution_result: Option<Value>,
    pub execution_error: Option<String>,
}

fn seconds_remaining(expires_at: DateTime<Utc>) -> i64 {
    (expires_at - Utc::now()).num_seconds().max(0)
}

pub struct ApprovalStore {
    conn: Mutex<Connection>,
    secrets: Arc<dyn StateStore>,
    encryption: EncryptionKey,
}

const CREATE_TABLE_SQL: &str = r"
    CREATE TABLE IF NOT EXISTS approvals (
        id TEXT PRIMARY KEY,
        tool_name TEXT NOT NULL,
        arguments TEXT NOT NULL,
        security_level TEXT NOT NULL,
        requester_ip TEXT,
        request_context TEXT,
        status TEXT NOT NULL DEFAULT 'pending',
        created_at TEXT NOT NULL,
        expires_at TEXT NOT NULL,
        approved_at TEXT,
        approver TEXT,
        approval_comment TEXT,
        executed_at TEXT,
        execution_result TEXT,
        execution_error TEXT
    );
    CREATE INDEX IF NOT EXISTS idx_approvals_status ON approvals(status);
    CREATE INDEX IF NOT EXISTS idx_approvals_expires ON approvals(expires_at) WHERE status = 'pending';
    CREATE INDEX IF NOT EXISTS idx_approvals_created ON approvals(created_at DESC);
";

fn envelope_key(approval_id: &str) -> String {
    format!("secret:approval:{approval_id}")
}

impl ApprovalStore {
    pub fn open(
        conn: Connection,
        secrets: Arc<dyn StateStore>,
        encryption: EncryptionKey,
    ) -> Result<Self> {
        conn.execute_batch(CREATE_TABLE_SQL)
            .map_err(|e| WardenError::Internal(e.into()))?;
        Ok(Self {
            conn: Mutex::new(conn),
            secrets,
            encryption,
        })
    }

    /// Rejects creation if `level != L3` (spec.md §4.D). Splits arguments
    /// into a redacted record plus an encrypted secret envelope with
    /// TTL = approval TTL + 5 minutes safety margin.
    pub fn create(
        &self,
        tool_name: &str,
        arguments: Value,
        level: Level,
        requester_ip: Option<String>,
        context: Value,
        ttl_minutes: i64,
    ) -> Result<ApprovalRecord> {
        if level != Level::L3 {
            return Err(WardenError::Validation(format!(
                "approval queue only accepts L3 tools, got {level}"
            )));
        }

        let approval_id = Uuid::new_v4().to_string();
        let created_at = Utc::now();
        let expires_at = created_at + chrono::Duration::minutes(ttl_minutes);

        let (redacted_args, secrets_tree) = extract(&arguments);
        if !secrets_tree.as_object().is_some_and(serde_json::Map::is_empty) {
            let ciphertext = self
                .encryption
                .encrypt(&secrets_tree)
                .map_err(WardenError::Internal)?;
            let ttl_seconds = (ttl_minutes * 60 + 300) as u64;
            self.secrets
                .set_bytes(&envelope_key(&approval_id), ciphertext, Some(ttl_seconds));
            tracing::warn!(approval_id = %approval_id, "sensitive fields secured in side envelope");
        }

        let record = ApprovalRecord {
            approval_id: approval_id.clone(),
            tool_name: tool_name.to_string(),
            arguments: redacted_args,
            security_level: level.as_str().to_string(),
            requester_ip,
            context,
            status: ApprovalStatus::Pending,
            created_at,
            expires_at,
            time_remaining_seconds: seconds_remaining(expires_at),
            approved_at: None,
            approver: None,
            approval_comment: None,
            executed_at: None,
            execution_result: None,
            execution_error: None,
        };

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "INSERT INTO approvals (id, tool_name, arguments, security_level, requester_ip, request_context, status, created_at, expires_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            params![
                record.approval_id,
                record.tool_name,
                record.arguments.to_string(),
                record.security_level,
                record.requester_ip,
                record.context.to_string(),
                record.status.as_str(),
                record.created_at.to_rfc3339(),
                record.expires_at.to_rfc3339(),
            ],
        )
        .map_err(|e| WardenError::Internal(e.into()))?;

        tracing::warn!(
            approval_id = %record.approval_id,
            tool = %record.tool_name,
            expires_at = %record.expires_at,
            "approval request created"
        );
        Ok(record)
    }

    fn row_to_record(row: &rusqlite::Row<'_>) -> rusqlite::Result<ApprovalRecord> {
        let parse_dt = |s: String| -> DateTime<Utc> {
            DateTime::parse_from_rfc3339(&s)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now())
        };
        let parse_opt_dt = |s: Option<String>| s.map(parse_dt);
        let parse_json = |s: String| serde_json::from_str(&s).unwrap_or(Value::Null);
        let parse_opt_json = |s: Option<String>| s.map(parse_json);

        let expires_at = parse_dt(row.get("expires_at")?);
        Ok(ApprovalRecord {
            approval_id: row.get("id")?,
            tool_name: row.get("tool_name")?,
            arguments: parse_json(row.get("arguments")?),
            security_level: row.get("security_level")?,
            requester_ip: row.get("requester_ip")?,
            context: row
                .get::<_, Option<String>>("request_context")?
                .map(parse_json)
                .unwrap_or(Value::Null),
            status: ApprovalStatus::parse(&row.get::<_, String>("status")?),
            created_at: parse_dt(row.get("created_at")?),
            expires_at,
            time_remaining_seconds: seconds_remaining(expires_at),
            approved_at: parse_opt_dt(row.get("approved_at")?),
            approver: row.get("approver")?,
            approval_comment: row.get("approval_comment")?,
            executed_at: parse_opt_dt(row.get("executed_at")?),
            execution_result: parse_opt_json(row.get("execution_result")?),
            execution_error: row.get("execution_error")?,
        })
    }

    /// Only pending, unexpired records, ordered newest first.
    pub fn list_pending(&self, limit: i64) -> Result<Vec<ApprovalRecord>> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn
            .prepare(
                "SELECT * FROM approvals WHERE status = 'pending' AND expires_at > ?1
                 ORDER BY created_at DESC LIMIT ?2",
            )
            .map_err(|e| WardenError::Internal(e.into()))?;
        let rows = stmt
            .query_map(params![Utc::now().to_rfc3339(), limit], Self::row_to_record)
            .map_err(|e| WardenError::Internal(e.into()))?;
        rows.collect::<rusqlite::Result<Vec<_>>>()
            .map_err(|e| WardenError::Internal(e.into()))
    }

    pub fn get(&self, approval_id: &str) -> Result<Option<ApprovalRecord>> {
        let conn = self.conn.lock().unwrap();
        conn.query_row(
            "SELECT * FROM approvals WHERE id = ?1",
            params![approval_id],
            Self::row_to_record,
        )
        .optional()
        .map_err(|e| WardenError::Internal(e.into()))
    }

    fn set_status(&self, approval_id: &str, status: ApprovalStatus) -> Result<()> {
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE approvals SET status = ?2 WHERE id = ?1",
            params![approval_id, status.as_str()],
        )
        .map_err(|e| WardenError::Internal(e.into()))?;
        Ok(())
    }

    /// Moves a pending record past its deadline to `expired` if necessary.
    /// Returns the up-to-date record.
    fn expire_if_due(&self, mut record: ApprovalRecord) -> Result<ApprovalRecord> {
        if record.status == ApprovalStatus::Pending && record.expires_at < Utc::now() {
            self.set_status(&record.approval_id, ApprovalStatus::Expired)?;
            record.status = ApprovalStatus::Expired;
        }
        Ok(record)
    }

    /// Rejects if status != pending (first transitioning expired records).
    /// Idempotent: re-approving an already-approved record fails without
    /// side effects (spec.md §8).
    pub fn approve(&self, approval_id: &str, approver: &str, comment: Option<String>) -> Result<ApprovalRecord> {
        let record = self
            .get(approval_id)?
            .ok_or_else(|| WardenError::NotFound(format!("approval '{approval_id}' not found")))?;
        let record = self.expire_if_due(record)?;

        if record.status != ApprovalStatus::Pending {
            return Err(WardenError::ApprovalTerminal {
                id: approval_id.to_string(),
                status: record.status.as_str().to_string(),
            });
        }

        let approved_at = Utc::now();
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE approvals SET status = 'approved', approved_at = ?2, approver = ?3, approval_comment = ?4 WHERE id = ?1",
            params![approval_id, approved_at.to_rfc3339(), approver, comment],
        )
        .map_err(|e| WardenError::Internal(e.into()))?;
        drop(conn);

        tracing::info!(approval_id, approver, "approval granted");
        self.get(approval_id)?
            .ok_or_else(|| WardenError::NotFound(format!("approval '{approval_id}' vanished")))
    }

    pub fn reject(&self, approval_id: &str, approver: &str, comment: Option<String>) -> Result<ApprovalRecord> {
        let record = self
            .get(approval_id)?
            .ok_or_else(|| WardenError::NotFound(format!("approval '{approval_id}' not found")))?;
        let record = self.expire_if_due(record)?;

        if record.status != ApprovalStatus::Pending {
            return Err(WardenError::ApprovalTerminal {
                id: approval_id.to_string(),
                status: record.status.as_str().to_string(),
            });
        }

        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE approvals SET status = 'rejected', approved_at = ?2, approver = ?3, approval_comment = ?4 WHERE id = ?1",
            params![approval_id, Utc::now().to_rfc3339(), approver, comment],
        )
        .map_err(|e| WardenError::Internal(e.into()))?;
        drop(conn);

        tracing::info!(approval_id, approver, "approval rejected");
        self.get(approval_id)?
            .ok_or_else(|| WardenError::NotFound(format!("approval '{approval_id}' vanished")))
    }

    /// Reconstitutes the full argument tree for an approved record by
    /// merging the decrypted envelope back into the redacted arguments.
    /// If the envelope has expired while the record survives, the merge
    /// fails and dispatch must be aborted (spec.md §4.D) — this is
    /// explicit, not a bug: an ephemeral secret store can outlive its
    /// approval row.
    pub fn full_arguments(&self, approval_id: &str) -> Result<Value> {
        let record = self
            .get(approval_id)?
            .ok_or_else(|| WardenError::NotFound(format!("approval '{approval_id}' not found")))?;

        let Some(ciphertext) = self.secrets.get_bytes(&envelope_key(approval_id)) else {
            return Ok(record.arguments);
        };

        let secrets_tree = self
            .encryption
            .decrypt(&ciphertext)
            .map_err(|e| WardenError::Internal(e.context("secret envelope decrypt failed")))?;

        let mut full = record.arguments;
        merge(&mut full, &secrets_tree);
        Ok(full)
    }

    pub fn mark_executed(&self, approval_id: &str, result: Option<Value>, error: Option<String>) -> Result<()> {
        let status = if error.is_some() { ApprovalStatus::Failed } else { ApprovalStatus::Executed };
        let conn = self.conn.lock().unwrap();
        conn.execute(
            "UPDATE approvals SET status = ?2, executed_at = ?3, execution_result = ?4, execution_error = ?5 WHERE id = ?1",
            params![
                approval_id,
                status.as_str(),
                Utc::now().to_rfc3339(),
                result.map(|r| r.to_string()),
                error,
            ],
        )
        .map_err(|e| WardenError::Internal(e.into()))?;
        Ok(())
    }

    /// Deletes the envelope once a terminal state beyond `approved` is
    /// reached. Call after `mark_executed`.
    pub fn cleanup_secrets(&self, approval_id: &str) {
        self.secrets.delete(&envelope_key(approval_id));
    }

    /// Bulk-transitions pending records past their deadline. Returns the
    /// count expired.
    pub fn expire_old(&self) -> Result<usize> {
        let conn = self.conn.lock().unwrap();
        let count = conn
            .execute(
                "UPDATE approvals SET status = 'expired' WHERE status = 'pending' AND expires_at < ?1",
                params![Utc::now().to_rfc3339()],
            )
            .map_err(|e| WardenError::Internal(e.into()))?;
        if count > 0 {
            tracing::info!(count, "approvals expired");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state_store::MokaStateStore;

    fn store() -> ApprovalStore {
        let conn = Connection::open_in_memory().unwrap();
        let secrets: Arc<dyn StateStore> = Arc::new(MokaStateStore::new());
        ApprovalStore::open(conn, secrets, EncryptionKey::derive("test-key")).unwrap()
    }

    #[test]
    fn create_rejects_non_l3() {
        let s = store();
        let err = s
            .create("reset_password", serde_json::json!({}), Level::L2, None, Value::Null, 60)
            .unwrap_err();
        assert!(matches!(err, WardenError::Validation(_)));
    }

    #[test]
    fn create_redacts_secrets_in_the_record_and_stores_an_envelope() {
        let s = store();
        let record = s
            .create(
                "reset_password",
                serde_json::json!({"username": "jdoe", "new_password": "S3cret!"}),
                Level::L3,
                None,
                Value::Null,
                60,
            )
            .unwrap();
        assert_eq!(record.arguments["new_password"], "[REDACTED]");
        assert!(s.secrets.get_bytes(&envelope_key(&record.approval_id)).is_some());
    }

    #[test]
    fn approve_then_full_arguments_recovers_the_secret() {
        let s = store();
        let record = s
            .create(
                "reset_password",
                serde_json::json!({"username": "jdoe", "new_password": "S3cret!"}),
                Level::L3,
                None,
                Value::Null,
                60,
            )
            .unwrap();
        s.approve(&record.approval_id, "alice", None).unwrap();
        let full = s.full_arguments(&record.approval_id).unwrap();
        assert_eq!(full["new_password"], "S3cret!");
    }

    #[test]
    fn approve_is_idempotent_and_fails_without_side_effects_on_retry() {
        let s = store();
        let record = s
            .create("reset_password", serde_json::json!({"new_password": "x"}), Level::L3, None, Value::Null, 60)
            .unwrap();
        s.approve(&record.approval_id, "alice", None).unwrap();
        let err = s.approve(&record.approval_id, "alice", None).unwrap_err();
        assert!(matches!(err, WardenError::ApprovalTerminal { .. }));
        let after = s.get(&record.approval_id).unwrap().unwrap();
        assert_eq!(after.status, ApprovalStatus::Approved);
        assert_eq!(after.approver.as_deref(), Some("alice"));
    }

    #[test]
    fn approving_past_expiry_transitions_to_expired_instead() {
        let s = store();
        let record = s
            .create("reset_password", serde_json::json!({"new_password": "x"}), Level::L3, None, Value::Null, -1)
            .unwrap();
        let err = s.approve(&record.approval_id, "alice", None).unwrap_err();
        assert!(matches!(err, WardenError::ApprovalTerminal { .. }));
        let after = s.get(&record.approval_id).unwrap().unwrap();
        assert_eq!(after.status, ApprovalStatus::Expired);
    }

    #[test]
    fn mark_executed_then_cleanup_removes_the_envelope() {
        let s = store();
        let record = s
            .create("reset_password", serde_json::json!({"new_password": "x"}), Level::L3, None, Value::Null, 60)
            .unwrap();
        s.approve(&record.approval_id, "alice", None).unwrap();
        s.mark_executed(&record.approval_id, Some(serde_json::json!({"ok": true})), None).unwrap();
        s.cleanup_secrets(&record.approval_id);
        assert!(s.secrets.get_bytes(&envelope_key(&record.approval_id)).is_none());
        let after = s.get(&record.approval_id).unwrap().unwrap();
        assert_eq!(after.status, ApprovalStatus::Executed);
    }

    #[test]
    fn list_pending_excludes_expired_and_non_pending() {
        let s = store();
        let a = s.create("t1", serde_json::json!({}), Level::L3, None, Value::Null, 60).unwrap();
        let b = s.create("t2", serde_json::json!({}), Level::L3, None, Value::Null, -1).unwrap();
        s.expire_old().unwrap();
        let pending = s.list_pending(50).unwrap();
        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].approval_id, a.approval_id);
        assert_ne!(pending[0].approval_id, b.approval_id);
    }
}
