//! Audit log (spec.md §6 "Persisted state layouts", audit log).
//!
//! Append-only JSON-lines record of privileged operator actions (Slack
//! `/set-cap`, `/override-cap`, `/set-cooldown`) applied through Caps and
//! Cooldown. Distinct from the circuit breaker's own event store
//! (`src/circuit_breaker/events.rs`), that log is a replay source for
//! breaker state; this one is a read-only provenance trail. Grounded on
//! `mqk-audit/src/lib.rs::AuditWriter::append`, minus its hash chain, same
//! as the circuit breaker's event log already does.

use crate::persistence::append_jsonl;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::PathBuf;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditRecord {
    pub ts: DateTime<Utc>,
    pub action: String,
    pub user_id: String,
    pub symbol: Option<String>,
    pub old: Value,
    pub new: Value,
    pub ttl_secs: Option<i64>,
    pub reason: String,
    pub meta: Value,
}

/// Append-only writer for `AuditRecord`s (spec.md §6: `{ts, action, user_id,
/// symbol, old, new, ttl, reason, meta}`).
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    /// Appends one record; a write failure is logged and otherwise ignored
    /// (spec.md §7 "Persistence": in-memory state is authoritative, the
    /// audit trail is best-effort).
    #[allow(clippy::too_many_arguments)]
    pub fn record(
        &self,
        action: &str,
        user_id: &str,
        symbol: Option<&str>,
        old: Value,
        new: Value,
        ttl: Option<chrono::Duration>,
        reason: &str,
    ) {
        let record = AuditRecord {
            ts: Utc::now(),
            action: action.to_string(),
            user_id: user_id.to_string(),
            symbol: symbol.map(str::to_string),
            old,
            new,
            ttl_secs: ttl.map(|d| d.num_seconds()),
            reason: reason.to_string(),
            meta: Value::Null,
        };
        if let Err(e) = append_jsonl(&self.path, &record) {
            warn!("audit: write failed: {e}");
        }
    }
}
