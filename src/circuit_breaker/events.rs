//! Circuit breaker event log: append-only line-delimited JSON with monotonic
//! ids, replay, and age-based compaction (spec.md §4.2 "Event log").
//!
//! Grounded on the append-only JSONL writer in `mqk-audit/src/lib.rs`, minus
//! its hash chain (this spec asks for ordered replay, not tamper evidence).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CbEventType {
    NavUpdated,
    ThresholdBreached,
    StateChanged,
    ManualOverride,
    RecoveryInitiated,
    CoolingOffExpired,
    ConfigChanged,
}

impl CbEventType {
    /// Only state-mutating event types are re-applied on replay
    /// (spec.md §4.2: "informational events ... are not re-applied").
    pub fn is_mutating(self) -> bool {
        matches!(
            self,
            CbEventType::StateChanged
                | CbEventType::ManualOverride
                | CbEventType::RecoveryInitiated
                | CbEventType::ConfigChanged
        )
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CbEvent {
    pub id: String,
    pub seq: u64,
    pub ts: DateTime<Utc>,
    pub event_type: CbEventType,
    pub payload: Value,
    pub correlation_id: Option<String>,
    pub user_id: Option<String>,
    pub reason: Option<String>,
}

impl CbEvent {
    pub fn new(seq: u64, event_type: CbEventType, payload: Value) -> Self {
        Self {
            id: format!("cb_{seq}"),
            seq,
            ts: Utc::now(),
            event_type,
            payload,
            correlation_id: None,
            user_id: None,
            reason: None,
        }
    }

    pub fn with_reason(mut self, reason: impl Into<String>) -> Self {
        self.reason = Some(reason.into());
        self
    }

    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }
}

/// Checks the two invariants in spec.md §8.5: event ids strictly increase,
/// and timestamps are non-decreasing.
pub fn check_monotonic(events: &[CbEvent]) -> Result<(), String> {
    let mut last_seq: Option<u64> = None;
    let mut last_ts: Option<DateTime<Utc>> = None;
    for ev in events {
        if let Some(prev) = last_seq {
            if ev.seq <= prev {
                return Err(format!("event id did not strictly increase at seq {}", ev.seq));
            }
        }
        if let Some(prev) = last_ts {
            if ev.ts < prev {
                return Err(format!("event timestamp went backwards at seq {}", ev.seq));
            }
        }
        last_seq = Some(ev.seq);
        last_ts = Some(ev.ts);
    }
    Ok(())
}
