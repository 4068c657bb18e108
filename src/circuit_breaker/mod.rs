//! Circuit Breaker (spec.md §4.2).
//!
//! Graduated halt/recovery state machine driven by drawdowns, event-sourced
//! so a fresh instance can replay the log and converge to the exact state a
//! live run produced (spec.md §8.4). Generalizes the atomics-based breaker in
//! `services/risk-manager/src/circuit_breaker.rs` into the full state table.

pub mod events;

use crate::errors::CircuitBreakerError;
use crate::persistence::{append_jsonl, compact_jsonl, read_jsonl};
use crate::types::{clamp, TradingIntent};
use chrono::{DateTime, Utc};
use events::{check_monotonic, CbEvent, CbEventType};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use serde_json::json;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CbState {
    Normal,
    Warning,
    Reduced,
    Restricted,
    Minimal,
    Halted,
    CoolingOff,
    Emergency,
}

impl CbState {
    /// Pure function of state (spec.md §4.2 table + invariant §8.7).
    pub fn size_multiplier(self) -> f64 {
        match self {
            CbState::Normal | CbState::Warning => 1.00,
            CbState::Reduced => 0.70,
            CbState::Restricted => 0.50,
            CbState::Minimal => 0.25,
            CbState::Halted | CbState::CoolingOff | CbState::Emergency => 0.00,
        }
    }

    pub fn allows_new_buy(self) -> bool {
        matches!(
            self,
            CbState::Normal | CbState::Warning | CbState::Reduced | CbState::Restricted | CbState::Minimal
        )
    }

    pub fn allows_reduce(self) -> bool {
        !matches!(self, CbState::Emergency)
    }

    /// Severity ladder used to pick the drawdown-driven target state;
    /// `Emergency`/`CoolingOff` are not reached by drawdown alone. Also
    /// used by the decision engine's composite risk score (spec.md §4.6).
    pub fn severity_rank(self) -> u8 {
        match self {
            CbState::Normal => 0,
            CbState::Warning => 1,
            CbState::Reduced => 2,
            CbState::Restricted => 3,
            CbState::Minimal => 4,
            CbState::Halted => 5,
            CbState::CoolingOff => 5,
            CbState::Emergency => 6,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ThresholdPair {
    pub daily: f64,
    pub weekly: f64,
}

#[derive(Debug, Clone)]
pub struct ThresholdTable {
    pub warning: ThresholdPair,
    pub reduced: ThresholdPair,
    pub restricted: ThresholdPair,
    pub minimal: ThresholdPair,
    pub halted: ThresholdPair,
}

impl Default for ThresholdTable {
    fn default() -> Self {
        Self {
            warning: ThresholdPair { daily: 2.0, weekly: 5.0 },
            reduced: ThresholdPair { daily: 2.5, weekly: 6.0 },
            restricted: ThresholdPair { daily: 3.0, weekly: 7.0 },
            minimal: ThresholdPair { daily: 3.5, weekly: 8.0 },
            halted: ThresholdPair { daily: 4.0, weekly: 10.0 },
        }
    }
}

impl ThresholdTable {
    /// Ordered ladder used to find the highest tier a drawdown crosses.
    fn ladder(&self) -> [(CbState, ThresholdPair); 5] {
        [
            (CbState::Warning, self.warning),
            (CbState::Reduced, self.reduced),
            (CbState::Restricted, self.restricted),
            (CbState::Minimal, self.minimal),
            (CbState::Halted, self.halted),
        ]
    }
}

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub thresholds: ThresholdTable,
    pub max_volatility_factor: f64,
    pub cooldown_period: chrono::Duration,
    pub max_daily_halts: u32,
    pub required_approvals: Vec<String>,
    pub event_log_path: PathBuf,
    pub keep_days: i64,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            thresholds: ThresholdTable::default(),
            max_volatility_factor: 2.0,
            cooldown_period: chrono::Duration::minutes(30),
            max_daily_halts: 3,
            required_approvals: Vec::new(),
            event_log_path: PathBuf::from("data/circuit_breaker_events.jsonl"),
            keep_days: 30,
        }
    }
}

struct Inner {
    state: CbState,
    entered_at: DateTime<Utc>,
    cooling_off_until: Option<DateTime<Utc>>,
    manual_halt: bool,
    daily_halt_count: u32,
    halt_count_date: chrono::NaiveDate,
    trigger_counts: FxHashMap<String, u32>,
}

impl Inner {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            state: CbState::Normal,
            entered_at: now,
            cooling_off_until: None,
            manual_halt: false,
            daily_halt_count: 0,
            halt_count_date: now.date_naive(),
            trigger_counts: FxHashMap::default(),
        }
    }

    fn snapshot(&self) -> (CbState, f64, Option<DateTime<Utc>>, bool) {
        (self.state, self.state.size_multiplier(), self.cooling_off_until, self.manual_halt)
    }
}

pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    inner: RwLock<Inner>,
    seq: AtomicU64,
    write_failures: AtomicU64,
}

impl CircuitBreaker {
    /// Creates a fresh breaker and replays any events already on disk so a
    /// restart recovers exact state (spec.md §4.2, invariant §8.4).
    pub fn new(config: CircuitBreakerConfig) -> Self {
        let now = Utc::now();
        let cb = Self {
            config,
            inner: RwLock::new(Inner::fresh(now)),
            seq: AtomicU64::new(0),
            write_failures: AtomicU64::new(0),
        };
        cb.replay();
        cb
    }

    fn replay(&self) {
        let (events, skipped) = match read_jsonl::<CbEvent>(&self.config.event_log_path) {
            Ok(v) => v,
            Err(e) => {
                error!("circuit_breaker: failed to read event log: {e}");
                return;
            }
        };
        if skipped > 0 {
            warn!("circuit_breaker: skipped {skipped} malformed log lines on load");
        }

        if let Err(e) = check_monotonic(&events) {
            warn!("circuit_breaker: integrity check found non-monotonic log: {e}");
        }

        let mut inner = self.inner.write();
        let mut max_seq = 0u64;
        for ev in &events {
            max_seq = max_seq.max(ev.seq + 1);
            if !ev.event_type.is_mutating() {
                continue;
            }
            apply_event(&mut inner, ev);
        }
        drop(inner);
        self.seq.store(max_seq, Ordering::SeqCst);
    }

    fn next_seq(&self) -> u64 {
        self.seq.fetch_add(1, Ordering::SeqCst)
    }

    fn emit(&self, event_type: CbEventType, payload: serde_json::Value, reason: Option<String>, user: Option<String>) {
        let seq = self.next_seq();
        let mut ev = CbEvent::new(seq, event_type, payload);
        if let Some(r) = reason {
            ev = ev.with_reason(r);
        }
        if let Some(u) = user {
            ev = ev.with_user(u);
        }
        if let Err(e) = append_jsonl(&self.config.event_log_path, &ev) {
            self.write_failures.fetch_add(1, Ordering::Relaxed);
            error!("circuit_breaker: event log write failed: {e}");
        }
    }

    /// Drawdown-to-state severity target, with the threshold table
    /// optionally widened by a volatility factor (spec.md §4.2).
    fn target_state(&self, daily_dd: f64, weekly_dd: f64, volatility_factor: f64) -> (CbState, bool) {
        let factor = clamp(volatility_factor, 1.0, self.config.max_volatility_factor);
        let mut target = CbState::Normal;
        let mut daily_rank = 0u8;
        let mut weekly_rank = 0u8;

        for (state, pair) in self.config.thresholds.ladder() {
            if daily_dd >= pair.daily * factor {
                daily_rank = state.severity_rank();
            }
            if weekly_dd >= pair.weekly * factor {
                weekly_rank = state.severity_rank();
            }
        }

        let target_rank = daily_rank.max(weekly_rank);
        let daily_drives = daily_rank >= weekly_rank; // daily takes precedence on ties
        for (state, _) in self.config.thresholds.ladder() {
            if state.severity_rank() == target_rank {
                target = state;
            }
        }
        if target_rank == 0 {
            target = CbState::Normal;
        }
        (target, daily_drives)
    }

    fn trigger_reason(&self, target: CbState, daily_drives: bool) -> String {
        let dimension = if daily_drives { "daily" } else { "weekly" };
        let label = match target {
            CbState::Warning => "warning",
            CbState::Reduced => "reduced",
            CbState::Restricted => "restricted",
            CbState::Minimal => "minimal",
            CbState::Halted => "halt",
            _ => "normal",
        };
        format!("{dimension}_{label}_threshold")
    }

    /// Applies one drawdown observation (spec.md §4.2 "State determination").
    pub fn update(&self, daily_dd: f64, weekly_dd: f64, volatility_factor: f64) -> CbState {
        let now = Utc::now();
        self.emit(
            CbEventType::NavUpdated,
            json!({ "daily_dd": daily_dd, "weekly_dd": weekly_dd }),
            None,
            None,
        );

        if self.inner.read().manual_halt {
            let mut inner = self.inner.write();
            if inner.state != CbState::Emergency {
                inner.state = CbState::Emergency;
                inner.entered_at = now;
            }
            return inner.state;
        }

        let cooling_off_due = {
            let inner = self.inner.read();
            inner.state == CbState::CoolingOff
                && inner.cooling_off_until.is_some_and(|until| now >= until)
        };
        if cooling_off_due {
            self.emit(CbEventType::CoolingOffExpired, json!({}), None, None);
            self.apply_transition(CbState::Normal, "cooling_off_expired".to_string(), now);
            return self.inner.read().state;
        }

        let (mut target, daily_drives) = self.target_state(daily_dd, weekly_dd, volatility_factor);

        if matches!(target, CbState::Halted) {
            let mut inner = self.inner.write();
            if inner.halt_count_date != now.date_naive() {
                inner.halt_count_date = now.date_naive();
                inner.daily_halt_count = 0;
            }
            if inner.daily_halt_count >= self.config.max_daily_halts {
                target = CbState::Emergency;
            }
        }

        let current = self.inner.read().state;
        if target != current {
            let reason = if target == CbState::Emergency {
                "max_daily_halts_exceeded".to_string()
            } else {
                self.trigger_reason(target, daily_drives)
            };
            self.emit(
                CbEventType::ThresholdBreached,
                json!({ "daily_dd": daily_dd, "weekly_dd": weekly_dd, "target": format!("{target:?}") }),
                Some(reason.clone()),
                None,
            );
            self.apply_transition(target, reason, now);
        }

        self.inner.read().state
    }

    /// Mutates state under the write lock, then emits the corresponding
    /// `state_changed` event with the lock released (spec.md §5: "Locks are
    /// never held across I/O").
    fn apply_transition(&self, target: CbState, reason: String, now: DateTime<Utc>) {
        let cooling_off_until = {
            let mut inner = self.inner.write();
            if target == inner.state {
                return;
            }
            inner.state = target;
            inner.entered_at = now;
            *inner.trigger_counts.entry(reason.clone()).or_insert(0) += 1;

            if matches!(target, CbState::Halted | CbState::Emergency) {
                inner.daily_halt_count += 1;
            }
            if target == CbState::Halted {
                inner.cooling_off_until = Some(now + self.config.cooldown_period);
            }
            inner.cooling_off_until
        };

        self.emit(
            CbEventType::StateChanged,
            json!({
                "target": format!("{target:?}"),
                "cooling_off_until": cooling_off_until.map(|t| t.to_rfc3339()),
            }),
            Some(reason),
            None,
        );
    }

    pub fn can_trade(&self, intent: &TradingIntent) -> (bool, Option<String>) {
        let state = self.inner.read().state;
        if intent.kind.is_risk_reducing() {
            if state.allows_reduce() {
                return (true, None);
            }
            return (false, Some("circuit_breaker_emergency".into()));
        }
        if state.allows_new_buy() {
            (true, None)
        } else {
            (false, Some(format!("circuit_breaker_{}", state_tag(state))))
        }
    }

    pub fn manual_halt(&self, user: &str, reason: &str) {
        let now = Utc::now();
        {
            let mut inner = self.inner.write();
            inner.manual_halt = true;
            inner.state = CbState::Emergency;
            inner.entered_at = now;
        }
        self.emit(
            CbEventType::ManualOverride,
            json!({ "action": "halt" }),
            Some(reason.to_string()),
            Some(user.to_string()),
        );
    }

    pub fn initiate_recovery(
        &self,
        user: &str,
        reason: &str,
        approvals: &[String],
    ) -> Result<(), CircuitBreakerError> {
        let now = Utc::now();
        let state = self.inner.read().state;
        if !matches!(state, CbState::Halted | CbState::CoolingOff | CbState::Emergency) {
            return Err(CircuitBreakerError::RecoveryNotAllowed(format!("{state:?}")));
        }

        let approval_set: std::collections::HashSet<&String> = approvals.iter().collect();
        let missing: Vec<String> = self
            .config
            .required_approvals
            .iter()
            .filter(|u| !approval_set.contains(u))
            .cloned()
            .collect();
        if !missing.is_empty() {
            return Err(CircuitBreakerError::InsufficientApprovals {
                required: self.config.required_approvals.clone(),
                got: approvals.to_vec(),
            });
        }

        let cooling_off_until = now + self.config.cooldown_period;
        {
            let mut inner = self.inner.write();
            inner.manual_halt = false;
            inner.state = CbState::CoolingOff;
            inner.entered_at = now;
            inner.cooling_off_until = Some(cooling_off_until);
        }
        self.emit(
            CbEventType::RecoveryInitiated,
            json!({ "approvals": approvals, "cooling_off_until": cooling_off_until.to_rfc3339() }),
            Some(reason.to_string()),
            Some(user.to_string()),
        );
        info!("circuit_breaker: recovery initiated by {user}: {reason}");
        Ok(())
    }

    pub fn state(&self) -> CbState {
        self.inner.read().state
    }

    pub fn size_multiplier(&self) -> f64 {
        self.inner.read().state.size_multiplier()
    }

    pub fn cooling_off_until(&self) -> Option<DateTime<Utc>> {
        self.inner.read().cooling_off_until
    }

    pub fn trigger_counts(&self) -> FxHashMap<String, u32> {
        self.inner.read().trigger_counts.clone()
    }

    pub fn write_failure_count(&self) -> u64 {
        self.write_failures.load(Ordering::Relaxed)
    }

    /// Replays the full log onto a fresh instance and checks it converges to
    /// the live state (spec.md §4.2 "integrity check").
    pub fn integrity_check(&self) -> Result<(), String> {
        let (events, _) = read_jsonl::<CbEvent>(&self.config.event_log_path).map_err(|e| e.to_string())?;
        check_monotonic(&events)?;

        let mut shadow = Inner::fresh(Utc::now());
        for ev in &events {
            if ev.event_type.is_mutating() {
                apply_event(&mut shadow, ev);
            }
        }

        let live = self.inner.read().snapshot();
        let replayed = shadow.snapshot();
        if live != replayed {
            return Err(format!(
                "replay diverged: live={live:?} replayed={replayed:?}"
            ));
        }
        Ok(())
    }

    /// Drops events older than `keep_days`, backing up the original file
    /// first (spec.md §4.2 "Log compaction").
    pub fn compact(&self, now: DateTime<Utc>) -> Result<(), String> {
        let (events, _) = read_jsonl::<CbEvent>(&self.config.event_log_path).map_err(|e| e.to_string())?;
        let cutoff = now - chrono::Duration::days(self.config.keep_days);
        let keep: Vec<CbEvent> = events.into_iter().filter(|e| e.ts >= cutoff).collect();
        let suffix = now.format("%Y%m%d").to_string();
        compact_jsonl(&self.config.event_log_path, &keep, &suffix).map_err(|e| e.to_string())
    }
}

fn state_tag(state: CbState) -> &'static str {
    match state {
        CbState::Normal => "normal",
        CbState::Warning => "warning",
        CbState::Reduced => "reduced",
        CbState::Restricted => "restricted",
        CbState::Minimal => "minimal",
        CbState::Halted => "halted",
        CbState::CoolingOff => "cooling_off",
        CbState::Emergency => "emergency",
    }
}

fn apply_event(inner: &mut Inner, ev: &CbEvent) {
    match ev.event_type {
        CbEventType::StateChanged => {
            if let Some(target) = ev
                .payload
                .get("target")
                .and_then(|v| v.as_str())
                .and_then(parse_state)
            {
                inner.state = target;
                inner.entered_at = ev.ts;
                if let Some(reason) = &ev.reason {
                    *inner.trigger_counts.entry(reason.clone()).or_insert(0) += 1;
                }
                if matches!(target, CbState::Halted | CbState::Emergency) {
                    inner.daily_halt_count += 1;
                }
                if target == CbState::Halted {
                    if let Some(cooldown) = ev.payload.get("cooling_off_until").and_then(|v| v.as_str()) {
                        inner.cooling_off_until = DateTime::parse_from_rfc3339(cooldown)
                            .ok()
                            .map(|d| d.with_timezone(&Utc));
                    }
                }
            }
        }
        CbEventType::ManualOverride => {
            inner.manual_halt = true;
            inner.state = CbState::Emergency;
            inner.entered_at = ev.ts;
        }
        CbEventType::RecoveryInitiated => {
            inner.manual_halt = false;
            inner.state = CbState::CoolingOff;
            inner.entered_at = ev.ts;
            if let Some(cooldown) = ev.payload.get("cooling_off_until").and_then(|v| v.as_str()) {
                inner.cooling_off_until = DateTime::parse_from_rfc3339(cooldown).ok().map(|d| d.with_timezone(&Utc));
            }
        }
        CbEventType::ConfigChanged => {}
        CbEventType::NavUpdated | CbEventType::ThresholdBreached | CbEventType::CoolingOffExpired => {}
    }
}

fn parse_state(s: &str) -> Option<CbState> {
    match s {
        "Normal" => Some(CbState::Normal),
        "Warning" => Some(CbState::Warning),
        "Reduced" => Some(CbState::Reduced),
        "Restricted" => Some(CbState::Restricted),
        "Minimal" => Some(CbState::Minimal),
        "Halted" => Some(CbState::Halted),
        "CoolingOff" => Some(CbState::CoolingOff),
        "Emergency" => Some(CbState::Emergency),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> CircuitBreakerConfig {
        let mut c = CircuitBreakerConfig::default();
        c.event_log_path = std::env::temp_dir().join(format!("cb_test_{}.jsonl", uuid::Uuid::new_v4()));
        c
    }

    #[test]
    fn scenario_a_halt_escalation() {
        // spec.md §8 Scenario A.
        let c = config();
        let event_log_path = c.event_log_path.clone();
        let cb = CircuitBreaker::new(c);

        assert_eq!(cb.update(0.5, 0.0, 1.0), CbState::Normal);

        assert_eq!(cb.update(2.1, 0.0, 1.0), CbState::Warning);
        assert!(cb.trigger_counts().contains_key("daily_warning_threshold"));

        assert_eq!(cb.update(2.6, 0.0, 1.0), CbState::Reduced);
        assert!((cb.size_multiplier() - 0.70).abs() < 1e-9);
        assert!(cb.trigger_counts().contains_key("daily_reduced_threshold"));

        assert_eq!(cb.update(4.1, 0.0, 1.0), CbState::Halted);
        assert_eq!(cb.size_multiplier(), 0.0);
        assert!(cb.trigger_counts().contains_key("daily_halt_threshold"));

        let (events, skipped) = read_jsonl::<CbEvent>(&event_log_path).unwrap();
        assert_eq!(skipped, 0);
        let state_changes = events
            .iter()
            .filter(|e| e.event_type == CbEventType::StateChanged)
            .count();
        assert_eq!(state_changes, 4);
    }

    #[test]
    fn boundary_daily_drawdown_exactly_at_threshold_transitions() {
        let cb = CircuitBreaker::new(config());
        assert_eq!(cb.update(2.0, 0.0, 1.0), CbState::Warning);
    }

    #[test]
    fn scenario_b_recovery_gate() {
        // spec.md §8 Scenario B.
        let mut c = config();
        c.required_approvals = vec!["u1".to_string(), "u2".to_string()];
        let cb = CircuitBreaker::new(c);
        cb.update(4.1, 0.0, 1.0);
        assert_eq!(cb.state(), CbState::Halted);

        let err = cb.initiate_recovery("ops", "manual review", &["u1".to_string()]);
        assert!(matches!(err, Err(CircuitBreakerError::InsufficientApprovals { .. })));
        assert_eq!(cb.state(), CbState::Halted);

        cb.initiate_recovery("ops", "manual review", &["u1".to_string(), "u2".to_string()])
            .unwrap();
        assert_eq!(cb.state(), CbState::CoolingOff);
        assert!(cb.cooling_off_until().is_some());
    }

    #[test]
    fn manual_halt_reaches_emergency_and_blocks_reduce() {
        let cb = CircuitBreaker::new(config());
        cb.manual_halt("ops", "kill switch");
        assert_eq!(cb.state(), CbState::Emergency);

        let reduce = TradingIntent {
            symbol: crate::types::Symbol::from("AAPL"),
            side: crate::types::Side::Sell,
            kind: crate::types::IntentKind::Reduce,
            quantity: 10,
            price: 100.0,
            correlation_id: "c".into(),
        };
        let (allow, _) = cb.can_trade(&reduce);
        assert!(!allow);
    }

    #[test]
    fn replay_converges_to_live_state() {
        let c = config();
        let cb = CircuitBreaker::new(c.clone());
        cb.update(2.1, 0.0, 1.0);
        cb.update(2.6, 0.0, 1.0);
        cb.update(4.1, 0.0, 1.0);
        assert_eq!(cb.state(), CbState::Halted);
        cb.integrity_check().unwrap();

        let reloaded = CircuitBreaker::new(c);
        assert_eq!(reloaded.state(), CbState::Halted);
        assert_eq!(reloaded.trigger_counts(), cb.trigger_counts());
    }

    #[test]
    fn max_daily_halts_exceeded_escalates_to_emergency() {
        let mut c = config();
        c.max_daily_halts = 1;
        c.cooldown_period = chrono::Duration::milliseconds(1);
        let cb = CircuitBreaker::new(c);
        cb.update(4.1, 0.0, 1.0);
        assert_eq!(cb.state(), CbState::Halted);

        std::thread::sleep(std::time::Duration::from_millis(5));
        assert_eq!(cb.update(0.0, 0.0, 1.0), CbState::Normal);

        assert_eq!(cb.update(4.1, 0.0, 1.0), CbState::Emergency);
        assert!(cb.trigger_counts().contains_key("max_daily_halts_exceeded"));
    }
}
