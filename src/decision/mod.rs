//! Risk Decision Engine (spec.md §4.6).
//!
//! Gathers a consistent snapshot of risk data from its sub-components,
//! evaluates gates in ascending priority order, and returns a single
//! `DecisionResult`. Stateless between calls: all mutable state is owned by
//! the sub-components it borrows. Generalizes the sequential `check_order`
//! chain in `services/risk-manager/src/lib.rs` into the closed `GateKind`
//! set in `gates.rs`.

pub mod gates;

use crate::caps::PositionCaps;
use crate::circuit_breaker::{CbState, CircuitBreaker};
use crate::cooldown::Cooldown;
use crate::nav::snapshot::NavDataQuality;
use crate::nav::NavTracker;
use crate::types::{clamp, TradingIntent};
use crate::volatility::{VolRegime, VolatilityCalculator};
use gates::{GateKind, GateOutcome};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, warn};

#[derive(Debug, Clone)]
pub struct DecisionEngineConfig {
    pub min_quality_score: f64,
    pub max_staleness_ms: i64,
    pub decision_timeout: Duration,
}

impl Default for DecisionEngineConfig {
    fn default() -> Self {
        Self {
            min_quality_score: 0.8,
            max_staleness_ms: 2000,
            decision_timeout: Duration::from_millis(500),
        }
    }
}

/// The risk-data snapshot a decision was made against (spec.md §4.6 Result
/// field `context`).
#[derive(Debug, Clone)]
pub struct DecisionContext {
    pub nav: f64,
    pub cb_state: CbState,
    pub daily_dd: f64,
    pub weekly_dd: f64,
    pub quality_score: f64,
    pub vol_regime: VolRegime,
    pub vol_multiplier: f64,
}

#[derive(Debug, Clone)]
pub struct DecisionResult {
    pub approved: bool,
    pub intent: TradingIntent,
    pub size_multiplier: f64,
    pub blocked_by: Vec<String>,
    pub warnings: Vec<String>,
    pub context: DecisionContext,
    pub processing_time: Duration,
    pub decision_id: String,
    pub risk_score: f64,
}

/// `1 − (0.8·|missing| + 0.3·|stale|) / |total_symbols|`, clamped to
/// `[0, 1]`; `1.0` if no positions (spec.md §4.6 "Quality score").
fn quality_score(quality: &NavDataQuality) -> f64 {
    let total = quality.used_mid.len() + quality.used_last.len() + quality.missing_quotes.len();
    if total == 0 {
        return 1.0;
    }
    let raw = 1.0
        - (0.8 * quality.missing_quotes.len() as f64 + 0.3 * quality.stale_quotes.len() as f64)
            / total as f64;
    clamp(raw, 0.0, 1.0)
}

/// Informational 0..1 score combining state severity, drawdown pressure,
/// data-quality deficit, volatility regime, and staleness (spec.md §4.6
/// "Composite risk score").
fn composite_risk_score(
    cb_state: CbState,
    daily_dd: f64,
    weekly_dd: f64,
    quality_score: f64,
    vol_regime: VolRegime,
    max_staleness_ms: i64,
) -> f64 {
    let severity = cb_state.severity_rank() as f64 / 6.0;
    let drawdown_pressure = (daily_dd + 0.5 * weekly_dd) / 10.0;
    let quality_deficit = 1.0 - quality_score;
    let regime_contribution = match vol_regime {
        VolRegime::Quiet => 0.1,
        VolRegime::Normal | VolRegime::Unknown => 0.3,
        VolRegime::Volatile => 0.7,
    };
    let staleness_penalty = if max_staleness_ms > 5_000 {
        0.5
    } else if max_staleness_ms > 2_000 {
        0.2
    } else {
        0.0
    };
    clamp(
        severity + drawdown_pressure + quality_deficit + regime_contribution + staleness_penalty,
        0.0,
        1.0,
    )
}

pub struct RiskDecisionEngine {
    config: DecisionEngineConfig,
    nav: Arc<NavTracker>,
    circuit_breaker: Arc<CircuitBreaker>,
    caps: Arc<PositionCaps>,
    cooldown: Arc<Cooldown>,
    volatility: Arc<VolatilityCalculator>,
    decision_seq: AtomicU64,
}

impl RiskDecisionEngine {
    pub fn new(
        config: DecisionEngineConfig,
        nav: Arc<NavTracker>,
        circuit_breaker: Arc<CircuitBreaker>,
        caps: Arc<PositionCaps>,
        cooldown: Arc<Cooldown>,
        volatility: Arc<VolatilityCalculator>,
    ) -> Self {
        Self {
            config,
            nav,
            circuit_breaker,
            caps,
            cooldown,
            volatility,
            decision_seq: AtomicU64::new(0),
        }
    }

    fn evaluate_circuit_breaker(&self, intent: &TradingIntent) -> GateOutcome {
        let (allow, reason) = self.circuit_breaker.can_trade(intent);
        if allow {
            GateOutcome::Allow
        } else {
            GateOutcome::Deny(reason.unwrap_or_else(|| "circuit_breaker_blocked".to_string()))
        }
    }

    fn evaluate_data_quality(&self, quality_score: f64, max_staleness_ms: i64) -> GateOutcome {
        if quality_score < self.config.min_quality_score {
            GateOutcome::Deny(format!(
                "data_quality_score_{quality_score:.2}_below_{:.2}",
                self.config.min_quality_score
            ))
        } else if max_staleness_ms > self.config.max_staleness_ms {
            GateOutcome::Deny(format!(
                "data_quality_staleness_{max_staleness_ms}ms_exceeds_{}ms",
                self.config.max_staleness_ms
            ))
        } else {
            GateOutcome::Allow
        }
    }

    async fn evaluate_caps(&self, intent: &TradingIntent, nav: f64) -> GateOutcome {
        match self.caps.can_increase(intent, intent.quantity, intent.price, nav).await {
            Ok((true, None)) => GateOutcome::Allow,
            Ok((true, Some(warning))) => GateOutcome::AllowWithWarning(warning),
            Ok((false, reason)) => GateOutcome::Deny(reason.unwrap_or_else(|| "caps_blocked".to_string())),
            Err(e) => GateOutcome::Error(e.to_string()),
        }
    }

    fn evaluate_cooldown(&self, intent: &TradingIntent) -> GateOutcome {
        match self.cooldown.can_trade(intent) {
            Ok((true, None)) => GateOutcome::Allow,
            Ok((true, Some(warning))) => GateOutcome::AllowWithWarning(warning),
            Ok((false, reason)) => GateOutcome::Deny(reason.unwrap_or_else(|| "cooldown_blocked".to_string())),
            Err(e) => GateOutcome::Error(e.to_string()),
        }
    }

    /// Evaluates all gates in priority order and returns a `DecisionResult`;
    /// the caller always gets a result, never an error (spec.md §7
    /// "the caller always receives a DecisionResult").
    pub async fn decide(&self, intent: TradingIntent) -> DecisionResult {
        let start = std::time::Instant::now();
        let decision_id = format!("dec_{}", self.decision_seq.fetch_add(1, Ordering::Relaxed));

        let (nav_value, quality, _) = self.nav.current_nav();
        let (daily_dd, weekly_dd) = self.nav.drawdowns();
        let (vol_regime, vol_multiplier) = self.volatility.regime();
        let cb_state = self.circuit_breaker.state();
        let score = quality_score(&quality);

        let mut blocked_by = Vec::new();
        let mut warnings = Vec::new();

        for kind in GateKind::ORDER {
            if !blocked_by.is_empty() {
                break;
            }
            let outcome = match kind {
                GateKind::CircuitBreaker => self.evaluate_circuit_breaker(&intent),
                GateKind::DataQuality => self.evaluate_data_quality(score, quality.max_staleness_ms),
                GateKind::Caps => self.evaluate_caps(&intent, nav_value).await,
                GateKind::Cooldown => self.evaluate_cooldown(&intent),
                GateKind::Volatility => GateOutcome::Allow,
            };
            match outcome {
                GateOutcome::Allow => {}
                GateOutcome::AllowWithWarning(w) => warnings.push(format!("{}_{w}", kind.name())),
                GateOutcome::Deny(reason) => blocked_by.push(reason),
                GateOutcome::Error(e) => {
                    error!("decision: {} gate error: {e}", kind.name());
                    blocked_by.push(format!("{}_error", kind.name()));
                }
            }
        }

        let size_multiplier = clamp(cb_state.size_multiplier() * vol_multiplier, 0.0, 2.0);
        let risk_score = composite_risk_score(
            cb_state,
            daily_dd,
            weekly_dd,
            score,
            vol_regime,
            quality.max_staleness_ms,
        );

        let processing_time = start.elapsed();
        if processing_time > self.config.decision_timeout {
            warn!("decision {decision_id}: exceeded soft timeout ({processing_time:?})");
        }

        let approved = blocked_by.is_empty();
        crate::metrics::record_decision(approved);

        DecisionResult {
            approved,
            intent,
            size_multiplier,
            blocked_by,
            warnings,
            context: DecisionContext {
                nav: nav_value,
                cb_state,
                daily_dd,
                weekly_dd,
                quality_score: score,
                vol_regime,
                vol_multiplier,
            },
            processing_time,
            decision_id,
            risk_score,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::caps::CapsConfig;
    use crate::circuit_breaker::CircuitBreakerConfig;
    use crate::cooldown::CooldownConfig;
    use crate::interfaces::test_support::{FakePortfolioStore, FakeQuoteAdapter};
    use crate::nav::NavTrackerConfig;
    use crate::types::{IntentKind, Side, Symbol};
    use crate::volatility::VolatilityConfig;

    fn tmp_path(name: &str) -> std::path::PathBuf {
        std::env::temp_dir().join(format!("{name}_{}", uuid::Uuid::new_v4()))
    }

    fn engine() -> RiskDecisionEngine {
        let quotes = Arc::new(FakeQuoteAdapter::default());
        let portfolio = Arc::new(FakePortfolioStore::new(100_000.0));
        let mut nav_config = NavTrackerConfig::default();
        nav_config.state_path = tmp_path("nav");
        let nav = Arc::new(NavTracker::new(nav_config, quotes.clone(), portfolio.clone()));

        let mut cb_config = CircuitBreakerConfig::default();
        cb_config.event_log_path = tmp_path("cb_events.jsonl");
        let cb = Arc::new(CircuitBreaker::new(cb_config));

        let mut caps_config = CapsConfig::default();
        caps_config.state_path = tmp_path("caps");
        let audit = Arc::new(crate::audit::AuditLog::new(tmp_path("audit.jsonl")));
        let caps = Arc::new(PositionCaps::new(caps_config, quotes.clone(), portfolio.clone(), audit));

        let mut cooldown_config = CooldownConfig::default();
        cooldown_config.state_path = tmp_path("cooldown");
        let cooldown_audit = Arc::new(crate::audit::AuditLog::new(tmp_path("cooldown_audit.jsonl")));
        let cooldown = Arc::new(Cooldown::new(cooldown_config, cooldown_audit));

        let volatility = Arc::new(VolatilityCalculator::new(VolatilityConfig::default()));

        RiskDecisionEngine::new(
            DecisionEngineConfig::default(),
            nav,
            cb,
            caps,
            cooldown,
            volatility,
        )
    }

    fn intent(kind: IntentKind) -> TradingIntent {
        TradingIntent {
            symbol: Symbol::from("AAPL"),
            side: Side::Buy,
            kind,
            quantity: 10,
            price: 100.0,
            correlation_id: "corr-1".into(),
        }
    }

    #[tokio::test]
    async fn approved_decision_has_no_blocked_reasons() {
        let engine = engine();
        let result = engine.decide(intent(IntentKind::Buy)).await;
        assert!(result.approved);
        assert!(result.blocked_by.is_empty());
    }

    #[tokio::test]
    async fn denied_decision_always_has_a_reason() {
        let engine = engine();
        engine.circuit_breaker.manual_halt("ops", "test");
        let result = engine.decide(intent(IntentKind::Buy)).await;
        assert!(!result.approved);
        assert!(!result.blocked_by.is_empty());
    }

    #[tokio::test]
    async fn size_multiplier_and_risk_score_stay_in_bounds() {
        let engine = engine();
        let result = engine.decide(intent(IntentKind::Buy)).await;
        assert!(result.size_multiplier >= 0.0 && result.size_multiplier <= 2.0);
        assert!(result.risk_score >= 0.0 && result.risk_score <= 1.0);
    }

    #[tokio::test]
    async fn decision_ids_are_unique() {
        let engine = engine();
        let a = engine.decide(intent(IntentKind::Buy)).await;
        let b = engine.decide(intent(IntentKind::Buy)).await;
        assert_ne!(a.decision_id, b.decision_id);
    }

    #[tokio::test]
    async fn emergency_state_blocks_even_reduce_intents() {
        let engine = engine();
        engine.circuit_breaker.manual_halt("ops", "test");
        let result = engine.decide(intent(IntentKind::Reduce)).await;
        assert!(!result.approved);
    }

    #[tokio::test]
    async fn halted_state_allows_reduce_but_not_buy() {
        let engine = engine();
        for _ in 0..4 {
            engine.circuit_breaker.update(4.5, 0.0, 1.0);
        }
        let buy = engine.decide(intent(IntentKind::Buy)).await;
        assert!(!buy.approved);
        let reduce = engine.decide(intent(IntentKind::Reduce)).await;
        assert!(reduce.approved);
    }
}
