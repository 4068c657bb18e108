//! Cooldown (spec.md §4.4).
//!
//! Enforces a minimum interval between trades on a symbol to prevent
//! overtrading. Generalizes the per-symbol timestamp tracking in
//! `services/risk-manager/src/lib.rs` (`SymbolRisk`, order-timestamp rate
//! limiting) from a global rate limit into a per-symbol, per-side cooldown.

use crate::audit::AuditLog;
use crate::errors::CooldownError;
use crate::persistence::{atomic_write_json, read_json};
use crate::types::{IntentKind, Side, Symbol, TradingIntent};
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradeInfo {
    pub ts: DateTime<Utc>,
    pub side: Side,
    pub intent: IntentKind,
}

#[derive(Debug, Clone)]
pub struct CooldownConfig {
    pub default_period: chrono::Duration,
    pub same_side_period: Option<chrono::Duration>,
    pub symbol_periods: std::collections::HashMap<Symbol, chrono::Duration>,
    pub intent_periods: std::collections::HashMap<IntentKind, chrono::Duration>,
    pub global_minimum: chrono::Duration,
    pub opposite_trades_allowed: bool,
    pub enforce: bool,
    pub state_path: PathBuf,
}

impl Default for CooldownConfig {
    fn default() -> Self {
        Self {
            default_period: chrono::Duration::seconds(60),
            same_side_period: None,
            symbol_periods: std::collections::HashMap::new(),
            intent_periods: std::collections::HashMap::new(),
            global_minimum: chrono::Duration::seconds(5),
            opposite_trades_allowed: true,
            enforce: true,
            state_path: PathBuf::from("data/cooldown_state.json"),
        }
    }
}

/// A Slack-set per-symbol override, carrying provenance and an expiry
/// (spec.md §6 `/set-cooldown SYM SEC [ttl=...] [reason="..."]`), the same
/// shape as `caps::CapOverride`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CooldownOverride {
    pub period_secs: i64,
    pub effective_until: Option<DateTime<Utc>>,
    pub updated_by: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedCooldownState {
    version: u32,
    updated_at: Option<DateTime<Utc>>,
    last_trade_times: std::collections::BTreeMap<String, TradeInfo>,
    global_last_trade: Option<DateTime<Utc>>,
    #[serde(default)]
    overrides: std::collections::BTreeMap<String, CooldownOverride>,
}

pub struct Cooldown {
    config: CooldownConfig,
    last_trade: DashMap<Symbol, TradeInfo>,
    overrides: DashMap<Symbol, CooldownOverride>,
    global_last_trade: parking_lot::RwLock<Option<DateTime<Utc>>>,
    warn_count: std::sync::atomic::AtomicU64,
    audit: Arc<AuditLog>,
}

impl Cooldown {
    pub fn new(config: CooldownConfig, audit: Arc<AuditLog>) -> Self {
        let last_trade = DashMap::new();
        let overrides = DashMap::new();
        let mut global_last_trade = None;

        if let Ok(Some(persisted)) = read_json::<PersistedCooldownState>(&config.state_path) {
            for (sym, info) in persisted.last_trade_times {
                last_trade.insert(Symbol::from(sym), info);
            }
            for (sym, over) in persisted.overrides {
                overrides.insert(Symbol::from(sym), over);
            }
            global_last_trade = persisted.global_last_trade;
        }

        Self {
            config,
            last_trade,
            overrides,
            global_last_trade: parking_lot::RwLock::new(global_last_trade),
            warn_count: std::sync::atomic::AtomicU64::new(0),
            audit,
        }
    }

    /// `/set-cooldown SYM SEC [ttl=...] [reason="..."]` (spec.md §6). Records
    /// the change to the audit log with the previously-effective override, if
    /// any, so a later reviewer can see what changed and why.
    pub fn set_override(
        &self,
        symbol: &Symbol,
        period: chrono::Duration,
        ttl: Option<chrono::Duration>,
        updated_by: &str,
        reason: &str,
    ) {
        let old = self.overrides.get(symbol).map(|o| o.clone());
        let effective_until = ttl.map(|d| Utc::now() + d);
        let new_override = CooldownOverride {
            period_secs: period.num_seconds(),
            effective_until,
            updated_by: updated_by.to_string(),
            reason: reason.to_string(),
        };
        self.overrides.insert(symbol.clone(), new_override.clone());
        self.audit.record(
            "set_cooldown_override",
            updated_by,
            Some(symbol.as_str()),
            serde_json::json!(old),
            serde_json::json!(new_override),
            ttl,
            reason,
        );
        self.persist();
    }

    /// The override in force for `symbol`, if one exists and hasn't expired.
    fn active_override(&self, symbol: &Symbol) -> Option<chrono::Duration> {
        let over = self.overrides.get(symbol)?;
        if let Some(until) = over.effective_until {
            if Utc::now() >= until {
                return None;
            }
        }
        Some(chrono::Duration::seconds(over.period_secs))
    }

    /// Picks the effective cooldown period for a same-symbol pair (spec.md
    /// §4.4 "Cooldown choice"): operator override > intent-specific >
    /// symbol-specific > same-side > default, then floored by
    /// `global_minimum`.
    fn effective_period(&self, intent: &TradingIntent, last: &TradeInfo) -> chrono::Duration {
        let chosen = self
            .active_override(&intent.symbol)
            .or_else(|| self.config.intent_periods.get(&intent.kind).copied())
            .or_else(|| self.config.symbol_periods.get(&intent.symbol).copied())
            .or_else(|| {
                if last.side == intent.side {
                    self.config.same_side_period
                } else {
                    None
                }
            })
            .unwrap_or(self.config.default_period);
        chosen.max(self.config.global_minimum)
    }

    /// `CanTrade(intent)` (spec.md §4.4).
    pub fn can_trade(&self, intent: &TradingIntent) -> Result<(bool, Option<String>), CooldownError> {
        if intent.kind.is_risk_reducing() {
            return Ok((true, None));
        }

        let Some(last) = self.last_trade.get(&intent.symbol) else {
            return Ok((true, None));
        };

        if intent.side != last.side && self.config.opposite_trades_allowed {
            return Ok((true, None));
        }

        let now = Utc::now();
        let period = self.effective_period(intent, &last);
        let elapsed = now.signed_duration_since(last.ts);
        let remaining = period - elapsed;

        if remaining <= chrono::Duration::zero() {
            return Ok((true, None));
        }

        let kind = if last.side == intent.side {
            "same_side"
        } else {
            "opposite_side"
        };
        let reason = format!("cooldown_{kind}_remaining_{}s", remaining.num_seconds().max(1));

        if !self.config.enforce {
            self.warn_count.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
            return Ok((true, Some(reason)));
        }

        Ok((false, Some(reason)))
    }

    /// `RecordTrade`, set on every successful trade (spec.md §3 `TradeInfo`).
    pub fn record_trade(&self, intent: &TradingIntent) {
        let now = Utc::now();
        self.last_trade.insert(
            intent.symbol.clone(),
            TradeInfo {
                ts: now,
                side: intent.side,
                intent: intent.kind,
            },
        );
        *self.global_last_trade.write() = Some(now);
        self.persist();
    }

    pub fn warn_count(&self) -> u64 {
        self.warn_count.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn persist(&self) {
        let last_trade_times = self
            .last_trade
            .iter()
            .map(|e| (e.key().as_str().to_string(), e.value().clone()))
            .collect();
        let overrides = self
            .overrides
            .iter()
            .map(|e| (e.key().as_str().to_string(), e.value().clone()))
            .collect();
        let persisted = PersistedCooldownState {
            version: 1,
            updated_at: Some(Utc::now()),
            last_trade_times,
            global_last_trade: *self.global_last_trade.read(),
            overrides,
        };
        if let Err(e) = atomic_write_json(&self.config.state_path, &persisted) {
            warn!("cooldown: persistence failed: {e}");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_audit() -> Arc<AuditLog> {
        Arc::new(AuditLog::new(
            std::env::temp_dir().join(format!("cooldown_audit_{}.jsonl", uuid::Uuid::new_v4())),
        ))
    }

    fn cooldown() -> Cooldown {
        let mut config = CooldownConfig::default();
        config.state_path = std::env::temp_dir().join(format!("cooldown_test_{}.json", uuid::Uuid::new_v4()));
        Cooldown::new(config, test_audit())
    }

    fn intent(kind: IntentKind, side: Side) -> TradingIntent {
        TradingIntent {
            symbol: Symbol::from("AAPL"),
            side,
            kind,
            quantity: 10,
            price: 100.0,
            correlation_id: "c".into(),
        }
    }

    #[test]
    fn no_prior_trade_passes() {
        let cd = cooldown();
        let (allow, _) = cd.can_trade(&intent(IntentKind::Buy, Side::Buy)).unwrap();
        assert!(allow);
    }

    #[test]
    fn risk_reducing_never_denied() {
        let cd = cooldown();
        cd.record_trade(&intent(IntentKind::Buy, Side::Buy));
        let (allow, _) = cd.can_trade(&intent(IntentKind::Exit, Side::Sell)).unwrap();
        assert!(allow);
    }

    #[test]
    fn scenario_d_cooldown() {
        // spec.md §8 Scenario D: same-side cooldown = 60s.
        let mut config = CooldownConfig::default();
        config.state_path = std::env::temp_dir().join(format!("cooldown_test_{}.json", uuid::Uuid::new_v4()));
        config.same_side_period = Some(chrono::Duration::seconds(60));
        config.opposite_trades_allowed = true;
        let cd = Cooldown::new(config, test_audit());

        cd.record_trade(&intent(IntentKind::Buy, Side::Buy));

        // Simulate elapsed time by inserting a trade 30s in the past directly.
        cd.last_trade.insert(
            Symbol::from("AAPL"),
            TradeInfo {
                ts: Utc::now() - chrono::Duration::seconds(30),
                side: Side::Buy,
                intent: IntentKind::Buy,
            },
        );
        let (allow, reason) = cd.can_trade(&intent(IntentKind::Buy, Side::Buy)).unwrap();
        assert!(!allow);
        assert_eq!(reason.unwrap(), "cooldown_same_side_remaining_30s");

        cd.last_trade.insert(
            Symbol::from("AAPL"),
            TradeInfo {
                ts: Utc::now() - chrono::Duration::seconds(60),
                side: Side::Buy,
                intent: IntentKind::Buy,
            },
        );
        let (allow, _) = cd.can_trade(&intent(IntentKind::Buy, Side::Buy)).unwrap();
        assert!(allow);

        cd.last_trade.insert(
            Symbol::from("AAPL"),
            TradeInfo {
                ts: Utc::now() - chrono::Duration::seconds(10),
                side: Side::Buy,
                intent: IntentKind::Buy,
            },
        );
        let (allow, _) = cd.can_trade(&intent(IntentKind::Exit, Side::Sell)).unwrap();
        assert!(allow);
    }

    #[test]
    fn warn_only_mode_allows_but_flags() {
        let mut config = CooldownConfig::default();
        config.state_path = std::env::temp_dir().join(format!("cooldown_test_{}.json", uuid::Uuid::new_v4()));
        config.enforce = false;
        config.default_period = chrono::Duration::seconds(3600);
        config.opposite_trades_allowed = false;
        let cd = Cooldown::new(config, test_audit());
        cd.record_trade(&intent(IntentKind::Buy, Side::Buy));
        let (allow, reason) = cd.can_trade(&intent(IntentKind::Buy, Side::Buy)).unwrap();
        assert!(allow);
        assert!(reason.is_some());
        assert_eq!(cd.warn_count(), 1);
    }

    #[test]
    fn set_override_takes_precedence_over_default_period() {
        let cd = cooldown();
        let sym = Symbol::from("MSFT");
        cd.set_override(&sym, chrono::Duration::seconds(300), None, "ops", "extra caution");

        let over_intent = TradingIntent { symbol: sym.clone(), ..intent(IntentKind::Buy, Side::Buy) };
        cd.last_trade.insert(
            sym,
            TradeInfo { ts: Utc::now() - chrono::Duration::seconds(200), side: Side::Buy, intent: IntentKind::Buy },
        );
        let (allow, reason) = cd.can_trade(&over_intent).unwrap();
        assert!(!allow);
        assert_eq!(reason.unwrap(), "cooldown_same_side_remaining_100s");
    }

    #[test]
    fn expired_override_is_ignored() {
        let cd = cooldown();
        let sym = Symbol::from("AAPL");
        cd.set_override(&sym, chrono::Duration::seconds(3600), Some(chrono::Duration::seconds(-1)), "ops", "stale");
        cd.last_trade.insert(
            sym.clone(),
            TradeInfo { ts: Utc::now() - chrono::Duration::seconds(5), side: Side::Buy, intent: IntentKind::Buy },
        );
        let over_intent = TradingIntent { symbol: sym, ..intent(IntentKind::Buy, Side::Buy) };
        // Override already expired, so the default 60s period applies instead of 3600s.
        let (allow, _) = cd.can_trade(&over_intent).unwrap();
        assert!(!allow);
    }
}
