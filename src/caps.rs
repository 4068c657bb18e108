//! Position Caps (spec.md §4.3).
//!
//! Blocks BUY-like intents that would push a symbol's exposure above an
//! absolute USD cap, a percentage-of-NAV cap, or a per-symbol daily trade
//! count. Risk-reducing intents always pass. Generalizes the position/
//! exposure checks in `services/risk-manager/src/lib.rs::check_order`,
//! keyed per symbol the same way `RiskManagerService::symbol_risks` does.

use crate::audit::AuditLog;
use crate::errors::CapsError;
use crate::interfaces::{PortfolioStore, QuoteAdapter};
use crate::persistence::{atomic_write_json, read_json};
use crate::types::{Symbol, TradingIntent};
use chrono::{DateTime, NaiveTime, Utc};
use dashmap::DashMap;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::warn;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PositionCap {
    pub max_position_usd: f64,
    pub max_portfolio_pct: f64,
    pub max_daily_trades: u32,
}

/// A Slack-set override, carrying provenance and an expiry
/// (spec.md §3 `PositionCap`, §6 Slack command surface).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CapOverride {
    pub cap: PositionCap,
    pub effective_until: Option<DateTime<Utc>>,
    pub updated_by: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub struct CapsConfig {
    pub default_cap: PositionCap,
    pub enforce: bool,
    pub rth_open: NaiveTime,
    pub state_path: PathBuf,
}

impl Default for CapsConfig {
    fn default() -> Self {
        Self {
            default_cap: PositionCap {
                max_position_usd: 50_000.0,
                max_portfolio_pct: 15.0,
                max_daily_trades: 20,
            },
            enforce: true,
            rth_open: NaiveTime::from_hms_opt(9, 30, 0).expect("valid constant time"),
            state_path: PathBuf::from("data/caps_state.json"),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
struct PersistedCapsState {
    version: u32,
    updated_at: Option<DateTime<Utc>>,
    symbol_caps: std::collections::BTreeMap<String, PositionCap>,
    daily_trades: std::collections::BTreeMap<String, u32>,
    last_reset: Option<DateTime<Utc>>,
}

struct SymbolState {
    specific_cap: Option<PositionCap>,
    override_cap: Option<CapOverride>,
    daily_trades: u32,
}

impl Default for SymbolState {
    fn default() -> Self {
        Self {
            specific_cap: None,
            override_cap: None,
            daily_trades: 0,
        }
    }
}

pub struct PositionCaps {
    config: CapsConfig,
    quotes: Arc<dyn QuoteAdapter>,
    portfolio: Arc<dyn PortfolioStore>,
    symbols: DashMap<Symbol, SymbolState>,
    last_reset_date: RwLock<chrono::NaiveDate>,
    warn_violations: std::sync::atomic::AtomicU64,
    audit: Arc<AuditLog>,
}

impl PositionCaps {
    pub fn new(
        config: CapsConfig,
        quotes: Arc<dyn QuoteAdapter>,
        portfolio: Arc<dyn PortfolioStore>,
        audit: Arc<AuditLog>,
    ) -> Self {
        let symbols = DashMap::new();
        let mut last_reset_date = Utc::now().date_naive();

        if let Ok(Some(persisted)) = read_json::<PersistedCapsState>(&config.state_path) {
            for (sym, cap) in persisted.symbol_caps {
                symbols.entry(Symbol::from(sym)).or_default().specific_cap = Some(cap);
            }
            for (sym, count) in persisted.daily_trades {
                symbols.entry(Symbol::from(sym)).or_default().daily_trades = count;
            }
            if let Some(reset) = persisted.last_reset {
                last_reset_date = reset.date_naive();
            }
        }

        Self {
            config,
            quotes,
            portfolio,
            symbols,
            last_reset_date: RwLock::new(last_reset_date),
            warn_violations: std::sync::atomic::AtomicU64::new(0),
            audit,
        }
    }

    /// Resolves the cap in effect for a symbol (spec.md §4.3 "Cap resolution").
    fn resolve_cap(&self, symbol: &Symbol) -> PositionCap {
        let mut entry = self.symbols.entry(symbol.clone()).or_default();
        if let Some(over) = &entry.override_cap {
            match over.effective_until {
                Some(until) if until > Utc::now() => return over.cap.clone(),
                Some(_) => entry.override_cap = None,
                None => return over.cap.clone(),
            }
        }
        entry
            .specific_cap
            .clone()
            .unwrap_or_else(|| self.config.default_cap.clone())
    }

    fn maybe_reset_daily_trades(&self, now: DateTime<Utc>) {
        let ny = now.with_timezone(&chrono_tz::America::New_York);
        let today = if ny.time() >= self.config.rth_open {
            ny.date_naive()
        } else {
            ny.date_naive().pred_opt().unwrap_or(ny.date_naive())
        };
        let mut last = self.last_reset_date.write();
        if *last != today {
            *last = today;
            for mut entry in self.symbols.iter_mut() {
                entry.daily_trades = 0;
            }
        }
    }

    /// `CanIncrease(symbol, intent, quantity, price, nav)` (spec.md §4.3).
    ///
    /// `quantity`/`price` are the proposed trade's size and reference price;
    /// the symbol's pre-trade exposure is looked up from the Portfolio Store,
    /// not derived from the proposed trade (spec.md §4.3 Scenario C: a flat
    /// symbol has `current_exposure = 0` regardless of the proposed size).
    pub async fn can_increase(
        &self,
        intent: &TradingIntent,
        quantity: i64,
        price: f64,
        nav: f64,
    ) -> Result<(bool, Option<String>), CapsError> {
        if intent.kind.is_risk_reducing() {
            return Ok((true, None));
        }

        let now = Utc::now();
        self.maybe_reset_daily_trades(now);

        let mid_price = match self.quotes.get_quote(&intent.symbol).await {
            Ok(Some(q)) => q.mark_price(true).unwrap_or(price),
            Ok(None) => price,
            Err(e) => {
                warn!("caps: quote fetch failed for {}: {e}", intent.symbol);
                price
            }
        };

        let existing_quantity = match self.portfolio.get_position(&intent.symbol).await {
            Ok(Some(p)) => p.quantity,
            Ok(None) => 0,
            Err(e) => {
                warn!("caps: position lookup failed for {}: {e}", intent.symbol);
                0
            }
        };

        let current_exposure = existing_quantity.unsigned_abs() as f64 * mid_price;
        let proposed_exposure = current_exposure + (quantity as f64 * mid_price).abs();
        let proposed_concentration = if nav > 0.0 {
            proposed_exposure / nav * 100.0
        } else {
            0.0
        };

        let cap = self.resolve_cap(&intent.symbol);
        let daily_trades = self
            .symbols
            .get(&intent.symbol)
            .map(|s| s.daily_trades)
            .unwrap_or(0);

        let mut violation = None;
        if proposed_exposure > cap.max_position_usd {
            violation = Some(format!(
                "caps_symbol_{:.0}_exceeds_{:.0}",
                proposed_exposure, cap.max_position_usd
            ));
        } else if proposed_concentration > cap.max_portfolio_pct {
            violation = Some(format!(
                "caps_concentration_{:.2}_exceeds_{:.2}",
                proposed_concentration, cap.max_portfolio_pct
            ));
        } else if daily_trades >= cap.max_daily_trades {
            violation = Some(format!(
                "caps_daily_trades_{daily_trades}_exceeds_{}",
                cap.max_daily_trades
            ));
        }

        match violation {
            None => Ok((true, None)),
            Some(reason) if !self.config.enforce => {
                self.warn_violations.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
                Ok((true, Some(reason)))
            }
            Some(reason) => Ok((false, Some(reason))),
        }
    }

    /// Records a completed trade against the symbol's daily counter.
    pub fn record_trade(&self, symbol: &Symbol) {
        self.symbols.entry(symbol.clone()).or_default().daily_trades += 1;
    }

    /// Sets an override cap via the Slack command surface (spec.md §6
    /// `/set-cap`, `/override-cap`).
    pub fn set_override(
        &self,
        symbol: &Symbol,
        cap: PositionCap,
        ttl: Option<chrono::Duration>,
        updated_by: &str,
        reason: &str,
    ) {
        let effective_until = ttl.map(|d| Utc::now() + d);
        let old_cap = self.resolve_cap(symbol);
        self.symbols.entry(symbol.clone()).or_default().override_cap = Some(CapOverride {
            cap: cap.clone(),
            effective_until,
            updated_by: updated_by.to_string(),
            reason: reason.to_string(),
        });
        self.audit.record(
            "set_cap_override",
            updated_by,
            Some(symbol.as_str()),
            serde_json::json!(old_cap),
            serde_json::json!(cap),
            ttl,
            reason,
        );
        self.persist();
    }

    pub fn warn_violation_count(&self) -> u64 {
        self.warn_violations.load(std::sync::atomic::Ordering::Relaxed)
    }

    fn persist(&self) {
        let mut symbol_caps = std::collections::BTreeMap::new();
        let mut daily_trades = std::collections::BTreeMap::new();
        for entry in self.symbols.iter() {
            if let Some(cap) = &entry.specific_cap {
                symbol_caps.insert(entry.key().as_str().to_string(), cap.clone());
            }
            daily_trades.insert(entry.key().as_str().to_string(), entry.daily_trades);
        }
        let persisted = PersistedCapsState {
            version: 1,
            updated_at: Some(Utc::now()),
            symbol_caps,
            daily_trades,
            last_reset: Some(
                self.last_reset_date
                    .read()
                    .and_time(NaiveTime::MIN)
                    .and_utc(),
            ),
        };
        if let Err(e) = atomic_write_json(&self.config.state_path, &persisted) {
            warn!("caps: persistence failed: {e}");
        }
    }
}
