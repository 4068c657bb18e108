//! NAV Tracker (spec.md §4.1).
//!
//! Real-time portfolio valuation with data-quality guardrails: tick
//! algorithm, drawdown computation, and a freeze mechanism that suppresses
//! snapshot emission when quote data is too stale to trust.

pub mod snapshot;

use crate::errors::NavError;
use crate::interfaces::{PortfolioStore, QuoteAdapter};
use crate::persistence::{atomic_write_json, read_json};
use crate::types::Symbol;
use chrono::{DateTime, NaiveDate, NaiveTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use snapshot::{NavDataQuality, NavHistory, NavSnapshot};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};

#[derive(Debug, Clone)]
pub struct NavTrackerConfig {
    pub tick_interval: std::time::Duration,
    /// Quote age beyond which a quote is classified stale.
    pub staleness_threshold: chrono::Duration,
    pub use_mid_price: bool,
    pub history_capacity: usize,
    pub persist_every_n_ticks: u64,
    pub state_path: PathBuf,
    pub freeze_duration: chrono::Duration,
    /// Ticks-per-trading-day used to locate the "~5 trading days ago"
    /// snapshot for the weekly drawdown reference.
    pub ticks_per_trading_day: usize,
}

impl Default for NavTrackerConfig {
    fn default() -> Self {
        Self {
            tick_interval: std::time::Duration::from_secs(1),
            staleness_threshold: chrono::Duration::seconds(2),
            use_mid_price: true,
            history_capacity: 10_000,
            persist_every_n_ticks: 60,
            state_path: PathBuf::from("data/nav_state.json"),
            freeze_duration: chrono::Duration::seconds(30),
            ticks_per_trading_day: 78,
        }
    }
}

/// On-disk NAV state layout (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
struct PersistedNavState {
    start_of_day_nav: f64,
    high_water_mark: f64,
    last_update: DateTime<Utc>,
    last_nav: f64,
    trading_date: String,
}

struct NavState {
    history: NavHistory,
    frozen_until: Option<DateTime<Utc>>,
    freeze_reason: Option<String>,
    high_water_mark: f64,
    start_of_day_nav: f64,
    trading_date: NaiveDate,
    tick_count: u64,
    persist_errors: u64,
    skipped_ticks: u64,
}

pub struct NavTracker {
    config: NavTrackerConfig,
    quotes: Arc<dyn QuoteAdapter>,
    portfolio: Arc<dyn PortfolioStore>,
    state: RwLock<NavState>,
}

/// Sixteen-hundred hours Eastern, the equities close used as the daily
/// trading-date boundary (spec.md §4.1 step 7).
fn market_close_time() -> NaiveTime {
    NaiveTime::from_hms_opt(16, 0, 0).expect("valid constant time")
}

/// The trading date `now` belongs to: a tick after the 16:00 ET close rolls
/// into the next trading date (spec.md §4.1: "America/New_York crossing
/// 16:00 ET or calendar day change").
fn trading_date_for(now: DateTime<Utc>) -> NaiveDate {
    let ny = now.with_timezone(&chrono_tz::America::New_York);
    let day = ny.date_naive();
    if ny.time() >= market_close_time() {
        day.succ_opt().unwrap_or(day)
    } else {
        day
    }
}

pub enum TickOutcome {
    Skipped,
    Frozen { reason: String },
    Snapshot(NavSnapshot),
}

impl NavTracker {
    pub fn new(
        config: NavTrackerConfig,
        quotes: Arc<dyn QuoteAdapter>,
        portfolio: Arc<dyn PortfolioStore>,
    ) -> Self {
        let now = Utc::now();
        let mut state = NavState {
            history: NavHistory::new(config.history_capacity),
            frozen_until: None,
            freeze_reason: None,
            high_water_mark: 0.0,
            start_of_day_nav: 0.0,
            trading_date: trading_date_for(now),
            tick_count: 0,
            persist_errors: 0,
            skipped_ticks: 0,
        };

        if let Ok(Some(persisted)) = read_json::<PersistedNavState>(&config.state_path) {
            let persisted_date = persisted
                .trading_date
                .parse::<NaiveDate>()
                .unwrap_or(state.trading_date);
            if persisted_date == state.trading_date {
                state.start_of_day_nav = persisted.start_of_day_nav;
            } else {
                info!(
                    "nav: persisted trading_date {} != current {}, ignoring persisted SOD",
                    persisted_date, state.trading_date
                );
            }
            state.high_water_mark = persisted.high_water_mark;
        }

        Self {
            config,
            quotes,
            portfolio,
            state: RwLock::new(state),
        }
    }

    /// Runs one tick of the algorithm in spec.md §4.1.
    pub async fn tick(&self) -> Result<TickOutcome, NavError> {
        let now = Utc::now();

        // Step 1: frozen window.
        {
            let st = self.state.read();
            if let Some(until) = st.frozen_until {
                if now < until {
                    return Ok(TickOutcome::Frozen {
                        reason: st.freeze_reason.clone().unwrap_or_default(),
                    });
                }
            }
        }

        // Step 2: fetch quotes for every non-zero position.
        let positions = self
            .portfolio
            .get_all_positions()
            .await
            .map_err(|e| NavError::QuoteFetch {
                symbol: "*".into(),
                reason: e.to_string(),
            })?;
        let open_positions: Vec<_> = positions.into_iter().filter(|p| p.quantity != 0).collect();
        let symbols: Vec<Symbol> = open_positions.iter().map(|p| p.symbol.clone()).collect();

        let quotes = self.quotes.get_quotes(&symbols).await.unwrap_or_default();

        let mut quality = NavDataQuality::default();
        let mut per_symbol_pnl = std::collections::BTreeMap::new();
        let mut quote_ages_ms = std::collections::BTreeMap::new();
        let mut unrealized_total = 0.0;
        let mut max_staleness = chrono::Duration::zero();

        for pos in &open_positions {
            let Some(quote) = quotes.get(&pos.symbol) else {
                quality.missing_quotes.push(pos.symbol.clone());
                continue;
            };

            let age = now.signed_duration_since(quote.timestamp);
            quote_ages_ms.insert(pos.symbol.as_str().to_string(), age.num_milliseconds());
            if age > max_staleness {
                max_staleness = age;
            }
            if age > self.config.staleness_threshold {
                quality.stale_quotes.push(pos.symbol.clone());
            }

            // Step 3: mark-to-market precedence.
            let mtm = if self.config.use_mid_price && quote.bid > 0.0 && quote.ask > 0.0 {
                quality.used_mid.push(pos.symbol.clone());
                Some((quote.bid + quote.ask) / 2.0)
            } else if quote.last > 0.0 {
                quality.used_last.push(pos.symbol.clone());
                Some(quote.last)
            } else {
                None
            };

            let Some(price) = mtm else {
                quality.missing_quotes.push(pos.symbol.clone());
                continue;
            };

            // Step 5: unrealized PnL, pushed back to the position store.
            let pnl = pos.quantity as f64 * (price - pos.avg_entry_price);
            per_symbol_pnl.insert(pos.symbol.as_str().to_string(), pnl);
            unrealized_total += pnl;
            let _ = self.portfolio.update_unrealized_pnl(&pos.symbol, price).await;
        }
        quality.max_staleness_ms = max_staleness.num_milliseconds();

        // Step 6: excessive-staleness freeze.
        if max_staleness > self.config.staleness_threshold * 2 {
            let secs = max_staleness.num_seconds();
            let reason = format!("excessive_staleness_{secs}s");
            let mut st = self.state.write();
            st.frozen_until = Some(now + self.config.freeze_duration);
            st.freeze_reason = Some(reason.clone());
            st.tick_count += 1;
            warn!("nav: entering freeze: {}", reason);
            return Ok(TickOutcome::Frozen { reason });
        }

        let nav = self.portfolio.get_nav().await.map_err(|e| NavError::QuoteFetch {
            symbol: "*".into(),
            reason: e.to_string(),
        })?;
        let daily_stats = self.portfolio.get_daily_stats().await.unwrap_or_default();

        // Step 7: emit snapshot, update HWM and trading-day rollover.
        let mut st = self.state.write();
        st.frozen_until = None;
        st.freeze_reason = None;
        st.high_water_mark = st.high_water_mark.max(nav);

        let today = trading_date_for(now);
        if today != st.trading_date {
            st.trading_date = today;
            st.start_of_day_nav = nav;
        } else if st.start_of_day_nav == 0.0 {
            st.start_of_day_nav = nav;
        }

        let snap = NavSnapshot {
            ts: now,
            nav,
            daily_pnl: daily_stats.realized_pnl + unrealized_total,
            unrealized: unrealized_total,
            realized: daily_stats.realized_pnl,
            per_symbol_pnl,
            quote_ages_ms,
            data_quality: quality,
        };
        st.history.push(snap.clone());
        st.tick_count += 1;

        // Step 8: persist every N ticks, best-effort.
        if st.tick_count % self.config.persist_every_n_ticks.max(1) == 0 {
            let persisted = PersistedNavState {
                start_of_day_nav: st.start_of_day_nav,
                high_water_mark: st.high_water_mark,
                last_update: now,
                last_nav: nav,
                trading_date: st.trading_date.to_string(),
            };
            if let Err(e) = atomic_write_json(&self.config.state_path, &persisted) {
                st.persist_errors += 1;
                warn!("nav: persistence failed: {e}");
            }
        }

        Ok(TickOutcome::Snapshot(snap))
    }

    /// Never blocks; returns the last committed snapshot.
    pub fn current_nav(&self) -> (f64, NavDataQuality, Option<DateTime<Utc>>) {
        let st = self.state.read();
        match st.history.latest() {
            Some(snap) => (snap.nav, snap.data_quality.clone(), Some(snap.ts)),
            None => (0.0, NavDataQuality::default(), None),
        }
    }

    /// `(daily_pct, weekly_pct)`. Weekly uses `max(hwm_based, five_day_based)`
    /// per the Open Question resolution in DESIGN.md (both are loss-protective).
    pub fn drawdowns(&self) -> (f64, f64) {
        let st = self.state.read();
        let Some(latest) = st.history.latest() else {
            return (0.0, 0.0);
        };
        let nav = latest.nav;

        let daily = if st.start_of_day_nav > 0.0 {
            (0.0f64).max((st.start_of_day_nav - nav) / st.start_of_day_nav * 100.0)
        } else {
            0.0
        };

        let hwm_based = if st.high_water_mark > 0.0 {
            (0.0f64).max((st.high_water_mark - nav) / st.high_water_mark * 100.0)
        } else {
            0.0
        };

        let five_day_ticks = self.config.ticks_per_trading_day * 5;
        let five_day_based = st
            .history
            .nth_from_end(five_day_ticks)
            .filter(|s| s.nav > 0.0)
            .map(|s| (0.0f64).max((s.nav - nav) / s.nav * 100.0))
            .unwrap_or(0.0);

        (daily, hwm_based.max(five_day_based))
    }

    pub fn is_frozen(&self) -> (bool, String) {
        let st = self.state.read();
        match &st.frozen_until {
            Some(until) if Utc::now() < *until => {
                (true, st.freeze_reason.clone().unwrap_or_default())
            }
            _ => (false, String::new()),
        }
    }

    /// Copy of the last `n` snapshots.
    pub fn history(&self, n: usize) -> Vec<NavSnapshot> {
        self.state.read().history.last_n(n)
    }

    pub fn persist_error_count(&self) -> u64 {
        self.state.read().persist_errors
    }
}
