//! Volatility Calculator (spec.md §4.5).
//!
//! Maintains an annualized portfolio volatility estimate and per-symbol ATR;
//! exposes a multiplier used to widen/tighten circuit-breaker thresholds and
//! to scale sizing. Regime-threshold-driven multiplier style grounded on
//! `other_examples/63189ce5_guribe94-bog…circuit_breaker.rs`.

use crate::types::{clamp, Symbol};
use parking_lot::RwLock;
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

/// Ticks per trading day, used to annualize returns (default: 78, i.e.
/// 5-minute bars over a 6.5h session).
pub const DEFAULT_TICKS_PER_DAY: f64 = 78.0;
const TRADING_DAYS_PER_YEAR: f64 = 252.0;
const EWMA_ALPHA: f64 = 0.94;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum VolRegime {
    Quiet,
    Normal,
    Volatile,
    Unknown,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VolatilityConfig {
    pub window: usize,
    pub ticks_per_day: f64,
    pub atr_period: usize,
    pub quiet_threshold: f64,
    pub volatile_threshold: f64,
    pub floor: f64,
    pub ceiling: f64,
}

impl Default for VolatilityConfig {
    fn default() -> Self {
        Self {
            window: 60,
            ticks_per_day: DEFAULT_TICKS_PER_DAY,
            atr_period: 14,
            quiet_threshold: 0.10,
            volatile_threshold: 0.40,
            floor: 0.5,
            ceiling: 2.0,
        }
    }
}

struct SymbolAtr {
    true_ranges: VecDeque<f64>,
    prev_close: Option<f64>,
}

/// Maintains EWMA + sample-stdev annualized volatility and per-symbol ATR.
pub struct VolatilityCalculator {
    config: VolatilityConfig,
    inner: RwLock<Inner>,
}

struct Inner {
    returns: VecDeque<f64>,
    prev_nav: Option<f64>,
    ewma_variance: f64,
    atr: FxHashMap<Symbol, SymbolAtr>,
}

impl VolatilityCalculator {
    pub fn new(config: VolatilityConfig) -> Self {
        Self {
            config,
            inner: RwLock::new(Inner {
                returns: VecDeque::with_capacity(256),
                prev_nav: None,
                ewma_variance: 0.0,
                atr: FxHashMap::default(),
            }),
        }
    }

    /// Feed one NAV observation; updates the rolling return window and the
    /// EWMA variance estimate (spec.md §4.5 "Model").
    pub fn on_nav_tick(&self, nav: f64) {
        let mut inner = self.inner.write();
        if let Some(prev) = inner.prev_nav {
            if prev != 0.0 {
                let r = (nav - prev) / prev;
                inner.returns.push_back(r);
                if inner.returns.len() > self.config.window {
                    inner.returns.pop_front();
                }
                inner.ewma_variance = (1.0 - EWMA_ALPHA) * r * r + EWMA_ALPHA * inner.ewma_variance;
            }
        }
        inner.prev_nav = Some(nav);
    }

    fn annualization_factor(&self) -> f64 {
        (TRADING_DAYS_PER_YEAR * self.config.ticks_per_day).sqrt()
    }

    /// Annualized sample standard deviation of the last `window` returns.
    pub fn sample_volatility(&self) -> Option<f64> {
        let inner = self.inner.read();
        if inner.returns.len() < 2 {
            return None;
        }
        let n = inner.returns.len() as f64;
        let mean = inner.returns.iter().sum::<f64>() / n;
        let var = inner.returns.iter().map(|r| (r - mean).powi(2)).sum::<f64>() / (n - 1.0);
        Some(var.sqrt() * self.annualization_factor())
    }

    /// Annualized EWMA volatility.
    pub fn ewma_volatility(&self) -> f64 {
        let inner = self.inner.read();
        inner.ewma_variance.sqrt() * self.annualization_factor()
    }

    /// Feed one (high, low, close) bar for a symbol's ATR.
    pub fn on_bar(&self, symbol: &Symbol, high: f64, low: f64, close: f64) {
        let mut inner = self.inner.write();
        let period = self.config.atr_period;
        let entry = inner
            .atr
            .entry(symbol.clone())
            .or_insert_with(|| SymbolAtr {
                true_ranges: VecDeque::with_capacity(period + 1),
                prev_close: None,
            });

        let tr = match entry.prev_close {
            Some(prev_close) => (high - low)
                .max((high - prev_close).abs())
                .max((low - prev_close).abs()),
            None => high - low,
        };
        entry.true_ranges.push_back(tr);
        if entry.true_ranges.len() > period {
            entry.true_ranges.pop_front();
        }
        entry.prev_close = Some(close);
    }

    /// Simple average of the last `atr_period` true ranges.
    pub fn atr(&self, symbol: &Symbol) -> Option<f64> {
        let inner = self.inner.read();
        let entry = inner.atr.get(symbol)?;
        if entry.true_ranges.is_empty() {
            return None;
        }
        let n = entry.true_ranges.len() as f64;
        Some(entry.true_ranges.iter().sum::<f64>() / n)
    }

    /// Classifies the current portfolio-level volatility into a regime and
    /// computes the sizing/threshold multiplier (spec.md §4.5 "Regime →
    /// multiplier").
    pub fn regime(&self) -> (VolRegime, f64) {
        let vol = match self.sample_volatility() {
            Some(v) => v,
            None => return (VolRegime::Unknown, 1.0),
        };
        self.regime_for(vol)
    }

    fn regime_for(&self, vol: f64) -> (VolRegime, f64) {
        let c = &self.config;
        let raw = if vol < c.quiet_threshold {
            0.7 + 0.3 * vol / c.quiet_threshold
        } else if vol > c.volatile_threshold {
            1.0 + ((vol - c.volatile_threshold) * 5.0).min(2.0)
        } else {
            let span = c.volatile_threshold - c.quiet_threshold;
            let frac = if span > 0.0 {
                (vol - c.quiet_threshold) / span
            } else {
                0.5
            };
            0.8 + frac * 0.4
        };
        let mult = clamp(raw, c.floor, c.ceiling);

        let regime = if vol < c.quiet_threshold {
            VolRegime::Quiet
        } else if vol > c.volatile_threshold {
            VolRegime::Volatile
        } else {
            VolRegime::Normal
        };
        (regime, mult)
    }
}
