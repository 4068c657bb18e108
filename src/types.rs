//! Domain types shared across all risk-core components.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// Ticker symbol. Cheap to clone and usable as a map key.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Symbol(Arc<str>);

impl Symbol {
    pub fn new(s: impl Into<Arc<str>>) -> Self {
        Self(s.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Symbol {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Symbol {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Trade side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Side {
    Buy,
    Sell,
}

impl Side {
    pub fn is_opposite(self, other: Side) -> bool {
        self != other
    }
}

/// Classification of a trading intent. Risk-reducing kinds are never blocked by
/// Caps or Cooldown, and are allowed through the circuit breaker in every state
/// except `Emergency` (spec.md §4.2, §4.6 GLOSSARY).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum IntentKind {
    Buy,
    Sell,
    Reduce,
    Exit,
    Close,
    Stop,
    Hold,
}

impl IntentKind {
    pub fn is_risk_reducing(self) -> bool {
        matches!(
            self,
            IntentKind::Reduce | IntentKind::Exit | IntentKind::Close | IntentKind::Stop | IntentKind::Hold
        )
    }
}

/// A candidate trading intent flowing into the Risk Decision Engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TradingIntent {
    pub symbol: Symbol,
    pub side: Side,
    pub kind: IntentKind,
    /// Proposed quantity (always positive magnitude; `side` carries direction).
    pub quantity: i64,
    /// Reference price used for sizing at decision time.
    pub price: f64,
    pub correlation_id: String,
}

/// A quote as returned by the Quote Adapter (spec.md §6).
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct Quote {
    pub bid: f64,
    pub ask: f64,
    pub last: f64,
    pub volume: u64,
    pub timestamp: chrono::DateTime<chrono::Utc>,
}

impl Quote {
    /// Mark-to-market price per spec.md §4.1 step 3: mid if both sides > 0 and
    /// `use_mid_price` is configured, else last if > 0, else `None` (missing).
    pub fn mark_price(&self, use_mid_price: bool) -> Option<f64> {
        if use_mid_price && self.bid > 0.0 && self.ask > 0.0 {
            Some((self.bid + self.ask) / 2.0)
        } else if self.last > 0.0 {
            Some(self.last)
        } else {
            None
        }
    }

    pub fn mid(&self) -> Option<f64> {
        if self.bid > 0.0 && self.ask > 0.0 {
            Some((self.bid + self.ask) / 2.0)
        } else {
            None
        }
    }
}

/// Open position tracked by the Portfolio Store (spec.md §3).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Position {
    pub symbol: Symbol,
    /// Signed share count; 0 means flat.
    pub quantity: i64,
    pub avg_entry_price: f64,
    pub entry_vwap: f64,
    pub unrealized_pnl: f64,
    pub last_trade_at: chrono::DateTime<chrono::Utc>,
    pub daily_trade_count: u32,
}

impl Position {
    pub fn notional(&self, mark_price: f64) -> f64 {
        self.quantity as f64 * mark_price
    }
}

/// Clamp a value into `[lo, hi]`.
pub fn clamp(v: f64, lo: f64, hi: f64) -> f64 {
    if v < lo {
        lo
    } else if v > hi {
        hi
    } else {
        v
    }
}

/// Epsilon-aware `>=` for boundary comparisons against percentage thresholds
/// (spec.md §8 "boundary tests": exact-threshold inputs must land on the
/// inclusive side).
pub fn approx_ge(a: f64, b: f64) -> bool {
    a >= b - 1e-9
}

pub fn approx_gt(a: f64, b: f64) -> bool {
    a > b + 1e-9
}
