//! NAV snapshot + data-quality types, and the bounded history ring
//! (spec.md §3 `NAVSnapshot`, `NAVDataQuality`).

use crate::types::Symbol;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct NavDataQuality {
    pub stale_quotes: Vec<Symbol>,
    pub missing_quotes: Vec<Symbol>,
    pub used_mid: Vec<Symbol>,
    pub used_last: Vec<Symbol>,
    pub max_staleness_ms: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NavSnapshot {
    pub ts: chrono::DateTime<chrono::Utc>,
    pub nav: f64,
    pub daily_pnl: f64,
    pub unrealized: f64,
    pub realized: f64,
    pub per_symbol_pnl: std::collections::BTreeMap<String, f64>,
    pub quote_ages_ms: std::collections::BTreeMap<String, i64>,
    pub data_quality: NavDataQuality,
}

/// Fixed-capacity ring buffer of the most recent snapshots
/// (spec.md §3 "Bounded history (ring of N)").
pub struct NavHistory {
    capacity: usize,
    buf: VecDeque<NavSnapshot>,
}

impl NavHistory {
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            buf: VecDeque::with_capacity(capacity.max(1)),
        }
    }

    pub fn push(&mut self, snap: NavSnapshot) {
        if self.buf.len() == self.capacity {
            self.buf.pop_front();
        }
        self.buf.push_back(snap);
    }

    pub fn latest(&self) -> Option<&NavSnapshot> {
        self.buf.back()
    }

    /// Copy of the last `n` snapshots, oldest first.
    pub fn last_n(&self, n: usize) -> Vec<NavSnapshot> {
        let skip = self.buf.len().saturating_sub(n);
        self.buf.iter().skip(skip).cloned().collect()
    }

    /// The snapshot closest to `approx_ticks_ago` ticks back, used as the
    /// "~5 trading days ago" weekly drawdown reference (spec.md §4.1).
    pub fn nth_from_end(&self, approx_ticks_ago: usize) -> Option<&NavSnapshot> {
        if approx_ticks_ago >= self.buf.len() {
            return None;
        }
        let idx = self.buf.len() - 1 - approx_ticks_ago;
        self.buf.get(idx)
    }

    pub fn len(&self) -> usize {
        self.buf.len()
    }

    pub fn is_empty(&self) -> bool {
        self.buf.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn snap(nav: f64) -> NavSnapshot {
        NavSnapshot {
            ts: chrono::Utc::now(),
            nav,
            daily_pnl: 0.0,
            unrealized: 0.0,
            realized: 0.0,
            per_symbol_pnl: Default::default(),
            quote_ages_ms: Default::default(),
            data_quality: NavDataQuality::default(),
        }
    }

    #[test]
    fn ring_evicts_oldest_when_full() {
        let mut h = NavHistory::new(3);
        h.push(snap(1.0));
        h.push(snap(2.0));
        h.push(snap(3.0));
        h.push(snap(4.0));
        let all = h.last_n(10);
        assert_eq!(all.len(), 3);
        assert_eq!(all[0].nav, 2.0);
        assert_eq!(all[2].nav, 4.0);
    }

    #[test]
    fn nth_from_end_out_of_range_is_none() {
        let mut h = NavHistory::new(3);
        h.push(snap(1.0));
        assert!(h.nth_from_end(5).is_none());
        assert_eq!(h.nth_from_end(0).unwrap().nav, 1.0);
    }
}
