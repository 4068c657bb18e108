//! External collaborators, consumed through narrow interfaces (spec.md §6).
//!
//! News ingestion, strategy fusion, the broker adapter, Slack RBAC, and raw
//! quote-provider I/O are out of scope for this crate; these traits are the
//! seams at which those systems are expected to plug in. Generalizes the
//! `#[async_trait] pub trait RiskManager` pattern in
//! `services/risk-manager/src/lib.rs`.

use crate::types::{Position, Quote, Symbol};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// `get_quote` / `get_quotes` / `health_check` / `close`, all fallible
/// (spec.md §6).
#[async_trait]
pub trait QuoteAdapter: Send + Sync {
    async fn get_quote(&self, symbol: &Symbol) -> anyhow::Result<Option<Quote>>;

    async fn get_quotes(&self, symbols: &[Symbol]) -> anyhow::Result<HashMap<Symbol, Quote>> {
        let mut out = HashMap::with_capacity(symbols.len());
        for s in symbols {
            if let Some(q) = self.get_quote(s).await? {
                out.insert(s.clone(), q);
            }
        }
        Ok(out)
    }

    async fn health_check(&self) -> anyhow::Result<()>;

    async fn close(&self) -> anyhow::Result<()>;
}

/// Daily statistics surfaced by the Portfolio Store.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DailyStats {
    pub realized_pnl: f64,
    pub trades_today: u32,
}

/// `get_position` / `get_all_positions` / `get_nav` / `update_unrealized_pnl` /
/// `get_daily_stats` / `get_entry_vwap` (spec.md §6).
#[async_trait]
pub trait PortfolioStore: Send + Sync {
    async fn get_position(&self, symbol: &Symbol) -> anyhow::Result<Option<Position>>;

    async fn get_all_positions(&self) -> anyhow::Result<Vec<Position>>;

    /// Capital + realized P&L + unrealized P&L.
    async fn get_nav(&self) -> anyhow::Result<f64>;

    async fn update_unrealized_pnl(&self, symbol: &Symbol, price: f64) -> anyhow::Result<()>;

    async fn get_daily_stats(&self) -> anyhow::Result<DailyStats>;

    async fn get_entry_vwap(&self, symbol: &Symbol) -> anyhow::Result<Option<f64>>;
}

/// Order status as recorded in the outbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Sent,
    Cancelled,
}

/// An order written to the outbox (spec.md §6).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub symbol: Symbol,
    pub side: crate::types::Side,
    pub intent: crate::types::IntentKind,
    pub quantity: i64,
    pub ts: chrono::DateTime<chrono::Utc>,
    pub status: OrderStatus,
    pub idempotency_key: String,
}

/// Appends atomically; idempotent on `idempotency_key` collision (spec.md §6).
#[async_trait]
pub trait OutboxWriter: Send + Sync {
    async fn write_order(&self, order: Order) -> anyhow::Result<()>;
}

/// `send_message(channel, text)` (spec.md §6).
#[async_trait]
pub trait AlertsSink: Send + Sync {
    async fn send_message(&self, channel: &str, text: &str) -> anyhow::Result<()>;
}

#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    //! In-memory stand-ins for the external collaborators, used by unit,
    //! scenario, and integration tests. Not part of the public API.

    use super::*;
    use parking_lot::RwLock;
    use std::collections::HashMap as StdHashMap;
    use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    pub struct FakeQuoteAdapter {
        pub quotes: RwLock<StdHashMap<Symbol, Quote>>,
        pub missing: RwLock<Vec<Symbol>>,
    }

    impl FakeQuoteAdapter {
        pub fn set(&self, symbol: Symbol, quote: Quote) {
            self.quotes.write().insert(symbol, quote);
        }
    }

    #[async_trait]
    impl QuoteAdapter for FakeQuoteAdapter {
        async fn get_quote(&self, symbol: &Symbol) -> anyhow::Result<Option<Quote>> {
            if self.missing.read().contains(symbol) {
                return Err(anyhow::anyhow!("quote provider unavailable for {symbol}"));
            }
            Ok(self.quotes.read().get(symbol).copied())
        }

        async fn health_check(&self) -> anyhow::Result<()> {
            Ok(())
        }

        async fn close(&self) -> anyhow::Result<()> {
            Ok(())
        }
    }

    pub struct FakePortfolioStore {
        pub positions: RwLock<StdHashMap<Symbol, Position>>,
        pub capital: f64,
        pub realized_pnl: AtomicI64,
        pub trades_today: AtomicU32,
    }

    impl FakePortfolioStore {
        pub fn new(capital: f64) -> Self {
            Self {
                positions: RwLock::new(StdHashMap::new()),
                capital,
                realized_pnl: AtomicI64::new(0),
                trades_today: AtomicU32::new(0),
            }
        }

        pub fn set_position(&self, p: Position) {
            self.positions.write().insert(p.symbol.clone(), p);
        }
    }

    #[async_trait]
    impl PortfolioStore for FakePortfolioStore {
        async fn get_position(&self, symbol: &Symbol) -> anyhow::Result<Option<Position>> {
            Ok(self.positions.read().get(symbol).cloned())
        }

        async fn get_all_positions(&self) -> anyhow::Result<Vec<Position>> {
            Ok(self.positions.read().values().cloned().collect())
        }

        async fn get_nav(&self) -> anyhow::Result<f64> {
            let unrealized: f64 = self.positions.read().values().map(|p| p.unrealized_pnl).sum();
            let realized = self.realized_pnl.load(Ordering::Relaxed) as f64 / 100.0;
            Ok(self.capital + realized + unrealized)
        }

        async fn update_unrealized_pnl(&self, symbol: &Symbol, price: f64) -> anyhow::Result<()> {
            if let Some(p) = self.positions.write().get_mut(symbol) {
                p.unrealized_pnl = p.quantity as f64 * (price - p.avg_entry_price);
            }
            Ok(())
        }

        async fn get_daily_stats(&self) -> anyhow::Result<DailyStats> {
            Ok(DailyStats {
                realized_pnl: self.realized_pnl.load(Ordering::Relaxed) as f64 / 100.0,
                trades_today: self.trades_today.load(Ordering::Relaxed),
            })
        }

        async fn get_entry_vwap(&self, symbol: &Symbol) -> anyhow::Result<Option<f64>> {
            Ok(self.positions.read().get(symbol).map(|p| p.entry_vwap))
        }
    }

    #[derive(Default)]
    pub struct FakeOutboxWriter {
        pub orders: RwLock<Vec<Order>>,
    }

    #[async_trait]
    impl OutboxWriter for FakeOutboxWriter {
        async fn write_order(&self, order: Order) -> anyhow::Result<()> {
            let mut orders = self.orders.write();
            if orders.iter().any(|o| o.idempotency_key == order.idempotency_key) {
                return Ok(());
            }
            orders.push(order);
            Ok(())
        }
    }

    #[derive(Default)]
    pub struct FakeAlertsSink {
        pub messages: RwLock<Vec<(String, String)>>,
    }

    #[async_trait]
    impl AlertsSink for FakeAlertsSink {
        async fn send_message(&self, channel: &str, text: &str) -> anyhow::Result<()> {
            self.messages
                .write()
                .push((channel.to_string(), text.to_string()));
            Ok(())
        }
    }

    pub fn arc<T>(v: T) -> Arc<T> {
        Arc::new(v)
    }
}
