//! Cross-component integration tests for the Risk Decision Engine, wired
//! against real sub-components (circuit breaker, caps, cooldown, nav,
//! volatility) and fake external collaborators. Unlike the per-module unit
//! tests, these exercise the full gate chain together, the way a decision
//! actually flows through `RiskDecisionEngine::decide`.

use risk_core::audit::AuditLog;
use risk_core::caps::{CapsConfig, PositionCaps};
use risk_core::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig};
use risk_core::cooldown::{Cooldown, CooldownConfig};
use risk_core::decision::{DecisionEngineConfig, RiskDecisionEngine};
use risk_core::interfaces::test_support::{FakePortfolioStore, FakeQuoteAdapter};
use risk_core::nav::{NavTracker, NavTrackerConfig};
use risk_core::types::{IntentKind, Position, Quote, Side, Symbol, TradingIntent};
use risk_core::volatility::{VolatilityCalculator, VolatilityConfig};
use std::sync::Arc;

fn tmp_path(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("decision_flow_it_{name}_{}", uuid::Uuid::new_v4()))
}

struct Harness {
    quotes: Arc<FakeQuoteAdapter>,
    portfolio: Arc<FakePortfolioStore>,
    circuit_breaker: Arc<CircuitBreaker>,
    engine: RiskDecisionEngine,
}

fn harness(capital: f64) -> Harness {
    let quotes = Arc::new(FakeQuoteAdapter::default());
    let portfolio = Arc::new(FakePortfolioStore::new(capital));

    let mut nav_config = NavTrackerConfig::default();
    nav_config.state_path = tmp_path("nav");
    let nav = Arc::new(NavTracker::new(nav_config, quotes.clone(), portfolio.clone()));

    let mut cb_config = CircuitBreakerConfig::default();
    cb_config.event_log_path = tmp_path("cb_events.jsonl");
    let circuit_breaker = Arc::new(CircuitBreaker::new(cb_config));

    let mut caps_config = CapsConfig::default();
    caps_config.state_path = tmp_path("caps");
    caps_config.default_cap.max_position_usd = 10_000.0;
    let audit = Arc::new(AuditLog::new(tmp_path("audit.jsonl")));
    let caps = Arc::new(PositionCaps::new(caps_config, quotes.clone(), portfolio.clone(), audit.clone()));

    let mut cooldown_config = CooldownConfig::default();
    cooldown_config.state_path = tmp_path("cooldown");
    let cooldown = Arc::new(Cooldown::new(cooldown_config, audit));

    let volatility = Arc::new(VolatilityCalculator::new(VolatilityConfig::default()));

    let engine = RiskDecisionEngine::new(
        DecisionEngineConfig::default(),
        nav,
        circuit_breaker.clone(),
        caps,
        cooldown,
        volatility,
    );

    Harness {
        quotes,
        portfolio,
        circuit_breaker,
        engine,
    }
}

fn buy(symbol: &str, quantity: i64, price: f64) -> TradingIntent {
    TradingIntent {
        symbol: Symbol::from(symbol),
        side: Side::Buy,
        kind: IntentKind::Buy,
        quantity,
        price,
        correlation_id: "it-corr".into(),
    }
}

/// Caps reads pre-trade exposure from the Portfolio Store, not from the
/// proposed trade itself: a symbol already at 60% of its cap should block a
/// trade that would push it over, while an identically-sized trade against a
/// flat symbol should be allowed.
#[tokio::test]
async fn caps_denial_uses_portfolio_store_exposure_not_proposed_trade() {
    let h = harness(100_000.0);
    h.quotes.set(
        Symbol::from("AAPL"),
        Quote {
            bid: 99.9,
            ask: 100.1,
            last: 100.0,
            volume: 1000,
            timestamp: chrono::Utc::now(),
        },
    );

    // Flat: a 60-share order at $100 = $6,000 notional, under the $10,000 cap.
    let flat = h.engine.decide(buy("AAPL", 60, 100.0)).await;
    assert!(flat.approved, "flat symbol should be allowed under the cap: {:?}", flat.blocked_by);

    // Already holding 80 shares ($8,000 notional): the same 60-share add
    // would push exposure to $14,000, over the cap.
    h.portfolio.set_position(Position {
        symbol: Symbol::from("AAPL"),
        quantity: 80,
        avg_entry_price: 100.0,
        entry_vwap: 100.0,
        unrealized_pnl: 0.0,
        last_trade_at: chrono::Utc::now(),
        daily_trade_count: 0,
    });
    let loaded = h.engine.decide(buy("AAPL", 60, 100.0)).await;
    assert!(!loaded.approved);
    assert!(loaded.blocked_by.iter().any(|r| r.starts_with("caps_symbol_")));
}

/// A manual halt blocks every new BUY regardless of how favorable the other
/// gates look, and the circuit breaker gate runs before caps/cooldown ever
/// get a chance to evaluate.
#[tokio::test]
async fn manual_halt_blocks_before_other_gates_run() {
    let h = harness(100_000.0);
    h.quotes.set(
        Symbol::from("MSFT"),
        Quote {
            bid: 199.9,
            ask: 200.1,
            last: 200.0,
            volume: 1000,
            timestamp: chrono::Utc::now(),
        },
    );
    h.circuit_breaker.manual_halt("ops", "news pending");

    let result = h.engine.decide(buy("MSFT", 10, 200.0)).await;
    assert!(!result.approved);
    assert_eq!(result.blocked_by.len(), 1, "circuit breaker should be the only reason: {:?}", result.blocked_by);
}

/// A risk-reducing intent sails through caps and cooldown even while a
/// symbol sits well over its own cap, but is still blocked once the breaker
/// escalates to Emergency (spec.md §4.2: Emergency blocks everything).
#[tokio::test]
async fn risk_reducing_intent_bypasses_caps_but_not_emergency() {
    let h = harness(100_000.0);
    h.quotes.set(
        Symbol::from("TSLA"),
        Quote {
            bid: 299.9,
            ask: 300.1,
            last: 300.0,
            volume: 1000,
            timestamp: chrono::Utc::now(),
        },
    );
    h.portfolio.set_position(Position {
        symbol: Symbol::from("TSLA"),
        quantity: 1000,
        avg_entry_price: 300.0,
        entry_vwap: 300.0,
        unrealized_pnl: 0.0,
        last_trade_at: chrono::Utc::now(),
        daily_trade_count: 0,
    });

    let reduce = TradingIntent {
        symbol: Symbol::from("TSLA"),
        side: Side::Sell,
        kind: IntentKind::Reduce,
        quantity: 100,
        price: 300.0,
        correlation_id: "it-corr".into(),
    };
    let ok = h.engine.decide(reduce.clone()).await;
    assert!(ok.approved, "risk-reducing intent should bypass caps: {:?}", ok.blocked_by);

    h.circuit_breaker.manual_halt("ops", "emergency drill");
    let blocked = h.engine.decide(reduce).await;
    assert!(!blocked.approved);
}
