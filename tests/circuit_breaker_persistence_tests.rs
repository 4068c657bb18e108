//! Integration tests for the circuit breaker's event log: a second
//! `CircuitBreaker` pointed at the same log file must converge to the exact
//! state the first one left behind, across both an automatic drawdown
//! escalation and a manual override (spec.md §8.4 "replay determinism").

use pretty_assertions::assert_eq;
use risk_core::circuit_breaker::{CbState, CircuitBreaker, CircuitBreakerConfig};

fn config_at(path: std::path::PathBuf) -> CircuitBreakerConfig {
    CircuitBreakerConfig {
        event_log_path: path,
        ..CircuitBreakerConfig::default()
    }
}

fn tmp_log(name: &str) -> std::path::PathBuf {
    std::env::temp_dir().join(format!("cb_persistence_it_{name}_{}.jsonl", uuid::Uuid::new_v4()))
}

#[test]
fn restart_replays_drawdown_escalation_to_the_same_state() {
    let path = tmp_log("escalation");
    let first = CircuitBreaker::new(config_at(path.clone()));
    // Push the breaker well past the Halted threshold.
    let final_state = first.update(9.0, 0.0, 1.0);
    assert_eq!(final_state, first.state());

    let second = CircuitBreaker::new(config_at(path));
    assert_eq!(second.state(), first.state());
}

#[test]
fn restart_replays_manual_halt() {
    let path = tmp_log("manual_halt");
    let first = CircuitBreaker::new(config_at(path.clone()));
    first.manual_halt("ops", "breaking news halt");
    assert_eq!(first.state(), CbState::Emergency);

    let second = CircuitBreaker::new(config_at(path));
    assert_eq!(second.state(), CbState::Emergency);
    // A fresh instance replaying a manual halt must still refuse recovery
    // without going through `initiate_recovery`.
    let (allow, _) = second.can_trade(&buy_intent());
    assert!(!allow);
}

fn buy_intent() -> risk_core::types::TradingIntent {
    risk_core::types::TradingIntent {
        symbol: risk_core::types::Symbol::from("AAPL"),
        side: risk_core::types::Side::Buy,
        kind: risk_core::types::IntentKind::Buy,
        quantity: 10,
        price: 100.0,
        correlation_id: "it-corr".into(),
    }
}

#[test]
fn integrity_check_passes_after_several_transitions() {
    let path = tmp_log("integrity");
    let cb = CircuitBreaker::new(config_at(path));
    cb.update(1.0, 0.0, 1.0);
    cb.update(3.5, 0.0, 1.0);
    cb.update(0.0, 0.0, 1.0);
    assert!(cb.integrity_check().is_ok());
}
