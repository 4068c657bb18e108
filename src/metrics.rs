//! Prometheus metrics (spec.md §4.8, ambient). Grounded on
//! `services/risk-manager/src/grpc_service.rs`'s `lazy_static!`-backed
//! `Metrics` struct, generalized from gRPC request counters to the
//! decisions/state this crate actually produces.

use prometheus::{register_counter_vec, register_gauge, register_gauge_vec, CounterVec, Gauge, GaugeVec};

pub(crate) struct Metrics {
    pub(crate) decisions_total: CounterVec,
    pub(crate) circuit_breaker_state: Gauge,
    pub(crate) nav_gauge: Gauge,
    pub(crate) drawdown_gauge: GaugeVec,
    pub(crate) outbox_denials_total: CounterVec,
}

lazy_static::lazy_static! {
    pub(crate) static ref METRICS: Option<Metrics> = init_metrics();
}

fn init_metrics() -> Option<Metrics> {
    let decisions_total = match register_counter_vec!(
        "risk_core_decisions_total",
        "Total risk decisions, by approval outcome",
        &["approved"]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register risk_core_decisions_total: {e}");
            return None;
        }
    };

    let circuit_breaker_state = match register_gauge!(
        "risk_core_circuit_breaker_state",
        "Current circuit breaker state, as its severity rank"
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register risk_core_circuit_breaker_state: {e}");
            return None;
        }
    };

    let nav_gauge = match register_gauge!("risk_core_nav", "Latest tracked NAV") {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register risk_core_nav: {e}");
            return None;
        }
    };

    let drawdown_gauge = match register_gauge_vec!(
        "risk_core_drawdown_pct",
        "Current drawdown percentage, by window",
        &["window"]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register risk_core_drawdown_pct: {e}");
            return None;
        }
    };

    let outbox_denials_total = match register_counter_vec!(
        "risk_core_outbox_denials_total",
        "Total orders denied at send-time, by reason",
        &["reason"]
    ) {
        Ok(m) => m,
        Err(e) => {
            tracing::error!("failed to register risk_core_outbox_denials_total: {e}");
            return None;
        }
    };

    Some(Metrics {
        decisions_total,
        circuit_breaker_state,
        nav_gauge,
        drawdown_gauge,
        outbox_denials_total,
    })
}

/// Records a decision outcome. No-op if registration failed.
pub(crate) fn record_decision(approved: bool) {
    if let Some(m) = METRICS.as_ref() {
        m.decisions_total
            .with_label_values(&[if approved { "true" } else { "false" }])
            .inc();
    }
}

/// Records the circuit breaker's severity rank and the current drawdowns.
pub(crate) fn record_circuit_breaker(severity_rank: u8, daily_drawdown_pct: f64, weekly_drawdown_pct: f64) {
    if let Some(m) = METRICS.as_ref() {
        m.circuit_breaker_state.set(severity_rank as f64);
        m.drawdown_gauge.with_label_values(&["daily"]).set(daily_drawdown_pct);
        m.drawdown_gauge.with_label_values(&["weekly"]).set(weekly_drawdown_pct);
    }
}

pub(crate) fn record_nav(nav: f64) {
    if let Some(m) = METRICS.as_ref() {
        m.nav_gauge.set(nav);
    }
}

/// Records a send-time denial, by its deny reason prefix (e.g.
/// `price_drift`, `staleness`, `caps_recheck`, `quote_fetch_error`).
pub(crate) fn record_outbox_denial(reason: &str) {
    if let Some(m) = METRICS.as_ref() {
        let bucket = reason.split('_').next().unwrap_or("unknown");
        m.outbox_denials_total.with_label_values(&[bucket]).inc();
    }
}
