//! Orchestrator (spec.md §5 "Concurrency").
//!
//! Owns every sub-component behind `Arc` and runs the background loops that
//! drive them: a NAV tick loop, a risk-monitoring loop that feeds drawdowns
//! into the circuit breaker, and a component-health loop. Grounded on the
//! `tokio::spawn` + `broadcast` shutdown fan-out in
//! `services/risk-manager/src/main.rs`.

use crate::caps::PositionCaps;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::RiskCoreSettings;
use crate::cooldown::Cooldown;
use crate::decision::RiskDecisionEngine;
use crate::interfaces::{AlertsSink, PortfolioStore, QuoteAdapter};
use crate::nav::{NavTracker, TickOutcome};
use crate::observability::{HealthStatus, Observability, Severity};
use crate::outbox_guard::OutboxGuard;
use crate::volatility::VolatilityCalculator;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Every collaborator the core needs, wired up once at startup.
pub struct RiskCore {
    pub nav: Arc<NavTracker>,
    pub circuit_breaker: Arc<CircuitBreaker>,
    pub caps: Arc<PositionCaps>,
    pub cooldown: Arc<Cooldown>,
    pub volatility: Arc<VolatilityCalculator>,
    pub decision_engine: Arc<RiskDecisionEngine>,
    pub outbox_guard: Arc<OutboxGuard>,
    pub observability: Arc<Observability>,
    tick_interval: std::time::Duration,
}

impl RiskCore {
    pub fn new(
        settings: &RiskCoreSettings,
        quotes: Arc<dyn QuoteAdapter>,
        portfolio: Arc<dyn PortfolioStore>,
        outbox: Arc<dyn crate::interfaces::OutboxWriter>,
        alerts: Arc<dyn AlertsSink>,
    ) -> Self {
        let nav = Arc::new(NavTracker::new(
            settings.nav_tracker_config(),
            quotes.clone(),
            portfolio.clone(),
        ));
        let circuit_breaker = Arc::new(CircuitBreaker::new(settings.circuit_breaker_config()));
        let audit = Arc::new(crate::audit::AuditLog::new(settings.audit_log_path()));
        let caps = Arc::new(PositionCaps::new(
            settings.caps_config(),
            quotes.clone(),
            portfolio,
            audit.clone(),
        ));
        let cooldown = Arc::new(Cooldown::new(settings.cooldown_config(), audit));
        let volatility = Arc::new(VolatilityCalculator::new(settings.volatility_config()));
        let decision_engine = Arc::new(RiskDecisionEngine::new(
            settings.decision_engine_config(),
            nav.clone(),
            circuit_breaker.clone(),
            caps.clone(),
            cooldown.clone(),
            volatility.clone(),
        ));
        let outbox_guard = Arc::new(OutboxGuard::new(
            settings.outbox_guard_config(),
            quotes,
            caps.clone(),
            outbox,
        ));
        let observability = Arc::new(Observability::new(settings.observability_config(), alerts));

        Self {
            nav,
            circuit_breaker,
            caps,
            cooldown,
            volatility,
            decision_engine,
            outbox_guard,
            observability,
            tick_interval: settings.nav_tracker_config().tick_interval,
        }
    }

    /// Runs the NAV tick loop, the risk-monitoring loop, and the
    /// component-health loop until `shutdown` fires (spec.md §5).
    pub async fn run(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let mut nav_shutdown = shutdown.resubscribe();
        let nav_core = self.clone();
        let nav_task = tokio::spawn(async move {
            nav_core.nav_tick_loop(&mut nav_shutdown).await;
        });

        let mut monitor_shutdown = shutdown.resubscribe();
        let monitor_core = self.clone();
        let monitor_task = tokio::spawn(async move {
            monitor_core.risk_monitor_loop(&mut monitor_shutdown).await;
        });

        let health_core = self.clone();
        let health_task = tokio::spawn(async move {
            health_core.health_loop(&mut shutdown).await;
        });

        let _ = tokio::join!(nav_task, monitor_task, health_task);
    }

    async fn nav_tick_loop(&self, shutdown: &mut broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    match self.nav.tick().await {
                        Ok(TickOutcome::Snapshot(snap)) => {
                            self.volatility.on_nav_tick(snap.nav);
                            crate::metrics::record_nav(snap.nav);
                        }
                        Ok(TickOutcome::Frozen { reason }) => {
                            self.observability
                                .alert(Severity::Warning, "nav", format!("frozen: {reason}"))
                                .await;
                        }
                        Ok(TickOutcome::Skipped) => {}
                        Err(e) => {
                            error!("nav tick failed: {e}");
                            self.observability.record(Severity::Error, "nav", e.to_string());
                        }
                    }
                }
                _ = shutdown.recv() => {
                    info!("nav tick loop shutting down");
                    return;
                }
            }
        }
    }

    async fn risk_monitor_loop(&self, shutdown: &mut broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(self.tick_interval);
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (daily_dd, weekly_dd) = self.nav.drawdowns();
                    let (_, vol_multiplier) = self.volatility.regime();
                    let state_before = self.circuit_breaker.state();
                    let state_after = self.circuit_breaker.update(daily_dd, weekly_dd, vol_multiplier);
                    crate::metrics::record_circuit_breaker(state_after.severity_rank(), daily_dd, weekly_dd);
                    if state_after != state_before {
                        self.observability
                            .alert(
                                Severity::Critical,
                                "circuit_breaker",
                                format!("transitioned {state_before:?} -> {state_after:?}"),
                            )
                            .await;
                    }
                    if self.observability.drawdown_warning_exceeded(daily_dd) {
                        self.observability
                            .alert(Severity::Warning, "nav", format!("daily drawdown {daily_dd:.2}%"))
                            .await;
                    }
                }
                _ = shutdown.recv() => {
                    info!("risk monitor loop shutting down");
                    return;
                }
            }
        }
    }

    async fn health_loop(&self, shutdown: &mut broadcast::Receiver<()>) {
        let mut interval = tokio::time::interval(std::time::Duration::from_secs(10));
        loop {
            tokio::select! {
                _ = interval.tick() => {
                    let (frozen, _) = self.nav.is_frozen();
                    self.observability.health().report(
                        "nav",
                        if frozen { HealthStatus::Degraded } else { HealthStatus::Healthy },
                    );

                    let cb_status = match self.circuit_breaker.state() {
                        crate::circuit_breaker::CbState::Emergency => HealthStatus::Unhealthy,
                        crate::circuit_breaker::CbState::Halted | crate::circuit_breaker::CbState::CoolingOff => {
                            HealthStatus::Degraded
                        }
                        _ => HealthStatus::Healthy,
                    };
                    self.observability.health().report("circuit_breaker", cb_status);

                    if self.circuit_breaker.write_failure_count() > 0 {
                        warn!(
                            "circuit breaker event log has {} write failures",
                            self.circuit_breaker.write_failure_count()
                        );
                    }
                }
                _ = shutdown.recv() => {
                    info!("health loop shutting down");
                    return;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::test_support::{FakeAlertsSink, FakeOutboxWriter, FakePortfolioStore, FakeQuoteAdapter};

    fn core() -> Arc<RiskCore> {
        let mut settings = RiskCoreSettings::default();
        settings.data_dir = std::env::temp_dir()
            .join(format!("risk_core_manager_test_{}", uuid::Uuid::new_v4()))
            .to_string_lossy()
            .into_owned();
        settings.nav_tick_interval_secs = 1;

        Arc::new(RiskCore::new(
            &settings,
            Arc::new(FakeQuoteAdapter::default()),
            Arc::new(FakePortfolioStore::new(100_000.0)),
            Arc::new(FakeOutboxWriter::default()),
            Arc::new(FakeAlertsSink::default()),
        ))
    }

    #[tokio::test]
    async fn run_exits_promptly_on_shutdown() {
        let core = core();
        let (tx, rx) = broadcast::channel(1);
        let handle = tokio::spawn(core.run(rx));
        tx.send(()).unwrap();
        tokio::time::timeout(std::time::Duration::from_secs(2), handle)
            .await
            .expect("run did not exit after shutdown signal")
            .unwrap();
    }

    #[tokio::test]
    async fn sub_components_are_reachable_after_construction() {
        let core = core();
        assert_eq!(core.circuit_breaker.state(), crate::circuit_breaker::CbState::Normal);
        let (nav, _, _) = core.nav.current_nav();
        assert_eq!(nav, 0.0);
    }
}
