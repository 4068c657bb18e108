//! Observability (spec.md §4.8).
//!
//! A structured event log distinct from the circuit breaker's event store,
//! an alert dispatcher with configurable thresholds, and a component health
//! registry. Grounded on `services/risk-manager/src/monitor.rs`'s
//! `AlertLevel`/`RiskAlert` shape and `services/risk-manager/src/config.rs`'s
//! `AlertThresholds`.

use crate::interfaces::AlertsSink;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Info,
    Warning,
    Critical,
    Error,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RiskEvent {
    pub ts: DateTime<Utc>,
    pub severity: Severity,
    pub source: String,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

#[derive(Debug, Clone)]
pub struct AlertThresholds {
    pub exposure_warning_pct: f64,
    pub drawdown_warning_pct: f64,
    pub loss_rate_warning: f64,
}

impl Default for AlertThresholds {
    fn default() -> Self {
        Self {
            exposure_warning_pct: 80.0,
            drawdown_warning_pct: 1.5,
            loss_rate_warning: 0.5,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ObservabilityConfig {
    pub thresholds: AlertThresholds,
    pub event_history_capacity: usize,
    pub alert_channel: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            thresholds: AlertThresholds::default(),
            event_history_capacity: 1_000,
            alert_channel: "#risk-alerts".to_string(),
        }
    }
}

/// Per-component health, reported by the orchestrator's background loops
/// (spec.md §4.8 "Component health").
pub struct ComponentHealth {
    statuses: RwLock<std::collections::BTreeMap<String, (HealthStatus, DateTime<Utc>)>>,
}

impl Default for ComponentHealth {
    fn default() -> Self {
        Self {
            statuses: RwLock::new(std::collections::BTreeMap::new()),
        }
    }
}

impl ComponentHealth {
    pub fn report(&self, component: &str, status: HealthStatus) {
        self.statuses
            .write()
            .insert(component.to_string(), (status, Utc::now()));
    }

    /// Worst status across all reported components; `Healthy` if none have
    /// reported yet.
    pub fn overall(&self) -> HealthStatus {
        self.statuses
            .read()
            .values()
            .map(|(s, _)| *s)
            .max_by_key(|s| match s {
                HealthStatus::Healthy => 0,
                HealthStatus::Degraded => 1,
                HealthStatus::Unhealthy => 2,
            })
            .unwrap_or(HealthStatus::Healthy)
    }

    pub fn snapshot(&self) -> std::collections::BTreeMap<String, (HealthStatus, DateTime<Utc>)> {
        self.statuses.read().clone()
    }
}

/// Bounded in-memory event log plus the alert dispatch path (spec.md §4.8).
pub struct Observability {
    config: ObservabilityConfig,
    events: RwLock<VecDeque<RiskEvent>>,
    alerts: Arc<dyn AlertsSink>,
    health: ComponentHealth,
}

impl Observability {
    pub fn new(config: ObservabilityConfig, alerts: Arc<dyn AlertsSink>) -> Self {
        Self {
            config,
            events: RwLock::new(VecDeque::new()),
            alerts,
            health: ComponentHealth::default(),
        }
    }

    pub fn health(&self) -> &ComponentHealth {
        &self.health
    }

    /// Records a structured event and logs it at the matching `tracing`
    /// level. Does not itself page anyone; call `alert` for that.
    pub fn record(&self, severity: Severity, source: &str, message: impl Into<String>) {
        let message = message.into();
        match severity {
            Severity::Info => info!(source, "{message}"),
            Severity::Warning => warn!(source, "{message}"),
            Severity::Critical | Severity::Error => error!(source, "{message}"),
        }

        let event = RiskEvent {
            ts: Utc::now(),
            severity,
            source: source.to_string(),
            message,
        };
        let mut events = self.events.write();
        if events.len() == self.config.event_history_capacity {
            events.pop_front();
        }
        events.push_back(event);
    }

    /// Records the event and, for `Critical`/`Error` severities, pushes it
    /// out through the alerts sink too (spec.md §4.8 "Alerting").
    pub async fn alert(&self, severity: Severity, source: &str, message: impl Into<String>) {
        let message = message.into();
        self.record(severity, source, message.clone());
        if matches!(severity, Severity::Critical | Severity::Error) {
            if let Err(e) = self
                .alerts
                .send_message(&self.config.alert_channel, &format!("[{source}] {message}"))
                .await
            {
                error!("observability: alert dispatch failed: {e}");
            }
        }
    }

    pub fn exposure_warning_exceeded(&self, exposure_pct: f64) -> bool {
        exposure_pct >= self.config.thresholds.exposure_warning_pct
    }

    pub fn drawdown_warning_exceeded(&self, drawdown_pct: f64) -> bool {
        drawdown_pct >= self.config.thresholds.drawdown_warning_pct
    }

    pub fn loss_rate_warning_exceeded(&self, loss_rate: f64) -> bool {
        loss_rate >= self.config.thresholds.loss_rate_warning
    }

    /// Copy of the last `n` recorded events, oldest first.
    pub fn recent_events(&self, n: usize) -> Vec<RiskEvent> {
        let events = self.events.read();
        let skip = events.len().saturating_sub(n);
        events.iter().skip(skip).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interfaces::test_support::FakeAlertsSink;

    fn observability() -> (Arc<FakeAlertsSink>, Observability) {
        let sink = Arc::new(FakeAlertsSink::default());
        (sink.clone(), Observability::new(ObservabilityConfig::default(), sink))
    }

    #[test]
    fn event_history_is_bounded() {
        let mut config = ObservabilityConfig::default();
        config.event_history_capacity = 2;
        let obs = Observability::new(config, Arc::new(FakeAlertsSink::default()));
        obs.record(Severity::Info, "nav", "tick 1");
        obs.record(Severity::Info, "nav", "tick 2");
        obs.record(Severity::Info, "nav", "tick 3");
        let recent = obs.recent_events(10);
        assert_eq!(recent.len(), 2);
        assert_eq!(recent[0].message, "tick 2");
    }

    #[tokio::test]
    async fn critical_events_dispatch_an_alert() {
        let (sink, obs) = observability();
        obs.alert(Severity::Critical, "circuit_breaker", "halted").await;
        assert_eq!(sink.messages.read().len(), 1);
    }

    #[tokio::test]
    async fn info_events_do_not_dispatch_an_alert() {
        let (sink, obs) = observability();
        obs.alert(Severity::Info, "nav", "tick").await;
        assert!(sink.messages.read().is_empty());
    }

    #[test]
    fn component_health_reports_worst_status() {
        let health = ComponentHealth::default();
        health.report("nav", HealthStatus::Healthy);
        health.report("circuit_breaker", HealthStatus::Degraded);
        assert_eq!(health.overall(), HealthStatus::Degraded);
        health.report("caps", HealthStatus::Unhealthy);
        assert_eq!(health.overall(), HealthStatus::Unhealthy);
    }

    #[test]
    fn threshold_checks() {
        let (_, obs) = observability();
        assert!(obs.exposure_warning_exceeded(85.0));
        assert!(!obs.exposure_warning_exceeded(50.0));
        assert!(obs.drawdown_warning_exceeded(2.0));
        assert!(obs.loss_rate_warning_exceeded(0.6));
    }
}
