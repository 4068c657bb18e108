//! Layered configuration (spec.md §4.8, ambient).
//!
//! Defaults, overlaid by an optional config file, overlaid by
//! `RISK_CORE_*`-prefixed environment variables. Grounded on
//! `services/gateway/src/config.rs`'s `Config::builder()` pipeline.

use crate::caps::{CapsConfig, PositionCap};
use crate::circuit_breaker::{CircuitBreakerConfig, ThresholdTable};
use crate::cooldown::CooldownConfig;
use crate::decision::DecisionEngineConfig;
use crate::nav::NavTrackerConfig;
use crate::observability::{AlertThresholds, ObservabilityConfig};
use crate::outbox_guard::OutboxGuardConfig;
use crate::volatility::VolatilityConfig;
use serde::Deserialize;
use std::path::PathBuf;

/// Flat, `serde`-deserializable mirror of the runtime config tree. The
/// `config` crate materializes this from file + environment sources; `build`
/// then expands it into the strongly-typed config structs each component
/// actually takes.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RiskCoreSettings {
    pub data_dir: String,
    pub metrics_addr: String,

    pub nav_tick_interval_secs: u64,
    pub nav_staleness_threshold_secs: i64,
    pub nav_history_capacity: usize,

    pub cb_max_volatility_factor: f64,
    pub cb_cooldown_minutes: i64,
    pub cb_max_daily_halts: u32,
    pub cb_required_approvals: Vec<String>,

    pub caps_default_max_position_usd: f64,
    pub caps_default_max_portfolio_pct: f64,
    pub caps_default_max_daily_trades: u32,
    pub caps_enforce: bool,

    pub cooldown_default_secs: i64,
    pub cooldown_global_minimum_secs: i64,
    pub cooldown_enforce: bool,

    pub decision_min_quality_score: f64,
    pub decision_max_staleness_ms: i64,

    pub outbox_max_drift_pct: f64,
    pub outbox_max_staleness_secs: i64,

    pub alert_exposure_warning_pct: f64,
    pub alert_drawdown_warning_pct: f64,
    pub alert_loss_rate_warning: f64,
    pub alert_channel: String,
}

impl Default for RiskCoreSettings {
    fn default() -> Self {
        Self {
            data_dir: "data".to_string(),
            metrics_addr: "0.0.0.0:9190".to_string(),

            nav_tick_interval_secs: 1,
            nav_staleness_threshold_secs: 2,
            nav_history_capacity: 10_000,

            cb_max_volatility_factor: 2.0,
            cb_cooldown_minutes: 30,
            cb_max_daily_halts: 3,
            cb_required_approvals: Vec::new(),

            caps_default_max_position_usd: 50_000.0,
            caps_default_max_portfolio_pct: 15.0,
            caps_default_max_daily_trades: 20,
            caps_enforce: true,

            cooldown_default_secs: 60,
            cooldown_global_minimum_secs: 5,
            cooldown_enforce: true,

            decision_min_quality_score: 0.8,
            decision_max_staleness_ms: 2000,

            outbox_max_drift_pct: 2.0,
            outbox_max_staleness_secs: 10,

            alert_exposure_warning_pct: 80.0,
            alert_drawdown_warning_pct: 1.5,
            alert_loss_rate_warning: 0.5,
            alert_channel: "#risk-alerts".to_string(),
        }
    }
}

impl RiskCoreSettings {
    /// Loads defaults, then an optional file at `path`, then
    /// `RISK_CORE_*`-prefixed environment overrides (spec.md ambient config
    /// layering, after `services/gateway/src/config.rs::from_file`).
    pub fn load(path: Option<&str>) -> anyhow::Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = path {
            builder = builder.add_source(config::File::with_name(path).required(false));
        }
        builder = builder.add_source(config::Environment::with_prefix("RISK_CORE"));
        let settings = builder.build()?;
        Ok(settings.try_deserialize()?)
    }

    pub fn nav_tracker_config(&self) -> NavTrackerConfig {
        NavTrackerConfig {
            tick_interval: std::time::Duration::from_secs(self.nav_tick_interval_secs),
            staleness_threshold: chrono::Duration::seconds(self.nav_staleness_threshold_secs),
            history_capacity: self.nav_history_capacity,
            state_path: PathBuf::from(&self.data_dir).join("nav_state.json"),
            ..NavTrackerConfig::default()
        }
    }

    pub fn circuit_breaker_config(&self) -> CircuitBreakerConfig {
        CircuitBreakerConfig {
            thresholds: ThresholdTable::default(),
            max_volatility_factor: self.cb_max_volatility_factor,
            cooldown_period: chrono::Duration::minutes(self.cb_cooldown_minutes),
            max_daily_halts: self.cb_max_daily_halts,
            required_approvals: self.cb_required_approvals.clone(),
            event_log_path: PathBuf::from(&self.data_dir).join("circuit_breaker_events.jsonl"),
            ..CircuitBreakerConfig::default()
        }
    }

    pub fn caps_config(&self) -> CapsConfig {
        CapsConfig {
            default_cap: PositionCap {
                max_position_usd: self.caps_default_max_position_usd,
                max_portfolio_pct: self.caps_default_max_portfolio_pct,
                max_daily_trades: self.caps_default_max_daily_trades,
            },
            enforce: self.caps_enforce,
            state_path: PathBuf::from(&self.data_dir).join("caps_state.json"),
            ..CapsConfig::default()
        }
    }

    pub fn cooldown_config(&self) -> CooldownConfig {
        CooldownConfig {
            default_period: chrono::Duration::seconds(self.cooldown_default_secs),
            global_minimum: chrono::Duration::seconds(self.cooldown_global_minimum_secs),
            enforce: self.cooldown_enforce,
            state_path: PathBuf::from(&self.data_dir).join("cooldown_state.json"),
            ..CooldownConfig::default()
        }
    }

    pub fn decision_engine_config(&self) -> DecisionEngineConfig {
        DecisionEngineConfig {
            min_quality_score: self.decision_min_quality_score,
            max_staleness_ms: self.decision_max_staleness_ms,
            ..DecisionEngineConfig::default()
        }
    }

    pub fn outbox_guard_config(&self) -> OutboxGuardConfig {
        OutboxGuardConfig {
            max_drift_pct: self.outbox_max_drift_pct,
            max_staleness: chrono::Duration::seconds(self.outbox_max_staleness_secs),
        }
    }

    pub fn observability_config(&self) -> ObservabilityConfig {
        ObservabilityConfig {
            thresholds: AlertThresholds {
                exposure_warning_pct: self.alert_exposure_warning_pct,
                drawdown_warning_pct: self.alert_drawdown_warning_pct,
                loss_rate_warning: self.alert_loss_rate_warning,
            },
            alert_channel: self.alert_channel.clone(),
            ..ObservabilityConfig::default()
        }
    }

    pub fn volatility_config(&self) -> VolatilityConfig {
        VolatilityConfig::default()
    }

    /// Path to the audit log (spec.md §6 "Persisted state layouts"),
    /// alongside the per-component state files under `data_dir`.
    pub fn audit_log_path(&self) -> PathBuf {
        PathBuf::from(&self.data_dir).join("audit_log.jsonl")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_load_without_a_file() {
        let settings = RiskCoreSettings::load(None).unwrap();
        assert_eq!(settings.data_dir, "data");
        assert_eq!(settings.cb_max_daily_halts, 3);
    }

    #[test]
    fn derived_configs_use_the_data_dir() {
        let mut settings = RiskCoreSettings::default();
        settings.data_dir = "/tmp/risk-core-test".to_string();
        let nav = settings.nav_tracker_config();
        assert_eq!(nav.state_path, PathBuf::from("/tmp/risk-core-test/nav_state.json"));
        assert_eq!(settings.audit_log_path(), PathBuf::from("/tmp/risk-core-test/audit_log.jsonl"));
    }
}
