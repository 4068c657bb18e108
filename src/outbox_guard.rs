//! Outbox Guard (spec.md §4.7).
//!
//! At order send time, strictly later than decision time, re-validates the
//! order against a fresh quote before it reaches the outbox. Reapplies the
//! `check_order` sequential-deny idiom from
//! `services/risk-manager/src/lib.rs` a second time, against current rather
//! than decision-time prices.

use crate::caps::PositionCaps;
use crate::decision::DecisionResult;
use crate::errors::OutboxGuardError;
use crate::interfaces::{Order, OutboxWriter};
use crate::types::TradingIntent;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct OutboxGuardConfig {
    pub max_drift_pct: f64,
    pub max_staleness: chrono::Duration,
}

impl Default for OutboxGuardConfig {
    fn default() -> Self {
        Self {
            max_drift_pct: 2.0,
            max_staleness: chrono::Duration::seconds(10),
        }
    }
}

/// Binds an approved decision to the exposure snapshot it was approved
/// against, so the guard's re-check has something to compare (spec.md §3
/// `OrderRequest`).
#[derive(Debug, Clone)]
pub struct OrderRequest {
    pub order_id: String,
    pub intent: TradingIntent,
    pub decision_time: DateTime<Utc>,
    pub decision_mid: f64,
    pub size_multiplier: f64,
}

impl OrderRequest {
    pub fn from_decision(order_id: String, decision_mid: f64, result: &DecisionResult) -> Self {
        Self {
            order_id,
            intent: result.intent.clone(),
            decision_time: Utc::now(),
            decision_mid,
            size_multiplier: result.size_multiplier,
        }
    }
}

pub struct OutboxGuard {
    config: OutboxGuardConfig,
    quotes: Arc<dyn crate::interfaces::QuoteAdapter>,
    caps: Arc<PositionCaps>,
    outbox: Arc<dyn OutboxWriter>,
}

impl OutboxGuard {
    pub fn new(
        config: OutboxGuardConfig,
        quotes: Arc<dyn crate::interfaces::QuoteAdapter>,
        caps: Arc<PositionCaps>,
        outbox: Arc<dyn OutboxWriter>,
    ) -> Self {
        Self {
            config,
            quotes,
            caps,
            outbox,
        }
    }

    /// Re-validates and, if the checks pass, writes the order to the
    /// outbox (spec.md §4.7 "Checks, in order").
    pub async fn check_and_send(&self, req: &OrderRequest, nav: f64) -> Result<bool, OutboxGuardError> {
        let quote = match self.quotes.get_quote(&req.intent.symbol).await {
            Ok(Some(q)) => q,
            Ok(None) => {
                return self.deny(req, "quote_fetch_error").await;
            }
            Err(e) => {
                error!("outbox_guard: quote fetch failed for {}: {e}", req.intent.symbol);
                return self.deny(req, "quote_fetch_error").await;
            }
        };

        let Some(current_mid) = quote.mid() else {
            return self.deny(req, "quote_fetch_error").await;
        };

        if req.decision_mid != 0.0 {
            let drift_pct = (current_mid - req.decision_mid) / req.decision_mid * 100.0;
            if drift_pct.abs() > self.config.max_drift_pct {
                let reason = format!(
                    "price_drift_{:.2}_pct_exceeds_{:.2}",
                    drift_pct.abs(),
                    self.config.max_drift_pct
                );
                return self.deny(req, &reason).await;
            }
        }

        let staleness = Utc::now().signed_duration_since(req.decision_time);
        if staleness > self.config.max_staleness {
            let reason = format!(
                "staleness_{}s_exceeds_{}s",
                staleness.num_seconds(),
                self.config.max_staleness.num_seconds()
            );
            return self.deny(req, &reason).await;
        }

        let (allow, reason) = self
            .caps
            .can_increase(&req.intent, req.intent.quantity, current_mid, nav)
            .await
            .map_err(|e| OutboxGuardError::QuoteFetchError(e.to_string()))?;
        if !allow {
            let reason = format!("caps_recheck_{}", reason.unwrap_or_default());
            return self.deny(req, &reason).await;
        }

        let order = Order {
            id: req.order_id.clone(),
            symbol: req.intent.symbol.clone(),
            side: req.intent.side,
            intent: req.intent.kind,
            quantity: req.intent.quantity,
            ts: Utc::now(),
            status: crate::interfaces::OrderStatus::Pending,
            idempotency_key: req.order_id.clone(),
        };
        self.outbox
            .write_order(order)
            .await
            .map_err(|e| OutboxGuardError::WriteFailed(e.to_string()))?;
        Ok(true)
    }

    /// Writes a compensating cancellation record and logs a structured
    /// cancellation event (spec.md §4.7 "On deny").
    async fn deny(&self, req: &OrderRequest, reason: &str) -> Result<bool, OutboxGuardError> {
        info!("outbox_guard: denying order {} ({reason})", req.order_id);
        crate::metrics::record_outbox_denial(reason);
        let cancellation = Order {
            id: format!("{}_cancelled", req.order_id),
            symbol: req.intent.symbol.clone(),
            side: req.intent.side,
            intent: req.intent.kind,
            quantity: req.intent.quantity,
            ts: Utc::now(),
            status: crate::interfaces::OrderStatus::Cancelled,
            idempotency_key: format!("{}_cancelled", req.order_id),
        };
        self.outbox
            .write_order(cancellation)
            .await
            .map_err(|e| OutboxGuardError::WriteFailed(e.to_string()))?;
        info!(event = "paper_order_cancelled", order_id = %req.order_id, reason);
        Ok(false)
    }
}
