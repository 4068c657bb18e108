//! Component-local error types.
//!
//! Each sub-component gets its own `thiserror` enum for internal fallible
//! operations (mostly persistence and quote fetch). The Decision Engine never
//! forwards these to callers: it converts them into a denial reason tagged
//! `<gate>_error` (spec.md §7 "Propagation").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum NavError {
    #[error("quote fetch failed for {symbol}: {reason}")]
    QuoteFetch { symbol: String, reason: String },

    #[error("persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum CircuitBreakerError {
    #[error("event log write failed: {0}")]
    EventLogWrite(String),

    #[error("event log read failed: {0}")]
    EventLogRead(String),

    #[error("insufficient approvals: required {required:?}, got {got:?}")]
    InsufficientApprovals {
        required: Vec<String>,
        got: Vec<String>,
    },

    #[error("recovery not allowed from state {0:?}")]
    RecoveryNotAllowed(String),
}

#[derive(Debug, Error)]
pub enum CapsError {
    #[error("quote fetch failed for {symbol}: {reason}")]
    QuoteFetch { symbol: String, reason: String },

    #[error("persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum CooldownError {
    #[error("persistence failed: {0}")]
    Persistence(String),
}

#[derive(Debug, Error)]
pub enum OutboxGuardError {
    #[error("quote fetch failed: {0}")]
    QuoteFetchError(String),

    #[error("outbox write failed: {0}")]
    WriteFailed(String),
}
