//! Gate capability set (spec.md §4.6, §9 "Polymorphism").
//!
//! Gates share a single capability: a name, a priority, and an evaluation
//! outcome. The implementation set is closed and enumerated here as a tagged
//! variant type rather than an open trait-object hierarchy, per spec.md §9.
//! Generalizes the sequential `check_order` validation chain in
//! `services/risk-manager/src/lib.rs`.

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum GateKind {
    CircuitBreaker,
    DataQuality,
    Caps,
    Cooldown,
    Volatility,
}

impl GateKind {
    /// Ascending priority order; lower runs first (spec.md §4.6).
    pub const ORDER: [GateKind; 5] = [
        GateKind::CircuitBreaker,
        GateKind::DataQuality,
        GateKind::Caps,
        GateKind::Cooldown,
        GateKind::Volatility,
    ];

    pub fn name(self) -> &'static str {
        match self {
            GateKind::CircuitBreaker => "circuit_breaker",
            GateKind::DataQuality => "data_quality",
            GateKind::Caps => "caps",
            GateKind::Cooldown => "cooldown",
            GateKind::Volatility => "volatility",
        }
    }

    pub fn priority(self) -> u8 {
        match self {
            GateKind::CircuitBreaker => 1,
            GateKind::DataQuality => 2,
            GateKind::Caps => 3,
            GateKind::Cooldown => 4,
            GateKind::Volatility => 5,
        }
    }

    /// Volatility never blocks; it only scales size (spec.md §4.6).
    pub fn is_blocking(self) -> bool {
        !matches!(self, GateKind::Volatility)
    }
}

/// Outcome of evaluating one gate against a `DecisionContext`.
#[derive(Debug, Clone)]
pub enum GateOutcome {
    Allow,
    AllowWithWarning(String),
    Deny(String),
    /// A sub-component error; the engine converts this into a denial tagged
    /// `<gate>_error` (spec.md §7 "Propagation").
    Error(String),
}
