//! Trading policy — risk gating, direction selection, and the session
//! circuit breaker. Pure decision logic; no broker I/O happens here.

pub mod breaker;
pub mod direction;
pub mod risk;

pub use breaker::{BreakerTrip, CircuitBreaker};
pub use direction::{DirectionMode, DirectionPolicy};
pub use risk::{BlockReason, RiskDecision, RiskGate, RiskLimits, RiskState};
