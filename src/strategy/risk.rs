//! Risk gate.
//!
//! The only component allowed to approve or block a trade attempt. Owns the
//! daily counters behind a mutex; nothing outside this module writes them.
//! Every method is total: a poisoned lock is recovered, never propagated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde::Serialize;
use std::fmt;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info};

use crate::types::{TradeLog, TradeResult};

// ---------------------------------------------------------------------------
// Limits
// ---------------------------------------------------------------------------

/// Limits enforced by the gate. Fixed for the lifetime of a session.
#[derive(Debug, Clone, PartialEq)]
pub struct RiskLimits {
    /// Minimum time between consecutive attempts.
    pub cooldown: Duration,
    pub max_daily_loss: Decimal,
    pub max_consecutive_losses: u32,
    pub max_trades_per_day: u32,
}

impl Default for RiskLimits {
    fn default() -> Self {
        Self {
            cooldown: Duration::from_secs(5),
            max_daily_loss: dec!(100),
            max_consecutive_losses: 5,
            max_trades_per_day: 100,
        }
    }
}

// ---------------------------------------------------------------------------
// State and decisions
// ---------------------------------------------------------------------------

/// Counters the gate decides on.
#[derive(Debug, Clone, PartialEq, Serialize, Default)]
pub struct RiskState {
    pub last_attempt_utc: Option<DateTime<Utc>>,
    pub trades_today: u32,
    pub consecutive_losses: u32,
    /// Always >= 0; grows only on losses.
    pub daily_loss: Decimal,
}

/// Why the gate refused an attempt. Variants are listed in check order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockReason {
    Cooldown,
    MaxDailyLoss,
    MaxConsecutiveLosses,
    MaxTradesPerDay,
}

impl fmt::Display for BlockReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockReason::Cooldown => write!(f, "Risk gate: cooldown active."),
            BlockReason::MaxDailyLoss => write!(f, "Risk gate: max daily loss reached."),
            BlockReason::MaxConsecutiveLosses => {
                write!(f, "Risk gate: max consecutive losses reached.")
            }
            BlockReason::MaxTradesPerDay => write!(f, "Risk gate: max trades per day reached."),
        }
    }
}

/// Outcome of a gate check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RiskDecision {
    Allowed,
    Blocked(BlockReason),
}

impl RiskDecision {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RiskDecision::Allowed)
    }
}

impl fmt::Display for RiskDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RiskDecision::Allowed => write!(f, "Risk gate: pass."),
            RiskDecision::Blocked(reason) => write!(f, "{reason}"),
        }
    }
}

// ---------------------------------------------------------------------------
// Gate
// ---------------------------------------------------------------------------

pub struct RiskGate {
    limits: RiskLimits,
    state: Mutex<RiskState>,
}

impl RiskGate {
    pub fn new(limits: RiskLimits) -> Self {
        Self {
            limits,
            state: Mutex::new(RiskState::default()),
        }
    }

    pub fn limits(&self) -> &RiskLimits {
        &self.limits
    }

    /// Copy of the current counters.
    pub fn snapshot(&self) -> RiskState {
        self.lock().clone()
    }

    /// Check whether a new attempt may proceed right now.
    pub fn can_execute(&self) -> RiskDecision {
        self.can_execute_at(Utc::now())
    }

    /// Check against an explicit clock reading.
    ///
    /// Order: cooldown, daily loss, consecutive losses, daily trade count.
    pub fn can_execute_at(&self, now: DateTime<Utc>) -> RiskDecision {
        let state = self.lock();
        let limits = &self.limits;

        if let Some(last) = state.last_attempt_utc {
            let elapsed = (now - last).to_std().unwrap_or(Duration::ZERO);
            if elapsed < limits.cooldown {
                return RiskDecision::Blocked(BlockReason::Cooldown);
            }
        }

        if state.daily_loss >= limits.max_daily_loss {
            return RiskDecision::Blocked(BlockReason::MaxDailyLoss);
        }

        if state.consecutive_losses >= limits.max_consecutive_losses {
            return RiskDecision::Blocked(BlockReason::MaxConsecutiveLosses);
        }

        if state.trades_today >= limits.max_trades_per_day {
            return RiskDecision::Blocked(BlockReason::MaxTradesPerDay);
        }

        RiskDecision::Allowed
    }

    /// Record an attempt before dispatch. Consumes cooldown and daily budget
    /// whether or not the attempt later succeeds.
    pub fn register_attempt(&self) {
        self.register_attempt_at(Utc::now());
    }

    pub fn register_attempt_at(&self, now: DateTime<Utc>) {
        let mut state = self.lock();
        state.last_attempt_utc = Some(now);
        state.trades_today = state.trades_today.saturating_add(1);
        debug!(trades_today = state.trades_today, "Attempt registered");
    }

    /// Fold a trade outcome into the loss counters.
    pub fn register_result(&self, log: &TradeLog) {
        let mut state = self.lock();
        match log.result {
            TradeResult::Lost => {
                state.consecutive_losses = state.consecutive_losses.saturating_add(1);
                state.daily_loss += log.profit.abs();
                debug!(
                    consecutive_losses = state.consecutive_losses,
                    daily_loss = %state.daily_loss,
                    "Loss registered"
                );
            }
            TradeResult::Won => {
                state.consecutive_losses = 0;
            }
            TradeResult::Pending | TradeResult::Cancelled => {}
        }
    }

    /// Zero the daily counters. Called by an external day-boundary trigger.
    pub fn reset_daily_counters(&self) {
        let mut state = self.lock();
        state.trades_today = 0;
        state.consecutive_losses = 0;
        state.daily_loss = Decimal::ZERO;
        info!("Daily risk counters reset");
    }

    fn lock(&self) -> MutexGuard<'_, RiskState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
