//! Stop-loss / take-profit circuit breaker for the auto-trade session.

use rust_decimal::Decimal;
use std::fmt;

/// Session P&L thresholds. Zero disables a side.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CircuitBreaker {
    pub stop_loss: Decimal,
    pub take_profit: Decimal,
}

/// Why the breaker tripped, with the P&L that tripped it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerTrip {
    TakeProfit { pnl: Decimal },
    StopLoss { pnl: Decimal },
}

impl fmt::Display for BreakerTrip {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BreakerTrip::TakeProfit { pnl } => {
                write!(f, "Take Profit reached (+${:.2}). AutoTrade stopped.", pnl)
            }
            BreakerTrip::StopLoss { pnl } => {
                write!(f, "Stop Loss reached (${:.2}). AutoTrade stopped.", pnl)
            }
        }
    }
}

impl CircuitBreaker {
    pub fn new(stop_loss: Decimal, take_profit: Decimal) -> Self {
        Self { stop_loss, take_profit }
    }

    /// True when both thresholds are zero.
    pub fn is_disabled(&self) -> bool {
        self.stop_loss.is_zero() && self.take_profit.is_zero()
    }

    /// Evaluate session P&L. Take-profit is checked before stop-loss.
    pub fn evaluate(&self, start_balance: Decimal, current_balance: Decimal) -> Option<BreakerTrip> {
        let pnl = current_balance - start_balance;

        if self.take_profit > Decimal::ZERO && pnl >= self.take_profit {
            return Some(BreakerTrip::TakeProfit { pnl });
        }

        if self.stop_loss > Decimal::ZERO && pnl <= -self.stop_loss {
            return Some(BreakerTrip::StopLoss { pnl });
        }

        None
    }
}
