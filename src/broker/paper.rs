//! Paper broker.
//!
//! Simulates a binary-options demo account in memory. Trades settle the
//! moment they are placed: a seeded draw decides win or loss, a win pays
//! the stake back plus `payout_pct` of it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal::prelude::*;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::broker::BrokerAdapter;
use crate::config::PaperConfig;
use crate::types::{parse_expiry, AccountMode, Direction, TradeStats};

/// One simulated order.
#[derive(Debug, Clone)]
pub struct PaperOrder {
    pub order_id: String,
    pub pair: String,
    pub direction: Direction,
    pub amount: Decimal,
    pub won: bool,
    pub timestamp: DateTime<Utc>,
}

struct PaperState {
    balance: Decimal,
    pair: Option<String>,
    amount: Decimal,
    expiry: Option<Duration>,
    ai_trading: bool,
    wins: u32,
    losses: u32,
    orders: Vec<PaperOrder>,
    rng: StdRng,
}

pub struct PaperBroker {
    payout_pct: Decimal,
    win_probability: f64,
    state: Mutex<PaperState>,
}

impl PaperBroker {
    pub fn new(config: &PaperConfig) -> Self {
        let rng = match config.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            payout_pct: Decimal::from_f64(config.payout_pct).unwrap_or(Decimal::ZERO),
            win_probability: config.win_probability.clamp(0.0, 1.0),
            state: Mutex::new(PaperState {
                balance: Decimal::from_f64(config.initial_balance).unwrap_or(Decimal::ZERO),
                pair: None,
                amount: Decimal::ONE,
                expiry: None,
                ai_trading: false,
                wins: 0,
                losses: 0,
                orders: Vec::new(),
                rng,
            }),
        }
    }

    /// All simulated orders so far.
    pub fn orders(&self) -> Vec<PaperOrder> {
        self.lock().orders.clone()
    }

    pub fn ai_trading_active(&self) -> bool {
        self.lock().ai_trading
    }

    fn lock(&self) -> MutexGuard<'_, PaperState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[async_trait]
impl BrokerAdapter for PaperBroker {
    async fn ensure_logged_in(&self) -> bool {
        true
    }

    async fn select_pair(&self, pair: &str) -> bool {
        self.lock().pair = Some(pair.to_string());
        debug!(pair, "[PAPER] Pair selected");
        true
    }

    async fn set_amount(&self, amount: Decimal) -> bool {
        if amount <= Decimal::ZERO {
            return false;
        }
        self.lock().amount = amount;
        true
    }

    async fn set_expiry(&self, expiry: &str) -> bool {
        match parse_expiry(expiry) {
            Some(duration) => {
                self.lock().expiry = Some(duration);
                true
            }
            None => false,
        }
    }

    async fn place_trade(&self, direction: Direction) -> bool {
        let mut state = self.lock();
        let amount = state.amount;

        if state.balance < amount {
            warn!(
                balance = %state.balance,
                amount = %amount,
                "[PAPER] Insufficient balance, trade rejected"
            );
            return false;
        }

        let won = state.rng.gen_bool(self.win_probability);
        state.balance -= amount;
        if won {
            state.balance += amount + amount * self.payout_pct;
            state.wins += 1;
        } else {
            state.losses += 1;
        }

        let order = PaperOrder {
            order_id: format!("paper-{}", uuid::Uuid::new_v4()),
            pair: state.pair.clone().unwrap_or_else(|| "UNSELECTED".to_string()),
            direction,
            amount,
            won,
            timestamp: Utc::now(),
        };
        info!(
            order_id = %order.order_id,
            pair = %order.pair,
            direction = %direction,
            amount = format!("${:.2}", amount),
            won,
            balance = format!("${:.2}", state.balance),
            "[PAPER] Trade settled"
        );
        state.orders.push(order);
        true
    }

    async fn read_balance(&self) -> Option<Decimal> {
        None
    }

    async fn health_check(&self) -> bool {
        true
    }

    async fn activate_ai_trading(&self) -> bool {
        self.lock().ai_trading = true;
        true
    }

    async fn read_expiry(&self) -> Option<Duration> {
        self.lock().expiry
    }

    async fn read_demo_balance(&self) -> Option<Decimal> {
        Some(self.lock().balance)
    }

    async fn read_account_mode(&self) -> AccountMode {
        AccountMode::Demo
    }

    async fn read_trade_stats(&self) -> Option<TradeStats> {
        let state = self.lock();
        let closed = state.wins + state.losses;
        let win_rate = if closed > 0 {
            Decimal::from(state.wins) * Decimal::ONE_HUNDRED / Decimal::from(closed)
        } else {
            Decimal::ZERO
        };
        Some(TradeStats {
            open_trades: 0,
            closed_trades: closed,
            wins: state.wins,
            losses: state.losses,
            win_rate,
        })
    }

    fn name(&self) -> &str {
        "paper"
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
