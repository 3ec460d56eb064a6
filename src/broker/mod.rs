//! Broker integrations.
//!
//! Defines the `BrokerAdapter` capability trait the pipeline drives, and
//! provides:
//! - `PaperBroker` — in-memory simulated broker for dry runs and demos
//!
//! Browser-automation adapters live outside this crate and plug in through
//! the same trait.

pub mod paper;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::time::Duration;

use crate::types::{AccountMode, AccountRead, Direction, TradeStats};

/// Abstraction over a broker's trading surface.
///
/// Operations report failure through `false`/`None` rather than errors.
/// Implementations are not expected to be safe for overlapping trade
/// sequences; the pipeline serializes attempts before calling in.
#[async_trait]
pub trait BrokerAdapter: Send + Sync {
    /// Make sure a logged-in session is open.
    async fn ensure_logged_in(&self) -> bool;

    /// Switch the trading panel to an asset pair.
    async fn select_pair(&self, pair: &str) -> bool;

    /// Enter the stake amount.
    async fn set_amount(&self, amount: Decimal) -> bool;

    /// Enter the expiry duration token (e.g. "00:00:15").
    async fn set_expiry(&self, expiry: &str) -> bool;

    /// Click buy or sell. Returns whether the click was confirmed.
    async fn place_trade(&self, direction: Direction) -> bool;

    /// Live-account balance, if visible.
    async fn read_balance(&self) -> Option<Decimal>;

    /// Whether the broker page is responsive.
    async fn health_check(&self) -> bool;

    /// Turn on the broker's own AI trading toggle.
    async fn activate_ai_trading(&self) -> bool {
        false
    }

    /// Expiry currently shown on the trading panel.
    async fn read_expiry(&self) -> Option<Duration> {
        None
    }

    /// Demo-account balance, if visible.
    async fn read_demo_balance(&self) -> Option<Decimal> {
        None
    }

    async fn read_account_mode(&self) -> AccountMode {
        AccountMode::Unknown
    }

    async fn read_trade_stats(&self) -> Option<TradeStats> {
        None
    }

    /// Broker name for logging and identification.
    fn name(&self) -> &str;
}

/// Read everything the account snapshot is built from.
pub async fn read_account(broker: &dyn BrokerAdapter) -> AccountRead {
    let mode = broker.read_account_mode().await;
    let live_balance = broker.read_balance().await;
    let demo_balance = broker.read_demo_balance().await;
    let stats = broker.read_trade_stats().await;

    AccountRead {
        mode,
        live_balance,
        demo_balance,
        stats,
    }
}
