//! Shared types for the trading pipeline.
//!
//! These types form the data model used across all modules. Signals and
//! trade logs are immutable values; the account snapshot is replaced
//! wholesale on every refresh rather than mutated in place.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;

// ---------------------------------------------------------------------------
// Enums
// ---------------------------------------------------------------------------

/// Trade direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    Buy,
    Sell,
}

impl Direction {
    /// The opposite direction.
    pub fn opposite(&self) -> Self {
        match self {
            Direction::Buy => Direction::Sell,
            Direction::Sell => Direction::Buy,
        }
    }

    /// Lower-case token the broker surface expects ("buy" / "sell").
    pub fn as_broker_str(&self) -> &'static str {
        match self {
            Direction::Buy => "buy",
            Direction::Sell => "sell",
        }
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Direction::Buy => write!(f, "BUY"),
            Direction::Sell => write!(f, "SELL"),
        }
    }
}

impl std::str::FromStr for Direction {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "buy" | "call" | "up" => Ok(Direction::Buy),
            "sell" | "put" | "down" => Ok(Direction::Sell),
            other => Err(anyhow::anyhow!("Unknown direction: {other}")),
        }
    }
}

/// How confident the signal source is in a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum Strength {
    Weak,
    #[default]
    Medium,
    Strong,
}

impl fmt::Display for Strength {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strength::Weak => write!(f, "Weak"),
            Strength::Medium => write!(f, "Medium"),
            Strength::Strong => write!(f, "Strong"),
        }
    }
}

/// Settlement state of a trade.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TradeResult {
    Pending,
    Won,
    Lost,
    Cancelled,
}

impl fmt::Display for TradeResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TradeResult::Pending => write!(f, "Pending"),
            TradeResult::Won => write!(f, "Won"),
            TradeResult::Lost => write!(f, "Lost"),
            TradeResult::Cancelled => write!(f, "Cancelled"),
        }
    }
}

/// Which broker account the page is currently showing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AccountMode {
    Demo,
    Live,
    #[default]
    Unknown,
}

// ---------------------------------------------------------------------------
// Signal
// ---------------------------------------------------------------------------

/// An external trade recommendation. Never mutated once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Signal {
    pub pair: String,
    pub direction: Direction,
    pub strength: Strength,
    /// Broker duration token, e.g. "00:00:15".
    pub expiry: String,
    pub source: String,
    pub timestamp_utc: DateTime<Utc>,
}

impl fmt::Display for Signal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} exp={} ({}, {})",
            self.pair, self.direction, self.expiry, self.strength, self.source
        )
    }
}

impl Signal {
    pub fn new(
        pair: impl Into<String>,
        direction: Direction,
        expiry: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            pair: pair.into(),
            direction,
            strength: Strength::default(),
            expiry: expiry.into(),
            source: source.into(),
            timestamp_utc: Utc::now(),
        }
    }

    /// A signal is tradeable only when pair, expiry and source are all present.
    pub fn is_well_formed(&self) -> bool {
        !self.pair.trim().is_empty()
            && !self.expiry.trim().is_empty()
            && !self.source.trim().is_empty()
    }

    /// Replace an unset (epoch) timestamp with the current time.
    pub fn with_default_timestamp(mut self) -> Self {
        if self.timestamp_utc.timestamp() == 0 {
            self.timestamp_utc = Utc::now();
        }
        self
    }
}

/// Parse a broker duration token in strict `HH:MM:SS` form.
pub fn parse_expiry(token: &str) -> Option<Duration> {
    let parts: Vec<&str> = token.trim().split(':').collect();
    if parts.len() != 3 || parts.iter().any(|p| p.len() != 2 || !p.bytes().all(|b| b.is_ascii_digit())) {
        return None;
    }
    let hours: u64 = parts[0].parse().ok()?;
    let minutes: u64 = parts[1].parse().ok()?;
    let seconds: u64 = parts[2].parse().ok()?;
    if hours > 23 || minutes > 59 || seconds > 59 {
        return None;
    }
    Some(Duration::from_secs(hours * 3600 + minutes * 60 + seconds))
}

// ---------------------------------------------------------------------------
// Trade log
// ---------------------------------------------------------------------------

/// Record of one executed trade attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TradeLog {
    pub pair: String,
    pub direction: Direction,
    pub amount: Decimal,
    pub expiry: String,
    pub result: TradeResult,
    /// Signed profit; negative for a loss.
    pub profit: Decimal,
    pub timestamp_utc: DateTime<Utc>,
}

impl fmt::Display for TradeLog {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} {} ${:.2} exp={} → {} ({:.2})",
            self.pair, self.direction, self.amount, self.expiry, self.result, self.profit
        )
    }
}

impl TradeLog {
    /// A freshly placed trade whose outcome is not known yet.
    pub fn pending(signal: &Signal, amount: Decimal) -> Self {
        Self {
            pair: signal.pair.clone(),
            direction: signal.direction,
            amount,
            expiry: signal.expiry.clone(),
            result: TradeResult::Pending,
            profit: Decimal::ZERO,
            timestamp_utc: Utc::now(),
        }
    }
}

// ---------------------------------------------------------------------------
// Account snapshot
// ---------------------------------------------------------------------------

/// Trade counters as displayed by the broker.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub struct TradeStats {
    pub open_trades: u32,
    pub closed_trades: u32,
    pub wins: u32,
    pub losses: u32,
    /// Win rate in percent.
    pub win_rate: Decimal,
}

/// One raw read of the account surface.
#[derive(Debug, Clone, Default)]
pub struct AccountRead {
    pub mode: AccountMode,
    pub live_balance: Option<Decimal>,
    pub demo_balance: Option<Decimal>,
    pub stats: Option<TradeStats>,
}

/// Latest known account state. Published by atomic replace.
#[derive(Debug, Clone, Serialize, Default)]
pub struct AccountSnapshot {
    pub mode: AccountMode,
    pub live_balance: Option<Decimal>,
    pub demo_balance: Option<Decimal>,
    pub stats: Option<TradeStats>,
    pub login_detected: bool,
    pub updated_at: Option<DateTime<Utc>>,
}

impl AccountSnapshot {
    /// Fold a fresh read into the previous snapshot, producing a new one.
    ///
    /// Demo mode clears the live balance; values missing from the read keep
    /// their previous value.
    pub fn merge(&self, read: &AccountRead) -> Self {
        let is_demo = read.mode == AccountMode::Demo;
        let live_balance = match (is_demo, read.live_balance) {
            (false, Some(live)) => Some(live),
            (true, _) => None,
            (false, None) => self.live_balance,
        };

        Self {
            mode: read.mode,
            live_balance,
            demo_balance: read.demo_balance.or(self.demo_balance),
            stats: read.stats.or(self.stats),
            login_detected: read.live_balance.is_some() || read.demo_balance.is_some(),
            updated_at: Some(Utc::now()),
        }
    }

    /// Balance the circuit breaker tracks: demo if known, otherwise live.
    pub fn tracked_balance(&self) -> Option<Decimal> {
        self.demo_balance.or(self.live_balance)
    }
}

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Rejected session input. Raised before any broker call is made.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("Invalid stake amount. Enter a numeric value (e.g. 2.5).")]
    InvalidStake,

    #[error("Invalid expiration format. Use HH:mm:ss (e.g. 00:00:15).")]
    InvalidExpiry,

    #[error("Invalid stop loss value. Use a number like 10.00 (or 0 to disable).")]
    InvalidStopLoss,

    #[error("Invalid take profit value. Use a number like 15.00 (or 0 to disable).")]
    InvalidTakeProfit,
}

/// Pipeline-level failures surfaced to callers of the public API.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    #[error("Signal queue has been shut down")]
    QueueClosed,

    #[error("Broker is owned by another trading path: {0}")]
    BrokerBusy(String),

    #[error("Auto-trade session is already running")]
    SessionActive,

    #[error("Broker health check failed")]
    BrokerUnhealthy,

    #[error("Session start aborted: {0}")]
    StartAborted(String),

    #[error("Unexpected fault: {0}")]
    Unexpected(String),
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
