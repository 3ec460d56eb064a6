//! Configuration loading from TOML.
//!
//! Reads `config.toml` and deserializes into strongly-typed structs.
//! Session inputs are kept as raw text here; the session validates them
//! before any broker call, the same way an operator's typed values are.

use anyhow::{Context, Result};
use rust_decimal::prelude::*;
use serde::Deserialize;
use std::fs;
use std::time::Duration;

use crate::engine::session::SessionInputs;
use crate::strategy::risk::RiskLimits;

/// Top-level application configuration.
#[derive(Debug, Deserialize, Clone)]
pub struct AppConfig {
    pub agent: AgentConfig,
    #[serde(default)]
    pub risk: RiskConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub paper: PaperConfig,
    #[serde(default)]
    pub dashboard: DashboardConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct AgentConfig {
    pub name: String,
    /// JSON-lines file of signals to replay into the queue.
    #[serde(default)]
    pub signal_feed: Option<String>,
    /// Enable queue-driven trading at start-up.
    #[serde(default)]
    pub auto_trade: bool,
    /// Amount recorded on coordinator trade logs.
    #[serde(default)]
    pub trade_amount: f64,
}

#[derive(Debug, Deserialize, Clone)]
pub struct RiskConfig {
    pub cooldown_secs: u64,
    pub max_daily_loss: f64,
    pub max_consecutive_losses: u32,
    pub max_trades_per_day: u32,
}

impl Default for RiskConfig {
    fn default() -> Self {
        Self {
            cooldown_secs: 5,
            max_daily_loss: 100.0,
            max_consecutive_losses: 5,
            max_trades_per_day: 100,
        }
    }
}

impl RiskConfig {
    /// Convert to the limits the risk gate enforces.
    pub fn limits(&self) -> RiskLimits {
        RiskLimits {
            cooldown: Duration::from_secs(self.cooldown_secs),
            max_daily_loss: Decimal::from_f64(self.max_daily_loss).unwrap_or(Decimal::ZERO),
            max_consecutive_losses: self.max_consecutive_losses,
            max_trades_per_day: self.max_trades_per_day,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct SessionConfig {
    /// Start the auto-trade session as soon as the pipeline is up.
    #[serde(default)]
    pub autostart: bool,
    pub stake: String,
    pub expiry: String,
    pub stop_loss: String,
    pub take_profit: String,
    #[serde(default)]
    pub ai_mode: bool,
    /// Seed for the randomized direction policy; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            autostart: false,
            stake: "1.00".into(),
            expiry: "00:00:15".into(),
            stop_loss: "0.00".into(),
            take_profit: "0.00".into(),
            ai_mode: false,
            seed: None,
        }
    }
}

impl SessionConfig {
    pub fn inputs(&self) -> SessionInputs {
        SessionInputs {
            stake: self.stake.clone(),
            expiry: self.expiry.clone(),
            stop_loss: self.stop_loss.clone(),
            take_profit: self.take_profit.clone(),
            ai_mode: self.ai_mode,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PollingConfig {
    pub interval_secs: u64,
    pub error_backoff_secs: u64,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            error_backoff_secs: 3,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct PaperConfig {
    pub initial_balance: f64,
    /// Payout on a winning trade, as a fraction of the stake.
    pub payout_pct: f64,
    pub win_probability: f64,
    #[serde(default)]
    pub seed: Option<u64>,
}

impl Default for PaperConfig {
    fn default() -> Self {
        Self {
            initial_balance: 10_000.0,
            payout_pct: 0.92,
            win_probability: 0.5,
            seed: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct DashboardConfig {
    pub enabled: bool,
    pub port: u16,
}

impl Default for DashboardConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            port: 8088,
        }
    }
}

impl AppConfig {
    /// Load configuration from a TOML file.
    pub fn load(path: &str) -> Result<Self> {
        let contents = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {path}"))?;
        Self::parse(&contents).with_context(|| format!("Failed to parse config file: {path}"))
    }

    /// Parse configuration from TOML text.
    pub fn parse(contents: &str) -> Result<Self> {
        let config: AppConfig = toml::from_str(contents)?;
        Ok(config)
    }

    /// Amount recorded on coordinator trade logs.
    pub fn trade_amount(&self) -> Decimal {
        Decimal::from_f64(self.agent.trade_amount).unwrap_or(Decimal::ZERO)
    }
}
