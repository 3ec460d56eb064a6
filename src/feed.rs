//! Signal feed reader.
//!
//! Signals arrive as JSON lines, one record per line:
//!
//! ```text
//! {"pair":"EUR/USD","direction":"Buy","strength":"Strong","expiry":"00:00:15","source":"telegram","timestampUtc":"2025-01-01T12:00:00Z"}
//! ```
//!
//! `strength` and `timestampUtc` may be omitted. Blank lines and lines
//! starting with `#` are skipped.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::Deserialize;
use std::path::Path;
use tracing::{info, warn};

use crate::types::{Direction, Signal, Strength};

/// Wire form of one feed record.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SignalRecord {
    pub pair: String,
    pub direction: String,
    #[serde(default)]
    pub strength: Option<Strength>,
    pub expiry: String,
    pub source: String,
    #[serde(default)]
    pub timestamp_utc: Option<DateTime<Utc>>,
}

impl SignalRecord {
    pub fn into_signal(self) -> Result<Signal> {
        let direction: Direction = self.direction.parse()?;
        let signal = Signal {
            pair: self.pair,
            direction,
            strength: self.strength.unwrap_or_default(),
            expiry: self.expiry,
            source: self.source,
            timestamp_utc: self.timestamp_utc.unwrap_or_else(Utc::now),
        };
        // An explicit epoch timestamp also means "unset".
        Ok(signal.with_default_timestamp())
    }
}

/// Parse one JSON line into a signal.
pub fn parse_line(line: &str) -> Result<Signal> {
    let record: SignalRecord =
        serde_json::from_str(line).context("Malformed signal record")?;
    record.into_signal()
}

/// Read every parseable signal from a JSON-lines file, in file order.
pub fn load_signals(path: impl AsRef<Path>) -> Result<Vec<Signal>> {
    let path = path.as_ref();
    let contents = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read signal feed: {}", path.display()))?;

    let mut signals = Vec::new();
    for (index, line) in contents.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        match parse_line(line) {
            Ok(signal) => signals.push(signal),
            Err(e) => warn!(line = index + 1, error = %e, "Skipping bad feed line"),
        }
    }

    info!(path = %path.display(), count = signals.len(), "Signal feed loaded");
    Ok(signals)
}
