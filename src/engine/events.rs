//! Pipeline event bus.
//!
//! Every observable step (feed signals, coordinator steps, trade logs,
//! session transitions, account refreshes) is published here. Subscribers
//! receive events in publish order; dropping a receiver unsubscribes it.

use tokio::sync::broadcast;

use crate::engine::session::SessionState;
use crate::strategy::risk::BlockReason;
use crate::types::{AccountSnapshot, Signal, TradeLog};

/// Events retained per subscriber before the slowest one starts lagging.
const EVENT_BUFFER: usize = 1024;

/// One broker step in a coordinator trade attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TradeStep {
    EnsureLoggedIn,
    SelectPair,
    SetExpiry,
    PlaceTrade,
}

impl std::fmt::Display for TradeStep {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TradeStep::EnsureLoggedIn => write!(f, "ensure_logged_in"),
            TradeStep::SelectPair => write!(f, "select_pair"),
            TradeStep::SetExpiry => write!(f, "set_expiry"),
            TradeStep::PlaceTrade => write!(f, "place_trade"),
        }
    }
}

#[derive(Debug, Clone)]
pub enum PipelineEvent {
    /// Accepted signal, published for passive observers before any trading.
    SignalReceived(Signal),
    /// Malformed signal dropped by the queue.
    SignalRejected(Signal),
    /// Risk gate refused an attempt.
    RiskBlocked(BlockReason),
    /// A coordinator step finished.
    StepCompleted { step: TradeStep, ok: bool },
    /// Exactly one per executed attempt.
    TradeLogged(TradeLog),
    /// Free-form operator-facing status line.
    Status(String),
    SessionStateChanged(SessionState),
    /// Session ended on its own (breaker trip or aborted start).
    SessionStopped { reason: String },
    AccountUpdated(AccountSnapshot),
}

/// Cloneable handle to the broadcast channel.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<PipelineEvent>,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_BUFFER);
        Self { tx }
    }

    /// Publish to all current subscribers. No subscribers is not an error.
    pub fn publish(&self, event: PipelineEvent) {
        let _ = self.tx.send(event);
    }

    /// Publish a status line.
    pub fn status(&self, message: impl Into<String>) {
        self.publish(PipelineEvent::Status(message.into()));
    }

    /// Subscribe to events published from now on.
    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.tx.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}
