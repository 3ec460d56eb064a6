//! Execution coordinator.
//!
//! Runs one trade attempt end to end: risk gate → register attempt →
//! ensure logged in → select pair → set expiry → place trade → pending
//! trade log. Steps are awaited one after another; a failed step ends the
//! attempt without undoing the steps before it.
//!
//! The coordinator takes no locks of its own. Callers (the queue consumer,
//! the pipeline) guarantee that attempts against one broker never overlap.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::sync::{Arc, Mutex};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::broker::BrokerAdapter;
use crate::engine::events::{EventBus, PipelineEvent, TradeStep};
use crate::engine::until_cancelled;
use crate::strategy::risk::{BlockReason, RiskDecision, RiskGate};
use crate::types::{Signal, TradeLog};

/// Fixed broker sequence for one attempt.
const STEPS: [TradeStep; 4] = [
    TradeStep::EnsureLoggedIn,
    TradeStep::SelectPair,
    TradeStep::SetExpiry,
    TradeStep::PlaceTrade,
];

// ---------------------------------------------------------------------------
// Outcome
// ---------------------------------------------------------------------------

/// How a single attempt ended.
#[derive(Debug, Clone, PartialEq)]
pub enum AttemptOutcome {
    /// Risk gate refused; nothing was touched.
    Blocked(BlockReason),
    /// All steps succeeded; the pending trade log that was emitted.
    Executed(TradeLog),
    /// A broker step returned false. Earlier steps stay applied.
    Failed(TradeStep),
    /// Stopped by `stop_all` or the caller's token.
    Cancelled,
}

// ---------------------------------------------------------------------------
// Handler seam
// ---------------------------------------------------------------------------

/// Whatever the signal queue hands accepted signals to.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait SignalHandler: Send + Sync {
    async fn handle(&self, signal: Signal, cancel: CancellationToken);
}

// ---------------------------------------------------------------------------
// Coordinator
// ---------------------------------------------------------------------------

pub struct ExecutionCoordinator {
    broker: Arc<dyn BrokerAdapter>,
    risk: Arc<RiskGate>,
    events: EventBus,
    /// Amount written on trade logs.
    trade_amount: Decimal,
    /// Current "cancel everything" context; replaced after each `stop_all`.
    pipeline_cancel: Mutex<CancellationToken>,
}

impl ExecutionCoordinator {
    pub fn new(broker: Arc<dyn BrokerAdapter>, risk: Arc<RiskGate>, events: EventBus) -> Self {
        Self {
            broker,
            risk,
            events,
            trade_amount: Decimal::ZERO,
            pipeline_cancel: Mutex::new(CancellationToken::new()),
        }
    }

    /// Record `amount` on trade logs instead of zero.
    pub fn with_trade_amount(mut self, amount: Decimal) -> Self {
        self.trade_amount = amount;
        self
    }

    /// Run one trade attempt for `signal`.
    ///
    /// Returns early with no side effects when the risk gate blocks. Once
    /// past the gate the attempt always counts against cooldown and the
    /// daily trade budget, whatever happens afterwards.
    pub async fn handle_signal(&self, signal: &Signal, cancel: &CancellationToken) -> AttemptOutcome {
        let pipeline = self.current_token();

        if let RiskDecision::Blocked(reason) = self.risk.can_execute() {
            info!(pair = %signal.pair, reason = %reason, "Signal skipped by risk gate");
            self.events.publish(PipelineEvent::RiskBlocked(reason));
            self.events.status(reason.to_string());
            return AttemptOutcome::Blocked(reason);
        }

        self.risk.register_attempt();
        info!(
            pair = %signal.pair,
            direction = %signal.direction,
            expiry = %signal.expiry,
            source = %signal.source,
            broker = self.broker.name(),
            "Processing signal"
        );
        self.events
            .status(format!("Processing signal {} {}.", signal.pair, signal.direction));

        for step in STEPS {
            let ok = match self.run_step(step, signal, &pipeline, cancel).await {
                Some(ok) => ok,
                None => {
                    warn!(pair = %signal.pair, step = %step, "Trade attempt cancelled");
                    self.events.status(format!("Trade attempt cancelled during {step}."));
                    return AttemptOutcome::Cancelled;
                }
            };

            debug!(pair = %signal.pair, step = %step, ok, "Broker step finished");
            self.events.publish(PipelineEvent::StepCompleted { step, ok });

            if !ok {
                warn!(pair = %signal.pair, step = %step, "Broker step failed, attempt abandoned");
                self.events
                    .status(format!("Trade attempt failed at {step} for {}.", signal.pair));
                return AttemptOutcome::Failed(step);
            }
        }

        let log = TradeLog::pending(signal, self.trade_amount);
        self.risk.register_result(&log);

        info!(
            pair = %log.pair,
            direction = %log.direction,
            amount = format!("${:.2}", log.amount),
            result = %log.result,
            "Trade placed"
        );
        self.events.publish(PipelineEvent::TradeLogged(log.clone()));
        self.events.status("Trade execution pipeline completed.");

        AttemptOutcome::Executed(log)
    }

    /// Cancel in-flight broker calls and arm a fresh context for later calls.
    pub fn stop_all(&self) {
        let mut token = self
            .pipeline_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        token.cancel();
        *token = CancellationToken::new();
        drop(token);

        info!("Stop All: pending operations cancelled");
        self.events.status("Stop All: pending operations cancelled.");
    }

    fn current_token(&self) -> CancellationToken {
        self.pipeline_cancel
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
    }

    /// Run one broker step, or `None` if either token fires first.
    async fn run_step(
        &self,
        step: TradeStep,
        signal: &Signal,
        pipeline: &CancellationToken,
        caller: &CancellationToken,
    ) -> Option<bool> {
        let call = async {
            match step {
                TradeStep::EnsureLoggedIn => self.broker.ensure_logged_in().await,
                TradeStep::SelectPair => self.broker.select_pair(&signal.pair).await,
                TradeStep::SetExpiry => self.broker.set_expiry(&signal.expiry).await,
                TradeStep::PlaceTrade => self.broker.place_trade(signal.direction).await,
            }
        };

        tokio::select! {
            biased;
            _ = pipeline.cancelled() => None,
            _ = caller.cancelled() => None,
            ok = call => Some(ok),
        }
    }
}

#[async_trait]
impl SignalHandler for ExecutionCoordinator {
    async fn handle(&self, signal: Signal, cancel: CancellationToken) {
        let _ = until_cancelled(&cancel, self.handle_signal(&signal, &cancel)).await;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
