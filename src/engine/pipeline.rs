//! Pipeline facade.
//!
//! Owns the queue, coordinator, risk gate, session, poller and event bus,
//! and enforces broker ownership: the queue path and the session loop
//! never drive the broker at the same time.

use rust_decimal::Decimal;
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, warn};

use crate::broker::BrokerAdapter;
use crate::engine::coordinator::{ExecutionCoordinator, SignalHandler};
use crate::engine::events::EventBus;
use crate::engine::poller::{AccountBoard, AccountPoller, PollSchedule};
use crate::engine::queue::SignalQueue;
use crate::engine::session::{AutoTradeSession, SessionInputs, SessionState, StartReport};
use crate::engine::{broker_lock, BrokerLock};
use crate::strategy::risk::{RiskGate, RiskLimits, RiskState};
use crate::types::{AccountSnapshot, PipelineError, Signal};

/// Construction options.
#[derive(Debug, Clone)]
pub struct PipelineOptions {
    pub limits: RiskLimits,
    /// Amount written on queue-driven trade logs.
    pub trade_amount: Decimal,
    /// Queue auto-trade at start-up.
    pub auto_trade: bool,
    /// Seed for the session's randomized direction policy.
    pub seed: Option<u64>,
    pub polling: PollSchedule,
}

impl Default for PipelineOptions {
    fn default() -> Self {
        Self {
            limits: RiskLimits::default(),
            trade_amount: Decimal::ZERO,
            auto_trade: false,
            seed: None,
            polling: PollSchedule::default(),
        }
    }
}

/// Point-in-time view for status endpoints.
#[derive(Debug, Clone, Serialize)]
pub struct PipelineStatus {
    pub broker: String,
    pub session: SessionState,
    pub auto_trade: bool,
    pub polling: bool,
    pub risk: RiskState,
    pub account: AccountSnapshot,
}

pub struct Pipeline {
    broker: Arc<dyn BrokerAdapter>,
    events: EventBus,
    risk: Arc<RiskGate>,
    coordinator: Arc<ExecutionCoordinator>,
    queue: SignalQueue,
    session: AutoTradeSession,
    account: AccountBoard,
    broker_lock: BrokerLock,
    polling: PollSchedule,
    poller: Mutex<Option<AccountPoller>>,
    /// Serializes auto-trade toggles against session starts.
    ownership: Mutex<()>,
}

impl Pipeline {
    /// Wire every component and start the queue consumer.
    pub fn new(broker: Arc<dyn BrokerAdapter>, options: PipelineOptions) -> Self {
        let events = EventBus::new();
        let risk = Arc::new(RiskGate::new(options.limits));
        let lock = broker_lock();
        let account = AccountBoard::new(events.clone());

        let coordinator = Arc::new(
            ExecutionCoordinator::new(broker.clone(), risk.clone(), events.clone())
                .with_trade_amount(options.trade_amount),
        );
        let handler: Arc<dyn SignalHandler> = coordinator.clone();
        let queue = SignalQueue::spawn(handler, events.clone(), lock.clone(), options.auto_trade);

        let session = AutoTradeSession::new(
            broker.clone(),
            risk.clone(),
            events.clone(),
            account.clone(),
            lock.clone(),
        )
        .with_seed(options.seed);

        info!(
            broker = broker.name(),
            auto_trade = options.auto_trade,
            "Pipeline ready"
        );

        Self {
            broker,
            events,
            risk,
            coordinator,
            queue,
            session,
            account,
            broker_lock: lock,
            polling: options.polling,
            poller: Mutex::new(None),
            ownership: Mutex::new(()),
        }
    }

    pub fn events(&self) -> &EventBus {
        &self.events
    }

    pub fn risk(&self) -> &RiskGate {
        &self.risk
    }

    pub fn session(&self) -> &AutoTradeSession {
        &self.session
    }

    pub fn account(&self) -> &AccountBoard {
        &self.account
    }

    /// Hand a signal to the queue.
    pub fn enqueue(&self, signal: Signal) -> Result<(), PipelineError> {
        self.queue.enqueue(signal)
    }

    /// Toggle queue-driven trading. Refused while a session owns the broker.
    pub async fn set_auto_trade(&self, enabled: bool) -> Result<(), PipelineError> {
        let _owner = self.ownership.lock().await;
        if enabled && self.session.is_active() {
            warn!("Queue auto-trade refused, session owns the broker");
            return Err(PipelineError::BrokerBusy(
                "auto-trade session is running".to_string(),
            ));
        }
        self.queue.set_auto_trade(enabled);
        Ok(())
    }

    pub fn auto_trade_enabled(&self) -> bool {
        self.queue.auto_trade_enabled()
    }

    /// Start the session loop. Queue auto-trade is switched off first.
    pub async fn start_session(&self, inputs: &SessionInputs) -> Result<StartReport, PipelineError> {
        let _owner = self.ownership.lock().await;
        if self.queue.auto_trade_enabled() {
            info!("Disabling queue auto-trade, session takes the broker");
            self.queue.set_auto_trade(false);
        }
        self.session.start(inputs).await
    }

    pub async fn pause_session(&self) {
        self.session.pause().await;
    }

    pub async fn resume_session(&self) -> Result<StartReport, PipelineError> {
        let _owner = self.ownership.lock().await;
        self.queue.set_auto_trade(false);
        self.session.resume().await
    }

    /// Stop the session, disable queue auto-trade, cancel in-flight calls.
    pub async fn stop_all(&self) {
        self.session.stop().await;
        self.queue.set_auto_trade(false);
        self.coordinator.stop_all();
        self.events.status("All pending operations stopped.");
    }

    /// Start background account refreshes. No-op if already running.
    pub async fn start_polling(&self) {
        let mut poller = self.poller.lock().await;
        if poller.as_ref().is_some_and(AccountPoller::is_running) {
            return;
        }
        *poller = Some(AccountPoller::spawn(
            self.broker.clone(),
            self.account.clone(),
            self.broker_lock.clone(),
            self.polling,
        ));
    }

    pub async fn stop_polling(&self) {
        if let Some(poller) = self.poller.lock().await.take() {
            poller.stop().await;
        }
    }

    /// Refresh the account snapshot once, outside the poller.
    pub async fn refresh_account(&self) -> AccountSnapshot {
        let _broker = self.broker_lock.lock().await;
        self.account.refresh(self.broker.as_ref()).await
    }

    pub fn reset_daily_counters(&self) {
        self.risk.reset_daily_counters();
        self.events.status("Daily risk counters reset.");
    }

    pub async fn status(&self) -> PipelineStatus {
        let polling = self
            .poller
            .lock()
            .await
            .as_ref()
            .is_some_and(AccountPoller::is_running);
        PipelineStatus {
            broker: self.broker.name().to_string(),
            session: self.session.state(),
            auto_trade: self.queue.auto_trade_enabled(),
            polling,
            risk: self.risk.snapshot(),
            account: self.account.latest(),
        }
    }

    /// Stop everything. Queued signals are drained when `graceful`.
    pub async fn shutdown(&self, graceful: bool) {
        info!(graceful, "Pipeline shutting down");
        self.session.stop().await;
        self.stop_polling().await;
        if graceful {
            self.queue.close().await;
        } else {
            self.coordinator.stop_all();
            self.queue.abort().await;
        }
        info!("Pipeline stopped");
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
