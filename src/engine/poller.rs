//! Account snapshot board and the background balance poller.
//!
//! The board is the only writer of the [`AccountSnapshot`]; every refresh
//! builds a new snapshot and publishes it with a single `watch` replace,
//! so readers always see a complete value without extra locking.

use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::{read_account, BrokerAdapter};
use crate::engine::events::{EventBus, PipelineEvent};
use crate::engine::{catch_fault, until_cancelled, BrokerLock};
use crate::types::AccountSnapshot;

// ---------------------------------------------------------------------------
// Board
// ---------------------------------------------------------------------------

#[derive(Clone)]
pub struct AccountBoard {
    tx: Arc<watch::Sender<AccountSnapshot>>,
    events: EventBus,
}

impl AccountBoard {
    pub fn new(events: EventBus) -> Self {
        let (tx, _) = watch::channel(AccountSnapshot::default());
        Self {
            tx: Arc::new(tx),
            events,
        }
    }

    /// Read the broker, merge into the previous snapshot and publish.
    pub async fn refresh(&self, broker: &dyn BrokerAdapter) -> AccountSnapshot {
        let read = read_account(broker).await;
        let next = self.tx.borrow().merge(&read);
        self.tx.send_replace(next.clone());

        debug!(
            mode = ?next.mode,
            demo = ?next.demo_balance,
            live = ?next.live_balance,
            login = next.login_detected,
            "Account snapshot refreshed"
        );
        self.events.publish(PipelineEvent::AccountUpdated(next.clone()));
        next
    }

    pub fn latest(&self) -> AccountSnapshot {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<AccountSnapshot> {
        self.tx.subscribe()
    }
}

// ---------------------------------------------------------------------------
// Poller
// ---------------------------------------------------------------------------

/// Cadence of the background refresh.
#[derive(Debug, Clone, Copy)]
pub struct PollSchedule {
    pub interval: Duration,
    pub error_backoff: Duration,
}

impl Default for PollSchedule {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(2),
            error_backoff: Duration::from_secs(3),
        }
    }
}

/// Handle to a running poller task.
pub struct AccountPoller {
    cancel: CancellationToken,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl AccountPoller {
    pub fn spawn(
        broker: Arc<dyn BrokerAdapter>,
        board: AccountBoard,
        broker_lock: BrokerLock,
        schedule: PollSchedule,
    ) -> Self {
        let cancel = CancellationToken::new();
        let task = tokio::spawn(poll(broker, board, broker_lock, schedule, cancel.clone()));
        Self {
            cancel,
            task: Mutex::new(Some(task)),
        }
    }

    /// True while the task is alive and has not been told to stop.
    pub fn is_running(&self) -> bool {
        if self.cancel.is_cancelled() {
            return false;
        }
        self.task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .as_ref()
            .is_some_and(|task| !task.is_finished())
    }

    /// Cancel the task and wait for it to exit.
    pub async fn stop(&self) {
        self.cancel.cancel();
        let task = self
            .task
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(task) = task {
            let _ = task.await;
        }
    }
}

async fn poll(
    broker: Arc<dyn BrokerAdapter>,
    board: AccountBoard,
    broker_lock: BrokerLock,
    schedule: PollSchedule,
    cancel: CancellationToken,
) {
    info!(
        interval_ms = schedule.interval.as_millis() as u64,
        "Account poller started"
    );

    loop {
        // `None` means cancelled; `Some(healthy)` otherwise.
        let round = catch_fault(async {
            let _broker = until_cancelled(&cancel, broker_lock.lock()).await?;
            let healthy = until_cancelled(&cancel, broker.health_check()).await?;
            if healthy {
                until_cancelled(&cancel, board.refresh(broker.as_ref())).await?;
            }
            Some(healthy)
        })
        .await;

        let delay = match round {
            Ok(None) => break,
            Ok(Some(true)) => schedule.interval,
            Ok(Some(false)) => {
                warn!(broker = broker.name(), "Health check failed, polling backs off");
                schedule.error_backoff
            }
            Err(fault) => {
                error!(broker = broker.name(), error = %fault, "Account refresh failed, polling backs off");
                schedule.error_backoff
            }
        };

        if until_cancelled(&cancel, tokio::time::sleep(delay)).await.is_none() {
            break;
        }
    }

    info!("Account poller stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
