//! Signal queue.
//!
//! Unbounded FIFO between signal producers and the trading path with a
//! single consumer task. Every well-formed signal is broadcast to observers
//! first; when auto-trade is on it is then handed to the [`SignalHandler`]
//! and the consumer waits for that call before taking the next signal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::engine::backoff::ExponentialBackoff;
use crate::engine::coordinator::SignalHandler;
use crate::engine::events::{EventBus, PipelineEvent};
use crate::engine::{until_cancelled, BrokerLock};
use crate::types::{PipelineError, Signal};

pub struct SignalQueue {
    tx: Mutex<Option<mpsc::UnboundedSender<Signal>>>,
    auto_trade: Arc<AtomicBool>,
    shutdown: CancellationToken,
    consumer: Mutex<Option<JoinHandle<()>>>,
}

impl SignalQueue {
    /// Start the consumer task. Must be called inside a Tokio runtime.
    pub fn spawn(
        handler: Arc<dyn SignalHandler>,
        events: EventBus,
        broker_lock: BrokerLock,
        auto_trade: bool,
    ) -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        let auto_trade = Arc::new(AtomicBool::new(auto_trade));
        let shutdown = CancellationToken::new();

        let consumer = tokio::spawn(consume(
            rx,
            handler,
            events,
            broker_lock,
            auto_trade.clone(),
            shutdown.clone(),
        ));

        Self {
            tx: Mutex::new(Some(tx)),
            auto_trade,
            shutdown,
            consumer: Mutex::new(Some(consumer)),
        }
    }

    /// Append a signal. Never blocks; fails only once the queue is closed.
    pub fn enqueue(&self, signal: Signal) -> Result<(), PipelineError> {
        let tx = self.tx.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let tx = tx.as_ref().ok_or(PipelineError::QueueClosed)?;
        tx.send(signal.with_default_timestamp())
            .map_err(|_| PipelineError::QueueClosed)
    }

    pub fn set_auto_trade(&self, enabled: bool) {
        let previous = self.auto_trade.swap(enabled, Ordering::SeqCst);
        if previous != enabled {
            info!(enabled, "Queue auto-trade toggled");
        }
    }

    pub fn auto_trade_enabled(&self) -> bool {
        self.auto_trade.load(Ordering::SeqCst)
    }

    pub fn is_closed(&self) -> bool {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .is_none()
    }

    /// Graceful shutdown: refuse new signals, drain what is queued, wait.
    pub async fn close(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.join().await;
    }

    /// Hard shutdown: refuse new signals, abandon queued ones and cancel the
    /// in-flight handler call, then wait for the consumer to exit.
    pub async fn abort(&self) {
        self.tx
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        self.shutdown.cancel();
        self.join().await;
    }

    async fn join(&self) {
        let handle = self
            .consumer
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "Signal queue consumer ended abnormally");
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Consumer
// ---------------------------------------------------------------------------

async fn consume(
    mut rx: mpsc::UnboundedReceiver<Signal>,
    handler: Arc<dyn SignalHandler>,
    events: EventBus,
    broker_lock: BrokerLock,
    auto_trade: Arc<AtomicBool>,
    shutdown: CancellationToken,
) {
    let mut backoff = ExponentialBackoff::default();
    info!("Signal queue consumer started");

    loop {
        let signal = match until_cancelled(&shutdown, rx.recv()).await {
            Some(Some(signal)) => signal,
            // Cancelled, or every sender dropped and the buffer is drained.
            _ => break,
        };

        if !signal.is_well_formed() {
            warn!(
                pair = %signal.pair,
                expiry = %signal.expiry,
                source = %signal.source,
                "Dropping malformed signal"
            );
            events.publish(PipelineEvent::SignalRejected(signal));
            continue;
        }

        debug!(signal = %signal, "Signal received");
        events.publish(PipelineEvent::SignalReceived(signal.clone()));

        if !auto_trade.load(Ordering::SeqCst) {
            continue;
        }

        let Some(_broker) = until_cancelled(&shutdown, broker_lock.lock()).await else {
            break;
        };

        let call = {
            let handler = handler.clone();
            let cancel = shutdown.child_token();
            tokio::spawn(async move { handler.handle(signal, cancel).await })
        };

        match call.await {
            Ok(()) => backoff.reset(),
            Err(e) if e.is_panic() => {
                let delay = backoff.next_delay();
                error!(
                    error = %e,
                    backoff_ms = delay.as_millis() as u64,
                    "Signal handler panicked"
                );
                events.status(format!("Signal handling failed unexpectedly: {e}"));
                if until_cancelled(&shutdown, tokio::time::sleep(delay)).await.is_none() {
                    break;
                }
            }
            Err(_) => {}
        }
    }

    info!("Signal queue consumer stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
