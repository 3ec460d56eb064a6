//! Auto-trade session loop.
//!
//! A self-driving trader: validates its inputs, syncs stake and expiry on
//! the broker, places an initial trade, then keeps placing trades on a
//! fixed interval until it is paused, stopped, or the stop-loss /
//! take-profit circuit breaker trips.
//!
//! State machine: Idle → Starting → Running → Idle, with Paused reachable
//! from Running. Paused keeps the last inputs so the session can resume.

use rust_decimal::Decimal;
use serde::Serialize;
use std::future::Future;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::broker::BrokerAdapter;
use crate::engine::backoff::ExponentialBackoff;
use crate::engine::events::{EventBus, PipelineEvent};
use crate::engine::poller::AccountBoard;
use crate::engine::{catch_fault, until_cancelled, BrokerLock};
use crate::strategy::breaker::{BreakerTrip, CircuitBreaker};
use crate::strategy::direction::{DirectionMode, DirectionPolicy};
use crate::strategy::risk::{RiskDecision, RiskGate};
use crate::types::{parse_expiry, Direction, PipelineError, Signal, TradeLog, ValidationError};

/// Delay before the single retry of a stake or expiry write.
const SYNC_RETRY_DELAY: Duration = Duration::from_millis(350);
/// Expiry readback: attempts, spacing and accepted drift.
const EXPIRY_CONFIRM_ATTEMPTS: u32 = 3;
const EXPIRY_CONFIRM_DELAY: Duration = Duration::from_millis(200);
const EXPIRY_TOLERANCE: Duration = Duration::from_secs(2);
/// Floor for the trade interval.
const MIN_INTERVAL: Duration = Duration::from_secs(2);
/// Pause before retrying when the expiry could not be synced in the loop.
const EXPIRY_WAIT: Duration = Duration::from_secs(1);

/// Source tag and pair label on the synthetic signals the loop trades.
/// The loop trades whatever pair the broker currently shows.
const SESSION_SOURCE: &str = "autotrade";
const SESSION_PAIR: &str = "CURRENT";

// ---------------------------------------------------------------------------
// State and inputs
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum SessionState {
    Idle,
    Starting,
    Running,
    Paused,
}

impl std::fmt::Display for SessionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SessionState::Idle => write!(f, "Idle"),
            SessionState::Starting => write!(f, "Starting"),
            SessionState::Running => write!(f, "Running"),
            SessionState::Paused => write!(f, "Paused"),
        }
    }
}

/// Raw operator input, as typed.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SessionInputs {
    pub stake: String,
    pub expiry: String,
    pub stop_loss: String,
    pub take_profit: String,
    pub ai_mode: bool,
}

/// Validated session configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionParams {
    pub stake: Decimal,
    pub expiry: String,
    pub expiry_duration: Duration,
    pub breaker: CircuitBreaker,
    pub ai_mode: bool,
}

impl SessionParams {
    /// Interval between loop iterations: the expiry, at least two seconds.
    pub fn interval(&self) -> Duration {
        self.expiry_duration.max(MIN_INTERVAL)
    }
}

impl SessionInputs {
    /// Validate in order stake, expiry, stop loss, take profit.
    pub fn validate(&self) -> Result<SessionParams, ValidationError> {
        let stake = parse_amount(&self.stake)
            .filter(|stake| *stake > Decimal::ZERO)
            .ok_or(ValidationError::InvalidStake)?;

        let expiry = self.expiry.trim().to_string();
        let expiry_duration = parse_expiry(&expiry).ok_or(ValidationError::InvalidExpiry)?;

        let stop_loss = parse_limit(&self.stop_loss).ok_or(ValidationError::InvalidStopLoss)?;
        let take_profit =
            parse_limit(&self.take_profit).ok_or(ValidationError::InvalidTakeProfit)?;

        Ok(SessionParams {
            stake,
            expiry,
            expiry_duration,
            breaker: CircuitBreaker::new(stop_loss, take_profit),
            ai_mode: self.ai_mode,
        })
    }
}

/// Accepts "2.5" and "2,5".
fn parse_amount(raw: &str) -> Option<Decimal> {
    Decimal::from_str(&raw.trim().replace(',', ".")).ok()
}

/// Empty means disabled (zero); otherwise a non-negative amount.
fn parse_limit(raw: &str) -> Option<Decimal> {
    if raw.trim().is_empty() {
        return Some(Decimal::ZERO);
    }
    parse_amount(raw).filter(|value| *value >= Decimal::ZERO)
}

/// What a successful start did.
#[derive(Debug, Clone, PartialEq)]
pub struct StartReport {
    /// False means the broker kept its current stake.
    pub stake_synced: bool,
    pub initial_direction: Direction,
    /// Tracked balance right after the initial trade, when readable.
    pub start_balance: Option<Decimal>,
}

// ---------------------------------------------------------------------------
// Session
// ---------------------------------------------------------------------------

/// Stops a chain of broker calls early.
enum Interrupt {
    Cancelled,
    Failed(PipelineError),
}

impl From<PipelineError> for Interrupt {
    fn from(e: PipelineError) -> Self {
        Interrupt::Failed(e)
    }
}

/// How one loop iteration ended.
enum Iteration {
    Placed,
    PlaceFailed,
    RiskBlocked,
    ExpiryPending,
    Tripped(BreakerTrip),
}

struct Shared {
    broker: Arc<dyn BrokerAdapter>,
    risk: Arc<RiskGate>,
    events: EventBus,
    account: AccountBoard,
    broker_lock: BrokerLock,
    state: watch::Sender<SessionState>,
}

struct SessionRun {
    cancel: CancellationToken,
    task: Option<JoinHandle<()>>,
}

pub struct AutoTradeSession {
    shared: Arc<Shared>,
    run: Mutex<Option<SessionRun>>,
    last_inputs: Mutex<Option<SessionInputs>>,
    seed: Option<u64>,
}

impl AutoTradeSession {
    pub fn new(
        broker: Arc<dyn BrokerAdapter>,
        risk: Arc<RiskGate>,
        events: EventBus,
        account: AccountBoard,
        broker_lock: BrokerLock,
    ) -> Self {
        let (state, _) = watch::channel(SessionState::Idle);
        Self {
            shared: Arc::new(Shared {
                broker,
                risk,
                events,
                account,
                broker_lock,
                state,
            }),
            run: Mutex::new(None),
            last_inputs: Mutex::new(None),
            seed: None,
        }
    }

    /// Seed the randomized direction generator.
    pub fn with_seed(mut self, seed: Option<u64>) -> Self {
        self.seed = seed;
        self
    }

    pub fn state(&self) -> SessionState {
        *self.shared.state.borrow()
    }

    pub fn subscribe_state(&self) -> watch::Receiver<SessionState> {
        self.shared.state.subscribe()
    }

    /// True while the session owns the broker (starting or running).
    pub fn is_active(&self) -> bool {
        matches!(self.state(), SessionState::Starting | SessionState::Running)
    }

    /// Validate, run the start chain, and launch the loop.
    pub async fn start(&self, inputs: &SessionInputs) -> Result<StartReport, PipelineError> {
        if self.is_active() {
            return Err(PipelineError::SessionActive);
        }

        let params = match inputs.validate() {
            Ok(params) => params,
            Err(e) => {
                warn!(error = %e, "AutoTrade start blocked by invalid input");
                self.shared.events.status(e.to_string());
                return Err(e.into());
            }
        };

        let claimed = self.shared.state.send_if_modified(|state| {
            if matches!(state, SessionState::Idle | SessionState::Paused) {
                *state = SessionState::Starting;
                true
            } else {
                false
            }
        });
        if !claimed {
            return Err(PipelineError::SessionActive);
        }
        self.shared
            .events
            .publish(PipelineEvent::SessionStateChanged(SessionState::Starting));

        // Clear any finished run and arm a fresh cancellation context.
        self.stop_run().await;
        let cancel = CancellationToken::new();
        *self.lock_run() = Some(SessionRun {
            cancel: cancel.clone(),
            task: None,
        });
        *self
            .last_inputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner()) = Some(inputs.clone());

        let mut policy = if params.ai_mode {
            DirectionPolicy::randomized(self.seed)
        } else {
            DirectionPolicy::alternating()
        };

        let started = catch_fault(self.shared.start_chain(&params, &mut policy, &cancel))
            .await
            .unwrap_or_else(|fault| Err(Interrupt::Failed(fault)));

        let report = match started {
            Ok(report) if !cancel.is_cancelled() => report,
            Ok(_) | Err(Interrupt::Cancelled) => {
                return Err(self.abort_start("AutoTrade start cancelled.".to_string()));
            }
            Err(Interrupt::Failed(PipelineError::StartAborted(reason))) => {
                return Err(self.abort_start(reason));
            }
            Err(Interrupt::Failed(e)) => {
                return Err(self.abort_start(e.to_string()));
            }
        };

        let mut run = self.lock_run();
        if cancel.is_cancelled() {
            drop(run);
            return Err(self.abort_start("AutoTrade start cancelled.".to_string()));
        }
        self.shared.set_state(SessionState::Running);
        let task = tokio::spawn(run_loop(
            self.shared.clone(),
            params,
            policy,
            report.start_balance,
            cancel.clone(),
        ));
        *run = Some(SessionRun {
            cancel,
            task: Some(task),
        });

        Ok(report)
    }

    /// Restart with the inputs of the last start.
    pub async fn resume(&self) -> Result<StartReport, PipelineError> {
        let inputs = self
            .last_inputs
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .clone()
            .ok_or_else(|| PipelineError::StartAborted("No previous session to resume.".to_string()))?;
        self.start(&inputs).await
    }

    /// Stop the loop and keep the configuration.
    pub async fn pause(&self) {
        if self.stop_run().await {
            self.shared.set_state(SessionState::Paused);
            self.shared.events.status("AutoTrade paused.");
        }
    }

    /// Stop the loop and return to Idle.
    pub async fn stop(&self) {
        self.stop_run().await;
        self.shared.set_state(SessionState::Idle);
    }

    /// Cancel the current run and wait for its task. True if one was active.
    async fn stop_run(&self) -> bool {
        let run = self.lock_run().take();
        let Some(run) = run else {
            return false;
        };
        let was_active = !run.cancel.is_cancelled()
            && run.task.as_ref().map_or(true, |task| !task.is_finished());
        run.cancel.cancel();
        if let Some(task) = run.task {
            if let Err(e) = task.await {
                error!(error = %e, "AutoTrade loop ended abnormally");
            }
        }
        was_active
    }

    fn abort_start(&self, reason: String) -> PipelineError {
        warn!(reason = %reason, "AutoTrade start aborted");
        self.lock_run().take();
        self.shared.set_state(SessionState::Idle);
        self.shared.events.status(reason.clone());
        self.shared.events.publish(PipelineEvent::SessionStopped {
            reason: reason.clone(),
        });
        PipelineError::StartAborted(reason)
    }

    fn lock_run(&self) -> std::sync::MutexGuard<'_, Option<SessionRun>> {
        self.run.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

// ---------------------------------------------------------------------------
// Broker sequences
// ---------------------------------------------------------------------------

impl Shared {
    fn set_state(&self, next: SessionState) {
        let previous = self.state.send_replace(next);
        if previous != next {
            info!(from = %previous, to = %next, "Session state changed");
            self.events.publish(PipelineEvent::SessionStateChanged(next));
        }
    }

    /// Starting → Running chain. Holds the broker for its whole duration.
    async fn start_chain(
        &self,
        params: &SessionParams,
        policy: &mut DirectionPolicy,
        cancel: &CancellationToken,
    ) -> Result<StartReport, Interrupt> {
        let _broker = step(cancel, self.broker_lock.lock()).await?;

        if let RiskDecision::Blocked(reason) = self.risk.can_execute() {
            self.events.publish(PipelineEvent::RiskBlocked(reason));
            return Err(PipelineError::StartAborted(reason.to_string()).into());
        }

        if params.breaker.is_disabled() {
            info!("Risk limits disabled: both take profit and stop loss are 0");
        }

        if params.ai_mode && !step(cancel, self.broker.activate_ai_trading()).await? {
            return Err(PipelineError::StartAborted(
                "AI Trade is enabled, but the broker's AI trading control was not activated."
                    .to_string(),
            )
            .into());
        }

        let stake_synced = self.sync_stake(params.stake, cancel).await?;
        if !stake_synced {
            warn!(
                stake = %params.stake,
                "Stake sync failed during start, continuing with the broker's current stake"
            );
        }

        let expiry_synced = self.sync_expiry(&params.expiry, cancel).await?;
        if !expiry_synced || !self.confirm_expiry(params, cancel).await? {
            return Err(PipelineError::StartAborted(format!(
                "Could not sync expiration to {}. AutoTrade start blocked to prevent wrong trade duration.",
                params.expiry
            ))
            .into());
        }

        let direction = policy.next();
        self.risk.register_attempt();
        if !step(cancel, self.broker.place_trade(direction)).await? {
            return Err(PipelineError::StartAborted(format!(
                "Could not place the initial {direction} trade. Ensure the trade panel is visible."
            ))
            .into());
        }
        policy.confirm_placed(direction);
        self.log_trade(params, direction);

        let snapshot = step(cancel, self.account.refresh(self.broker.as_ref())).await?;
        let start_balance = snapshot.tracked_balance();

        let mode = match policy.mode() {
            DirectionMode::Randomized => "AI mode",
            DirectionMode::Alternating => "Alternating mode",
        };
        let stake_status = if stake_synced {
            "stake synced"
        } else {
            "stake not synced (using broker current value)"
        };
        info!(
            mode,
            stake_synced,
            direction = %direction,
            stop_loss = %params.breaker.stop_loss,
            take_profit = %params.breaker.take_profit,
            start_balance = ?start_balance,
            "AutoTrade enabled"
        );
        self.events.status(format!(
            "AutoTrade enabled ({mode}) • {stake_status} • expiration synced • Initial {direction} sent."
        ));

        Ok(StartReport {
            stake_synced,
            initial_direction: direction,
            start_balance,
        })
    }

    /// One loop iteration under the broker lock.
    async fn iterate(
        &self,
        params: &SessionParams,
        policy: &mut DirectionPolicy,
        start_balance: &mut Option<Decimal>,
        cancel: &CancellationToken,
    ) -> Result<Iteration, Interrupt> {
        let _broker = step(cancel, self.broker_lock.lock()).await?;

        if !step(cancel, self.broker.health_check()).await? {
            return Err(PipelineError::BrokerUnhealthy.into());
        }

        if let RiskDecision::Blocked(reason) = self.risk.can_execute() {
            debug!(reason = %reason, "AutoTrade iteration skipped by risk gate");
            self.events.publish(PipelineEvent::RiskBlocked(reason));
            return Ok(Iteration::RiskBlocked);
        }

        let stake_synced = step(cancel, self.broker.set_amount(params.stake)).await?;
        let mut expiry_synced = step(cancel, self.broker.set_expiry(&params.expiry)).await?;
        if expiry_synced {
            expiry_synced = self.confirm_expiry(params, cancel).await?;
        }
        if !expiry_synced {
            warn!(expiry = %params.expiry, "Loop skipped trade, expiration not synced");
            self.events.status(format!(
                "AutoTrade waiting: could not sync expiration {}.",
                params.expiry
            ));
            return Ok(Iteration::ExpiryPending);
        }

        let direction = policy.next();
        self.risk.register_attempt();
        if !step(cancel, self.broker.place_trade(direction)).await? {
            warn!(direction = %direction, "Loop failed to place trade, retrying next cycle");
            self.events
                .status(format!("AutoTrade running • failed to place {direction} • retrying"));
            return Ok(Iteration::PlaceFailed);
        }
        policy.confirm_placed(direction);
        self.log_trade(params, direction);

        let next = match policy.mode() {
            DirectionMode::Randomized => "AI deciding next".to_string(),
            DirectionMode::Alternating => format!("Next: {}", policy.peek()),
        };
        info!(direction = %direction, stake_synced, expiry_synced, "Loop placed trade");
        self.events
            .status(format!("AutoTrade running • {direction} placed • {next}"));

        let snapshot = step(cancel, self.account.refresh(self.broker.as_ref())).await?;
        let Some(current) = snapshot.tracked_balance() else {
            return Ok(Iteration::Placed);
        };
        let Some(start) = *start_balance else {
            info!(balance = %current, "Session start balance captured");
            *start_balance = Some(current);
            return Ok(Iteration::Placed);
        };

        Ok(match params.breaker.evaluate(start, current) {
            Some(trip) => Iteration::Tripped(trip),
            None => Iteration::Placed,
        })
    }

    async fn sync_stake(&self, stake: Decimal, cancel: &CancellationToken) -> Result<bool, Interrupt> {
        if step(cancel, self.broker.set_amount(stake)).await? {
            return Ok(true);
        }
        step(cancel, tokio::time::sleep(SYNC_RETRY_DELAY)).await?;
        step(cancel, self.broker.set_amount(stake)).await
    }

    async fn sync_expiry(&self, expiry: &str, cancel: &CancellationToken) -> Result<bool, Interrupt> {
        if step(cancel, self.broker.set_expiry(expiry)).await? {
            return Ok(true);
        }
        step(cancel, tokio::time::sleep(SYNC_RETRY_DELAY)).await?;
        step(cancel, self.broker.set_expiry(expiry)).await
    }

    /// Read the expiry back until it is within tolerance, rewriting between
    /// reads. Unconfirmed but written at least once counts as confirmed.
    async fn confirm_expiry(&self, params: &SessionParams, cancel: &CancellationToken) -> Result<bool, Interrupt> {
        let expected = params.expiry_duration;
        let mut any_write = false;

        for attempt in 1..=EXPIRY_CONFIRM_ATTEMPTS {
            if let Some(current) = step(cancel, self.broker.read_expiry()).await? {
                let drift = if current > expected {
                    current - expected
                } else {
                    expected - current
                };
                if drift <= EXPIRY_TOLERANCE {
                    return Ok(true);
                }
                debug!(attempt, current_secs = current.as_secs(), "Expiry readback mismatch");
            }

            any_write |= step(cancel, self.broker.set_expiry(&params.expiry)).await?;
            step(cancel, tokio::time::sleep(EXPIRY_CONFIRM_DELAY)).await?;
        }

        if any_write {
            warn!(
                expiry = %params.expiry,
                "Expiration readback not confirmed, but write succeeded; proceeding"
            );
        }
        Ok(any_write)
    }

    /// Publish a pending trade log for a loop-placed trade.
    fn log_trade(&self, params: &SessionParams, direction: Direction) {
        let signal = Signal::new(SESSION_PAIR, direction, params.expiry.clone(), SESSION_SOURCE);
        let log = TradeLog::pending(&signal, params.stake);
        self.risk.register_result(&log);
        self.events.publish(PipelineEvent::TradeLogged(log));
    }
}

async fn step<F: Future>(cancel: &CancellationToken, fut: F) -> Result<F::Output, Interrupt> {
    until_cancelled(cancel, fut).await.ok_or(Interrupt::Cancelled)
}

// ---------------------------------------------------------------------------
// Loop
// ---------------------------------------------------------------------------

async fn run_loop(
    shared: Arc<Shared>,
    params: SessionParams,
    mut policy: DirectionPolicy,
    mut start_balance: Option<Decimal>,
    cancel: CancellationToken,
) {
    let interval = params.interval();
    let mut backoff = ExponentialBackoff::default();
    info!(interval_secs = interval.as_secs(), "AutoTrade loop started");

    // The initial trade was just placed; wait one interval first.
    if step(&cancel, tokio::time::sleep(interval)).await.is_err() {
        info!("AutoTrade loop stopped");
        return;
    }

    loop {
        let iteration = shared.iterate(&params, &mut policy, &mut start_balance, &cancel);
        let outcome = catch_fault(iteration)
            .await
            .unwrap_or_else(|fault| Err(Interrupt::Failed(fault)));

        let delay = match outcome {
            Ok(Iteration::Tripped(trip)) => {
                let reason = trip.to_string();
                info!(reason = %reason, "AutoTrade stopped by risk limits");
                shared.set_state(SessionState::Idle);
                shared.events.status(reason.clone());
                shared
                    .events
                    .publish(PipelineEvent::SessionStopped { reason });
                break;
            }
            Ok(Iteration::ExpiryPending) => EXPIRY_WAIT,
            Ok(Iteration::Placed | Iteration::PlaceFailed | Iteration::RiskBlocked) => {
                backoff.reset();
                interval
            }
            Err(Interrupt::Cancelled) => break,
            Err(Interrupt::Failed(e)) => {
                let delay = backoff.next_delay();
                error!(
                    error = %e,
                    backoff_ms = delay.as_millis() as u64,
                    "AutoTrade loop error"
                );
                shared.events.status(format!("AutoTrade loop error: {e}"));
                delay
            }
        };

        if step(&cancel, tokio::time::sleep(delay)).await.is_err() {
            break;
        }
    }

    info!("AutoTrade loop stopped");
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
