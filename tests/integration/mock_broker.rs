//! Mock broker for integration testing.
//!
//! Deterministic `BrokerAdapter` that records every call, can be told to
//! fail individual operations or hang on trade placement, and serves a
//! controllable demo balance. All state is in-memory.

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use autotrader::broker::BrokerAdapter;
use autotrader::types::{parse_expiry, AccountMode, Direction};

/// Broker operations that can be forced to fail.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Op {
    Login,
    SelectPair,
    SetAmount,
    SetExpiry,
    PlaceTrade,
    Health,
}

#[derive(Clone, Default)]
pub struct MockBroker {
    calls: Arc<Mutex<Vec<String>>>,
    failing: Arc<Mutex<HashSet<Op>>>,
    hang_on_place: Arc<Mutex<bool>>,
    demo_balance: Arc<Mutex<Option<Decimal>>>,
    expiry: Arc<Mutex<Option<Duration>>>,
    in_flight: Arc<AtomicUsize>,
    max_in_flight: Arc<AtomicUsize>,
}

impl MockBroker {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_balance(balance: Decimal) -> Self {
        let broker = Self::default();
        broker.set_balance(balance);
        broker
    }

    /// Make every later call of `op` report failure.
    pub fn fail(&self, op: Op) {
        self.failing.lock().unwrap().insert(op);
    }

    pub fn recover(&self, op: Op) {
        self.failing.lock().unwrap().remove(&op);
    }

    /// Make `place_trade` never return.
    pub fn hang_on_place(&self, hang: bool) {
        *self.hang_on_place.lock().unwrap() = hang;
    }

    pub fn set_balance(&self, balance: Decimal) {
        *self.demo_balance.lock().unwrap() = Some(balance);
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, prefix: &str) -> usize {
        self.calls().iter().filter(|c| c.starts_with(prefix)).count()
    }

    /// Highest number of broker calls ever observed running at once.
    pub fn max_concurrency(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    fn record(&self, call: String, op: Op) -> bool {
        self.calls.lock().unwrap().push(call);
        !self.failing.lock().unwrap().contains(&op)
    }

    fn enter(&self) -> InFlight<'_> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        InFlight(self)
    }
}

struct InFlight<'a>(&'a MockBroker);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

#[async_trait]
impl BrokerAdapter for MockBroker {
    async fn ensure_logged_in(&self) -> bool {
        let _guard = self.enter();
        tokio::task::yield_now().await;
        self.record("login".into(), Op::Login)
    }

    async fn select_pair(&self, pair: &str) -> bool {
        let _guard = self.enter();
        tokio::task::yield_now().await;
        self.record(format!("pair:{pair}"), Op::SelectPair)
    }

    async fn set_amount(&self, amount: Decimal) -> bool {
        let _guard = self.enter();
        self.record(format!("amount:{amount}"), Op::SetAmount)
    }

    async fn set_expiry(&self, expiry: &str) -> bool {
        let _guard = self.enter();
        let ok = self.record(format!("expiry:{expiry}"), Op::SetExpiry);
        if ok {
            *self.expiry.lock().unwrap() = parse_expiry(expiry);
        }
        ok
    }

    async fn place_trade(&self, direction: Direction) -> bool {
        let _guard = self.enter();
        let hang = *self.hang_on_place.lock().unwrap();
        if hang {
            self.calls.lock().unwrap().push("place:hanging".into());
            std::future::pending::<()>().await;
        }
        tokio::task::yield_now().await;
        self.record(format!("place:{}", direction.as_broker_str()), Op::PlaceTrade)
    }

    async fn read_balance(&self) -> Option<Decimal> {
        None
    }

    async fn activate_ai_trading(&self) -> bool {
        self.calls.lock().unwrap().push("ai:on".into());
        true
    }

    async fn health_check(&self) -> bool {
        !self.failing.lock().unwrap().contains(&Op::Health)
    }

    async fn read_expiry(&self) -> Option<Duration> {
        *self.expiry.lock().unwrap()
    }

    async fn read_demo_balance(&self) -> Option<Decimal> {
        *self.demo_balance.lock().unwrap()
    }

    async fn read_account_mode(&self) -> AccountMode {
        AccountMode::Demo
    }

    fn name(&self) -> &str {
        "mock"
    }
}
