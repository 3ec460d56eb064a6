//! End-to-end pipeline scenarios.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rust_decimal_macros::dec;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio_test::{assert_err, assert_ok};

use autotrader::engine::events::PipelineEvent;
use autotrader::engine::pipeline::{Pipeline, PipelineOptions};
use autotrader::engine::session::{SessionInputs, SessionState};
use autotrader::strategy::direction::randomized_next;
use autotrader::strategy::risk::{BlockReason, RiskLimits};
use autotrader::types::{Direction, PipelineError, Signal, TradeLog, TradeResult};

use crate::mock_broker::{MockBroker, Op};

fn limits(cooldown: Duration) -> RiskLimits {
    RiskLimits {
        cooldown,
        ..RiskLimits::default()
    }
}

fn pipeline(broker: &MockBroker, auto_trade: bool, cooldown: Duration) -> Pipeline {
    Pipeline::new(
        Arc::new(broker.clone()),
        PipelineOptions {
            limits: limits(cooldown),
            auto_trade,
            ..PipelineOptions::default()
        },
    )
}

fn signal(pair: &str, direction: Direction) -> Signal {
    Signal::new(pair, direction, "00:00:15", "test")
}

fn drain(rx: &mut broadcast::Receiver<PipelineEvent>) -> Vec<PipelineEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

fn trade_logs(events: &[PipelineEvent]) -> Vec<TradeLog> {
    events
        .iter()
        .filter_map(|e| match e {
            PipelineEvent::TradeLogged(log) => Some(log.clone()),
            _ => None,
        })
        .collect()
}

fn session_inputs(expiry: &str, stop_loss: &str, take_profit: &str) -> SessionInputs {
    SessionInputs {
        stake: "1.00".into(),
        expiry: expiry.into(),
        stop_loss: stop_loss.into(),
        take_profit: take_profit.into(),
        ai_mode: false,
    }
}

// ---------------------------------------------------------------------------
// Queue → coordinator
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_single_signal_end_to_end() {
    let broker = MockBroker::new();
    let pipeline = pipeline(&broker, true, Duration::from_secs(5));
    let mut rx = pipeline.events().subscribe();

    assert_ok!(pipeline.enqueue(signal("EUR/USD", Direction::Buy)));
    pipeline.shutdown(true).await;

    let events = drain(&mut rx);
    let logs = trade_logs(&events);
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].result, TradeResult::Pending);
    assert_eq!(logs[0].pair, "EUR/USD");
    assert_eq!(logs[0].direction, Direction::Buy);
    assert_eq!(pipeline.risk().snapshot().trades_today, 1);
    assert_eq!(
        broker.calls(),
        vec!["login", "pair:EUR/USD", "expiry:00:00:15", "place:buy"]
    );

    // The feed broadcast comes before any step of the attempt.
    let received = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::SignalReceived(_)))
        .unwrap();
    let first_step = events
        .iter()
        .position(|e| matches!(e, PipelineEvent::StepCompleted { .. }))
        .unwrap();
    assert!(received < first_step);
}

#[tokio::test]
async fn test_malformed_signals_never_trade() {
    let broker = MockBroker::new();
    let pipeline = pipeline(&broker, true, Duration::ZERO);
    let mut rx = pipeline.events().subscribe();

    pipeline.enqueue(Signal::new("", Direction::Buy, "00:00:15", "test")).unwrap();
    pipeline.enqueue(Signal::new("EUR/USD", Direction::Buy, "", "test")).unwrap();
    pipeline.enqueue(Signal::new("EUR/USD", Direction::Buy, "00:00:15", "")).unwrap();
    pipeline.shutdown(true).await;

    let events = drain(&mut rx);
    assert!(broker.calls().is_empty());
    assert_eq!(
        events
            .iter()
            .filter(|e| matches!(e, PipelineEvent::SignalRejected(_)))
            .count(),
        3
    );
    assert_eq!(pipeline.risk().snapshot().trades_today, 0);
}

#[tokio::test]
async fn test_auto_trade_off_only_observes() {
    let broker = MockBroker::new();
    let pipeline = pipeline(&broker, false, Duration::ZERO);
    let mut rx = pipeline.events().subscribe();

    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    pipeline.enqueue(signal("GBP/USD", Direction::Sell)).unwrap();
    pipeline.shutdown(true).await;

    let pairs: Vec<String> = drain(&mut rx)
        .into_iter()
        .filter_map(|e| match e {
            PipelineEvent::SignalReceived(s) => Some(s.pair),
            _ => None,
        })
        .collect();
    assert_eq!(pairs, vec!["EUR/USD", "GBP/USD"]);
    assert!(broker.calls().is_empty());
}

#[tokio::test]
async fn test_cooldown_blocks_second_signal() {
    let broker = MockBroker::new();
    let pipeline = pipeline(&broker, true, Duration::from_secs(60));
    let mut rx = pipeline.events().subscribe();

    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    pipeline.enqueue(signal("EUR/USD", Direction::Sell)).unwrap();
    pipeline.shutdown(true).await;

    let events = drain(&mut rx);
    assert_eq!(trade_logs(&events).len(), 1);
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::RiskBlocked(BlockReason::Cooldown))));
    assert_eq!(broker.count("place:"), 1);
    assert_eq!(pipeline.risk().snapshot().trades_today, 1);
}

#[tokio::test]
async fn test_failed_step_leaves_earlier_steps_applied() {
    let broker = MockBroker::new();
    broker.fail(Op::SetExpiry);
    let pipeline = pipeline(&broker, true, Duration::ZERO);
    let mut rx = pipeline.events().subscribe();

    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    pipeline.shutdown(true).await;

    let events = drain(&mut rx);
    assert!(trade_logs(&events).is_empty());
    assert_eq!(broker.calls(), vec!["login", "pair:EUR/USD", "expiry:00:00:15"]);
    assert_eq!(pipeline.risk().snapshot().trades_today, 1);
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::StepCompleted { ok: false, .. }
    )));
}

#[tokio::test]
async fn test_attempts_never_overlap() {
    let broker = MockBroker::with_balance(dec!(100));
    let pipeline = pipeline(&broker, true, Duration::ZERO);
    pipeline.start_polling().await;

    for pair in ["EUR/USD", "GBP/USD", "USD/JPY", "AUD/USD", "EUR/GBP"] {
        pipeline.enqueue(signal(pair, Direction::Sell)).unwrap();
    }
    pipeline.shutdown(true).await;

    assert_eq!(broker.count("place:sell"), 5);
    assert_eq!(broker.max_concurrency(), 1);
    assert_eq!(pipeline.risk().snapshot().trades_today, 5);
}

#[tokio::test]
async fn test_stop_all_then_pipeline_keeps_working() {
    let broker = MockBroker::new();
    broker.hang_on_place(true);
    let pipeline = pipeline(&broker, true, Duration::ZERO);
    let mut rx = pipeline.events().subscribe();

    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while broker.count("place:hanging") == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("attempt never reached place_trade");

    pipeline.stop_all().await;
    assert!(!pipeline.auto_trade_enabled());

    broker.hang_on_place(false);
    assert_ok!(pipeline.set_auto_trade(true).await);
    pipeline.enqueue(signal("GBP/USD", Direction::Sell)).unwrap();

    tokio::time::timeout(Duration::from_secs(2), pipeline.shutdown(true))
        .await
        .expect("queue did not drain after stop_all");

    let logs = trade_logs(&drain(&mut rx));
    assert_eq!(logs.len(), 1);
    assert_eq!(logs[0].pair, "GBP/USD");
    assert_eq!(pipeline.risk().snapshot().trades_today, 2);
}

#[tokio::test]
async fn test_enqueue_after_shutdown_is_refused() {
    let broker = MockBroker::new();
    let pipeline = pipeline(&broker, true, Duration::ZERO);
    pipeline.shutdown(true).await;

    assert!(matches!(
        assert_err!(pipeline.enqueue(signal("EUR/USD", Direction::Buy))),
        PipelineError::QueueClosed
    ));
}

#[tokio::test]
async fn test_daily_reset_reopens_gate() {
    let broker = MockBroker::new();
    let pipeline = Pipeline::new(
        Arc::new(broker.clone()),
        PipelineOptions {
            limits: RiskLimits {
                cooldown: Duration::ZERO,
                max_trades_per_day: 1,
                ..RiskLimits::default()
            },
            auto_trade: true,
            ..PipelineOptions::default()
        },
    );

    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    tokio::time::timeout(Duration::from_secs(2), async {
        while pipeline.risk().snapshot().trades_today == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .unwrap();

    pipeline.reset_daily_counters();
    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    pipeline.shutdown(true).await;

    // One before the cap, one after the reset.
    assert_eq!(broker.count("place:"), 2);
}

// ---------------------------------------------------------------------------
// Session loop
// ---------------------------------------------------------------------------

#[tokio::test(start_paused = true)]
async fn test_session_stop_loss_scenario() {
    let broker = MockBroker::with_balance(dec!(100));
    let pipeline = pipeline(&broker, false, Duration::ZERO);
    let mut rx = pipeline.events().subscribe();
    let mut state = pipeline.session().subscribe_state();

    let report = pipeline
        .start_session(&session_inputs("00:00:05", "10", "15"))
        .await
        .unwrap();
    assert_eq!(report.start_balance, Some(dec!(100)));
    assert!(report.stake_synced);

    // +5: neither threshold.
    broker.set_balance(dec!(105));
    tokio::time::sleep(Duration::from_secs(6)).await;
    assert_eq!(pipeline.session().state(), SessionState::Running);

    // -10: stop loss.
    broker.set_balance(dec!(90));
    tokio::time::timeout(
        Duration::from_secs(30),
        state.wait_for(|s| *s == SessionState::Idle),
    )
    .await
    .expect("stop loss never tripped")
    .unwrap();

    let reason = drain(&mut rx)
        .into_iter()
        .find_map(|e| match e {
            PipelineEvent::SessionStopped { reason } => Some(reason),
            _ => None,
        })
        .unwrap();
    assert!(reason.starts_with("Stop Loss reached"));
    pipeline.shutdown(true).await;
}

#[tokio::test(start_paused = true)]
async fn test_session_take_profit_scenario() {
    let broker = MockBroker::with_balance(dec!(100));
    let pipeline = pipeline(&broker, false, Duration::ZERO);
    let mut state = pipeline.session().subscribe_state();

    pipeline
        .start_session(&session_inputs("00:00:05", "10", "15"))
        .await
        .unwrap();
    broker.set_balance(dec!(115));

    tokio::time::timeout(
        Duration::from_secs(30),
        state.wait_for(|s| *s == SessionState::Idle),
    )
    .await
    .expect("take profit never tripped")
    .unwrap();
    pipeline.shutdown(true).await;
}

#[tokio::test(start_paused = true)]
async fn test_session_survives_unhealthy_broker() {
    let broker = MockBroker::with_balance(dec!(100));
    let pipeline = pipeline(&broker, false, Duration::ZERO);

    pipeline
        .start_session(&session_inputs("00:00:02", "0", "0"))
        .await
        .unwrap();
    let placed_at_start = broker.count("place:");

    broker.fail(Op::Health);
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(pipeline.session().state(), SessionState::Running);
    assert_eq!(broker.count("place:"), placed_at_start);

    broker.recover(Op::Health);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert!(broker.count("place:") > placed_at_start);
    pipeline.shutdown(true).await;
}

#[tokio::test(start_paused = true)]
async fn test_session_owns_broker() {
    let broker = MockBroker::with_balance(dec!(100));
    let pipeline = pipeline(&broker, true, Duration::ZERO);

    pipeline
        .start_session(&session_inputs("00:00:15", "0", "0"))
        .await
        .unwrap();

    assert!(!pipeline.auto_trade_enabled());
    assert!(matches!(
        pipeline.set_auto_trade(true).await,
        Err(PipelineError::BrokerBusy(_))
    ));

    // Signals are still observed, but never traded by the queue.
    let mut rx = pipeline.events().subscribe();
    pipeline.enqueue(signal("EUR/USD", Direction::Buy)).unwrap();
    pipeline.pause_session().await;
    assert_eq!(pipeline.session().state(), SessionState::Paused);
    pipeline.shutdown(true).await;

    assert_eq!(broker.count("pair:"), 0);
    assert!(drain(&mut rx)
        .iter()
        .any(|e| matches!(e, PipelineEvent::SignalReceived(_))));
}

#[tokio::test(start_paused = true)]
async fn test_invalid_session_input_touches_nothing() {
    let broker = MockBroker::new();
    let pipeline = pipeline(&broker, false, Duration::ZERO);

    let err = assert_err!(
        pipeline
            .start_session(&session_inputs("15 seconds", "0", "0"))
            .await
    );

    assert!(err.to_string().contains("HH:mm:ss"));
    assert!(broker.calls().is_empty());
    assert_eq!(pipeline.session().state(), SessionState::Idle);
    pipeline.shutdown(true).await;
}

#[tokio::test(start_paused = true)]
async fn test_seeded_ai_session_is_reproducible() {
    async fn run(seed: u64) -> (MockBroker, Vec<String>) {
        let broker = MockBroker::with_balance(dec!(100));
        let pipeline = Pipeline::new(
            Arc::new(broker.clone()),
            PipelineOptions {
                limits: limits(Duration::ZERO),
                seed: Some(seed),
                ..PipelineOptions::default()
            },
        );
        let mut inputs = session_inputs("00:00:02", "0", "0");
        inputs.ai_mode = true;
        assert_ok!(pipeline.start_session(&inputs).await);
        tokio::time::sleep(Duration::from_secs(9)).await;
        pipeline.shutdown(true).await;

        let placed = broker
            .calls()
            .into_iter()
            .filter(|c| c.starts_with("place:"))
            .collect();
        (broker, placed)
    }

    let (broker, first) = run(2024).await;
    let (_, second) = run(2024).await;

    assert_eq!(broker.count("ai:on"), 1);
    assert!(first.len() >= 4, "only {} trades", first.len());
    assert_eq!(first, second);

    let mut rng = StdRng::seed_from_u64(2024);
    let mut previous = Direction::Buy;
    let expected: Vec<String> = (0..first.len())
        .map(|_| {
            previous = randomized_next(previous, rng.gen());
            format!("place:{}", previous.as_broker_str())
        })
        .collect();
    assert_eq!(first, expected);
}
