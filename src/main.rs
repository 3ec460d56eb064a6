//! AUTOTRADER — signal-to-trade pipeline for a binary-options broker.
//!
//! Entry point. Loads configuration, initialises structured logging,
//! wires the pipeline against the paper broker, replays the signal feed,
//! optionally starts the auto-trade session, and runs until Ctrl+C.

use anyhow::Result;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, error, info, warn};

use autotrader::broker::paper::PaperBroker;
use autotrader::config;
use autotrader::dashboard::{self, DashboardState};
use autotrader::engine::events::{EventBus, PipelineEvent};
use autotrader::engine::pipeline::{Pipeline, PipelineOptions};
use autotrader::engine::poller::PollSchedule;
use autotrader::feed;

const BANNER: &str = r#"
    _   _   _ _____ ___ _____ ____      _    ____  _____ ____
   / \ | | | |_   _/ _ \_   _|  _ \    / \  |  _ \| ____|  _ \
  / _ \| | | | | || | | || | | |_) |  / _ \ | | | |  _| | |_) |
 / ___ \ |_| | | || |_| || | |  _ <  / ___ \| |_| | |___|  _ <
/_/   \_\___/  |_| \___/ |_| |_| \_\/_/   \_\____/|_____|_| \_\

  Signal → Risk Gate → Broker
"#;

/// How often the main loop logs a status line and checks the day boundary.
const HEARTBEAT: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // Load .env file if present (non-fatal if missing)
    let _ = dotenv::dotenv();

    let config_path = std::env::args().nth(1).unwrap_or_else(|| "config.toml".to_string());
    let cfg = config::AppConfig::load(&config_path)?;

    init_logging();

    println!("{BANNER}");
    info!(
        agent_name = %cfg.agent.name,
        auto_trade = cfg.agent.auto_trade,
        cooldown_secs = cfg.risk.cooldown_secs,
        max_trades_per_day = cfg.risk.max_trades_per_day,
        "AUTOTRADER starting up"
    );

    // -- Initialise components -------------------------------------------

    let broker = Arc::new(PaperBroker::new(&cfg.paper));
    let pipeline = Arc::new(Pipeline::new(
        broker,
        PipelineOptions {
            limits: cfg.risk.limits(),
            trade_amount: cfg.trade_amount(),
            auto_trade: cfg.agent.auto_trade,
            seed: cfg.session.seed,
            polling: PollSchedule {
                interval: Duration::from_secs(cfg.polling.interval_secs),
                error_backoff: Duration::from_secs(cfg.polling.error_backoff_secs),
            },
        },
    ));

    let event_logger = spawn_event_logger(pipeline.events());

    let mut background = Vec::new();
    if cfg.dashboard.enabled {
        let state = Arc::new(DashboardState::new(pipeline.clone()));
        background.push(dashboard::spawn_recorder(state.clone()));
        background.push(dashboard::spawn_dashboard(state, cfg.dashboard.port).await?);
    }

    pipeline.start_polling().await;

    // -- Signal feed -------------------------------------------------------

    if let Some(path) = &cfg.agent.signal_feed {
        match feed::load_signals(path) {
            Ok(signals) => {
                for signal in signals {
                    if let Err(e) = pipeline.enqueue(signal) {
                        error!(error = %e, "Failed to enqueue feed signal");
                        break;
                    }
                }
            }
            Err(e) => error!(error = %e, "Signal feed unavailable"),
        }
    }

    // -- Auto-trade session ------------------------------------------------

    if cfg.session.autostart {
        match pipeline.start_session(&cfg.session.inputs()).await {
            Ok(report) => info!(
                stake_synced = report.stake_synced,
                direction = %report.initial_direction,
                start_balance = ?report.start_balance,
                "Auto-trade session running"
            ),
            Err(e) => warn!(error = %e, "Auto-trade session did not start"),
        }
    }

    // -- Main loop -------------------------------------------------------

    let mut interval = tokio::time::interval(HEARTBEAT);
    let mut trading_day = Utc::now().date_naive();
    let shutdown = tokio::signal::ctrl_c();
    tokio::pin!(shutdown);

    info!("Entering main loop. Press Ctrl+C to stop.");

    loop {
        tokio::select! {
            _ = interval.tick() => {
                let today = Utc::now().date_naive();
                if today != trading_day {
                    info!(%today, "New trading day, resetting risk counters");
                    pipeline.reset_daily_counters();
                    trading_day = today;
                }

                let status = pipeline.status().await;
                info!(
                    session = %status.session,
                    auto_trade = status.auto_trade,
                    trades_today = status.risk.trades_today,
                    daily_loss = format!("${:.2}", status.risk.daily_loss),
                    balance = ?status.account.tracked_balance(),
                    "Heartbeat"
                );
            }
            _ = &mut shutdown => {
                info!("Shutdown signal received.");
                break;
            }
        }
    }

    pipeline.shutdown(false).await;
    for task in background {
        task.abort();
    }
    event_logger.abort();

    let status = pipeline.status().await;
    info!(
        trades_today = status.risk.trades_today,
        balance = ?status.account.tracked_balance(),
        "AUTOTRADER shut down cleanly."
    );

    Ok(())
}

/// Mirror operator-facing pipeline events into the log.
fn spawn_event_logger(events: &EventBus) -> tokio::task::JoinHandle<()> {
    let mut rx = events.subscribe();
    tokio::spawn(async move {
        loop {
            match rx.recv().await {
                Ok(PipelineEvent::Status(message)) => info!(target: "autotrader::status", "{message}"),
                Ok(PipelineEvent::TradeLogged(log)) => info!(trade = %log, "Trade logged"),
                Ok(PipelineEvent::SessionStopped { reason }) => warn!(%reason, "Session stopped"),
                Ok(PipelineEvent::RiskBlocked(reason)) => debug!(%reason, "Risk gate blocked"),
                Ok(_) => {}
                Err(RecvError::Lagged(skipped)) => warn!(skipped, "Event logger lagged"),
                Err(RecvError::Closed) => break,
            }
        }
    })
}

/// Initialise the `tracing` subscriber.
fn init_logging() {
    use tracing_subscriber::{fmt, EnvFilter};

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("autotrader=info"));

    let json_logging = std::env::var("AUTOTRADER_LOG_JSON").is_ok();

    if json_logging {
        fmt()
            .json()
            .with_env_filter(env_filter)
            .with_target(true)
            .with_thread_ids(true)
            .init();
    } else {
        fmt()
            .with_env_filter(env_filter)
            .with_target(true)
            .init();
    }
}
