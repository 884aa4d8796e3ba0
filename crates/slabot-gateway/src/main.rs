use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use teloxide::Bot;
use tokio::sync::watch;
use tracing::{info, warn};

use slabot_classifier::{ai::AiClassifier, ClassificationCache, ClassifierService};
use slabot_core::config::{SlabotConfig, TelegramMode, ALERTS_RATE_PER_SEC, SHUTDOWN_GRACE_SECS};
use slabot_engine::{
    run_recovery, AlertService, RetentionHandler, RetentionSweeper, SlaTimerHandler, TimerManager,
    QUEUE_ALERTS, QUEUE_RETENTION, QUEUE_SLA_TIMERS,
};
use slabot_queue::{QueueHandle, QueueWorker, WorkerOptions};
use slabot_store::Store;
use slabot_telegram::{AlertDeliveryHandler, BotContext, TelegramAdapter};

mod app;
mod auth;
mod http;
mod rpc;

#[derive(Parser, Debug)]
#[command(name = "slabot-gateway", about = "SLA monitoring gateway")]
struct Args {
    /// Path to slabot.toml (default: ~/.slabot/slabot.toml).
    #[arg(long)]
    config: Option<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // LOG_LEVEL takes precedence, then RUST_LOG, then the crate default.
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .or_else(|| std::env::var("RUST_LOG").ok())
        .unwrap_or_else(|| "slabot=info,slabot_gateway=info".to_string());
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::new(filter))
        .init();

    let args = Args::parse();
    let config = SlabotConfig::load(args.config.as_deref())?;
    config.validate()?;

    // One connection per subsystem over the same database file.
    let store = Store::open(&config.database.path)?;
    let queue = QueueHandle::open(&config.database.path)?;
    let cache = ClassificationCache::open(&config.database.path)?;

    let ai = AiClassifier::from_config(&config.ai);
    if ai.is_none() {
        warn!("no AI credentials configured; classifier runs cache + keyword only");
    }
    let classifier = Arc::new(ClassifierService::new(cache.clone(), ai));

    let timers = TimerManager::new(store.clone(), queue.clone());
    let alerts = AlertService::new(store.clone(), queue.clone(), timers.clone());
    let bot = Bot::new(&config.telegram.bot_token);
    let bot_ctx = Arc::new(BotContext::new(
        store.clone(),
        Arc::clone(&classifier),
        timers.clone(),
        alerts.clone(),
    ));

    // Reconcile persisted requests with queue state before workers start.
    let report = run_recovery(&store, &queue, &timers)?;
    info!(?report, "startup recovery finished");

    let sweeper = RetentionSweeper::new(store.clone(), queue.clone(), Some(cache));
    sweeper.schedule_initial()?;

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    let mut workers = Vec::new();
    workers.push(tokio::spawn(
        QueueWorker::new(
            queue.clone(),
            QUEUE_SLA_TIMERS,
            Arc::new(SlaTimerHandler::new(alerts.clone())),
            WorkerOptions::default(),
        )
        .run(shutdown_rx.clone()),
    ));
    workers.push(tokio::spawn(
        QueueWorker::new(
            queue.clone(),
            QUEUE_ALERTS,
            Arc::new(AlertDeliveryHandler::new(
                bot.clone(),
                store.clone(),
                alerts.clone(),
            )),
            WorkerOptions {
                concurrency: 4,
                rate_per_sec: Some(ALERTS_RATE_PER_SEC),
            },
        )
        .run(shutdown_rx.clone()),
    ));
    workers.push(tokio::spawn(
        QueueWorker::new(
            queue.clone(),
            QUEUE_RETENTION,
            Arc::new(RetentionHandler::new(sweeper)),
            WorkerOptions {
                concurrency: 1,
                rate_per_sec: None,
            },
        )
        .run(shutdown_rx.clone()),
    ));

    if config.telegram.mode == TelegramMode::Polling {
        let adapter = TelegramAdapter::new(bot.clone(), Arc::clone(&bot_ctx));
        tokio::spawn(adapter.run());
    } else {
        info!("webhook mode: updates arrive via POST /webhook/telegram");
    }

    let bind = config.gateway.bind.clone();
    let port = config.gateway.port;
    let state = Arc::new(app::AppState {
        config,
        store,
        queue,
        timers,
        alerts,
        classifier,
        bot,
        bot_ctx,
    });
    let router = app::build_router(state);

    let addr: SocketAddr = format!("{bind}:{port}").parse()?;
    info!("slabot gateway listening on {addr}");

    // Termination signal → stop accepting transport events and HTTP, then
    // give in-flight handlers a bounded grace period.
    {
        let tx = shutdown_tx.clone();
        tokio::spawn(async move {
            shutdown_signal().await;
            info!("termination signal received");
            let _ = tx.send(true);
        });
    }

    let mut rx = shutdown_rx.clone();
    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(async move {
            let _ = rx.wait_for(|stopped| *stopped).await;
        })
        .await?;

    info!(grace_secs = SHUTDOWN_GRACE_SECS, "draining workers");
    if tokio::time::timeout(
        Duration::from_secs(SHUTDOWN_GRACE_SECS),
        futures_util::future::join_all(workers),
    )
    .await
    .is_err()
    {
        // Interrupted jobs are safe to re-run after restart.
        warn!("grace period elapsed; proceeding with shutdown");
    }
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        let _ = tokio::signal::ctrl_c().await;
    };
    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(_) => std::future::pending::<()>().await,
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
