//! Settlement server: HTTP API plus the in-process settlement loop.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context as _, Error};
use cb_server::{api, config::ServerConfig, logging, metrics};
use courtbook::{
    SettlementContext,
    auth::TokenVerifier,
    db::{Database, PgStore},
    notifications::{DEFAULT_QUEUE_CAPACITY, NotificationQueue, SettlementNotification},
    payments::HttpPaymentGateway,
};
use pico_args::Arguments;
use tokio::sync::mpsc;

const HELP: &str = "\
Run the courtbook settlement server

USAGE:
  cb_server [OPTIONS]

OPTIONS:
  --bind       IP:PORT     Server socket bind address  [default: env SERVER_BIND or 127.0.0.1:8080]
  --db-url     URL         Database connection string  [default: env DATABASE_URL]

FLAGS:
  --no-scheduler           Only settle when POST /api/v1/settlement/run is called
  -h, --help               Print help information

ENVIRONMENT:
  JWT_SECRET               JWT signing secret (required, 32+ chars)
  CRON_SECRET              Settlement trigger secret (required, 16+ chars)
  WEBHOOK_SECRET           Gateway webhook secret (required, 16+ chars)
  SETTLEMENT_INTERVAL_SECS Seconds between settlement runs, 0 disables [default: 3600]
  (See src/config.rs for all configuration options)
";

struct Args {
    bind: Option<SocketAddr>,
    database_url: Option<String>,
    no_scheduler: bool,
}

#[tokio::main]
async fn main() -> Result<(), Error> {
    // Load .env file if it exists
    let _ = dotenvy::dotenv();

    let mut pargs = Arguments::from_env();

    // Help has a higher priority and should be handled separately.
    if pargs.contains(["-h", "--help"]) {
        print!("{HELP}");
        std::process::exit(0);
    }

    let args = Args {
        bind: pargs.opt_value_from_str("--bind")?,
        database_url: pargs.opt_value_from_str("--db-url")?,
        no_scheduler: pargs.contains("--no-scheduler"),
    };

    logging::init();

    let config = ServerConfig::from_env(args.bind, args.database_url)?;
    config.validate()?;

    if let Some(metrics_bind) = config.metrics_bind {
        metrics::init_metrics(metrics_bind).map_err(anyhow::Error::msg)?;
        tracing::info!("Prometheus exporter listening on {}", metrics_bind);
    }

    tracing::info!("Connecting to database");
    let db = Database::new(&config.database)
        .await
        .context("Failed to connect to database")?;
    db.migrate().await.context("Failed to apply migrations")?;
    tracing::info!("Database connected and migrated");

    let store = Arc::new(PgStore::new(Arc::new(db.pool().clone())));
    let gateway = Arc::new(
        HttpPaymentGateway::new(config.gateway.clone())
            .context("Failed to build payment gateway client")?,
    );
    let (notifications, receiver) = NotificationQueue::channel(DEFAULT_QUEUE_CAPACITY);

    let context = SettlementContext::new(store, gateway, notifications, config.context_config());
    tokio::spawn(forward_notifications(receiver));

    let interval = config.settlement.interval_secs;
    if args.no_scheduler || interval == 0 {
        tracing::info!("In-process settlement loop disabled");
    } else {
        tracing::info!("Settlement loop running every {}s", interval);
        tokio::spawn(settlement_loop(
            context.clone(),
            Duration::from_secs(interval),
        ));
    }

    let tokens = TokenVerifier::new(config.security.jwt_secret.clone())?;
    let state = api::AppState::new(
        context,
        tokens,
        config.security.cron_secret.clone(),
        Some(db.clone()),
    );
    let app = api::create_router(state);

    let listener = tokio::net::TcpListener::bind(config.bind)
        .await
        .with_context(|| format!("Failed to bind to {}", config.bind))?;

    tracing::info!(
        "Server is running at http://{}. Press Ctrl+C to stop.",
        config.bind
    );

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("Server error")?;

    tracing::info!("Shutting down server...");
    db.close().await;

    Ok(())
}

/// Run a settlement tick on every interval; the first tick fires immediately.
async fn settlement_loop(context: SettlementContext, period: Duration) {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        interval.tick().await;
        // Failures are logged inside; the next tick retries
        let _ = api::settlement::run_tick(&context, "interval").await;
    }
}

/// Emit queued notifications on the `notifications` log target
async fn forward_notifications(mut receiver: mpsc::Receiver<SettlementNotification>) {
    while let Some(notification) = receiver.recv().await {
        match serde_json::to_string(&notification) {
            Ok(payload) => tracing::info!(target: "notifications", "{}", payload),
            Err(e) => tracing::warn!("Unserializable notification {:?}: {}", notification, e),
        }
    }
}

/// Graceful shutdown signal
async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for CTRL+C: {}", e);
        std::future::pending::<()>().await;
    }
}
