//! Market Data Stream Binary
//!
//! Runs the stream controller against the simulated feed, subscribes a demo
//! watchlist, and serves health and metrics until shutdown.
//!
//! # Usage
//!
//! ```bash
//! cargo run --bin market-data-stream
//! ```
//!
//! # Environment Variables
//!
//! - `STREAM_POLL_INTERVAL_MS`: Feed session poll interval (default: 500)
//! - `STREAM_SHUTDOWN_GRACE_SECS`: Session shutdown grace period (default: 5)
//! - `STREAM_HEALTH_PORT`: Health check HTTP port (default: 8083)
//! - `STREAM_SIMULATED_EVENTS_PER_POLL`: Simulated events per symbol per poll (default: 4)
//! - `OTEL_ENABLED`: Enable OpenTelemetry export (default: false)
//! - `OTEL_EXPORTER_OTLP_ENDPOINT`: OTLP endpoint (default: <http://localhost:4318>)
//! - `OTEL_SERVICE_NAME`: Service name (default: market-data-stream)
//! - `RUST_LOG`: Log level (default: info)

use std::sync::Arc;
use std::time::Duration;

use market_data_stream::infrastructure::health::{HealthServer, HealthServerState};
use market_data_stream::infrastructure::telemetry;
use market_data_stream::{
    Category, ControllerConfig, MarketEvent, SimulatedFeedProvider, StreamConfig,
    StreamController, init_metrics,
};
use tokio::signal;
use tokio_util::sync::CancellationToken;

/// Interval between watchlist snapshots in the log.
const REPORT_INTERVAL: Duration = Duration::from_secs(5);

const DEMO_GREEKS: &[&str] = &[".IWM240705P207"];
const DEMO_QUOTES: &[&str] = &["IWM", "AAPL", "NVDA", "TSLA"];
const DEMO_TRADES: &[&str] = &["AAPL", "TSLA"];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    load_dotenv();

    // Initialize telemetry (tracing + optional OpenTelemetry)
    let _telemetry_guard = telemetry::init();

    tracing::info!("Starting market data stream");

    // Initialize Prometheus metrics
    let _metrics_handle = init_metrics()?;

    let config = StreamConfig::from_env()?;
    log_config(&config);

    let shutdown_token = CancellationToken::new();

    let provider = Arc::new(SimulatedFeedProvider::new(config.simulated.events_per_poll));
    let controller = Arc::new(StreamController::new(
        ControllerConfig::from(&config.session),
        provider,
    ));

    // Initialize health server
    let health_state = Arc::new(HealthServerState::new(
        env!("CARGO_PKG_VERSION").to_string(),
        Arc::clone(&controller),
    ));
    let health_server = HealthServer::new(
        config.server.health_port,
        health_state,
        shutdown_token.clone(),
    );

    tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            tracing::error!(error = %e, "Health server error");
        }
    });

    controller.subscribe(Category::Greeks, DEMO_GREEKS);
    controller.subscribe(Category::Quote, DEMO_QUOTES);
    controller.subscribe(Category::Trade, DEMO_TRADES);
    controller.start()?;

    let report_controller = Arc::clone(&controller);
    let report_shutdown = shutdown_token.clone();
    tokio::spawn(async move {
        report_watchlist(&report_controller, report_shutdown).await;
    });

    tracing::info!("Market data stream ready");

    await_shutdown(shutdown_token).await;

    controller.stop().await;

    tracing::info!("Market data stream stopped");
    Ok(())
}

/// Periodically log the latest cached values for the demo watchlist.
async fn report_watchlist(controller: &StreamController, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(REPORT_INTERVAL);
    interval.tick().await;

    loop {
        tokio::select! {
            () = shutdown.cancelled() => break,
            _ = interval.tick() => {}
        }

        for event in controller.get(Category::Quote, DEMO_QUOTES) {
            if let MarketEvent::Quote(quote) = event {
                tracing::info!(
                    symbol = %quote.symbol,
                    bid = %quote.bid_price,
                    ask = %quote.ask_price,
                    "Latest quote"
                );
            }
        }

        for event in controller.get(Category::Trade, DEMO_TRADES) {
            if let MarketEvent::Trade(trade) = event {
                tracing::info!(
                    symbol = %trade.symbol,
                    price = %trade.price,
                    size = %trade.size,
                    "Latest trade"
                );
            }
        }

        for event in controller.get(Category::Greeks, DEMO_GREEKS) {
            if let MarketEvent::Greeks(greeks) = event {
                tracing::info!(
                    symbol = %greeks.symbol,
                    delta = %greeks.delta,
                    volatility = %greeks.volatility,
                    "Latest greeks"
                );
            }
        }
    }
}

/// Load .env file from current or ancestor directories.
fn load_dotenv() {
    if dotenvy::dotenv().is_ok() {
        return;
    }

    if let Ok(cwd) = std::env::current_dir() {
        let mut dir = cwd.as_path();
        while let Some(parent) = dir.parent() {
            let env_path = parent.join(".env");
            if env_path.exists() {
                let _ = dotenvy::from_path(&env_path);
                return;
            }
            dir = parent;
        }
    }
}

/// Log the parsed configuration.
fn log_config(config: &StreamConfig) {
    tracing::info!(
        poll_interval = ?config.session.poll_interval,
        shutdown_grace_secs = config.session.shutdown_grace.as_secs(),
        health_port = config.server.health_port,
        simulated_events_per_poll = config.simulated.events_per_poll,
        "Configuration loaded"
    );
}

/// Wait for shutdown signal (SIGTERM or SIGINT).
#[allow(clippy::expect_used)]
async fn await_shutdown(shutdown_token: CancellationToken) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("signal handler installation is critical for graceful shutdown");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("SIGTERM handler installation is critical for graceful shutdown")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {
            tracing::info!("Received Ctrl+C, initiating shutdown");
        }
        () = terminate => {
            tracing::info!("Received SIGTERM, initiating shutdown");
        }
    }

    shutdown_token.cancel();
}
