//! trafficwatch binary entry point: loads configuration, wires the Event
//! Bus, SQLite store, and every worker behind a `Supervisor`, and serves
//! the HTTP/WebSocket surface alongside it.

use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use trafficwatch::api::create_app;
use trafficwatch::bus::{EventBus, InMemoryBus, RedisBus};
use trafficwatch::config::{self, Config};
use trafficwatch::persister::SqliteStore;
use trafficwatch::supervisor::Supervisor;

#[derive(Parser, Debug)]
#[command(name = "trafficwatch")]
#[command(about = "Edge traffic-monitoring event-correlation and durability pipeline")]
#[command(version)]
struct CliArgs {
    /// Relax startup validation: invalid env values fall back to defaults
    /// with a warning instead of a fatal configuration error.
    #[arg(long)]
    dev: bool,

    /// Use the in-memory Event Bus instead of Redis. For local smoke tests.
    #[arg(long)]
    in_memory_bus: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info")),
        )
        .with_target(false)
        .init();

    let args = CliArgs::parse();

    let config = match Config::from_env(!args.dev) {
        Ok(c) => c,
        Err(e) => {
            error!(error = %e, "configuration error");
            return ExitCode::from(2);
        }
    };
    config::init(config);
    let cfg = config::get();

    info!("trafficwatch starting");

    let bus: Arc<dyn EventBus> = if args.in_memory_bus {
        Arc::new(InMemoryBus::new())
    } else {
        match RedisBus::connect(&cfg.redis.host, cfg.redis.port).await {
            Ok(b) => Arc::new(b),
            Err(e) => {
                error!(error = %e, "failed to connect to event bus");
                return ExitCode::from(1);
            }
        }
    };

    let db_path = cfg.storage.database_path.to_string_lossy().to_string();
    let store = match SqliteStore::open(&db_path) {
        Ok(s) => Arc::new(s),
        Err(e) => {
            error!(error = %e, "failed to open sqlite store");
            return ExitCode::from(1);
        }
    };

    let supervisor = Supervisor::new(bus, store, cfg);
    let query = supervisor.query_surface();
    let broker = supervisor.broker();
    let cancel = supervisor.cancellation_token();

    let shutdown_token = cancel.clone();
    tokio::spawn(async move {
        tokio::signal::ctrl_c().await.ok();
        info!("received shutdown signal");
        shutdown_token.cancel();
    });

    let app = create_app(query, broker);
    let addr = format!("{}:{}", cfg.api.host, cfg.api.port);
    let listener = match tokio::net::TcpListener::bind(&addr).await {
        Ok(l) => l,
        Err(e) => {
            error!(error = %e, addr, "failed to bind http listener");
            return ExitCode::from(1);
        }
    };
    info!(addr, "http server listening");

    let http_cancel = cancel.clone();
    let http_task = tokio::spawn(async move {
        axum::serve(listener, app)
            .with_graceful_shutdown(async move { http_cancel.cancelled().await })
            .await
    });

    if let Err(e) = supervisor.run().await {
        error!(error = %e, "supervisor exited with error");
        cancel.cancel();
        let _ = http_task.await;
        return ExitCode::from(1);
    }

    cancel.cancel();
    if let Err(e) = http_task.await {
        error!(error = %e, "http server task panicked");
        return ExitCode::from(1);
    }

    info!("trafficwatch shutdown complete");
    ExitCode::SUCCESS
}
