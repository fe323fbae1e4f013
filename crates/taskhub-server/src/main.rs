use clap::Parser;
use std::sync::Arc;
use std::time::Duration;
use taskhub_queue::{MemoryTransport, QueueAdapter};
use taskhub_server::api::{create_router, AppState};
use taskhub_server::{LifecycleManager, Metrics, NotificationHub, ServerConfig};
use taskhub_store::MemoryTaskStore;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser, Debug)]
#[command(name = "taskhub")]
#[command(about = "Task orchestration and realtime notification server", long_about = None)]
struct Args {
    /// Path to configuration file
    #[arg(short, long, default_value = "config.yaml")]
    config: String,

    /// Listen host
    #[arg(long)]
    host: Option<String>,

    /// Listen port
    #[arg(long)]
    port: Option<u16>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut config = if std::path::Path::new(&args.config).exists() {
        ServerConfig::from_file(&args.config)?
    } else {
        ServerConfig::default()
    };

    // Override with CLI args
    if let Some(host) = args.host {
        config.server.host = host;
    }
    if let Some(port) = args.port {
        config.server.port = port;
    }

    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| config.monitoring.log_level.clone().into()),
        )
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    if !std::path::Path::new(&args.config).exists() {
        tracing::warn!("Config file not found, using defaults");
    }
    tracing::info!("Starting taskhub with config: {:?}", config);

    let metrics = Arc::new(Metrics::new()?);

    let transport = Arc::new(MemoryTransport::new(Duration::from_secs(u64::from(
        config.queue.visibility_timeout_seconds,
    ))));
    let queue =
        QueueAdapter::new(transport).with_receive_wait(config.queue.receive_wait_seconds);

    let store = Arc::new(MemoryTaskStore::new());

    let (hub, hub_handle) = NotificationHub::new(metrics.clone());
    tokio::spawn(hub.run());

    let lifecycle = LifecycleManager::new(store, queue, hub_handle.clone(), metrics.clone());

    let state = Arc::new(AppState {
        lifecycle,
        hub: hub_handle,
        metrics,
        session_buffer: config.hub.session_buffer,
    });

    let app = create_router(state);
    let addr = format!("{}:{}", config.server.host, config.server.port);
    tracing::info!("Listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
