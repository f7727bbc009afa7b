//! Command-line interface for strobe.
//!
//! Wires the pipeline together: registry, router, broker, scheduler, and the
//! three listeners (gRPC ingest, WebSocket subscribers, Prometheus scrape),
//! then waits for ctrl-c and unwinds them in order.

use crate::broadcast::BroadcastScheduler;
use crate::broker::SubscriptionBroker;
use crate::core::config::ConfigBuilder;
use crate::core::{Config, Result, StrobeError};
use crate::export::{self, ExportState};
use crate::ingest::auth::ApiKeyAuthenticator;
use crate::ingest::{IngestRouter, IngestService};
use crate::proto::telemetry::v1::telemetry_ingestor_server::TelemetryIngestorServer;
use crate::storage::MetricRegistry;
use crate::ws::{self, WsState};
use clap::Parser;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Real-time telemetry aggregator
#[derive(Parser, Debug)]
#[command(name = "strobe")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// GRPC port for the telemetry ingestor
    #[arg(long, env = "STROBE_GRPC_PORT")]
    pub grpc_port: Option<u16>,

    /// HTTP port for the WebSocket subscriber endpoint
    #[arg(long, env = "STROBE_WS_PORT")]
    pub ws_port: Option<u16>,

    /// HTTP port for the Prometheus scrape endpoint
    #[arg(long, env = "STROBE_METRICS_PORT")]
    pub metrics_port: Option<u16>,

    /// Broadcast tick interval in milliseconds
    #[arg(long, env = "STROBE_TICK_MS")]
    pub tick_ms: Option<u64>,

    /// Accepted ingest API keys; empty disables authentication
    #[arg(long = "api-key", env = "STROBE_API_KEYS", value_delimiter = ',')]
    pub api_keys: Vec<String>,

    /// Configuration file path
    #[arg(short, long, env = "STROBE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Enable debug logging
    #[arg(short, long, env = "STROBE_DEBUG")]
    pub debug: bool,

    /// Validate configuration and exit
    #[arg(long)]
    pub check_config: bool,
}

impl Cli {
    /// Parse command-line arguments.
    pub fn parse_args() -> Self {
        Cli::parse()
    }

    /// Load configuration with proper precedence:
    /// 1. CLI arguments (highest priority)
    /// 2. Config file
    /// 3. Defaults (lowest priority)
    pub async fn load_config(&self) -> Result<Config> {
        let mut builder = ConfigBuilder::new();

        if let Some(path) = &self.config {
            let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                StrobeError::config(format!("Failed to read config file {:?}: {}", path, e))
            })?;
            builder = builder.from_yaml(&content)?;
            tracing::info!("Loaded configuration from: {:?}", path);
        }

        self.build_config_from_args(builder)
    }

    fn build_config_from_args(&self, mut builder: ConfigBuilder) -> Result<Config> {
        if let Some(port) = self.grpc_port {
            builder = builder.grpc_port(port);
        }
        if let Some(port) = self.ws_port {
            builder = builder.ws_port(port);
        }
        if let Some(port) = self.metrics_port {
            builder = builder.metrics_port(port);
        }
        if let Some(tick_ms) = self.tick_ms {
            builder = builder.tick_interval(Duration::from_millis(tick_ms));
        }
        if !self.api_keys.is_empty() {
            builder = builder.api_keys(self.api_keys.clone());
        }

        builder.debug(self.debug).build()
    }

    /// Initialize logging based on configuration.
    pub fn init_logging(&self, config: &Config) -> Result<()> {
        use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

        let log_level = if self.debug {
            "debug"
        } else {
            config.logging.level.as_str()
        };

        let filter =
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));

        let fmt_layer = if config.logging.structured {
            tracing_subscriber::fmt::layer()
                .with_target(true)
                .with_thread_ids(true)
        } else {
            tracing_subscriber::fmt::layer().with_target(false)
        };

        tracing_subscriber::registry()
            .with(filter)
            .with(fmt_layer)
            .try_init()
            .map_err(|e| StrobeError::config(format!("Failed to initialize logging: {}", e)))?;

        Ok(())
    }
}

/// Execute the strobe aggregator.
pub async fn execute(cli: Cli) -> Result<()> {
    let config = cli.load_config().await?;
    cli.init_logging(&config)?;

    if cli.check_config {
        config.validate()?;
        println!("Configuration is valid!");
        println!("  GRPC ingest port: {}", config.server.grpc_port);
        println!("  WebSocket port: {}", config.server.ws_port);
        println!("  Scrape port: {}", config.server.metrics_port);
        println!("  Tick interval: {:?}", config.broadcast.tick_interval);
        println!("  Scalar history: {}", config.history.scalar_capacity);
        println!("  Histogram history: {}", config.history.histogram_capacity);
        return Ok(());
    }

    run(config).await
}

async fn run(config: Config) -> Result<()> {
    tracing::info!("Starting aggregator...");

    let registry = Arc::new(MetricRegistry::new(
        config.history.scalar_capacity,
        config.history.histogram_capacity,
    ));
    let broker = Arc::new(SubscriptionBroker::new(
        config.subscriber.mailbox_capacity,
        config.broadcast.update_channel_capacity,
    ));
    let router = Arc::new(IngestRouter::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
    ));
    let authenticator = ApiKeyAuthenticator::new(config.auth.api_keys.clone());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);

    // Broadcast scheduler.
    let scheduler = BroadcastScheduler::new(
        Arc::clone(&registry),
        Arc::clone(&broker),
        config.broadcast.tick_interval,
        shutdown_rx.clone(),
    );
    let scheduler_handle = tokio::spawn(scheduler.run());

    // gRPC ingest listener.
    let grpc_addr = SocketAddr::new(config.server.bind_address, config.server.grpc_port);
    let ingest_service = IngestService::new(Arc::clone(&router));
    let grpc_service =
        TelemetryIngestorServer::with_interceptor(ingest_service, authenticator.interceptor());
    let mut grpc_shutdown = shutdown_rx.clone();
    let grpc_handle = tokio::spawn(async move {
        tracing::info!(%grpc_addr, "gRPC ingest listening");
        let result = tonic::transport::Server::builder()
            .add_service(grpc_service)
            .serve_with_shutdown(grpc_addr, async move {
                let _ = grpc_shutdown.wait_for(|stop| *stop).await;
            })
            .await;
        if let Err(err) = result {
            tracing::error!(error = %err, "gRPC server error");
        }
    });

    // WebSocket subscriber listener.
    let ws_addr = SocketAddr::new(config.server.bind_address, config.server.ws_port);
    let ws_state = WsState {
        broker: Arc::clone(&broker),
        config: config.subscriber.clone(),
    };
    let ws_shutdown = shutdown_rx.clone();
    let ws_handle = tokio::spawn(async move {
        if let Err(err) = ws::serve(ws_addr, ws_state, ws_shutdown).await {
            tracing::error!(error = %err, "WebSocket server error");
        }
    });

    // Prometheus scrape listener.
    let metrics_addr = SocketAddr::new(config.server.bind_address, config.server.metrics_port);
    let export_state = ExportState {
        registry: Arc::clone(&registry),
        broker: Arc::clone(&broker),
        stats: router.stats(),
    };
    let export_shutdown = shutdown_rx.clone();
    let export_handle = tokio::spawn(async move {
        if let Err(err) = export::serve(metrics_addr, export_state, export_shutdown).await {
            tracing::error!(error = %err, "scrape server error");
        }
    });

    tokio::signal::ctrl_c().await?;
    tracing::info!("Received shutdown signal, stopping...");
    let _ = shutdown_tx.send(true);

    // Scheduler stops first so no new ticks reach the mailboxes, then the
    // broker closes every mailbox, which terminates the write pumps.
    scheduler_handle.await?;
    broker.shutdown();
    grpc_handle.await?;
    ws_handle.await?;
    export_handle.await?;

    tracing::info!("Aggregator stopped");
    Ok(())
}
