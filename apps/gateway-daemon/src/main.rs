use anyhow::Result;
use clap::Parser;
use device_gateway::{Gateway, GatewayConfig};
use device_registry::{Directory, FileDictionarySource, MetricsHub};
use mqtt_transport::{MqttConnectOptions, MqttTransport};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use telemetry_router::InMemoryStatusStore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

const STATUS_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Parser)]
#[command(name = "gateway-daemon")]
#[command(about = "Fieldlink device gateway: frames, commands and telemetry over MQTT")]
struct Args {
    /// Gateway config file (YAML or JSON); defaults apply when missing
    #[arg(long, default_value = "configs/gateway.yaml")]
    config: PathBuf,

    /// Override the broker host
    #[arg(long)]
    broker_host: Option<String>,

    /// Override the broker port
    #[arg(long)]
    broker_port: Option<u16>,

    /// Override the dictionary file
    #[arg(long)]
    dictionary: Option<PathBuf>,

    /// Log level used when RUST_LOG is not set
    #[arg(long)]
    log_level: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let mut config = GatewayConfig::load(&args.config)?;
    if let Some(host) = args.broker_host {
        config.broker_host = host;
    }
    if let Some(port) = args.broker_port {
        config.broker_port = port;
    }
    if let Some(path) = args.dictionary {
        config.dictionary_path = Some(path);
    }
    if let Some(level) = args.log_level {
        config.log_level = level;
    }
    config.validate()?;
    setup_tracing(&config.log_level);

    info!("Fieldlink gateway-daemon starting");
    info!(
        broker = %format!("{}:{}", config.broker_host, config.broker_port),
        encoding = ?config.inbound_encoding,
        command_timeout_ms = config.command_timeout_ms,
        "configuration loaded"
    );

    let metrics =
        MetricsHub::new().map_err(|e| anyhow::anyhow!("Failed to create metrics hub: {}", e))?;
    let shutdown = CancellationToken::new();

    let mqtt_options = MqttConnectOptions {
        host: config.broker_host.clone(),
        port: config.broker_port,
        client_id: config.client_id.clone(),
        keep_alive: config.keep_alive(),
        ..MqttConnectOptions::default()
    };
    let (transport, inbound) = MqttTransport::connect(&mqtt_options, shutdown.clone());

    let dictionary_source = config.dictionary_path.clone().map(FileDictionarySource::new);
    let gateway = Arc::new(Gateway::new(
        config,
        Arc::new(transport),
        Arc::new(Directory::new()),
        Arc::new(InMemoryStatusStore::new()),
        metrics,
        shutdown.clone(),
    ));

    match &dictionary_source {
        Some(source) => {
            let summary = gateway.refresh_dictionary(source)?;
            info!(
                path = %source.path().display(),
                commands = summary.commands,
                payload_types = summary.payload_types,
                "dictionary loaded"
            );
        }
        None => warn!("no dictionary_path configured; every frame will be rejected"),
    }

    gateway.subscribe_all().await?;

    let runner = Arc::clone(&gateway);
    let run_task = tokio::spawn(async move { runner.run(inbound).await });

    tokio::spawn(report_status(Arc::clone(&gateway), shutdown.clone()));

    #[cfg(unix)]
    {
        if let Some(source) = dictionary_source {
            tokio::spawn(reload_on_hangup(
                Arc::clone(&gateway),
                source,
                shutdown.clone(),
            ));
        }
    }

    let _ = tokio::signal::ctrl_c().await;
    info!("shutdown requested");
    shutdown.cancel();
    if let Err(e) = run_task.await {
        error!("gateway task failed: {}", e);
    }
    debug!(metrics = %gateway.metrics().encode_text(), "final metrics");

    info!("Gateway daemon shutting down");
    Ok(())
}

async fn report_status(gateway: Arc<Gateway>, shutdown: CancellationToken) {
    let mut ticker = tokio::time::interval(STATUS_INTERVAL);
    ticker.tick().await;
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            _ = ticker.tick() => {
                let status = gateway.status();
                info!(
                    online = status.online_devices,
                    registered = status.registered_devices,
                    workers = status.active_workers,
                    pending = status.pending_transactions,
                    overdue = status.overdue_transactions,
                    "gateway status"
                );
            }
        }
    }
}

/// Re-read the dictionary file on SIGHUP.
#[cfg(unix)]
async fn reload_on_hangup(
    gateway: Arc<Gateway>,
    source: FileDictionarySource,
    shutdown: CancellationToken,
) {
    use tokio::signal::unix::{signal, SignalKind};

    let mut hangup = match signal(SignalKind::hangup()) {
        Ok(s) => s,
        Err(e) => {
            warn!("SIGHUP handler unavailable: {}", e);
            return;
        }
    };
    loop {
        tokio::select! {
            _ = shutdown.cancelled() => break,
            received = hangup.recv() => {
                if received.is_none() {
                    break;
                }
                match gateway.refresh_dictionary(&source) {
                    Ok(summary) => info!(
                        commands = summary.commands,
                        payload_types = summary.payload_types,
                        "dictionary reloaded"
                    ),
                    Err(e) => error!("dictionary reload failed, keeping current: {}", e),
                }
            }
        }
    }
}

fn setup_tracing(default_level: &str) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}
