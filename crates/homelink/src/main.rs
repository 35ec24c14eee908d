use std::path::PathBuf;

use anyhow::Context;
use clap::Parser;
use homelink::config::LoggingConfig;
use homelink::session::RumqttcTransport;
use homelink::Config;
use homelink::LogLevel;
use homelink::SessionController;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::EnvFilter;

/// MQTT session daemon for the home dashboard
#[derive(Debug, Parser)]
#[command(version, about)]
struct Args {
    /// Path to the TOML configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the configured log level
    #[arg(long, value_parser = parse_log_level)]
    log_level: Option<LogLevel>,

    /// Do not start the HTTP API
    #[arg(long)]
    no_api: bool,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    // Load configuration; without a file every default applies
    let mut config = match &args.config {
        Some(path) => Config::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => Config::default(),
    };
    if let Some(level) = args.log_level {
        config.logging.level = level;
    }

    // Initialize tracing/logging
    init_tracing(&config.logging);

    tracing::info!("homelink starting");
    if let Some(path) = &args.config {
        tracing::info!("Loaded config from: {}", path.display());
    }
    tracing::info!(
        "Namespace {} (primary {}:{}, alternate {})",
        config.mqtt.namespace,
        config.mqtt.primary.host,
        config.mqtt.primary.port,
        if config.mqtt.alternate.enabled {
            format!("{}:{}", config.mqtt.alternate.host, config.mqtt.alternate.port)
        } else {
            "disabled".to_string()
        }
    );

    let transport = RumqttcTransport::new(&config.mqtt);
    let controller = SessionController::new(transport, &config.mqtt, &config.debounce);
    let (session, session_task) = controller.spawn();

    if config.mqtt.auto_connect {
        let state = session.connect().await?;
        tracing::info!("Initial connection attempt finished: {}", state);
    }

    // Start the HTTP API
    let (api_shutdown_tx, api_task) = start_api(&config, &args, session.clone());

    tracing::info!("Press Ctrl+C to exit");

    // Wait for Ctrl+C
    match tokio::signal::ctrl_c().await {
        Ok(()) => {
            tracing::info!("Received shutdown signal");
        }
        Err(e) => {
            tracing::error!("Failed to listen for shutdown signal: {}", e);
        }
    }

    if let Some(tx) = api_shutdown_tx {
        let _ = tx.send(());
    }
    if let Some(task) = api_task {
        if let Err(e) = task.await {
            tracing::error!("HTTP API task failed: {}", e);
        }
    }

    session.shutdown();
    session_task.await.context("Session controller task failed")?;

    tracing::info!("homelink shutdown complete");

    Ok(())
}

type ApiParts = (
    Option<tokio::sync::oneshot::Sender<()>>,
    Option<tokio::task::JoinHandle<()>>,
);

#[cfg(feature = "api")]
fn start_api(config: &Config, args: &Args, session: homelink::SessionHandle) -> ApiParts {
    if !config.api.enabled || args.no_api {
        tracing::info!("HTTP API disabled");
        return (None, None);
    }

    let (tx, rx) = tokio::sync::oneshot::channel();
    let listen = config.api.listen.clone();
    let port = config.api.port;
    let task = tokio::spawn(async move {
        if let Err(e) = homelink::api::serve(listen, port, session, rx).await {
            tracing::error!("HTTP API server failed: {}", e);
        }
    });
    (Some(tx), Some(task))
}

#[cfg(not(feature = "api"))]
fn start_api(_config: &Config, _args: &Args, _session: homelink::SessionHandle) -> ApiParts {
    (None, None)
}

fn init_tracing(logging: &LoggingConfig) {
    // RUST_LOG wins over the config file
    let mut directives = LevelFilter::from(logging.level).to_string();
    for (target, level) in &logging.overrides {
        directives.push_str(&format!(",{}={}", target, LevelFilter::from(*level)));
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directives)),
        )
        .init();
}

fn parse_log_level(level: &str) -> Result<LogLevel, String> {
    match level.to_lowercase().as_str() {
        "trace" => Ok(LogLevel::Trace),
        "debug" => Ok(LogLevel::Debug),
        "info" => Ok(LogLevel::Info),
        "warn" | "warning" => Ok(LogLevel::Warn),
        "error" => Ok(LogLevel::Error),
        _ => Err(format!("invalid log level '{}'", level)),
    }
}
