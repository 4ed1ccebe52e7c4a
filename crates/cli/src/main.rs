mod channel_commands;
mod check_commands;
mod engine;
mod roster;

use std::path::{Path, PathBuf};

use {
    chatrelay_bus::{BusConfig, MessageBus},
    chatrelay_config::RelayConfig,
    clap::{Parser, Subcommand},
    tracing::{error, info, warn},
    tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt},
};

#[derive(Parser)]
#[command(name = "chatrelay", about = "chatrelay: relay chat platforms onto a message bus")]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Config file (overrides discovery of ./chatrelay.toml and the user
    /// config directory).
    #[arg(long, global = true, env = "CHATRELAY_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON instead of human-readable.
    #[arg(long, global = true, default_value_t = false)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start every enabled channel (default when no subcommand is provided).
    Run {
        /// Answer each inbound message with its own text.
        #[arg(long, default_value_t = false)]
        echo: bool,
    },
    /// Validate the configuration and exit.
    Check,
    /// List configured channels.
    Channels,
}

fn init_telemetry(cli: &Cli) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&cli.log_level));

    let registry = tracing_subscriber::registry().with(filter);

    if cli.json_logs {
        registry
            .with(fmt::layer().json().with_target(true).with_thread_ids(false))
            .init();
    } else {
        registry
            .with(
                fmt::layer()
                    .with_target(false)
                    .with_thread_ids(false)
                    .with_ansi(true),
            )
            .init();
    }
}

/// Explicit `--config` must load; discovery falls back to defaults.
fn load_config(path: Option<&Path>) -> anyhow::Result<RelayConfig> {
    match path {
        Some(path) => chatrelay_config::load_config(path),
        None => Ok(chatrelay_config::discover_and_load()),
    }
}

fn bus_config(config: &RelayConfig) -> BusConfig {
    BusConfig {
        queue_capacity: config.bus.queue_capacity.max(1),
        handoff_timeout: config.bus.handoff_timeout(),
    }
}

async fn run(config_path: Option<&Path>, echo: bool) -> anyhow::Result<()> {
    let config = load_config(config_path)?;
    let bus = MessageBus::new(bus_config(&config))?;
    let manager = roster::build(&config, &bus)?;
    if manager.is_empty() {
        warn!("no channels enabled; waiting for shutdown anyway");
    }

    let echo_subscription = echo.then(|| engine::attach_echo(&bus));

    let report = manager.start_all().await;
    for (name, e) in report.failed() {
        error!(channel = name, error = %e, "channel failed to start");
    }
    info!(
        running = ?report.succeeded(),
        failed = report.failed().len(),
        "relay running, press Ctrl-C to stop"
    );

    tokio::signal::ctrl_c().await?;
    info!("shutdown requested");

    let report = manager.stop_all().await;
    if !report.is_success() {
        warn!(%report, "some channels did not stop cleanly");
    }
    if let Some(id) = echo_subscription {
        bus.unsubscribe_inbound(id);
    }
    bus.shutdown();
    info!("chatrelay stopped");
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_telemetry(&cli);

    info!(version = env!("CARGO_PKG_VERSION"), "chatrelay starting");

    match cli.command {
        None => run(cli.config.as_deref(), false).await,
        Some(Commands::Run { echo }) => run(cli.config.as_deref(), echo).await,
        Some(Commands::Check) => check_commands::handle_check(cli.config.as_deref()),
        Some(Commands::Channels) => channel_commands::handle_channels(cli.config.as_deref()).await,
    }
}
