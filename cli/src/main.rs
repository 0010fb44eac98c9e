// ipsp-gateway — BLE IPSP to IPv6/CoAP gateway
//
// Discovers BLE peripherals advertising the IP Support Profile, brings them up
// as 6LoWPAN interfaces and relays their CoAP traffic upstream.

mod ble;
mod bootstrap;
mod config;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use ipsp_gateway_core::{Gateway, LinuxHost, SixLowpanControl};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

#[derive(Parser)]
#[command(name = "ipsp-gateway")]
#[command(about = "IPSP Gateway — BLE 6LoWPAN onboarding and CoAP relay", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to the per-user config directory)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the gateway until interrupted
    Run {
        /// Local UDP address the relay listens on
        #[arg(short, long)]
        listen: Option<SocketAddr>,
        /// Remote CoAP endpoint (host:port)
        #[arg(short, long)]
        destination: Option<String>,
        /// Do not start the UDP relay
        #[arg(long)]
        no_relay: bool,
        /// Skip loading the kernel module and enabling 6LoWPAN
        #[arg(long)]
        skip_bootstrap: bool,
        #[arg(long, value_enum, default_value_t = LogFormat::Text)]
        log_format: LogFormat,
        /// Also write a daily-rotated log file into this directory
        #[arg(long)]
        log_dir: Option<PathBuf>,
    },
    /// Configure settings
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    Set { key: String, value: String },
    Get { key: String },
    List,
    /// Print the config file location
    Path,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config_path = match cli.config {
        Some(path) => path,
        None => config::Config::config_file()?,
    };

    match cli.command {
        Commands::Run {
            listen,
            destination,
            no_relay,
            skip_bootstrap,
            log_format,
            log_dir,
        } => {
            let _guard = init_tracing(log_format, log_dir.as_deref())?;
            let mut config = config::Config::load_from(&config_path)?;
            if let Some(listen) = listen {
                config.gateway.relay.listen = listen;
            }
            if let Some(destination) = destination {
                config.gateway.relay.destination = destination;
            }
            if no_relay {
                config.gateway.relay.enabled = false;
            }
            if skip_bootstrap {
                config.bootstrap.enabled = false;
            }
            cmd_run(config).await
        }
        Commands::Config { action } => {
            init_cli_tracing();
            cmd_config(&config_path, action)
        }
    }
}

/// Console subscriber (text or JSON) plus an optional rolling file.
///
/// The returned guard flushes the file writer and must live until exit.
fn init_tracing(
    format: LogFormat,
    log_dir: Option<&std::path::Path>,
) -> Result<Option<tracing_appender::non_blocking::WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();
    layers.push(match format {
        LogFormat::Text => fmt::layer().boxed(),
        LogFormat::Json => fmt::layer().json().boxed(),
    });

    let guard = match log_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir)
                .with_context(|| format!("Failed to create log directory {}", dir.display()))?;
            let appender = tracing_appender::rolling::daily(dir, "ipsp-gateway.log");
            let (writer, guard) = tracing_appender::non_blocking(appender);
            layers.push(fmt::layer().with_ansi(false).with_writer(writer).boxed());
            Some(guard)
        }
        None => None,
    };

    tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init()
        .context("Failed to install tracing subscriber")?;
    Ok(guard)
}

fn init_cli_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .init();
}

async fn cmd_run(config: config::Config) -> Result<()> {
    println!("{}", "Starting IPSP gateway...".bold());
    println!();

    bootstrap::prepare_kernel(&config.bootstrap)
        .await
        .context("Kernel bootstrap failed")?;

    let relay = &config.gateway.relay;
    if relay.enabled {
        println!(
            "  {} Relay: {} → {}",
            "✓".green(),
            relay.listen.to_string().bright_cyan(),
            relay.destination.bright_yellow()
        );
    } else {
        println!("  {} Relay disabled", "•".dimmed());
    }
    println!(
        "  {} Interfaces: {}* every {}s",
        "✓".green(),
        config.gateway.reconciler.interface_prefix.bright_cyan(),
        config.gateway.reconciler.poll_interval_secs
    );
    println!("  {} Press Ctrl+C to stop", "•".dimmed());
    println!();

    let scanner = Box::new(ble::BtleplugScanner::new(config.ble.adapter_index));
    let bridge = Arc::new(SixLowpanControl::new(&config.host.control_path));
    let host = Arc::new(LinuxHost::new(&config.host.sysfs_net, &config.host.ip_binary));

    let gateway = Gateway::new(config.gateway, scanner, bridge, host);
    gateway.run(shutdown_signal()).await?;

    println!();
    println!("{}", "Gateway stopped".bold());
    Ok(())
}

/// Resolves on Ctrl+C or SIGTERM
async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        use tokio::signal::unix::{signal, SignalKind};
        match signal(SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to install SIGTERM handler: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
}

fn cmd_config(path: &std::path::Path, action: ConfigAction) -> Result<()> {
    let mut config = config::Config::load_from(path)?;

    match action {
        ConfigAction::Set { key, value } => {
            config.set(&key, &value)?;
            config.save_to(path)?;
            println!("{} {} = {}", "✓".green(), key.bright_cyan(), value.bright_yellow());
        }
        ConfigAction::Get { key } => match config.get(&key) {
            Some(value) => println!("{}", value),
            None => anyhow::bail!("Unknown config key: {}", key),
        },
        ConfigAction::List => {
            println!("{}", "Configuration".bold());
            for (key, value) in config.list() {
                println!("  {:<34} {}", key.bright_cyan(), value);
            }
        }
        ConfigAction::Path => println!("{}", path.display()),
    }

    Ok(())
}
