//! mail-monitor: mail server health monitor
//!
//! Runs health checks on a fixed interval until interrupted, or a single
//! check with `--once`.

use clap::Parser;
use mail_monitor::health::format_summary;
use mail_monitor::{HealthMonitor, MonitorConfig, ProbeSet};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mail-monitor")]
#[command(about = "Continuous health monitoring for a mail server")]
#[command(version)]
struct Cli {
    /// Configuration file
    #[arg(short, long, default_value = "/opt/email-automation/monitor_config.toml")]
    config: PathBuf,

    /// Run a single health check and exit
    #[arg(long)]
    once: bool,
}

fn init_logging(config: &MonitorConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("mail_monitor={}", config.logging.level).into());

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let (config, missing) = if cli.config.exists() {
        (MonitorConfig::from_file(&cli.config)?, false)
    } else {
        (MonitorConfig::default(), true)
    };

    init_logging(&config);
    info!("Starting mail-monitor v{}", env!("CARGO_PKG_VERSION"));
    if missing {
        warn!(
            "Config file {} not found, using defaults",
            cli.config.display()
        );
    }

    let config = Arc::new(config);
    let probes = ProbeSet::system(&config);
    let monitor = HealthMonitor::new(config, probes);

    if cli.once {
        let snapshot = monitor.run_once().await;
        println!("{}", format_summary(&snapshot));
        if !snapshot.is_healthy() {
            std::process::exit(1);
        }
        return Ok(());
    }

    monitor
        .run_until(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
                std::future::pending::<()>().await;
            }
            info!("Shutdown signal received");
        })
        .await;

    Ok(())
}
