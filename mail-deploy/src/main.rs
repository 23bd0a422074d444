//! mail-deploy: mail server deployment
//!
//! # Usage
//!
//! ```bash
//! # Full deployment; writes deployment_<timestamp>/ under the output dir
//! mail-deploy --config automation_config.toml --output-dir reports
//!
//! # DNS analysis only, with suggested records for a known address
//! mail-deploy analyze --ip 203.0.113.10
//! ```

use clap::{Parser, Subcommand};
use mail_deploy::config::DeployConfig;
use mail_deploy::dns::analyzer::render_instructions;
use mail_deploy::dns::{suggest_records, DnsAnalyzer, SystemResolver};
use mail_deploy::{Capabilities, DeploymentJob, LoadOutcome, Pipeline};
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "mail-deploy")]
#[command(about = "Provision and configure a multi-domain mail server", long_about = None)]
#[command(version)]
struct Cli {
    /// Configuration file; a default one is written if missing
    #[arg(short, long, default_value = "automation_config.toml")]
    config: PathBuf,

    /// Directory receiving the deployment report
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Analyze DNS for the configured domains without deploying
    Analyze {
        /// Mail server address used for record suggestions
        #[arg(long)]
        ip: Option<Ipv4Addr>,
    },
}

fn init_logging(config: &DeployConfig) {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        format!(
            "mail_deploy={level},mail_monitor={level}",
            level = config.logging.level
        )
        .into()
    });

    let registry = tracing_subscriber::registry().with(filter);
    if config.logging.format == "json" {
        registry.with(tracing_subscriber::fmt::layer().json()).init();
    } else {
        registry.with(tracing_subscriber::fmt::layer()).init();
    }
}

fn print_summary(job: &DeploymentJob) {
    println!("Deployment {}: {}", job.id, job.stage);
    if let Some(address) = job.address {
        println!("  Server address: {}", address);
    }
    println!(
        "  Accounts: {} created, {} failed",
        job.accounts.len(),
        job.account_failures.len()
    );
    for failure in &job.account_failures {
        println!(
            "    {} {}: {}",
            failure.domain,
            failure.email.as_deref().unwrap_or("-"),
            failure.error
        );
    }
    for result in &job.dns {
        if !result.failed.is_empty() {
            println!(
                "  DNS {}: {} of {} records need manual setup",
                result.domain,
                result.failed.len(),
                result.suggestions.required.len()
            );
        }
    }
    for check in &job.verification {
        println!("  {:<28} {:?}", check.name, check.status);
    }
    if let Some(dir) = &job.report_dir {
        println!("  Report: {}", dir.display());
    }
    if let (Some(stage), Some(error)) = (job.failed_stage, &job.error) {
        println!("  Failed during {}: {}", stage, error);
    }
}

async fn analyze(config: &DeployConfig, ip: Option<Ipv4Addr>) {
    let analyzer = DnsAnalyzer::new(Arc::new(SystemResolver::new()));
    for analysis in analyzer.analyze_all(&config.domains).await {
        match ip {
            Some(address) => {
                let records = suggest_records(&analysis.domain, address);
                println!("{}", render_instructions(&analysis, &records));
            }
            None => {
                println!("Domain: {}", analysis.domain);
                println!("DNS Provider: {}", analysis.provider);
                for mx in &analysis.mx_records {
                    println!("  MX {} {}", mx.priority, mx.server);
                }
                for conflict in &analysis.conflicts {
                    println!(
                        "  CONFLICT {} ({}): {}",
                        conflict.description, conflict.record.server, conflict.remediation
                    );
                }
                println!();
            }
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let config = match DeployConfig::load(&cli.config)? {
        LoadOutcome::Loaded(config) => *config,
        LoadOutcome::Created(path) => {
            eprintln!(
                "Created default configuration at {}. Edit it and run mail-deploy again.",
                path.display()
            );
            std::process::exit(2);
        }
    };

    init_logging(&config);
    info!("Starting mail-deploy v{}", env!("CARGO_PKG_VERSION"));

    if let Some(Commands::Analyze { ip }) = cli.command {
        analyze(&config, ip).await;
        return Ok(());
    }

    let caps = Capabilities::from_config(&config)?;
    let pipeline = Pipeline::new(Arc::new(config), caps).with_output_dir(cli.output_dir);
    let job = pipeline.run().await;
    print_summary(&job);

    if !job.is_success() {
        error!("Deployment did not complete");
        std::process::exit(1);
    }
    Ok(())
}
