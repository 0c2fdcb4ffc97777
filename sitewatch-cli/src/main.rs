mod display;
mod logging;
mod repl;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use colored::Colorize;
use sitewatch_core::config::{data_dir_from_env, Config};
use sitewatch_core::{
    timefmt, Monitor, MonitorSettings, OwnerId, ProbeSet, Registry, ReportFormatter, Section, SiteService,
    TelegramNotifier,
};
use tracing::info;

use crate::display::Spinner;

#[derive(Parser)]
#[command(name = "sitewatch")]
#[command(about = "Website, TLS certificate and domain expiry monitor with Telegram alerts")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Option<Commands>,

    /// Owner whose registry the command works on (a Telegram chat id)
    #[arg(short, long, default_value = "local", global = true)]
    owner: String,

    /// Directory holding the registries (defaults to DATA_DIR, then ./data)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    /// Output format
    #[arg(short, long, value_enum, default_value_t = OutputFormat::Human, global = true)]
    format: OutputFormat,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum OutputFormat {
    Human,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the monitor loop until interrupted
    Run,
    /// Start monitoring a website
    Add {
        /// URL to monitor, including the http:// or https:// scheme
        url: String,
    },
    /// Stop monitoring a website
    Remove {
        /// URL as it was added
        url: String,
    },
    /// List monitored websites
    List,
    /// Check every monitored website now
    Status,
    /// Toggle a section of the status report for one website
    Settings {
        /// Monitored URL
        url: String,
        /// ssl, dns or domain
        section: Section,
    },
    /// Forget every website of the owner
    Purge,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Some(Commands::Run) => run_monitor(cli.data_dir).await,
        Some(command) => {
            let _guard = logging::init("warn", None);
            let service = build_service(cli.data_dir.unwrap_or_else(data_dir_from_env))?;
            let owner = OwnerId::new(cli.owner)?;
            execute_command(command, &service, &owner, cli.format).await
        }
        None => {
            let _guard = logging::init("warn", None);
            let service = build_service(cli.data_dir.unwrap_or_else(data_dir_from_env))?;
            let owner = OwnerId::new(cli.owner)?;
            let mut repl = repl::Repl::new(service, owner)?;
            repl.run().await
        }
    }
}

fn build_service(data_dir: PathBuf) -> anyhow::Result<SiteService> {
    let registry = Arc::new(Registry::new(data_dir));
    let prober = Arc::new(ProbeSet::new()?);
    Ok(SiteService::new(registry, prober))
}

async fn run_monitor(data_dir: Option<PathBuf>) -> anyhow::Result<()> {
    let mut config = Config::from_env().context("Invalid configuration")?;
    if let Some(dir) = data_dir {
        config.data_dir = dir;
    }
    let _guard = logging::init("info", config.log_dir.as_deref());

    info!(
        data_dir = %config.data_dir.display(),
        route = ?config.route,
        "Starting sitewatch"
    );

    let registry = Arc::new(Registry::new(config.data_dir.clone()));
    let prober = Arc::new(ProbeSet::new()?);
    let notifier = Arc::new(
        TelegramNotifier::new(config.bot_token.clone(), config.route.clone())?
            .with_api_url(config.telegram_api_url.clone()),
    );
    let monitor = Monitor::new(MonitorSettings::from(&config), registry, prober, notifier);

    monitor
        .run(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "Failed to listen for Ctrl-C");
                std::future::pending::<()>().await;
            }
        })
        .await;

    info!("sitewatch stopped");
    Ok(())
}

async fn execute_command(
    command: Commands,
    service: &SiteService,
    owner: &OwnerId,
    format: OutputFormat,
) -> anyhow::Result<()> {
    let formatter = ReportFormatter::new();

    match command {
        Commands::Add { url } => {
            let url = checked(service.add_target(owner, &url))?;
            println!("{} {} is now monitored", "✓".bright_green(), url);
        }
        Commands::Remove { url } => {
            let url = checked(service.remove_target(owner, &url))?;
            println!("{} {} is no longer monitored", "✓".bright_green(), url);
        }
        Commands::List => {
            let targets = service.list_targets(owner)?;
            match format {
                OutputFormat::Human => println!("{}", formatter.format_targets(&targets)),
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&targets)?),
            }
        }
        Commands::Status => {
            let spinner = Spinner::new(&format!("Checking websites of {}", owner));
            let statuses = service.get_status(owner).await;
            spinner.finish();
            let statuses = statuses?;
            match format {
                OutputFormat::Human => {
                    println!("{}", formatter.format_statuses(&statuses, timefmt::now()))
                }
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&statuses)?),
            }
        }
        Commands::Settings { url, section } => {
            let settings = checked(service.toggle_setting(owner, &url, section))?;
            println!("{}", formatter.format_settings(&url, &settings));
        }
        Commands::Purge => {
            if service.delete_owner(owner)? {
                println!("{} Forgot every website of {}", "✓".bright_green(), owner);
            } else {
                println!("Nothing stored for {}", owner);
            }
        }
        Commands::Run => anyhow::bail!("run is not a one-shot command"),
    }

    Ok(())
}

/// User mistakes are printed and exit with status 1; system faults propagate.
fn checked<T>(result: sitewatch_core::Result<T>) -> anyhow::Result<T> {
    match result {
        Err(e) if e.is_user_facing() => {
            eprintln!("{} {}", "Error:".bright_red(), e);
            std::process::exit(1);
        }
        other => Ok(other?),
    }
}
