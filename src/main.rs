use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use console::style;
use tracing::info;
use tracing_subscriber::EnvFilter;

use matchsync::config::{self, Config, ConfigError, Settings};
use matchsync::ledger::SqliteLedger;
use matchsync::models::SourceDescriptor;
use matchsync::scrapers::HttpFetcher;
use matchsync::store::FsTableStore;
use matchsync::sync::{
    consolidate, run_failed, ConsolidationReport, SyncReport, SyncStatus, Synchronizer,
};

#[derive(Parser)]
#[command(name = "matchsync")]
#[command(about = "Incremental sync of match results, fixtures and odds", version)]
struct Cli {
    /// Config file (default: discovered matchsync.toml)
    #[arg(short, long, global = true, env = "MATCHSYNC_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory (overrides config and MATCHSYNC_DATA_DIR)
    #[arg(short, long, global = true)]
    data_dir: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch sources, merge changes and rebuild the master table
    Sync {
        /// Only sync these sources (repeatable)
        #[arg(short, long = "source", value_name = "NAME")]
        sources: Vec<String>,

        /// Skip the master table rebuild
        #[arg(long)]
        no_consolidate: bool,
    },
    /// Rebuild the master table from persisted tables
    Consolidate,
    /// List configured sources
    Sources,
}

fn badge(status: &SyncStatus) -> String {
    let label = format!("{:>9}", status.label());
    match status {
        SyncStatus::Updated => style(label).green().bold().to_string(),
        SyncStatus::Unchanged => style(label).dim().to_string(),
        SyncStatus::Skipped(_) => style(label).yellow().to_string(),
        SyncStatus::Failed(_) => style(label).red().bold().to_string(),
    }
}

fn print_report(report: &SyncReport) {
    let detail = match &report.status {
        SyncStatus::Updated => format!(
            "{} rows (+{} -{})",
            report.rows,
            report.added.unwrap_or(0),
            report.removed.unwrap_or(0)
        ),
        SyncStatus::Unchanged => format!("{} rows", report.rows),
        SyncStatus::Skipped(reason) | SyncStatus::Failed(reason) => reason.clone(),
    };
    println!("{} {:<20} {}", badge(&report.status), report.source, detail);
}

fn print_consolidation(report: &ConsolidationReport) {
    match report {
        ConsolidationReport::Written {
            output,
            tables,
            rows,
            ..
        } => println!(
            "{} {} ({} rows from {} tables)",
            style("   master").cyan().bold(),
            output,
            rows,
            tables
        ),
        ConsolidationReport::Nothing { found, .. } => println!(
            "{} nothing to consolidate ({} tables found)",
            style("   master").yellow(),
            found
        ),
    }
    for skipped in report.skipped() {
        println!(
            "{} {:<20} {}",
            style("  skipped").yellow(),
            skipped.name,
            skipped.reason
        );
    }
}

type SourceEntry = (String, Result<SourceDescriptor, ConfigError>);

fn select_sources(all: Vec<SourceEntry>, wanted: &[String]) -> Result<Vec<SourceEntry>> {
    if wanted.is_empty() {
        return Ok(all);
    }
    if let Some(unknown) = wanted.iter().find(|w| !all.iter().any(|(name, _)| name == *w)) {
        bail!("unknown source: {}", unknown);
    }
    Ok(all
        .into_iter()
        .filter(|(name, _)| wanted.contains(name))
        .collect())
}

async fn load(cli: &Cli) -> Result<(Config, Settings)> {
    let (config, mut settings) = match &cli.config {
        Some(path) => {
            let config = Config::from_file(path)
                .with_context(|| format!("loading {}", path.display()))?;
            let mut settings = Settings::default();
            config.apply_to_settings(&mut settings);
            settings.apply_env(|name| std::env::var(name).ok());
            (config, settings)
        }
        None => config::load_settings().await,
    };
    if let Some(dir) = &cli.data_dir {
        settings.data_dir = dir.clone();
    }
    Ok((config, settings))
}

async fn run(cli: Cli) -> Result<ExitCode> {
    let (config, settings) = load(&cli).await?;
    let store = FsTableStore::new(settings.tables_path());

    match &cli.command {
        Commands::Sources => {
            for (name, entry) in config.source_descriptors(&settings, |name| std::env::var(name).ok()) {
                match entry {
                    Ok(source) => println!(
                        "{:<20} {:<14} {} -> {}",
                        name,
                        source.kind.as_str(),
                        matchsync::scrapers::redact(&source.locator),
                        source.output
                    ),
                    Err(e) => println!("{:<20} {} {}", name, style("invalid").red(), e),
                }
            }
            Ok(ExitCode::SUCCESS)
        }
        Commands::Consolidate => {
            let report = consolidate(&store, &config.consolidate_options()?)?;
            print_consolidation(&report);
            Ok(ExitCode::SUCCESS)
        }
        Commands::Sync {
            sources,
            no_consolidate,
        } => {
            let all = config.source_descriptors(&settings, |name| std::env::var(name).ok());
            let selected = select_sources(all, sources)?;
            let options = config.consolidate_options()?;

            info!(
                "Syncing {} sources into {}",
                selected.len(),
                settings.tables_path().display()
            );
            let fetcher = HttpFetcher::new(
                settings.timeout(),
                settings.request_delay(),
                settings.user_agent.as_deref(),
                settings.retry.clone(),
            )
            .context("building HTTP client")?;
            let ledger = SqliteLedger::open(&settings.ledger_path())
                .with_context(|| format!("opening {}", settings.ledger_path().display()))?;

            let synchronizer = Synchronizer::new(fetcher, ledger, &store);
            let reports = synchronizer.sync_configured(&selected).await;
            for report in &reports {
                print_report(report);
            }

            if !no_consolidate {
                print_consolidation(&consolidate(&store, &options)?);
            }

            Ok(if run_failed(&reports) {
                ExitCode::FAILURE
            } else {
                ExitCode::SUCCESS
            })
        }
    }
}

fn main() -> ExitCode {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            eprintln!("{} {}", style("error:").red().bold(), e);
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(cli)) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", style("error:").red().bold(), e);
            ExitCode::FAILURE
        }
    }
}
