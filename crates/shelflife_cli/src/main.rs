//! SHELFLIFE CLI
//!
//! Loads source data, runs the nightly jobs and reports on the execution log.

#![warn(missing_docs)]
#![warn(clippy::all)]

use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use color_eyre::Result;
use color_eyre::eyre::WrapErr;
use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use serde::Serialize;
use serde::de::DeserializeOwned;
use shelflife_core::{InventoryBatch, PipelineConfig, SalesObservation, SkuInfo, StoreInfo};
use shelflife_engine::{ActionPreferences, OptimizeFor};
use shelflife_runtime::{JobParameters, Orchestrator};
use shelflife_storage::{AnalyticsStore, Ingest, RedbStore};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "shelflife")]
#[command(about = "SHELFLIFE - expiry risk and mitigation pipeline for perishable inventory", long_about = None)]
struct Cli {
    /// Database file
    #[arg(long, global = true, default_value = ".shelflife/shelflife.redb")]
    db: PathBuf,
    /// Pipeline configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Emit logs as JSON
    #[arg(long, global = true)]
    json: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Load typed records from a JSON array
    Load {
        /// Record kind
        #[arg(value_enum)]
        kind: DataKind,
        /// Path to the JSON file
        file: PathBuf,
    },
    /// Run a job
    Run {
        /// Job name
        job: String,
        /// Snapshot date (defaults to today)
        #[arg(long)]
        date: Option<NaiveDate>,
        /// Trailing window length
        #[arg(long)]
        window_days: Option<u32>,
        /// Minimum risk score for action generation
        #[arg(long)]
        min_risk_score: Option<f64>,
        /// Do not propose transfers
        #[arg(long)]
        no_transfers: bool,
        /// Do not propose markdowns
        #[arg(long)]
        no_markdowns: bool,
        /// Do not propose liquidations
        #[arg(long)]
        no_liquidations: bool,
        /// Optimization target
        #[arg(long, value_enum)]
        optimize_for: Option<Optimize>,
        /// Recompute even if inputs are unchanged
        #[arg(long)]
        force: bool,
    },
    /// Show ranked proposals for a date
    Actions {
        /// Snapshot date
        #[arg(long)]
        date: NaiveDate,
        /// Maximum rows shown
        #[arg(long, default_value_t = 20)]
        limit: usize,
    },
    /// Show a job's state and latest execution
    Status {
        /// Job name
        job: String,
    },
    /// Show recent executions of a job
    History {
        /// Job name
        job: String,
        /// Maximum rows shown
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Show execution statistics of a job
    Stats {
        /// Job name
        job: String,
        /// Trailing period in days
        #[arg(long, default_value_t = 7)]
        days: u32,
    },
    /// Show pipeline health
    Health,
    /// List registered jobs
    Jobs,
}

#[derive(Clone, Copy, ValueEnum)]
enum DataKind {
    Sales,
    Inventory,
    Skus,
    Stores,
}

#[derive(Clone, Copy, ValueEnum)]
enum Optimize {
    Balanced,
    Stability,
    Profit,
    WasteMin,
}

impl From<Optimize> for OptimizeFor {
    fn from(value: Optimize) -> Self {
        match value {
            Optimize::Balanced => Self::Balanced,
            Optimize::Stability => Self::Stability,
            Optimize::Profit => Self::Profit,
            Optimize::WasteMin => Self::WasteMin,
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("shelflife=info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn open_store(path: &Path) -> Result<RedbStore> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        std::fs::create_dir_all(parent)
            .wrap_err_with(|| format!("creating {}", parent.display()))?;
    }
    RedbStore::open(path).wrap_err_with(|| format!("opening {}", path.display()))
}

fn load_config(path: Option<&Path>) -> Result<PipelineConfig> {
    match path {
        Some(path) => PipelineConfig::load(path).wrap_err("loading configuration"),
        None => Ok(PipelineConfig::default()),
    }
}

fn read_rows<T: DeserializeOwned>(file: &Path) -> Result<Vec<T>> {
    let text =
        std::fs::read_to_string(file).wrap_err_with(|| format!("reading {}", file.display()))?;
    serde_json::from_str(&text).wrap_err_with(|| format!("parsing {}", file.display()))
}

fn load_file<S: Ingest>(store: &S, kind: DataKind, file: &Path) -> Result<usize> {
    let written = match kind {
        DataKind::Sales => store.append_sales(&read_rows::<SalesObservation>(file)?)?,
        DataKind::Inventory => store.put_inventory(&read_rows::<InventoryBatch>(file)?)?,
        DataKind::Skus => store.put_skus(&read_rows::<SkuInfo>(file)?)?,
        DataKind::Stores => store.put_stores(&read_rows::<StoreInfo>(file)?)?,
    };
    tracing::info!(file = %file.display(), rows = written, "loaded records");
    Ok(written)
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    color_eyre::install()?;
    let cli = Cli::parse();
    init_tracing(cli.json);

    let config = load_config(cli.config.as_deref())?;
    let store = Arc::new(open_store(&cli.db)?);

    match cli.command {
        Commands::Load { kind, file } => {
            let written = load_file(store.as_ref(), kind, &file)?;
            println!("{} {} rows from {}", style("loaded").green(), written, file.display());
            Ok(())
        }
        Commands::Run {
            job,
            date,
            window_days,
            min_risk_score,
            no_transfers,
            no_markdowns,
            no_liquidations,
            optimize_for,
            force,
        } => {
            let params = JobParameters {
                snapshot_date: date,
                window_days,
                min_risk_score,
                include_transfers: no_transfers.then_some(false),
                include_markdowns: no_markdowns.then_some(false),
                include_liquidations: no_liquidations.then_some(false),
                preferences: optimize_for.map(|o| ActionPreferences {
                    optimize_for: o.into(),
                }),
                incremental: force.then_some(false),
            };
            let orchestrator = Orchestrator::new(store, config);

            let spinner = ProgressBar::new_spinner();
            spinner.set_style(ProgressStyle::default_spinner());
            spinner.set_message(format!("running {}", job));
            spinner.enable_steady_tick(Duration::from_millis(120));
            let outcome = orchestrator.run_job(&job, Some(params)).await;
            spinner.finish_and_clear();

            let label = if outcome.success {
                style("ok").green()
            } else {
                style("failed").red()
            };
            eprintln!(
                "{} {} ({:.2}s, {} retries)",
                label, outcome.message, outcome.execution_time_seconds, outcome.retry_count
            );
            print_json(&outcome)?;
            if outcome.success {
                Ok(())
            } else {
                Err(color_eyre::eyre::eyre!(
                    outcome.error.unwrap_or(outcome.message)
                ))
            }
        }
        Commands::Actions { date, limit } => {
            let actions = store.actions_at(date)?;
            let shown: Vec<_> = actions.into_iter().take(limit).collect();
            print_json(&shown)
        }
        Commands::Status { job } => {
            let orchestrator = Orchestrator::new(store, config);
            print_json(&orchestrator.get_job_status(&job).await?)
        }
        Commands::History { job, limit } => {
            let orchestrator = Orchestrator::new(store, config);
            print_json(&orchestrator.get_job_history(&job, limit).await?)
        }
        Commands::Stats { job, days } => {
            let orchestrator = Orchestrator::new(store, config);
            print_json(&orchestrator.get_job_statistics(&job, days).await?)
        }
        Commands::Health => {
            let orchestrator = Orchestrator::new(store, config);
            print_json(&orchestrator.system_health().await?)
        }
        Commands::Jobs => {
            let orchestrator = Orchestrator::new(store, config);
            for job in orchestrator.list_jobs().await {
                let state = if job.enabled {
                    style("enabled").green()
                } else {
                    style("disabled").dim()
                };
                println!(
                    "{:<28} {:<20} {}  {}",
                    job.name,
                    job.kind.as_str(),
                    state,
                    job.description
                );
            }
            Ok(())
        }
    }
}
