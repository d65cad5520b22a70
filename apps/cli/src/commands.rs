//! CLI command definitions, routing, and tracing setup.

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use color_eyre::eyre::{Result, eyre};
use indicatif::{ProgressBar, ProgressStyle};
use tracing::info;

use webharvest_core::{Collaborators, Pipeline, PipelineParams, RunReport, StageKind};
use webharvest_shared::{
    AppConfig, RecordStatus, data_dir, init_config, load_config, load_config_from,
};
use webharvest_store::{FsBlobStore, SqliteAnalyticsSink, SqliteRecordStore, SqliteVectorIndex};

// ---------------------------------------------------------------------------
// CLI structure
// ---------------------------------------------------------------------------

/// webharvest: site content into a vector index.
#[derive(Parser)]
#[command(
    name = "webharvest",
    version,
    about = "Crawl a site, extract its content, and feed it into a vector index.",
    long_about = None,
)]
pub(crate) struct Cli {
    /// Log format: text (default) or json.
    #[arg(long, default_value = "text", global = true)]
    pub log_format: LogFormat,

    /// Verbosity level (-v, -vv, -vvv).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Config file path (defaults to ~/.webharvest/webharvest.toml).
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the local data directory.
    #[arg(long, global = true)]
    pub data_dir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

/// Log output format.
#[derive(Clone, Debug, clap::ValueEnum)]
pub(crate) enum LogFormat {
    Text,
    Json,
}

/// Top-level CLI subcommands.
#[derive(Subcommand)]
pub(crate) enum Command {
    /// Discover URLs from a start page into the work queue.
    Discover {
        /// URL to start crawling from.
        #[arg(long)]
        start_url: Option<String>,

        /// Prefix discovered links must match (defaults to the start URL).
        #[arg(long)]
        base_url: Option<String>,

        /// Maximum pages to visit in this run.
        #[arg(long)]
        max_pages: Option<usize>,
    },

    /// Fetch, classify, and extract pending records.
    Scrape {
        /// Maximum records to process (0 = all pending).
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Chunk scraped text artifacts into the vector index.
    Index {
        /// Documents per index write.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Run a sequence of stages under one run identifier.
    Run {
        /// Comma-separated stages in execution order.
        #[arg(long, default_value = "discover,scrape,index")]
        stages: String,

        /// URL to start crawling from.
        #[arg(long)]
        start_url: Option<String>,

        /// Prefix discovered links must match.
        #[arg(long)]
        base_url: Option<String>,

        /// Maximum pages to visit.
        #[arg(long)]
        max_pages: Option<usize>,

        /// Maximum records to fetch (0 = all pending).
        #[arg(long)]
        limit: Option<usize>,

        /// Documents per index write.
        #[arg(long)]
        batch_size: Option<usize>,
    },

    /// Bulk-reset record statuses for re-processing.
    Reset {
        /// Target status (pending, scraped, skipped, indexed).
        #[arg(long, default_value = "pending")]
        to: String,
    },

    /// Configuration management.
    Config {
        /// Config subcommand.
        #[command(subcommand)]
        action: ConfigAction,
    },
}

/// Config subcommands.
#[derive(Subcommand)]
pub(crate) enum ConfigAction {
    /// Initialize config file with defaults.
    Init,
    /// Show resolved configuration.
    Show,
}

// ---------------------------------------------------------------------------
// Tracing setup
// ---------------------------------------------------------------------------

/// Initialize tracing based on CLI flags.
pub(crate) fn init_tracing(cli: &Cli) {
    use tracing_subscriber::{EnvFilter, fmt};

    let filter = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter));

    match cli.log_format {
        LogFormat::Text => {
            fmt().with_env_filter(env_filter).with_target(false).init();
        }
        LogFormat::Json => {
            fmt().json().with_env_filter(env_filter).init();
        }
    }
}

// ---------------------------------------------------------------------------
// Command dispatch
// ---------------------------------------------------------------------------

/// Run the CLI command.
pub(crate) async fn run(cli: Cli) -> Result<()> {
    let config = match &cli.config {
        Some(path) => load_config_from(path)?,
        None => load_config()?,
    };
    let data_dir_override = cli.data_dir.clone();

    match cli.command {
        Command::Discover {
            start_url,
            base_url,
            max_pages,
        } => {
            let mut params = PipelineParams::from(&config);
            override_opt(&mut params.start_url, start_url);
            override_opt(&mut params.base_url, base_url);
            if let Some(n) = max_pages {
                params.max_pages = n;
            }
            run_stages(data_dir_override.as_deref(), &config, params, &[StageKind::Discover]).await
        }

        Command::Scrape { limit } => {
            let mut params = PipelineParams::from(&config);
            if let Some(n) = limit {
                params.pending_limit = n;
            }
            run_stages(data_dir_override.as_deref(), &config, params, &[StageKind::Scrape]).await
        }

        Command::Index { batch_size } => {
            let mut params = PipelineParams::from(&config);
            if let Some(n) = batch_size {
                params.batch_size = n;
            }
            run_stages(data_dir_override.as_deref(), &config, params, &[StageKind::Index]).await
        }

        Command::Run {
            stages,
            start_url,
            base_url,
            max_pages,
            limit,
            batch_size,
        } => {
            let stages = parse_stages(&stages)?;
            let mut params = PipelineParams::from(&config);
            override_opt(&mut params.start_url, start_url);
            override_opt(&mut params.base_url, base_url);
            if let Some(n) = max_pages {
                params.max_pages = n;
            }
            if let Some(n) = limit {
                params.pending_limit = n;
            }
            if let Some(n) = batch_size {
                params.batch_size = n;
            }
            run_stages(data_dir_override.as_deref(), &config, params, &stages).await
        }

        Command::Reset { to } => {
            let target = RecordStatus::parse(&to)
                .ok_or_else(|| eyre!("unknown status '{to}', expected pending, scraped, skipped, or indexed"))?;
            let collab = build_collaborators(data_dir_override.as_deref(), &config).await?;
            let pipeline = Pipeline::new(collab, PipelineParams::from(&config))?;
            let changed = pipeline.reset(target).await?;
            println!("Reset {changed} record(s) to '{target}'.");
            Ok(())
        }

        Command::Config { action } => match action {
            ConfigAction::Init => {
                let path = init_config()?;
                println!("Wrote default config to {}", path.display());
                Ok(())
            }
            ConfigAction::Show => {
                let rendered = toml::to_string_pretty(&config)?;
                println!("{rendered}");
                Ok(())
            }
        },
    }
}

/// Parse the comma-separated stage list.
fn parse_stages(raw: &str) -> Result<Vec<StageKind>> {
    let stages: Vec<StageKind> = raw
        .split(',')
        .filter(|s| !s.trim().is_empty())
        .map(|s| s.parse())
        .collect::<webharvest_shared::Result<_>>()?;

    if stages.is_empty() {
        return Err(eyre!("no stages selected"));
    }
    Ok(stages)
}

fn override_opt(slot: &mut Option<String>, value: Option<String>) {
    if value.is_some() {
        *slot = value;
    }
}

/// Wire the local reference backends under the data directory.
async fn build_collaborators(
    data_dir_override: Option<&std::path::Path>,
    config: &AppConfig,
) -> Result<Collaborators> {
    let root = match data_dir_override {
        Some(dir) => dir.to_path_buf(),
        None => data_dir(config)?,
    };

    // One database file per collaborator: the record store, the analytics
    // dataset, and the index stand-in never share a writer.
    let records = Arc::new(SqliteRecordStore::open(&root.join("records.db")).await?);
    let audit = Arc::new(
        SqliteAnalyticsSink::open(
            &root.join(format!("{}.db", config.pipeline.dataset_id)),
            &config.pipeline.table_id,
        )
        .await?,
    );
    let index = Arc::new(SqliteVectorIndex::open(&root.join("index.db")).await?);
    let blobs = Arc::new(FsBlobStore::new(root.join("blobs")));

    Ok(Collaborators {
        records,
        blobs,
        audit,
        index,
    })
}

/// Build the pipeline and execute the selected stages with a spinner.
async fn run_stages(
    data_dir_override: Option<&std::path::Path>,
    config: &AppConfig,
    params: PipelineParams,
    stages: &[StageKind],
) -> Result<()> {
    let collab = build_collaborators(data_dir_override, config).await?;
    let pipeline = Pipeline::new(collab, params)?;

    info!(run_id = %pipeline.run_id(), ?stages, "starting pipeline");

    let spinner = stage_spinner(stages);
    let report = pipeline.run(stages).await;
    spinner.finish_and_clear();

    let report = report?;
    print_report(pipeline.run_id().to_string(), &report);
    Ok(())
}

fn stage_spinner(stages: &[StageKind]) -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::with_template("{spinner:.cyan} {msg}")
            .expect("static template")
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    spinner.enable_steady_tick(std::time::Duration::from_millis(80));
    spinner.set_message(format!("Running {} stage(s)...", stages.len()));
    spinner
}

fn print_report(run_id: String, report: &RunReport) {
    println!();
    println!("  Run {run_id}");
    if let Some(frontier) = &report.frontier {
        println!(
            "  Discover: {} page(s) visited, {} link(s) enqueued, {} fetch failure(s)",
            frontier.pages_visited, frontier.links_enqueued, frontier.fetch_failures
        );
    }
    if let Some(fetch) = &report.fetch {
        println!(
            "  Scrape:   {} scraped, {} skipped, {} abandoned",
            fetch.scraped, fetch.skipped, fetch.abandoned
        );
    }
    if let Some(batch) = &report.batch {
        println!(
            "  Index:    {} document(s) in {} chunk(s), {} flush(es), {} failure(s)",
            batch.documents, batch.chunks, batch.flushes, batch.failures
        );
    }
    println!();
}
