//! grid-harvest - resumable grid harvester for places data
//!
//! Cuts a region into a grid of search circles, pages through the places
//! provider cell by cell, and appends every new restaurant to a CSV dataset.
//! Progress lives in the grid checkpoint file, so a run stopped by the
//! provider's quota resumes where it left off.
//!
//! Module structure:
//! - `domain/` - Core types (GridCell, BusinessRecord, HarvestState)
//! - `io/` - External interfaces (places API, checkpoint, dataset, snapshots)
//! - `services/` - Harvest logic (GeoGrid, Harvester, RateLimitGuard)
//! - `infra/` - Infrastructure (Config, Metrics)
//!
//! Exit codes: 0 done, 75 stopped on quota (rerun later), 69 cells left
//! pending after a failed search (rerun later), 1 fatal error.

use anyhow::Context;
use clap::{Parser, Subcommand};
use grid_harvest::infra::logging::init_logging;
use grid_harvest::infra::Config;
use grid_harvest::io::checkpoint::read_grid;
use grid_harvest::io::dataset::read_records;
use grid_harvest::io::{coverage, CheckpointStore, YelpClient};
use grid_harvest::services::grid::covering_radius;
use grid_harvest::services::{run_harvest, DatasetSummary, GeoGrid};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};

/// Resumable grid harvester for restaurant listings
#[derive(Parser, Debug)]
#[command(name = "grid-harvest", version, about)]
struct Args {
    /// Path to TOML configuration file (default: $CONFIG_FILE or config/maryland.toml)
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Override the output directory from the config
    #[arg(short, long, global = true)]
    output_dir: Option<PathBuf>,

    /// Directory for the per-run DEBUG log file
    #[arg(long, global = true, default_value = "logs")]
    log_dir: PathBuf,

    /// Log to the console only
    #[arg(long, global = true)]
    no_log_file: bool,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Harvest all pending cells (default)
    Run {
        /// Places API base URL, e.g. a local mock-places server
        #[arg(long)]
        base_url: Option<String>,
    },
    /// Create or load the grid checkpoint and print each cell
    Grid,
    /// Show checkpoint progress and dataset size
    Status,
    /// Print statistics of the collected dataset
    Summary,
    /// Write the grid and search circles as GeoJSON
    Coverage {
        /// Output path (default: <output dir>/coverage.geojson)
        #[arg(long)]
        out: Option<PathBuf>,
    },
}

fn main() -> ExitCode {
    let args = Args::parse();

    // Console level via RUST_LOG (default INFO); the run log file keeps DEBUG
    let log_dir = (!args.no_log_file).then_some(args.log_dir.as_path());
    if let Some(path) = init_logging(log_dir, "grid_harvest") {
        info!(log_file = %path.display(), "log_file_opened");
    }

    // A missing .env is fine; the key may come from the real environment
    let _ = dotenvy::dotenv();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "runtime_start_failed");
            return ExitCode::FAILURE;
        }
    };

    match runtime.block_on(run(args)) {
        Ok(code) => ExitCode::from(code),
        Err(e) => {
            error!(error = %format!("{e:#}"), "fatal_error");
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<u8> {
    let mut config = Config::load(args.config.as_deref())?;
    if let Some(dir) = args.output_dir {
        config = config.with_output_dir(dir);
    }

    info!(
        version = %env!("CARGO_PKG_VERSION"),
        git_hash = %env!("GIT_HASH"),
        config_file = %config.config_file(),
        region = %config.region_name(),
        rows = %config.grid_rows(),
        cols = %config.grid_cols(),
        output_dir = %config.output_dir().display(),
        "config_loaded"
    );

    match args.command.unwrap_or(Command::Run { base_url: None }) {
        Command::Run { base_url } => {
            if let Some(url) = base_url {
                config = config.with_api_base_url(url);
            }
            harvest(&config).await
        }
        Command::Grid => print_grid(&config).map(|()| 0),
        Command::Status => print_status(&config).map(|()| 0),
        Command::Summary => print_summary(&config).map(|()| 0),
        Command::Coverage { out } => {
            let out = out.unwrap_or_else(|| config.output_dir().join("coverage.geojson"));
            write_coverage(&config, &out).map(|()| 0)
        }
    }
}

fn geo_grid(config: &Config) -> anyhow::Result<GeoGrid> {
    GeoGrid::new(config.bbox(), config.grid_rows(), config.grid_cols())
}

async fn harvest(config: &Config) -> anyhow::Result<u8> {
    // Startup failures abort before any remote call
    let api_key = config.resolve_api_key()?;
    let places = Arc::new(YelpClient::new(config, api_key)?);
    info!(
        base_url = %config.api_base_url(),
        timeout_ms = %config.api_timeout().as_millis(),
        page_size = %config.page_size(),
        max_offset = %config.max_offset(),
        "places_client_ready"
    );

    let outcome = run_harvest(config, places).await?;
    Ok(outcome.exit_code())
}

fn print_grid(config: &Config) -> anyhow::Result<()> {
    let grid = geo_grid(config)?;
    let store = CheckpointStore::new(config.grid_path(), config.dataset_path());
    let cells = store.load_cells(&grid)?;

    println!("cell_id  center_lat  center_lng  radius_m  covering_m  done");
    for cell in &cells {
        println!(
            "{:<8} {:>10.5} {:>11.5} {:>9} {:>11.0}  {}",
            cell.id.to_string(),
            cell.center.lat,
            cell.center.lng,
            cell.radius_m,
            covering_radius(cell),
            if cell.done { "yes" } else { "no" }
        );
    }
    println!("{} cells written to {}", cells.len(), config.grid_path().display());
    Ok(())
}

fn print_status(config: &Config) -> anyhow::Result<()> {
    let grid_path = config.grid_path();
    if !grid_path.exists() {
        println!("no checkpoint at {} (nothing harvested yet)", grid_path.display());
        return Ok(());
    }

    let cells = read_grid(&grid_path)?;
    let done = cells.iter().filter(|c| c.done).count();
    let known = grid_harvest::io::dataset::read_known_ids(&config.dataset_path())?;

    println!("cells done: {}/{}", done, cells.len());
    match cells.iter().find(|c| !c.done) {
        Some(next) => println!("next cell:  {}", next.id),
        None => println!("next cell:  none (complete)"),
    }
    println!("records:    {}", known.len());
    Ok(())
}

fn print_summary(config: &Config) -> anyhow::Result<()> {
    let path = config.dataset_path();
    let records = read_records(&path)?;
    let summary = DatasetSummary::from_records(&records);

    println!("dataset: {}", path.display());
    println!("records: {}", summary.total);
    if let (Some(avg), Some(min), Some(max)) =
        (summary.avg_rating, summary.min_rating, summary.max_rating)
    {
        println!("rating:  avg {avg:.2}, min {min:.1}, max {max:.1} ({} rated)", summary.rated);
    }
    println!("categories: {}", summary.categories);

    println!("top cities:");
    for (city, count) in &summary.top_cities {
        println!("  {city:<24} {count}");
    }
    println!("price tiers:");
    for (tier, count) in &summary.price_tiers {
        let tier = if tier.is_empty() { "unknown" } else { tier.as_str() };
        println!("  {tier:<8} {count}");
    }
    Ok(())
}

fn write_coverage(config: &Config, out: &std::path::Path) -> anyhow::Result<()> {
    let grid = geo_grid(config)?;
    let store = CheckpointStore::new(config.grid_path(), config.dataset_path());
    let cells = store.load_cells(&grid)?;
    coverage::write_coverage(out, grid.bbox(), &cells)
        .with_context(|| format!("coverage export to {}", out.display()))?;
    println!("coverage written to {}", out.display());
    Ok(())
}
