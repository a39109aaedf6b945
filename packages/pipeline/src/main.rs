#![cfg_attr(feature = "fail-on-warnings", deny(warnings))]
#![warn(clippy::all, clippy::pedantic, clippy::nursery, clippy::cargo)]
#![allow(clippy::multiple_crate_versions, clippy::cargo_common_metadata)]

//! CLI entry point for the home-health provider geocoding pipeline.

use std::path::{Path, PathBuf};
use std::time::Instant;

use clap::{Parser, Subcommand};
use duckdb::Connection;
use hh_atlas_cli_utils::{IndicatifProgress, MultiProgress};
use hh_atlas_geocoder::service_registry;
use hh_atlas_pipeline::universe::ProviderUniverse;
use hh_atlas_pipeline::{
    PipelineError, consolidate, coverage, export, import, load_config, merge, round, universe,
};
use hh_atlas_pipeline_models::PipelineConfig;
use hh_atlas_store::artifacts::{self, ArtifactStatus};
use hh_atlas_store::paths::{DataPaths, ensure_dir};
use hh_atlas_store::{final_table, geocode_store};

#[derive(Parser)]
#[command(
    name = "hh_atlas",
    about = "Resumable multi-source geocoding of home-health provider addresses"
)]
struct Cli {
    /// Provider table CSV the addresses are drawn from
    #[arg(long, global = true)]
    universe: Option<PathBuf>,
    /// Directory holding the geocode store and CSV exports
    #[arg(long, global = true, env = "HH_ATLAS_DATA_DIR", default_value = "data")]
    data_dir: PathBuf,
    /// Pipeline settings TOML (batch size, column names, output files)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Geocode remaining addresses, primary service first, then each fallback
    Geocode {
        /// Only run this service (e.g., "census")
        #[arg(long)]
        provider: Option<String>,
        /// Maximum addresses to submit per service
        #[arg(long)]
        limit: Option<usize>,
        /// Addresses per batch artifact (overrides the config file)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Recover interrupted batches and consolidate every pending one
    Consolidate,
    /// Import geocoding results produced elsewhere as a fallback source
    Import {
        /// Service id to record the results under (e.g., "google_csv")
        #[arg(long)]
        provider: String,
        /// CSV with address columns plus `lat` and `lon`
        file: PathBuf,
    },
    /// Merge primary and fallback results into the final table and CSV
    Merge,
    /// Report coverage and per-source quality, and export unresolved addresses
    Report,
    /// Geocode, merge, and report in one go
    Run {
        /// Maximum addresses to submit per service
        #[arg(long)]
        limit: Option<usize>,
        /// Addresses per batch artifact (overrides the config file)
        #[arg(long)]
        batch_size: Option<usize>,
    },
    /// Show the batch artifact queue and store totals
    Status,
    /// List configured geocoding services
    Services,
}

fn open_store(paths: &DataPaths) -> Result<Connection, Box<dyn std::error::Error>> {
    ensure_dir(paths.root())?;
    Ok(hh_atlas_store::open(&paths.store_path())?)
}

fn require_universe(
    path: Option<&Path>,
    config: &PipelineConfig,
) -> Result<ProviderUniverse, PipelineError> {
    let path = path.ok_or_else(|| PipelineError::Config {
        message: "--universe <FILE> is required for this command".to_string(),
    })?;
    universe::load(path, &config.universe)
}

fn with_batch_size(
    mut config: PipelineConfig,
    batch_size: Option<usize>,
) -> Result<PipelineConfig, PipelineError> {
    if let Some(batch_size) = batch_size {
        if batch_size == 0 {
            return Err(PipelineError::Config {
                message: "--batch-size must be at least 1".to_string(),
            });
        }
        config.batch_size = batch_size;
    }
    Ok(config)
}

fn fallback_order() -> Vec<String> {
    service_registry::enabled_services()
        .into_iter()
        .map(|s| s.id)
        .collect()
}

#[allow(clippy::future_not_send)]
async fn geocode(
    conn: &mut Connection,
    multi: &MultiProgress,
    universe: &ProviderUniverse,
    config: &PipelineConfig,
    provider: Option<&str>,
    limit: Option<usize>,
) -> Result<(), Box<dyn std::error::Error>> {
    consolidate::consolidate_pending(conn, &IndicatifProgress::step_bar(multi, "Recovering"))?;

    let services = round::active_services();
    let mut rounds = round::plan(&services);
    if let Some(provider) = provider {
        rounds.retain(|r| r.service_id() == provider);
        if rounds.is_empty() {
            return Err(PipelineError::Config {
                message: format!("No active geocoding service '{provider}'"),
            }
            .into());
        }
    }
    if rounds.is_empty() {
        return Err(PipelineError::Config {
            message: "No geocoding service could be started".to_string(),
        }
        .into());
    }

    let summaries = round::run_all(conn, universe, &rounds, config, limit, |service_id| {
        IndicatifProgress::round_bar(multi, service_id)
    })
    .await?;

    for s in &summaries {
        log::info!(
            "{}: {} remaining, {}/{} resolved{}",
            s.service_id,
            s.remaining,
            s.resolved,
            s.attempted,
            if s.breaker_tripped {
                " (circuit breaker tripped)"
            } else {
                ""
            }
        );
    }

    Ok(())
}

fn merge_and_export(
    conn: &mut Connection,
    paths: &DataPaths,
    universe: &ProviderUniverse,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    let order = fallback_order();
    let order: Vec<&str> = order.iter().map(String::as_str).collect();
    let rows = merge::merge_store(conn, universe, &order)?;
    export::export_final(&paths.export_path(&config.final_csv), &rows)
}

fn report(
    conn: &Connection,
    paths: &DataPaths,
    universe: Option<&ProviderUniverse>,
    config: &PipelineConfig,
) -> Result<(), PipelineError> {
    let rows = final_table::load(conn)?;
    if rows.is_empty() {
        log::warn!("Final table is empty; run `merge` first");
    }

    let report = match universe {
        Some(universe) => coverage::compute(universe, &rows),
        None => coverage::compute(&coverage::universe_of(&rows), &rows),
    };
    let quality = coverage::source_quality(conn)?;
    coverage::log_report(&report, &quality);

    export::export_unresolved(
        &paths.export_path(&config.unresolved_csv),
        &report.unresolved,
    )
}

fn status(conn: &Connection) -> Result<(), PipelineError> {
    let queue = artifacts::list(conn)?;
    let count = |status: ArtifactStatus| queue.iter().filter(|a| a.status == status).count();

    println!("Batch artifacts");
    println!("{}", "-".repeat(50));
    for status in [
        ArtifactStatus::Open,
        ArtifactStatus::Pending,
        ArtifactStatus::Archived,
    ] {
        println!("{:<20} {}", status.to_string(), count(status));
    }

    println!();
    println!(
        "{:<20} {:<10} {:>10} {:>10} {:>10}",
        "SERVICE", "SOURCE", "RECORDS", "ADDRESSES", "RESOLVED"
    );
    println!("{}", "-".repeat(64));
    for c in geocode_store::service_counts(conn)? {
        println!(
            "{:<20} {:<10} {:>10} {:>10} {:>10}",
            c.service_id, c.source, c.records, c.distinct_keys, c.resolved_keys
        );
    }
    println!();
    println!(
        "{} record(s) in the geocode store",
        geocode_store::record_count(conn)?
    );

    Ok(())
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let multi = hh_atlas_cli_utils::init_logger();
    let cli = Cli::parse();

    let paths = DataPaths::new(&cli.data_dir);
    let config = load_config(cli.config.as_deref())?;

    match cli.command {
        Commands::Services => {
            println!("{:<12} {:<9} {:<8} NAME", "ID", "PRIORITY", "ENABLED");
            println!("{}", "-".repeat(50));
            for service in service_registry::all_services() {
                println!(
                    "{:<12} {:<9} {:<8} {}",
                    service.id, service.priority, service.enabled, service.name
                );
            }
        }
        Commands::Status => {
            let conn = open_store(&paths)?;
            status(&conn)?;
        }
        Commands::Consolidate => {
            let mut conn = open_store(&paths)?;
            let start = Instant::now();
            let progress = IndicatifProgress::step_bar(&multi, "Consolidating");
            consolidate::consolidate_pending(&mut conn, &progress)?;
            log::info!(
                "Consolidation finished in {:.1}s",
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Import { provider, file } => {
            let mut conn = open_store(&paths)?;
            import::import_file(&mut conn, &file, &provider, &config.universe)?;
            let progress = IndicatifProgress::step_bar(&multi, "Consolidating");
            consolidate::consolidate_pending(&mut conn, &progress)?;
        }
        Commands::Geocode {
            provider,
            limit,
            batch_size,
        } => {
            let config = with_batch_size(config, batch_size)?;
            let universe = require_universe(cli.universe.as_deref(), &config)?;
            let mut conn = open_store(&paths)?;

            let start = Instant::now();
            geocode(
                &mut conn,
                &multi,
                &universe,
                &config,
                provider.as_deref(),
                limit,
            )
            .await?;
            log::info!(
                "Geocoding finished in {:.1}s",
                start.elapsed().as_secs_f64()
            );
        }
        Commands::Merge => {
            let mut conn = open_store(&paths)?;
            let universe = match cli.universe.as_deref() {
                Some(path) => universe::load(path, &config.universe)?,
                None => ProviderUniverse::default(),
            };
            merge_and_export(&mut conn, &paths, &universe, &config)?;
        }
        Commands::Report => {
            let conn = open_store(&paths)?;
            let universe = cli
                .universe
                .as_deref()
                .map(|path| universe::load(path, &config.universe))
                .transpose()?;
            report(&conn, &paths, universe.as_ref(), &config)?;
        }
        Commands::Run { limit, batch_size } => {
            let config = with_batch_size(config, batch_size)?;
            let universe = require_universe(cli.universe.as_deref(), &config)?;
            let mut conn = open_store(&paths)?;

            let start = Instant::now();
            geocode(&mut conn, &multi, &universe, &config, None, limit).await?;
            merge_and_export(&mut conn, &paths, &universe, &config)?;
            report(&conn, &paths, Some(&universe), &config)?;
            log::info!("Run finished in {:.1}s", start.elapsed().as_secs_f64());
        }
    }

    Ok(())
}
