use std::path::PathBuf;

use anyhow::Result;
use brp_adapters::{FixtureReviewSource, HttpReviewSource, ReviewSource};
use brp_pipeline::{
    database_options, db, run_all, run_clean, run_enrich, run_ingest, run_load, CleanSummary,
    EnrichSummary, IngestOptions, IngestSummary, LoadReport, MemoryReviewStore, PgReviewStore,
    PipelineConfig, ReviewStore,
};
use brp_storage::{HttpClientConfig, HttpFetcher, StoredFlatFile};
use clap::{Args, Parser, Subcommand};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "brp-cli")]
#[command(about = "Bank app review pipeline: scrape, preprocess, analyze, load")]
struct Cli {
    #[arg(long, global = true, default_value = "config/scraper_config.yaml")]
    config: PathBuf,
    #[arg(long, global = true, default_value = "config/db_config.yaml")]
    db_config: PathBuf,
    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Debug, Clone, Default, Args)]
struct SourceArgs {
    /// Read `<DIR>/<app_id>/{metadata,reviews}.json` instead of the network.
    #[arg(long, value_name = "DIR")]
    fixtures: Option<PathBuf>,
    #[arg(long, value_name = "URL")]
    source_url: Option<String>,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// Fetch reviews and app metadata into raw snapshots.
    Scrape {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        save_to_db: bool,
    },
    /// Clean raw snapshots.
    Preprocess,
    /// Score sentiment and tag themes.
    Analyze,
    /// Upsert the enriched snapshot into Postgres.
    Load {
        /// Plan against an in-memory store and report counts only.
        #[arg(long)]
        dry_run: bool,
    },
    /// Create the database tables if they are missing.
    Migrate,
    /// Every stage in order.
    Run {
        #[command(flatten)]
        source: SourceArgs,
        #[arg(long)]
        dry_run: bool,
    },
}

fn init_tracing() {
    let filter = std::env::var("LOG_LEVEL")
        .ok()
        .and_then(|level| EnvFilter::try_new(level).ok())
        .unwrap_or_else(|| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

fn build_source(config: &PipelineConfig, args: &SourceArgs) -> Result<Box<dyn ReviewSource>> {
    if let Some(dir) = &args.fixtures {
        return Ok(Box::new(FixtureReviewSource::new(dir)));
    }
    let base_url = args
        .source_url
        .clone()
        .unwrap_or_else(|| config.source_url.clone());
    let http = HttpFetcher::new(HttpClientConfig {
        user_agent: Some(format!("brp-cli/{}", env!("CARGO_PKG_VERSION"))),
        ..Default::default()
    })?;
    Ok(Box::new(HttpReviewSource::new(
        base_url,
        config.locale.clone(),
        http,
    )))
}

fn build_store(cli: &Cli, dry_run: bool) -> Result<Box<dyn ReviewStore>> {
    if dry_run {
        return Ok(Box::new(MemoryReviewStore::new()));
    }
    Ok(Box::new(PgReviewStore::new(database_options(&cli.db_config)?)))
}

fn describe(file: &StoredFlatFile) -> String {
    format!(
        "{} rows={} sha256={}",
        file.path.display(),
        file.rows,
        file.content_hash
    )
}

fn print_ingest(summary: &IngestSummary) {
    println!(
        "scrape complete: run_id={} total_rows={}",
        summary.run_id, summary.total_rows
    );
    if let Some(file) = &summary.app_info {
        println!("  app_info {}", describe(file));
    }
    for bank in &summary.banks {
        match &bank.file {
            Some(file) => println!("  {} {}", bank.bank_code, describe(file)),
            None => println!("  {} rows={}", bank.bank_code, bank.rows),
        }
    }
    if let Some(file) = &summary.combined {
        println!("  combined {}", describe(file));
    }
    if let Some(tally) = &summary.db_insert {
        println!(
            "  db inserted={} skipped={} failed={}",
            tally.inserted, tally.skipped, tally.failed
        );
    }
}

fn print_clean(summary: &CleanSummary) {
    println!(
        "preprocess complete: run_id={} files={} skipped={}",
        summary.run_id,
        summary.files.len(),
        summary.skipped.len()
    );
    for report in &summary.files {
        println!(
            "  {} -> {} duplicates_removed={}",
            report.input.display(),
            describe(&report.output),
            report.duplicates_removed
        );
    }
}

fn print_enrich(summary: &EnrichSummary) {
    println!(
        "analyze complete: run_id={} positive={} negative={} neutral={}",
        summary.run_id, summary.labels.positive, summary.labels.negative, summary.labels.neutral
    );
    println!("  {}", describe(&summary.output));
}

fn print_load(report: &LoadReport, store: &str) {
    println!(
        "load complete: run_id={} store={} rows_read={} unique_review_ids={} apps_inserted={} reviews_inserted={}",
        report.run_id,
        store,
        report.summary.rows_read,
        report.summary.unique_review_ids,
        report.outcome.apps_inserted,
        report.outcome.reviews_inserted
    );
    for (bank, count) in &report.summary.per_bank {
        println!("  {bank}: {count}");
    }
    if report.summary.unmatched_rows > 0 {
        println!("  unmatched rows: {}", report.summary.unmatched_rows);
    }
}

fn ingest_options(cli: &Cli, save_to_db: bool) -> IngestOptions {
    let database = if save_to_db {
        match database_options(&cli.db_config) {
            Ok(options) => Some(options),
            Err(err) => {
                warn!(error = %err, "database configuration unavailable");
                None
            }
        }
    } else {
        None
    };
    IngestOptions {
        save_to_db,
        database,
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();
    let cli = Cli::parse();
    let config = PipelineConfig::load(&cli.config)?;

    let full_run = Commands::Run {
        source: SourceArgs::default(),
        dry_run: false,
    };
    let command = cli.command.as_ref().unwrap_or(&full_run);

    match command {
        Commands::Scrape { source, save_to_db } => {
            let source = build_source(&config, source)?;
            let options = ingest_options(&cli, *save_to_db);
            let summary = run_ingest(&config, source.as_ref(), &options).await?;
            print_ingest(&summary);
        }
        Commands::Preprocess => print_clean(&run_clean(&config).await?),
        Commands::Analyze => print_enrich(&run_enrich(&config).await?),
        Commands::Load { dry_run } => {
            let mut store = build_store(&cli, *dry_run)?;
            let report = run_load(&config, store.as_mut()).await?;
            print_load(&report, store.name());
        }
        Commands::Migrate => {
            db::ensure_schema(&database_options(&cli.db_config)?).await?;
            println!("migrate complete: {}", cli.db_config.display());
        }
        Commands::Run { source, dry_run } => {
            let source = build_source(&config, source)?;
            let mut store = build_store(&cli, *dry_run)?;
            let summary = run_all(
                &config,
                source.as_ref(),
                &IngestOptions::default(),
                store.as_mut(),
            )
            .await?;
            print_ingest(&summary.ingest);
            print_clean(&summary.clean);
            print_enrich(&summary.enrich);
            print_load(&summary.load, store.name());
            println!("pipeline complete: run_id={}", summary.run_id);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn no_subcommand_means_a_full_run() {
        let cli = Cli::try_parse_from(["brp-cli"]).unwrap();
        assert!(cli.command.is_none());
        assert_eq!(cli.config, PathBuf::from("config/scraper_config.yaml"));
    }

    #[test]
    fn scrape_flags_parse() {
        let cli = Cli::try_parse_from([
            "brp-cli",
            "scrape",
            "--save-to-db",
            "--fixtures",
            "fixtures",
            "--config",
            "other.yaml",
        ])
        .unwrap();
        assert_eq!(cli.config, PathBuf::from("other.yaml"));
        match cli.command {
            Some(Commands::Scrape { source, save_to_db }) => {
                assert!(save_to_db);
                assert_eq!(source.fixtures, Some(PathBuf::from("fixtures")));
            }
            other => panic!("unexpected command {other:?}"),
        }
    }
}
