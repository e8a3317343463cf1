//! Bank review pipeline stages: ingest, clean, enrich and load.

use anyhow::Result;
use brp_adapters::ReviewSource;
use tracing::{info, info_span, Instrument};
use uuid::Uuid;

pub mod clean;
pub mod config;
pub mod db;
pub mod enrich;
pub mod error;
pub mod ingest;
pub mod load;
pub mod sentiment;
pub mod themes;

pub use clean::{clean_file, clean_reviews, run_clean, CleanReport, CleanSummary, LooseReview};
pub use config::{database_options, BankTarget, DataPaths, DatabaseConfig, PipelineConfig};
pub use db::{InsertTally, PgReviewStore};
pub use enrich::{enrich_reviews, run_enrich, EnrichSummary, LabelCounts};
pub use error::PipelineError;
pub use ingest::{run_ingest, scrape_reviews_for_app, IngestOptions, IngestSummary};
pub use load::{
    plan_load, run_load, LoadPlan, LoadReport, LoadSummary, MemoryReviewStore, ReviewStore,
    StoreOutcome,
};
pub use sentiment::SentimentAnalyzer;
pub use themes::{ThemeTable, DEFAULT_THEMES};

pub const CRATE_NAME: &str = "brp-pipeline";

#[derive(Debug, Clone)]
pub struct PipelineRunSummary {
    pub run_id: Uuid,
    pub ingest: IngestSummary,
    pub clean: CleanSummary,
    pub enrich: EnrichSummary,
    pub load: LoadReport,
}

/// All four stages in order. A stage error stops the run; later stages
/// never see a partial hand-off because every snapshot write is atomic.
pub async fn run_all(
    config: &PipelineConfig,
    source: &dyn ReviewSource,
    options: &IngestOptions,
    store: &mut dyn ReviewStore,
) -> Result<PipelineRunSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("pipeline", %run_id);
    async move {
        let ingest = run_ingest(config, source, options).await?;
        let clean = run_clean(config).await?;
        let enrich = run_enrich(config).await?;
        let load = run_load(config, store).await?;
        info!(
            scraped = ingest.total_rows,
            enriched = enrich.output.rows,
            loaded = load.outcome.reviews_inserted,
            "pipeline complete"
        );
        Ok(PipelineRunSummary {
            run_id,
            ingest,
            clean,
            enrich,
            load,
        })
    }
    .instrument(span)
    .await
}
