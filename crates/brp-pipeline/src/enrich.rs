//! Enrichment: score sentiment and tag themes for every cleaned review.

use std::path::PathBuf;

use anyhow::{Context, Result};
use brp_core::{EnrichedReview, Review, SentimentLabel};
use brp_storage::{FlatFileStore, StoredFlatFile};
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::PipelineError;
use crate::sentiment::SentimentAnalyzer;
use crate::themes::ThemeTable;

pub fn enrich_review(review: Review, analyzer: &SentimentAnalyzer, themes: &ThemeTable) -> EnrichedReview {
    let sentiment = analyzer.polarity(&review.review_text);
    let theme = themes.identify(&review.review_text);
    EnrichedReview::new(review, sentiment, theme)
}

pub fn enrich_reviews(
    rows: Vec<Review>,
    analyzer: &SentimentAnalyzer,
    themes: &ThemeTable,
) -> Vec<EnrichedReview> {
    rows.into_iter()
        .map(|r| enrich_review(r, analyzer, themes))
        .collect()
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LabelCounts {
    pub positive: usize,
    pub negative: usize,
    pub neutral: usize,
}

impl LabelCounts {
    pub fn tally(rows: &[EnrichedReview]) -> Self {
        rows.iter().fold(Self::default(), |mut counts, row| {
            match row.sentiment_label {
                SentimentLabel::Positive => counts.positive += 1,
                SentimentLabel::Negative => counts.negative += 1,
                SentimentLabel::Neutral => counts.neutral += 1,
            }
            counts
        })
    }
}

#[derive(Debug, Clone)]
pub struct EnrichSummary {
    pub run_id: Uuid,
    pub inputs: Vec<PathBuf>,
    pub skipped: Vec<PathBuf>,
    pub labels: LabelCounts,
    pub output: StoredFlatFile,
}

pub async fn run_enrich(config: &PipelineConfig) -> Result<EnrichSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("enrich", %run_id);
    run_enrich_inner(run_id, config).instrument(span).await
}

async fn run_enrich_inner(run_id: Uuid, config: &PipelineConfig) -> Result<EnrichSummary> {
    let store = FlatFileStore::new(&config.workspace_root);
    let candidates = config.enrich_inputs()?;

    let mut inputs = Vec::new();
    let mut skipped = Vec::new();
    let mut rows: Vec<Review> = Vec::new();
    for path in candidates {
        if !store.exists(&path).await? {
            warn!(path = %path.display(), "cleaned file not found, skipping");
            skipped.push(path);
            continue;
        }
        let batch: Vec<Review> = store.read_records(&path).await?;
        info!(path = %path.display(), rows = batch.len(), "loaded cleaned file");
        rows.extend(batch);
        inputs.push(path);
    }

    if inputs.is_empty() {
        return Err(PipelineError::NoInputs {
            stage: "enrich",
            checked: skipped.iter().map(|p| store.resolve(p)).collect(),
        }
        .into());
    }

    let analyzer = SentimentAnalyzer::new();
    let themes = ThemeTable::builtin().context("compiling theme patterns")?;
    let enriched = enrich_reviews(rows, &analyzer, &themes);
    let labels = LabelCounts::tally(&enriched);

    let output = store
        .write_records(config.data_paths.enriched(), &enriched)
        .await?;
    info!(
        rows = output.rows,
        positive = labels.positive,
        negative = labels.negative,
        neutral = labels.neutral,
        path = %output.path.display(),
        "enrichment complete"
    );

    Ok(EnrichSummary {
        run_id,
        inputs,
        skipped,
        labels,
        output,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use brp_core::{DEFAULT_SOURCE, FALLBACK_THEME};
    use tempfile::tempdir;

    fn review(id: &str, text: &str, bank: &str) -> Review {
        Review {
            review_id: id.to_string(),
            review_text: text.to_string(),
            rating: 3,
            review_date: None,
            user_name: String::new(),
            thumbs_up: 0,
            reply_content: None,
            bank_code: bank.to_string(),
            bank_name: bank.to_string(),
            app_version: String::new(),
            source: DEFAULT_SOURCE.to_string(),
        }
    }

    #[test]
    fn each_row_gets_sentiment_and_theme() {
        let analyzer = SentimentAnalyzer::new();
        let themes = ThemeTable::builtin().unwrap();
        let out = enrich_reviews(
            vec![
                review("r1", "Transfer failed again", "CBE"),
                review("r2", "Great app love it", "BOA"),
                review("r3", "", "BOA"),
            ],
            &analyzer,
            &themes,
        );

        assert_eq!(out[0].sentiment_label, SentimentLabel::Negative);
        assert_eq!(out[0].identified_theme, "Transaction Performance");
        assert_eq!(out[1].sentiment_label, SentimentLabel::Positive);
        assert_eq!(out[1].identified_theme, FALLBACK_THEME);
        assert_eq!(out[2].sentiment_label, SentimentLabel::Neutral);
        assert_eq!(out[2].identified_theme, FALLBACK_THEME);
        assert_eq!(out[1].bank_name, "BOA");
        assert_eq!(
            LabelCounts::tally(&out),
            LabelCounts {
                positive: 1,
                negative: 1,
                neutral: 1
            }
        );
    }

    fn config(root: &std::path::Path) -> PipelineConfig {
        PipelineConfig::from_yaml_str(
            "app_ids: {CBE: com.cbe, BOA: com.boa}\ndata_paths:\n  all_raw: raw/all.csv\n  cbe_raw: raw/cbe_raw.csv\n  boa_raw: raw/boa_raw.csv\n  cleaned_folder: clean\n  enriched: out/enriched.csv\n",
        )
        .unwrap()
        .with_workspace_root(root)
    }

    #[tokio::test]
    async fn inputs_concatenate_in_configured_order() {
        let dir = tempdir().unwrap();
        let store = FlatFileStore::new(dir.path());
        store
            .write_records("clean/boa_cleaned.csv", &[review("b1", "slow", "BOA")])
            .await
            .unwrap();
        store
            .write_records("clean/cbe_cleaned.csv", &[review("c1", "nice", "CBE")])
            .await
            .unwrap();

        let summary = run_enrich(&config(dir.path())).await.unwrap();

        assert_eq!(summary.skipped, vec![PathBuf::from("clean/all.csv")]);
        let rows: Vec<EnrichedReview> = store.read_records("out/enriched.csv").await.unwrap();
        let ids: Vec<_> = rows.iter().map(|r| r.review_id.as_str()).collect();
        assert_eq!(ids, vec!["c1", "b1"]);
    }

    #[tokio::test]
    async fn no_inputs_fails_without_writing() {
        let dir = tempdir().unwrap();
        let err = run_enrich(&config(dir.path())).await.unwrap_err();
        match err.downcast_ref::<PipelineError>() {
            Some(PipelineError::NoInputs { stage, checked }) => {
                assert_eq!(*stage, "enrich");
                assert_eq!(checked.len(), 3);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert!(!dir.path().join("out/enriched.csv").exists());
    }
}
