//! Cleaning: dedupe raw snapshots, fill defaults and normalize dates.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use anyhow::Result;
use brp_core::{parse_date, Review, DEFAULT_SOURCE, UNKNOWN_BANK};
use brp_storage::{FlatFileStore, StoredFlatFile};
use serde::Deserialize;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;

/// Any row shaped like a raw or cleaned snapshot. Every column is optional
/// and read as text so malformed values can be coerced instead of rejected.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct LooseReview {
    pub review_id: Option<String>,
    pub review_text: Option<String>,
    pub rating: Option<String>,
    pub review_date: Option<String>,
    pub user_name: Option<String>,
    pub thumbs_up: Option<String>,
    pub reply_content: Option<String>,
    pub bank_code: Option<String>,
    pub bank_name: Option<String>,
    #[serde(alias = "app_id")]
    pub app_version: Option<String>,
    pub source: Option<String>,
}

fn coerce_int(value: Option<&str>) -> i64 {
    let Some(text) = value.map(str::trim).filter(|t| !t.is_empty()) else {
        return 0;
    };
    if let Ok(n) = text.parse::<i64>() {
        return n;
    }
    match text.parse::<f64>() {
        Ok(f) if f.is_finite() => f.trunc() as i64,
        _ => 0,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn normalize(row: LooseReview) -> Review {
    Review {
        review_id: row.review_id.unwrap_or_default(),
        review_text: row.review_text.unwrap_or_default(),
        rating: coerce_int(row.rating.as_deref()),
        review_date: row.review_date.as_deref().and_then(parse_date),
        user_name: row.user_name.unwrap_or_default(),
        thumbs_up: coerce_int(row.thumbs_up.as_deref()).max(0),
        reply_content: non_empty(row.reply_content),
        bank_code: row.bank_code.unwrap_or_default(),
        bank_name: non_empty(row.bank_name).unwrap_or_else(|| UNKNOWN_BANK.to_string()),
        app_version: row.app_version.unwrap_or_default(),
        source: non_empty(row.source).unwrap_or_else(|| DEFAULT_SOURCE.to_string()),
    }
}

/// Normalize every row, then drop repeats of (`review_id`, `review_text`),
/// keeping the first. Order is otherwise preserved.
pub fn clean_reviews(rows: Vec<LooseReview>) -> Vec<Review> {
    let mut seen = HashSet::new();
    rows.into_iter()
        .map(normalize)
        .filter(|r| seen.insert((r.review_id.clone(), r.review_text.clone())))
        .collect()
}

#[derive(Debug, Clone)]
pub struct CleanReport {
    pub input: PathBuf,
    pub rows_in: usize,
    pub duplicates_removed: usize,
    pub output: StoredFlatFile,
}

pub async fn clean_file(
    store: &FlatFileStore,
    input: impl AsRef<Path>,
    output: impl AsRef<Path>,
) -> Result<CleanReport> {
    let input = input.as_ref();
    let rows: Vec<LooseReview> = store.read_records(input).await?;
    let rows_in = rows.len();
    let cleaned = clean_reviews(rows);
    let duplicates_removed = rows_in - cleaned.len();
    let output = store.write_records(output, &cleaned).await?;
    info!(
        input = %input.display(),
        output = %output.path.display(),
        rows_in,
        rows_out = output.rows,
        duplicates_removed,
        "cleaned file"
    );
    Ok(CleanReport {
        input: input.to_path_buf(),
        rows_in,
        duplicates_removed,
        output,
    })
}

#[derive(Debug, Clone)]
pub struct CleanSummary {
    pub run_id: Uuid,
    pub files: Vec<CleanReport>,
    pub skipped: Vec<PathBuf>,
}

pub async fn run_clean(config: &PipelineConfig) -> Result<CleanSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("clean", %run_id);
    run_clean_inner(run_id, config).instrument(span).await
}

async fn run_clean_inner(run_id: Uuid, config: &PipelineConfig) -> Result<CleanSummary> {
    let store = FlatFileStore::new(&config.workspace_root);
    let mut files = Vec::new();
    let mut skipped = Vec::new();
    for input in config.clean_inputs()? {
        if !store.exists(&input).await? {
            warn!(path = %input.display(), "raw file not found, skipping");
            skipped.push(input);
            continue;
        }
        let output = config.cleaned_path_for(&input);
        files.push(clean_file(&store, &input, &output).await?);
    }
    Ok(CleanSummary {
        run_id,
        files,
        skipped,
    })
}
