//! Ingestion: pull reviews for every configured bank and write raw snapshots.

use std::path::PathBuf;

use anyhow::Result;
use brp_adapters::{ReviewSource, SortOrder};
use brp_core::{parse_timestamp, AppInfoRow, RawReview, RawReviewRow, DEFAULT_SOURCE};
use brp_storage::{FlatFileStore, RetryPolicy, StoredFlatFile};
use sqlx::postgres::PgConnectOptions;
use tracing::{error, info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::{BankTarget, PipelineConfig};
use crate::db;

#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    /// Insert the combined rows into `reviews` after writing the files.
    pub save_to_db: bool,
    pub database: Option<PgConnectOptions>,
}

#[derive(Debug, Clone)]
pub struct BankIngest {
    pub bank_code: String,
    pub rows: usize,
    pub file: Option<StoredFlatFile>,
}

#[derive(Debug, Clone)]
pub struct IngestSummary {
    pub run_id: Uuid,
    pub app_info: Option<StoredFlatFile>,
    pub banks: Vec<BankIngest>,
    pub combined: Option<StoredFlatFile>,
    pub total_rows: usize,
    pub db_insert: Option<db::InsertTally>,
}

/// Best-effort metadata lookup; failures are logged and yield `None`.
pub async fn fetch_app_info(source: &dyn ReviewSource, bank: &BankTarget) -> Option<AppInfoRow> {
    match source.fetch_app_metadata(&bank.app_id).await {
        Ok(metadata) => Some(AppInfoRow::from_metadata(
            &bank.app_id,
            &bank.code,
            &bank.name,
            metadata,
        )),
        Err(err) => {
            warn!(bank = %bank.code, app_id = %bank.app_id, error = %err, "app metadata unavailable");
            None
        }
    }
}

/// Newest-first reviews with bounded retry. Exhausted or permanent failures
/// degrade to an empty list so one bank never aborts the batch.
pub async fn scrape_reviews_for_app(
    source: &dyn ReviewSource,
    app_id: &str,
    count: usize,
    retry: &RetryPolicy,
) -> Vec<RawReview> {
    let result = retry
        .run(
            app_id,
            || source.fetch_reviews(app_id, count, SortOrder::Newest),
            |err| err.disposition(),
        )
        .await;
    match result {
        Ok(reviews) => reviews,
        Err(err) => {
            error!(app_id, error = %err, "giving up on review fetch");
            Vec::new()
        }
    }
}

pub fn normalize_review(raw: RawReview, bank_code: &str, bank_name: &str) -> RawReviewRow {
    RawReviewRow {
        review_id: raw.review_id.unwrap_or_default(),
        review_text: raw.content.unwrap_or_default(),
        rating: raw.score.unwrap_or(0),
        review_date: raw.at.as_deref().and_then(parse_timestamp),
        user_name: raw.user_name.unwrap_or_default(),
        thumbs_up: raw.thumbs_up_count.unwrap_or(0).max(0),
        reply_content: raw.reply_content.filter(|reply| !reply.is_empty()),
        bank_code: bank_code.to_string(),
        bank_name: bank_name.to_string(),
        app_version: raw.review_created_version.unwrap_or_default(),
        source: DEFAULT_SOURCE.to_string(),
    }
}

pub fn normalize_reviews(raw: Vec<RawReview>, bank_code: &str, bank_name: &str) -> Vec<RawReviewRow> {
    raw.into_iter()
        .map(|r| normalize_review(r, bank_code, bank_name))
        .collect()
}

pub async fn run_ingest(
    config: &PipelineConfig,
    source: &dyn ReviewSource,
    options: &IngestOptions,
) -> Result<IngestSummary> {
    let run_id = Uuid::new_v4();
    let span = info_span!("ingest", %run_id, source = source.source_name());
    run_ingest_inner(run_id, config, source, options)
        .instrument(span)
        .await
}

async fn run_ingest_inner(
    run_id: Uuid,
    config: &PipelineConfig,
    source: &dyn ReviewSource,
    options: &IngestOptions,
) -> Result<IngestSummary> {
    let store = FlatFileStore::new(&config.workspace_root);

    let mut app_info_rows = Vec::new();
    for bank in &config.banks {
        info!(bank = %bank.code, app_id = %bank.app_id, "fetching app metadata");
        if let Some(row) = fetch_app_info(source, bank).await {
            app_info_rows.push(row);
        }
    }
    let app_info = match (config.data_paths.app_info(), app_info_rows.is_empty()) {
        (Some(path), false) => Some(store.write_records(path, &app_info_rows).await?),
        (None, false) => {
            warn!("data_paths.app_info not configured; app metadata not written");
            None
        }
        (_, true) => None,
    };

    let mut all_rows: Vec<RawReviewRow> = Vec::new();
    let mut banks = Vec::with_capacity(config.banks.len());
    for (idx, bank) in config.banks.iter().enumerate() {
        if idx > 0 && !config.pause.is_zero() {
            tokio::time::sleep(config.pause).await;
        }
        info!(bank = %bank.code, name = %bank.name, "scraping reviews");
        let raw = scrape_reviews_for_app(
            source,
            &bank.app_id,
            config.reviews_per_bank,
            &config.retry,
        )
        .await;
        let rows = normalize_reviews(raw, &bank.code, &bank.name);
        if rows.is_empty() {
            warn!(bank = %bank.code, "no reviews collected");
            banks.push(BankIngest {
                bank_code: bank.code.clone(),
                rows: 0,
                file: None,
            });
            continue;
        }

        let file = match config.data_paths.bank_raw(&bank.code) {
            Some(path) => Some(store.write_records(path, &rows).await?),
            None => None,
        };
        info!(bank = %bank.code, rows = rows.len(), "bank scraped");
        banks.push(BankIngest {
            bank_code: bank.code.clone(),
            rows: rows.len(),
            file,
        });
        all_rows.extend(rows);
    }

    if all_rows.is_empty() {
        error!("no reviews collected at all");
        return Ok(IngestSummary {
            run_id,
            app_info,
            banks,
            combined: None,
            total_rows: 0,
            db_insert: None,
        });
    }

    let combined_path: PathBuf = config.data_paths.all_raw()?.to_path_buf();
    let combined = store.write_records(&combined_path, &all_rows).await?;
    info!(rows = all_rows.len(), path = %combined.path.display(), "scrape complete");

    let db_insert = if options.save_to_db {
        insert_into_db(options.database.as_ref(), &all_rows).await
    } else {
        None
    };

    Ok(IngestSummary {
        run_id,
        app_info,
        banks,
        combined: Some(combined),
        total_rows: all_rows.len(),
        db_insert,
    })
}

async fn insert_into_db(
    database: Option<&PgConnectOptions>,
    rows: &[RawReviewRow],
) -> Option<db::InsertTally> {
    let Some(options) = database else {
        error!("database insert requested but no database configured");
        return None;
    };
    match db::insert_raw_reviews(options, rows).await {
        Ok(tally) => {
            info!(
                inserted = tally.inserted,
                skipped = tally.skipped,
                failed = tally.failed,
                "inserted reviews into database"
            );
            Some(tally)
        }
        Err(err) => {
            error!(error = %err, "database connection or insert failed");
            None
        }
    }
}
