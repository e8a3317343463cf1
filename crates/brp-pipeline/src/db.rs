//! Postgres persistence for the `app_info` and `reviews` tables.

use anyhow::{Context, Result};
use async_trait::async_trait;
use brp_core::{BankApp, RawReviewRow, ReviewRecord};
use sqlx::postgres::PgConnectOptions;
use sqlx::{Connection, PgConnection, Postgres, QueryBuilder};
use tracing::{debug, warn};

use crate::load::{LoadPlan, ReviewStore, StoreOutcome};

/// Rows per multi-row INSERT; 13 binds per review keeps this well under the
/// 65535 bind-parameter limit.
const INSERT_CHUNK_ROWS: usize = 1000;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct InsertTally {
    pub inserted: u64,
    pub skipped: u64,
    pub failed: u64,
}

impl InsertTally {
    /// Counts one row outcome: affected rows mean inserted, zero means the
    /// id already existed, an error is logged and counted as failed.
    pub fn record<E: std::fmt::Display>(&mut self, review_id: &str, result: Result<u64, E>) {
        match result {
            Ok(affected) if affected > 0 => self.inserted += 1,
            Ok(_) => self.skipped += 1,
            Err(err) => {
                warn!(review_id, error = %err, "row insert failed");
                self.failed += 1;
            }
        }
    }
}

pub async fn connect(options: &PgConnectOptions) -> Result<PgConnection> {
    PgConnection::connect_with(options)
        .await
        .context("connecting to database")
}

pub const SCHEMA_SQL: &str = include_str!("../../../migrations/0001_bank_reviews.sql");

/// Creates `app_info` and `reviews` when they do not exist yet.
pub async fn ensure_schema(options: &PgConnectOptions) -> Result<()> {
    let mut conn = connect(options).await?;
    sqlx::raw_sql(SCHEMA_SQL)
        .execute(&mut conn)
        .await
        .context("applying schema")?;
    conn.close().await.context("closing database connection")?;
    Ok(())
}

/// Row-by-row conflict-skip insert of freshly scraped reviews. Each row runs
/// in its own implicit transaction so a bad row is logged and skipped.
pub async fn insert_raw_reviews(
    options: &PgConnectOptions,
    rows: &[RawReviewRow],
) -> Result<InsertTally> {
    let mut conn = connect(options).await?;
    let mut tally = InsertTally::default();
    for row in rows {
        let result = sqlx::query(
            r#"
            INSERT INTO reviews (review_id, review_text, rating, review_date, user_name,
                                 thumbs_up, reply_content, bank_code, source)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (review_id) DO NOTHING
            "#,
        )
        .bind(&row.review_id)
        .bind(&row.review_text)
        .bind(row.rating)
        .bind(row.review_date.map(|ts| ts.date()))
        .bind(&row.user_name)
        .bind(row.thumbs_up)
        .bind(row.reply_content.as_deref())
        .bind(&row.bank_code)
        .bind(&row.source)
        .execute(&mut conn)
        .await;
        tally.record(&row.review_id, result.map(|done| done.rows_affected()));
    }
    conn.close().await.context("closing database connection")?;
    Ok(tally)
}

async fn upsert_apps(conn: &mut PgConnection, apps: &[BankApp]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in apps.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<'_, Postgres> =
            QueryBuilder::new("INSERT INTO app_info (app_id, bank_name) ");
        qb.push_values(chunk, |mut b, app| {
            b.push_bind(app.app_id).push_bind(app.bank_name.as_str());
        });
        qb.push(" ON CONFLICT (app_id) DO NOTHING");
        let done = qb
            .build()
            .execute(&mut *conn)
            .await
            .context("upserting app_info")?;
        inserted += done.rows_affected();
    }
    Ok(inserted)
}

async fn upsert_reviews(conn: &mut PgConnection, reviews: &[ReviewRecord]) -> Result<u64> {
    let mut inserted = 0;
    for chunk in reviews.chunks(INSERT_CHUNK_ROWS) {
        let mut qb: QueryBuilder<'_, Postgres> = QueryBuilder::new(
            "INSERT INTO reviews (review_id, app_id, review_text, rating, review_date, user_name, \
             thumbs_up, reply_content, bank_code, source, sentiment_score, sentiment_label, \
             identified_theme) ",
        );
        qb.push_values(chunk, |mut b, r| {
            b.push_bind(r.review_id.as_str())
                .push_bind(r.app_id)
                .push_bind(r.review_text.as_str())
                .push_bind(r.rating)
                .push_bind(r.review_date)
                .push_bind(r.user_name.as_str())
                .push_bind(r.thumbs_up)
                .push_bind(r.reply_content.as_deref())
                .push_bind(r.bank_code.as_str())
                .push_bind(r.source.as_str())
                .push_bind(r.sentiment_score)
                .push_bind(r.sentiment_label.as_str())
                .push_bind(r.identified_theme.as_str());
        });
        qb.push(" ON CONFLICT (review_id) DO NOTHING");
        let done = qb
            .build()
            .execute(&mut *conn)
            .await
            .context("upserting reviews")?;
        debug!(rows = chunk.len(), inserted = done.rows_affected(), "review chunk upserted");
        inserted += done.rows_affected();
    }
    Ok(inserted)
}

/// Opens a connection per `apply`, runs both upserts in one transaction and
/// closes the connection before returning.
#[derive(Debug, Clone)]
pub struct PgReviewStore {
    options: PgConnectOptions,
}

impl PgReviewStore {
    pub fn new(options: PgConnectOptions) -> Self {
        Self { options }
    }
}

#[async_trait]
impl ReviewStore for PgReviewStore {
    fn name(&self) -> &str {
        "postgres"
    }

    async fn apply(&mut self, plan: &LoadPlan) -> Result<StoreOutcome> {
        let mut conn = connect(&self.options).await?;
        let mut tx = conn.begin().await.context("starting transaction")?;
        let apps_inserted = upsert_apps(&mut tx, &plan.apps).await?;
        let reviews_inserted = upsert_reviews(&mut tx, &plan.reviews).await?;
        tx.commit().await.context("committing load transaction")?;
        conn.close().await.context("closing database connection")?;
        Ok(StoreOutcome {
            apps_inserted,
            reviews_inserted,
        })
    }
}
