//! Load: deduplicate enriched reviews, derive bank ids and upsert both tables.

use std::collections::{BTreeMap, HashMap, HashSet};

use anyhow::Result;
use async_trait::async_trait;
use brp_core::{BankApp, EnrichedReview, ReviewRecord};
use brp_storage::FlatFileStore;
use tracing::{info, info_span, warn, Instrument};
use uuid::Uuid;

use crate::config::PipelineConfig;
use crate::error::PipelineError;

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadSummary {
    pub rows_read: usize,
    pub unique_review_ids: usize,
    pub unmatched_rows: usize,
    /// Row count per bank name, largest first.
    pub per_bank: Vec<(String, usize)>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct LoadPlan {
    pub apps: Vec<BankApp>,
    pub reviews: Vec<ReviewRecord>,
    pub summary: LoadSummary,
}

/// Plan a load: first occurrence of each `review_id` wins, banks get ids
/// 1..n in first-seen order, and every review is joined to its bank id.
pub fn plan_load(rows: Vec<EnrichedReview>) -> LoadPlan {
    let rows_read = rows.len();

    let mut seen_ids = HashSet::new();
    let unique: Vec<EnrichedReview> = rows
        .into_iter()
        .filter(|r| seen_ids.insert(r.review_id.clone()))
        .collect();

    let mut apps: Vec<BankApp> = Vec::new();
    let mut app_ids: HashMap<String, i64> = HashMap::new();
    for review in &unique {
        if !app_ids.contains_key(&review.bank_name) {
            let app_id = apps.len() as i64 + 1;
            app_ids.insert(review.bank_name.clone(), app_id);
            apps.push(BankApp {
                app_id,
                bank_name: review.bank_name.clone(),
            });
        }
    }

    let mut reviews = Vec::with_capacity(unique.len());
    let mut unmatched_rows = 0;
    for review in &unique {
        match app_ids.get(&review.bank_name) {
            Some(app_id) => reviews.push(ReviewRecord::from_enriched(review, *app_id)),
            None => unmatched_rows += 1,
        }
    }

    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for review in &unique {
        *counts.entry(review.bank_name.as_str()).or_default() += 1;
    }
    let mut per_bank: Vec<(String, usize)> = counts
        .into_iter()
        .map(|(name, count)| (name.to_string(), count))
        .collect();
    // stable sort over the name-ordered map breaks ties alphabetically
    per_bank.sort_by(|a, b| b.1.cmp(&a.1));

    LoadPlan {
        apps,
        reviews,
        summary: LoadSummary {
            rows_read,
            unique_review_ids: seen_ids.len(),
            unmatched_rows,
            per_bank,
        },
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreOutcome {
    pub apps_inserted: u64,
    pub reviews_inserted: u64,
}

/// Destination for a load plan. `apply` must insert-or-skip both tables as
/// one unit: either everything is durable or nothing is.
#[async_trait]
pub trait ReviewStore: Send {
    fn name(&self) -> &str;

    async fn apply(&mut self, plan: &LoadPlan) -> Result<StoreOutcome>;
}

/// In-process store with the same conflict-skip semantics as the database.
#[derive(Debug, Clone, Default)]
pub struct MemoryReviewStore {
    apps: BTreeMap<i64, BankApp>,
    reviews: BTreeMap<String, ReviewRecord>,
}

impl MemoryReviewStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn apps(&self) -> impl Iterator<Item = &BankApp> {
        self.apps.values()
    }

    pub fn reviews(&self) -> impl Iterator<Item = &ReviewRecord> {
        self.reviews.values()
    }

    pub fn review(&self, review_id: &str) -> Option<&ReviewRecord> {
        self.reviews.get(review_id)
    }
}

#[async_trait]
impl ReviewStore for MemoryReviewStore {
    fn name(&self) -> &str {
        "memory"
    }

    async fn apply(&mut self, plan: &LoadPlan) -> Result<StoreOutcome> {
        let mut outcome = StoreOutcome::default();
        for app in &plan.apps {
            if !self.apps.contains_key(&app.app_id) {
                self.apps.insert(app.app_id, app.clone());
                outcome.apps_inserted += 1;
            }
        }
        for review in &plan.reviews {
            if !self.reviews.contains_key(&review.review_id) {
                self.reviews.insert(review.review_id.clone(), review.clone());
                outcome.reviews_inserted += 1;
            }
        }
        Ok(outcome)
    }
}

#[derive(Debug, Clone)]
pub struct LoadReport {
    pub run_id: Uuid,
    pub summary: LoadSummary,
    pub outcome: StoreOutcome,
}

pub async fn run_load(config: &PipelineConfig, store: &mut dyn ReviewStore) -> Result<LoadReport> {
    let run_id = Uuid::new_v4();
    let span = info_span!("load", %run_id, store = store.name());
    run_load_inner(run_id, config, store).instrument(span).await
}

async fn run_load_inner(
    run_id: Uuid,
    config: &PipelineConfig,
    store: &mut dyn ReviewStore,
) -> Result<LoadReport> {
    let files = FlatFileStore::new(&config.workspace_root);
    let input = config.data_paths.enriched();
    if !files.exists(&input).await? {
        return Err(PipelineError::NoInputs {
            stage: "load",
            checked: vec![files.resolve(&input)],
        }
        .into());
    }

    let rows: Vec<EnrichedReview> = files.read_records(&input).await?;
    let plan = plan_load(rows);
    if plan.summary.unmatched_rows > 0 {
        warn!(
            unmatched = plan.summary.unmatched_rows,
            "reviews without a matching bank were not loaded"
        );
    }

    let outcome = store.apply(&plan).await?;
    info!(
        apps = plan.apps.len(),
        apps_inserted = outcome.apps_inserted,
        reviews = plan.reviews.len(),
        reviews_inserted = outcome.reviews_inserted,
        "load committed"
    );
    for (bank, count) in &plan.summary.per_bank {
        info!(bank = %bank, rows = count, "bank row count");
    }
    info!(
        unique_review_ids = plan.summary.unique_review_ids,
        rows_read = plan.summary.rows_read,
        "review id check"
    );

    Ok(LoadReport {
        run_id,
        summary: plan.summary,
        outcome,
    })
}
