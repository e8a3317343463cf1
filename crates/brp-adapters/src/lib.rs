//! Review source contracts + HTTP and fixture-backed implementations.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use brp_core::{parse_timestamp, AppMetadata, RawReview};
use brp_storage::{FetchError, HttpFetcher, RetryDisposition};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::fs;
use tracing::debug;

pub const CRATE_NAME: &str = "brp-adapters";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortOrder {
    Newest,
    MostRelevant,
}

impl SortOrder {
    pub fn as_query(&self) -> &'static str {
        match self {
            Self::Newest => "newest",
            Self::MostRelevant => "most_relevant",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Locale {
    pub lang: String,
    pub country: String,
}

impl Default for Locale {
    fn default() -> Self {
        Self {
            lang: "en".to_string(),
            country: "us".to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error(transparent)]
    Fetch(#[from] FetchError),
    #[error("invalid payload from {origin}: {source}")]
    Decode {
        origin: String,
        #[source]
        source: serde_json::Error,
    },
    #[error("no fixture for {app_id} at {path}")]
    MissingFixture { app_id: String, path: PathBuf },
    #[error("reading {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl SourceError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Fetch(err) => err.disposition(),
            Self::Io { .. } => RetryDisposition::Retryable,
            Self::Decode { .. } | Self::MissingFixture { .. } => RetryDisposition::NonRetryable,
        }
    }

    pub fn is_transient(&self) -> bool {
        self.disposition() == RetryDisposition::Retryable
    }
}

/// Upstream app-store review client.
#[async_trait]
pub trait ReviewSource: Send + Sync {
    fn source_name(&self) -> &str;

    async fn fetch_app_metadata(&self, app_id: &str) -> Result<AppMetadata, SourceError>;

    /// At most `count` reviews in the requested order.
    async fn fetch_reviews(
        &self,
        app_id: &str,
        count: usize,
        sort: SortOrder,
    ) -> Result<Vec<RawReview>, SourceError>;
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ReviewsPayload {
    List(Vec<RawReview>),
    Page { reviews: Vec<RawReview> },
}

impl ReviewsPayload {
    fn into_reviews(self) -> Vec<RawReview> {
        match self {
            Self::List(reviews) | Self::Page { reviews } => reviews,
        }
    }
}

fn decode_json<T: DeserializeOwned>(origin: &str, bytes: &[u8]) -> Result<T, SourceError> {
    serde_json::from_slice(bytes).map_err(|source| SourceError::Decode {
        origin: origin.to_string(),
        source,
    })
}

/// JSON review API in the upstream scraper's shape.
#[derive(Debug, Clone)]
pub struct HttpReviewSource {
    base_url: String,
    locale: Locale,
    http: HttpFetcher,
}

impl HttpReviewSource {
    pub fn new(base_url: impl Into<String>, locale: Locale, http: HttpFetcher) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            locale,
            http,
        }
    }

    pub fn app_url(&self, app_id: &str) -> String {
        format!("{}/apps/{}", self.base_url, app_id)
    }

    pub fn reviews_url(&self, app_id: &str) -> String {
        format!("{}/apps/{}/reviews", self.base_url, app_id)
    }

    fn locale_query(&self) -> Vec<(&'static str, String)> {
        vec![
            ("lang", self.locale.lang.clone()),
            ("country", self.locale.country.clone()),
        ]
    }
}

#[async_trait]
impl ReviewSource for HttpReviewSource {
    fn source_name(&self) -> &str {
        "http"
    }

    async fn fetch_app_metadata(&self, app_id: &str) -> Result<AppMetadata, SourceError> {
        let url = self.app_url(app_id);
        let resp = self.http.fetch_bytes(&url, &self.locale_query()).await?;
        decode_json(&resp.final_url, &resp.body)
    }

    async fn fetch_reviews(
        &self,
        app_id: &str,
        count: usize,
        sort: SortOrder,
    ) -> Result<Vec<RawReview>, SourceError> {
        let url = self.reviews_url(app_id);
        let mut query = self.locale_query();
        query.push(("count", count.to_string()));
        query.push(("sort", sort.as_query().to_string()));
        let resp = self.http.fetch_bytes(&url, &query).await?;
        let payload: ReviewsPayload = decode_json(&resp.final_url, &resp.body)?;
        let mut reviews = payload.into_reviews();
        reviews.truncate(count);
        debug!(app_id, fetched = reviews.len(), "decoded review page");
        Ok(reviews)
    }
}

/// Reads captured responses from `<root>/<app_id>/{metadata,reviews}.json`.
#[derive(Debug, Clone)]
pub struct FixtureReviewSource {
    root: PathBuf,
}

impl FixtureReviewSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    async fn read_fixture<T: DeserializeOwned>(
        &self,
        app_id: &str,
        file_name: &str,
    ) -> Result<T, SourceError> {
        let path = self.root.join(app_id).join(file_name);
        let bytes = match fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(SourceError::MissingFixture {
                    app_id: app_id.to_string(),
                    path,
                })
            }
            Err(source) => return Err(SourceError::Io { path, source }),
        };
        decode_json(&path.display().to_string(), &bytes)
    }
}

#[async_trait]
impl ReviewSource for FixtureReviewSource {
    fn source_name(&self) -> &str {
        "fixture"
    }

    async fn fetch_app_metadata(&self, app_id: &str) -> Result<AppMetadata, SourceError> {
        self.read_fixture(app_id, "metadata.json").await
    }

    async fn fetch_reviews(
        &self,
        app_id: &str,
        count: usize,
        sort: SortOrder,
    ) -> Result<Vec<RawReview>, SourceError> {
        let payload: ReviewsPayload = self.read_fixture(app_id, "reviews.json").await?;
        let mut reviews = payload.into_reviews();
        if sort == SortOrder::Newest {
            // stable: undated reviews sink to the end in capture order
            reviews.sort_by_key(|r| {
                std::cmp::Reverse(r.at.as_deref().and_then(parse_timestamp))
            });
        }
        reviews.truncate(count);
        Ok(reviews)
    }
}
