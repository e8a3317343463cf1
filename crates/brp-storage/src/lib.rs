//! Flat-file snapshot storage + HTTP fetch utilities for the review pipeline.

use std::fmt::Display;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use brp_core::FlatRecord;
use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde::Serialize;
use sha2::{Digest, Sha256};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info_span, warn, Instrument};
use uuid::Uuid;

pub const CRATE_NAME: &str = "brp-storage";

#[derive(Debug, Clone)]
pub struct StoredFlatFile {
    pub path: PathBuf,
    pub rows: usize,
    pub content_hash: String,
    pub byte_size: usize,
}

/// Reads and writes CSV snapshots below a root directory.
///
/// Relative paths resolve against the root; absolute paths are used as-is.
#[derive(Debug, Clone)]
pub struct FlatFileStore {
    root: PathBuf,
}

impl FlatFileStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn resolve(&self, path: impl AsRef<Path>) -> PathBuf {
        self.root.join(path)
    }

    pub fn sha256_hex(bytes: &[u8]) -> String {
        let mut hasher = Sha256::new();
        hasher.update(bytes);
        hex::encode(hasher.finalize())
    }

    /// Encode rows as CSV with the record's header, which is written even for
    /// an empty slice.
    pub fn encode_records<T: Serialize + FlatRecord>(rows: &[T]) -> anyhow::Result<Vec<u8>> {
        let mut writer = csv::WriterBuilder::new()
            .has_headers(false)
            .from_writer(Vec::new());
        writer
            .write_record(T::COLUMNS)
            .context("writing csv header")?;
        for (idx, row) in rows.iter().enumerate() {
            writer
                .serialize(row)
                .with_context(|| format!("serializing csv row {idx}"))?;
        }
        writer
            .into_inner()
            .map_err(|err| anyhow::anyhow!("flushing csv buffer: {}", err.error()))
    }

    pub fn decode_records<T: DeserializeOwned>(bytes: &[u8]) -> anyhow::Result<Vec<T>> {
        let mut reader = csv::ReaderBuilder::new()
            .has_headers(true)
            .flexible(false)
            .from_reader(bytes);
        let mut rows = Vec::new();
        for (idx, record) in reader.deserialize::<T>().enumerate() {
            // +2: one for the header, one for 1-based line numbers
            rows.push(record.with_context(|| format!("decoding csv line {}", idx + 2))?);
        }
        Ok(rows)
    }

    pub async fn exists(&self, path: impl AsRef<Path>) -> anyhow::Result<bool> {
        let path = self.resolve(path);
        fs::try_exists(&path)
            .await
            .with_context(|| format!("checking {}", path.display()))
    }

    pub async fn read_records<T: DeserializeOwned>(
        &self,
        path: impl AsRef<Path>,
    ) -> anyhow::Result<Vec<T>> {
        let path = self.resolve(path);
        let bytes = fs::read(&path)
            .await
            .with_context(|| format!("reading {}", path.display()))?;
        Self::decode_records(&bytes).with_context(|| format!("parsing {}", path.display()))
    }

    /// Replace the snapshot at `path` with `rows` via a temp file and atomic rename.
    pub async fn write_records<T: Serialize + FlatRecord>(
        &self,
        path: impl AsRef<Path>,
        rows: &[T],
    ) -> anyhow::Result<StoredFlatFile> {
        let bytes = Self::encode_records(rows)?;
        let path = self.resolve(path);
        self.write_bytes_atomic(&path, &bytes).await?;
        let stored = StoredFlatFile {
            content_hash: Self::sha256_hex(&bytes),
            byte_size: bytes.len(),
            rows: rows.len(),
            path,
        };
        debug!(
            path = %stored.path.display(),
            rows = stored.rows,
            sha256 = %stored.content_hash,
            "wrote flat file"
        );
        Ok(stored)
    }

    async fn write_bytes_atomic(&self, path: &Path, bytes: &[u8]) -> anyhow::Result<()> {
        let parent = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        fs::create_dir_all(&parent)
            .await
            .with_context(|| format!("creating directory {}", parent.display()))?;

        let temp_path = parent.join(format!(".{}.{}.tmp", Uuid::new_v4(), bytes.len()));
        let mut file = fs::OpenOptions::new()
            .create_new(true)
            .write(true)
            .open(&temp_path)
            .await
            .with_context(|| format!("opening temp file {}", temp_path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("writing temp file {}", temp_path.display()))?;
        file.flush()
            .await
            .with_context(|| format!("flushing temp file {}", temp_path.display()))?;
        drop(file);

        if let Err(err) = fs::rename(&temp_path, path).await {
            let _ = fs::remove_file(&temp_path).await;
            return Err(err).with_context(|| {
                format!(
                    "atomically renaming {} -> {}",
                    temp_path.display(),
                    path.display()
                )
            });
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDisposition {
    Retryable,
    NonRetryable,
}

pub fn classify_status(status: StatusCode) -> RetryDisposition {
    if status.is_server_error() || status == StatusCode::TOO_MANY_REQUESTS {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

pub fn classify_reqwest_error(err: &reqwest::Error) -> RetryDisposition {
    if err.is_timeout() || err.is_connect() || err.is_request() {
        RetryDisposition::Retryable
    } else {
        RetryDisposition::NonRetryable
    }
}

/// Bounded retry with a fixed pause between attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: usize,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            delay: Duration::from_secs(3),
        }
    }
}

impl RetryPolicy {
    /// Run `op` until it succeeds, fails non-retryably, or attempts run out.
    /// The last error is returned in the latter two cases.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        mut op: F,
        disposition: impl Fn(&E) -> RetryDisposition,
    ) -> Result<T, E>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let attempts = self.max_attempts.max(1);
        let mut attempt = 0;
        loop {
            attempt += 1;
            match op().await {
                Ok(value) => return Ok(value),
                Err(err) => {
                    warn!(label, attempt, max_attempts = attempts, error = %err, "attempt failed");
                    if attempt >= attempts || disposition(&err) == RetryDisposition::NonRetryable {
                        return Err(err);
                    }
                    tokio::time::sleep(self.delay).await;
                }
            }
        }
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(20),
            user_agent: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct FetchedResponse {
    pub status: StatusCode,
    pub final_url: String,
    pub body: Vec<u8>,
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

impl FetchError {
    pub fn disposition(&self) -> RetryDisposition {
        match self {
            Self::Request(err) => classify_reqwest_error(err),
            Self::HttpStatus { status, .. } => StatusCode::from_u16(*status)
                .map(classify_status)
                .unwrap_or(RetryDisposition::NonRetryable),
        }
    }
}

/// Single-attempt GET client; callers decide about retries.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout);

        if let Some(user_agent) = &config.user_agent {
            builder = builder.user_agent(user_agent.clone());
        }

        let client = builder.build().context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_bytes(
        &self,
        url: &str,
        query: &[(&str, String)],
    ) -> Result<FetchedResponse, FetchError> {
        let span = info_span!("http_fetch", url);
        async {
            let resp = self.client.get(url).query(query).send().await?;
            let status = resp.status();
            let final_url = resp.url().to_string();
            if !status.is_success() {
                return Err(FetchError::HttpStatus {
                    status: status.as_u16(),
                    url: final_url,
                });
            }
            let body = resp.bytes().await?.to_vec();
            Ok(FetchedResponse {
                status,
                final_url,
                body,
            })
        }
        .instrument(span)
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use brp_core::{RawReviewRow, Review};
    use chrono::NaiveDate;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tempfile::tempdir;

    fn review(id: &str, text: &str) -> Review {
        Review {
            review_id: id.to_string(),
            review_text: text.to_string(),
            rating: 4,
            review_date: NaiveDate::from_ymd_opt(2024, 5, 1),
            user_name: "Abebe".to_string(),
            thumbs_up: 0,
            reply_content: None,
            bank_code: "CBE".to_string(),
            bank_name: "Commercial Bank of Ethiopia".to_string(),
            app_version: "5.1.0".to_string(),
            source: "Google Play".to_string(),
        }
    }

    #[test]
    fn content_hashing_is_stable() {
        let hash = FlatFileStore::sha256_hex(b"hello world");
        assert_eq!(
            hash,
            "b94d27b9934d3e08a52e52d7da7dabfac484efe37a5380ee9088f7ace2efcde9"
        );
    }

    #[test]
    fn empty_snapshots_still_carry_the_header() {
        let bytes = FlatFileStore::encode_records::<RawReviewRow>(&[]).unwrap();
        let text = String::from_utf8(bytes).unwrap();
        assert_eq!(
            text.trim_end(),
            "review_id,review_text,rating,review_date,user_name,thumbs_up,reply_content,bank_code,bank_name,app_version,source"
        );
    }

    #[test]
    fn text_with_commas_and_quotes_is_escaped() {
        let rows = vec![review("r1", "slow, \"very\" slow\nreally")];
        let bytes = FlatFileStore::encode_records(&rows).unwrap();
        let decoded: Vec<Review> = FlatFileStore::decode_records(&bytes).unwrap();
        assert_eq!(decoded, rows);
    }

    #[tokio::test]
    async fn writes_replace_previous_snapshot_atomically() {
        let dir = tempdir().expect("tempdir");
        let store = FlatFileStore::new(dir.path());

        let first = store
            .write_records("out/reviews.csv", &[review("r1", "one"), review("r2", "two")])
            .await
            .expect("first write");
        let second = store
            .write_records("out/reviews.csv", &[review("r3", "three")])
            .await
            .expect("second write");

        assert_eq!(first.path, second.path);
        assert_ne!(first.content_hash, second.content_hash);
        assert_eq!(second.rows, 1);

        let back: Vec<Review> = store.read_records("out/reviews.csv").await.unwrap();
        assert_eq!(back, vec![review("r3", "three")]);

        let leftovers = std::fs::read_dir(dir.path().join("out"))
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().ends_with(".tmp"))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[tokio::test]
    async fn exists_reports_missing_files() {
        let dir = tempdir().expect("tempdir");
        let store = FlatFileStore::new(dir.path());
        assert!(!store.exists("nope.csv").await.unwrap());
    }

    #[tokio::test]
    async fn retry_stops_after_max_attempts() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        };
        let calls = AtomicUsize::new(0);
        let result: Result<(), String> = policy
            .run(
                "always-fails",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err("boom".to_string()) }
                },
                |_| RetryDisposition::Retryable,
            )
            .await;
        assert!(result.is_err());
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn retry_returns_first_success() {
        let policy = RetryPolicy {
            max_attempts: 5,
            delay: Duration::ZERO,
        };
        let calls = AtomicUsize::new(0);
        let result: Result<usize, String> = policy
            .run(
                "flaky",
                || {
                    let n = calls.fetch_add(1, Ordering::SeqCst) + 1;
                    async move {
                        if n < 2 {
                            Err(format!("attempt {n}"))
                        } else {
                            Ok(n)
                        }
                    }
                },
                |_| RetryDisposition::Retryable,
            )
            .await;
        assert_eq!(result, Ok(2));
    }

    #[tokio::test]
    async fn non_retryable_errors_are_not_retried() {
        let policy = RetryPolicy {
            max_attempts: 3,
            delay: Duration::ZERO,
        };
        let calls = AtomicUsize::new(0);
        let _ = policy
            .run(
                "not-found",
                || {
                    calls.fetch_add(1, Ordering::SeqCst);
                    async { Err::<(), _>("404".to_string()) }
                },
                |_| RetryDisposition::NonRetryable,
            )
            .await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn server_errors_and_throttling_are_retryable() {
        assert_eq!(
            classify_status(StatusCode::BAD_GATEWAY),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::TOO_MANY_REQUESTS),
            RetryDisposition::Retryable
        );
        assert_eq!(
            classify_status(StatusCode::NOT_FOUND),
            RetryDisposition::NonRetryable
        );
    }
}
