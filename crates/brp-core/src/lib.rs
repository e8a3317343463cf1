//! Core review model shared by every pipeline stage.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};

pub const CRATE_NAME: &str = "brp-core";

pub const DEFAULT_SOURCE: &str = "Google Play";
pub const UNKNOWN_BANK: &str = "Unknown";
pub const FALLBACK_THEME: &str = "Other";

pub const POSITIVE_THRESHOLD: f64 = 0.05;
pub const NEGATIVE_THRESHOLD: f64 = -0.05;

/// Column contract for a record persisted as a flat file.
///
/// The header is written from `COLUMNS` even when a snapshot has no rows, so
/// downstream stages always see the same shape.
pub trait FlatRecord {
    const COLUMNS: &'static [&'static str];
}

/// Review record as reported by the upstream review source.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct RawReview {
    pub review_id: Option<String>,
    pub content: Option<String>,
    #[serde(deserialize_with = "lenient_int::deserialize")]
    pub score: Option<i64>,
    pub at: Option<String>,
    pub user_name: Option<String>,
    #[serde(deserialize_with = "lenient_int::deserialize")]
    pub thumbs_up_count: Option<i64>,
    pub reply_content: Option<String>,
    pub review_created_version: Option<String>,
}

/// Store listing metadata for one application.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AppMetadata {
    pub title: Option<String>,
    pub score: Option<f64>,
    pub ratings: Option<i64>,
    pub reviews: Option<i64>,
    pub installs: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AppInfoRow {
    pub app_id: String,
    pub title: Option<String>,
    pub score: Option<f64>,
    pub ratings: Option<i64>,
    pub reviews: Option<i64>,
    pub installs: Option<String>,
    pub bank_code: String,
    pub bank_name: String,
}

impl AppInfoRow {
    pub fn from_metadata(
        app_id: &str,
        bank_code: &str,
        bank_name: &str,
        metadata: AppMetadata,
    ) -> Self {
        Self {
            app_id: app_id.to_string(),
            title: metadata.title,
            score: metadata.score,
            ratings: metadata.ratings,
            reviews: metadata.reviews,
            installs: metadata.installs,
            bank_code: bank_code.to_string(),
            bank_name: bank_name.to_string(),
        }
    }
}

impl FlatRecord for AppInfoRow {
    const COLUMNS: &'static [&'static str] = &[
        "app_id",
        "title",
        "score",
        "ratings",
        "reviews",
        "installs",
        "bank_code",
        "bank_name",
    ];
}

/// Normalized review as written by ingestion, before cleaning.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawReviewRow {
    pub review_id: String,
    pub review_text: String,
    pub rating: i64,
    #[serde(with = "opt_timestamp")]
    pub review_date: Option<NaiveDateTime>,
    pub user_name: String,
    pub thumbs_up: i64,
    pub reply_content: Option<String>,
    pub bank_code: String,
    pub bank_name: String,
    pub app_version: String,
    pub source: String,
}

const REVIEW_COLUMNS: &[&str] = &[
    "review_id",
    "review_text",
    "rating",
    "review_date",
    "user_name",
    "thumbs_up",
    "reply_content",
    "bank_code",
    "bank_name",
    "app_version",
    "source",
];

impl FlatRecord for RawReviewRow {
    const COLUMNS: &'static [&'static str] = REVIEW_COLUMNS;
}

/// Cleaned review: deduplicated, defaults filled, date normalized.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Review {
    pub review_id: String,
    pub review_text: String,
    pub rating: i64,
    pub review_date: Option<NaiveDate>,
    pub user_name: String,
    pub thumbs_up: i64,
    pub reply_content: Option<String>,
    pub bank_code: String,
    pub bank_name: String,
    pub app_version: String,
    pub source: String,
}

impl FlatRecord for Review {
    const COLUMNS: &'static [&'static str] = REVIEW_COLUMNS;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SentimentLabel {
    Positive,
    Negative,
    Neutral,
}

impl SentimentLabel {
    pub fn from_score(score: f64) -> Self {
        if score >= POSITIVE_THRESHOLD {
            Self::Positive
        } else if score <= NEGATIVE_THRESHOLD {
            Self::Negative
        } else {
            Self::Neutral
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Positive => "positive",
            Self::Negative => "negative",
            Self::Neutral => "neutral",
        }
    }
}

impl std::fmt::Display for SentimentLabel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Compound score and its label. Only constructed through `from_score` so the
/// two never disagree.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Sentiment {
    score: f64,
    label: SentimentLabel,
}

impl Sentiment {
    pub fn from_score(score: f64) -> Self {
        let score = score.clamp(-1.0, 1.0);
        Self {
            score,
            label: SentimentLabel::from_score(score),
        }
    }

    pub fn score(&self) -> f64 {
        self.score
    }

    pub fn label(&self) -> SentimentLabel {
        self.label
    }
}

/// Cleaned review plus sentiment and theme.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnrichedReview {
    pub review_id: String,
    pub review_text: String,
    pub rating: i64,
    pub review_date: Option<NaiveDate>,
    pub user_name: String,
    pub thumbs_up: i64,
    pub reply_content: Option<String>,
    pub bank_code: String,
    pub bank_name: String,
    pub app_version: String,
    pub source: String,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub identified_theme: String,
}

impl EnrichedReview {
    pub fn new(review: Review, sentiment: Sentiment, identified_theme: String) -> Self {
        Self {
            review_id: review.review_id,
            review_text: review.review_text,
            rating: review.rating,
            review_date: review.review_date,
            user_name: review.user_name,
            thumbs_up: review.thumbs_up,
            reply_content: review.reply_content,
            bank_code: review.bank_code,
            bank_name: review.bank_name,
            app_version: review.app_version,
            source: review.source,
            sentiment_score: sentiment.score(),
            sentiment_label: sentiment.label(),
            identified_theme,
        }
    }
}

impl FlatRecord for EnrichedReview {
    const COLUMNS: &'static [&'static str] = &[
        "review_id",
        "review_text",
        "rating",
        "review_date",
        "user_name",
        "thumbs_up",
        "reply_content",
        "bank_code",
        "bank_name",
        "app_version",
        "source",
        "sentiment_score",
        "sentiment_label",
        "identified_theme",
    ];
}

/// Bank application row keyed by the load-time numeric id.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BankApp {
    pub app_id: i64,
    pub bank_name: String,
}

/// Review row as persisted in the `reviews` table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReviewRecord {
    pub review_id: String,
    pub app_id: i64,
    pub review_text: String,
    pub rating: i64,
    pub review_date: Option<NaiveDate>,
    pub user_name: String,
    pub thumbs_up: i64,
    pub reply_content: Option<String>,
    pub bank_code: String,
    pub source: String,
    pub sentiment_score: f64,
    pub sentiment_label: SentimentLabel,
    pub identified_theme: String,
}

impl ReviewRecord {
    pub fn from_enriched(review: &EnrichedReview, app_id: i64) -> Self {
        Self {
            review_id: review.review_id.clone(),
            app_id,
            review_text: review.review_text.clone(),
            rating: review.rating,
            review_date: review.review_date,
            user_name: review.user_name.clone(),
            thumbs_up: review.thumbs_up,
            reply_content: review.reply_content.clone(),
            bank_code: review.bank_code.clone(),
            source: review.source.clone(),
            sentiment_score: review.sentiment_score,
            sentiment_label: review.sentiment_label,
            identified_theme: review.identified_theme.clone(),
        }
    }
}

pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

const NAIVE_TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y-%m-%d %H:%M",
    "%Y-%m-%dT%H:%M",
];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// Permissive timestamp parse. Offsets are converted to UTC and dropped;
/// bare dates resolve to midnight. Returns `None` for anything unrecognized.
pub fn parse_timestamp(input: &str) -> Option<NaiveDateTime> {
    let input = input.trim();
    if input.is_empty() {
        return None;
    }
    if let Ok(ts) = DateTime::parse_from_rfc3339(input) {
        return Some(ts.naive_utc());
    }
    if let Ok(ts) = DateTime::parse_from_str(input, "%Y-%m-%d %H:%M:%S%.f%:z") {
        return Some(ts.naive_utc());
    }
    for fmt in NAIVE_TIMESTAMP_FORMATS {
        if let Ok(ts) = NaiveDateTime::parse_from_str(input, fmt) {
            return Some(ts);
        }
    }
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(input, fmt).ok())
        .and_then(|d| d.and_hms_opt(0, 0, 0))
}

pub fn parse_date(input: &str) -> Option<NaiveDate> {
    parse_timestamp(input).map(|ts| ts.date())
}

/// `Option<NaiveDateTime>` as `YYYY-MM-DD HH:MM:SS`, empty when absent.
pub mod opt_timestamp {
    use chrono::NaiveDateTime;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(
        value: &Option<NaiveDateTime>,
        serializer: S,
    ) -> Result<S::Ok, S::Error> {
        match value {
            Some(ts) => serializer.serialize_str(&ts.format(super::TIMESTAMP_FORMAT).to_string()),
            None => serializer.serialize_none(),
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<NaiveDateTime>, D::Error> {
        let text: Option<String> = Option::deserialize(deserializer)?;
        Ok(text.as_deref().and_then(super::parse_timestamp))
    }
}

/// Integer field that also accepts floats and numeric strings, truncated
/// toward zero. Anything else decodes as `None` instead of failing the record.
pub mod lenient_int {
    use serde::de::IgnoredAny;
    use serde::{Deserialize, Deserializer};

    #[derive(Deserialize)]
    #[serde(untagged)]
    enum LooseNumber {
        Int(i64),
        Float(f64),
        Text(String),
        Other(IgnoredAny),
    }

    fn truncate(value: f64) -> Option<i64> {
        // the `as` cast saturates; out-of-range values are rejected instead
        (value.is_finite() && value.abs() < i64::MAX as f64).then(|| value.trunc() as i64)
    }

    impl LooseNumber {
        fn into_i64(self) -> Option<i64> {
            match self {
                Self::Int(n) => Some(n),
                Self::Float(f) => truncate(f),
                Self::Text(text) => {
                    let text = text.trim();
                    text.parse::<i64>()
                        .ok()
                        .or_else(|| text.parse::<f64>().ok().and_then(truncate))
                }
                Self::Other(_) => None,
            }
        }
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(
        deserializer: D,
    ) -> Result<Option<i64>, D::Error> {
        Ok(Option::<LooseNumber>::deserialize(deserializer)?.and_then(LooseNumber::into_i64))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn label_thresholds_are_inclusive_at_the_boundaries() {
        assert_eq!(SentimentLabel::from_score(0.05), SentimentLabel::Positive);
        assert_eq!(SentimentLabel::from_score(-0.05), SentimentLabel::Negative);
        assert_eq!(SentimentLabel::from_score(0.0499), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(-0.0499), SentimentLabel::Neutral);
        assert_eq!(SentimentLabel::from_score(0.0), SentimentLabel::Neutral);
    }

    #[test]
    fn sentiment_keeps_score_and_label_together() {
        let s = Sentiment::from_score(1.7);
        assert_eq!(s.score(), 1.0);
        assert_eq!(s.label(), SentimentLabel::Positive);
    }

    #[test]
    fn timestamps_parse_permissively() {
        let expected = NaiveDate::from_ymd_opt(2024, 3, 9)
            .unwrap()
            .and_hms_opt(14, 5, 0)
            .unwrap();
        assert_eq!(parse_timestamp("2024-03-09 14:05:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09T14:05:00.000"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09T16:05:00+02:00"), Some(expected));
        assert_eq!(parse_timestamp("2024-03-09T14:05:00Z"), Some(expected));
        assert_eq!(
            parse_date("03/09/2024"),
            NaiveDate::from_ymd_opt(2024, 3, 9)
        );
        assert_eq!(parse_timestamp("not a date"), None);
        assert_eq!(parse_timestamp("   "), None);
    }

    #[test]
    fn raw_reviews_accept_upstream_camel_case() {
        let raw: RawReview = serde_json::from_str(
            r#"{"reviewId":"gp:1","content":"ok","score":4,"thumbsUpCount":2,"extra":true}"#,
        )
        .unwrap();
        assert_eq!(raw.review_id.as_deref(), Some("gp:1"));
        assert_eq!(raw.score, Some(4));
        assert_eq!(raw.thumbs_up_count, Some(2));
        assert!(raw.reply_content.is_none());
    }

    #[test]
    fn numeric_fields_tolerate_floats_strings_and_junk() {
        let raw: Vec<RawReview> = serde_json::from_str(
            r#"[
                {"reviewId":"a","score":5,"thumbsUpCount":0},
                {"reviewId":"b","score":4.0,"thumbsUpCount":12.7},
                {"reviewId":"c","score":" 3 ","thumbsUpCount":"2.0"},
                {"reviewId":"d","score":true,"thumbsUpCount":{"n":1}},
                {"reviewId":"e","score":null}
            ]"#,
        )
        .unwrap();
        let scores: Vec<_> = raw.iter().map(|r| r.score).collect();
        assert_eq!(scores, vec![Some(5), Some(4), Some(3), None, None]);
        let thumbs: Vec<_> = raw.iter().map(|r| r.thumbs_up_count).collect();
        assert_eq!(thumbs, vec![Some(0), Some(12), Some(2), None, None]);
    }

    #[test]
    fn sentiment_label_serializes_lowercase() {
        let json = serde_json::to_string(&SentimentLabel::Negative).unwrap();
        assert_eq!(json, "\"negative\"");
    }
}
