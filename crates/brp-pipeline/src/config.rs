//! YAML-backed pipeline configuration with environment overrides.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context;
use brp_adapters::Locale;
use brp_storage::RetryPolicy;
use serde::Deserialize;
use serde_yaml::{Mapping, Value};
use sqlx::postgres::PgConnectOptions;

use crate::error::PipelineError;

const DEFAULT_CLEANED_FOLDER: &str = "data/cleaned";
const DEFAULT_ENRICHED_PATH: &str = "data/outputs/review_sentiment_themes.csv";

#[derive(Debug, Clone, Deserialize)]
struct ScraperConfigFile {
    app_ids: Mapping,
    #[serde(default)]
    bank_names: Mapping,
    #[serde(default = "default_reviews_per_bank")]
    reviews_per_bank: usize,
    #[serde(default = "default_lang")]
    lang: String,
    #[serde(default = "default_country")]
    country: String,
    #[serde(default = "default_max_retries")]
    max_retries: usize,
    #[serde(default = "default_retry_delay_secs")]
    retry_delay_secs: u64,
    #[serde(default = "default_pause_secs")]
    pause_secs: u64,
    #[serde(default)]
    source_url: Option<String>,
    #[serde(default)]
    data_paths: BTreeMap<String, PathBuf>,
}

fn default_reviews_per_bank() -> usize {
    400
}

fn default_lang() -> String {
    "en".to_string()
}

fn default_country() -> String {
    "us".to_string()
}

fn default_max_retries() -> usize {
    3
}

fn default_retry_delay_secs() -> u64 {
    3
}

fn default_pause_secs() -> u64 {
    2
}

/// One configured bank application, in declaration order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BankTarget {
    pub code: String,
    pub app_id: String,
    pub name: String,
}

/// Named output locations from `data_paths`.
#[derive(Debug, Clone, Default)]
pub struct DataPaths {
    named: BTreeMap<String, PathBuf>,
}

impl DataPaths {
    pub fn new(named: BTreeMap<String, PathBuf>) -> Self {
        Self { named }
    }

    pub fn get(&self, key: &str) -> Option<&Path> {
        self.named.get(key).map(PathBuf::as_path)
    }

    pub fn require(&self, key: &str) -> Result<&Path, PipelineError> {
        self.get(key)
            .ok_or_else(|| PipelineError::MissingDataPath(key.to_string()))
    }

    pub fn app_info(&self) -> Option<&Path> {
        self.get("app_info")
    }

    pub fn all_raw(&self) -> Result<&Path, PipelineError> {
        self.require("all_raw")
    }

    pub fn bank_raw(&self, bank_code: &str) -> Option<&Path> {
        self.get(&format!("{}_raw", bank_code.to_lowercase()))
    }

    pub fn cleaned_folder(&self) -> PathBuf {
        self.get("cleaned_folder")
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_CLEANED_FOLDER))
    }

    pub fn enriched(&self) -> PathBuf {
        self.get("enriched")
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_ENRICHED_PATH))
    }
}

#[derive(Debug, Clone)]
pub struct PipelineConfig {
    pub banks: Vec<BankTarget>,
    pub reviews_per_bank: usize,
    pub locale: Locale,
    pub retry: RetryPolicy,
    pub pause: Duration,
    pub source_url: String,
    pub data_paths: DataPaths,
    pub workspace_root: PathBuf,
}

impl PipelineConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        let mut config =
            Self::from_yaml_str(&text).with_context(|| format!("parsing {}", path.display()))?;
        if let Ok(url) = std::env::var("BRP_SOURCE_URL") {
            config.source_url = url;
        }
        Ok(config)
    }

    pub fn from_yaml_str(text: &str) -> anyhow::Result<Self> {
        let file: ScraperConfigFile = serde_yaml::from_str(text)?;
        let bank_names = string_pairs("bank_names", &file.bank_names)?
            .into_iter()
            .collect::<BTreeMap<_, _>>();

        let banks = string_pairs("app_ids", &file.app_ids)?
            .into_iter()
            .map(|(code, app_id)| BankTarget {
                name: bank_names.get(&code).cloned().unwrap_or_else(|| code.clone()),
                code,
                app_id,
            })
            .collect::<Vec<_>>();
        if banks.is_empty() {
            return Err(PipelineError::InvalidConfig("app_ids is empty".to_string()).into());
        }

        Ok(Self {
            banks,
            reviews_per_bank: file.reviews_per_bank,
            locale: Locale {
                lang: file.lang,
                country: file.country,
            },
            retry: RetryPolicy {
                max_attempts: file.max_retries,
                delay: Duration::from_secs(file.retry_delay_secs),
            },
            pause: Duration::from_secs(file.pause_secs),
            source_url: file
                .source_url
                .unwrap_or_else(|| "http://localhost:3000".to_string()),
            data_paths: DataPaths::new(file.data_paths),
            workspace_root: PathBuf::from("."),
        })
    }

    pub fn with_workspace_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.workspace_root = root.into();
        self
    }

    /// Raw inputs for cleaning: the combined file first, then each bank's file.
    pub fn clean_inputs(&self) -> anyhow::Result<Vec<PathBuf>> {
        let mut inputs = vec![self.data_paths.all_raw()?.to_path_buf()];
        inputs.extend(
            self.banks
                .iter()
                .filter_map(|bank| self.data_paths.bank_raw(&bank.code))
                .map(Path::to_path_buf),
        );
        Ok(inputs)
    }

    pub fn cleaned_path_for(&self, raw_path: &Path) -> PathBuf {
        let file_name = raw_path
            .file_name()
            .map(|n| n.to_string_lossy().replace("_raw", "_cleaned"))
            .unwrap_or_else(|| "cleaned.csv".to_string());
        self.data_paths.cleaned_folder().join(file_name)
    }

    pub fn enrich_inputs(&self) -> anyhow::Result<Vec<PathBuf>> {
        Ok(self
            .clean_inputs()?
            .iter()
            .map(|raw| self.cleaned_path_for(raw))
            .collect())
    }
}

fn string_pairs(section: &str, mapping: &Mapping) -> Result<Vec<(String, String)>, PipelineError> {
    mapping
        .iter()
        .map(|(key, value)| {
            let key = scalar_to_string(key).ok_or_else(|| {
                PipelineError::InvalidConfig(format!("{section}: non-scalar key {key:?}"))
            })?;
            let value = scalar_to_string(value).ok_or_else(|| {
                PipelineError::InvalidConfig(format!("{section}.{key}: expected a string"))
            })?;
            Ok((key, value))
        })
        .collect()
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_host")]
    pub host: String,
    #[serde(default = "default_db_port")]
    pub port: u16,
    pub database: String,
    pub username: String,
    #[serde(default)]
    pub password: String,
    #[serde(default = "default_db_driver")]
    pub driver: String,
}

fn default_db_host() -> String {
    "localhost".to_string()
}

fn default_db_port() -> u16 {
    5432
}

fn default_db_driver() -> String {
    "postgresql".to_string()
}

impl DatabaseConfig {
    pub fn load(path: impl AsRef<Path>) -> anyhow::Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("reading {}", path.display()))?;
        serde_yaml::from_str(&text).with_context(|| format!("parsing {}", path.display()))
    }

    /// Connection options built field by field, so credentials containing
    /// `@`, `/` or `:` need no escaping.
    pub fn connect_options(&self) -> Result<PgConnectOptions, PipelineError> {
        if !matches!(self.driver.as_str(), "postgresql" | "postgres") {
            return Err(PipelineError::InvalidConfig(format!(
                "unsupported database driver {:?}",
                self.driver
            )));
        }
        Ok(PgConnectOptions::new()
            .host(&self.host)
            .port(self.port)
            .username(&self.username)
            .password(&self.password)
            .database(&self.database))
    }
}

/// `DATABASE_URL` wins over the YAML file.
pub fn database_options(db_config_path: impl AsRef<Path>) -> anyhow::Result<PgConnectOptions> {
    if let Ok(url) = std::env::var("DATABASE_URL") {
        return url
            .parse::<PgConnectOptions>()
            .context("parsing DATABASE_URL");
    }
    Ok(DatabaseConfig::load(db_config_path)?.connect_options()?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"
app_ids:
  DASHEN: com.dashen.dashensuperapp
  CBE: com.combanketh.mobilebanking
  BOA: com.boa.boaMobileBanking
bank_names:
  CBE: Commercial Bank of Ethiopia
  BOA: Bank of Abyssinia
data_paths:
  app_info: data/raw/app_info.csv
  all_raw: data/raw/all_reviews.csv
  cbe_raw: data/raw/cbe_raw.csv
  dashen_raw: data/raw/dashen_raw.csv
"#;

    #[test]
    fn banks_keep_declaration_order_and_fall_back_to_code() {
        let config = PipelineConfig::from_yaml_str(SAMPLE).unwrap();
        let codes: Vec<_> = config.banks.iter().map(|b| b.code.as_str()).collect();
        assert_eq!(codes, vec!["DASHEN", "CBE", "BOA"]);
        assert_eq!(config.banks[0].name, "DASHEN");
        assert_eq!(config.banks[1].name, "Commercial Bank of Ethiopia");
    }

    #[test]
    fn defaults_apply_when_options_are_absent() {
        let config = PipelineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(config.reviews_per_bank, 400);
        assert_eq!(config.retry.max_attempts, 3);
        assert_eq!(config.retry.delay, Duration::from_secs(3));
        assert_eq!(config.pause, Duration::from_secs(2));
        assert_eq!(config.locale, Locale::default());
        assert_eq!(
            config.data_paths.enriched(),
            PathBuf::from("data/outputs/review_sentiment_themes.csv")
        );
    }

    #[test]
    fn stage_inputs_follow_bank_order_and_skip_unconfigured_banks() {
        let config = PipelineConfig::from_yaml_str(SAMPLE).unwrap();
        assert_eq!(
            config.clean_inputs().unwrap(),
            vec![
                PathBuf::from("data/raw/all_reviews.csv"),
                PathBuf::from("data/raw/dashen_raw.csv"),
                PathBuf::from("data/raw/cbe_raw.csv"),
            ]
        );
        assert_eq!(
            config.enrich_inputs().unwrap(),
            vec![
                PathBuf::from("data/cleaned/all_reviews.csv"),
                PathBuf::from("data/cleaned/dashen_cleaned.csv"),
                PathBuf::from("data/cleaned/cbe_cleaned.csv"),
            ]
        );
    }

    #[test]
    fn empty_app_ids_are_rejected() {
        let err = PipelineConfig::from_yaml_str("app_ids: {}\n").unwrap_err();
        assert!(err.to_string().contains("app_ids is empty"));
    }

    #[test]
    fn database_options_are_assembled_from_parts() {
        let db: DatabaseConfig = serde_yaml::from_str(
            "database: fintech_reviews\nusername: postgres\npassword: \"p@ss/w:rd#1\"\n",
        )
        .unwrap();
        let options = db.connect_options().unwrap();
        assert_eq!(options.get_host(), "localhost");
        assert_eq!(options.get_port(), 5432);
        assert_eq!(options.get_username(), "postgres");
        assert_eq!(options.get_database(), Some("fintech_reviews"));
    }

    #[test]
    fn unknown_database_driver_is_rejected() {
        let db: DatabaseConfig = serde_yaml::from_str(
            "database: fintech_reviews\nusername: postgres\ndriver: mysql\n",
        )
        .unwrap();
        let err = db.connect_options().unwrap_err();
        assert!(err.to_string().contains("mysql"));
    }
}
