// ⚙️ Analysis Config - Run settings as data
//
// One JSON file describes an analysis run: where the wallet store lives,
// which years and dates to look at, and how to value and print amounts.
// Every field has a default, so `{}` is a valid config.

use crate::export::CsvFormat;
use crate::flows::DateWindow;
use crate::prices::{MissingQuote, PriceFile};
use anyhow::{bail, Context, Result};
use chrono::{Datelike, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CsvSettings {
    #[serde(default = "default_delimiter")]
    pub delimiter: char,

    #[serde(default = "default_list_separator")]
    pub list_separator: String,
}

impl Default for CsvSettings {
    fn default() -> Self {
        CsvSettings {
            delimiter: default_delimiter(),
            list_separator: default_list_separator(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisConfig {
    /// Counterparty name for the wallet's own addresses
    #[serde(default = "default_wallet_name")]
    pub wallet_name: String,

    #[serde(default = "default_database")]
    pub database: PathBuf,

    /// Last year to snapshot and reconcile (current year when absent)
    #[serde(default)]
    pub through_year: Option<i32>,

    #[serde(default)]
    pub date_from: Option<NaiveDate>,

    #[serde(default)]
    pub date_to: Option<NaiveDate>,

    /// Fractional digits of the smallest unit (8 for satoshis)
    #[serde(default = "default_decimals")]
    pub decimals: u32,

    #[serde(default)]
    pub tags_file: Option<PathBuf>,

    #[serde(default)]
    pub price_files: Vec<PriceFile>,

    #[serde(default)]
    pub missing_quote: MissingQuote,

    #[serde(default)]
    pub csv: CsvSettings,
}

fn default_wallet_name() -> String {
    "This wallet".to_string()
}

fn default_database() -> PathBuf {
    PathBuf::from("wallet.db")
}

fn default_decimals() -> u32 {
    8
}

fn default_delimiter() -> char {
    ';'
}

fn default_list_separator() -> String {
    ",".to_string()
}

impl Default for AnalysisConfig {
    fn default() -> Self {
        AnalysisConfig {
            wallet_name: default_wallet_name(),
            database: default_database(),
            through_year: None,
            date_from: None,
            date_to: None,
            decimals: default_decimals(),
            tags_file: None,
            price_files: Vec::new(),
            missing_quote: MissingQuote::default(),
            csv: CsvSettings::default(),
        }
    }
}

impl AnalysisConfig {
    /// Load config from JSON file
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {:?}", path.as_ref()))?;

        let config: AnalysisConfig =
            serde_json::from_str(&content).context("Failed to parse config JSON")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if let (Some(from), Some(to)) = (self.date_from, self.date_to) {
            if from > to {
                bail!("date_from {} is after date_to {}", from, to);
            }
        }
        if !self.csv.delimiter.is_ascii() {
            bail!("CSV delimiter must be a single ASCII character");
        }
        if self.decimals > 18 {
            bail!("decimals must be at most 18, got {}", self.decimals);
        }
        Ok(())
    }

    pub fn window(&self) -> DateWindow {
        DateWindow::from_dates(self.date_from, self.date_to)
    }

    pub fn resolved_through_year(&self) -> i32 {
        self.through_year.unwrap_or_else(|| Utc::now().year())
    }

    pub fn csv_format(&self) -> CsvFormat {
        CsvFormat {
            delimiter: self.csv.delimiter as u8,
            list_separator: self.csv.list_separator.clone(),
            decimals: self.decimals,
        }
    }
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn write_config(json: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(json.as_bytes()).unwrap();
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let file = write_config("{}");
        let config = AnalysisConfig::from_file(file.path()).unwrap();

        assert_eq!(config, AnalysisConfig::default());
        assert_eq!(config.wallet_name, "This wallet");
        assert_eq!(config.database, PathBuf::from("wallet.db"));
        assert_eq!(config.missing_quote, MissingQuote::Omit);
        assert!(config.window().is_unbounded());
        assert_eq!(config.csv_format(), CsvFormat::default());

        println!("✅ Default config test passed");
    }

    #[test]
    fn test_full_config() {
        let file = write_config(
            r#"{
                "wallet_name": "Cold storage",
                "database": "/tmp/cold.db",
                "through_year": 2023,
                "date_from": "2021-01-01",
                "date_to": "2021-12-31",
                "decimals": 2,
                "tags_file": "tags.csv",
                "price_files": [{"path": "btc.csv", "rate_column": 6}],
                "missing_quote": "zero",
                "csv": {"delimiter": ","}
            }"#,
        );
        let config = AnalysisConfig::from_file(file.path()).unwrap();

        assert_eq!(config.wallet_name, "Cold storage");
        assert_eq!(config.resolved_through_year(), 2023);
        assert_eq!(config.price_files[0].date_column, 0);
        assert_eq!(config.price_files[0].rate_column, 6);
        assert_eq!(config.missing_quote, MissingQuote::Zero);
        assert!(!config.window().is_unbounded());

        let format = config.csv_format();
        assert_eq!(format.delimiter, b',');
        assert_eq!(format.list_separator, ",");
        assert_eq!(format.decimals, 2);
    }

    #[test]
    fn test_inverted_dates_rejected() {
        let file = write_config(r#"{"date_from": "2022-01-01", "date_to": "2021-01-01"}"#);
        assert!(AnalysisConfig::from_file(file.path()).is_err());
    }

    #[test]
    fn test_missing_file_is_error() {
        assert!(AnalysisConfig::from_file("/nonexistent/config.json").is_err());
    }
}
