// 💶 Price History - Daily fiat quotes for valuation
//
// Quotes are read once per run from CSV files and then passed around by
// reference. Later files override earlier ones for the same day, so an old
// archive can be combined with a fresher export.

use crate::error::LookupError;
use anyhow::{Context, Result};
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

// ============================================================================
// PRICE SOURCE
// ============================================================================

/// Anything that can quote a fiat rate for a calendar day
pub trait PriceSource {
    fn price_on(&self, date: NaiveDate) -> Result<f64, LookupError>;
}

/// What to do when a day has no quote
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissingQuote {
    /// Value at zero
    Zero,

    /// Leave the fiat column empty
    #[default]
    Omit,
}

impl MissingQuote {
    /// Apply the policy to a lookup result
    pub fn resolve(&self, quote: Result<f64, LookupError>) -> Option<f64> {
        match quote {
            Ok(rate) => Some(rate),
            Err(err) => {
                tracing::debug!(error = %err, "price lookup failed");
                self.fallback()
            }
        }
    }

    /// Rate to use when there is no quote at all
    pub fn fallback(&self) -> Option<f64> {
        match self {
            MissingQuote::Zero => Some(0.0),
            MissingQuote::Omit => None,
        }
    }
}

/// Fiat value of an integer amount with `decimals` fractional digits
pub fn fiat_value(rate: f64, amount: i64, decimals: u32) -> f64 {
    rate * (amount as f64) / 10f64.powi(decimals as i32)
}

// ============================================================================
// PRICE FILE LAYOUT
// ============================================================================

/// Where the day and the rate live in a headerless or headed CSV file
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PriceFile {
    pub path: PathBuf,

    /// Column holding the day (`YYYY-MM-DD`, optionally followed by a time)
    #[serde(default)]
    pub date_column: usize,

    /// Column holding the rate
    #[serde(default = "default_rate_column")]
    pub rate_column: usize,
}

fn default_rate_column() -> usize {
    1
}

// ============================================================================
// PRICE HISTORY
// ============================================================================

#[derive(Debug, Clone, Default)]
pub struct PriceHistory {
    quotes: BTreeMap<NaiveDate, f64>,
}

impl PriceHistory {
    pub fn new() -> Self {
        PriceHistory::default()
    }

    /// Load and merge every file in order
    pub fn load(files: &[PriceFile]) -> Result<Self> {
        let mut history = PriceHistory::new();
        for file in files {
            let loaded = history.merge_csv(&file.path, file.date_column, file.rate_column)?;
            tracing::info!(path = ?file.path, quotes = loaded, "loaded price history");
        }
        Ok(history)
    }

    /// Read one CSV file into the history, returning the number of quotes read.
    /// Lines whose date or rate does not parse (headers, blanks) are skipped.
    pub fn merge_csv<P: AsRef<Path>>(
        &mut self,
        path: P,
        date_column: usize,
        rate_column: usize,
    ) -> Result<usize> {
        let mut rdr = csv::ReaderBuilder::new()
            .has_headers(false)
            .flexible(true)
            .from_path(path.as_ref())
            .with_context(|| format!("Failed to open price file: {:?}", path.as_ref()))?;

        let mut loaded = 0;
        let mut skipped = 0;

        for (line, result) in rdr.records().enumerate() {
            let record = result
                .with_context(|| format!("Failed to read line {} of {:?}", line + 1, path.as_ref()))?;

            let date = record.get(date_column).and_then(parse_day);
            let rate = record
                .get(rate_column)
                .and_then(|r| r.trim().parse::<f64>().ok());

            match (date, rate) {
                (Some(date), Some(rate)) => {
                    self.quotes.insert(date, rate);
                    loaded += 1;
                }
                _ => skipped += 1,
            }
        }

        if skipped > 0 {
            tracing::debug!(path = ?path.as_ref(), skipped, "skipped unparsable price lines");
        }

        Ok(loaded)
    }

    pub fn insert(&mut self, date: NaiveDate, rate: f64) {
        self.quotes.insert(date, rate);
    }

    pub fn len(&self) -> usize {
        self.quotes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.quotes.is_empty()
    }

    /// First and last quoted day
    pub fn range(&self) -> Option<(NaiveDate, NaiveDate)> {
        let first = self.quotes.keys().next()?;
        let last = self.quotes.keys().next_back()?;
        Some((*first, *last))
    }
}

impl PriceSource for PriceHistory {
    fn price_on(&self, date: NaiveDate) -> Result<f64, LookupError> {
        self.quotes
            .get(&date)
            .copied()
            .ok_or(LookupError::NotFound(date))
    }
}

/// Accepts `2021-03-04` and `2021-03-04 00:00:00`
fn parse_day(field: &str) -> Option<NaiveDate> {
    let field = field.trim();
    let day = field.get(..10).unwrap_or(field);
    NaiveDate::parse_from_str(day, "%Y-%m-%d").ok()
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn day(y: i32, m: u32, d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(y, m, d).unwrap()
    }

    fn write_file(lines: &[&str]) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        for line in lines {
            writeln!(file, "{}", line).unwrap();
        }
        file.flush().unwrap();
        file
    }

    #[test]
    fn test_lookup_and_not_found() {
        let mut history = PriceHistory::new();
        history.insert(day(2021, 1, 1), 24000.5);

        assert_eq!(history.price_on(day(2021, 1, 1)), Ok(24000.5));
        assert_eq!(
            history.price_on(day(2021, 1, 2)),
            Err(LookupError::NotFound(day(2021, 1, 2)))
        );
    }

    #[test]
    fn test_merge_skips_headers_and_later_files_win() {
        let archive = write_file(&[
            "Date,Symbol,Open,High,Low,Close,Average",
            "2020-12-31,BTCEUR,1,1,1,1,23000.0",
            "2021-01-01,BTCEUR,1,1,1,1,24000.0",
        ]);
        let fresh = write_file(&[
            "unix,open,high,low,close,vwap,volume,tradecount,date",
            "1609459200,1,1,1,24100.0,1,1,1,2021-01-01 00:00:00",
            "1609545600,1,1,1,25000.0,1,1,1,2021-01-02 00:00:00",
        ]);

        let history = PriceHistory::load(&[
            PriceFile {
                path: archive.path().to_path_buf(),
                date_column: 0,
                rate_column: 6,
            },
            PriceFile {
                path: fresh.path().to_path_buf(),
                date_column: 8,
                rate_column: 4,
            },
        ])
        .unwrap();

        assert_eq!(history.len(), 3);
        assert_eq!(history.price_on(day(2020, 12, 31)), Ok(23000.0));
        assert_eq!(history.price_on(day(2021, 1, 1)), Ok(24100.0));
        assert_eq!(history.range(), Some((day(2020, 12, 31), day(2021, 1, 2))));

        println!("✅ Price merge test passed");
    }

    #[test]
    fn test_missing_quote_policy() {
        let missing = Err(LookupError::NotFound(day(2021, 1, 1)));
        assert_eq!(MissingQuote::Zero.resolve(missing.clone()), Some(0.0));
        assert_eq!(MissingQuote::Omit.resolve(missing), None);
        assert_eq!(MissingQuote::Omit.resolve(Ok(2.5)), Some(2.5));
    }

    #[test]
    fn test_fiat_value() {
        assert_eq!(fiat_value(20000.0, 150_000_000, 8), 30000.0);
        assert_eq!(fiat_value(10.0, -5, 0), -50.0);
    }

    #[test]
    fn test_missing_file_is_error() {
        let mut history = PriceHistory::new();
        assert!(history.merge_csv("/nonexistent/prices.csv", 0, 1).is_err());
    }
}
