// ⚖️ Balance Reconciler - Year totals, residual fees, closing balances
//
// Per year:
//   fee = (total_in - total_out) - (closing_balance - previous_closing_balance)
//
// The residual must match the fees the export rows carried. Anything left
// over means a row was dropped or a balance is wrong upstream, and is
// reported as a mismatch instead of being booked as fee.

use crate::export::ExportRow;
use crate::ledger::Amount;
use crate::prices::{fiat_value, MissingQuote, PriceSource};
use crate::utxo::UtxoTimeline;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// YEAR TOTALS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct YearTotals {
    pub year: i32,
    pub total_in: Amount,
    pub total_out: Amount,

    /// Residual fee derived from the balance identity
    pub fee: Amount,

    pub closing_balance: Amount,

    /// Sum of the fees the rows of this year carried
    pub expected_fee: Amount,

    pub transaction_count: usize,

    /// Closing balance priced on Dec 31
    pub closing_value_fiat: Option<f64>,
}

impl YearTotals {
    fn carried(year: i32, closing_balance: Amount) -> Self {
        YearTotals {
            year,
            total_in: 0,
            total_out: 0,
            fee: 0,
            closing_balance,
            expected_fee: 0,
            transaction_count: 0,
            closing_value_fiat: None,
        }
    }

    pub fn has_activity(&self) -> bool {
        self.transaction_count > 0
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CumulativePoint {
    pub timestamp: Option<DateTime<Utc>>,
    pub year: i32,
    pub txid: String,
    pub net: Amount,
    pub cumulative: Amount,
}

// ============================================================================
// MISMATCHES
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ReconciliationMismatch {
    /// Residual fee differs from the fees the rows carried
    FeeResidual {
        year: i32,
        residual_fee: Amount,
        expected_fee: Amount,
    },

    /// Closing balance differs from the UTXO snapshot for the same year
    UtxoBalance {
        year: i32,
        closing_balance: Amount,
        utxo_balance: Amount,
    },
}

impl ReconciliationMismatch {
    pub fn year(&self) -> i32 {
        match self {
            ReconciliationMismatch::FeeResidual { year, .. } => *year,
            ReconciliationMismatch::UtxoBalance { year, .. } => *year,
        }
    }

    pub fn difference(&self) -> Amount {
        match self {
            ReconciliationMismatch::FeeResidual {
                residual_fee,
                expected_fee,
                ..
            } => residual_fee - expected_fee,
            ReconciliationMismatch::UtxoBalance {
                closing_balance,
                utxo_balance,
                ..
            } => closing_balance - utxo_balance,
        }
    }
}

// ============================================================================
// BALANCE REPORT
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceReport {
    pub years: Vec<YearTotals>,
    pub cumulative: Vec<CumulativePoint>,
    pub mismatches: Vec<ReconciliationMismatch>,
    pub reconciled_at: DateTime<Utc>,
}

impl BalanceReport {
    pub fn get(&self, year: i32) -> Option<&YearTotals> {
        self.years.iter().find(|t| t.year == year)
    }

    pub fn is_reconciled(&self) -> bool {
        self.mismatches.is_empty()
    }

    pub fn closing_balance(&self) -> Option<Amount> {
        self.years.last().map(|t| t.closing_balance)
    }

    pub fn total_fee(&self) -> Amount {
        self.years.iter().map(|t| t.fee).sum()
    }

    pub fn summary(&self) -> String {
        match (self.years.first(), self.years.last()) {
            (Some(first), Some(last)) => format!(
                "Balances {}-{}: {} transactions, closing {}, fees {}, {} mismatches",
                first.year,
                last.year,
                self.cumulative.len(),
                last.closing_balance,
                self.total_fee(),
                self.mismatches.len()
            ),
            _ => "Balances: no transactions".to_string(),
        }
    }
}

// ============================================================================
// BALANCE RECONCILER
// ============================================================================

pub struct BalanceReconciler<'a> {
    prices: Option<&'a dyn PriceSource>,
    missing_quote: MissingQuote,
    decimals: u32,
}

impl<'a> BalanceReconciler<'a> {
    pub fn new() -> Self {
        BalanceReconciler {
            prices: None,
            missing_quote: MissingQuote::default(),
            decimals: 8,
        }
    }

    pub fn with_prices(mut self, prices: &'a dyn PriceSource, missing_quote: MissingQuote) -> Self {
        self.prices = Some(prices);
        self.missing_quote = missing_quote;
        self
    }

    pub fn with_decimals(mut self, decimals: u32) -> Self {
        self.decimals = decimals;
        self
    }

    /// Fold export rows (ledger order) into per-year totals, from the first
    /// row's year through `through_year`. Years without rows carry the
    /// previous closing balance forward. Rows after `through_year` are
    /// ignored.
    pub fn reconcile(&self, rows: &[ExportRow], through_year: i32) -> BalanceReport {
        let mut by_year: BTreeMap<i32, YearTotals> = BTreeMap::new();
        let mut cumulative = Vec::new();

        for row in rows.iter().filter(|r| r.year <= through_year) {
            let totals = by_year
                .entry(row.year)
                .or_insert_with(|| YearTotals::carried(row.year, 0));

            totals.total_in += row.value_in();
            totals.total_out += row.value_out();
            totals.expected_fee += row.fee.unwrap_or(0);
            totals.closing_balance = row.cumulative;
            totals.transaction_count += 1;

            cumulative.push(CumulativePoint {
                timestamp: row.timestamp,
                year: row.year,
                txid: row.txid.clone(),
                net: row.net,
                cumulative: row.cumulative,
            });
        }

        let mut years = Vec::new();
        let mut mismatches = Vec::new();

        if let Some(&first_year) = by_year.keys().next() {
            let mut previous_closing: Amount = 0;

            for year in first_year..=through_year {
                let mut totals = by_year
                    .remove(&year)
                    .unwrap_or_else(|| YearTotals::carried(year, previous_closing));

                totals.fee = (totals.total_in - totals.total_out)
                    - (totals.closing_balance - previous_closing);

                if totals.fee != totals.expected_fee {
                    tracing::warn!(
                        year,
                        residual_fee = totals.fee,
                        expected_fee = totals.expected_fee,
                        "fee residual does not match transaction fees"
                    );
                    mismatches.push(ReconciliationMismatch::FeeResidual {
                        year,
                        residual_fee: totals.fee,
                        expected_fee: totals.expected_fee,
                    });
                }

                totals.closing_value_fiat = self.closing_value(year, totals.closing_balance);
                previous_closing = totals.closing_balance;
                years.push(totals);
            }
        }

        tracing::info!(
            years = years.len(),
            rows = cumulative.len(),
            mismatches = mismatches.len(),
            "balances reconciled"
        );

        BalanceReport {
            years,
            cumulative,
            mismatches,
            reconciled_at: Utc::now(),
        }
    }

    /// Compare each year's closing balance with the UTXO snapshot of the same
    /// year. Returns the number of mismatches added to the report.
    pub fn cross_check_timeline(&self, report: &mut BalanceReport, timeline: &UtxoTimeline) -> usize {
        let mut found = 0;

        for totals in &report.years {
            let Some(utxo_balance) = timeline.balance(totals.year) else {
                continue;
            };
            if utxo_balance != totals.closing_balance {
                tracing::warn!(
                    year = totals.year,
                    closing_balance = totals.closing_balance,
                    utxo_balance,
                    "closing balance does not match unspent outputs"
                );
                report.mismatches.push(ReconciliationMismatch::UtxoBalance {
                    year: totals.year,
                    closing_balance: totals.closing_balance,
                    utxo_balance,
                });
                found += 1;
            }
        }

        found
    }

    fn closing_value(&self, year: i32, balance: Amount) -> Option<f64> {
        let prices = self.prices?;
        let rate = match NaiveDate::from_ymd_opt(year, 12, 31) {
            Some(day) => self.missing_quote.resolve(prices.price_on(day)),
            None => self.missing_quote.fallback(),
        }?;
        Some(fiat_value(rate, balance, self.decimals))
    }
}

impl Default for BalanceReconciler<'_> {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
