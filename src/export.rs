// 🧾 Transaction Export - One row per wallet transaction
//
// Rows carry the signed net value, the running wallet balance and the fee
// the wallet paid. `net` leaves the fee out while `cumulative` includes it,
// so the balance reconciler can recover fees as a residual and check them
// against the per-transaction fee.

use crate::flows::DateWindow;
use crate::ledger::{Address, Amount, Transaction, WalletAddressSet};
use crate::prices::{fiat_value, MissingQuote, PriceSource};
use crate::reconciliation::BalanceReport;
use crate::tags::TagMap;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::io::Write;

// ============================================================================
// EXPORT ROW
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Direction {
    /// Funds arriving from outside
    In,

    /// Spent by the wallet
    Out,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::In => "in",
            Direction::Out => "out",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FiatValue {
    pub value: f64,
    pub cumulative: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExportRow {
    pub timestamp: Option<DateTime<Utc>>,

    /// Calendar year the row is booked in
    pub year: i32,

    pub txid: String,
    pub direction: Direction,

    /// Signed value moved, excluding the fee the wallet paid
    pub net: Amount,

    /// Wallet balance after this transaction
    pub cumulative: Amount,

    /// Fee paid by the wallet (wallet-originated transactions only)
    pub fee: Option<Amount>,

    pub in_names: BTreeSet<String>,
    pub out_names: BTreeSet<String>,
    pub in_addresses: BTreeSet<Address>,
    pub out_addresses: BTreeSet<Address>,

    pub fiat: Option<FiatValue>,
}

impl ExportRow {
    /// Bare row with no counterparty detail
    pub fn new(txid: impl Into<String>, year: i32, net: Amount, cumulative: Amount) -> Self {
        ExportRow {
            timestamp: None,
            year,
            txid: txid.into(),
            direction: if net < 0 { Direction::Out } else { Direction::In },
            net,
            cumulative,
            fee: None,
            in_names: BTreeSet::new(),
            out_names: BTreeSet::new(),
            in_addresses: BTreeSet::new(),
            out_addresses: BTreeSet::new(),
            fiat: None,
        }
    }

    /// Builder pattern: attach the independently known fee
    pub fn with_fee(mut self, fee: Amount) -> Self {
        self.fee = Some(fee);
        self
    }

    pub fn value_in(&self) -> Amount {
        self.net.max(0)
    }

    pub fn value_out(&self) -> Amount {
        (-self.net).max(0)
    }
}

// ============================================================================
// ROW BUILDER
// ============================================================================

pub struct RowBuilder<'a> {
    wallet: &'a WalletAddressSet,
    tags: &'a TagMap,
    window: DateWindow,

    /// Year for untimestamped transactions seen before any dated one
    pending_year: i32,

    prices: Option<&'a dyn PriceSource>,
    missing_quote: MissingQuote,
    decimals: u32,
}

impl<'a> RowBuilder<'a> {
    pub fn new(wallet: &'a WalletAddressSet, tags: &'a TagMap, pending_year: i32) -> Self {
        RowBuilder {
            wallet,
            tags,
            window: DateWindow::all(),
            pending_year,
            prices: None,
            missing_quote: MissingQuote::default(),
            decimals: 8,
        }
    }

    pub fn with_window(mut self, window: DateWindow) -> Self {
        self.window = window;
        self
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

    /// One row per transaction touching the wallet, in ledger order.
    ///
    /// The running balance counts every transaction, including those outside
    /// the window; only the emitted rows are filtered.
    pub fn build_rows(&self, transactions: &[Transaction]) -> Vec<ExportRow> {
        let mut rows = Vec::new();
        let mut cumulative: Amount = 0;
        let mut current_year: Option<i32> = None;

        for tx in transactions {
            let touches_wallet = tx.inputs.iter().any(|i| self.wallet.contains(&i.address))
                || tx.outputs.iter().any(|o| self.wallet.contains(&o.address));
            if !touches_wallet {
                continue;
            }

            let year = tx.year().or(current_year).unwrap_or(self.pending_year);
            current_year = Some(year);

            let delta = tx.balance_delta(self.wallet);
            cumulative += delta;

            if !self.window.contains(tx) {
                continue;
            }

            rows.push(self.build_row(tx, year, delta, cumulative));
        }

        tracing::debug!(rows = rows.len(), balance = cumulative, "export rows built");
        rows
    }

    fn build_row(&self, tx: &Transaction, year: i32, delta: Amount, cumulative: Amount) -> ExportRow {
        let originated = tx.is_wallet_originated(self.wallet);
        let fee = if originated { tx.fee() } else { None };
        let net = delta + fee.unwrap_or(0);

        let label = |address: &Address| self.tags.resolve(address, self.wallet).label().to_string();

        let fiat = self.prices.and_then(|prices| {
            let rate = match tx.timestamp {
                Some(ts) => self.missing_quote.resolve(prices.price_on(ts.date_naive())),
                None => self.missing_quote.fallback(),
            }?;
            Some(FiatValue {
                value: fiat_value(rate, net, self.decimals),
                cumulative: fiat_value(rate, cumulative, self.decimals),
            })
        });

        ExportRow {
            timestamp: tx.timestamp,
            year,
            txid: tx.txid.clone(),
            direction: if originated { Direction::Out } else { Direction::In },
            net,
            cumulative,
            fee,
            in_names: tx.inputs.iter().map(|i| label(&i.address)).collect(),
            out_names: tx.outputs.iter().map(|o| label(&o.address)).collect(),
            in_addresses: tx.inputs.iter().map(|i| i.address.clone()).collect(),
            out_addresses: tx.outputs.iter().map(|o| o.address.clone()).collect(),
            fiat,
        }
    }
}

// ============================================================================
// CSV OUTPUT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CsvFormat {
    pub delimiter: u8,

    /// Joins address and name lists inside one cell
    pub list_separator: String,

    pub decimals: u32,
}

impl Default for CsvFormat {
    fn default() -> Self {
        CsvFormat {
            delimiter: b';',
            list_separator: ",".to_string(),
            decimals: 8,
        }
    }
}

pub const ROW_COLUMNS: [&str; 13] = [
    "transaction_date",
    "txid",
    "in/out",
    "value_in",
    "value_out",
    "fee",
    "value_cumulative",
    "value_fiat",
    "value_cumulative_fiat",
    "in_name",
    "out_name",
    "in_addresses",
    "out_addresses",
];

pub const YEAR_COLUMNS: [&str; 7] = [
    "year",
    "total_in",
    "total_out",
    "fee",
    "closing_balance",
    "transactions",
    "closing_value_fiat",
];

/// Exact decimal rendering of an integer amount (no float rounding)
pub fn format_amount(amount: Amount, decimals: u32) -> String {
    if decimals == 0 {
        return amount.to_string();
    }
    let scale = decimals as usize;
    let digits = format!("{:0>width$}", amount.unsigned_abs(), width = scale + 1);
    let (whole, fraction) = digits.split_at(digits.len() - scale);
    let sign = if amount < 0 { "-" } else { "" };
    format!("{}{}.{}", sign, whole, fraction)
}

fn join<I, S>(items: I, separator: &str) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    items
        .into_iter()
        .map(|s| s.as_ref().to_string())
        .collect::<Vec<_>>()
        .join(separator)
}

pub fn write_rows_csv<W: Write>(rows: &[ExportRow], writer: W, format: &CsvFormat) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(format.delimiter)
        .from_writer(writer);

    wtr.write_record(ROW_COLUMNS)?;

    for row in rows {
        let date = row
            .timestamp
            .map(|ts| ts.format("%Y-%m-%d %H:%M:%S").to_string())
            .unwrap_or_default();
        let fee = row
            .fee
            .map(|fee| format_amount(fee, format.decimals))
            .unwrap_or_default();
        let (fiat, fiat_cumulative) = match row.fiat {
            Some(f) => (format!("{:.2}", f.value), format!("{:.2}", f.cumulative)),
            None => (String::new(), String::new()),
        };

        wtr.write_record([
            date,
            row.txid.clone(),
            row.direction.as_str().to_string(),
            format_amount(row.value_in(), format.decimals),
            format_amount(row.value_out(), format.decimals),
            fee,
            format_amount(row.cumulative, format.decimals),
            fiat,
            fiat_cumulative,
            join(&row.in_names, &format.list_separator),
            join(&row.out_names, &format.list_separator),
            join(row.in_addresses.iter().map(Address::as_str), &format.list_separator),
            join(row.out_addresses.iter().map(Address::as_str), &format.list_separator),
        ])
        .with_context(|| format!("Failed to write row for {}", row.txid))?;
    }

    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}

pub fn write_year_totals_csv<W: Write>(report: &BalanceReport, writer: W, format: &CsvFormat) -> Result<()> {
    let mut wtr = csv::WriterBuilder::new()
        .delimiter(format.delimiter)
        .from_writer(writer);

    wtr.write_record(YEAR_COLUMNS)?;

    for totals in &report.years {
        wtr.write_record([
            totals.year.to_string(),
            format_amount(totals.total_in, format.decimals),
            format_amount(totals.total_out, format.decimals),
            format_amount(totals.fee, format.decimals),
            format_amount(totals.closing_balance, format.decimals),
            totals.transaction_count.to_string(),
            totals
                .closing_value_fiat
                .map(|v| format!("{:.2}", v))
                .unwrap_or_default(),
        ])?;
    }

    wtr.flush().context("Failed to flush CSV output")?;
    Ok(())
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::TxRef;
    use crate::prices::PriceHistory;
    use chrono::{NaiveDate, TimeZone};

    fn create_test_wallet() -> WalletAddressSet {
        WalletAddressSet::with_addresses("Test wallet", ["W1", "W2"])
    }

    fn create_test_transaction(txid: &str, year: i32, month: u32) -> Transaction {
        Transaction::new(txid, Some(Utc.with_ymd_and_hms(year, month, 1, 0, 0, 0).unwrap()))
    }

    fn sample_history() -> Vec<Transaction> {
        vec![
            create_test_transaction("fund", 2020, 1)
                .with_input("A", 1_000, TxRef::new("ext", 0))
                .with_output("W1", 900)
                .with_output("A", 95),
            create_test_transaction("noise", 2020, 2)
                .with_input("Q", 5, TxRef::new("ext", 1))
                .with_output("R", 5),
            create_test_transaction("pay", 2021, 3)
                .with_input("W1", 900, TxRef::new("fund", 0))
                .with_output("X", 500)
                .with_output("W2", 390),
        ]
    }

    #[test]
    fn test_rows_net_excludes_fee() {
        let wallet = create_test_wallet();
        let tags = TagMap::from_pairs([("X", "Shop")]);
        let rows = RowBuilder::new(&wallet, &tags, 2021).build_rows(&sample_history());

        // Transactions not touching the wallet are left out
        assert_eq!(rows.len(), 2);

        let fund = &rows[0];
        assert_eq!(fund.direction, Direction::In);
        assert_eq!(fund.net, 900);
        assert_eq!(fund.cumulative, 900);
        assert_eq!(fund.fee, None);
        assert_eq!(fund.year, 2020);

        let pay = &rows[1];
        assert_eq!(pay.direction, Direction::Out);
        assert_eq!(pay.fee, Some(10));
        assert_eq!(pay.net, -500);
        assert_eq!(pay.cumulative, 390);
        assert_eq!(pay.value_out(), 500);
        assert_eq!(pay.value_in(), 0);
        assert!(pay.out_names.contains("Shop"));
        assert!(pay.out_names.contains("Test wallet"));
        assert!(pay.in_names.contains("Test wallet"));

        println!("✅ Export row test passed");
    }

    #[test]
    fn test_window_keeps_running_balance() {
        let wallet = create_test_wallet();
        let tags = TagMap::new();
        let window = DateWindow::from_dates(NaiveDate::from_ymd_opt(2021, 1, 1), None);
        let rows = RowBuilder::new(&wallet, &tags, 2021)
            .with_window(window)
            .build_rows(&sample_history());

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].txid, "pay");
        assert_eq!(rows[0].cumulative, 390);
    }

    #[test]
    fn test_fiat_values() {
        let wallet = create_test_wallet();
        let tags = TagMap::new();
        let mut prices = PriceHistory::new();
        prices.insert(NaiveDate::from_ymd_opt(2020, 1, 1).unwrap(), 2.0);

        let rows = RowBuilder::new(&wallet, &tags, 2021)
            .with_prices(&prices, MissingQuote::Omit)
            .with_decimals(2)
            .build_rows(&sample_history());

        assert_eq!(rows[0].fiat, Some(FiatValue { value: 18.0, cumulative: 18.0 }));
        assert_eq!(rows[1].fiat, None);

        let zeroed = RowBuilder::new(&wallet, &tags, 2021)
            .with_prices(&prices, MissingQuote::Zero)
            .with_decimals(2)
            .build_rows(&sample_history());
        assert_eq!(zeroed[1].fiat, Some(FiatValue { value: 0.0, cumulative: 0.0 }));
    }

    #[test]
    fn test_format_amount_is_exact() {
        assert_eq!(format_amount(12_345, 8), "0.00012345");
        assert_eq!(format_amount(-150_000_000, 8), "-1.50000000");
        assert_eq!(format_amount(0, 2), "0.00");
        assert_eq!(format_amount(42, 0), "42");
        assert_eq!(format_amount(i64::MIN, 8), "-92233720368.54775808");
    }

    #[test]
    fn test_format_amount_beyond_i128_scale() {
        let text = format_amount(-7, 40);
        assert_eq!(text, format!("-0.{}7", "0".repeat(39)));
        assert_eq!(format_amount(i64::MAX, 40), format!("0.{}{}", "0".repeat(21), i64::MAX));

        println!("✅ Wide decimals test passed");
    }

    #[test]
    fn test_write_rows_csv() {
        let wallet = create_test_wallet();
        let tags = TagMap::new();
        let rows = RowBuilder::new(&wallet, &tags, 2021).build_rows(&sample_history());

        let mut out = Vec::new();
        write_rows_csv(&rows, &mut out, &CsvFormat::default()).unwrap();
        let text = String::from_utf8(out).unwrap();
        let lines: Vec<&str> = text.lines().collect();

        assert_eq!(lines.len(), 3);
        assert!(lines[0].starts_with("transaction_date;txid;in/out;value_in"));
        assert!(lines[2].starts_with("2021-03-01 00:00:00;pay;out;0.00000000;0.00000500;0.00000010;0.00000390;;;"));
        assert!(lines[2].ends_with("W1;W2,X"));

        println!("✅ CSV export test passed");
    }
}
