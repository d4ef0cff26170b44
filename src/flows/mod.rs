// 💸 Counterparty Flows - Input and output aggregation
//
// Both aggregators fold transactions into one AggregateEntry per
// counterparty. Entries are built fresh on every call and never shared
// between keys.

pub mod inputs;
pub mod outputs;

pub use inputs::{discover_wallet_addresses, InputAggregator, InputTotals, WalletExpansion};
pub use outputs::{OutputAggregator, OutputTotals};

use crate::ledger::{Address, Amount, Transaction, TxRef};
use crate::tags::CounterpartyKey;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

// ============================================================================
// DATE WINDOW
// ============================================================================

/// Date range filter over `[from, until)`. Transactions without a timestamp
/// always pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DateWindow {
    pub from: Option<DateTime<Utc>>,

    /// Exclusive upper bound
    pub until: Option<DateTime<Utc>>,
}

impl DateWindow {
    /// No bounds at all
    pub fn all() -> Self {
        DateWindow::default()
    }

    pub fn new(from: Option<DateTime<Utc>>, until: Option<DateTime<Utc>>) -> Self {
        DateWindow { from, until }
    }

    /// Whole calendar days, both inclusive: from midnight of `from` up to
    /// (not including) midnight after `to`
    pub fn from_dates(from: Option<NaiveDate>, to: Option<NaiveDate>) -> Self {
        DateWindow {
            from: from.and_then(|d| d.and_hms_opt(0, 0, 0)).map(|dt| dt.and_utc()),
            until: to
                .and_then(|d| d.succ_opt())
                .and_then(|d| d.and_hms_opt(0, 0, 0))
                .map(|dt| dt.and_utc()),
        }
    }

    pub fn contains(&self, tx: &Transaction) -> bool {
        let Some(ts) = tx.timestamp else {
            return true;
        };
        if self.from.map_or(false, |from| ts < from) {
            return false;
        }
        if self.until.map_or(false, |until| ts >= until) {
            return false;
        }
        true
    }

    pub fn is_unbounded(&self) -> bool {
        self.from.is_none() && self.until.is_none()
    }
}

// ============================================================================
// SPEND SET
// ============================================================================

/// All input addresses that funded one wallet-originated transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SpendSet {
    pub txid: String,
    pub addresses: BTreeSet<Address>,
}

impl SpendSet {
    pub fn from_transaction(tx: &Transaction) -> Self {
        SpendSet {
            txid: tx.txid.clone(),
            addresses: tx.inputs.iter().map(|i| i.address.clone()).collect(),
        }
    }
}

// ============================================================================
// AGGREGATE ENTRY
// ============================================================================

/// Running totals for one counterparty
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AggregateEntry {
    pub key: CounterpartyKey,

    /// Net signed amount attributed to this counterparty
    pub net: Amount,

    /// Value landing on wallet addresses in the transactions folded in here
    /// (input totals only)
    pub wallet_subtotal: Amount,

    /// Raw addresses that mapped to this key
    pub addresses: BTreeSet<Address>,

    /// Outputs that contributed (spent outputs for inputs, paid outputs for outputs)
    pub references: Vec<TxRef>,

    /// Funding input sets, one per contributing transaction (outputs only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub spend_sets: Vec<SpendSet>,
}

impl AggregateEntry {
    pub fn new(key: CounterpartyKey) -> Self {
        AggregateEntry {
            key,
            net: 0,
            wallet_subtotal: 0,
            addresses: BTreeSet::new(),
            references: Vec::new(),
            spend_sets: Vec::new(),
        }
    }

    /// Distinct transaction ids among the references
    pub fn transaction_count(&self) -> usize {
        self.references
            .iter()
            .map(|r| r.txid.as_str())
            .collect::<BTreeSet<_>>()
            .len()
    }
}

// ============================================================================
// TESTS
// ============================================================================
