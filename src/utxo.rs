// ⏳ UTXO Timeline - Replay history, snapshot the unspent set per year
//
// One live map {TxRef -> (amount, address)} is replayed in chronological
// order. Each wallet output is created exactly once and destroyed exactly
// once; anything else means the history and the owned-address set disagree.
//
// Snapshots are taken at year boundaries. Years without activity carry the
// last known snapshot forward.

use crate::error::ConsistencyError;
use crate::ledger::{Address, Amount, Transaction, TxRef, WalletAddressSet};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

// ============================================================================
// UTXO ENTRY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoEntry {
    pub amount: Amount,
    pub address: Address,
}

/// Wallet outputs believed unspent at one point in time
pub type UtxoSet = BTreeMap<TxRef, UtxoEntry>;

/// Flat form of one unspent output, for reports
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UtxoRecord {
    pub tx_ref: TxRef,
    pub amount: Amount,
    pub address: Address,
}

// ============================================================================
// TIMELINE
// ============================================================================

/// Year-end snapshots of the wallet's unspent outputs
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UtxoTimeline {
    snapshots: BTreeMap<i32, UtxoSet>,
}

impl UtxoTimeline {
    pub fn get(&self, year: i32) -> Option<&UtxoSet> {
        self.snapshots.get(&year)
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.snapshots.keys().copied()
    }

    pub fn iter(&self) -> impl Iterator<Item = (i32, &UtxoSet)> + '_ {
        self.snapshots.iter().map(|(year, set)| (*year, set))
    }

    /// Sum of unspent amounts at the end of `year`
    pub fn balance(&self, year: i32) -> Option<Amount> {
        self.get(year).map(|set| set.values().map(|e| e.amount).sum())
    }

    pub fn len(&self) -> usize {
        self.snapshots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.snapshots.is_empty()
    }

    /// Snapshots flattened to records, keyed by year
    pub fn to_records(&self) -> BTreeMap<i32, Vec<UtxoRecord>> {
        self.snapshots
            .iter()
            .map(|(year, set)| {
                let records = set
                    .iter()
                    .map(|(tx_ref, entry)| UtxoRecord {
                        tx_ref: tx_ref.clone(),
                        amount: entry.amount,
                        address: entry.address.clone(),
                    })
                    .collect();
                (*year, records)
            })
            .collect()
    }
}

// ============================================================================
// TIMELINE BUILDER
// ============================================================================

pub struct UtxoTimelineBuilder<'a> {
    wallet: &'a WalletAddressSet,

    /// Last year to snapshot; later transactions are not replayed
    through_year: i32,
}

impl<'a> UtxoTimelineBuilder<'a> {
    pub fn new(wallet: &'a WalletAddressSet, through_year: i32) -> Self {
        UtxoTimelineBuilder {
            wallet,
            through_year,
        }
    }

    /// Replay `transactions` (oldest first) and snapshot every year from the
    /// first active year through `through_year`.
    ///
    /// Transactions without a timestamp belong to the year of the
    /// transaction before them.
    pub fn build_timeline(&self, transactions: &[Transaction]) -> Result<UtxoTimeline, ConsistencyError> {
        let mut live = UtxoSet::new();
        let mut snapshots = BTreeMap::new();
        let mut current_year: Option<i32> = None;
        let mut latest: Option<DateTime<Utc>> = None;

        for tx in transactions {
            if let Some(ts) = tx.timestamp {
                if let Some(previous) = latest.filter(|prev| ts < *prev) {
                    return Err(ConsistencyError::OutOfOrder {
                        txid: tx.txid.clone(),
                        timestamp: ts,
                        previous,
                    });
                }
                latest = Some(ts);
            }

            let year = tx
                .year()
                .or(current_year)
                .unwrap_or(self.through_year);

            if year > self.through_year {
                tracing::debug!(txid = %tx.txid, year, "stopping replay past through_year");
                break;
            }

            // Close every year from the previous active one up to this one
            // with the set as it stood before this transaction
            if let Some(previous_year) = current_year {
                for y in previous_year..year {
                    snapshots.insert(y, live.clone());
                }
            }
            current_year = Some(year);

            self.apply(tx, &mut live)?;
        }

        if let Some(last_year) = current_year {
            for y in last_year..=self.through_year {
                snapshots.insert(y, live.clone());
            }
        }

        tracing::debug!(
            years = snapshots.len(),
            unspent = live.len(),
            "utxo timeline built"
        );

        Ok(UtxoTimeline { snapshots })
    }

    fn apply(&self, tx: &Transaction, live: &mut UtxoSet) -> Result<(), ConsistencyError> {
        // Only wallet-originated transactions have owned inputs to consume;
        // foreign co-inputs were never in the wallet's set
        for input in tx.inputs.iter().filter(|i| self.wallet.contains(&i.address)) {
            if live.remove(&input.spends).is_none() {
                return Err(ConsistencyError::MissingUtxo {
                    txid: tx.txid.clone(),
                    tx_ref: input.spends.clone(),
                });
            }
        }

        for output in tx.outputs.iter().filter(|o| self.wallet.contains(&o.address)) {
            let tx_ref = tx.output_ref(output);
            if live.contains_key(&tx_ref) {
                return Err(ConsistencyError::DuplicateUtxo {
                    txid: tx.txid.clone(),
                    tx_ref,
                });
            }
            live.insert(
                tx_ref,
                UtxoEntry {
                    amount: output.amount,
                    address: output.address.clone(),
                },
            );
        }

        Ok(())
    }
}

// ============================================================================
// TESTS
// ============================================================================
