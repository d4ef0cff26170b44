// 🚨 Error Kinds - Typed failures of the analytics core
//
// Glue code (store, loaders, CLI) uses anyhow. The engine itself reports
// these typed errors so callers can decide what is fatal.

use crate::ledger::TxRef;
use chrono::{DateTime, NaiveDate, Utc};
use thiserror::Error;

// ============================================================================
// CONSISTENCY ERRORS (UTXO replay)
// ============================================================================

/// The replayed history does not agree with the owned-address set.
///
/// Fatal to a single timeline replay. Usually means the owned-address set is
/// incomplete or the ledger is not in chronological order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsistencyError {
    #[error("transaction {txid} spends {tx_ref}, which is not a live wallet output")]
    MissingUtxo { txid: String, tx_ref: TxRef },

    #[error("transaction {txid} creates {tx_ref}, which is already a live wallet output")]
    DuplicateUtxo { txid: String, tx_ref: TxRef },

    #[error("transaction {txid} at {timestamp} is older than the previous transaction at {previous}")]
    OutOfOrder {
        txid: String,
        timestamp: DateTime<Utc>,
        previous: DateTime<Utc>,
    },
}

impl ConsistencyError {
    /// The output reference that broke the replay, if any
    pub fn tx_ref(&self) -> Option<&TxRef> {
        match self {
            ConsistencyError::MissingUtxo { tx_ref, .. } => Some(tx_ref),
            ConsistencyError::DuplicateUtxo { tx_ref, .. } => Some(tx_ref),
            ConsistencyError::OutOfOrder { .. } => None,
        }
    }
}

// ============================================================================
// LOOKUP ERRORS (price history)
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LookupError {
    #[error("no price quote for {0}")]
    NotFound(NaiveDate),
}

// ============================================================================
// INGEST ERRORS (malformed ledger input)
// ============================================================================

/// Which side of a transaction a malformed leg sits on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Side {
    Input,
    Output,
}

impl std::fmt::Display for Side {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Side::Input => write!(f, "input"),
            Side::Output => write!(f, "output"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum IngestError {
    #[error("transaction without an id")]
    EmptyTxid,

    #[error("transaction {txid}: {side} #{position} has no address")]
    EmptyAddress {
        txid: String,
        side: Side,
        position: usize,
    },

    #[error("transaction {txid}: {side} #{position} has negative amount {amount}")]
    NegativeAmount {
        txid: String,
        side: Side,
        position: usize,
        amount: i64,
    },

    #[error("transaction {txid}: output index {index} appears more than once")]
    DuplicateOutputIndex { txid: String, index: u32 },

    #[error("transaction {0} appears more than once in the ledger")]
    DuplicateTransaction(String),
}
