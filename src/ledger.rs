// 📒 Ledger Model - Transactions, legs and the wallet's owned addresses
// Read-only view consumed by every aggregation pass
//
// Amounts are exact integers in the smallest unit (satoshi-like).
// Floating point only appears later, at the fiat boundary.

use crate::error::{IngestError, Side};
use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::collections::HashSet;
use std::fmt;

/// Signed amount in the smallest indivisible unit
pub type Amount = i64;

// ============================================================================
// ADDRESS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    pub fn new(value: impl Into<String>) -> Self {
        Address(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn is_empty(&self) -> bool {
        self.0.trim().is_empty()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Address {
    fn from(value: &str) -> Self {
        Address::new(value)
    }
}

impl From<String> for Address {
    fn from(value: String) -> Self {
        Address(value)
    }
}

impl Borrow<str> for Address {
    fn borrow(&self) -> &str {
        &self.0
    }
}

// ============================================================================
// TX REF (previous output being spent)
// ============================================================================

/// Identifies one transaction output: (transaction id, output index)
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TxRef {
    pub txid: String,
    pub index: u32,
}

impl TxRef {
    pub fn new(txid: impl Into<String>, index: u32) -> Self {
        TxRef {
            txid: txid.into(),
            index,
        }
    }
}

impl fmt::Display for TxRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.txid, self.index)
    }
}

// ============================================================================
// TRANSACTION LEGS
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxInput {
    pub address: Address,
    pub amount: Amount,

    /// The previous output this input consumes
    pub spends: TxRef,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxOutput {
    /// Output position within its transaction (the `n` of `txid:n`)
    pub index: u32,
    pub address: Address,
    pub amount: Amount,
}

// ============================================================================
// TRANSACTION
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    pub txid: String,

    /// Block time; None for transactions that were never confirmed
    pub timestamp: Option<DateTime<Utc>>,

    pub inputs: Vec<TxInput>,
    pub outputs: Vec<TxOutput>,
}

impl Transaction {
    pub fn new(txid: impl Into<String>, timestamp: Option<DateTime<Utc>>) -> Self {
        Transaction {
            txid: txid.into(),
            timestamp,
            inputs: Vec::new(),
            outputs: Vec::new(),
        }
    }

    /// Builder pattern: add an input spending `spends`
    pub fn with_input(mut self, address: impl Into<Address>, amount: Amount, spends: TxRef) -> Self {
        self.inputs.push(TxInput {
            address: address.into(),
            amount,
            spends,
        });
        self
    }

    /// Builder pattern: add the next output (index = current output count)
    pub fn with_output(mut self, address: impl Into<Address>, amount: Amount) -> Self {
        let index = self.outputs.len() as u32;
        self.outputs.push(TxOutput {
            index,
            address: address.into(),
            amount,
        });
        self
    }

    pub fn year(&self) -> Option<i32> {
        self.timestamp.map(|ts| ts.year())
    }

    /// Reference to one of this transaction's outputs
    pub fn output_ref(&self, output: &TxOutput) -> TxRef {
        TxRef::new(self.txid.clone(), output.index)
    }

    pub fn input_total(&self) -> Amount {
        self.inputs.iter().map(|i| i.amount).sum()
    }

    pub fn output_total(&self) -> Amount {
        self.outputs.iter().map(|o| o.amount).sum()
    }

    /// Miner fee: inputs minus outputs. None when there are no inputs.
    pub fn fee(&self) -> Option<Amount> {
        if self.inputs.is_empty() {
            None
        } else {
            Some(self.input_total() - self.output_total())
        }
    }

    /// True when at least one input is spent from the wallet
    pub fn is_wallet_originated(&self, wallet: &WalletAddressSet) -> bool {
        self.inputs.iter().any(|i| wallet.contains(&i.address))
    }

    pub fn owned_input_total(&self, wallet: &WalletAddressSet) -> Amount {
        self.inputs
            .iter()
            .filter(|i| wallet.contains(&i.address))
            .map(|i| i.amount)
            .sum()
    }

    pub fn owned_output_total(&self, wallet: &WalletAddressSet) -> Amount {
        self.outputs
            .iter()
            .filter(|o| wallet.contains(&o.address))
            .map(|o| o.amount)
            .sum()
    }

    /// Change of the wallet balance caused by this transaction
    pub fn balance_delta(&self, wallet: &WalletAddressSet) -> Amount {
        self.owned_output_total(wallet) - self.owned_input_total(wallet)
    }

    /// Reject malformed transactions before they reach aggregation
    pub fn validate(&self) -> Result<(), IngestError> {
        if self.txid.trim().is_empty() {
            return Err(IngestError::EmptyTxid);
        }

        for (position, input) in self.inputs.iter().enumerate() {
            check_leg(&self.txid, Side::Input, position, &input.address, input.amount)?;
        }

        let mut seen = HashSet::new();
        for (position, output) in self.outputs.iter().enumerate() {
            check_leg(&self.txid, Side::Output, position, &output.address, output.amount)?;
            if !seen.insert(output.index) {
                return Err(IngestError::DuplicateOutputIndex {
                    txid: self.txid.clone(),
                    index: output.index,
                });
            }
        }

        Ok(())
    }
}

fn check_leg(
    txid: &str,
    side: Side,
    position: usize,
    address: &Address,
    amount: Amount,
) -> Result<(), IngestError> {
    if address.is_empty() {
        return Err(IngestError::EmptyAddress {
            txid: txid.to_string(),
            side,
            position,
        });
    }
    if amount < 0 {
        return Err(IngestError::NegativeAmount {
            txid: txid.to_string(),
            side,
            position,
            amount,
        });
    }
    Ok(())
}

// ============================================================================
// WALLET ADDRESS SET
// ============================================================================

/// Addresses known to be controlled by the analysed wallet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WalletAddressSet {
    /// Wallet name, used as the counterparty key for round-trips
    pub name: String,
    addresses: HashSet<Address>,
}

impl WalletAddressSet {
    pub fn new(name: impl Into<String>) -> Self {
        WalletAddressSet {
            name: name.into(),
            addresses: HashSet::new(),
        }
    }

    pub fn with_addresses<I, A>(name: impl Into<String>, addresses: I) -> Self
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        let mut wallet = WalletAddressSet::new(name);
        wallet.extend(addresses);
        wallet
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    pub fn insert(&mut self, address: impl Into<Address>) -> bool {
        self.addresses.insert(address.into())
    }

    pub fn extend<I, A>(&mut self, addresses: I)
    where
        I: IntoIterator<Item = A>,
        A: Into<Address>,
    {
        self.addresses.extend(addresses.into_iter().map(Into::into));
    }

    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    /// Addresses in sorted order
    pub fn sorted(&self) -> Vec<&Address> {
        let mut list: Vec<&Address> = self.addresses.iter().collect();
        list.sort();
        list
    }
}

// ============================================================================
// LEDGER VIEW
// ============================================================================

/// Read-only access to an ordered transaction list and the owned addresses
pub trait LedgerView {
    /// Transactions in non-decreasing timestamp order
    fn transactions(&self) -> &[Transaction];

    fn wallet(&self) -> &WalletAddressSet;
}

/// In-memory ledger with eager validation
#[derive(Debug, Clone)]
pub struct Ledger {
    wallet: WalletAddressSet,
    transactions: Vec<Transaction>,
}

impl Ledger {
    /// Build a ledger, rejecting malformed or duplicate transactions
    pub fn new(wallet: WalletAddressSet, transactions: Vec<Transaction>) -> Result<Self, IngestError> {
        let mut txids = HashSet::new();
        for tx in &transactions {
            tx.validate()?;
            if !txids.insert(tx.txid.as_str()) {
                return Err(IngestError::DuplicateTransaction(tx.txid.clone()));
            }
        }

        Ok(Ledger {
            wallet,
            transactions,
        })
    }

    /// Same ledger, wallet swapped (used when the owned set is expanded)
    pub fn with_wallet(&self, wallet: WalletAddressSet) -> Ledger {
        Ledger {
            wallet,
            transactions: self.transactions.clone(),
        }
    }

    /// Check the non-decreasing timestamp order the timeline relies on.
    /// Untimestamped transactions are ignored by this check.
    pub fn is_chronological(&self) -> bool {
        let mut latest: Option<DateTime<Utc>> = None;
        for ts in self.transactions.iter().filter_map(|tx| tx.timestamp) {
            if latest.map_or(false, |prev| ts < prev) {
                return false;
            }
            latest = Some(ts);
        }
        true
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

impl LedgerView for Ledger {
    fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    fn wallet(&self) -> &WalletAddressSet {
        &self.wallet
    }
}

// ============================================================================
// TESTS
// ============================================================================
