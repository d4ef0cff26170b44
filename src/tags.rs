// 🏷️ Address Tags - Display names as data
// Maps known external addresses to a human label ("Exchange", "Alice", ...)
//
// Tags only change how counterparties are displayed and grouped in totals.
// Clustering always works on raw addresses.

use crate::ledger::{Address, WalletAddressSet};
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

// ============================================================================
// COUNTERPARTY KEY
// ============================================================================

/// What a flow is aggregated against
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(tag = "kind", content = "name", rename_all = "snake_case")]
pub enum CounterpartyKey {
    /// The analysed wallet itself (round-trips and change)
    Wallet(String),

    /// A tagged external address
    Tag(String),

    /// An untagged external address
    Address(Address),
}

impl CounterpartyKey {
    pub fn is_wallet(&self) -> bool {
        matches!(self, CounterpartyKey::Wallet(_))
    }

    pub fn label(&self) -> &str {
        match self {
            CounterpartyKey::Wallet(name) => name,
            CounterpartyKey::Tag(name) => name,
            CounterpartyKey::Address(address) => address.as_str(),
        }
    }
}

impl fmt::Display for CounterpartyKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

// ============================================================================
// TAG MAP
// ============================================================================

#[derive(Debug, Deserialize)]
struct TagRecord {
    address: String,
    name: String,
}

#[derive(Debug, Clone, Default)]
pub struct TagMap {
    tags: HashMap<Address, String>,
}

impl TagMap {
    pub fn new() -> Self {
        TagMap::default()
    }

    pub fn from_pairs<I, A, N>(pairs: I) -> Self
    where
        I: IntoIterator<Item = (A, N)>,
        A: Into<Address>,
        N: Into<String>,
    {
        let mut map = TagMap::new();
        for (address, name) in pairs {
            map.insert(address, name);
        }
        map
    }

    /// Load tags from a CSV file with `address,name` columns
    pub fn from_csv<P: AsRef<Path>>(path: P) -> Result<Self> {
        let mut rdr = csv::Reader::from_path(path.as_ref())
            .with_context(|| format!("Failed to open tags file: {:?}", path.as_ref()))?;

        let mut map = TagMap::new();
        for result in rdr.deserialize() {
            let record: TagRecord = result.context("Failed to deserialize tag")?;
            map.insert(record.address.trim(), record.name.trim());
        }

        tracing::debug!(tags = map.len(), "loaded address tags");
        Ok(map)
    }

    pub fn insert(&mut self, address: impl Into<Address>, name: impl Into<String>) {
        self.tags.insert(address.into(), name.into());
    }

    pub fn get(&self, address: &Address) -> Option<&str> {
        self.tags.get(address).map(String::as_str)
    }

    /// Counterparty key for an address: wallet first, then tag, then raw
    pub fn resolve(&self, address: &Address, wallet: &WalletAddressSet) -> CounterpartyKey {
        if wallet.contains(address) {
            CounterpartyKey::Wallet(wallet.name.clone())
        } else if let Some(name) = self.get(address) {
            CounterpartyKey::Tag(name.to_string())
        } else {
            CounterpartyKey::Address(address.clone())
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }
}

// ============================================================================
// TESTS
// ============================================================================
