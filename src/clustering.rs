// 🕸️ Clustering Engine - Common-input-ownership heuristic
//
// Every spend set is a hyperedge: all of its addresses are assumed to share
// one controller, and the relation is transitive. The result is the
// connected components of that hypergraph, computed with a union-find keyed
// by address. The partition does not depend on the order of the input.

use crate::ledger::{Address, WalletAddressSet};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet, HashMap};

// ============================================================================
// CLUSTER
// ============================================================================

/// Addresses believed to share one controller
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Cluster {
    pub addresses: BTreeSet<Address>,
}

impl Cluster {
    pub fn len(&self) -> usize {
        self.addresses.len()
    }

    pub fn is_empty(&self) -> bool {
        self.addresses.is_empty()
    }

    pub fn contains(&self, address: &Address) -> bool {
        self.addresses.contains(address)
    }

    /// Stable identity for a cluster: sha256 over the sorted member list.
    /// Same members, same fingerprint, in any run.
    pub fn fingerprint(&self) -> String {
        let mut hasher = Sha256::new();
        for address in &self.addresses {
            hasher.update(address.as_str().as_bytes());
            hasher.update(b"\n");
        }
        format!("{:x}", hasher.finalize())
    }

    /// Members not yet known to the wallet (import candidates)
    pub fn external_addresses(&self, wallet: &WalletAddressSet) -> Vec<&Address> {
        self.addresses.iter().filter(|a| !wallet.contains(a)).collect()
    }

    pub fn touches_wallet(&self, wallet: &WalletAddressSet) -> bool {
        self.addresses.iter().any(|a| wallet.contains(a))
    }
}

// ============================================================================
// DISJOINT SET
// ============================================================================

#[derive(Debug, Default)]
struct DisjointSet {
    slots: HashMap<Address, usize>,
    members: Vec<Address>,
    parent: Vec<usize>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn slot(&mut self, address: &Address) -> usize {
        if let Some(&slot) = self.slots.get(address) {
            return slot;
        }
        let slot = self.members.len();
        self.slots.insert(address.clone(), slot);
        self.members.push(address.clone());
        self.parent.push(slot);
        self.rank.push(0);
        slot
    }

    fn find(&mut self, mut x: usize) -> usize {
        // Path halving
        while self.parent[x] != x {
            self.parent[x] = self.parent[self.parent[x]];
            x = self.parent[x];
        }
        x
    }

    fn union(&mut self, a: usize, b: usize) {
        let ra = self.find(a);
        let rb = self.find(b);
        if ra == rb {
            return;
        }
        match self.rank[ra].cmp(&self.rank[rb]) {
            std::cmp::Ordering::Less => self.parent[ra] = rb,
            std::cmp::Ordering::Greater => self.parent[rb] = ra,
            std::cmp::Ordering::Equal => {
                self.parent[rb] = ra;
                self.rank[ra] += 1;
            }
        }
    }

    fn into_groups(mut self) -> Vec<BTreeSet<Address>> {
        let mut groups: BTreeMap<usize, BTreeSet<Address>> = BTreeMap::new();
        for slot in 0..self.members.len() {
            let root = self.find(slot);
            groups
                .entry(root)
                .or_default()
                .insert(self.members[slot].clone());
        }
        groups.into_values().collect()
    }
}

// ============================================================================
// CLUSTERING ENGINE
// ============================================================================

pub struct ClusteringEngine {
    /// Clusters smaller than this are dropped from the result (default: 1)
    pub min_cluster_size: usize,
}

impl ClusteringEngine {
    pub fn new() -> Self {
        ClusteringEngine {
            min_cluster_size: 1,
        }
    }

    pub fn with_min_size(min_cluster_size: usize) -> Self {
        ClusteringEngine { min_cluster_size }
    }

    /// Partition the addresses of all spend sets into disjoint clusters.
    ///
    /// Needs the complete set of hyperedges: clustering a partial list gives
    /// a partition of that list only.
    ///
    /// Clusters come back largest first, ties broken by smallest address.
    pub fn cluster<'s, I>(&self, spend_sets: I) -> Vec<Cluster>
    where
        I: IntoIterator<Item = &'s BTreeSet<Address>>,
    {
        let mut dsu = DisjointSet::default();
        let mut edges = 0usize;

        for set in spend_sets {
            let mut members = set.iter();
            let Some(first) = members.next() else {
                continue;
            };
            edges += 1;
            let anchor = dsu.slot(first);
            for address in members {
                let slot = dsu.slot(address);
                dsu.union(anchor, slot);
            }
        }

        let mut clusters: Vec<Cluster> = dsu
            .into_groups()
            .into_iter()
            .filter(|group| group.len() >= self.min_cluster_size)
            .map(|addresses| Cluster { addresses })
            .collect();

        clusters.sort_by(|a, b| {
            b.len()
                .cmp(&a.len())
                .then_with(|| a.addresses.iter().next().cmp(&b.addresses.iter().next()))
        });

        tracing::debug!(edges, clusters = clusters.len(), "clustering complete");

        clusters
    }
}

impl Default for ClusteringEngine {
    fn default() -> Self {
        Self::new()
    }
}

// ============================================================================
// TESTS
// ============================================================================
