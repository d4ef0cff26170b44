// 🔎 Wallet Analysis - Every pass over one ledger, one report
//
// The passes only read the ledger, so they can run in any order. The one
// dependency is clustering, which needs every spend set of the history
// before it starts.

use crate::clustering::{Cluster, ClusteringEngine};
use crate::error::ConsistencyError;
use crate::export::{ExportRow, RowBuilder};
use crate::flows::{AggregateEntry, DateWindow, InputAggregator, InputTotals, OutputAggregator, OutputTotals};
use crate::ledger::{Address, LedgerView, WalletAddressSet};
use crate::prices::{MissingQuote, PriceSource};
use crate::reconciliation::{BalanceReconciler, BalanceReport};
use crate::tags::TagMap;
use crate::utxo::{UtxoRecord, UtxoTimeline, UtxoTimelineBuilder};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

// ============================================================================
// REPORT
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClusterSummary {
    pub fingerprint: String,
    pub size: usize,
    pub touches_wallet: bool,
    pub addresses: BTreeSet<Address>,

    /// Members not in the wallet yet
    pub external: Vec<Address>,
}

impl ClusterSummary {
    pub fn from_cluster(cluster: &Cluster, wallet: &WalletAddressSet) -> Self {
        ClusterSummary {
            fingerprint: cluster.fingerprint(),
            size: cluster.len(),
            touches_wallet: cluster.touches_wallet(wallet),
            addresses: cluster.addresses.clone(),
            external: cluster.external_addresses(wallet).into_iter().cloned().collect(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisReport {
    pub run_id: String,
    pub generated_at: DateTime<Utc>,
    pub wallet: String,
    pub wallet_addresses: usize,
    pub transactions: usize,
    pub through_year: i32,
    pub window: DateWindow,
    pub inputs: Vec<AggregateEntry>,
    pub correlated: BTreeSet<Address>,
    pub outputs: Vec<AggregateEntry>,
    pub clusters: Vec<ClusterSummary>,
    pub utxos: BTreeMap<i32, Vec<UtxoRecord>>,
    pub balances: BalanceReport,
}

// ============================================================================
// WALLET ANALYSIS
// ============================================================================

pub struct WalletAnalysis<'a> {
    ledger: &'a dyn LedgerView,
    tags: &'a TagMap,
    through_year: i32,
    window: DateWindow,
    prices: Option<&'a dyn PriceSource>,
    missing_quote: MissingQuote,
    decimals: u32,
}

impl<'a> WalletAnalysis<'a> {
    pub fn new(ledger: &'a dyn LedgerView, tags: &'a TagMap, through_year: i32) -> Self {
        WalletAnalysis {
            ledger,
            tags,
            through_year,
            window: DateWindow::all(),
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

    pub fn input_totals(&self) -> InputTotals {
        InputAggregator::new(self.ledger.wallet(), self.tags)
            .with_window(self.window)
            .compute_input_totals(self.ledger.transactions())
    }

    pub fn output_totals(&self) -> OutputTotals {
        OutputAggregator::new(self.ledger.wallet(), self.tags)
            .with_window(self.window)
            .compute_output_totals(self.ledger.transactions())
    }

    /// Clusters over the spend sets of the whole history, ignoring the window
    pub fn clusters(&self) -> Vec<Cluster> {
        let outputs = OutputAggregator::new(self.ledger.wallet(), self.tags)
            .compute_output_totals(self.ledger.transactions());
        let spend_sets = outputs.spend_sets();

        ClusteringEngine::new().cluster(spend_sets.iter().map(|s| &s.addresses))
    }

    pub fn timeline(&self) -> Result<UtxoTimeline, ConsistencyError> {
        UtxoTimelineBuilder::new(self.ledger.wallet(), self.through_year)
            .build_timeline(self.ledger.transactions())
    }

    pub fn rows(&self) -> Vec<ExportRow> {
        let mut builder = RowBuilder::new(self.ledger.wallet(), self.tags, self.through_year)
            .with_window(self.window)
            .with_decimals(self.decimals);
        if let Some(prices) = self.prices {
            builder = builder.with_prices(prices, self.missing_quote);
        }
        builder.build_rows(self.ledger.transactions())
    }

    fn reconciler(&self) -> BalanceReconciler<'a> {
        let reconciler = BalanceReconciler::new().with_decimals(self.decimals);
        match self.prices {
            Some(prices) => reconciler.with_prices(prices, self.missing_quote),
            None => reconciler,
        }
    }

    /// Year totals checked against the UTXO timeline
    pub fn balances(&self) -> Result<BalanceReport, ConsistencyError> {
        let timeline = self.timeline()?;
        Ok(self.balances_with(&timeline))
    }

    fn balances_with(&self, timeline: &UtxoTimeline) -> BalanceReport {
        let reconciler = self.reconciler();
        let mut report = reconciler.reconcile(&self.rows(), self.through_year);
        reconciler.cross_check_timeline(&mut report, timeline);
        report
    }

    pub fn run(&self) -> Result<AnalysisReport, ConsistencyError> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let wallet = self.ledger.wallet();
        tracing::info!(
            run_id = %run_id,
            wallet = %wallet.name,
            transactions = self.ledger.transactions().len(),
            "analysis started"
        );

        let inputs = self.input_totals();
        let outputs = self.output_totals();
        let clusters = self
            .clusters()
            .iter()
            .map(|c| ClusterSummary::from_cluster(c, wallet))
            .collect();
        let timeline = self.timeline()?;
        let balances = self.balances_with(&timeline);

        if !balances.is_reconciled() {
            tracing::warn!(
                run_id = %run_id,
                mismatches = balances.mismatches.len(),
                "balances did not reconcile"
            );
        }

        Ok(AnalysisReport {
            run_id,
            generated_at: Utc::now(),
            wallet: wallet.name.clone(),
            wallet_addresses: wallet.len(),
            transactions: self.ledger.transactions().len(),
            through_year: self.through_year,
            window: self.window,
            inputs: inputs.to_vec(),
            correlated: inputs.correlated,
            outputs: outputs.to_vec(),
            clusters,
            utxos: timeline.to_records(),
            balances,
        })
    }
}

// ============================================================================
// TESTS
// ============================================================================
