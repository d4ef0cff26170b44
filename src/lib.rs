// Wallet Trace - Core Library
// Transaction-graph analytics for one wallet: counterparty flows,
// co-spend clustering, yearly UTXO snapshots and balance reconciliation.

pub mod error;          // Typed failures: consistency, lookup, ingestion
pub mod ledger;         // Transactions, owned addresses, LedgerView
pub mod tags;           // Address tags and counterparty keys
pub mod flows;          // Input and output aggregation
pub mod clustering;     // Common-input-ownership clustering
pub mod utxo;           // Yearly UTXO timeline
pub mod prices;         // Daily fiat quotes
pub mod export;         // Per-transaction rows and CSV output
pub mod reconciliation; // Year totals and residual fees
pub mod analysis;       // All passes in one run
pub mod config;         // JSON run settings
pub mod db;             // SQLite wallet store

// Re-export commonly used types
pub use error::{ConsistencyError, IngestError, LookupError, Side};
pub use ledger::{
    Address, Amount, Ledger, LedgerView, Transaction, TxInput, TxOutput, TxRef,
    WalletAddressSet,
};
pub use tags::{CounterpartyKey, TagMap};
pub use flows::{
    discover_wallet_addresses, AggregateEntry, DateWindow, InputAggregator, InputTotals,
    OutputAggregator, OutputTotals, SpendSet, WalletExpansion,
};
pub use clustering::{Cluster, ClusteringEngine};
pub use utxo::{UtxoEntry, UtxoRecord, UtxoSet, UtxoTimeline, UtxoTimelineBuilder};
pub use prices::{MissingQuote, PriceFile, PriceHistory, PriceSource};
pub use export::{
    format_amount, write_rows_csv, write_year_totals_csv, CsvFormat, Direction, ExportRow,
    FiatValue, RowBuilder,
};
pub use reconciliation::{
    BalanceReconciler, BalanceReport, CumulativePoint, ReconciliationMismatch, YearTotals,
};
pub use analysis::{AnalysisReport, ClusterSummary, WalletAnalysis};
pub use config::{AnalysisConfig, CsvSettings};
pub use db::{
    get_events, insert_event, insert_transactions, insert_wallet_addresses, load_addresses_csv,
    load_csv, load_ledger, load_transactions, load_wallet, setup_database, verify_count, Event,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
