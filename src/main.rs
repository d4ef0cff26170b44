use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use rusqlite::Connection;
use std::fs::File;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use wallet_trace::{
    discover_wallet_addresses, format_amount, insert_transactions, insert_wallet_addresses,
    load_addresses_csv, load_csv, load_ledger, setup_database, verify_count, write_rows_csv,
    write_year_totals_csv, AnalysisConfig, Ledger, LedgerView, PriceHistory, TagMap,
    WalletAnalysis,
};

#[derive(Parser)]
#[command(name = "wallet-trace")]
#[command(about = "Counterparty flows, clusters, UTXO history and balances for one wallet")]
#[command(version)]
struct Cli {
    /// JSON config file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// SQLite wallet store (overrides the config)
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    /// Wallet display name (overrides the config)
    #[arg(short, long, global = true)]
    wallet: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Import transaction legs and owned addresses into the store
    Import {
        /// CSV of legs: txid,timestamp,side,n,address,amount,prev_txid,prev_index
        #[arg(long)]
        transactions: Option<PathBuf>,

        /// One owned address per line
        #[arg(long)]
        addresses: Option<PathBuf>,
    },

    /// Per-counterparty input totals
    Inputs,

    /// Per-counterparty output totals
    Outputs,

    /// Co-spend address clusters
    Clusters {
        /// Hide clusters smaller than this
        #[arg(long, default_value = "1")]
        min_size: usize,
    },

    /// External addresses that co-signed with wallet inputs
    Correlated {
        /// Keep importing correlated addresses until nothing new appears
        #[arg(long)]
        expand: bool,

        /// Round cap for --expand
        #[arg(long, default_value = "10")]
        rounds: usize,
    },

    /// Unspent outputs at the end of each year
    Utxos {
        /// Only this year
        #[arg(long)]
        year: Option<i32>,
    },

    /// Year totals, fees and reconciliation warnings
    Balances,

    /// Per-transaction rows as CSV
    Export {
        /// Output file (stdout when absent)
        #[arg(short, long)]
        out: Option<PathBuf>,

        /// Also write year totals to this file
        #[arg(long)]
        years: Option<PathBuf>,
    },

    /// Full analysis as JSON
    Report {
        /// Output file (stdout when absent)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
}

/// Everything a command needs, loaded once
struct Session {
    config: AnalysisConfig,
    ledger: Ledger,
    tags: TagMap,
    prices: PriceHistory,
}

impl Session {
    fn analysis(&self) -> WalletAnalysis<'_> {
        WalletAnalysis::new(&self.ledger, &self.tags, self.config.resolved_through_year())
            .with_window(self.config.window())
            .with_decimals(self.config.decimals)
            .with_prices(&self.prices, self.config.missing_quote)
    }

    fn amount(&self, amount: i64) -> String {
        format_amount(amount, self.config.decimals)
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging (stderr, so stdout stays clean for CSV/JSON)
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()),
        )
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let mut config = match &cli.config {
        Some(path) => AnalysisConfig::from_file(path)?,
        None => AnalysisConfig::default(),
    };
    if let Some(db) = cli.db {
        config.database = db;
    }
    if let Some(wallet) = cli.wallet {
        config.wallet_name = wallet;
    }

    let conn = Connection::open(&config.database)
        .with_context(|| format!("Failed to open database: {:?}", config.database))?;
    setup_database(&conn)?;

    if let Commands::Import {
        transactions,
        addresses,
    } = &cli.command
    {
        return run_import(&conn, transactions.as_deref(), addresses.as_deref());
    }

    let session = open_session(&conn, config)?;

    match cli.command {
        Commands::Import { .. } => Ok(()),
        Commands::Inputs => run_inputs(&session),
        Commands::Outputs => run_outputs(&session),
        Commands::Clusters { min_size } => run_clusters(&session, min_size),
        Commands::Correlated { expand, rounds } => run_correlated(&session, expand, rounds),
        Commands::Utxos { year } => run_utxos(&session, year),
        Commands::Balances => run_balances(&session),
        Commands::Export { out, years } => run_export(&session, out, years),
        Commands::Report { out } => run_report(&session, out),
    }
}

fn open_session(conn: &Connection, config: AnalysisConfig) -> Result<Session> {
    let ledger = load_ledger(conn, &config.wallet_name)?;
    let tags = match &config.tags_file {
        Some(path) => TagMap::from_csv(path)?,
        None => TagMap::new(),
    };
    let prices = PriceHistory::load(&config.price_files)?;

    Ok(Session {
        config,
        ledger,
        tags,
        prices,
    })
}

/// Stdout or a file
fn output(path: Option<&Path>) -> Result<Box<dyn Write>> {
    match path {
        Some(path) => {
            let file = File::create(path).with_context(|| format!("Failed to create {:?}", path))?;
            Ok(Box::new(file))
        }
        None => Ok(Box::new(io::stdout())),
    }
}

fn run_import(conn: &Connection, transactions: Option<&Path>, addresses: Option<&Path>) -> Result<()> {
    println!("🗄️  Import - CSV → SQLite + WAL");
    println!("━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━");

    if let Some(path) = addresses {
        println!("\n📂 Loading owned addresses...");
        let owned = load_addresses_csv(path)?;
        let added = insert_wallet_addresses(conn, &owned)?;
        println!("✓ {} addresses read, {} new", owned.len(), added);
    }

    if let Some(path) = transactions {
        println!("\n📂 Loading transaction legs...");
        let loaded = load_csv(path)?;
        println!("✓ Loaded {} transactions from CSV", loaded.len());

        println!("\n💾 Inserting transactions...");
        let inserted = insert_transactions(conn, &loaded)?;
        println!("✓ Inserted: {} transactions", inserted);
        println!("✓ Skipped duplicates: {}", loaded.len() - inserted);
    }

    println!("\n🔍 Verifying database...");
    let count = verify_count(conn)?;
    println!("✓ Database contains {} transactions", count);

    Ok(())
}

fn run_inputs(session: &Session) -> Result<()> {
    let totals = session.analysis().input_totals();

    println!("📥 Input totals ({} counterparties)", totals.len());
    for entry in totals.entries.values() {
        println!(
            "  {:<40} net {:>20}  to wallet {:>20}  ({} txs)",
            entry.key.label(),
            session.amount(entry.net),
            session.amount(entry.wallet_subtotal),
            entry.transaction_count()
        );
    }
    Ok(())
}

fn run_outputs(session: &Session) -> Result<()> {
    let totals = session.analysis().output_totals();

    println!("📤 Output totals ({} counterparties)", totals.len());
    for entry in totals.entries.values() {
        println!(
            "  {:<40} {:>20}  ({} txs, {} addresses)",
            entry.key.label(),
            session.amount(entry.net),
            entry.transaction_count(),
            entry.addresses.len()
        );
    }
    Ok(())
}

fn run_clusters(session: &Session, min_size: usize) -> Result<()> {
    let wallet = session.ledger.wallet();
    let clusters: Vec<_> = session
        .analysis()
        .clusters()
        .into_iter()
        .filter(|c| c.len() >= min_size)
        .collect();

    println!("🕸️  {} clusters", clusters.len());
    for cluster in &clusters {
        let marker = if cluster.touches_wallet(wallet) { "⭐" } else { "  " };
        println!("{} {} ({} addresses)", marker, &cluster.fingerprint()[..12], cluster.len());
        for address in &cluster.addresses {
            println!("     {}", address);
        }
    }
    Ok(())
}

fn run_correlated(session: &Session, expand: bool, rounds: usize) -> Result<()> {
    if expand {
        let expansion = discover_wallet_addresses(
            session.ledger.transactions(),
            session.ledger.wallet(),
            rounds,
        );
        println!(
            "🔗 {} addresses found in {} rounds ({} owned now)",
            expansion.added.len(),
            expansion.rounds,
            expansion.wallet.len()
        );
        for address in &expansion.added {
            println!("  {}", address);
        }
        return Ok(());
    }

    let totals = session.analysis().input_totals();
    println!("🔗 {} correlated addresses", totals.correlated.len());
    for address in &totals.correlated {
        println!("  {}", address);
    }
    Ok(())
}

fn run_utxos(session: &Session, year: Option<i32>) -> Result<()> {
    let timeline = session.analysis().timeline()?;

    for (y, set) in timeline.iter().filter(|(y, _)| year.map_or(true, |only| only == *y)) {
        let balance = timeline.balance(y).unwrap_or(0);
        println!("⏳ {} - {} unspent, {}", y, set.len(), session.amount(balance));
        for (tx_ref, entry) in set {
            println!("  {:<70} {:>20}  {}", tx_ref.to_string(), session.amount(entry.amount), entry.address);
        }
    }
    Ok(())
}

fn run_balances(session: &Session) -> Result<()> {
    let report = session.analysis().balances()?;

    println!("⚖️  {}", report.summary());
    for totals in &report.years {
        let fiat = totals
            .closing_value_fiat
            .map(|v| format!("  ≈ {:.2}", v))
            .unwrap_or_default();
        println!(
            "  {}  in {:>18}  out {:>18}  fee {:>14}  closing {:>18}{}",
            totals.year,
            session.amount(totals.total_in),
            session.amount(totals.total_out),
            session.amount(totals.fee),
            session.amount(totals.closing_balance),
            fiat
        );
    }

    if report.is_reconciled() {
        println!("✅ Balances reconciled");
    } else {
        for mismatch in &report.mismatches {
            println!("⚠️  {:?}", mismatch);
        }
    }
    Ok(())
}

fn run_export(session: &Session, out: Option<PathBuf>, years: Option<PathBuf>) -> Result<()> {
    let analysis = session.analysis();
    let format = session.config.csv_format();
    let rows = analysis.rows();

    write_rows_csv(&rows, output(out.as_deref())?, &format)?;

    if let Some(path) = years {
        let report = analysis.balances()?;
        write_year_totals_csv(&report, output(Some(path.as_path()))?, &format)?;
    }

    tracing::info!(rows = rows.len(), "export written");
    Ok(())
}

fn run_report(session: &Session, out: Option<PathBuf>) -> Result<()> {
    let report = session.analysis().run()?;

    let mut writer = output(out.as_deref())?;
    serde_json::to_writer_pretty(&mut writer, &report).context("Failed to write report")?;
    writeln!(writer)?;

    tracing::info!(run_id = %report.run_id, "report written");
    Ok(())
}
