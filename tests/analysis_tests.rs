// End-to-end: CSV legs → SQLite store → analysis → CSV export

use rusqlite::Connection;
use std::io::Write;
use wallet_trace::{
    insert_transactions, insert_wallet_addresses, load_addresses_csv, load_csv, load_ledger,
    setup_database, write_rows_csv, Address, ClusteringEngine, CounterpartyKey, CsvFormat,
    DateWindow, LedgerView, OutputAggregator, ReconciliationMismatch, TagMap, WalletAnalysis,
};

const LEGS: &str = "\
txid,timestamp,side,n,address,amount,prev_txid,prev_index
t1,2019-02-01 10:00:00,in,0,E1,5000,c0,0
t1,2019-02-01 10:00:00,in,1,E2,1000,c0,1
t1,2019-02-01 10:00:00,out,0,W1,4000,,
t1,2019-02-01 10:00:00,out,1,E1,1990,,
t2,2019-08-01 10:00:00,in,0,E3,300,c1,0
t2,2019-08-01 10:00:00,out,0,W2,300,,
t3,2021-03-01 10:00:00,in,0,W1,4000,t1,0
t3,2021-03-01 10:00:00,in,1,W2,300,t2,0
t3,2021-03-01 10:00:00,out,0,SHOP,2500,,
t3,2021-03-01 10:00:00,out,1,W3,1790,,
t4,2022-05-01 10:00:00,in,0,W3,1790,t3,1
t4,2022-05-01 10:00:00,in,1,F1,10,c2,0
t4,2022-05-01 10:00:00,out,0,SHOP,1795,,
";

fn write_temp(contents: &str) -> tempfile::NamedTempFile {
    let mut file = tempfile::NamedTempFile::new().unwrap();
    file.write_all(contents.as_bytes()).unwrap();
    file.flush().unwrap();
    file
}

fn create_test_store(dir: &tempfile::TempDir) -> Connection {
    let conn = Connection::open(dir.path().join("wallet.db")).unwrap();
    setup_database(&conn).unwrap();

    let legs = write_temp(LEGS);
    let addresses = write_temp("address\nW1\nW2\nW3\n");

    let transactions = load_csv(legs.path()).unwrap();
    assert_eq!(insert_transactions(&conn, &transactions).unwrap(), 4);

    let owned = load_addresses_csv(addresses.path()).unwrap();
    assert_eq!(insert_wallet_addresses(&conn, &owned).unwrap(), 3);

    conn
}

#[test]
fn test_store_round_trip_and_full_analysis() {
    let dir = tempfile::tempdir().unwrap();
    let conn = create_test_store(&dir);

    let ledger = load_ledger(&conn, "Savings").unwrap();
    assert_eq!(ledger.len(), 4);
    assert!(ledger.is_chronological());

    let tags = TagMap::from_pairs([("SHOP", "Coffee shop")]);
    let report = WalletAnalysis::new(&ledger, &tags, 2023).run().unwrap();

    // Inputs: both funding transactions, plus the wallet's own spends
    let e1 = report
        .inputs
        .iter()
        .find(|e| e.key == CounterpartyKey::Address(Address::from("E1")))
        .unwrap();
    assert_eq!(e1.net, 5000);
    assert_eq!(e1.wallet_subtotal, 4000);
    assert_eq!(report.correlated, [Address::from("F1")].into_iter().collect());

    // Outputs: two payments to the shop
    let shop = report
        .outputs
        .iter()
        .find(|e| e.key == CounterpartyKey::Tag("Coffee shop".to_string()))
        .unwrap();
    assert_eq!(shop.net, 4295);
    assert_eq!(shop.spend_sets.len(), 2);

    // {W1, W2} and {W3, F1} never overlap
    assert_eq!(report.clusters.len(), 2);

    // Balances: 4300 in 2019, 1790 after t3, 0 after t4
    let balances = &report.balances;
    assert_eq!(balances.get(2019).unwrap().closing_balance, 4300);
    assert_eq!(balances.get(2020).unwrap().closing_balance, 4300);
    assert_eq!(balances.get(2021).unwrap().closing_balance, 1790);
    assert_eq!(balances.get(2021).unwrap().fee, 10);
    assert_eq!(balances.get(2022).unwrap().fee, 5);
    assert_eq!(balances.get(2023).unwrap().closing_balance, 0);
    assert!(balances.is_reconciled(), "{:?}", balances.mismatches);

    // UTXO snapshots agree with the balances
    assert_eq!(report.utxos[&2020].len(), 2);
    assert_eq!(report.utxos[&2021].len(), 1);
    assert!(report.utxos[&2022].is_empty());

    println!("✅ End-to-end test passed: {}", balances.summary());
}

#[test]
fn test_windowed_export_surfaces_mismatch() {
    let dir = tempfile::tempdir().unwrap();
    let conn = create_test_store(&dir);
    let ledger = load_ledger(&conn, "Savings").unwrap();
    let tags = TagMap::new();

    let window = DateWindow::from_dates(chrono::NaiveDate::from_ymd_opt(2021, 1, 1), None);
    let analysis = WalletAnalysis::new(&ledger, &tags, 2022).with_window(window);

    let rows = analysis.rows();
    assert_eq!(rows.len(), 2);
    // The running balance still includes the 2019 deposits
    assert_eq!(rows[0].cumulative, 1790);

    let balances = analysis.balances().unwrap();
    assert!(balances
        .mismatches
        .iter()
        .any(|m| matches!(m, ReconciliationMismatch::FeeResidual { year: 2021, .. })));

    let mut out = Vec::new();
    write_rows_csv(&rows, &mut out, &CsvFormat::default()).unwrap();
    let text = String::from_utf8(out).unwrap();
    assert_eq!(text.lines().count(), 3);
    assert!(text.contains(";t3;out;"));
}

#[test]
fn test_clusters_from_stored_history() {
    let dir = tempfile::tempdir().unwrap();
    let conn = create_test_store(&dir);
    let ledger = load_ledger(&conn, "Savings").unwrap();
    let tags = TagMap::new();

    let outputs = OutputAggregator::new(ledger.wallet(), &tags)
        .compute_output_totals(ledger.transactions());
    let spend_sets = outputs.spend_sets();
    assert_eq!(spend_sets.len(), 2);

    let clusters = ClusteringEngine::new().cluster(spend_sets.iter().map(|s| &s.addresses));
    let mut sizes: Vec<usize> = clusters.iter().map(|c| c.len()).collect();
    sizes.sort();
    assert_eq!(sizes, vec![2, 2]);
}
