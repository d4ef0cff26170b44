use crate::ledger::{Address, Amount, Ledger, Transaction, TxInput, TxOutput, TxRef, WalletAddressSet};
use anyhow::{bail, Context, Result};
use chrono::{DateTime, NaiveDateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Event for audit trail: every import leaves a record
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(
        event_type: &str,
        entity_type: &str,
        entity_id: &str,
        data: serde_json::Value,
        actor: &str,
    ) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn setup_database(conn: &Connection) -> Result<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    // ==========================================================================
    // Transactions (insertion order kept in `id`)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS transactions (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            txid TEXT UNIQUE NOT NULL,
            timestamp TEXT,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tx_inputs (
            txid TEXT NOT NULL,
            position INTEGER NOT NULL,
            address TEXT NOT NULL,
            amount INTEGER NOT NULL,
            prev_txid TEXT NOT NULL,
            prev_index INTEGER NOT NULL,
            PRIMARY KEY (txid, position)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS tx_outputs (
            txid TEXT NOT NULL,
            n INTEGER NOT NULL,
            address TEXT NOT NULL,
            amount INTEGER NOT NULL,
            PRIMARY KEY (txid, n)
        )",
        [],
    )?;

    // ==========================================================================
    // Owned addresses (one wallet per database)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS wallet_addresses (
            address TEXT PRIMARY KEY,
            added_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Events Table (audit trail)
    // ==========================================================================
    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    // ==========================================================================
    // Indexes
    // ==========================================================================
    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_timestamp ON transactions(timestamp)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_inputs_address ON tx_inputs(address)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_outputs_address ON tx_outputs(address)",
        [],
    )?;

    conn.execute(
        "CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)",
        [],
    )?;

    Ok(())
}

/// Fixed-width UTC form so that text order equals time order
fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_timestamp(column: usize, value: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(column, Type::Text, Box::new(e)))
}

// ============================================================================
// CSV IMPORT
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
enum LegSide {
    #[serde(alias = "input")]
    In,
    #[serde(alias = "output")]
    Out,
}

/// One input or output per CSV line
#[derive(Debug, Deserialize)]
struct LegRecord {
    txid: String,
    #[serde(default)]
    timestamp: String,
    side: LegSide,
    n: u32,
    address: String,
    amount: Amount,
    #[serde(default)]
    prev_txid: Option<String>,
    #[serde(default)]
    prev_index: Option<u32>,
}

/// Accepts RFC 3339 and `YYYY-MM-DD HH:MM:SS` (read as UTC); empty means unconfirmed
fn parse_csv_timestamp(value: &str) -> Result<Option<DateTime<Utc>>> {
    let value = value.trim();
    if value.is_empty() {
        return Ok(None);
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Ok(Some(dt.with_timezone(&Utc)));
    }
    let naive = NaiveDateTime::parse_from_str(value, "%Y-%m-%d %H:%M:%S")
        .with_context(|| format!("Unrecognised timestamp: {}", value))?;
    Ok(Some(naive.and_utc()))
}

/// Read a CSV of transaction legs
/// (`txid,timestamp,side,n,address,amount,prev_txid,prev_index`) and group
/// them into transactions in first-seen order. Outputs are sorted by `n`.
pub fn load_csv(csv_path: &Path) -> Result<Vec<Transaction>> {
    let mut rdr = csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open CSV file: {:?}", csv_path))?;

    let mut transactions: Vec<Transaction> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for (line, result) in rdr.deserialize().enumerate() {
        // Header is line 1
        let line = line + 2;
        let leg: LegRecord = result.with_context(|| format!("Failed to read leg on line {}", line))?;
        let timestamp = parse_csv_timestamp(&leg.timestamp).with_context(|| format!("Line {}", line))?;

        let slot = *positions.entry(leg.txid.clone()).or_insert_with(|| {
            transactions.push(Transaction::new(leg.txid.clone(), None));
            transactions.len() - 1
        });
        let tx = &mut transactions[slot];
        if tx.timestamp.is_none() {
            tx.timestamp = timestamp;
        }

        match leg.side {
            LegSide::In => {
                let (Some(prev_txid), Some(prev_index)) = (leg.prev_txid, leg.prev_index) else {
                    bail!("Line {}: input of {} has no prev_txid/prev_index", line, leg.txid);
                };
                tx.inputs.push(TxInput {
                    address: Address::new(leg.address),
                    amount: leg.amount,
                    spends: TxRef::new(prev_txid, prev_index),
                });
            }
            LegSide::Out => tx.outputs.push(TxOutput {
                index: leg.n,
                address: Address::new(leg.address),
                amount: leg.amount,
            }),
        }
    }

    for tx in &mut transactions {
        tx.outputs.sort_by_key(|o| o.index);
    }

    tracing::info!(path = ?csv_path, transactions = transactions.len(), "loaded transaction legs");
    Ok(transactions)
}

/// One address per line; a leading `address` header line is skipped
pub fn load_addresses_csv(csv_path: &Path) -> Result<Vec<Address>> {
    let mut rdr = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(csv_path)
        .with_context(|| format!("Failed to open address file: {:?}", csv_path))?;

    let mut addresses = Vec::new();
    for result in rdr.records() {
        let record = result.context("Failed to read address line")?;
        let Some(field) = record.get(0).map(str::trim) else {
            continue;
        };
        if field.is_empty() || field.eq_ignore_ascii_case("address") {
            continue;
        }
        addresses.push(Address::from(field));
    }

    Ok(addresses)
}

// ============================================================================
// WRITES
// ============================================================================

/// Insert transactions with their legs. Transactions already stored (same
/// txid) are skipped. Returns the number inserted.
pub fn insert_transactions(conn: &Connection, transactions: &[Transaction]) -> Result<usize> {
    let mut inserted = 0;
    let mut duplicates = 0;

    let db_tx = conn.unchecked_transaction()?;

    for tx in transactions {
        let result = db_tx.execute(
            "INSERT INTO transactions (txid, timestamp) VALUES (?1, ?2)",
            params![tx.txid, tx.timestamp.as_ref().map(format_timestamp)],
        );

        match result {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(err, _))
                if err.code == rusqlite::ErrorCode::ConstraintViolation =>
            {
                duplicates += 1;
                continue;
            }
            Err(e) => return Err(e.into()),
        }

        for (position, input) in tx.inputs.iter().enumerate() {
            db_tx
                .execute(
                    "INSERT INTO tx_inputs (txid, position, address, amount, prev_txid, prev_index)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                    params![
                        tx.txid,
                        position as i64,
                        input.address.as_str(),
                        input.amount,
                        input.spends.txid,
                        input.spends.index,
                    ],
                )
                .with_context(|| format!("Failed to store input {} of {}", position, tx.txid))?;
        }

        for output in &tx.outputs {
            db_tx
                .execute(
                    "INSERT INTO tx_outputs (txid, n, address, amount) VALUES (?1, ?2, ?3, ?4)",
                    params![tx.txid, output.index, output.address.as_str(), output.amount],
                )
                .with_context(|| format!("Failed to store output {} of {}", output.index, tx.txid))?;
        }

        inserted += 1;

        let event = Event::new(
            "transaction_added",
            "transaction",
            &tx.txid,
            serde_json::json!({
                "inputs": tx.inputs.len(),
                "outputs": tx.outputs.len(),
                "fee": tx.fee(),
            }),
            "csv_importer",
        );
        insert_event(&db_tx, &event)?;
    }

    db_tx.commit()?;

    tracing::info!(inserted, duplicates, "transactions stored");
    Ok(inserted)
}

/// Returns the number of addresses that were new
pub fn insert_wallet_addresses<'a, I>(conn: &Connection, addresses: I) -> Result<usize>
where
    I: IntoIterator<Item = &'a Address>,
{
    let mut added = 0;
    for address in addresses {
        added += conn.execute(
            "INSERT OR IGNORE INTO wallet_addresses (address) VALUES (?1)",
            params![address.as_str()],
        )?;
    }

    if added > 0 {
        let event = Event::new(
            "addresses_added",
            "wallet",
            "wallet",
            serde_json::json!({ "added": added }),
            "address_importer",
        );
        insert_event(conn, &event)?;
    }

    Ok(added)
}

/// Insert event into audit trail
pub fn insert_event(conn: &Connection, event: &Event) -> Result<()> {
    let data_json = serde_json::to_string(&event.data)?;

    conn.execute(
        "INSERT INTO events (
            event_id, timestamp, event_type, entity_type, entity_id, data, actor
        ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;

    Ok(())
}

// ============================================================================
// READS
// ============================================================================

/// Get events for a specific entity, newest first
pub fn get_events(conn: &Connection, entity_type: &str, entity_id: &str) -> Result<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC",
    )?;

    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            let timestamp_str: String = row.get(1)?;
            let data_json: String = row.get(5)?;

            Ok(Event {
                event_id: row.get(0)?,
                timestamp: parse_timestamp(1, &timestamp_str)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: serde_json::from_str(&data_json)
                    .map_err(|e| rusqlite::Error::FromSqlConversionFailure(5, Type::Text, Box::new(e)))?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(events)
}

pub fn load_wallet(conn: &Connection, name: &str) -> Result<WalletAddressSet> {
    let mut stmt = conn.prepare("SELECT address FROM wallet_addresses ORDER BY address")?;
    let addresses = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;

    Ok(WalletAddressSet::with_addresses(name, addresses))
}

/// All stored transactions, oldest first; unconfirmed ones last
pub fn load_transactions(conn: &Connection) -> Result<Vec<Transaction>> {
    let mut inputs: HashMap<String, Vec<TxInput>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT txid, address, amount, prev_txid, prev_index
             FROM tx_inputs
             ORDER BY txid, position",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                TxInput {
                    address: Address::new(row.get::<_, String>(1)?),
                    amount: row.get(2)?,
                    spends: TxRef::new(row.get::<_, String>(3)?, row.get::<_, u32>(4)?),
                },
            ))
        })?;
        for row in rows {
            let (txid, input) = row?;
            inputs.entry(txid).or_default().push(input);
        }
    }

    let mut outputs: HashMap<String, Vec<TxOutput>> = HashMap::new();
    {
        let mut stmt = conn.prepare(
            "SELECT txid, n, address, amount
             FROM tx_outputs
             ORDER BY txid, n",
        )?;
        let rows = stmt.query_map([], |row| {
            Ok((
                row.get::<_, String>(0)?,
                TxOutput {
                    index: row.get(1)?,
                    address: Address::new(row.get::<_, String>(2)?),
                    amount: row.get(3)?,
                },
            ))
        })?;
        for row in rows {
            let (txid, output) = row?;
            outputs.entry(txid).or_default().push(output);
        }
    }

    let mut stmt = conn.prepare(
        "SELECT txid, timestamp
         FROM transactions
         ORDER BY timestamp IS NULL, timestamp, id",
    )?;

    let transactions: Vec<Transaction> = stmt
        .query_map([], |row| {
            let txid: String = row.get(0)?;
            let timestamp_str: Option<String> = row.get(1)?;
            let timestamp = timestamp_str
                .map(|s| parse_timestamp(1, &s))
                .transpose()?;
            Ok(Transaction::new(txid, timestamp))
        })?
        .collect::<Result<Vec<_>, _>>()?
        .into_iter()
        .map(|mut tx| {
            tx.inputs = inputs.remove(&tx.txid).unwrap_or_default();
            tx.outputs = outputs.remove(&tx.txid).unwrap_or_default();
            tx
        })
        .collect();

    Ok(transactions)
}

/// Wallet and history in one validated ledger
pub fn load_ledger(conn: &Connection, wallet_name: &str) -> Result<Ledger> {
    let wallet = load_wallet(conn, wallet_name)?;
    let transactions = load_transactions(conn)?;

    let ledger = Ledger::new(wallet, transactions).context("Stored transactions failed validation")?;
    if !ledger.is_chronological() {
        tracing::warn!("stored transactions are not in timestamp order");
    }
    Ok(ledger)
}

pub fn verify_count(conn: &Connection) -> Result<i64> {
    let count: i64 = conn.query_row("SELECT COUNT(*) FROM transactions", [], |row| row.get(0))?;

    Ok(count)
}
