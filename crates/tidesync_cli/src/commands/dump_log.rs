//! Dump log command implementation.

use super::open_log;
use std::path::Path;
use tidesync_protocol::{LogEntry, SyncId};
use tidesync_server::{SqliteTransactionLog, TransactionLog};

/// Runs the dump-log command.
pub fn run(
    path: &Path,
    from: SyncId,
    to: Option<SyncId>,
    format: &str,
) -> Result<(), Box<dyn std::error::Error>> {
    let log = open_log(path)?;
    let entries = read_entries(&log, from, to)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        _ => {
            print_text_output(&entries);
        }
    }

    Ok(())
}

fn read_entries(
    log: &SqliteTransactionLog,
    from: SyncId,
    to: Option<SyncId>,
) -> Result<Vec<LogEntry>, Box<dyn std::error::Error>> {
    Ok(log.query(from.max(1), to)?)
}

fn print_text_output(entries: &[LogEntry]) {
    println!("Log Entries ({} total)", entries.len());
    println!("================");
    println!();

    for entry in entries {
        println!("{}", format_entry(entry));
    }
}

fn format_entry(entry: &LogEntry) -> String {
    let tx = &entry.transaction;
    let mut line = format!(
        "[{:08}] {:6} {}/{}",
        entry.sync_id, tx.action, tx.model_type, tx.record_id
    );
    if let Some(tx_id) = &tx.tx_id {
        line.push_str(&format!(" txId={}", tx_id));
    }
    if tx.action.is_upsert() {
        line.push_str(&format!(" data={}", tx.data));
    }
    line
}
