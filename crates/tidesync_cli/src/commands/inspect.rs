//! Inspect command implementation.

use super::open_log;
use serde::Serialize;
use std::path::Path;
use tidesync_protocol::SyncId;
use tidesync_server::{SqliteTransactionLog, TransactionLog};

/// Log inspection result.
#[derive(Debug, Serialize)]
pub struct InspectResult {
    /// Database path.
    pub path: String,
    /// Highest assigned sync id.
    pub latest_sync_id: SyncId,
    /// Number of log entries.
    pub entry_count: usize,
    /// Number of live records.
    pub record_count: usize,
    /// Records left after a rebuild, if one ran.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rebuilt: Option<usize>,
    /// Per model type statistics.
    pub models: Vec<ModelStats>,
}

/// Statistics for a single model type.
#[derive(Debug, Serialize)]
pub struct ModelStats {
    /// Model type name.
    pub model_type: String,
    /// Number of live records.
    pub record_count: usize,
}

/// Runs the inspect command.
pub fn run(path: &Path, rebuild: bool, format: &str) -> Result<(), Box<dyn std::error::Error>> {
    let log = open_log(path)?;
    let result = inspect(&log, path, rebuild)?;

    match format {
        "json" => {
            println!("{}", serde_json::to_string_pretty(&result)?);
        }
        _ => {
            print_text_output(&result);
        }
    }

    Ok(())
}

fn inspect(
    log: &SqliteTransactionLog,
    path: &Path,
    rebuild: bool,
) -> Result<InspectResult, Box<dyn std::error::Error>> {
    let rebuilt = if rebuild {
        Some(log.rebuild_materialized()?)
    } else {
        None
    };

    let snapshot = log.snapshot()?;
    let models = snapshot
        .models
        .iter()
        .map(|(model_type, records)| ModelStats {
            model_type: model_type.clone(),
            record_count: records.len(),
        })
        .collect();

    Ok(InspectResult {
        path: path.display().to_string(),
        latest_sync_id: log.latest()?,
        entry_count: log.len()?,
        record_count: snapshot.record_count(),
        rebuilt,
        models,
    })
}

fn print_text_output(result: &InspectResult) {
    println!("TideSync Log: {}", result.path);
    println!("================");
    println!();
    println!("Latest sync id:  {}", result.latest_sync_id);
    println!("Log entries:     {}", result.entry_count);
    println!("Live records:    {}", result.record_count);
    if let Some(count) = result.rebuilt {
        println!("Rebuilt records: {}", count);
    }

    if !result.models.is_empty() {
        println!();
        println!("Models:");
        for model in &result.models {
            println!("  {:20} {}", model.model_type, model.record_count);
        }
    }
}
