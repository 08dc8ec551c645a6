//! CLI command implementations.

pub mod dump_log;
pub mod inspect;
pub mod serve;

use std::path::Path;
use tidesync_server::SqliteTransactionLog;

/// Opens an existing server database.
pub fn open_log(path: &Path) -> Result<SqliteTransactionLog, Box<dyn std::error::Error>> {
    if !path.exists() {
        return Err(format!("No database found at {:?}", path).into());
    }
    Ok(SqliteTransactionLog::open(path)?)
}
