use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

/// Failures reported by a [`crate::scraping::driver::PageSession`] or
/// [`crate::scraping::driver::PageDriver`].
///
/// Everything except `Navigation` is recoverable at the level of a single
/// operation; callers decide whether it ends a page loop or a station.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("navigation failed for station {station}: {reason}")]
    Navigation { station: String, reason: String },

    #[error("timed out after {}ms waiting for {what}", .after.as_millis())]
    Timeout { what: String, after: Duration },

    #[error("element not found: {0}")]
    NotFound(String),

    #[error("browser launch failed: {0}")]
    Launch(String),

    #[error("browser protocol error: {0}")]
    Protocol(String),
}

impl DriverError {
    pub fn is_timeout(&self) -> bool {
        matches!(self, DriverError::Timeout { .. })
    }
}

#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("progress ledger at {path} is unreadable or malformed: {reason}")]
    Corrupt { path: PathBuf, reason: String },

    #[error("progress ledger at {0} is locked by another running harvest")]
    Locked(PathBuf),

    #[error("progress ledger I/O on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("progress ledger serialization failed: {0}")]
    Serialize(#[from] serde_json::Error),
}
