//! Error kinds for the sync engine (§4.2, §7 "Consistency").

use thiserror::Error;

#[derive(Debug, Error)]
pub enum SyncError {
    #[error("required source missing: {0}")]
    SourceMissing(String),

    #[error("template variable unresolved: {0}")]
    TemplateUnresolved(String),

    #[error("destination escapes the live root: {0}")]
    PathEscape(String),

    #[error("io error during sync: {0}")]
    Io(#[from] std::io::Error),

    #[error("sync failed: {0}")]
    Other(#[from] anyhow::Error),
}
