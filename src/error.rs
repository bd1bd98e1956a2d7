use crate::domain::request::RequestId;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, LedgerError>;

/// Errors surfaced by the settlement engine and the ledger store.
///
/// The `Display` strings double as the per-item failure reasons reported by
/// bulk processing, so they stay short and stable.
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Request not found: {0}")]
    NotFound(RequestId),
    #[error("Not authorized")]
    Unauthorized,
    #[error("Already processed")]
    AlreadyProcessed,
    #[error("Insufficient balance: recipient {resource} would go negative")]
    InsufficientBalance { resource: &'static str },
    #[error("Authentication required")]
    Unauthenticated,
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Store failure: {0}")]
    StoreFailure(String),
    #[error("CSV error: {0}")]
    CsvError(#[from] csv::Error),
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
    #[cfg(feature = "storage-rocksdb")]
    #[error("Storage error: {0}")]
    RocksDbError(#[from] rocksdb::Error),
}
