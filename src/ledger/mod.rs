//! Change ledger: the last fingerprint and counts recorded per source.
//!
//! The ledger is advisory. A missing or stale entry only causes a redundant
//! fetch-normalize-merge cycle, never data loss.

mod memory;
mod sqlite;

pub use memory::MemoryLedger;
pub use sqlite::SqliteLedger;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::fingerprint::Digest;

/// Errors from a ledger backend.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("ledger database error: {0}")]
    Database(String),

    #[error("corrupt ledger entry for {source_name}: {reason}")]
    Corrupt { source_name: String, reason: String },
}

pub type LedgerResult<T> = Result<T, LedgerError>;

/// State recorded after a successful sync of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LedgerEntry {
    pub digest: Digest,
    /// Rows in the persisted table after the write.
    pub rows: usize,
    /// Rows the incoming table contributed that were not already persisted.
    pub added: Option<usize>,
    /// Persisted rows the incoming table no longer contains.
    pub removed: Option<usize>,
    pub updated_at: DateTime<Utc>,
}

impl LedgerEntry {
    pub fn new(digest: Digest, rows: usize) -> Self {
        Self {
            digest,
            rows,
            added: None,
            removed: None,
            updated_at: Utc::now(),
        }
    }

    pub fn with_counts(mut self, added: usize, removed: usize) -> Self {
        self.added = Some(added);
        self.removed = Some(removed);
        self
    }
}

/// Durable map of source name to its last [`LedgerEntry`].
pub trait ChangeLedger {
    /// `Ok(None)` means the source was never synced.
    fn read(&self, source: &str) -> LedgerResult<Option<LedgerEntry>>;

    /// Unconditionally replace the entry for `source`.
    fn write(&self, source: &str, entry: &LedgerEntry) -> LedgerResult<()>;
}

impl<T: ChangeLedger + ?Sized> ChangeLedger for &T {
    fn read(&self, source: &str) -> LedgerResult<Option<LedgerEntry>> {
        (**self).read(source)
    }

    fn write(&self, source: &str, entry: &LedgerEntry) -> LedgerResult<()> {
        (**self).write(source, entry)
    }
}
