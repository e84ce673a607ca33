//! Persisted table storage.
//!
//! Tables are addressed by a relative name such as `E0_2425.csv` or
//! `25-26/ENG-Premier_League/league_schedule.csv`.

mod fs;
mod memory;

pub use fs::FsTableStore;
pub use memory::MemoryTableStore;

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::codec::ParseError;
use crate::models::Table;

/// Errors from a table store.
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error on {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("table {name} is unreadable: {source}")]
    Unreadable {
        name: String,
        #[source]
        source: ParseError,
    },

    #[error("invalid table name: {0}")]
    InvalidName(String),
}

/// Durable map of table name to table.
pub trait TableStore {
    /// Load a table. `Ok(None)` when it has never been written.
    fn load(&self, name: &str) -> Result<Option<Table>, StoreError>;

    /// Replace a table atomically: readers see the old or the new table, never a mix.
    fn save(&self, name: &str, table: &Table) -> Result<(), StoreError>;

    /// Names of all stored tables, sorted.
    fn list(&self) -> Result<Vec<String>, StoreError>;
}

impl<T: TableStore + ?Sized> TableStore for &T {
    fn load(&self, name: &str) -> Result<Option<Table>, StoreError> {
        (**self).load(name)
    }

    fn save(&self, name: &str, table: &Table) -> Result<(), StoreError> {
        (**self).save(name, table)
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        (**self).list()
    }
}

/// Provenance fallback for rows read from a table: the file stem.
pub(crate) fn stem_of(name: &str) -> &str {
    let file = name.rsplit('/').next().unwrap_or(name);
    file.strip_suffix(".csv").unwrap_or(file)
}
