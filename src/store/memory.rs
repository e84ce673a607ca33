//! In-memory table store for tests and dry runs.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use super::{stem_of, StoreError, TableStore};
use crate::codec;
use crate::models::Table;

/// Keeps serialized tables in memory so that unreadable content can be simulated.
#[derive(Debug, Default)]
pub struct MemoryTableStore {
    tables: Mutex<BTreeMap<String, Vec<u8>>>,
    writes: Mutex<usize>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl MemoryTableStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store raw bytes under `name`, bypassing serialization.
    pub fn insert_raw(&self, name: &str, bytes: impl Into<Vec<u8>>) {
        lock(&self.tables).insert(name.to_string(), bytes.into());
    }

    /// Number of successful `save` calls.
    pub fn writes(&self) -> usize {
        *lock(&self.writes)
    }
}

impl TableStore for MemoryTableStore {
    fn load(&self, name: &str) -> Result<Option<Table>, StoreError> {
        match lock(&self.tables).get(name) {
            Some(bytes) => codec::read_persisted(bytes, stem_of(name))
                .map(Some)
                .map_err(|source| StoreError::Unreadable {
                    name: name.to_string(),
                    source,
                }),
            None => Ok(None),
        }
    }

    fn save(&self, name: &str, table: &Table) -> Result<(), StoreError> {
        if name.is_empty() {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        lock(&self.tables).insert(name.to_string(), codec::table_to_csv(table));
        *lock(&self.writes) += 1;
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        Ok(lock(&self.tables).keys().cloned().collect())
    }
}
