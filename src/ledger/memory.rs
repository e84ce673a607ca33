use std::collections::HashMap;
use std::sync::Mutex;

use super::{ChangeLedger, LedgerEntry, LedgerError, LedgerResult};

/// Ledger held in memory. Counts writes so tests can assert on the gate.
#[derive(Debug, Default)]
pub struct MemoryLedger {
    entries: Mutex<HashMap<String, LedgerEntry>>,
    writes: Mutex<usize>,
}

impl MemoryLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn writes(&self) -> usize {
        self.writes.lock().map(|n| *n).unwrap_or_default()
    }
}

fn poisoned<T>(_: T) -> LedgerError {
    LedgerError::Database("memory ledger lock poisoned".to_string())
}

impl ChangeLedger for MemoryLedger {
    fn read(&self, source: &str) -> LedgerResult<Option<LedgerEntry>> {
        Ok(self.entries.lock().map_err(poisoned)?.get(source).cloned())
    }

    fn write(&self, source: &str, entry: &LedgerEntry) -> LedgerResult<()> {
        self.entries
            .lock()
            .map_err(poisoned)?
            .insert(source.to_string(), entry.clone());
        *self.writes.lock().map_err(poisoned)? += 1;
        Ok(())
    }
}
