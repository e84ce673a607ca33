//! SQLite-backed change ledger.

use std::path::Path;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;

use super::{ChangeLedger, LedgerEntry, LedgerError, LedgerResult};
use crate::fingerprint::Digest;

fn db_err(e: rusqlite::Error) -> LedgerError {
    LedgerError::Database(e.to_string())
}

/// One row per source in the `sync_ledger` table.
pub struct SqliteLedger {
    conn: Mutex<Connection>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at `db_path`.
    pub fn open(db_path: &Path) -> LedgerResult<Self> {
        if let Some(parent) = db_path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent)
                .map_err(|e| LedgerError::Database(format!("{}: {}", parent.display(), e)))?;
        }
        let conn = Connection::open(db_path).map_err(db_err)?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(db_err)?;
        conn.busy_timeout(Duration::from_secs(5)).map_err(db_err)?;

        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_tables()?;
        debug!("Opened ledger at {}", db_path.display());
        Ok(ledger)
    }

    /// In-memory database, mostly for tests.
    pub fn open_in_memory() -> LedgerResult<Self> {
        let conn = Connection::open_in_memory().map_err(db_err)?;
        let ledger = Self {
            conn: Mutex::new(conn),
        };
        ledger.init_tables()?;
        Ok(ledger)
    }

    fn lock(&self) -> LedgerResult<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| LedgerError::Database("ledger connection lock poisoned".to_string()))
    }

    fn init_tables(&self) -> LedgerResult<()> {
        let conn = self.lock()?;

        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS sync_ledger (
                source TEXT PRIMARY KEY,
                digest TEXT NOT NULL,
                rows INTEGER NOT NULL,
                added INTEGER,
                removed INTEGER,
                updated_at TEXT NOT NULL
            );
        "#,
        )
        .map_err(db_err)?;

        Ok(())
    }
}

impl ChangeLedger for SqliteLedger {
    fn read(&self, source: &str) -> LedgerResult<Option<LedgerEntry>> {
        let conn = self.lock()?;

        let row = conn
            .query_row(
                "SELECT digest, rows, added, removed, updated_at
                 FROM sync_ledger WHERE source = ?",
                params![source],
                |row| {
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, i64>(1)?,
                        row.get::<_, Option<i64>>(2)?,
                        row.get::<_, Option<i64>>(3)?,
                        row.get::<_, String>(4)?,
                    ))
                },
            )
            .optional()
            .map_err(db_err)?;

        let Some((digest, rows, added, removed, updated_at)) = row else {
            return Ok(None);
        };

        let corrupt = |reason: String| LedgerError::Corrupt {
            source_name: source.to_string(),
            reason,
        };
        let updated_at = DateTime::parse_from_rfc3339(&updated_at)
            .map_err(|e| corrupt(format!("updated_at {:?}: {}", updated_at, e)))?
            .with_timezone(&Utc);
        let count = |v: i64| usize::try_from(v).map_err(|_| corrupt(format!("negative count {}", v)));

        Ok(Some(LedgerEntry {
            digest: Digest::from_hex(digest),
            rows: count(rows)?,
            added: added.map(count).transpose()?,
            removed: removed.map(count).transpose()?,
            updated_at,
        }))
    }

    fn write(&self, source: &str, entry: &LedgerEntry) -> LedgerResult<()> {
        let conn = self.lock()?;

        conn.execute(
            r#"INSERT OR REPLACE INTO sync_ledger
                (source, digest, rows, added, removed, updated_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
            params![
                source,
                entry.digest.as_str(),
                entry.rows as i64,
                entry.added.map(|n| n as i64),
                entry.removed.map(|n| n as i64),
                entry.updated_at.to_rfc3339(),
            ],
        )
        .map_err(db_err)?;

        Ok(())
    }
}
