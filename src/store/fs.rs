//! Filesystem table store: one CSV file per table under a root directory.

use std::fs;
use std::io::{self, Write};
use std::path::{Component, Path, PathBuf};

use tempfile::NamedTempFile;
use tracing::debug;

use super::{stem_of, StoreError, TableStore};
use crate::codec;
use crate::models::Table;

/// CSV files under `root`, replaced atomically on save.
#[derive(Debug, Clone)]
pub struct FsTableStore {
    root: PathBuf,
}

impl FsTableStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a table name, rejecting anything that escapes the root.
    pub fn path_for(&self, name: &str) -> Result<PathBuf, StoreError> {
        let rel = Path::new(name);
        let safe = !name.is_empty()
            && rel
                .components()
                .all(|c| matches!(c, Component::Normal(_)));
        if !safe {
            return Err(StoreError::InvalidName(name.to_string()));
        }
        Ok(self.root.join(rel))
    }

    fn collect(&self, dir: &Path, out: &mut Vec<String>) -> Result<(), StoreError> {
        let entries = fs::read_dir(dir).map_err(|source| StoreError::Io {
            path: dir.to_path_buf(),
            source,
        })?;
        for entry in entries {
            let entry = entry.map_err(|source| StoreError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
            let path = entry.path();
            if path.is_dir() {
                self.collect(&path, out)?;
            } else if path.extension().and_then(|e| e.to_str()) == Some("csv") {
                if let Ok(rel) = path.strip_prefix(&self.root) {
                    let name: Vec<String> = rel
                        .components()
                        .map(|c| c.as_os_str().to_string_lossy().into_owned())
                        .collect();
                    out.push(name.join("/"));
                }
            }
        }
        Ok(())
    }
}

impl TableStore for FsTableStore {
    fn load(&self, name: &str) -> Result<Option<Table>, StoreError> {
        let path = self.path_for(name)?;
        let bytes = match fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(source) => return Err(StoreError::Io { path, source }),
        };
        codec::read_persisted(&bytes, stem_of(name))
            .map(Some)
            .map_err(|source| StoreError::Unreadable {
                name: name.to_string(),
                source,
            })
    }

    fn save(&self, name: &str, table: &Table) -> Result<(), StoreError> {
        let path = self.path_for(name)?;
        let parent = path.parent().unwrap_or(&self.root).to_path_buf();
        let io_err = |source| StoreError::Io {
            path: path.clone(),
            source,
        };

        fs::create_dir_all(&parent).map_err(io_err)?;

        // Write beside the target so the final rename stays on one filesystem.
        let mut tmp = NamedTempFile::new_in(&parent).map_err(io_err)?;
        tmp.write_all(&codec::table_to_csv(table)).map_err(io_err)?;
        tmp.as_file().sync_all().map_err(io_err)?;
        tmp.persist(&path).map_err(|e| io_err(e.error))?;

        debug!("Wrote {} rows to {}", table.len(), path.display());
        Ok(())
    }

    fn list(&self) -> Result<Vec<String>, StoreError> {
        if !self.root.exists() {
            return Ok(Vec::new());
        }
        let mut names = Vec::new();
        self.collect(&self.root, &mut names)?;
        names.sort();
        Ok(names)
    }
}
