//! The incremental synchronization engine.
//!
//! [`normalize`] maps raw blocks onto canonical rows, [`merge`] and [`diff`]
//! apply keyed set logic to tables, [`Synchronizer`] drives one source at a
//! time, and [`consolidate`] rebuilds the master table.

mod consolidate;
mod engine;
mod merge;
mod normalize;

pub use consolidate::{
    consolidate, consolidate_tables, ConsolidateOptions, ConsolidationReport, SkippedTable,
    DEFAULT_MASTER,
};
pub use engine::{
    extract_parts, run_failed, SyncError, SyncReport, SyncStatus, Synchronizer, TablePart,
};
pub use merge::{dedup_sorted, diff, merge, merge_by, CompositeKey};
pub use normalize::{coerce_date, normalize};
