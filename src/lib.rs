//! matchsync - incremental synchronization of tabular sports data.
//!
//! Sources (CSV endpoints, HTML stats pages, odds APIs) are fetched,
//! fingerprinted against a change ledger, normalized into canonical rows and
//! merged into persisted per-source tables. A master table is rebuilt from
//! all persisted tables on every run.

pub mod codec;
pub mod config;
pub mod fingerprint;
pub mod ledger;
pub mod models;
pub mod scrapers;
pub mod season;
pub mod store;
pub mod sync;
