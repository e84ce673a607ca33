//! Domain models for sources and tables.

mod source;
mod table;

pub use source::{
    path_segment, Credential, SourceDescriptor, SourceKind, TableSelection, SEASON_PLACEHOLDER,
    SEASON_SPAN_PLACEHOLDER, TABLE_PLACEHOLDER, TEAM_ID_PLACEHOLDER, TEAM_PLACEHOLDER,
};
pub use table::{
    is_metadata_column, KeyField, RawTable, Row, Table, FETCHED_AT_COLUMN, SOURCE_COLUMN,
};
