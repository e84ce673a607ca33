//! Canonical rows and tables.
//!
//! A [`Row`] carries the four key fields used to identify a fixture, a
//! provenance tag, and an open map of passthrough fields. A [`Table`] keeps
//! the ordered union of columns seen across its rows.

use std::collections::{BTreeMap, BTreeSet};

/// Provenance column. Always present on persisted rows, never part of a key.
pub const SOURCE_COLUMN: &str = "_source";

/// Fetch timestamp column stamped on freshly synchronized rows.
pub const FETCHED_AT_COLUMN: &str = "_fetched_at";

/// Metadata columns start with an underscore and never take part in row identity.
pub fn is_metadata_column(name: &str) -> bool {
    name.starts_with('_')
}

/// Key fields in their fixed priority order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyField {
    Season,
    Date,
    Home,
    Away,
}

impl KeyField {
    pub const ALL: [KeyField; 4] = [
        KeyField::Season,
        KeyField::Date,
        KeyField::Home,
        KeyField::Away,
    ];

    /// Fields used for ordering, in sort priority.
    pub const SORT: [KeyField; 2] = [KeyField::Season, KeyField::Date];

    pub fn column(self) -> &'static str {
        match self {
            KeyField::Season => "season",
            KeyField::Date => "date",
            KeyField::Home => "home",
            KeyField::Away => "away",
        }
    }

    pub fn from_column(name: &str) -> Option<Self> {
        match name {
            "season" => Some(KeyField::Season),
            "date" => Some(KeyField::Date),
            "home" => Some(KeyField::Home),
            "away" => Some(KeyField::Away),
            _ => None,
        }
    }
}

/// One canonical row.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Row {
    pub season: Option<String>,
    pub date: Option<String>,
    pub home: Option<String>,
    pub away: Option<String>,
    /// Originating source identifier.
    pub source: String,
    /// Passthrough fields keyed by column name.
    pub extra: BTreeMap<String, String>,
}

impl Row {
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            ..Default::default()
        }
    }

    pub fn key(&self, field: KeyField) -> Option<&str> {
        match field {
            KeyField::Season => self.season.as_deref(),
            KeyField::Date => self.date.as_deref(),
            KeyField::Home => self.home.as_deref(),
            KeyField::Away => self.away.as_deref(),
        }
    }

    pub fn set_key(&mut self, field: KeyField, value: Option<String>) {
        let value = value.filter(|v| !v.is_empty());
        match field {
            KeyField::Season => self.season = value,
            KeyField::Date => self.date = value,
            KeyField::Home => self.home = value,
            KeyField::Away => self.away = value,
        }
    }

    /// Builder-style variant of [`Row::set_key`].
    pub fn with_key(mut self, field: KeyField, value: &str) -> Self {
        self.set_key(field, Some(value.to_string()));
        self
    }

    /// Builder-style variant of [`Row::set`].
    pub fn with(mut self, column: &str, value: &str) -> Self {
        self.set(column, value.to_string());
        self
    }

    /// Look up any column, canonical or passthrough. Missing and empty are the same.
    pub fn get(&self, column: &str) -> Option<&str> {
        if let Some(field) = KeyField::from_column(column) {
            return self.key(field);
        }
        if column == SOURCE_COLUMN {
            return Some(self.source.as_str());
        }
        self.extra.get(column).map(String::as_str)
    }

    /// Set any column. An empty value clears it.
    pub fn set(&mut self, column: &str, value: String) {
        if let Some(field) = KeyField::from_column(column) {
            self.set_key(field, Some(value));
        } else if column == SOURCE_COLUMN {
            self.source = value;
        } else if value.is_empty() {
            self.extra.remove(column);
        } else {
            self.extra.insert(column.to_string(), value);
        }
    }

    /// Names of the columns this row carries a value for.
    pub fn present_columns(&self) -> impl Iterator<Item = &str> + '_ {
        KeyField::ALL
            .into_iter()
            .filter(|f| self.key(*f).is_some())
            .map(|f| -> &str { f.column() })
            .chain(self.extra.keys().map(String::as_str))
    }

    /// True when no key or passthrough field holds a value.
    pub fn is_blank(&self) -> bool {
        KeyField::ALL.iter().all(|f| self.key(*f).is_none())
            && self.extra.values().all(|v| v.trim().is_empty())
    }
}

/// Ordered rows sharing a column union.
///
/// Column layout: key columns in [`KeyField`] order, then passthrough columns
/// in first-seen order, then [`SOURCE_COLUMN`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Table {
    columns: Vec<String>,
    rows: Vec<Row>,
}

impl Table {
    /// A table with no columns and no rows.
    pub fn empty() -> Self {
        Self::default()
    }

    /// An empty table that already declares its columns.
    pub fn with_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut table = Self::empty();
        for column in columns {
            table.add_column(column.as_ref());
        }
        table
    }

    /// Build a table from declared columns and rows. Columns carried by the
    /// rows are added to the union.
    pub fn from_parts(columns: Vec<String>, rows: Vec<Row>) -> Self {
        let mut table = Self::with_columns(columns);
        for row in rows {
            table.push(row);
        }
        table
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Row] {
        &self.rows
    }

    pub fn into_rows(self) -> Vec<Row> {
        self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    pub fn has_key(&self, field: KeyField) -> bool {
        self.has_column(field.column())
    }

    /// Insert a column at its layout position. No-op if already present.
    pub fn add_column(&mut self, name: &str) {
        if self.has_column(name) {
            return;
        }
        let pos = match KeyField::from_column(name) {
            Some(field) => self
                .columns
                .iter()
                .take_while(|c| KeyField::from_column(c).is_some_and(|f| f < field))
                .count(),
            None if name == SOURCE_COLUMN => self.columns.len(),
            None => self
                .columns
                .iter()
                .position(|c| c == SOURCE_COLUMN)
                .unwrap_or(self.columns.len()),
        };
        self.columns.insert(pos, name.to_string());
    }

    /// Append a row, extending the column union with whatever it carries.
    pub fn push(&mut self, row: Row) {
        let present: Vec<String> = row.present_columns().map(str::to_string).collect();
        for column in &present {
            self.add_column(column);
        }
        self.add_column(SOURCE_COLUMN);
        self.rows.push(row);
    }

    /// Set `column` to `value` on every row.
    pub fn stamp(&mut self, column: &str, value: &str) {
        if self.rows.is_empty() {
            return;
        }
        self.add_column(column);
        for row in &mut self.rows {
            row.set(column, value.to_string());
        }
    }

    /// Concatenate tables, keeping row order and the union of columns.
    pub fn concat<I>(tables: I) -> Table
    where
        I: IntoIterator<Item = Table>,
    {
        let mut out = Table::empty();
        for table in tables {
            for column in &table.columns {
                out.add_column(column);
            }
            out.rows.extend(table.rows);
        }
        out
    }

    /// Cell values in column order; missing cells are empty strings.
    pub fn cells<'a>(&'a self, row: &'a Row) -> impl Iterator<Item = &'a str> + 'a {
        self.columns.iter().map(move |c| row.get(c).unwrap_or(""))
    }
}

/// A tabular block as extracted from a source, before normalization.
///
/// Row-major; every row is padded or truncated to the header width.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RawTable {
    pub columns: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl RawTable {
    /// Build a raw table, making duplicate header names unique (`xG`, `xG.1`).
    pub fn new(headers: Vec<String>, rows: Vec<Vec<String>>) -> Self {
        let columns = dedupe_headers(headers);
        let width = columns.len();
        let rows = rows
            .into_iter()
            .map(|mut r| {
                r.resize(width, String::new());
                r
            })
            .collect();
        Self { columns, rows }
    }

    pub fn width(&self) -> usize {
        self.columns.len()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c == name)
    }

    /// All values of one column, top to bottom.
    pub fn column(&self, name: &str) -> Option<Vec<&str>> {
        let idx = self.columns.iter().position(|c| c == name)?;
        Some(self.rows.iter().map(|r| r[idx].as_str()).collect())
    }
}

fn dedupe_headers(headers: Vec<String>) -> Vec<String> {
    let headers: Vec<String> = headers.into_iter().map(|h| h.trim().to_string()).collect();
    let mut taken: BTreeSet<String> = headers.iter().cloned().collect();
    let mut emitted: BTreeSet<String> = BTreeSet::new();
    let mut next: BTreeMap<String, usize> = BTreeMap::new();
    let mut out = Vec::with_capacity(headers.len());
    for header in headers {
        if header.is_empty() || emitted.insert(header.clone()) {
            out.push(header);
            continue;
        }
        // Suffixes already used by a literal header or an earlier rename are skipped.
        let n = next.entry(header.clone()).or_insert(1);
        let renamed = loop {
            let candidate = format!("{}.{}", header, n);
            *n += 1;
            if !taken.contains(&candidate) {
                break candidate;
            }
        };
        taken.insert(renamed.clone());
        emitted.insert(renamed.clone());
        out.push(renamed);
    }
    out
}
