//! Keyed deduplicating merge and anti-join diff.

use std::cmp::Ordering;
use std::collections::{BTreeSet, HashMap, HashSet};

use crate::models::{is_metadata_column, KeyField, Row, Table};

const UNIT_SEPARATOR: &str = "\u{1f}";

/// How two rows are judged to be the same fixture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompositeKey {
    /// Key fields present on both sides, in priority order.
    Fields(Vec<KeyField>),
    /// No key field other than season is shared: every non-metadata column
    /// of the union, sorted.
    FullRow(Vec<String>),
}

impl CompositeKey {
    /// Key for comparing `a` with `b`. A side without any columns does not
    /// restrict the key fields.
    pub fn for_tables(a: &Table, b: &Table) -> Self {
        let sides: Vec<&Table> = [a, b]
            .into_iter()
            .filter(|t| !t.columns().is_empty())
            .collect();

        let fields: Vec<KeyField> = KeyField::ALL
            .into_iter()
            .filter(|f| !sides.is_empty() && sides.iter().all(|t| t.has_key(*f)))
            .collect();
        // Season alone does not identify a row (league tables, squad stats).
        if fields.iter().any(|f| *f != KeyField::Season) {
            return CompositeKey::Fields(fields);
        }

        let columns: BTreeSet<&String> = sides
            .iter()
            .flat_map(|t| t.columns())
            .filter(|c| !is_metadata_column(c))
            .collect();
        CompositeKey::FullRow(columns.into_iter().cloned().collect())
    }

    /// Identity string of `row` under this key. Missing cells are empty.
    pub fn key_of(&self, row: &Row) -> String {
        let cells: Vec<&str> = match self {
            CompositeKey::Fields(fields) => {
                fields.iter().map(|f| row.key(*f).unwrap_or("")).collect()
            }
            CompositeKey::FullRow(columns) => {
                columns.iter().map(|c| row.get(c).unwrap_or("")).collect()
            }
        };
        cells.join(UNIT_SEPARATOR)
    }
}

/// Missing values sort after present ones.
fn cmp_missing_last(a: Option<&str>, b: Option<&str>) -> Ordering {
    match (a, b) {
        (Some(a), Some(b)) => a.cmp(b),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    }
}

/// Drop duplicate keys keeping the last occurrence in place, then stable-sort
/// by the sort fields the table carries.
pub fn dedup_sorted(table: Table, key: &CompositeKey) -> Table {
    let columns = table.columns().to_vec();
    let sort_fields: Vec<KeyField> = KeyField::SORT
        .into_iter()
        .filter(|f| table.has_key(*f))
        .collect();

    let rows = table.into_rows();
    let keys: Vec<String> = rows.iter().map(|r| key.key_of(r)).collect();
    let last: HashMap<&str, usize> = keys
        .iter()
        .enumerate()
        .map(|(i, k)| (k.as_str(), i))
        .collect();

    let mut kept: Vec<Row> = rows
        .into_iter()
        .enumerate()
        .filter(|(i, _)| last.get(keys[*i].as_str()) == Some(i))
        .map(|(_, row)| row)
        .collect();

    kept.sort_by(|a, b| {
        sort_fields
            .iter()
            .map(|f| cmp_missing_last(a.key(*f), b.key(*f)))
            .find(|o| o.is_ne())
            .unwrap_or(Ordering::Equal)
    });

    Table::from_parts(columns, kept)
}

/// Merge `incoming` into `existing`. Incoming rows win on key collisions.
pub fn merge(existing: Table, incoming: Table) -> Table {
    let key = CompositeKey::for_tables(&existing, &incoming);
    merge_by(existing, incoming, &key)
}

/// [`merge`] with an explicit key.
pub fn merge_by(existing: Table, incoming: Table, key: &CompositeKey) -> Table {
    dedup_sorted(Table::concat([existing, incoming]), key)
}

/// Rows of `a` whose key does not occur in `b`.
pub fn diff(a: &Table, b: &Table) -> Table {
    let key = CompositeKey::for_tables(a, b);
    let seen: HashSet<String> = b.rows().iter().map(|r| key.key_of(r)).collect();
    let rows = a
        .rows()
        .iter()
        .filter(|r| !seen.contains(&key.key_of(r)))
        .cloned()
        .collect();
    Table::from_parts(a.columns().to_vec(), rows)
}
