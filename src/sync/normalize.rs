//! Raw tabular block to canonical rows.

use chrono::{DateTime, NaiveDate};

use crate::models::{KeyField, RawTable, Row, SourceDescriptor, Table, SOURCE_COLUMN};
use crate::season::{find_season, infer_season};

/// Lowercased header spellings for each key field.
const ALIASES: [(KeyField, &[&str]); 4] = [
    (KeyField::Season, &["season"]),
    (KeyField::Date, &["date", "match_date"]),
    (KeyField::Home, &["home", "hometeam", "home_team"]),
    (KeyField::Away, &["away", "awayteam", "away_team"]),
];

/// Where a raw column ends up.
#[derive(Debug, Clone, PartialEq, Eq)]
enum Target {
    Key(KeyField),
    Extra(String),
    Drop,
}

fn is_junk_header(name: &str) -> bool {
    name.is_empty() || name.starts_with("Unnamed") || name == SOURCE_COLUMN
}

fn column_targets(columns: &[String]) -> Vec<Target> {
    let mut claimed: Vec<KeyField> = Vec::new();
    columns
        .iter()
        .map(|column| {
            let name = column.trim();
            if is_junk_header(name) {
                return Target::Drop;
            }
            let lower = name.to_ascii_lowercase();
            let field = ALIASES
                .iter()
                .find(|(_, aliases)| aliases.contains(&lower.as_str()))
                .map(|(field, _)| *field);
            match field {
                Some(field) if !claimed.contains(&field) => {
                    claimed.push(field);
                    Target::Key(field)
                }
                // A second alias for a claimed field keeps its header, unless
                // that header would shadow the canonical column.
                Some(field) if name == field.column() => Target::Extra(format!("{}.1", name)),
                _ => Target::Extra(name.to_string()),
            }
        })
        .collect()
}

fn collapse_whitespace(value: &str) -> String {
    value.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Render a date as `YYYY-MM-DD` when it matches a known format.
/// Anything else comes back trimmed.
pub fn coerce_date(value: &str) -> String {
    let value = collapse_whitespace(value);
    let parsed = if let Ok(dt) = DateTime::parse_from_rfc3339(&value) {
        Some(dt.date_naive())
    } else if value.contains('-') {
        NaiveDate::parse_from_str(&value, "%Y-%m-%d").ok()
    } else {
        let parts: Vec<&str> = value.split('/').collect();
        match parts.as_slice() {
            [y, _, _] if y.len() == 4 => NaiveDate::parse_from_str(&value, "%Y/%m/%d").ok(),
            [_, _, y] if y.len() == 2 => NaiveDate::parse_from_str(&value, "%d/%m/%y").ok(),
            [_, _, y] if y.len() == 4 => NaiveDate::parse_from_str(&value, "%d/%m/%Y").ok(),
            _ => None,
        }
    };
    match parsed {
        Some(date) => date.format("%Y-%m-%d").to_string(),
        None => value,
    }
}

fn coerce_key(field: KeyField, value: &str) -> String {
    match field {
        KeyField::Date => coerce_date(value),
        KeyField::Season => {
            let value = collapse_whitespace(value);
            find_season(&value).unwrap_or(value)
        }
        KeyField::Home | KeyField::Away => collapse_whitespace(value),
    }
}

/// Map a raw table onto canonical rows for `source`.
///
/// Key fields are coerced to one comparable form, absent seasons are inferred
/// from the source's season code or output name, and every row is tagged with
/// the source name. Spacer rows are dropped. An empty input yields an empty
/// table.
pub fn normalize(raw: &RawTable, source: &SourceDescriptor) -> Table {
    if raw.is_empty() {
        return Table::empty();
    }

    let targets = column_targets(&raw.columns);
    let identifier = match source.season_identifier() {
        "" => source.locator.as_str(),
        id => id,
    };
    let fallback_season = infer_season(identifier);

    let mut columns: Vec<String> = Vec::new();
    for target in &targets {
        match target {
            Target::Key(field) => columns.push(field.column().to_string()),
            Target::Extra(name) => columns.push(name.clone()),
            Target::Drop => {}
        }
    }

    let mut rows = Vec::with_capacity(raw.len());
    for cells in &raw.rows {
        let mut row = Row::new(source.name.as_str());
        for (target, cell) in targets.iter().zip(cells) {
            if cell.trim().is_empty() {
                continue;
            }
            match target {
                Target::Key(field) => row.set_key(*field, Some(coerce_key(*field, cell))),
                Target::Extra(name) => row.set(name, cell.clone()),
                Target::Drop => {}
            }
        }
        if row.is_blank() {
            continue;
        }
        if row.season.is_none() {
            row.season = Some(fallback_season.clone());
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Table::empty();
    }
    columns.push(KeyField::Season.column().to_string());
    Table::from_parts(columns, rows)
}
