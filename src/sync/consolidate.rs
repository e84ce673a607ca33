//! Full rebuild of the master table from every persisted table.

use regex::Regex;
use tracing::{debug, info, warn};

use super::merge::merge;
use crate::models::{KeyField, Table};
use crate::season::infer_season;
use crate::store::{StoreError, TableStore};

/// Default master table name.
pub const DEFAULT_MASTER: &str = "master.csv";

#[derive(Debug, Clone)]
pub struct ConsolidateOptions {
    /// Master table name. Never read back as an input.
    pub output: String,
    /// Only table names matching this pattern are consolidated.
    pub include: Option<Regex>,
}

impl Default for ConsolidateOptions {
    fn default() -> Self {
        Self {
            output: DEFAULT_MASTER.to_string(),
            include: None,
        }
    }
}

impl ConsolidateOptions {
    fn wants(&self, name: &str) -> bool {
        name != self.output && self.include.as_ref().is_none_or(|re| re.is_match(name))
    }
}

/// A persisted table left out of the master table.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SkippedTable {
    pub name: String,
    pub reason: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsolidationReport {
    /// The master table was replaced.
    Written {
        output: String,
        tables: usize,
        rows: usize,
        skipped: Vec<SkippedTable>,
    },
    /// Nothing usable was found; any previous master table is untouched.
    Nothing {
        found: usize,
        skipped: Vec<SkippedTable>,
    },
}

impl ConsolidationReport {
    pub fn skipped(&self) -> &[SkippedTable] {
        match self {
            ConsolidationReport::Written { skipped, .. } => skipped,
            ConsolidationReport::Nothing { skipped, .. } => skipped,
        }
    }
}

/// Fill absent seasons from the table name, then concatenate and merge.
pub fn consolidate_tables(tables: Vec<(String, Table)>) -> Table {
    let filled = tables.into_iter().map(|(name, table)| {
        if table.is_empty() {
            return table;
        }
        let season = infer_season(&name);
        let columns = table.columns().to_vec();
        let rows = table
            .into_rows()
            .into_iter()
            .map(|mut row| {
                if row.season.is_none() {
                    row.season = Some(season.clone());
                }
                row
            })
            .collect();
        let mut table = Table::from_parts(columns, rows);
        table.add_column(KeyField::Season.column());
        table
    });
    merge(Table::empty(), Table::concat(filled))
}

/// Rebuild the master table in `store`.
///
/// Unreadable tables are skipped and reported. When no table can be read, or
/// the result is empty, nothing is written.
pub fn consolidate<S: TableStore>(
    store: &S,
    options: &ConsolidateOptions,
) -> Result<ConsolidationReport, StoreError> {
    let names: Vec<String> = store
        .list()?
        .into_iter()
        .filter(|name| options.wants(name))
        .collect();
    let found = names.len();

    let mut tables = Vec::with_capacity(found);
    let mut skipped = Vec::new();
    for name in names {
        match store.load(&name) {
            Ok(Some(table)) => {
                debug!("Loaded {} ({} rows)", name, table.len());
                tables.push((name, table));
            }
            Ok(None) => debug!("{} disappeared before it could be read", name),
            Err(e) => {
                warn!("Skipping {}: {}", name, e);
                skipped.push(SkippedTable {
                    name,
                    reason: e.to_string(),
                });
            }
        }
    }

    if tables.is_empty() {
        warn!(
            "No readable tables ({} found, {} skipped); master table not written",
            found,
            skipped.len()
        );
        return Ok(ConsolidationReport::Nothing { found, skipped });
    }

    let count = tables.len();
    let master = consolidate_tables(tables);
    if master.is_empty() {
        warn!("All {} tables are empty; master table not written", count);
        return Ok(ConsolidationReport::Nothing { found, skipped });
    }

    store.save(&options.output, &master)?;
    info!(
        "Consolidated {} tables into {} ({} rows)",
        count,
        options.output,
        master.len()
    );

    Ok(ConsolidationReport::Written {
        output: options.output.clone(),
        tables: count,
        rows: master.len(),
        skipped,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Row;
    use crate::store::MemoryTableStore;

    fn season_table(source: &str, season: Option<&str>, start_day: u32, n: u32) -> Table {
        let mut table = Table::empty();
        for i in 0..n {
            let day = start_day + i;
            let mut row = Row::new(source)
                .with_key(KeyField::Date, &format!("2024-{:02}-{:02}", 8 + day / 28, 1 + day % 28))
                .with_key(KeyField::Home, &format!("Home{}", day))
                .with_key(KeyField::Away, &format!("Away{}", day));
            if let Some(season) = season {
                row = row.with_key(KeyField::Season, season);
            }
            table.push(row);
        }
        table
    }

    #[test]
    fn test_disjoint_tables_union_sorted() {
        let store = MemoryTableStore::new();
        store
            .save("E0_2425.csv", &season_table("epl", Some("2024/2025"), 30, 10))
            .unwrap();
        store
            .save("E0_2324.csv", &season_table("epl", Some("2023/2024"), 0, 15))
            .unwrap();

        let report = consolidate(&store, &ConsolidateOptions::default()).unwrap();
        assert!(matches!(
            report,
            ConsolidationReport::Written { rows: 25, tables: 2, .. }
        ));

        let master = store.load(DEFAULT_MASTER).unwrap().unwrap();
        assert_eq!(master.len(), 25);
        let order: Vec<(&str, &str)> = master
            .rows()
            .iter()
            .map(|r| (r.season.as_deref().unwrap(), r.date.as_deref().unwrap()))
            .collect();
        let mut sorted = order.clone();
        sorted.sort();
        assert_eq!(order, sorted);
        assert_eq!(order[0].0, "2023/2024");
        assert_eq!(order[24].0, "2024/2025");
    }

    #[test]
    fn test_corrupt_table_is_skipped_and_reported() {
        let store = MemoryTableStore::new();
        for (i, name) in ["a_2122.csv", "b_2223.csv", "c_2324.csv", "d_2425.csv"]
            .iter()
            .enumerate()
        {
            store
                .save(name, &season_table("src", None, i as u32 * 5, 5))
                .unwrap();
        }
        store.insert_raw("e_2526.csv", b"season,date\n\"2025/2026,2025-08-15\n".to_vec());

        let report = consolidate(&store, &ConsolidateOptions::default()).unwrap();
        match report {
            ConsolidationReport::Written {
                tables,
                rows,
                skipped,
                ..
            } => {
                assert_eq!(tables, 4);
                assert_eq!(rows, 20);
                assert_eq!(skipped.len(), 1);
                assert_eq!(skipped[0].name, "e_2526.csv");
            }
            other => panic!("unexpected report: {:?}", other),
        }

        let master = store.load(DEFAULT_MASTER).unwrap().unwrap();
        let seasons: Vec<_> = master.rows().iter().filter_map(|r| r.season.as_deref()).collect();
        assert!(seasons.contains(&"2021/2022"));
        assert!(seasons.contains(&"2024/2025"));
    }

    #[test]
    fn test_nothing_found_writes_nothing() {
        let store = MemoryTableStore::new();
        let report = consolidate(&store, &ConsolidateOptions::default()).unwrap();
        assert_eq!(
            report,
            ConsolidationReport::Nothing {
                found: 0,
                skipped: vec![]
            }
        );
        assert_eq!(store.writes(), 0);
    }

    #[test]
    fn test_all_unreadable_keeps_previous_master() {
        let store = MemoryTableStore::new();
        store.insert_raw(DEFAULT_MASTER, b"season\n2024/2025\n".to_vec());
        store.insert_raw("bad.csv", vec![0xff, 0xfe, b'"']);

        let report = consolidate(&store, &ConsolidateOptions::default()).unwrap();
        assert!(matches!(
            report,
            ConsolidationReport::Nothing { found: 1, ref skipped } if skipped.len() == 1
        ));
        assert_eq!(store.writes(), 0);
        assert_eq!(store.load(DEFAULT_MASTER).unwrap().unwrap().len(), 1);
    }

    #[test]
    fn test_include_filter_and_master_exclusion() {
        let store = MemoryTableStore::new();
        store
            .save("E0_2425.csv", &season_table("epl", None, 0, 3))
            .unwrap();
        store
            .save("odds/epl.csv", &season_table("odds", None, 0, 3))
            .unwrap();

        let options = ConsolidateOptions {
            output: "master.csv".to_string(),
            include: Some(Regex::new(r"^E0_").unwrap()),
        };
        consolidate(&store, &options).unwrap();
        // A second run must not read its own output back in.
        let report = consolidate(&store, &options).unwrap();
        assert!(matches!(report, ConsolidationReport::Written { tables: 1, rows: 3, .. }));
    }
}
