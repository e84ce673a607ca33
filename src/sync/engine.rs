//! Per-source synchronization: fetch, gate on the ledger, merge, persist.

use std::fmt;

use chrono::{NaiveDate, Utc};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use super::merge::{diff, merge};
use super::normalize::normalize;
use crate::codec::{self, ParseError};
use crate::fingerprint::{fingerprint, Digest};
use crate::ledger::{ChangeLedger, LedgerEntry, LedgerError};
use crate::models::{
    path_segment, Credential, RawTable, SourceDescriptor, SourceKind, Table, FETCHED_AT_COLUMN,
    SEASON_PLACEHOLDER, SEASON_SPAN_PLACEHOLDER, TABLE_PLACEHOLDER, TEAM_ID_PLACEHOLDER,
    TEAM_PLACEHOLDER,
};
use crate::scrapers::html::{self, TeamLink};
use crate::scrapers::{odds, redact, FetchError, Fetcher};
use crate::season::{candidate_codes, current_code};
use crate::store::{StoreError, TableStore};

/// Errors that fail a single source.
#[derive(Debug, Error)]
pub enum SyncError {
    #[error(transparent)]
    Fetch(#[from] FetchError),

    #[error("parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("store error: {0}")]
    Store(#[from] StoreError),

    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),

    #[error("no season found for {source_name} (tried {tried:?})")]
    NoSeason {
        source_name: String,
        tried: Vec<String>,
    },
}

/// Outcome of one source.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncStatus {
    /// New content was merged and persisted.
    Updated,
    /// Content matched the ledger, or carried no rows.
    Unchanged,
    /// Not attempted, e.g. a missing credential.
    Skipped(String),
    Failed(String),
}

impl SyncStatus {
    pub fn label(&self) -> &'static str {
        match self {
            SyncStatus::Updated => "updated",
            SyncStatus::Unchanged => "unchanged",
            SyncStatus::Skipped(_) => "skipped",
            SyncStatus::Failed(_) => "failed",
        }
    }

    /// Updated or unchanged.
    pub fn is_success(&self) -> bool {
        matches!(self, SyncStatus::Updated | SyncStatus::Unchanged)
    }
}

impl fmt::Display for SyncStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SyncStatus::Skipped(reason) | SyncStatus::Failed(reason) => {
                write!(f, "{}: {}", self.label(), reason)
            }
            _ => f.write_str(self.label()),
        }
    }
}

/// Per-source summary.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncReport {
    pub source: String,
    pub status: SyncStatus,
    /// Rows in the persisted table after this run.
    pub rows: usize,
    pub added: Option<usize>,
    pub removed: Option<usize>,
    pub digest: Option<Digest>,
    /// Resolved table name, once known.
    pub output: Option<String>,
}

impl SyncReport {
    fn new(source: &SourceDescriptor, status: SyncStatus) -> Self {
        Self::named(&source.name, status)
    }

    fn named(name: &str, status: SyncStatus) -> Self {
        Self {
            source: name.to_string(),
            status,
            rows: 0,
            added: None,
            removed: None,
            digest: None,
            output: None,
        }
    }
}

/// True when the run as a whole should exit non-zero: at least one source
/// failed and none succeeded. Skipped sources count as neither.
pub fn run_failed(reports: &[SyncReport]) -> bool {
    let failed = reports
        .iter()
        .any(|r| matches!(r.status, SyncStatus::Failed(_)));
    let succeeded = reports.iter().any(|r| r.status.is_success());
    failed && !succeeded
}

/// Drives sources through fetch, ledger gate, merge and persistence.
pub struct Synchronizer<F, L, S> {
    fetcher: F,
    ledger: L,
    store: S,
    today: NaiveDate,
}

impl<F, L, S> Synchronizer<F, L, S>
where
    F: Fetcher,
    L: ChangeLedger,
    S: TableStore,
{
    pub fn new(fetcher: F, ledger: L, store: S) -> Self {
        Self {
            fetcher,
            ledger,
            store,
            today: Utc::now().date_naive(),
        }
    }

    /// Reference date for season discovery.
    pub fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn ledger(&self) -> &L {
        &self.ledger
    }

    /// Sync every source in order. One failure never stops the others.
    pub async fn sync_all(&self, sources: &[SourceDescriptor]) -> Vec<SyncReport> {
        let mut reports = Vec::with_capacity(sources.len());
        for source in sources {
            reports.push(self.sync_source(source).await);
        }
        reports
    }

    /// Sync configured sources in order. Entries whose configuration could not
    /// be turned into a descriptor fail on their own; the rest still run.
    pub async fn sync_configured<E>(
        &self,
        entries: &[(String, Result<SourceDescriptor, E>)],
    ) -> Vec<SyncReport>
    where
        E: fmt::Display,
    {
        let mut reports = Vec::with_capacity(entries.len());
        for (name, entry) in entries {
            match entry {
                Ok(source) => reports.push(self.sync_source(source).await),
                Err(e) => {
                    error!("{}: {}", name, e);
                    reports.push(SyncReport::named(name, SyncStatus::Failed(e.to_string())));
                }
            }
        }
        reports
    }

    pub async fn sync_source(&self, source: &SourceDescriptor) -> SyncReport {
        if let Credential::Missing(var) = &source.credential {
            let reason = format!("{} is not set", var);
            warn!("Skipping {}: {}", source.name, reason);
            return SyncReport::new(source, SyncStatus::Skipped(reason));
        }

        match self.try_sync(source).await {
            Ok(report) => {
                match &report.status {
                    SyncStatus::Updated => info!(
                        "{}: updated {} (+{} -{}, {} rows)",
                        report.source,
                        report.output.as_deref().unwrap_or("?"),
                        report.added.unwrap_or(0),
                        report.removed.unwrap_or(0),
                        report.rows
                    ),
                    status => info!("{}: {}", report.source, status),
                }
                report
            }
            Err(e) => {
                error!("{}: {}", source.name, e);
                SyncReport::new(source, SyncStatus::Failed(e.to_string()))
            }
        }
    }

    /// Fill the season slot, probing candidates newest-first when no code is configured.
    pub async fn resolve_season(
        &self,
        source: &SourceDescriptor,
    ) -> Result<SourceDescriptor, SyncError> {
        if !source.needs_season() {
            return Ok(source.clone());
        }
        if let Some(code) = &source.season_code {
            return Ok(source.with_season(code));
        }
        if !source.locator.contains(SEASON_PLACEHOLDER)
            && !source.locator.contains(SEASON_SPAN_PLACEHOLDER)
        {
            // The locator is the same for every candidate, so probing tells nothing.
            let code = current_code(self.today);
            debug!("{}: using current season {}", source.name, code);
            return Ok(source.with_season(&code));
        }

        let candidates = candidate_codes(self.today);
        let mut valid = Vec::new();
        let mut last_error = None;
        for code in &candidates {
            let resolved = source.with_season(code);
            let url = request_url(&resolved)?;
            match self.fetcher.exists(&url).await {
                Ok(true) => valid.push(resolved),
                Ok(false) => debug!("{}: season {} not available", source.name, code),
                Err(e) => {
                    debug!("{}: lookup for season {} failed: {}", source.name, code, e);
                    last_error = Some(e);
                }
            }
        }

        if valid.len() > 1 {
            let codes: Vec<&str> = valid
                .iter()
                .filter_map(|s| s.season_code.as_deref())
                .collect();
            warn!(
                "{}: several seasons are available ({}), using the newest",
                source.name,
                codes.join(", ")
            );
        }

        match (valid.into_iter().next(), last_error) {
            (Some(resolved), _) => Ok(resolved),
            (None, Some(e)) => Err(e.into()),
            (None, None) => Err(SyncError::NoSeason {
                source_name: source.name.clone(),
                tried: candidates,
            }),
        }
    }

    async fn try_sync(&self, source: &SourceDescriptor) -> Result<SyncReport, SyncError> {
        let source = self.resolve_season(source).await?;
        let url = request_url(&source)?;
        let fetched = self.fetcher.get(&url).await?;

        // Page chrome changes per request, so HTML is fingerprinted by its tables.
        let extracted = match source.kind {
            SourceKind::HtmlTable | SourceKind::HtmlTables => {
                Some(extract_parts(&source, &fetched.body)?)
            }
            SourceKind::TeamMatchlogs => Some(self.fetch_matchlogs(&source, &fetched.body).await?),
            SourceKind::Csv | SourceKind::OddsApi => None,
        };
        let digest = match &extracted {
            Some(parts) => parts_digest(parts),
            None => fingerprint(&fetched.body),
        };

        let mut report = SyncReport::new(&source, SyncStatus::Unchanged);
        report.output = Some(source.output.clone());
        report.digest = Some(digest.clone());

        let previous = self.ledger.read(&source.name)?;
        if let Some(previous) = &previous {
            if previous.digest == digest {
                debug!("{}: digest {} unchanged", source.name, digest.short());
                report.rows = previous.rows;
                return Ok(report);
            }
        }

        let parts = match extracted {
            Some(parts) => parts,
            None => extract_parts(&source, &fetched.body)?,
        };

        let fetched_at = fetched.fetched_at.to_rfc3339();
        let mut merged_tables = Vec::with_capacity(parts.len());
        let (mut added, mut removed) = (0, 0);
        for part in &parts {
            let mut incoming = normalize(&part.raw, &source.with_output(&part.output));
            if incoming.is_empty() {
                debug!("{}: {} has no rows", source.name, part.output);
                continue;
            }
            incoming.stamp(FETCHED_AT_COLUMN, &fetched_at);

            // A corrupt base must fail the source rather than be overwritten.
            let existing = self.store.load(&part.output)?.unwrap_or_else(Table::empty);
            added += diff(&incoming, &existing).len();
            removed += diff(&existing, &incoming).len();
            merged_tables.push((part.output.as_str(), merge(existing, incoming)));
        }

        if merged_tables.is_empty() {
            info!("{}: payload has no rows, nothing to merge", source.name);
            report.rows = previous.map(|p| p.rows).unwrap_or(0);
            return Ok(report);
        }

        // Every table is durable before the ledger moves on.
        let mut rows = 0;
        for (output, merged) in &merged_tables {
            self.store.save(output, merged)?;
            rows += merged.len();
        }
        self.ledger.write(
            &source.name,
            &LedgerEntry::new(digest, rows).with_counts(added, removed),
        )?;

        report.status = SyncStatus::Updated;
        report.rows = rows;
        report.added = Some(added);
        report.removed = Some(removed);
        Ok(report)
    }

    /// Follow every team linked from the index page and keep one matchlog per team.
    async fn fetch_matchlogs(
        &self,
        source: &SourceDescriptor,
        index: &[u8],
    ) -> Result<Vec<TablePart>, SyncError> {
        let (text, _) = codec::decode_text(index);
        let teams = html::find_team_links(&text)?;
        if teams.is_empty() {
            return Err(ParseError::NoTable(format!(
                "no team links on {}",
                redact(&source.locator)
            ))
            .into());
        }

        let mut parts = Vec::with_capacity(teams.len());
        for team in &teams {
            let output = source
                .output
                .replace(TEAM_PLACEHOLDER, &path_segment(&team.name));
            match self.fetch_matchlog(&source.with_output(&output), team).await {
                Some(part) => parts.push(part),
                None => warn!("{}: no matchlog found for {} ({})", source.name, team.name, team.id),
            }
        }
        if parts.is_empty() {
            return Err(ParseError::NoTable(format!(
                "none of {} teams has a matchlog table",
                teams.len()
            ))
            .into());
        }
        Ok(parts)
    }

    /// First follow template that yields a matching table wins.
    async fn fetch_matchlog(&self, source: &SourceDescriptor, team: &TeamLink) -> Option<TablePart> {
        for template in &source.follow {
            let url = template.replace(TEAM_ID_PLACEHOLDER, &team.id);
            let page = match self.fetcher.get(&url).await {
                Ok(page) => page,
                Err(e) => {
                    debug!("{}: {}", team.name, e);
                    continue;
                }
            };
            match extract_parts(source, &page.body) {
                Ok(mut parts) => return parts.pop(),
                Err(e) => debug!("{}: {}: {}", team.name, redact(&url), e),
            }
        }
        None
    }
}

/// One table extracted from a fetch, with the name it persists under.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TablePart {
    pub output: String,
    pub raw: RawTable,
}

fn single(source: &SourceDescriptor, raw: RawTable) -> Vec<TablePart> {
    vec![TablePart {
        output: source.output.clone(),
        raw,
    }]
}

fn parts_digest(parts: &[TablePart]) -> Digest {
    let mut content = Vec::new();
    for part in parts {
        content.extend_from_slice(part.output.as_bytes());
        content.push(b'\n');
        content.extend_from_slice(&codec::raw_to_csv(&part.raw));
    }
    fingerprint(&content)
}

fn request_url(source: &SourceDescriptor) -> Result<String, FetchError> {
    source
        .request_url()
        .map_err(|e| FetchError::permanent(&source.locator, format!("invalid locator: {}", e)))
}

/// Turn a fetched body into the tables it carries. Team matchlog sources
/// pass a single team page here.
pub fn extract_parts(source: &SourceDescriptor, body: &[u8]) -> Result<Vec<TablePart>, ParseError> {
    match source.kind {
        SourceKind::Csv => Ok(single(source, codec::read_raw_table(body)?)),
        SourceKind::OddsApi => Ok(single(source, odds::events_to_raw(body)?)),
        SourceKind::HtmlTable | SourceKind::TeamMatchlogs => {
            let (text, _) = codec::decode_text(body);
            let raw = html::read_html_table(&text, &source.table.selector, &source.table.require)?;
            Ok(single(source, raw))
        }
        SourceKind::HtmlTables => {
            let (text, _) = codec::decode_text(body);
            let tables = html::extract_captioned(&text, &source.table.selector)?;
            let names = html::table_names(&tables);
            let require = &source.table.require;
            let parts: Vec<TablePart> = tables
                .into_iter()
                .zip(names)
                .filter(|(t, _)| require.iter().all(|c| t.table.has_column(c)))
                .map(|(t, name)| TablePart {
                    output: source.output.replace(TABLE_PLACEHOLDER, &name),
                    raw: t.table,
                })
                .collect();
            if parts.is_empty() {
                return Err(ParseError::NoTable(format!(
                    "no tables match {:?} with columns {:?}",
                    source.table.selector, require
                )));
            }
            Ok(parts)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::MemoryLedger;
    use crate::scrapers::MemoryFetcher;
    use crate::store::MemoryTableStore;

    const TEMPLATE: &str = "https://www.football-data.co.uk/mmz4281/{season}/E0.csv";
    const CSV: &str = "Div,Date,HomeTeam,AwayTeam,FTHG,FTAG\nE0,16/08/2024,Man United,Fulham,1,0\n";

    fn epl() -> SourceDescriptor {
        SourceDescriptor::new("epl", SourceKind::Csv, TEMPLATE, "E0_{season}.csv")
    }

    fn today() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 10, 1).unwrap()
    }

    fn report(status: SyncStatus) -> SyncReport {
        SyncReport {
            source: "s".into(),
            status,
            rows: 0,
            added: None,
            removed: None,
            digest: None,
            output: None,
        }
    }

    #[test]
    fn test_run_failed_policy() {
        use SyncStatus::*;
        assert!(!run_failed(&[]));
        assert!(run_failed(&[report(Failed("x".into()))]));
        assert!(run_failed(&[
            report(Failed("x".into())),
            report(Skipped("no key".into()))
        ]));
        assert!(!run_failed(&[report(Failed("x".into())), report(Unchanged)]));
        assert!(!run_failed(&[report(Failed("x".into())), report(Updated)]));
        assert!(!run_failed(&[report(Skipped("no key".into()))]));
    }

    #[tokio::test]
    async fn test_discovery_picks_newest_available_season() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert(&TEMPLATE.replace("{season}", "2425"), CSV);
        fetcher.insert(&TEMPLATE.replace("{season}", "2526"), CSV);
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), MemoryTableStore::new())
            .with_today(today());

        let resolved = sync.resolve_season(&epl()).await.unwrap();
        assert_eq!(resolved.season_code.as_deref(), Some("2526"));
        assert_eq!(resolved.output, "E0_2526.csv");
    }

    #[tokio::test]
    async fn test_discovery_without_candidates_fails_source() {
        let sync = Synchronizer::new(MemoryFetcher::new(), MemoryLedger::new(), MemoryTableStore::new())
            .with_today(today());

        let report = sync.sync_source(&epl()).await;
        assert!(matches!(report.status, SyncStatus::Failed(ref e) if e.contains("no season")));
        assert_eq!(sync.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_season_only_in_output_uses_current_season() {
        let fetcher = MemoryFetcher::new();
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), MemoryTableStore::new())
            .with_today(today());
        let source = SourceDescriptor::new(
            "epl_fixtures",
            SourceKind::Csv,
            "https://www.football-data.co.uk/fixtures.csv",
            "fixtures/{season}.csv",
        );

        let resolved = sync.resolve_season(&source).await.unwrap();
        assert_eq!(resolved.output, "fixtures/2526.csv");
    }

    #[tokio::test]
    async fn test_configured_season_skips_discovery() {
        let fetcher = MemoryFetcher::new();
        fetcher.insert(&TEMPLATE.replace("{season}", "2425"), CSV);
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), MemoryTableStore::new())
            .with_today(today());

        let mut source = epl();
        source.season_code = Some("2425".into());
        let report = sync.sync_source(&source).await;

        assert_eq!(report.status, SyncStatus::Updated);
        assert_eq!(report.output.as_deref(), Some("E0_2425.csv"));
        let table = sync.store().load("E0_2425.csv").unwrap().unwrap();
        assert_eq!(table.rows()[0].season.as_deref(), Some("2024/2025"));
        assert!(table.has_column(FETCHED_AT_COLUMN));
    }

    #[tokio::test]
    async fn test_missing_credential_is_skipped() {
        let fetcher = MemoryFetcher::new();
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), MemoryTableStore::new());
        let mut source = SourceDescriptor::new(
            "odds_epl",
            SourceKind::OddsApi,
            "https://api.the-odds-api.com/v4/sports/soccer_epl/odds?regions=uk",
            "odds/epl.csv",
        );
        source.credential = Credential::Missing("ODDS_API_KEY".into());

        let report = sync.sync_source(&source).await;
        assert_eq!(
            report.status,
            SyncStatus::Skipped("ODDS_API_KEY is not set".into())
        );
        assert!(fetcher.gets().is_empty());
    }

    #[tokio::test]
    async fn test_html_fingerprint_ignores_page_chrome() {
        let url = "https://fbref.com/en/comps/9/schedule/Premier-League-Scores-and-Fixtures";
        let page = |banner: &str| {
            format!(
                "<html><body><p>{}</p><table><thead><tr><th>Date</th><th>Home</th><th>Away</th></tr></thead>\
                 <tbody><tr><td>2025-08-15</td><td>Liverpool</td><td>Bournemouth</td></tr></tbody></table></body></html>",
                banner
            )
        };
        let fetcher = MemoryFetcher::new();
        let ledger = MemoryLedger::new();
        let store = MemoryTableStore::new();
        let sync = Synchronizer::new(&fetcher, &ledger, &store);
        let mut source = SourceDescriptor::new("fbref_epl", SourceKind::HtmlTable, url, "fbref/epl_2526.csv");
        source.table.require = vec!["Date".into(), "Home".into()];

        fetcher.insert(url, page("generated 10:00"));
        assert_eq!(sync.sync_source(&source).await.status, SyncStatus::Updated);

        fetcher.insert(url, page("generated 10:05"));
        assert_eq!(sync.sync_source(&source).await.status, SyncStatus::Unchanged);
        assert_eq!(store.writes(), 1);
        assert_eq!(ledger.writes(), 1);
    }

    #[tokio::test]
    async fn test_table_without_fixture_columns_keeps_every_row() {
        let url = "https://fbref.com/en/comps/9/Premier-League-Stats";
        let page = "<table><thead><tr><th>Squad</th><th>Pts</th></tr></thead><tbody>\
                    <tr><td>Arsenal</td><td>20</td></tr>\
                    <tr><td>Chelsea</td><td>17</td></tr>\
                    <tr><td>Spurs</td><td>14</td></tr></tbody></table>";
        let fetcher = MemoryFetcher::new();
        fetcher.insert(url, page);
        let store = MemoryTableStore::new();
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), &store);
        let mut source = SourceDescriptor::new(
            "fbref_epl_standings",
            SourceKind::HtmlTable,
            url,
            "fbref/2526/epl_standings.csv",
        );
        source.table.require = vec!["Squad".into()];

        let report = sync.sync_source(&source).await;

        assert_eq!(report.status, SyncStatus::Updated);
        assert_eq!(report.rows, 3);
        let table = store.load("fbref/2526/epl_standings.csv").unwrap().unwrap();
        let squads: Vec<_> = table.rows().iter().map(|r| r.get("Squad").unwrap()).collect();
        assert_eq!(squads, ["Arsenal", "Chelsea", "Spurs"]);
        assert!(table.rows().iter().all(|r| r.season.as_deref() == Some("2025/2026")));
    }

    #[tokio::test]
    async fn test_corrupt_base_fails_without_writing() {
        let url = "https://www.football-data.co.uk/mmz4281/2425/E0.csv";
        let fetcher = MemoryFetcher::new();
        fetcher.insert(url, CSV);
        let ledger = MemoryLedger::new();
        let store = MemoryTableStore::new();
        store.insert_raw("E0_2425.csv", b"season,date\n\"2024/2025,2024-08-16\n".to_vec());
        let sync = Synchronizer::new(&fetcher, &ledger, &store);

        let source = SourceDescriptor::new("epl", SourceKind::Csv, url, "E0_2425.csv");
        let report = sync.sync_source(&source).await;

        assert!(matches!(report.status, SyncStatus::Failed(_)));
        assert_eq!(store.writes(), 0);
        assert!(ledger.read("epl").unwrap().is_none());
    }

    #[tokio::test]
    async fn test_empty_payload_is_unchanged() {
        let url = "https://www.football-data.co.uk/fixtures.csv";
        let fetcher = MemoryFetcher::new();
        fetcher.insert(url, "Div,Date,HomeTeam,AwayTeam\n");
        let ledger = MemoryLedger::new();
        let store = MemoryTableStore::new();
        let sync = Synchronizer::new(&fetcher, &ledger, &store);

        let source = SourceDescriptor::new("fixtures", SourceKind::Csv, url, "fixtures.csv");
        let report = sync.sync_source(&source).await;

        assert_eq!(report.status, SyncStatus::Unchanged);
        assert_eq!(store.writes(), 0);
        assert_eq!(ledger.writes(), 0);
    }

    #[tokio::test]
    async fn test_multi_table_page_persists_each_caption() {
        let url = "https://fbref.com/en/comps/9/2025-2026/stats/2025-2026-Premier-League-Stats";
        let page = "<table><caption>Squad Standard Stats</caption>\
                    <tr><th>Squad</th><th>MP</th></tr>\
                    <tr><td>Arsenal</td><td>8</td></tr><tr><td>Chelsea</td><td>8</td></tr></table>\
                    <table><caption>Squad Goalkeeping</caption>\
                    <tr><th>Squad</th><th>GA</th></tr><tr><td>Arsenal</td><td>3</td></tr></table>";
        let fetcher = MemoryFetcher::new();
        fetcher.insert(url, page);
        let ledger = MemoryLedger::new();
        let store = MemoryTableStore::new();
        let sync = Synchronizer::new(&fetcher, &ledger, &store);
        let source = SourceDescriptor::new(
            "fbref_epl_stats",
            SourceKind::HtmlTables,
            url,
            "25-26/ENG-Premier_League/{table}.csv",
        );

        let report = sync.sync_source(&source).await;

        assert_eq!(report.status, SyncStatus::Updated);
        assert_eq!(report.rows, 3);
        assert_eq!(
            store.list().unwrap(),
            vec![
                "25-26/ENG-Premier_League/Squad_Goalkeeping.csv",
                "25-26/ENG-Premier_League/Squad_Standard_Stats.csv",
            ]
        );
        let standard = store
            .load("25-26/ENG-Premier_League/Squad_Standard_Stats.csv")
            .unwrap()
            .unwrap();
        assert_eq!(standard.len(), 2);
        assert_eq!(standard.rows()[0].season.as_deref(), Some("2025/2026"));
        assert_eq!(ledger.read("fbref_epl_stats").unwrap().unwrap().rows, 3);

        assert_eq!(sync.sync_source(&source).await.status, SyncStatus::Unchanged);
        assert_eq!(store.writes(), 2);
    }

    #[tokio::test]
    async fn test_team_matchlogs_follow_fallback_urls() {
        let index = "https://fbref.com/en/comps/9/Premier-League-Stats";
        let matchlogs = "https://fbref.com/en/squads/{team_id}/2025-2026/matchlogs/all_comps/matchlogs";
        let matches = "https://fbref.com/en/squads/{team_id}/2025-2026/matchlogs/all_comps/matches";
        let log = |opponent: &str| {
            format!(
                "<table><tr><th>Date</th><th>Comp</th></tr><tr><td>2025-08-17</td><td>Premier League</td></tr></table>\
                 <table><tr><th>Date</th><th>Comp</th><th>Opponent</th></tr>\
                 <tr><td>2025-08-17</td><td>Premier League</td><td>{}</td></tr></table>",
                opponent
            )
        };

        let fetcher = MemoryFetcher::new();
        fetcher.insert(
            index,
            "<a href=\"/en/squads/18bb7c10/Arsenal-Stats\">Arsenal</a>\
             <a href=\"/en/squads/cff3d9bb/Chelsea-Stats\">Chelsea</a>\
             <a href=\"/en/squads/361ca564/Tottenham-Stats\">Tottenham</a>",
        );
        fetcher.insert(&matchlogs.replace("{team_id}", "18bb7c10"), log("Man United"));
        // Chelsea only answers on the second template.
        fetcher.insert(&matches.replace("{team_id}", "cff3d9bb"), log("Crystal Palace"));
        let store = MemoryTableStore::new();
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), &store);

        let mut source = SourceDescriptor::new(
            "t5_matchlogs",
            SourceKind::TeamMatchlogs,
            index,
            "25-26/matchlogs/{team}.csv",
        );
        source.follow = vec![matchlogs.into(), matches.into()];
        source.table.require = vec!["Date".into(), "Comp".into()];

        let report = sync.sync_source(&source).await;

        assert_eq!(report.status, SyncStatus::Updated);
        assert_eq!(report.rows, 2);
        assert_eq!(
            store.list().unwrap(),
            vec!["25-26/matchlogs/Arsenal.csv", "25-26/matchlogs/Chelsea.csv"]
        );
        let chelsea = store.load("25-26/matchlogs/Chelsea.csv").unwrap().unwrap();
        assert_eq!(chelsea.rows()[0].get("Opponent"), Some("Crystal Palace"));
        assert!(fetcher
            .gets()
            .contains(&matches.replace("{team_id}", "361ca564")));
    }

    #[tokio::test]
    async fn test_team_matchlogs_without_links_fail() {
        let index = "https://fbref.com/en/comps/9/Premier-League-Stats";
        let fetcher = MemoryFetcher::new();
        fetcher.insert(index, "<p>maintenance</p>");
        let store = MemoryTableStore::new();
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), &store);
        let mut source =
            SourceDescriptor::new("t5_matchlogs", SourceKind::TeamMatchlogs, index, "{team}.csv");
        source.follow = vec!["https://fbref.com/en/squads/{team_id}/matchlogs".into()];

        let report = sync.sync_source(&source).await;

        assert!(matches!(report.status, SyncStatus::Failed(ref e) if e.contains("no team links")));
        assert_eq!(store.writes(), 0);
    }

    #[tokio::test]
    async fn test_misconfigured_entry_fails_alone() {
        let url = "https://www.football-data.co.uk/mmz4281/2425/E0.csv";
        let fetcher = MemoryFetcher::new();
        fetcher.insert(url, CSV);
        let sync = Synchronizer::new(&fetcher, MemoryLedger::new(), MemoryTableStore::new());
        let entries = vec![
            ("epl".to_string(), Ok(SourceDescriptor::new("epl", SourceKind::Csv, url, "E0_2425.csv"))),
            ("odds_bad".to_string(), Err("needs url or sport_key".to_string())),
        ];

        let reports = sync.sync_configured(&entries).await;

        assert_eq!(reports[0].status, SyncStatus::Updated);
        assert_eq!(reports[1].source, "odds_bad");
        assert_eq!(
            reports[1].status,
            SyncStatus::Failed("needs url or sport_key".into())
        );
        assert!(!run_failed(&reports));
    }
}
