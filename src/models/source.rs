//! Source descriptors built from configuration.

use serde::{Deserialize, Serialize};
use url::Url;

use crate::season::season_label;

/// Placeholder substituted with a season code in locators and output names.
pub const SEASON_PLACEHOLDER: &str = "{season}";

/// Placeholder substituted with the long season form, `2025-2026`.
pub const SEASON_SPAN_PLACEHOLDER: &str = "{season_span}";

/// Output placeholder for the table name on multi-table pages.
pub const TABLE_PLACEHOLDER: &str = "{table}";

/// Output placeholder for the team name on team fan-out sources.
pub const TEAM_PLACEHOLDER: &str = "{team}";

/// Follow-URL placeholder for the team id.
pub const TEAM_ID_PLACEHOLDER: &str = "{team_id}";

/// How a source's payload is turned into a raw table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Flat CSV endpoint.
    Csv,
    /// Scraped HTML page containing one or more tables.
    HtmlTable,
    /// Bookmaker odds JSON API.
    OddsApi,
    /// Every table on an HTML page, persisted one per caption.
    HtmlTables,
    /// Index page whose team links fan out to one matchlog table per team.
    TeamMatchlogs,
}

impl SourceKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceKind::Csv => "csv",
            SourceKind::HtmlTable => "html_table",
            SourceKind::OddsApi => "odds_api",
            SourceKind::HtmlTables => "html_tables",
            SourceKind::TeamMatchlogs => "team_matchlogs",
        }
    }
}

/// Which table to keep from an HTML page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSelection {
    /// CSS selector for candidate tables.
    pub selector: String,
    /// Columns a candidate must contain. The widest matching table wins.
    pub require: Vec<String>,
}

impl Default for TableSelection {
    fn default() -> Self {
        Self {
            selector: "table".to_string(),
            require: Vec::new(),
        }
    }
}

/// Credential state for sources that need one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Credential {
    /// Source is public.
    None,
    /// Source needs the named environment variable, which is unset.
    Missing(String),
    /// Resolved secret.
    Present(String),
}

/// One external feed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceDescriptor {
    /// Stable name, also used as the provenance tag and ledger key.
    pub name: String,
    pub kind: SourceKind,
    /// URL or URL template containing [`SEASON_PLACEHOLDER`].
    pub locator: String,
    /// Persisted table name relative to the tables directory.
    pub output: String,
    /// Season code such as `2425`, when known.
    pub season_code: Option<String>,
    pub credential: Credential,
    pub table: TableSelection,
    /// Per-team URL templates tried in order, containing [`TEAM_ID_PLACEHOLDER`].
    pub follow: Vec<String>,
}

impl SourceDescriptor {
    pub fn new(name: &str, kind: SourceKind, locator: &str, output: &str) -> Self {
        Self {
            name: name.to_string(),
            kind,
            locator: locator.to_string(),
            output: output.to_string(),
            season_code: None,
            credential: Credential::None,
            table: TableSelection::default(),
            follow: Vec::new(),
        }
    }

    /// Whether the locator, output or follow templates still have a season slot to fill.
    pub fn needs_season(&self) -> bool {
        std::iter::once(&self.locator)
            .chain(std::iter::once(&self.output))
            .chain(&self.follow)
            .any(|s| s.contains(SEASON_PLACEHOLDER) || s.contains(SEASON_SPAN_PLACEHOLDER))
    }

    /// Copy of this descriptor with the season slots filled in.
    pub fn with_season(&self, code: &str) -> Self {
        let span = season_label(code)
            .map(|label| label.replace('/', "-"))
            .unwrap_or_else(|| code.to_string());
        let fill = |s: &str| {
            s.replace(SEASON_PLACEHOLDER, code)
                .replace(SEASON_SPAN_PLACEHOLDER, &span)
        };
        Self {
            locator: fill(&self.locator),
            output: fill(&self.output),
            follow: self.follow.iter().map(|f| fill(f)).collect(),
            season_code: Some(code.to_string()),
            ..self.clone()
        }
    }

    /// Copy of this descriptor persisting to `output`.
    pub fn with_output(&self, output: &str) -> Self {
        Self {
            output: output.to_string(),
            ..self.clone()
        }
    }

    /// Identifier used to infer a season label for rows that lack one.
    pub fn season_identifier(&self) -> &str {
        self.season_code.as_deref().unwrap_or(&self.output)
    }

    /// URL to request, with the credential appended as `apiKey` when present.
    pub fn request_url(&self) -> Result<String, url::ParseError> {
        let mut url = Url::parse(&self.locator)?;
        if let Credential::Present(key) = &self.credential {
            url.query_pairs_mut().append_pair("apiKey", key);
        }
        Ok(url.into())
    }
}

/// Turn free text such as a caption or team name into one path segment.
pub fn path_segment(text: &str) -> String {
    let segment: String = text
        .trim()
        .chars()
        .map(|c| {
            if c.is_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '_'
            }
        })
        .collect();
    segment.trim_start_matches('.').to_string()
}
