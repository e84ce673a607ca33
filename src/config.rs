//! Configuration management for matchsync using the prefer crate.
//!
//! Precedence, lowest first: built-in defaults, the config file, environment
//! variables, command-line flags (applied by the binary).

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{
    Credential, SourceDescriptor, SourceKind, TableSelection, TABLE_PLACEHOLDER,
    TEAM_ID_PLACEHOLDER, TEAM_PLACEHOLDER,
};
use crate::scrapers::{odds, RetryPolicy};
use crate::season::code_from_season_dir;
use crate::sync::{ConsolidateOptions, DEFAULT_MASTER};

/// Default odds API host for sources configured by sport key.
pub const DEFAULT_ODDS_BASE: &str = "https://api.the-odds-api.com/";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("invalid config file: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("source {name}: {reason}")]
    InvalidSource { name: String, reason: String },

    #[error("invalid consolidate.include pattern: {0}")]
    InvalidPattern(#[from] regex::Error),
}

/// Application settings.
#[derive(Debug, Clone)]
pub struct Settings {
    /// Base data directory.
    pub data_dir: PathBuf,
    /// Persisted tables, relative to `data_dir` unless absolute.
    pub tables_dir: PathBuf,
    /// Ledger database, relative to `data_dir` unless absolute.
    pub ledger: PathBuf,
    /// Season code applied to every source without its own.
    pub season_code: Option<String>,
    /// User agent; see [`crate::scrapers::resolve_user_agent`].
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    pub request_timeout: u64,
    /// Delay after each request in milliseconds.
    pub request_delay_ms: u64,
    pub retry: RetryPolicy,
}

impl Default for Settings {
    fn default() -> Self {
        let data_dir = dirs::data_local_dir()
            .unwrap_or_else(|| dirs::home_dir().unwrap_or_else(|| PathBuf::from(".")))
            .join("matchsync");

        Self {
            data_dir,
            tables_dir: PathBuf::from("tables"),
            ledger: PathBuf::from("ledger.db"),
            season_code: None,
            user_agent: None,
            request_timeout: 30,
            request_delay_ms: 0,
            retry: RetryPolicy::default(),
        }
    }
}

impl Settings {
    /// Create settings with a custom data directory.
    pub fn with_data_dir(data_dir: PathBuf) -> Self {
        Self {
            data_dir,
            ..Default::default()
        }
    }

    /// Full path to the tables directory.
    pub fn tables_path(&self) -> PathBuf {
        self.data_dir.join(&self.tables_dir)
    }

    /// Full path to the ledger database.
    pub fn ledger_path(&self) -> PathBuf {
        self.data_dir.join(&self.ledger)
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn request_delay(&self) -> Duration {
        Duration::from_millis(self.request_delay_ms)
    }

    /// Apply `MATCHSYNC_DATA_DIR`, `MATCHSYNC_SEASON` and `SEASON_DIR`.
    /// An explicit season code wins over one derived from `SEASON_DIR`.
    pub fn apply_env<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(dir) = var("MATCHSYNC_DATA_DIR") {
            self.data_dir = expand(&dir);
        }
        if let Some(code) = var("MATCHSYNC_SEASON") {
            self.season_code = Some(code.trim().to_string());
        } else if let Some(dir) = var("SEASON_DIR") {
            self.season_code = Some(code_from_season_dir(dir.trim()));
        }
    }
}

fn expand(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn default_true() -> bool {
    true
}

/// `[retry]` table. Delays are in milliseconds.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RetryConfig {
    #[serde(default)]
    pub max_attempts: Option<u32>,
    #[serde(default)]
    pub base_delay_ms: Option<u64>,
    #[serde(default)]
    pub max_delay_ms: Option<u64>,
    #[serde(default)]
    pub backoff_multiplier: Option<f64>,
}

impl RetryConfig {
    fn apply_to(&self, policy: &mut RetryPolicy) {
        if let Some(n) = self.max_attempts {
            policy.max_attempts = n.max(1);
        }
        if let Some(ms) = self.base_delay_ms {
            policy.base_delay = Duration::from_millis(ms);
        }
        if let Some(ms) = self.max_delay_ms {
            policy.max_delay = Duration::from_millis(ms);
        }
        if let Some(m) = self.backoff_multiplier {
            policy.backoff_multiplier = m;
        }
    }
}

/// `[consolidate]` table.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConsolidateConfig {
    /// Master table name.
    #[serde(default)]
    pub output: Option<String>,
    /// Regex over table names to include.
    #[serde(default)]
    pub include: Option<String>,
}

/// One `[sources.<name>]` table.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: SourceKind,
    /// Locator, optionally containing `{season}`.
    #[serde(default)]
    pub url: Option<String>,
    /// Table name relative to the tables directory, optionally containing `{season}`.
    pub output: String,
    #[serde(default)]
    pub season_code: Option<String>,
    /// Environment variable holding the API key.
    #[serde(default)]
    pub api_key_env: Option<String>,
    /// Odds sources: sport key used when `url` is not given.
    #[serde(default)]
    pub sport_key: Option<String>,
    /// Odds sources: bookmaker regions.
    #[serde(default)]
    pub regions: Option<String>,
    /// HTML sources: CSS selector for candidate tables.
    #[serde(default)]
    pub selector: Option<String>,
    /// HTML sources: columns the chosen table must have. Team matchlogs
    /// default to `Date` and `Comp`.
    #[serde(default)]
    pub require: Vec<String>,
    /// Team matchlogs: per-team URL templates tried in order.
    #[serde(default)]
    pub follow: Vec<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl SourceConfig {
    fn locator(&self, name: &str) -> Result<String, ConfigError> {
        let invalid = |reason: String| ConfigError::InvalidSource {
            name: name.to_string(),
            reason,
        };
        match (&self.url, self.kind, &self.sport_key) {
            (Some(url), _, _) => Ok(url.clone()),
            (None, SourceKind::OddsApi, Some(sport)) => odds::build_url(
                DEFAULT_ODDS_BASE,
                sport,
                self.regions.as_deref().unwrap_or("uk"),
            )
            .map_err(|e| invalid(e.to_string())),
            (None, SourceKind::OddsApi, None) => Err(invalid("needs url or sport_key".into())),
            (None, _, _) => Err(invalid("needs url".into())),
        }
    }

    /// Build the descriptor for this source. `lookup` resolves credentials.
    pub fn to_descriptor<F>(
        &self,
        name: &str,
        default_season: Option<&str>,
        lookup: F,
    ) -> Result<SourceDescriptor, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.validate(name)?;
        let mut descriptor =
            SourceDescriptor::new(name, self.kind, &self.locator(name)?, &self.output);
        descriptor.season_code = self
            .season_code
            .as_deref()
            .or(default_season)
            .map(str::to_string);
        descriptor.credential = match &self.api_key_env {
            None => Credential::None,
            Some(var) => match lookup(var).filter(|v| !v.is_empty()) {
                Some(key) => Credential::Present(key),
                None => Credential::Missing(var.clone()),
            },
        };
        descriptor.table = TableSelection {
            selector: self
                .selector
                .clone()
                .unwrap_or_else(|| TableSelection::default().selector),
            require: match (self.kind, self.require.is_empty()) {
                (SourceKind::TeamMatchlogs, true) => vec!["Date".into(), "Comp".into()],
                _ => self.require.clone(),
            },
        };
        descriptor.follow = self.follow.clone();
        Ok(descriptor)
    }

    /// Fan-out sources need a per-table slot in their output name.
    fn validate(&self, name: &str) -> Result<(), ConfigError> {
        let invalid = |reason: String| {
            Err(ConfigError::InvalidSource {
                name: name.to_string(),
                reason,
            })
        };
        match self.kind {
            SourceKind::HtmlTables if !self.output.contains(TABLE_PLACEHOLDER) => {
                invalid(format!("output must contain {}", TABLE_PLACEHOLDER))
            }
            SourceKind::TeamMatchlogs if !self.output.contains(TEAM_PLACEHOLDER) => {
                invalid(format!("output must contain {}", TEAM_PLACEHOLDER))
            }
            SourceKind::TeamMatchlogs if self.follow.is_empty() => {
                invalid("needs follow URL templates".into())
            }
            SourceKind::TeamMatchlogs
                if self.follow.iter().any(|f| !f.contains(TEAM_ID_PLACEHOLDER)) =>
            {
                invalid(format!("follow templates must contain {}", TEAM_ID_PLACEHOLDER))
            }
            _ => Ok(()),
        }
    }
}

/// Configuration file structure.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub data_dir: Option<String>,
    #[serde(default)]
    pub tables_dir: Option<String>,
    /// Ledger database path.
    #[serde(default)]
    pub ledger: Option<String>,
    #[serde(default)]
    pub season_code: Option<String>,
    #[serde(default)]
    pub user_agent: Option<String>,
    /// Request timeout in seconds.
    #[serde(default)]
    pub request_timeout: Option<u64>,
    /// Delay between requests in milliseconds.
    #[serde(default)]
    pub request_delay_ms: Option<u64>,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub consolidate: ConsolidateConfig,
    #[serde(default)]
    pub sources: BTreeMap<String, SourceConfig>,
}

impl Config {
    /// Load configuration using prefer crate.
    /// Automatically discovers matchsync config files in standard locations.
    pub async fn load() -> Self {
        match prefer::load("matchsync").await {
            Ok(pref_config) => {
                let path = pref_config
                    .source_path()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default();
                match Self::from_value(pref_config.data()) {
                    Ok(config) => {
                        debug!("Loaded config from {}", path);
                        config
                    }
                    Err(e) => {
                        warn!("Ignoring config {}: {}", path, e);
                        Self::default()
                    }
                }
            }
            Err(_) => {
                debug!("No matchsync config file found, using defaults");
                Self::default()
            }
        }
    }

    /// Build from a discovered config tree, whatever format it was read from.
    pub fn from_value(value: &prefer::ConfigValue) -> Result<Self, ConfigError> {
        let tree = to_toml(value).unwrap_or_else(|| toml::Value::Table(toml::Table::new()));
        Ok(tree.try_into()?)
    }

    /// Load an explicit TOML file.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml(&text)
    }

    pub fn from_toml(text: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(text)?)
    }

    /// Apply configuration to settings.
    pub fn apply_to_settings(&self, settings: &mut Settings) {
        if let Some(ref dir) = self.data_dir {
            settings.data_dir = expand(dir);
        }
        if let Some(ref dir) = self.tables_dir {
            settings.tables_dir = expand(dir);
        }
        if let Some(ref ledger) = self.ledger {
            settings.ledger = expand(ledger);
        }
        if let Some(ref code) = self.season_code {
            settings.season_code = Some(code.clone());
        }
        if let Some(ref user_agent) = self.user_agent {
            settings.user_agent = Some(user_agent.clone());
        }
        if let Some(timeout) = self.request_timeout {
            settings.request_timeout = timeout;
        }
        if let Some(delay) = self.request_delay_ms {
            settings.request_delay_ms = delay;
        }
        self.retry.apply_to(&mut settings.retry);
    }

    /// Enabled sources in name order. A misconfigured source yields an error
    /// in its own slot without affecting the others.
    pub fn source_descriptors<F>(
        &self,
        settings: &Settings,
        lookup: F,
    ) -> Vec<(String, Result<SourceDescriptor, ConfigError>)>
    where
        F: Fn(&str) -> Option<String>,
    {
        self.sources
            .iter()
            .filter(|(_, source)| source.enabled)
            .map(|(name, source)| {
                let descriptor =
                    source.to_descriptor(name, settings.season_code.as_deref(), &lookup);
                (name.clone(), descriptor)
            })
            .collect()
    }

    pub fn consolidate_options(&self) -> Result<ConsolidateOptions, ConfigError> {
        let include = match &self.consolidate.include {
            Some(pattern) => Some(Regex::new(pattern)?),
            None => None,
        };
        Ok(ConsolidateOptions {
            output: self
                .consolidate
                .output
                .clone()
                .unwrap_or_else(|| DEFAULT_MASTER.to_string()),
            include,
        })
    }
}

/// Null values are dropped; TOML has no representation for them.
fn to_toml(value: &prefer::ConfigValue) -> Option<toml::Value> {
    use prefer::ConfigValue;

    Some(match value {
        ConfigValue::Null => return None,
        ConfigValue::Bool(b) => toml::Value::Boolean(*b),
        ConfigValue::Integer(i) => toml::Value::Integer(*i),
        ConfigValue::Float(f) => toml::Value::Float(*f),
        ConfigValue::String(s) => toml::Value::String(s.clone()),
        ConfigValue::Array(items) => toml::Value::Array(items.iter().filter_map(to_toml).collect()),
        ConfigValue::Object(map) => toml::Value::Table(
            map.iter()
                .filter_map(|(k, v)| Some((k.clone(), to_toml(v)?)))
                .collect(),
        ),
    })
}

/// Load settings from discovered configuration and the process environment.
pub async fn load_settings() -> (Config, Settings) {
    let config = Config::load().await;
    let mut settings = Settings::default();
    config.apply_to_settings(&mut settings);
    settings.apply_env(|name| std::env::var(name).ok());
    (config, settings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        data_dir = "/srv/matchsync"
        request_delay_ms = 250

        [retry]
        max_attempts = 3
        base_delay_ms = 100

        [consolidate]
        output = "master/all_matches.csv"
        include = '^(E0|SP1)_'

        [sources.epl]
        kind = "csv"
        url = "https://www.football-data.co.uk/mmz4281/{season}/E0.csv"
        output = "E0_{season}.csv"

        [sources.fbref_epl]
        kind = "html_table"
        url = "https://fbref.com/en/comps/9/schedule/Premier-League-Scores-and-Fixtures"
        output = "fbref/ENG-Premier_League/league_schedule.csv"
        selector = "table.stats_table"
        require = ["Date", "Home", "Away"]

        [sources.odds_epl]
        kind = "odds_api"
        sport_key = "soccer_epl"
        output = "odds/soccer_epl.csv"
        api_key_env = "ODDS_API_KEY"

        [sources.retired]
        kind = "csv"
        url = "https://example.com/old.csv"
        output = "old.csv"
        enabled = false
    "#;

    fn env(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    fn valid(entries: Vec<(String, Result<SourceDescriptor, ConfigError>)>) -> Vec<SourceDescriptor> {
        entries
            .into_iter()
            .map(|(name, d)| d.unwrap_or_else(|e| panic!("{} should be valid: {}", name, e)))
            .collect()
    }

    #[test]
    fn test_settings_from_file() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);

        assert_eq!(settings.tables_path(), PathBuf::from("/srv/matchsync/tables"));
        assert_eq!(settings.ledger_path(), PathBuf::from("/srv/matchsync/ledger.db"));
        assert_eq!(settings.request_delay(), Duration::from_millis(250));
        assert_eq!(settings.retry.max_attempts, 3);
        assert_eq!(settings.retry.base_delay, Duration::from_millis(100));
        assert_eq!(settings.retry.max_delay, Duration::from_secs(30));
    }

    #[test]
    fn test_env_overrides() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let mut settings = Settings::default();
        config.apply_to_settings(&mut settings);

        settings.apply_env(env(&[
            ("MATCHSYNC_DATA_DIR", "/tmp/ms"),
            ("SEASON_DIR", "data/raw/25-26"),
        ]));
        assert_eq!(settings.data_dir, PathBuf::from("/tmp/ms"));
        assert_eq!(settings.season_code.as_deref(), Some("2526"));

        settings.apply_env(env(&[("MATCHSYNC_SEASON", "2425"), ("SEASON_DIR", "25-26")]));
        assert_eq!(settings.season_code.as_deref(), Some("2425"));
    }

    #[test]
    fn test_source_descriptors() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let settings = Settings::default();
        let sources = valid(config.source_descriptors(&settings, env(&[])));

        let names: Vec<&str> = sources.iter().map(|s| s.name.as_str()).collect();
        assert_eq!(names, ["epl", "fbref_epl", "odds_epl"]);

        let fbref = &sources[1];
        assert_eq!(fbref.kind, SourceKind::HtmlTable);
        assert_eq!(fbref.table.selector, "table.stats_table");
        assert_eq!(fbref.table.require, ["Date", "Home", "Away"]);

        let odds = &sources[2];
        assert_eq!(odds.credential, Credential::Missing("ODDS_API_KEY".into()));
        assert!(odds.locator.starts_with("https://api.the-odds-api.com/v4/sports/soccer_epl/odds?"));
        assert!(odds.locator.contains("regions=uk"));
    }

    #[test]
    fn test_credentials_and_default_season() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let mut settings = Settings::default();
        settings.season_code = Some("2526".into());
        let sources = valid(config.source_descriptors(&settings, env(&[("ODDS_API_KEY", "k")])));

        assert_eq!(sources[0].season_code.as_deref(), Some("2526"));
        assert_eq!(sources[2].credential, Credential::Present("k".into()));
    }

    #[test]
    fn test_consolidate_options() {
        let config = Config::from_toml(SAMPLE).unwrap();
        let options = config.consolidate_options().unwrap();
        assert_eq!(options.output, "master/all_matches.csv");
        let include = options.include.unwrap();
        assert!(include.is_match("E0_2425.csv"));
        assert!(!include.is_match("odds/soccer_epl.csv"));

        let defaults = Config::default().consolidate_options().unwrap();
        assert_eq!(defaults.output, DEFAULT_MASTER);
        assert!(defaults.include.is_none());
    }

    #[test]
    fn test_invalid_sources() {
        let missing_url = Config::from_toml(
            r#"
            [sources.broken]
            kind = "csv"
            output = "broken.csv"
            "#,
        )
        .unwrap();
        let entries = missing_url.source_descriptors(&Settings::default(), env(&[]));
        assert!(matches!(
            entries[0].1,
            Err(ConfigError::InvalidSource { .. })
        ));

        assert!(matches!(
            Config::from_toml("[sources.x]\nkind = \"ftp\"\noutput = \"x.csv\"\n"),
            Err(ConfigError::Toml(_))
        ));
    }

    #[test]
    fn test_invalid_source_does_not_hide_the_others() {
        let config = Config::from_toml(
            r#"
            [sources.epl]
            kind = "csv"
            url = "https://www.football-data.co.uk/mmz4281/2425/E0.csv"
            output = "E0_2425.csv"

            [sources.odds_bad]
            kind = "odds_api"
            output = "odds/bad.csv"
            "#,
        )
        .unwrap();

        let entries = config.source_descriptors(&Settings::default(), env(&[]));

        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].0, "epl");
        assert!(entries[0].1.is_ok());
        assert_eq!(entries[1].0, "odds_bad");
        match &entries[1].1 {
            Err(e) => assert_eq!(e.to_string(), "source odds_bad: needs url or sport_key"),
            Ok(_) => panic!("odds_bad should be invalid"),
        }
    }

    #[test]
    fn test_fan_out_sources() {
        let config = Config::from_toml(
            r#"
            [sources.epl_stats]
            kind = "html_tables"
            url = "https://fbref.com/en/comps/9/{season_span}/stats/{season_span}-Premier-League-Stats"
            output = "{season}/ENG-Premier_League/{table}.csv"

            [sources.epl_matchlogs]
            kind = "team_matchlogs"
            url = "https://fbref.com/en/comps/9/Premier-League-Stats"
            output = "{season}/matchlogs/{team}.csv"
            follow = ["https://fbref.com/en/squads/{team_id}/{season_span}/matchlogs/all_comps/matchlogs"]

            [sources.no_slot]
            kind = "html_tables"
            url = "https://fbref.com/en/comps/9/Premier-League-Stats"
            output = "stats.csv"

            [sources.no_follow]
            kind = "team_matchlogs"
            url = "https://fbref.com/en/comps/9/Premier-League-Stats"
            output = "{team}.csv"
            "#,
        )
        .unwrap();

        let entries = config.source_descriptors(&Settings::default(), env(&[]));
        let by_name = |name: &str| &entries.iter().find(|(n, _)| n == name).unwrap().1;

        let matchlogs = by_name("epl_matchlogs").as_ref().unwrap();
        assert_eq!(matchlogs.table.require, ["Date", "Comp"]);
        assert_eq!(matchlogs.follow.len(), 1);
        assert!(by_name("epl_stats").is_ok());
        assert!(matches!(by_name("no_slot"), Err(ConfigError::InvalidSource { .. })));
        assert!(matches!(by_name("no_follow"), Err(ConfigError::InvalidSource { .. })));
    }

    #[test]
    fn test_from_discovered_tree() {
        use prefer::ConfigValue;

        fn object(pairs: Vec<(&str, ConfigValue)>) -> ConfigValue {
            ConfigValue::Object(pairs.into_iter().map(|(k, v)| (k.to_string(), v)).collect())
        }
        let text = |s: &str| ConfigValue::String(s.to_string());

        let tree = object(vec![
            ("data_dir", text("/srv/matchsync")),
            ("request_timeout", ConfigValue::Integer(10)),
            ("user_agent", ConfigValue::Null),
            ("retry", object(vec![("max_attempts", ConfigValue::Integer(2))])),
            (
                "sources",
                object(vec![(
                    "epl",
                    object(vec![
                        ("kind", text("csv")),
                        ("url", text("https://www.football-data.co.uk/mmz4281/{season}/E0.csv")),
                        ("output", text("E0_{season}.csv")),
                        ("require", ConfigValue::Array(vec![text("Date")])),
                    ]),
                )]),
            ),
        ]);

        let config = Config::from_value(&tree).unwrap();

        assert_eq!(config.data_dir.as_deref(), Some("/srv/matchsync"));
        assert_eq!(config.request_timeout, Some(10));
        assert_eq!(config.user_agent, None);
        assert_eq!(config.retry.max_attempts, Some(2));
        assert_eq!(config.sources["epl"].kind, SourceKind::Csv);
        assert_eq!(config.sources["epl"].require, ["Date"]);

        assert!(matches!(
            Config::from_value(&object(vec![("request_timeout", text("soon"))])),
            Err(ConfigError::Toml(_))
        ));
        assert!(Config::from_value(&ConfigValue::Null).unwrap().sources.is_empty());
    }
}
