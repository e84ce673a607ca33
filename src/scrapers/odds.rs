//! Odds API adapter: one row per event, priced by its best bookmaker.

use chrono::{DateTime, Utc};
use serde::Deserialize;
use url::Url;

use crate::codec::ParseError;
use crate::models::RawTable;

/// Columns emitted for every event.
pub const ODDS_COLUMNS: [&str; 8] = [
    "date",
    "home",
    "away",
    "commence_time",
    "bookmaker",
    "price_home",
    "price_draw",
    "price_away",
];

const H2H: &str = "h2h";

#[derive(Debug, Deserialize)]
struct OddsEvent {
    commence_time: DateTime<Utc>,
    home_team: String,
    away_team: String,
    #[serde(default)]
    bookmakers: Vec<Bookmaker>,
}

#[derive(Debug, Deserialize)]
struct Bookmaker {
    key: String,
    #[serde(default)]
    markets: Vec<Market>,
}

#[derive(Debug, Deserialize)]
struct Market {
    key: String,
    #[serde(default)]
    outcomes: Vec<Outcome>,
}

#[derive(Debug, Deserialize)]
struct Outcome {
    name: String,
    price: f64,
}

/// Odds endpoint for a sport, e.g. `soccer_epl` in region `uk`.
///
/// The credential is appended later from the source descriptor.
pub fn build_url(base: &str, sport_key: &str, regions: &str) -> Result<String, url::ParseError> {
    let mut url = Url::parse(base)?.join(&format!("v4/sports/{}/odds", sport_key))?;
    url.query_pairs_mut()
        .append_pair("regions", regions)
        .append_pair("markets", H2H)
        .append_pair("oddsFormat", "decimal")
        .append_pair("dateFormat", "iso");
    Ok(url.into())
}

fn h2h(bookmaker: &Bookmaker) -> Option<&Market> {
    bookmaker.markets.iter().find(|m| m.key == H2H)
}

/// Bookmaker whose h2h prices sum highest. Ties go to the first listed.
fn best_bookmaker(event: &OddsEvent) -> Option<(&Bookmaker, &Market)> {
    let mut best: Option<(&Bookmaker, &Market, f64)> = None;
    for bookmaker in &event.bookmakers {
        let Some(market) = h2h(bookmaker) else {
            continue;
        };
        let total: f64 = market.outcomes.iter().map(|o| o.price).sum();
        if best.is_none_or(|(_, _, top)| total > top) {
            best = Some((bookmaker, market, total));
        }
    }
    best.map(|(b, m, _)| (b, m))
}

fn price(market: &Market, name: &str) -> String {
    market
        .outcomes
        .iter()
        .find(|o| o.name.eq_ignore_ascii_case(name))
        .map(|o| o.price.to_string())
        .unwrap_or_default()
}

/// Decode an odds API response body into a raw table.
pub fn events_to_raw(body: &[u8]) -> Result<RawTable, ParseError> {
    let events: Vec<OddsEvent> = serde_json::from_slice(body)?;

    let rows = events
        .iter()
        .map(|event| {
            let (bookmaker, home, draw, away) = match best_bookmaker(event) {
                Some((bookmaker, market)) => (
                    bookmaker.key.clone(),
                    price(market, &event.home_team),
                    price(market, "Draw"),
                    price(market, &event.away_team),
                ),
                None => Default::default(),
            };
            vec![
                event.commence_time.date_naive().format("%Y-%m-%d").to_string(),
                event.home_team.clone(),
                event.away_team.clone(),
                event.commence_time.to_rfc3339(),
                bookmaker,
                home,
                draw,
                away,
            ]
        })
        .collect();

    Ok(RawTable::new(
        ODDS_COLUMNS.iter().map(|c| c.to_string()).collect(),
        rows,
    ))
}
