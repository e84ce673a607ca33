//! Season codes and labels.
//!
//! A season code is a pair of two-digit years (`2425`); its label is the
//! four-digit pair `2024/2025`. Two-digit years from 90 upward belong to the
//! 1900s. Inference never fails: identifiers without a recognizable pair are
//! returned unchanged.

use std::sync::LazyLock;

use chrono::{Datelike, NaiveDate};
use regex::Regex;

// Ordered by priority; earlier shapes are more specific.
static FULL_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(\d{4})[-/_](\d{4})(?:[^0-9]|$)").expect("valid season regex")
});
static LONG_SHORT_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(\d{4})[-/_](\d{2})(?:[^0-9]|$)").expect("valid season regex")
});
static SHORT_PAIR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(\d{2})[-_:/](\d{2})(?:[^0-9]|$)").expect("valid season regex")
});
static BARE_CODE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:^|[^0-9])(\d{2})(\d{2})(?:[^0-9]|$)").expect("valid season regex")
});

fn century(yy: u32) -> u32 {
    if yy >= 90 {
        1900 + yy
    } else {
        2000 + yy
    }
}

fn label_from_short(first: u32, second: u32) -> Option<String> {
    if (first + 1) % 100 != second {
        return None;
    }
    let start = century(first);
    Some(format!("{}/{}", start, start + 1))
}

fn label_from_long(start: u32, end: u32) -> Option<String> {
    (end == start + 1).then(|| format!("{}/{}", start, end))
}

fn label_from_long_short(start: u32, end: u32) -> Option<String> {
    ((start + 1) % 100 == end).then(|| format!("{}/{}", start, start + 1))
}

fn first_match(re: &Regex, id: &str, to_label: fn(u32, u32) -> Option<String>) -> Option<String> {
    re.captures_iter(id).find_map(|caps| {
        let a = caps.get(1)?.as_str().parse().ok()?;
        let b = caps.get(2)?.as_str().parse().ok()?;
        to_label(a, b)
    })
}

/// Label for an exact four-digit code (`"2425"` → `"2024/2025"`).
pub fn season_label(code: &str) -> Option<String> {
    let code = code.trim();
    if code.len() != 4 || !code.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    let first = code[..2].parse().ok()?;
    let second = code[2..].parse().ok()?;
    label_from_short(first, second)
}

/// Find a season label anywhere in `id`, or `None` if nothing matches.
pub fn find_season(id: &str) -> Option<String> {
    first_match(&FULL_PAIR, id, label_from_long)
        .or_else(|| first_match(&LONG_SHORT_PAIR, id, label_from_long_short))
        .or_else(|| first_match(&SHORT_PAIR, id, label_from_short))
        .or_else(|| first_match(&BARE_CODE, id, label_from_short))
}

/// Season label for an identifier such as a code, file name or locator.
///
/// Recognized shapes, in priority order: `2024-2025`, `2014-15`, `25-26`
/// (also `_`, `:` and `/` separators), and bare codes like `E0_2425`.
/// Anything else comes back unchanged.
pub fn infer_season(id: &str) -> String {
    find_season(id).unwrap_or_else(|| id.trim().to_string())
}

/// Season code for a season directory such as `data/raw/25-26` (→ `2526`).
pub fn code_from_season_dir(dir: &str) -> String {
    let base = dir
        .trim_end_matches(['/', '\\'])
        .rsplit(['/', '\\'])
        .next()
        .unwrap_or(dir);
    base.replace(['-', '_'], "")
}

/// Candidate season codes around `today`, newest first.
pub fn candidate_codes(today: NaiveDate) -> Vec<String> {
    let yy = today.year().rem_euclid(100) as u32;
    [1, 0, 99]
        .iter()
        .map(|offset| {
            let start = (yy + offset) % 100;
            format!("{:02}{:02}", start, (start + 1) % 100)
        })
        .collect()
}

/// Code of the season in progress on `today`. Seasons start in July.
pub fn current_code(today: NaiveDate) -> String {
    let start = if today.month() >= 7 {
        today.year()
    } else {
        today.year() - 1
    };
    let yy = start.rem_euclid(100);
    format!("{:02}{:02}", yy, (yy + 1) % 100)
}
