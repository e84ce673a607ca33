//! HTML table extraction.
//!
//! Stats pages repeat their header row inside the body and sometimes ship
//! whole tables inside HTML comments that are revealed by script. Both are
//! handled here so that callers only see clean header + body blocks.

use std::collections::{BTreeSet, HashSet};
use std::sync::LazyLock;

use regex::Regex;
use scraper::{ElementRef, Html, Node, Selector};
use tracing::debug;

use crate::codec::ParseError;
use crate::models::{path_segment, RawTable};

static SQUAD_HREF: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"/en/squads/([a-z0-9]{8})/").expect("valid squad link regex"));

struct Selectors {
    tables: Selector,
    head_rows: Selector,
    body_rows: Selector,
    rows: Selector,
    cells: Selector,
    header_cells: Selector,
    caption: Selector,
}

impl Selectors {
    fn new(table_selector: &str) -> Result<Self, ParseError> {
        let parse = |s: &str| Selector::parse(s).map_err(|e| ParseError::Selector(e.to_string()));
        Ok(Self {
            tables: parse(table_selector)?,
            head_rows: parse("thead tr")?,
            body_rows: parse("tbody tr")?,
            rows: parse("tr")?,
            cells: parse("th, td")?,
            header_cells: parse("th")?,
            caption: parse("caption")?,
        })
    }
}

fn cell_text(cell: ElementRef<'_>) -> String {
    cell.text()
        .flat_map(str::split_whitespace)
        .collect::<Vec<_>>()
        .join(" ")
}

fn row_cells(row: ElementRef<'_>, sel: &Selectors) -> Vec<String> {
    row.select(&sel.cells)
        // Only direct cells; nested tables bring their own rows.
        .filter(|c| c.parent().map(|p| p.id()) == Some(row.id()))
        .map(cell_text)
        .collect()
}

fn is_repeated_header(row: ElementRef<'_>) -> bool {
    row.value().classes().any(|c| c == "thead" || c == "over_header")
}

fn extract_one(table: ElementRef<'_>, sel: &Selectors) -> Option<RawTable> {
    let header_row = table.select(&sel.head_rows).last().or_else(|| {
        table
            .select(&sel.rows)
            .find(|r| r.select(&sel.header_cells).next().is_some())
    })?;
    let header = row_cells(header_row, sel);
    if header.iter().all(String::is_empty) {
        return None;
    }

    let mut body: Vec<ElementRef<'_>> = table.select(&sel.body_rows).collect();
    if body.is_empty() {
        body = table
            .select(&sel.rows)
            .filter(|r| r.id() != header_row.id())
            .collect();
    }

    let rows = body
        .into_iter()
        .filter(|r| !is_repeated_header(*r))
        .map(|r| row_cells(r, sel))
        .filter(|cells| !cells.iter().all(String::is_empty) && *cells != header)
        .collect();

    Some(RawTable::new(header, rows))
}

fn caption_of(table: ElementRef<'_>, sel: &Selectors) -> Option<String> {
    table
        .select(&sel.caption)
        .find(|c| c.parent().map(|p| p.id()) == Some(table.id()))
        .map(cell_text)
        .filter(|text| !text.is_empty())
}

/// A table together with its `<caption>` text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CaptionedTable {
    pub caption: Option<String>,
    pub table: RawTable,
}

fn extract_from(document: &Html, sel: &Selectors, out: &mut Vec<CaptionedTable>) {
    out.extend(document.select(&sel.tables).filter_map(|table| {
        Some(CaptionedTable {
            caption: caption_of(table, sel),
            table: extract_one(table, sel)?,
        })
    }));
}

/// All tables matching `selector`, in document order.
pub fn extract_tables(html: &str, selector: &str) -> Result<Vec<RawTable>, ParseError> {
    Ok(extract_captioned(html, selector)?
        .into_iter()
        .map(|t| t.table)
        .collect())
}

/// All tables matching `selector` with their captions, in document order.
/// Tables hidden in HTML comments follow the visible ones.
pub fn extract_captioned(html: &str, selector: &str) -> Result<Vec<CaptionedTable>, ParseError> {
    let sel = Selectors::new(selector)?;
    let document = Html::parse_document(html);

    let mut tables = Vec::new();
    extract_from(&document, &sel, &mut tables);

    let visible = tables.len();
    for node in document.tree.values() {
        if let Node::Comment(comment) = node {
            let text: &str = comment;
            if text.contains("<table") {
                extract_from(&Html::parse_fragment(text), &sel, &mut tables);
            }
        }
    }
    debug!(
        "Extracted {} tables ({} from comments)",
        tables.len(),
        tables.len() - visible
    );
    Ok(tables)
}

/// Pick the table to keep: the widest one containing every `require`d
/// column, or the first table when nothing is required.
pub fn select_table(tables: Vec<RawTable>, require: &[String]) -> Option<RawTable> {
    if require.is_empty() {
        return tables.into_iter().next();
    }
    tables
        .into_iter()
        .filter(|t| require.iter().all(|c| t.has_column(c)))
        // max_by_key keeps the last maximum; reverse so ties go to the earliest table.
        .rev()
        .max_by_key(RawTable::width)
}

/// File-friendly names for a page's tables: the caption with spaces turned
/// into underscores, else `table_N` by position. Clashes get a `_2` suffix.
pub fn table_names(tables: &[CaptionedTable]) -> Vec<String> {
    let mut seen = HashSet::new();
    tables
        .iter()
        .enumerate()
        .map(|(i, t)| {
            let base = t
                .caption
                .as_deref()
                .map(path_segment)
                .filter(|s| !s.is_empty())
                .unwrap_or_else(|| format!("table_{}", i + 1));
            let mut name = base.clone();
            let mut n = 2;
            while !seen.insert(name.clone()) {
                name = format!("{}_{}", base, n);
                n += 1;
            }
            name
        })
        .collect()
}

/// A team linked from a league page.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct TeamLink {
    pub name: String,
    /// Eight-character squad id from the link target.
    pub id: String,
}

/// Teams linked through `/en/squads/<id>/` anchors, sorted by name. Each id
/// appears once, under the first name in that order.
pub fn find_team_links(html: &str) -> Result<Vec<TeamLink>, ParseError> {
    let anchors = Selector::parse("a[href*='/en/squads/']")
        .map_err(|e| ParseError::Selector(e.to_string()))?;
    let document = Html::parse_document(html);

    let links: BTreeSet<TeamLink> = document
        .select(&anchors)
        .filter_map(|a| {
            let href = a.value().attr("href")?;
            let id = SQUAD_HREF.captures(href)?.get(1)?.as_str().to_string();
            let name = cell_text(a);
            let generic = matches!(name.to_lowercase().as_str(), "squad" | "squads");
            (!name.is_empty() && !generic).then_some(TeamLink { name, id })
        })
        .collect();

    let mut ids = HashSet::new();
    Ok(links
        .into_iter()
        .filter(|link| ids.insert(link.id.clone()))
        .collect())
}

/// Extract and select in one step. No matching table is a parse failure.
pub fn read_html_table(
    html: &str,
    selector: &str,
    require: &[String],
) -> Result<RawTable, ParseError> {
    let tables = extract_tables(html, selector)?;
    let found = tables.len();
    select_table(tables, require).ok_or_else(|| {
        ParseError::NoTable(if require.is_empty() {
            format!("no tables match {:?}", selector)
        } else {
            format!(
                "{} tables match {:?} but none has columns {:?}",
                found, selector, require
            )
        })
    })
}
