//! Text decoding and the CSV table codec.
//!
//! Fetched CSV payloads are decoded as UTF-8 and fall back to Windows-1252,
//! which decodes any byte sequence. Parsing is strict first; if that fails, a
//! lenient pass drops malformed rows instead of failing the whole source.
//! Persisted tables are always written as UTF-8 and read back strictly.

use std::mem::take;

use thiserror::Error;
use tracing::{debug, warn};

use crate::models::{RawTable, Row, Table, SOURCE_COLUMN};

/// Errors raised while turning a payload into a table.
#[derive(Debug, Error)]
pub enum ParseError {
    #[error("content is not valid UTF-8")]
    Encoding,

    #[error("unterminated quoted field starting on line {0}")]
    UnterminatedQuote(usize),

    #[error("line {line} has {found} fields, expected {expected}")]
    Ragged {
        line: usize,
        found: usize,
        expected: usize,
    },

    #[error("no table found: {0}")]
    NoTable(String),

    #[error("invalid selector: {0}")]
    Selector(String),

    #[error("malformed JSON: {0}")]
    Json(#[from] serde_json::Error),
}

/// Encoding a payload was decoded with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextEncoding {
    Utf8,
    Windows1252,
}

/// Decode bytes as UTF-8 (BOM stripped), falling back to Windows-1252.
pub fn decode_text(bytes: &[u8]) -> (String, TextEncoding) {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    match std::str::from_utf8(bytes) {
        Ok(text) => (text.to_string(), TextEncoding::Utf8),
        Err(_) => (
            bytes.iter().map(|&b| windows_1252(b)).collect(),
            TextEncoding::Windows1252,
        ),
    }
}

fn windows_1252(b: u8) -> char {
    const HIGH: [char; 32] = [
        '€', '\u{81}', '‚', 'ƒ', '„', '…', '†', '‡', 'ˆ', '‰', 'Š', '‹', 'Œ', '\u{8d}', 'Ž',
        '\u{8f}', '\u{90}', '‘', '’', '“', '”', '•', '–', '—', '˜', '™', 'š', '›', 'œ', '\u{9d}',
        'ž', 'Ÿ',
    ];
    match b {
        0x80..=0x9f => HIGH[(b - 0x80) as usize],
        _ => b as char,
    }
}

/// How to treat malformed rows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseMode {
    /// Any malformed row fails the parse.
    Strict,
    /// Malformed rows are dropped and counted.
    Lenient,
}

/// Result of a CSV parse.
#[derive(Debug)]
pub struct Parsed {
    pub table: RawTable,
    /// Rows dropped by a lenient parse.
    pub dropped: usize,
}

struct Record {
    line: usize,
    fields: Vec<String>,
}

/// Split text into records (quotes and CRLF tolerant). Blank lines are skipped.
/// A quote opens a quoted field only as the field's first character.
/// Returns the starting line of an unterminated quoted field, if any; the
/// partial record it swallowed is discarded.
fn tokenize(text: &str, sep: char) -> (Vec<Record>, Option<usize>) {
    let mut records = Vec::new();
    let mut field = String::new();
    let mut fields = Vec::new();
    let mut in_quotes = false;
    let mut line = 1;
    let mut record_line = 1;
    let mut quote_line = 0;
    let mut field_start = true;
    let mut chars = text.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '"' => {
                if in_quotes {
                    if matches!(chars.peek(), Some('"')) {
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                } else if field_start {
                    in_quotes = true;
                    quote_line = line;
                } else {
                    // A stray quote inside an unquoted field is literal.
                    field.push('"');
                }
                field_start = false;
            }
            c if c == sep && !in_quotes => {
                fields.push(take(&mut field));
                field_start = true;
            }
            '\n' | '\r' if !in_quotes => {
                if ch == '\r' && matches!(chars.peek(), Some('\n')) {
                    chars.next();
                }
                fields.push(take(&mut field));
                if !(fields.len() == 1 && fields[0].is_empty()) {
                    records.push(Record {
                        line: record_line,
                        fields: take(&mut fields),
                    });
                } else {
                    fields.clear();
                }
                line += 1;
                record_line = line;
                field_start = true;
            }
            _ => {
                field_start = false;
                if ch == '\n' {
                    line += 1;
                }
                field.push(ch);
            }
        }
    }

    if in_quotes {
        return (records, Some(quote_line));
    }

    fields.push(field);
    if !(fields.len() == 1 && fields[0].is_empty()) {
        records.push(Record {
            line: record_line,
            fields,
        });
    }
    (records, None)
}

/// Parse CSV text with a header row.
///
/// Short rows are padded. Long rows are accepted when the surplus cells are
/// empty (trailing separators); otherwise they are malformed.
pub fn parse_csv(text: &str, mode: ParseMode) -> Result<Parsed, ParseError> {
    let (records, unterminated) = tokenize(text, ',');
    let mut dropped = 0;

    if let Some(line) = unterminated {
        match mode {
            ParseMode::Strict => return Err(ParseError::UnterminatedQuote(line)),
            ParseMode::Lenient => dropped += 1,
        }
    }

    let mut records = records.into_iter();
    let header = match records.next() {
        Some(record) => record.fields,
        None => {
            return Ok(Parsed {
                table: RawTable::default(),
                dropped,
            })
        }
    };
    let width = header.len();

    let mut rows = Vec::new();
    for Record { line, mut fields } in records {
        while fields.len() > width && fields.last().is_some_and(|f| f.trim().is_empty()) {
            fields.pop();
        }
        if fields.len() > width {
            match mode {
                ParseMode::Strict => {
                    return Err(ParseError::Ragged {
                        line,
                        found: fields.len(),
                        expected: width,
                    })
                }
                ParseMode::Lenient => {
                    dropped += 1;
                    continue;
                }
            }
        }
        rows.push(fields);
    }

    Ok(Parsed {
        table: RawTable::new(header, rows),
        dropped,
    })
}

/// Read a fetched CSV payload: encoding fallback, then strict, then lenient.
pub fn read_raw_table(bytes: &[u8]) -> Result<RawTable, ParseError> {
    let (text, encoding) = decode_text(bytes);
    if encoding != TextEncoding::Utf8 {
        debug!("Payload is not UTF-8, decoded as {:?}", encoding);
    }

    match parse_csv(&text, ParseMode::Strict) {
        Ok(parsed) => Ok(parsed.table),
        Err(e) => {
            warn!("Strict CSV parse failed ({}), retrying leniently", e);
            let parsed = parse_csv(&text, ParseMode::Lenient)?;
            if parsed.dropped > 0 {
                warn!("Dropped {} malformed rows", parsed.dropped);
            }
            Ok(parsed.table)
        }
    }
}

/// Read a persisted table written by [`table_to_csv`]. No fallbacks.
pub fn read_persisted(bytes: &[u8], fallback_source: &str) -> Result<Table, ParseError> {
    let text = std::str::from_utf8(bytes).map_err(|_| ParseError::Encoding)?;
    let parsed = parse_csv(text, ParseMode::Strict)?;
    Ok(table_from_raw(&parsed.table, fallback_source))
}

/// Rebuild a table from canonical column names. Rows without a provenance
/// cell are tagged with `fallback_source`.
pub fn table_from_raw(raw: &RawTable, fallback_source: &str) -> Table {
    let mut table = Table::with_columns(raw.columns.iter().filter(|c| !c.is_empty()));
    for cells in &raw.rows {
        let mut row = Row::new(fallback_source);
        for (column, cell) in raw.columns.iter().zip(cells) {
            if column.is_empty() || cell.is_empty() {
                continue;
            }
            row.set(column, cell.clone());
        }
        if row.source.is_empty() {
            row.source = fallback_source.to_string();
        }
        table.push(row);
    }
    if !table.is_empty() {
        table.add_column(SOURCE_COLUMN);
    }
    table
}

fn needs_quotes(field: &str, sep: char) -> bool {
    field.contains(sep) || field.contains('"') || field.contains('\n') || field.contains('\r')
}

/// Append one CSV row.
fn push_row<'a>(out: &mut String, cells: impl IntoIterator<Item = &'a str>) {
    let mut first = true;
    for cell in cells {
        if !first {
            out.push(',');
        }
        first = false;
        if needs_quotes(cell, ',') {
            out.push('"');
            out.push_str(&cell.replace('"', "\"\""));
            out.push('"');
        } else {
            out.push_str(cell);
        }
    }
    out.push('\n');
}

/// Serialize a table with a header row. Missing cells are empty.
pub fn table_to_csv(table: &Table) -> Vec<u8> {
    let mut out = String::new();
    push_row(&mut out, table.columns().iter().map(String::as_str));
    for row in table.rows() {
        push_row(&mut out, table.cells(row));
    }
    out.into_bytes()
}

/// Serialize a raw table with a header row.
pub fn raw_to_csv(raw: &RawTable) -> Vec<u8> {
    let mut out = String::new();
    push_row(&mut out, raw.columns.iter().map(String::as_str));
    for row in &raw.rows {
        push_row(&mut out, row.iter().map(String::as_str));
    }
    out.into_bytes()
}
