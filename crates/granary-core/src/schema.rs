//! Table schemas for ingested CSV files.
//!
//! Covers identifier sanitization (table and column names), delimiter
//! sniffing, per-column type inference and cell coercion. Everything here is
//! pure and never fails: a value that does not fit a type simply rules that
//! type out during inference, and becomes NULL during loading.

use std::collections::HashSet;
use std::fmt;

use chrono::{NaiveDate, NaiveDateTime};
use sha2::{Digest, Sha256};

/// Maximum identifier length accepted by PostgreSQL, in bytes.
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Prefix of every ingested table.
pub const TABLE_PREFIX: &str = "data_";

/// Delimiters tried by [`sniff_delimiter`], in tie-breaking order.
pub const CANDIDATE_DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

const DATE_FORMATS: &[&str] = &["%Y-%m-%d", "%d/%m/%Y"];
const TIMESTAMP_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%d/%m/%Y %H:%M:%S",
    "%Y-%m-%d %H:%M",
];

// =============================================================================
// Types
// =============================================================================

/// Column type of an ingested table.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ColumnType {
    Boolean,
    Integer,
    Double,
    Date,
    Timestamp,
    Text,
}

impl ColumnType {
    /// PostgreSQL type used in `CREATE TABLE`.
    pub fn sql_type(&self) -> &'static str {
        match self {
            Self::Boolean => "BOOLEAN",
            Self::Integer => "BIGINT",
            Self::Double => "DOUBLE PRECISION",
            Self::Date => "DATE",
            Self::Timestamp => "TIMESTAMP",
            Self::Text => "TEXT",
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Boolean => "boolean",
            Self::Integer => "integer",
            Self::Double => "double",
            Self::Date => "date",
            Self::Timestamp => "timestamp",
            Self::Text => "text",
        };
        f.write_str(name)
    }
}

/// A single typed cell, ready to be bound to a query.
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Date(NaiveDate),
    Timestamp(NaiveDateTime),
    Text(String),
}

impl CellValue {
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Column {
    pub name: String,
    pub column_type: ColumnType,
}

/// Target table of one resource: its name and ordered columns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TableSchema {
    pub table: String,
    pub columns: Vec<Column>,
}

impl TableSchema {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Lowercases `raw`, maps every non-alphanumeric run to a single `_` and
/// trims underscores at both ends. May return an empty string.
fn normalize_identifier(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut pending_underscore = false;
    for c in raw.chars() {
        if c.is_ascii_alphanumeric() {
            if pending_underscore && !out.is_empty() {
                out.push('_');
            }
            pending_underscore = false;
            out.push(c.to_ascii_lowercase());
        } else {
            pending_underscore = true;
        }
    }
    out
}

fn truncate_identifier(mut name: String, max_len: usize) -> String {
    // Identifiers are ASCII, so any byte index is a char boundary.
    name.truncate(max_len);
    while name.ends_with('_') {
        name.pop();
    }
    name
}

/// Sanitizes one column header into a PostgreSQL identifier.
///
/// # Examples
///
/// ```
/// use granary_core::schema::sanitize_identifier;
///
/// assert_eq!(sanitize_identifier("Importo (€) Totale"), "importo_totale");
/// assert_eq!(sanitize_identifier("2023"), "col_2023");
/// assert_eq!(sanitize_identifier("???"), "column");
/// ```
pub fn sanitize_identifier(raw: &str) -> String {
    let normalized = normalize_identifier(raw);
    let name = if normalized.is_empty() {
        "column".to_string()
    } else if normalized.starts_with(|c: char| c.is_ascii_digit()) {
        format!("col_{}", normalized)
    } else {
        normalized
    };
    truncate_identifier(name, MAX_IDENTIFIER_LEN)
}

/// Sanitizes a header row, keeping column order.
///
/// Names that collide after sanitization get the column's 1-based position
/// appended, so every returned name is distinct.
pub fn sanitize_column_names<S: AsRef<str>>(headers: &[S]) -> Vec<String> {
    let mut used = HashSet::with_capacity(headers.len());
    let mut names = Vec::with_capacity(headers.len());

    for (index, header) in headers.iter().enumerate() {
        let base = sanitize_identifier(header.as_ref());
        let mut candidate = base.clone();
        let mut attempt = 0usize;
        while used.contains(&candidate) {
            let suffix = if attempt == 0 {
                format!("_{}", index + 1)
            } else {
                format!("_{}_{}", index + 1, attempt)
            };
            let stem = truncate_identifier(base.clone(), MAX_IDENTIFIER_LEN - suffix.len());
            candidate = format!("{}{}", stem, suffix);
            attempt += 1;
        }
        used.insert(candidate.clone());
        names.push(candidate);
    }

    names
}

/// Derives the table name of a resource from its identifier.
///
/// Names that would exceed the identifier limit are truncated and suffixed
/// with 8 hex digits of the SHA-256 of the full name.
///
/// # Examples
///
/// ```
/// use granary_core::schema::table_name_for;
///
/// assert_eq!(table_name_for("A1B2-c3"), "data_a1b2_c3");
/// assert!(table_name_for(&"x".repeat(100)).len() <= 63);
/// ```
pub fn table_name_for(resource_id: &str) -> String {
    let normalized = normalize_identifier(resource_id);
    let full = format!(
        "{}{}",
        TABLE_PREFIX,
        if normalized.is_empty() {
            "unnamed"
        } else {
            normalized.as_str()
        }
    );
    if full.len() <= MAX_IDENTIFIER_LEN {
        return full;
    }

    let digest = Sha256::digest(full.as_bytes());
    let hash: String = digest[..4].iter().map(|b| format!("{:02x}", b)).collect();
    let stem = truncate_identifier(full, MAX_IDENTIFIER_LEN - hash.len() - 1);
    format!("{}_{}", stem, hash)
}

// =============================================================================
// CSV layout detection
// =============================================================================

/// Picks the delimiter of a CSV file from its header line.
///
/// Counts each candidate outside double quotes; the most frequent wins, with
/// ties resolved in [`CANDIDATE_DELIMITERS`] order. Defaults to `,`.
pub fn sniff_delimiter(header_line: &str) -> u8 {
    let mut counts = [0usize; CANDIDATE_DELIMITERS.len()];
    let mut in_quotes = false;
    for byte in header_line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(pos) = CANDIDATE_DELIMITERS.iter().position(|&d| d == byte) {
            counts[pos] += 1;
        }
    }

    let mut best = 0;
    for (pos, &count) in counts.iter().enumerate() {
        if count > counts[best] {
            best = pos;
        }
    }
    CANDIDATE_DELIMITERS[best]
}

/// Returns true if the first line looks like a JSON, XML or HTML document.
///
/// Catalogs sometimes serve an API error body under a `.csv` name.
pub fn looks_like_document(first_line: &str) -> bool {
    let line = first_line.trim_start_matches('\u{feff}').trim_start();
    if line.starts_with('{') || line.starts_with('<') {
        return true;
    }
    match line.strip_prefix('[') {
        Some(rest) => matches!(
            rest.trim_start().chars().next(),
            None | Some('{' | '"' | '[' | ']')
        ),
        None => false,
    }
}

// =============================================================================
// Inference
// =============================================================================

fn parse_bool(value: &str) -> Option<bool> {
    if value.eq_ignore_ascii_case("true") {
        Some(true)
    } else if value.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}

/// Rejects numbers with leading zeros ("00123"): they are codes, not amounts.
fn has_leading_zero(value: &str) -> bool {
    let digits = value.trim_start_matches(['+', '-']);
    digits.len() > 1 && digits.starts_with('0') && !digits.starts_with("0.") && !digits.starts_with("0,")
}

fn parse_int(value: &str) -> Option<i64> {
    if has_leading_zero(value) {
        return None;
    }
    value.parse().ok()
}

/// Digits with an optional sign, no separators or exponent.
fn is_integer_literal(value: &str) -> bool {
    let digits = value.strip_prefix(['+', '-']).unwrap_or(value);
    !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit())
}

fn parse_float(value: &str, decimal_comma: bool) -> Option<f64> {
    if has_leading_zero(value) {
        return None;
    }
    // Integers past the i64 range are identifiers; a double would lose digits.
    if is_integer_literal(value) && parse_int(value).is_none() {
        return None;
    }
    // Rust accepts "inf" and "NaN"; CSV data never means those.
    if !value
        .chars()
        .all(|c| c.is_ascii_digit() || matches!(c, '+' | '-' | '.' | ',' | 'e' | 'E'))
    {
        return None;
    }
    if value.contains(',') {
        if !decimal_comma || value.contains('.') || value.matches(',').count() > 1 {
            return None;
        }
        return value.replace(',', ".").parse().ok();
    }
    value.parse().ok()
}

fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
}

fn parse_timestamp(value: &str) -> Option<NaiveDateTime> {
    TIMESTAMP_FORMATS
        .iter()
        .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
}

/// Tracks which types every non-empty sampled value of a column still fits.
#[derive(Debug, Clone)]
pub struct ColumnInference {
    decimal_comma: bool,
    seen: usize,
    boolean: bool,
    integer: bool,
    double: bool,
    date: bool,
    timestamp: bool,
}

impl ColumnInference {
    pub fn new(decimal_comma: bool) -> Self {
        Self {
            decimal_comma,
            seen: 0,
            boolean: true,
            integer: true,
            double: true,
            date: true,
            timestamp: true,
        }
    }

    pub fn observe(&mut self, raw: &str) {
        let value = raw.trim();
        if value.is_empty() {
            return;
        }
        self.seen += 1;
        if self.boolean && parse_bool(value).is_none() {
            self.boolean = false;
        }
        if self.integer && parse_int(value).is_none() {
            self.integer = false;
        }
        if self.double && parse_float(value, self.decimal_comma).is_none() {
            self.double = false;
        }
        if self.date && parse_date(value).is_none() {
            self.date = false;
        }
        if self.timestamp && parse_timestamp(value).is_none() {
            self.timestamp = false;
        }
    }

    /// Narrowest type that every observed value fits.
    ///
    /// Integers that share a column with decimals widen to double, since every
    /// integer also parses as a double.
    pub fn finish(&self) -> ColumnType {
        if self.seen == 0 {
            ColumnType::Text
        } else if self.boolean {
            ColumnType::Boolean
        } else if self.integer {
            ColumnType::Integer
        } else if self.double {
            ColumnType::Double
        } else if self.date {
            ColumnType::Date
        } else if self.timestamp {
            ColumnType::Timestamp
        } else {
            ColumnType::Text
        }
    }
}

/// Coerces a raw cell to its column type.
///
/// Empty cells and values that do not fit become [`CellValue::Null`]. Text is
/// kept verbatim, surrounding whitespace included.
pub fn coerce(raw: &str, column_type: ColumnType, decimal_comma: bool) -> CellValue {
    let value = raw.trim();
    if value.is_empty() {
        return CellValue::Null;
    }
    let coerced = match column_type {
        ColumnType::Boolean => parse_bool(value).map(CellValue::Bool),
        ColumnType::Integer => parse_int(value).map(CellValue::Int),
        ColumnType::Double => parse_float(value, decimal_comma).map(CellValue::Float),
        ColumnType::Date => parse_date(value).map(CellValue::Date),
        ColumnType::Timestamp => parse_timestamp(value).map(CellValue::Timestamp),
        ColumnType::Text => Some(CellValue::Text(raw.to_string())),
    };
    coerced.unwrap_or(CellValue::Null)
}

/// Infers one type per column from sampled rows.
///
/// Rows shorter than `width` contribute nothing to the missing columns; cells
/// past `width` are ignored.
pub fn infer_column_types<R, I, S>(rows: R, width: usize, decimal_comma: bool) -> Vec<ColumnType>
where
    R: IntoIterator<Item = I>,
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let mut columns = vec![ColumnInference::new(decimal_comma); width];
    for row in rows {
        for (column, value) in columns.iter_mut().zip(row) {
            column.observe(value.as_ref());
        }
    }
    columns.iter().map(ColumnInference::finish).collect()
}
