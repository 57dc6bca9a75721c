//! CSV reading and normalization.
//!
//! Turns raw export bytes into ordered header/value rows for one profile:
//! sniffs the delimiter, decides whether the first line is a header, skips
//! blank and repeated header lines, then applies the profile's row transforms.
//! Typed columns are checked separately by [`typed_value`].

use std::path::Path;
use std::str::FromStr;

use chrono::{NaiveDate, NaiveDateTime};
use rust_decimal::Decimal;
use serde::Serialize;
use sluice_db::ColumnType;
use tracing::{debug, warn};

use crate::error::{ReadError, RowError};
use crate::registry::{apply_header_transforms, HeaderMode, RowTransform, SchemaProfile};

const DELIMITERS: [u8; 4] = [b',', b';', b'\t', b'|'];

/// Where the header row of a file came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum HeaderSource {
    /// The file's first line
    File,
    /// The profile's canonical headers, the first line being data
    Canonical,
}

/// One data row, in file order, after transforms.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    /// 1-based line number in the source file
    pub line: u64,
    pub fields: Vec<(String, String)>,
}

impl Row {
    pub fn get(&self, column: &str) -> Option<&str> {
        self.fields
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value.as_str())
    }

    /// Value of `column`, `None` when absent or blank.
    pub fn non_empty(&self, column: &str) -> Option<&str> {
        self.get(column).filter(|v| !v.trim().is_empty())
    }
}

/// A parsed file ready for loading.
#[derive(Debug, Clone)]
pub struct CsvFile {
    /// Stored column names (file headers after transforms)
    pub headers: Vec<String>,
    pub rows: Vec<Row>,
    pub delimiter: u8,
    pub header_source: HeaderSource,
    /// Repeated header lines dropped from the data
    pub repeated_headers: usize,
}

/// Read and parse `path` for `profile`.
pub async fn read_csv(path: &Path, profile: &SchemaProfile) -> Result<CsvFile, ReadError> {
    let bytes = tokio::fs::read(path).await?;
    let text = decode(&bytes)?;
    parse_csv(text, profile)
}

/// Strict UTF-8 view of `bytes`, without a leading byte order mark.
pub fn decode(bytes: &[u8]) -> Result<&str, ReadError> {
    let bytes = bytes.strip_prefix(b"\xef\xbb\xbf").unwrap_or(bytes);
    std::str::from_utf8(bytes).map_err(|err| {
        let offset = err.valid_up_to();
        let line = bytes[..offset].iter().filter(|b| **b == b'\n').count() as u64 + 1;
        ReadError::Encoding { line, offset }
    })
}

/// Parse file contents for `profile`.
pub fn parse_csv(text: &str, profile: &SchemaProfile) -> Result<CsvFile, ReadError> {
    let text = text.strip_prefix('\u{feff}').unwrap_or(text);
    let first_line = text.lines().find(|l| !l.trim().is_empty()).ok_or(ReadError::Empty)?;
    let delimiter = sniff_delimiter(first_line);

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_reader(text.as_bytes());

    let mut records = Vec::new();
    for result in reader.records() {
        let record = result?;
        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }
        let line = record.position().map(|p| p.line()).unwrap_or(0);
        let values: Vec<String> = record.iter().map(str::to_string).collect();
        records.push((line, values));
    }
    let mut records = records.into_iter();
    let (first_line_no, first) = records.next().ok_or(ReadError::Empty)?;

    let canonical_norm: Vec<String> = profile.headers.iter().map(|h| normalize_header(h)).collect();
    let first_norm: Vec<String> = first.iter().map(|h| normalize_header(h)).collect();
    let exact_match = trim_trailing_blank(&first_norm) == canonical_norm.as_slice();

    let header_source = match profile.header_mode {
        HeaderMode::Require if !exact_match => {
            return Err(ReadError::HeaderMismatch {
                profile: profile.code.clone(),
                found: first.iter().map(|h| clean_header(h)).collect(),
            });
        }
        HeaderMode::Require => HeaderSource::File,
        HeaderMode::Canonical => {
            if exact_match || covers_canonical(&first_norm, &canonical_norm) {
                HeaderSource::File
            } else {
                HeaderSource::Canonical
            }
        }
        HeaderMode::DetectNumeric => {
            if first.iter().any(|v| v.chars().any(char::is_alphabetic)) {
                HeaderSource::File
            } else {
                HeaderSource::Canonical
            }
        }
    };

    // (position in record, column name); unnamed columns are dropped
    let (columns, leading_data): (Vec<(usize, String)>, Option<(u64, Vec<String>)>) =
        match header_source {
            HeaderSource::File => {
                let columns = first
                    .iter()
                    .enumerate()
                    .filter_map(|(idx, raw)| {
                        let name = canonical_name(raw, &profile.headers, &canonical_norm)?;
                        Some((idx, name))
                    })
                    .collect();
                (columns, None)
            }
            HeaderSource::Canonical => {
                debug!(
                    profile = %profile.code,
                    "First line is data, assuming canonical headers"
                );
                let columns = profile.headers.iter().cloned().enumerate().collect();
                (columns, Some((first_line_no, first)))
            }
        };

    let header_norm: Vec<String> = columns.iter().map(|(_, n)| normalize_header(n)).collect();
    let file_headers: Vec<String> = columns.iter().map(|(_, n)| n.clone()).collect();

    let mut rows = Vec::new();
    let mut repeated_headers = 0;
    for (line, values) in leading_data.into_iter().chain(records) {
        let norm: Vec<String> = values.iter().map(|v| normalize_header(v)).collect();
        let norm = trim_trailing_blank(&norm);
        if norm == canonical_norm.as_slice() || norm == header_norm.as_slice() {
            warn!(profile = %profile.code, line, "Skipping repeated header row");
            repeated_headers += 1;
            continue;
        }
        if values.len() > first_width(&columns) {
            debug!(
                profile = %profile.code,
                line,
                extra = values.len() - first_width(&columns),
                "Row has more fields than headers; extras dropped"
            );
        }
        let fields: Vec<(String, String)> = columns
            .iter()
            .map(|(idx, name)| (name.clone(), values.get(*idx).cloned().unwrap_or_default()))
            .collect();
        rows.push(Row {
            line,
            fields: apply_transforms(fields, &profile.transforms),
        });
    }

    Ok(CsvFile {
        headers: apply_header_transforms(&file_headers, &profile.transforms),
        rows,
        delimiter,
        header_source,
        repeated_headers,
    })
}

fn first_width(columns: &[(usize, String)]) -> usize {
    columns.last().map(|(idx, _)| idx + 1).unwrap_or(0)
}

/// Pick the candidate delimiter that occurs most often outside quotes.
pub fn sniff_delimiter(line: &str) -> u8 {
    let mut counts = [0usize; DELIMITERS.len()];
    let mut in_quotes = false;
    for byte in line.bytes() {
        if byte == b'"' {
            in_quotes = !in_quotes;
            continue;
        }
        if in_quotes {
            continue;
        }
        if let Some(pos) = DELIMITERS.iter().position(|d| *d == byte) {
            counts[pos] += 1;
        }
    }
    let mut best = 0;
    for (idx, count) in counts.iter().enumerate() {
        if *count > counts[best] {
            best = idx;
        }
    }
    DELIMITERS[best]
}

/// Header text with BOM and quotes removed, trimmed.
fn clean_header(raw: &str) -> String {
    raw.replace('\u{feff}', "").replace('"', "").trim().to_string()
}

/// Comparison form of a header: cleaned, lower-cased, whitespace and hyphens
/// folded to `_`.
pub fn normalize_header(raw: &str) -> String {
    clean_header(raw)
        .to_lowercase()
        .chars()
        .map(|c| if c.is_whitespace() || c == '-' { '_' } else { c })
        .collect()
}

/// The canonical spelling of a file header when one compares equal,
/// otherwise the cleaned file text. `None` for unnamed columns.
fn canonical_name(raw: &str, canonical: &[String], canonical_norm: &[String]) -> Option<String> {
    let cleaned = clean_header(raw);
    if cleaned.is_empty() {
        return None;
    }
    let norm = normalize_header(&cleaned);
    match canonical_norm.iter().position(|c| *c == norm) {
        Some(pos) => Some(canonical[pos].clone()),
        None => Some(cleaned),
    }
}

fn trim_trailing_blank(values: &[String]) -> &[String] {
    let end = values
        .iter()
        .rposition(|v| !v.is_empty())
        .map(|p| p + 1)
        .unwrap_or(0);
    &values[..end]
}

/// A header line listing every canonical column, in any order, possibly
/// with extras.
fn covers_canonical(found: &[String], canonical: &[String]) -> bool {
    found.len() >= canonical.len() && canonical.iter().all(|c| found.contains(c))
}

/// Apply row transforms in order.
pub fn apply_transforms(
    mut fields: Vec<(String, String)>,
    transforms: &[RowTransform],
) -> Vec<(String, String)> {
    for transform in transforms {
        match transform {
            RowTransform::Trim => {
                for (_, value) in fields.iter_mut() {
                    let trimmed = value.trim();
                    if trimmed.len() != value.len() {
                        *value = trimmed.to_string();
                    }
                }
            }
            RowTransform::Rename { from, to } => {
                for (name, _) in fields.iter_mut() {
                    if name == from {
                        *name = to.clone();
                    }
                }
            }
            RowTransform::Combine {
                target,
                sources,
                separator,
                drop_sources,
            } => {
                let lookup = |column: &str| {
                    fields
                        .iter()
                        .find(|(name, _)| name == column)
                        .map(|(_, v)| v.clone())
                        .unwrap_or_default()
                };
                let mut combined = sources.first().map(|s| lookup(s)).unwrap_or_default();
                for source in sources.iter().skip(1) {
                    let value = lookup(source);
                    if !value.is_empty() {
                        combined.push_str(separator);
                        combined.push_str(&value);
                    }
                }
                if *drop_sources {
                    fields.retain(|(name, _)| name == target || !sources.contains(name));
                }
                match fields.iter_mut().find(|(name, _)| name == target) {
                    Some((_, value)) => *value = combined,
                    None => fields.push((target.clone(), combined)),
                }
            }
        }
    }
    fields
}

const DATE_FORMATS: &[&str] = &[
    "%Y-%m-%d", "%Y/%m/%d", "%m/%d/%y", "%m/%d/%Y", "%m-%d-%Y", "%Y%m%d", "%d-%b-%Y",
    "%b %d %Y",
];

const DATETIME_FORMATS: &[&str] = &[
    "%Y-%m-%d %H:%M:%S",
    "%Y-%m-%dT%H:%M:%S",
    "%Y/%m/%d %H:%M:%S",
    "%m/%d/%Y %H:%M:%S",
    "%m/%d/%Y %H:%M",
    "%m/%d/%Y %I:%M %p",
];

/// Stored form of `value` for a column of type `ty`.
///
/// Decimal and date columns store NULL for blank values and reject values
/// that do not parse; dates are normalized to `YYYY-MM-DD`.
pub fn typed_value(column: &str, ty: ColumnType, value: &str) -> Result<Option<String>, RowError> {
    match ty {
        ColumnType::Text | ColumnType::Varchar | ColumnType::VarcharUnique => {
            Ok(Some(value.to_string()))
        }
        ColumnType::Decimal => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            let cleaned: String = trimmed.chars().filter(|c| *c != ',' && *c != '$').collect();
            Decimal::from_str(&cleaned)
                .map(|d| Some(d.normalize().to_string()))
                .map_err(|_| malformed(column, "decimal", value))
        }
        ColumnType::Date => {
            let trimmed = value.trim();
            if trimmed.is_empty() {
                return Ok(None);
            }
            parse_date(trimmed)
                .map(|d| Some(d.format("%Y-%m-%d").to_string()))
                .ok_or_else(|| malformed(column, "date", value))
        }
    }
}

fn malformed(column: &str, kind: &'static str, value: &str) -> RowError {
    RowError::Malformed {
        column: column.to_string(),
        kind,
        value: value.to_string(),
    }
}

/// Parse the date formats seen in exports. Slash dates are month first.
pub fn parse_date(value: &str) -> Option<NaiveDate> {
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| {
            DATETIME_FORMATS
                .iter()
                .find_map(|fmt| NaiveDateTime::parse_from_str(value, fmt).ok())
                .map(|dt| dt.date())
        })
}
