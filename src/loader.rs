use crate::error::LoadError;
use crate::types::{Cell, RawFrame};
use calamine::{open_workbook_auto, Data, Reader};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use csv::ReaderBuilder;
use std::collections::HashSet;
use std::io::Read;
use std::path::Path;
use tracing::{debug, info};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadReport {
    pub total_rows: usize,
    pub blank_rows: usize,
    pub columns: usize,
}

/// Load a CSV/TSV/spreadsheet upload into a raw frame.
pub fn load_frame(path: &Path) -> Result<(RawFrame, LoadReport), LoadError> {
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_ascii_lowercase())
        .unwrap_or_default();
    let (header, rows) = match ext.as_str() {
        "csv" | "txt" => {
            let content = read_file_as_utf8(path)?;
            let delimiter = sniff_delimiter(&content);
            debug!("sniffed delimiter {:?}", delimiter as char);
            read_delimited(&content, delimiter)?
        }
        "tsv" => read_delimited(&read_file_as_utf8(path)?, b'\t')?,
        "xlsx" | "xlsm" | "xls" | "xlsb" | "ods" => read_workbook(path)?,
        other => return Err(LoadError::UnsupportedFormat(other.to_string())),
    };
    let (frame, report) = build_frame(header, rows);
    info!(
        "loaded {}: {} rows ({} blank skipped), {} columns",
        path.display(),
        frame.len(),
        report.blank_rows,
        report.columns
    );
    Ok((frame, report))
}

/// Parse CSV text that is already in memory (delimiter is sniffed).
pub fn frame_from_csv_str(content: &str) -> Result<(RawFrame, LoadReport), LoadError> {
    let (header, rows) = read_delimited(content, sniff_delimiter(content))?;
    Ok(build_frame(header, rows))
}

/// Read CSV text from any reader (stdin, an upload body).
pub fn load_reader<R: Read>(mut reader: R) -> Result<(RawFrame, LoadReport), LoadError> {
    let mut content = String::new();
    reader.read_to_string(&mut content)?;
    frame_from_csv_str(&content)
}

/// Detect the most likely field delimiter by checking consistency across the first few lines.
///
/// For each candidate (tab, semicolon, comma, pipe), count fields per line. The delimiter
/// that produces the most consistent field count (>1 field) wins.
///
/// Lines are sampled on their own, so a quoted field holding a newline is split in two
/// here. Such a first line rarely shows more than one field, which leaves the comma
/// default in place; the full parse in `read_delimited` honours the quotes.
fn sniff_delimiter(content: &str) -> u8 {
    let candidates: &[u8] = &[b'\t', b';', b',', b'|'];
    let sample_lines: Vec<&str> = content.lines().take(10).collect();

    let mut best = b',';
    let mut best_score = 0u64;

    for &delim in candidates {
        let counts: Vec<usize> = sample_lines
            .iter()
            .map(|line| {
                ReaderBuilder::new()
                    .delimiter(delim)
                    .has_headers(false)
                    .flexible(true)
                    .from_reader(line.as_bytes())
                    .records()
                    .next()
                    .and_then(|r| r.ok())
                    .map(|r| r.len())
                    .unwrap_or(1)
            })
            .collect();

        let target = counts.first().copied().unwrap_or(0);
        if target <= 1 {
            continue;
        }
        let consistent = counts.iter().filter(|&&c| c == target).count() as u64;
        let score = consistent * target as u64;
        if score > best_score {
            best_score = score;
            best = delim;
        }
    }

    best
}

/// Read file and convert to UTF-8 if needed (Excel often exports Windows-1252).
fn read_file_as_utf8(path: &Path) -> Result<String, LoadError> {
    let bytes = std::fs::read(path)?;
    match String::from_utf8(bytes) {
        Ok(s) => Ok(s),
        Err(e) => {
            let bytes = e.into_bytes();
            let (decoded, _, _) = encoding_rs::WINDOWS_1252.decode(&bytes);
            Ok(decoded.into_owned())
        }
    }
}

fn read_delimited(content: &str, delimiter: u8) -> Result<(Vec<String>, Vec<Vec<Cell>>), LoadError> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut rdr = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(true)
        .flexible(true)
        .from_reader(content.as_bytes());

    let header: Vec<String> = rdr.headers()?.iter().map(str::to_string).collect();
    if header.is_empty() {
        return Err(LoadError::MissingHeader);
    }
    let mut rows = Vec::new();
    for result in rdr.records() {
        let record = result?;
        rows.push(record.iter().map(Cell::from).collect());
    }
    Ok((header, rows))
}

fn read_workbook(path: &Path) -> Result<(Vec<String>, Vec<Vec<Cell>>), LoadError> {
    let mut workbook = open_workbook_auto(path)?;
    let range = workbook
        .worksheet_range_at(0)
        .ok_or_else(|| LoadError::Spreadsheet("workbook has no sheets".to_string()))??;

    let mut iter = range.rows();
    let header: Vec<String> = iter
        .next()
        .ok_or(LoadError::MissingHeader)?
        .iter()
        .map(|c| data_to_cell(c).to_string())
        .collect();
    let rows = iter.map(|r| r.iter().map(data_to_cell).collect()).collect();
    Ok((header, rows))
}

fn data_to_cell(data: &Data) -> Cell {
    match data {
        Data::Empty | Data::Error(_) => Cell::Empty,
        Data::String(s) => Cell::from(s.as_str()),
        Data::Float(f) => Cell::Number(*f),
        Data::Int(i) => Cell::Number(*i as f64),
        Data::Bool(b) => Cell::Text(b.to_string()),
        Data::DateTime(dt) => match excel_serial_to_datetime(dt.as_f64()) {
            Some(d) => Cell::Date(d),
            None => Cell::Number(dt.as_f64()),
        },
        Data::DateTimeIso(s) | Data::DurationIso(s) => Cell::from(s.as_str()),
    }
}

/// Excel stores dates as days since 1899-12-30 (1900 date system).
fn excel_serial_to_datetime(serial: f64) -> Option<NaiveDateTime> {
    // 2_958_466 is 9999-12-31, the last day Excel can represent.
    if !(0.0..2_958_466.0).contains(&serial) {
        return None;
    }
    let base = NaiveDate::from_ymd_opt(1899, 12, 30)?.and_hms_opt(0, 0, 0)?;
    base.checked_add_signed(Duration::seconds((serial * 86_400.0).round() as i64))
}

/// Trim labels, name blanks, suffix duplicates, and drop fully blank rows.
fn build_frame(header: Vec<String>, rows: Vec<Vec<Cell>>) -> (RawFrame, LoadReport) {
    let columns = normalize_headers(&header);
    let total_rows = rows.len();
    let rows: Vec<Vec<Cell>> = rows
        .into_iter()
        .filter(|r| r.iter().any(|c| !c.is_empty()))
        .collect();
    let report = LoadReport {
        total_rows,
        blank_rows: total_rows - rows.len(),
        columns: columns.len(),
    };
    (RawFrame::new(columns, rows), report)
}

/// Trim header labels; blank labels become `Unnamed: <i>` and repeats get
/// `.1`, `.2`, ... in file order.
pub fn normalize_headers(header: &[String]) -> Vec<String> {
    let mut seen: HashSet<String> = HashSet::new();
    let mut out = Vec::with_capacity(header.len());
    for (idx, raw) in header.iter().enumerate() {
        let trimmed = raw.trim();
        let base = if trimmed.is_empty() {
            format!("Unnamed: {}", idx)
        } else {
            trimmed.to_string()
        };
        let mut label = base.clone();
        let mut n = 1;
        while seen.contains(&label) {
            label = format!("{}.{}", base, n);
            n += 1;
        }
        seen.insert(label.clone());
        out.push(label);
    }
    out
}
