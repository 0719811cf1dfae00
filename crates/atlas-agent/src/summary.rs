//! Bounded, deterministic schema summaries of tabular uploads.
//!
//! The code tool appends one summary per staged file to the analysis request
//! so the generated script can reference real column names and types
//! without executing anything first.

use std::fmt;
use std::io::Cursor;
use std::path::Path;

use calamine::{Data, Reader};
use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;

/// Rows scanned when inferring column types.
const INFERENCE_WINDOW: usize = 1_000;
const MAX_COLUMNS: usize = 40;
const MAX_CELL_CHARS: usize = 40;
const SAMPLE_ROWS: usize = 2;

const SPREADSHEET_EXTENSIONS: &[&str] = &["xlsx", "xlsm", "xlsb", "xls", "ods"];

static DATETIME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(
        r"^(\d{4}-\d{1,2}-\d{1,2}([ T]\d{1,2}:\d{2}(:\d{2}(\.\d+)?)?(Z|[+-]\d{2}:?\d{2})?)?|\d{1,2}/\d{1,2}/\d{2,4}( \d{1,2}:\d{2}(:\d{2})?)?)$",
    )
    .expect("datetime pattern must compile")
});

#[derive(Debug, Error)]
pub enum SummaryError {
    #[error("could not read csv: {0}")]
    Csv(#[from] csv::Error),
    #[error("could not read spreadsheet: {0}")]
    Spreadsheet(String),
    #[error("file has no header row")]
    Empty,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ColumnKind {
    Integer,
    Float,
    Boolean,
    Datetime,
    String,
    Empty,
}

impl ColumnKind {
    pub fn as_str(self) -> &'static str {
        match self {
            ColumnKind::Integer => "integer",
            ColumnKind::Float => "float",
            ColumnKind::Boolean => "boolean",
            ColumnKind::Datetime => "datetime",
            ColumnKind::String => "string",
            ColumnKind::Empty => "empty",
        }
    }

    /// Widen two observations of the same column to one type.
    fn merge(self, other: ColumnKind) -> ColumnKind {
        match (self, other) {
            (ColumnKind::Empty, kind) | (kind, ColumnKind::Empty) => kind,
            (a, b) if a == b => a,
            (ColumnKind::Integer, ColumnKind::Float) | (ColumnKind::Float, ColumnKind::Integer) => {
                ColumnKind::Float
            }
            _ => ColumnKind::String,
        }
    }

    fn of_text(text: &str) -> ColumnKind {
        let text = text.trim();
        if text.is_empty() {
            ColumnKind::Empty
        } else if text.parse::<i64>().is_ok() {
            ColumnKind::Integer
        } else if text.parse::<f64>().is_ok() && text.bytes().any(|b| b.is_ascii_digit()) {
            ColumnKind::Float
        } else if text.eq_ignore_ascii_case("true") || text.eq_ignore_ascii_case("false") {
            ColumnKind::Boolean
        } else if DATETIME.is_match(text) {
            ColumnKind::Datetime
        } else {
            ColumnKind::String
        }
    }
}

impl fmt::Display for ColumnKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ColumnSummary {
    pub name: String,
    pub kind: ColumnKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TableSummary {
    pub name: String,
    /// Sheet the summary was taken from, for workbooks.
    pub sheet: Option<String>,
    /// Data rows, header excluded.
    pub rows: usize,
    pub total_columns: usize,
    /// At most `MAX_COLUMNS` entries.
    pub columns: Vec<ColumnSummary>,
    pub sample: Vec<Vec<String>>,
}

impl fmt::Display for TableSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "File: {}", self.name)?;
        if let Some(sheet) = &self.sheet {
            writeln!(f, "Sheet: {sheet}")?;
        }
        writeln!(
            f,
            "Shape: {} rows x {} columns",
            self.rows, self.total_columns
        )?;
        writeln!(f, "Columns:")?;
        for column in &self.columns {
            writeln!(f, "  - {} ({})", column.name, column.kind)?;
        }
        if self.total_columns > self.columns.len() {
            writeln!(
                f,
                "  ... and {} more columns",
                self.total_columns - self.columns.len()
            )?;
        }
        if self.sample.is_empty() {
            return writeln!(f, "Sample rows: none");
        }
        writeln!(f, "Sample rows:")?;
        for row in &self.sample {
            let cells: Vec<String> = self
                .columns
                .iter()
                .zip(row)
                .map(|(column, value)| format!("{}={}", column.name, value))
                .collect();
            writeln!(f, "  {}", cells.join(", "))?;
        }
        Ok(())
    }
}

/// Summarize a CSV or spreadsheet. The format is chosen by the extension of
/// `name`; anything that is not a known workbook extension is read as CSV.
pub fn summarize(name: &str, bytes: &[u8]) -> Result<TableSummary, SummaryError> {
    let extension = Path::new(name)
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase)
        .unwrap_or_default();
    if SPREADSHEET_EXTENSIONS.contains(&extension.as_str()) {
        summarize_workbook(name, bytes)
    } else {
        summarize_csv(name, bytes, if extension == "tsv" { b'\t' } else { b',' })
    }
}

fn summarize_csv(name: &str, bytes: &[u8], delimiter: u8) -> Result<TableSummary, SummaryError> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_reader(bytes);
    let header: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    if header.is_empty() {
        return Err(SummaryError::Empty);
    }

    let mut table = TableBuilder::new(name, None, header);
    for record in reader.records() {
        let record = record?;
        table.push_row(
            record
                .iter()
                .map(|cell| (cell.to_string(), ColumnKind::of_text(cell))),
        );
    }
    Ok(table.finish())
}

fn summarize_workbook(name: &str, bytes: &[u8]) -> Result<TableSummary, SummaryError> {
    let mut workbook = calamine::open_workbook_auto_from_rs(Cursor::new(bytes))
        .map_err(|err| SummaryError::Spreadsheet(err.to_string()))?;
    let sheet = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or(SummaryError::Empty)?;
    let range = workbook
        .worksheet_range(&sheet)
        .map_err(|err| SummaryError::Spreadsheet(err.to_string()))?;

    let mut rows = range.rows();
    let header: Vec<String> = rows
        .next()
        .ok_or(SummaryError::Empty)?
        .iter()
        .map(|cell| cell.to_string())
        .collect();

    let mut table = TableBuilder::new(name, Some(sheet), header);
    for row in rows {
        table.push_row(row.iter().map(classify_cell));
    }
    Ok(table.finish())
}

fn classify_cell(cell: &Data) -> (String, ColumnKind) {
    let kind = match cell {
        Data::Int(_) => ColumnKind::Integer,
        Data::Float(value) if value.is_finite() && value.fract() == 0.0 => ColumnKind::Integer,
        Data::Float(_) => ColumnKind::Float,
        Data::Bool(_) => ColumnKind::Boolean,
        Data::DateTime(_) | Data::DateTimeIso(_) => ColumnKind::Datetime,
        Data::String(text) => ColumnKind::of_text(text),
        Data::Empty => ColumnKind::Empty,
        _ => ColumnKind::String,
    };
    (cell.to_string(), kind)
}

struct TableBuilder {
    name: String,
    sheet: Option<String>,
    header: Vec<String>,
    kinds: Vec<ColumnKind>,
    rows: usize,
    sample: Vec<Vec<String>>,
}

impl TableBuilder {
    fn new(name: &str, sheet: Option<String>, header: Vec<String>) -> Self {
        let header: Vec<String> = header
            .into_iter()
            .enumerate()
            .map(|(index, title)| match title.trim() {
                "" => format!("column_{}", index + 1),
                title => clip(title),
            })
            .collect();
        Self {
            name: name.to_string(),
            sheet,
            kinds: vec![ColumnKind::Empty; header.len()],
            header,
            rows: 0,
            sample: Vec::new(),
        }
    }

    fn push_row(&mut self, cells: impl Iterator<Item = (String, ColumnKind)>) {
        let observe = self.rows < INFERENCE_WINDOW;
        let keep_sample = self.sample.len() < SAMPLE_ROWS;
        let mut sample = Vec::new();
        for (index, (text, kind)) in cells.take(self.header.len()).enumerate() {
            if observe {
                self.kinds[index] = self.kinds[index].merge(kind);
            }
            if keep_sample && index < MAX_COLUMNS {
                sample.push(clip(&text));
            }
        }
        if keep_sample {
            self.sample.push(sample);
        }
        self.rows += 1;
    }

    fn finish(self) -> TableSummary {
        let total_columns = self.header.len();
        let columns = self
            .header
            .into_iter()
            .zip(self.kinds)
            .take(MAX_COLUMNS)
            .map(|(name, kind)| ColumnSummary { name, kind })
            .collect();
        TableSummary {
            name: self.name,
            sheet: self.sheet,
            rows: self.rows,
            total_columns,
            columns,
            sample: self.sample,
        }
    }
}

fn clip(text: &str) -> String {
    let text = text.trim();
    if text.chars().count() <= MAX_CELL_CHARS {
        return text.to_string();
    }
    let mut clipped: String = text.chars().take(MAX_CELL_CHARS).collect();
    clipped.push_str("...");
    clipped
}
