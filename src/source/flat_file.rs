//! Flat-file vendor feeds (CSV / XLSX)
//!
//! The whole file is parsed when the first page is requested, then served in
//! fixed-size pages so an interrupted run can resume at a page index.
//!
//! Header resolution happens once: each logical field lists the column names
//! it accepts, in priority order, and the first one present in the header row
//! wins. After that every row is mapped into the same [`RawRecord`] shape.

use async_trait::async_trait;
use calamine::{open_workbook_auto, Data, Reader};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use super::{clean_text, parse_cost, parse_inventory, Page, RawRecord, SourceAdapter};
use crate::error::SourceError;

const UTF8_BOM: char = '\u{feff}';

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileFormat {
    Csv,
    Xlsx,
}

impl FileFormat {
    /// Guess from the file extension; anything unrecognized is CSV
    pub fn from_path(path: &Path) -> Self {
        match path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .as_deref()
        {
            Some("xlsx") | Some("xlsm") | Some("xls") | Some("ods") => FileFormat::Xlsx,
            _ => FileFormat::Csv,
        }
    }
}

/// Accepted header names per logical field, in priority order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileFieldMap {
    #[serde(default)]
    pub sku: Vec<String>,
    #[serde(default)]
    pub brand: Vec<String>,
    #[serde(default)]
    pub part: Vec<String>,
    #[serde(default)]
    pub vendor_code: Vec<String>,
    #[serde(default)]
    pub part_number: Vec<String>,
    #[serde(default)]
    pub cost: Vec<String>,
    #[serde(default)]
    pub inventory: Vec<String>,
}

/// Build the sku from two columns when the file has no identifier column
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DerivedSku {
    pub first: Vec<String>,
    pub second: Vec<String>,
    #[serde(default)]
    pub separator: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FlatFileConfig {
    pub path: PathBuf,
    #[serde(default)]
    pub format: Option<FileFormat>,
    #[serde(default = "default_delimiter")]
    pub delimiter: char,
    /// Worksheet name for spreadsheets; first sheet when unset
    #[serde(default)]
    pub sheet: Option<String>,
    /// Fixed header array; when set the file has no header row of its own
    #[serde(default)]
    pub headers: Option<Vec<String>>,
    /// Leading banner rows to discard before the header (or first data) row
    #[serde(default)]
    pub skip_rows: usize,
    #[serde(default = "default_page_size")]
    pub page_size: usize,
    pub fields: FileFieldMap,
    #[serde(default)]
    pub derived_sku: Option<DerivedSku>,
}

fn default_delimiter() -> char {
    ','
}

fn default_page_size() -> usize {
    500
}

impl FlatFileConfig {
    pub fn new(path: impl Into<PathBuf>, fields: FileFieldMap) -> Self {
        Self {
            path: path.into(),
            format: None,
            delimiter: default_delimiter(),
            sheet: None,
            headers: None,
            skip_rows: 0,
            page_size: default_page_size(),
            fields,
            derived_sku: None,
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size;
        self
    }

    pub fn with_headers(mut self, headers: Vec<String>) -> Self {
        self.headers = Some(headers);
        self
    }

    pub fn with_skip_rows(mut self, skip_rows: usize) -> Self {
        self.skip_rows = skip_rows;
        self
    }

    pub fn with_derived_sku(mut self, derived: DerivedSku) -> Self {
        self.derived_sku = Some(derived);
        self
    }
}

/// Column positions resolved from the header row
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ColumnIndex {
    pub sku: Option<usize>,
    pub brand: Option<usize>,
    pub part: Option<usize>,
    pub vendor_code: Option<usize>,
    pub part_number: Option<usize>,
    pub cost: Option<usize>,
    pub inventory: Option<usize>,
    pub derived: Option<(usize, usize, String)>,
}

/// Comparable form of a header cell: lowercase alphanumerics only
fn header_key(raw: &str) -> String {
    raw.trim_start_matches(UTF8_BOM)
        .chars()
        .filter(|c| c.is_alphanumeric())
        .flat_map(char::to_lowercase)
        .collect()
}

impl ColumnIndex {
    pub fn resolve(
        headers: &[String],
        fields: &FileFieldMap,
        derived: Option<&DerivedSku>,
    ) -> Self {
        let keys: Vec<String> = headers.iter().map(|h| header_key(h)).collect();
        let find = |aliases: &[String]| -> Option<usize> {
            aliases.iter().find_map(|alias| {
                let wanted = header_key(alias);
                keys.iter().position(|k| *k == wanted)
            })
        };

        Self {
            sku: find(&fields.sku),
            brand: find(&fields.brand),
            part: find(&fields.part),
            vendor_code: find(&fields.vendor_code),
            part_number: find(&fields.part_number),
            cost: find(&fields.cost),
            inventory: find(&fields.inventory),
            derived: derived.and_then(|d| {
                let first = find(&d.first)?;
                let second = find(&d.second)?;
                Some((first, second, d.separator.clone()))
            }),
        }
    }

    pub fn record_from_row(&self, row: &[String]) -> RawRecord {
        let cell = |idx: Option<usize>| idx.and_then(|i| row.get(i)).and_then(|s| clean_text(s));

        let sku = cell(self.sku).or_else(|| {
            let (first, second, separator) = self.derived.as_ref()?;
            let a = cell(Some(*first))?;
            let b = cell(Some(*second))?;
            Some(format!("{a}{separator}{b}"))
        });

        let (inventory_qty, inventory_text) = cell(self.inventory)
            .map(|s| parse_inventory(&s))
            .unwrap_or((None, None));

        RawRecord {
            sku,
            brand: cell(self.brand),
            part: cell(self.part),
            vendor_code: cell(self.vendor_code),
            part_number: cell(self.part_number),
            cost: cell(self.cost).and_then(|s| parse_cost(&s)),
            inventory_qty,
            inventory_text,
        }
    }
}

struct LoadedFile {
    columns: ColumnIndex,
    rows: Vec<Vec<String>>,
}

pub struct FlatFileSource {
    source_id: String,
    config: FlatFileConfig,
    loaded: Option<LoadedFile>,
    load_attempted: bool,
    next: u32,
}

impl FlatFileSource {
    pub fn new(source_id: impl Into<String>, config: FlatFileConfig) -> Self {
        Self {
            source_id: source_id.into(),
            config,
            loaded: None,
            load_attempted: false,
            next: 0,
        }
    }

    /// Number of data rows, once the file has been read
    pub fn row_count(&self) -> Option<usize> {
        self.loaded.as_ref().map(|l| l.rows.len())
    }

    fn page_size(&self) -> usize {
        self.config.page_size.max(1)
    }
}

#[async_trait]
impl SourceAdapter for FlatFileSource {
    fn source_id(&self) -> &str {
        &self.source_id
    }

    fn position(&self) -> u32 {
        self.next
    }

    fn seek(&mut self, page: u32) {
        self.next = page;
    }

    async fn next_page(&mut self) -> Result<Option<Page>, SourceError> {
        if !self.load_attempted {
            self.load_attempted = true;
            let source_id = self.source_id.clone();
            let config = self.config.clone();
            let loaded = tokio::task::spawn_blocking(move || load_file(&source_id, &config))
                .await
                .map_err(|e| SourceError::Io(std::io::Error::other(e)))
                .and_then(|result| result);
            match loaded {
                Ok(loaded) => {
                    info!(
                        source_id = %self.source_id,
                        path = %self.config.path.display(),
                        rows = loaded.rows.len(),
                        "Loaded flat-file feed"
                    );
                    self.loaded = Some(loaded);
                }
                Err(e) => {
                    warn!(
                        source_id = %self.source_id,
                        path = %self.config.path.display(),
                        error = %e,
                        "Flat-file feed unreadable, treating as empty"
                    );
                }
            }
        }

        let page_size = self.page_size();
        let Some(loaded) = &self.loaded else {
            return Ok(None);
        };

        let total_pages = loaded.rows.len().div_ceil(page_size) as u32;
        let index = self.next;
        if index >= total_pages {
            return Ok(None);
        }

        let start = index as usize * page_size;
        let end = (start + page_size).min(loaded.rows.len());
        let records = loaded.rows[start..end]
            .iter()
            .map(|row| loaded.columns.record_from_row(row))
            .collect();

        self.next += 1;
        Ok(Some(Page {
            index,
            records,
            total_pages: Some(total_pages),
        }))
    }
}

/// Blocking read of the whole feed; runs on the blocking pool
fn load_file(source_id: &str, config: &FlatFileConfig) -> Result<LoadedFile, SourceError> {
    let format = config
        .format
        .unwrap_or_else(|| FileFormat::from_path(&config.path));

    let raw_rows = match format {
        FileFormat::Csv => read_csv_rows(&config.path, config.delimiter)?,
        FileFormat::Xlsx => read_sheet_rows(&config.path, config.sheet.as_deref())?,
    };

    let mut rows = raw_rows.into_iter().skip(config.skip_rows);

    let headers = match &config.headers {
        Some(headers) => headers.clone(),
        None => rows
            .next()
            .ok_or_else(|| SourceError::Config("file has no header row".into()))?,
    };

    let columns = ColumnIndex::resolve(&headers, &config.fields, config.derived_sku.as_ref());

    if columns.sku.is_none() && columns.derived.is_none() {
        warn!(
            source_id = %source_id,
            "No sku column resolved; normalized keys stand in for vendor skus"
        );
    }
    if columns.cost.is_none() {
        warn!(source_id = %source_id, "No cost column resolved; nothing can be created");
    }

    let rows: Vec<Vec<String>> = rows
        .filter(|row| row.iter().any(|c| !c.trim().is_empty()))
        .collect();

    Ok(LoadedFile { columns, rows })
}

fn read_csv_rows(path: &Path, delimiter: char) -> Result<Vec<Vec<String>>, SourceError> {
    let delimiter = u8::try_from(delimiter).map_err(|_| {
        SourceError::Config(format!("delimiter {delimiter:?} is not a single byte"))
    })?;

    let mut reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .delimiter(delimiter)
        .from_path(path)?;

    let mut rows = Vec::new();
    for result in reader.records() {
        let record = result?;
        rows.push(record.iter().map(|s| s.to_string()).collect());
    }
    Ok(rows)
}

fn read_sheet_rows(path: &Path, sheet: Option<&str>) -> Result<Vec<Vec<String>>, SourceError> {
    let mut workbook =
        open_workbook_auto(path).map_err(|e| SourceError::Spreadsheet(e.to_string()))?;

    let name = match sheet {
        Some(name) => name.to_string(),
        None => workbook
            .sheet_names()
            .first()
            .cloned()
            .ok_or_else(|| SourceError::Spreadsheet("workbook has no sheets".into()))?,
    };

    let range = workbook
        .worksheet_range(&name)
        .map_err(|e| SourceError::Spreadsheet(format!("sheet '{name}': {e}")))?;

    Ok(range
        .rows()
        .map(|row| row.iter().map(cell_text).collect())
        .collect())
}

fn cell_text(cell: &Data) -> String {
    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        // Whole-number floats are part numbers far more often than prices
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Int(i) => i.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}
