//! Source adapters
//!
//! A source adapter turns one vendor feed into a lazy, finite sequence of
//! pages of [`RawRecord`]s and can be positioned at any page index handed in
//! by the checkpoint manager.
//!
//! Two adapters are provided:
//! - [`api::PaginatedApiSource`] - one HTTP request per page
//! - [`flat_file::FlatFileSource`] - CSV / XLSX served in fixed-size pages

pub mod api;
pub mod auth;
pub mod flat_file;
pub mod retry;

use async_trait::async_trait;
use rust_decimal::Decimal;
use std::str::FromStr;

use crate::error::SourceError;
use crate::normalize::strip_spreadsheet_quoting;

pub use api::PaginatedApiSource;
pub use flat_file::FlatFileSource;

/// One vendor record in the fixed internal shape every adapter produces
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RawRecord {
    /// Vendor's own identifier for the item
    pub sku: Option<String>,
    pub brand: Option<String>,
    /// Part number or code joined with the brand
    pub part: Option<String>,
    /// Vendor line code, used with `part_number` when no brand/part exists
    pub vendor_code: Option<String>,
    pub part_number: Option<String>,
    pub cost: Option<Decimal>,
    pub inventory_qty: Option<i64>,
    pub inventory_text: Option<String>,
}

impl RawRecord {
    /// Identifier written as `vendor_sku`: the vendor's sku, else the given key
    pub fn vendor_sku_or(&self, fallback: &str) -> String {
        self.sku
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(|s| strip_spreadsheet_quoting(s).to_string())
            .unwrap_or_else(|| fallback.to_string())
    }
}

/// One unit fetched from a source
#[derive(Debug, Clone, Default)]
pub struct Page {
    pub index: u32,
    pub records: Vec<RawRecord>,
    /// Total number of pages when the source reports it
    pub total_pages: Option<u32>,
}

/// Trait for pluggable vendor feed adapters
///
/// # Implementation Notes
///
/// - `position()` is the index of the next page `next_page` will fetch
/// - a page that fails still advances the position, so the run can skip it
/// - `Ok(None)` means the source is exhausted
#[async_trait]
pub trait SourceAdapter: Send + Sync {
    /// Stable identifier used to key checkpoints (e.g. "acme-api")
    fn source_id(&self) -> &str;

    /// Index of the next page to be fetched
    fn position(&self) -> u32;

    /// Restart at the given page index
    fn seek(&mut self, page: u32);

    /// Fetch the next page
    async fn next_page(&mut self) -> Result<Option<Page>, SourceError>;
}

// =============================================================================
// Value parsing shared by adapters
// =============================================================================

/// Trimmed, unquoted, non-empty text
pub fn clean_text(raw: &str) -> Option<String> {
    let s = strip_spreadsheet_quoting(raw).trim();
    if s.is_empty() {
        None
    } else {
        Some(s.to_string())
    }
}

/// Parse a vendor cost string such as `$1,234.50` or `="12.5"`
pub fn parse_cost(raw: &str) -> Option<Decimal> {
    let s = strip_spreadsheet_quoting(raw);
    let negative = s.trim_start().starts_with('-') || (s.contains('(') && s.contains(')'));
    let digits: String = s
        .chars()
        .filter(|c| c.is_ascii_digit() || *c == '.')
        .collect();
    if digits.is_empty() || digits == "." {
        return None;
    }
    let value = Decimal::from_str(&digits).ok()?;
    Some(if negative { -value } else { value })
}

/// Parse inventory text into `(qty, text)`.
///
/// `"10+"` and `">50"` yield their leading integer. Text without digits
/// (e.g. "In Stock") keeps the text with no quantity.
pub fn parse_inventory(raw: &str) -> (Option<i64>, Option<String>) {
    let text = match clean_text(raw) {
        Some(t) => t,
        None => return (None, None),
    };

    let start = text.find(|c: char| c.is_ascii_digit());
    let qty = start.and_then(|i| {
        let digits: String = text[i..]
            .chars()
            .filter(|c| *c != ',')
            .take_while(|c| c.is_ascii_digit())
            .collect();
        let value: i64 = digits.parse().ok()?;
        let negative = text[..i].trim_end().ends_with('-');
        Some(if negative { -value } else { value })
    });

    (qty, Some(text))
}
