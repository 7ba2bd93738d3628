//! Identifier normalization
//!
//! Canonicalizes vendor-supplied brand / part / code strings into a single
//! comparable key. The steps always run in this order:
//!
//! 1. strip spreadsheet numeric quoting (`="` prefix, `"` suffix)
//! 2. uppercase
//! 3. drop every character outside `[A-Z0-9]`
//! 4. resolve the brand through the alias table (unknown brands pass through)
//! 5. concatenate `canonical_brand ‖ part`
//!
//! A key with an empty brand or part is empty and never reaches the matcher.

use std::collections::HashMap;

use vendor_sync_types::IdentifierAlias;

use crate::source::RawRecord;

/// Strip the `="..."` wrapper spreadsheets use to keep numeric text as text
pub fn strip_spreadsheet_quoting(raw: &str) -> &str {
    let s = raw.trim();
    let s = s.strip_prefix("=\"").unwrap_or(s);
    s.strip_suffix('"').unwrap_or(s)
}

/// Steps 1-3: quoting removed, uppercased, `[A-Z0-9]` only
pub fn clean(raw: &str) -> String {
    strip_spreadsheet_quoting(raw)
        .to_uppercase()
        .chars()
        .filter(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        .collect()
}

/// Normalize with no alias table: unresolved brands are their own canonical form
pub fn normalize(brand: &str, part: &str) -> String {
    AliasTable::default().normalize(brand, part)
}

#[derive(Debug, Clone)]
struct AliasEntry {
    canonical: String,
    code_prefix: Option<String>,
}

/// Brand alias lookup, keyed by the cleaned alias text
#[derive(Debug, Clone, Default)]
pub struct AliasTable {
    entries: HashMap<String, AliasEntry>,
}

impl AliasTable {
    pub fn new(aliases: &[IdentifierAlias]) -> Self {
        let mut entries: HashMap<String, AliasEntry> =
            HashMap::with_capacity(aliases.len() * 2);

        for alias in aliases {
            let canonical = clean(&alias.canonical);
            if canonical.is_empty() {
                tracing::warn!(alias = %alias.alias, "Ignoring alias with empty canonical brand");
                continue;
            }
            let code_prefix = alias
                .code_prefix
                .as_deref()
                .map(clean)
                .filter(|p| !p.is_empty());

            let key = clean(&alias.alias);
            if key.is_empty() {
                continue;
            }
            if let Some(existing) = entries.get(&key) {
                if existing.canonical != canonical {
                    tracing::warn!(
                        alias = %alias.alias,
                        kept = %existing.canonical,
                        ignored = %canonical,
                        "Alias maps to two canonical brands, keeping the first"
                    );
                }
                continue;
            }
            entries.insert(
                key,
                AliasEntry {
                    canonical: canonical.clone(),
                    code_prefix: code_prefix.clone(),
                },
            );

            // The canonical name always resolves to itself and inherits the prefix
            entries.entry(canonical.clone()).or_insert(AliasEntry {
                canonical,
                code_prefix,
            });
        }

        Self { entries }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Alias resolution on an already-cleaned brand
    pub fn resolve<'a>(&'a self, cleaned_brand: &'a str) -> &'a str {
        self.entries
            .get(cleaned_brand)
            .map(|e| e.canonical.as_str())
            .unwrap_or(cleaned_brand)
    }

    fn code_prefix(&self, cleaned_brand: &str) -> Option<&str> {
        self.entries
            .get(cleaned_brand)
            .and_then(|e| e.code_prefix.as_deref())
    }

    /// Full normalization of `(brand, part)`; empty when either side is empty
    pub fn normalize(&self, brand: &str, part: &str) -> String {
        let brand = clean(brand);
        let part = clean(part);
        if brand.is_empty() || part.is_empty() {
            return String::new();
        }
        let mut key = String::with_capacity(brand.len() + part.len());
        key.push_str(self.resolve(&brand));
        key.push_str(&part);
        key
    }
}

/// Lookup keys for one record, tried in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateKeys {
    pub primary: String,
    pub secondary: Vec<String>,
}

impl CandidateKeys {
    pub fn iter(&self) -> impl Iterator<Item = &str> {
        std::iter::once(self.primary.as_str()).chain(self.secondary.iter().map(String::as_str))
    }
}

/// Record-level normalizer built once per run from the alias table
#[derive(Debug, Clone, Default)]
pub struct Normalizer {
    aliases: AliasTable,
}

impl Normalizer {
    pub fn new(aliases: AliasTable) -> Self {
        Self { aliases }
    }

    pub fn aliases(&self) -> &AliasTable {
        &self.aliases
    }

    /// Candidate keys for a record, or `None` when no non-empty key exists.
    ///
    /// Brand + part is the primary path. Records without a joinable part fall
    /// back to `vendor_code ‖ part_number`.
    pub fn keys_for(&self, record: &RawRecord) -> Option<CandidateKeys> {
        if let (Some(brand), Some(part)) = (record.brand.as_deref(), record.part.as_deref()) {
            let primary = self.aliases.normalize(brand, part);
            if !primary.is_empty() {
                let mut secondary = Vec::new();
                let cleaned_brand = clean(brand);
                if let Some(prefix) = self.aliases.code_prefix(&cleaned_brand) {
                    let alt = format!("{}{}", prefix, clean(part));
                    if alt != primary {
                        secondary.push(alt);
                    }
                }
                return Some(CandidateKeys { primary, secondary });
            }
        }

        let code = record.vendor_code.as_deref().map(clean).unwrap_or_default();
        let part_number = record.part_number.as_deref().map(clean).unwrap_or_default();
        if code.is_empty() || part_number.is_empty() {
            return None;
        }
        Some(CandidateKeys {
            primary: format!("{code}{part_number}"),
            secondary: Vec::new(),
        })
    }
}
