//! Catalog matcher
//!
//! Builds a `normalized_key -> product_key` map once per run (one pass over
//! the catalog), after which each lookup is a single map access.
//!
//! When two catalog entries normalize to the same key the winner is chosen
//! deterministically:
//! 1. an identifier that does not end in a separator beats one that does
//!    (a trailing separator marks an incomplete entry)
//! 2. then the shorter identifier
//! 3. then whichever was scanned first
//!
//! Collisions are counted and logged, never silently dropped.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use vendor_sync_types::CatalogRow;

use crate::normalize::{clean, AliasTable, CandidateKeys};

/// Characters that mark an identifier as incomplete when trailing
pub const TRAILING_SEPARATORS: &[char] = &['-', '_', '.', '/', ' '];

fn is_incomplete(product_key: &str) -> bool {
    product_key.ends_with(TRAILING_SEPARATORS)
}

/// Whether `challenger` should replace `incumbent` for the same key
fn prefer(challenger: &str, incumbent: &str) -> bool {
    match (is_incomplete(challenger), is_incomplete(incumbent)) {
        (false, true) => true,
        (true, false) => false,
        _ => challenger.len() < incumbent.len(),
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MatcherStats {
    pub entries: usize,
    pub collisions: usize,
    pub empty_keys_skipped: usize,
}

#[derive(Debug, Default)]
pub struct CatalogMatcher {
    index: HashMap<String, String>,
    stats: MatcherStats,
}

impl CatalogMatcher {
    /// Scan the catalog once. Brand+part keys go through the alias table;
    /// vendor codes are cleaned as-is.
    pub fn build(rows: &[CatalogRow], aliases: &AliasTable) -> Self {
        let mut matcher = Self {
            index: HashMap::with_capacity(rows.len()),
            stats: MatcherStats::default(),
        };

        for row in rows {
            if let (Some(brand), Some(part)) = (row.brand.as_deref(), row.part_number.as_deref()) {
                let key = aliases.normalize(brand, part);
                matcher.insert(key, &row.product_key);
            }
            for code in &row.vendor_codes {
                matcher.insert(clean(code), &row.product_key);
            }
        }

        matcher.stats.entries = matcher.index.len();
        tracing::info!(
            catalog_rows = rows.len(),
            keys = matcher.stats.entries,
            collisions = matcher.stats.collisions,
            "Built catalog key index"
        );
        matcher
    }

    fn insert(&mut self, key: String, product_key: &str) {
        if key.is_empty() {
            self.stats.empty_keys_skipped += 1;
            return;
        }

        match self.index.entry(key) {
            Entry::Vacant(slot) => {
                slot.insert(product_key.to_string());
            }
            Entry::Occupied(mut slot) => {
                // The same product reachable twice by one key is not a collision
                if slot.get() == product_key {
                    return;
                }
                self.stats.collisions += 1;
                let replace = prefer(product_key, slot.get());
                let (kept, discarded) = if replace {
                    (product_key, slot.get().as_str())
                } else {
                    (slot.get().as_str(), product_key)
                };
                tracing::warn!(key = %slot.key(), kept, discarded, "Catalog key collision");
                if replace {
                    slot.insert(product_key.to_string());
                }
            }
        }
    }

    pub fn stats(&self) -> MatcherStats {
        self.stats
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn lookup(&self, key: &str) -> Option<&str> {
        self.index.get(key).map(String::as_str)
    }

    /// First candidate key with a catalog hit, with the matched product
    pub fn resolve<'a>(&'a self, keys: &'a CandidateKeys) -> Option<(&'a str, &'a str)> {
        keys.iter()
            .find_map(|k| self.lookup(k).map(|product| (k, product)))
    }
}
