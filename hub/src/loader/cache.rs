use std::sync::{Arc, PoisonError, RwLock};

use btdash_core::candle::ChartData;
use rustc_hash::FxHashMap;
use serde::Serialize;

/// Canonical cache key: trimmed and upper-cased.
pub fn normalize_symbol(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Where a cached chart came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Remote,
    /// Generated locally after the remote fetch failed.
    Synthetic,
}

#[derive(Debug, Clone)]
pub struct CachedChart {
    pub data: ChartData,
    pub provenance: Provenance,
}

/// Session-wide symbol → chart map. Entries are only ever added; the first
/// insert for a symbol wins and later ones are discarded.
#[derive(Debug, Default)]
pub struct ChartCache {
    entries: RwLock<FxHashMap<String, Arc<CachedChart>>>,
}

impl ChartCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, symbol: &str) -> Option<Arc<CachedChart>> {
        let key = normalize_symbol(symbol);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.get(&key).cloned()
    }

    pub fn contains(&self, symbol: &str) -> bool {
        let key = normalize_symbol(symbol);
        let entries = self.entries.read().unwrap_or_else(PoisonError::into_inner);
        entries.contains_key(&key)
    }

    /// Store `chart` unless the symbol is already present. Returns whichever
    /// entry is cached afterwards.
    pub fn insert_if_absent(&self, symbol: &str, chart: CachedChart) -> Arc<CachedChart> {
        let key = normalize_symbol(symbol);
        let mut entries = self.entries.write().unwrap_or_else(PoisonError::into_inner);
        Arc::clone(entries.entry(key).or_insert_with(|| Arc::new(chart)))
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
