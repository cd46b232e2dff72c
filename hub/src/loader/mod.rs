//! Bounded, cache-aware backfill of per-symbol chart data.

pub mod cache;
pub mod source;

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use btdash_core::synthetic::synthetic_chart;
use futures::future::join_all;
use rustc_hash::FxHashSet;
use serde::Serialize;
use tracing::{debug, info, warn};

use cache::{normalize_symbol, CachedChart, ChartCache, Provenance};
use source::ChartSource;

pub const DEFAULT_PAGE_SIZE: usize = 60;

/// Counts for one `load_for` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub fetched: usize,
    /// Fetches that failed and were replaced by synthetic data.
    pub synthetic: usize,
    /// Symbols already cached or repeated within the call.
    pub skipped: usize,
}

/// Clears the in-progress flag however the load ends.
struct LoadingGuard<'a>(&'a AtomicBool);

impl Drop for LoadingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Fetches chart data in fixed-size batches. A batch runs fully concurrent
/// and must settle before the next one starts, so at most `batch_size`
/// fetches are ever in flight.
pub struct BoundedChartLoader<S: ChartSource> {
    source: S,
    cache: Arc<ChartCache>,
    batch_size: usize,
    page_size: usize,
    loading: AtomicBool,
    visible: AtomicUsize,
}

impl<S: ChartSource> BoundedChartLoader<S> {
    pub fn new(source: S, cache: Arc<ChartCache>, batch_size: usize) -> Self {
        Self {
            source,
            cache,
            batch_size: batch_size.max(1),
            page_size: DEFAULT_PAGE_SIZE,
            loading: AtomicBool::new(false),
            visible: AtomicUsize::new(0),
        }
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    pub fn cache(&self) -> &Arc<ChartCache> {
        &self.cache
    }

    pub fn visible_count(&self) -> usize {
        self.visible.load(Ordering::Acquire)
    }

    pub fn is_loading(&self) -> bool {
        self.loading.load(Ordering::Acquire)
    }

    /// Fetch every symbol not yet cached. Failures never propagate: the
    /// symbol gets synthetic data instead.
    pub async fn load_for<T: AsRef<str>>(&self, symbols: &[T]) -> LoadReport {
        let mut report = LoadReport::default();
        let mut seen = FxHashSet::default();
        let mut pending = Vec::new();
        for raw in symbols {
            // The backend matches codes case-sensitively; only the cache key
            // is normalized.
            let sym = raw.as_ref().trim();
            let key = normalize_symbol(sym);
            if key.is_empty() || self.cache.contains(&key) || !seen.insert(key) {
                report.skipped += 1;
                continue;
            }
            pending.push(sym);
        }

        for batch in pending.chunks(self.batch_size) {
            debug!(size = batch.len(), "chart batch");
            let results = join_all(batch.iter().map(|sym| self.fetch_one(sym))).await;
            for provenance in results {
                report.fetched += 1;
                if provenance == Provenance::Synthetic {
                    report.synthetic += 1;
                }
            }
        }
        report
    }

    async fn fetch_one(&self, symbol: &str) -> Provenance {
        let chart = match self.source.fetch(symbol).await {
            Ok(data) => CachedChart {
                data,
                provenance: Provenance::Remote,
            },
            Err(e) => {
                warn!(symbol, "chart fetch failed, using synthetic data: {e}");
                CachedChart {
                    data: synthetic_chart(symbol),
                    provenance: Provenance::Synthetic,
                }
            }
        };
        let provenance = chart.provenance;
        self.cache.insert_if_absent(symbol, chart);
        provenance
    }

    /// Reset the visible window to the first page of `symbols` and load it.
    pub async fn load_initial<T: AsRef<str>>(&self, symbols: &[T]) -> LoadReport {
        let first = self.page_size.min(symbols.len());
        self.visible.store(first, Ordering::Release);
        let report = self.load_for(&symbols[..first]).await;
        info!(
            visible = first,
            total = symbols.len(),
            fetched = report.fetched,
            synthetic = report.synthetic,
            "initial charts loaded"
        );
        report
    }

    /// Load the next page when the viewer is near the bottom. Returns `None`
    /// when there is nothing to do or another load is already running.
    pub async fn maybe_load_more<T: AsRef<str>>(
        &self,
        symbols: &[T],
        scroll_near_bottom: bool,
    ) -> Option<LoadReport> {
        if !scroll_near_bottom {
            return None;
        }
        if self
            .loading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("load more ignored: already loading");
            return None;
        }
        let _guard = LoadingGuard(&self.loading);

        let visible = self.visible.load(Ordering::Acquire);
        let total = symbols.len();
        if visible >= total {
            return None;
        }
        let next = (visible + self.page_size).min(total);
        let report = self.load_for(&symbols[visible..next]).await;
        self.visible.store(next, Ordering::Release);
        debug!(visible = next, total, "more charts loaded");
        Some(report)
    }
}
