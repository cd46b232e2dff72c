//! Per-symbol backtest outcomes and the aggregates derived from them.

use serde::{Deserialize, Serialize};

use crate::candle::{EquityCurve, Trade};

/// Outcome of one symbol inside a multi-symbol run. `code` is unique within
/// a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BacktestItem {
    pub code: String,
    pub name: String,
    #[serde(rename = "return")]
    pub ret: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
}

/// Arithmetic means over exactly the items received so far.
///
/// Always derived from the item list, never stored on its own.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AggregateSnapshot {
    pub average_return: f64,
    pub average_max_drawdown: f64,
    pub average_sharpe: f64,
    pub count: usize,
}

impl AggregateSnapshot {
    pub fn from_items(items: &[BacktestItem]) -> Self {
        if items.is_empty() {
            return Self::default();
        }
        let (ret, dd, sharpe) = items.iter().fold((0.0, 0.0, 0.0), |acc, it| {
            (acc.0 + it.ret, acc.1 + it.max_drawdown, acc.2 + it.sharpe)
        });
        let n = items.len() as f64;
        Self {
            average_return: ret / n,
            average_max_drawdown: dd / n,
            average_sharpe: sharpe / n,
            count: items.len(),
        }
    }
}

/// Averages as reported by the backend in its closing `summary` event.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct BackendSummary {
    pub avg_return: f64,
    pub avg_max_drawdown: f64,
    pub avg_sharpe: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub count: Option<usize>,
}

impl BackendSummary {
    /// True when any average (or the count, if reported) disagrees with the
    /// local snapshot beyond `tol`.
    pub fn diverges_from(&self, local: &AggregateSnapshot, tol: f64) -> bool {
        let off = |a: f64, b: f64| (a - b).abs() > tol;
        off(self.avg_return, local.average_return)
            || off(self.avg_max_drawdown, local.average_max_drawdown)
            || off(self.avg_sharpe, local.average_sharpe)
            || self.count.is_some_and(|c| c != local.count)
    }
}

/// Single-symbol backtest response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BacktestResult {
    pub curve: EquityCurve,
    pub trades: Vec<Trade>,
    #[serde(rename = "return")]
    pub ret: f64,
    pub max_drawdown: f64,
    pub sharpe: f64,
}

/// Batch (non-streaming) multi-symbol response.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct BatchResult {
    pub items: Vec<BacktestItem>,
    pub summary: BackendSummary,
}

/// Items ordered by descending return; ties keep arrival order.
pub fn rank_by_return(items: &[BacktestItem]) -> Vec<BacktestItem> {
    let mut ranked = items.to_vec();
    ranked.sort_by(|a, b| b.ret.total_cmp(&a.ret));
    ranked
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(code: &str, ret: f64, dd: f64, sharpe: f64) -> BacktestItem {
        BacktestItem {
            code: code.to_string(),
            name: code.to_string(),
            ret,
            max_drawdown: dd,
            sharpe,
        }
    }

    #[test]
    fn snapshot_is_mean_of_items() {
        let items = vec![item("A", 0.10, 0.20, 1.0), item("B", -0.30, 0.10, 2.0)];
        let snap = AggregateSnapshot::from_items(&items);
        assert_eq!(snap.count, 2);
        assert!((snap.average_return - -0.10).abs() < 1e-12);
        assert!((snap.average_max_drawdown - 0.15).abs() < 1e-12);
        assert!((snap.average_sharpe - 1.5).abs() < 1e-12);
    }

    #[test]
    fn empty_snapshot_is_zeroed() {
        assert_eq!(AggregateSnapshot::from_items(&[]), AggregateSnapshot::default());
    }

    #[test]
    fn divergence_checks_count_and_averages() {
        let local = AggregateSnapshot::from_items(&[item("A", 0.1, 0.1, 1.0)]);
        let same = BackendSummary {
            avg_return: 0.1,
            avg_max_drawdown: 0.1,
            avg_sharpe: 1.0,
            count: Some(1),
        };
        assert!(!same.diverges_from(&local, 1e-9));
        assert!(BackendSummary { count: Some(5), ..same }.diverges_from(&local, 1e-9));
        assert!(BackendSummary { avg_sharpe: 3.0, ..same }.diverges_from(&local, 1e-9));
    }

    #[test]
    fn ranking_is_descending_and_stable() {
        let items = vec![item("A", 0.1, 0.0, 0.0), item("B", 0.5, 0.0, 0.0), item("C", 0.1, 0.0, 0.0)];
        let codes: Vec<_> = rank_by_return(&items).into_iter().map(|i| i.code).collect();
        assert_eq!(codes, ["B", "A", "C"]);
    }
}
