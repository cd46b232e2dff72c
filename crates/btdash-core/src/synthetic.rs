//! Locally generated stand-in chart data.
//!
//! Used when a symbol's real series cannot be fetched so a chart grid stays
//! populated. Output is deterministic per symbol.

use std::hash::Hasher;

use chrono::{Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rustc_hash::FxHasher;

use crate::candle::{ChartData, PriceBar, Trade, TradeSide};
use crate::indicators::round_dp;

pub const SYNTHETIC_BARS: usize = 80;

fn seed_for(symbol: &str) -> u64 {
    let mut h = FxHasher::default();
    h.write(symbol.as_bytes());
    h.finish()
}

/// Daily random walk of `n` bars from 2024-03-01. `TRENDUP` / `TRENDDOWN`
/// get a drift of ±0.3 per bar; `TRENDDOWN` starts at 50, everything else
/// at 10.
pub fn synthetic_candles(symbol: &str, n: usize) -> Vec<PriceBar> {
    let mut rng = StdRng::seed_from_u64(seed_for(symbol));
    let start = NaiveDate::from_ymd_opt(2024, 3, 1)
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc())
        .unwrap_or_default();
    let bias = match symbol {
        "TRENDUP" => 0.3,
        "TRENDDOWN" => -0.3,
        _ => 0.0,
    };
    let mut price: f64 = if symbol == "TRENDDOWN" { 50.0 } else { 10.0 };

    (0..n)
        .map(|i| {
            let step = (rng.gen::<f64>() - 0.5) + bias;
            let open = price;
            let close = (open + step).max(0.1);
            let high = open.max(close) + rng.gen::<f64>() * 0.5;
            let low = open.min(close) - rng.gen::<f64>() * 0.5;
            price = close;
            PriceBar {
                time: (start + Duration::days(i as i64)).timestamp_millis(),
                open: round_dp(open, 4),
                high: round_dp(high, 4),
                low: round_dp(low, 4),
                close: round_dp(close, 4),
                volume: (50_000.0 + rng.gen::<f64>() * 50_000.0).floor(),
                amount: None,
            }
        })
        .collect()
}

/// Fixed round-trip script. The last trade sits past the end of an 80-bar
/// series on purpose so overlays exercise their range filter.
pub fn synthetic_trades() -> Vec<Trade> {
    vec![
        Trade::new(10, TradeSide::Buy, 100.0),
        Trade::new(40, TradeSide::Sell, 110.0),
        Trade::new(60, TradeSide::Buy, 105.0),
        Trade::new(95, TradeSide::Sell, 120.0),
    ]
}

pub fn synthetic_chart(symbol: &str) -> ChartData {
    ChartData {
        candles: synthetic_candles(symbol, SYNTHETIC_BARS),
        trades: synthetic_trades(),
    }
}
