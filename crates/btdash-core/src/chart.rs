//! Renderer-neutral chart series built from bars, trades and equity.
//!
//! Nothing here knows about colours or widgets: bars get a direction class,
//! trades become markers and reference lines, indicators become plain
//! series. Composition is a pure function of its inputs.

use chrono::DateTime;
use serde::Serialize;

use crate::candle::{closes, EquityCurve, PriceBar, Trade, TradeSide};
use crate::indicators::{bollinger_bands, moving_average, percent_returns, BollingerBands};

pub const BOLLINGER_WINDOW: usize = 20;
pub const BOLLINGER_K: f64 = 2.0;

/// Display toggles for one price chart.
#[derive(Debug, Clone, PartialEq)]
pub struct ChartOptions {
    pub show_buy: bool,
    pub show_sell: bool,
    pub show_returns: bool,
    pub show_volume: bool,
    pub show_bollinger: bool,
    /// Moving-average overlays, one line per window.
    pub ma_windows: Vec<usize>,
    /// When set, the initial viewport covers only the last `n` bars.
    pub window_count: Option<usize>,
}

impl Default for ChartOptions {
    fn default() -> Self {
        Self {
            show_buy: true,
            show_sell: true,
            show_returns: true,
            show_volume: false,
            show_bollinger: false,
            ma_windows: vec![5, 20],
            window_count: None,
        }
    }
}

#[derive(Debug, Clone, Copy)]
pub struct ChartInput<'a> {
    pub bars: &'a [PriceBar],
    pub trades: &'a [Trade],
    pub equity: Option<&'a EquityCurve>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BarDirection {
    Up,
    Down,
}

/// Close at or above open counts as up.
pub fn classify_direction(bar: &PriceBar) -> BarDirection {
    if bar.close >= bar.open {
        BarDirection::Up
    } else {
        BarDirection::Down
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct Ohlc {
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct VolumeBar {
    pub value: f64,
    pub direction: BarDirection,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LineSeries {
    pub window: usize,
    pub values: Vec<f64>,
}

/// A trade pinned to a bar: `value` is the series value at `index`.
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct TradeMarker {
    pub index: usize,
    pub value: f64,
    pub side: TradeSide,
}

/// Vertical line through a traded bar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct ReferenceLine {
    pub index: usize,
    pub side: TradeSide,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChartBundle {
    pub labels: Vec<String>,
    pub ohlc: Vec<Ohlc>,
    pub volume: Option<Vec<VolumeBar>>,
    pub moving_averages: Vec<LineSeries>,
    pub bollinger: Option<BollingerBands>,
    pub returns: Option<Vec<f64>>,
    pub buy_markers: Vec<TradeMarker>,
    pub sell_markers: Vec<TradeMarker>,
    pub reference_lines: Vec<ReferenceLine>,
    /// Inclusive `(start, end)` bar range of the initial viewport.
    pub visible_range: Option<(usize, usize)>,
}

pub fn compose(input: ChartInput<'_>, opts: &ChartOptions) -> ChartBundle {
    let bars = input.bars;
    let closes = closes(bars);

    let side_enabled = |side: TradeSide| match side {
        TradeSide::Buy => opts.show_buy,
        TradeSide::Sell => opts.show_sell,
    };

    let markers = |side: TradeSide| -> Vec<TradeMarker> {
        if !side_enabled(side) {
            return Vec::new();
        }
        markers_on(&closes, input.trades, side)
    };

    let reference_lines = in_range(input.trades, closes.len())
        .filter(|t| side_enabled(t.side))
        .map(|t| ReferenceLine {
            index: t.sequence_index,
            side: t.side,
        })
        .collect();

    let returns = match input.equity {
        Some(curve) if opts.show_returns && !curve.equity.is_empty() => {
            Some(percent_returns(&curve.equity))
        }
        _ => None,
    };

    let visible_range = match opts.window_count {
        Some(n) if !bars.is_empty() => Some((bars.len().saturating_sub(n), bars.len() - 1)),
        _ => None,
    };

    ChartBundle {
        labels: bars.iter().map(|b| date_label(b.time)).collect(),
        ohlc: bars
            .iter()
            .map(|b| Ohlc {
                open: b.open,
                high: b.high,
                low: b.low,
                close: b.close,
            })
            .collect(),
        volume: opts.show_volume.then(|| {
            bars.iter()
                .map(|b| VolumeBar {
                    value: b.volume,
                    direction: classify_direction(b),
                })
                .collect()
        }),
        moving_averages: opts
            .ma_windows
            .iter()
            .map(|&window| LineSeries {
                window,
                values: moving_average(&closes, window),
            })
            .collect(),
        bollinger: opts
            .show_bollinger
            .then(|| bollinger_bands(&closes, BOLLINGER_WINDOW, BOLLINGER_K)),
        returns,
        buy_markers: markers(TradeSide::Buy),
        sell_markers: markers(TradeSide::Sell),
        reference_lines,
        visible_range,
    }
}

/// Equity/cash lines with trade markers placed on the equity curve.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EquityBundle {
    pub equity: Vec<f64>,
    pub cash: Option<Vec<f64>>,
    pub buy_markers: Vec<TradeMarker>,
    pub sell_markers: Vec<TradeMarker>,
}

pub fn compose_equity(curve: &EquityCurve, trades: &[Trade]) -> EquityBundle {
    EquityBundle {
        equity: curve.equity.clone(),
        cash: (!curve.cash.is_empty()).then(|| curve.cash.clone()),
        buy_markers: markers_on(&curve.equity, trades, TradeSide::Buy),
        sell_markers: markers_on(&curve.equity, trades, TradeSide::Sell),
    }
}

/// Trades whose index addresses a bar of a `len`-long series. Others are
/// silently dropped: after date filtering the backtest and chart windows can
/// disagree on range.
fn in_range(trades: &[Trade], len: usize) -> impl Iterator<Item = &Trade> {
    trades.iter().filter(move |t| t.sequence_index < len)
}

fn markers_on(series: &[f64], trades: &[Trade], side: TradeSide) -> Vec<TradeMarker> {
    in_range(trades, series.len())
        .filter(|t| t.side == side)
        .map(|t| TradeMarker {
            index: t.sequence_index,
            value: series[t.sequence_index],
            side,
        })
        .collect()
}

fn date_label(ms: i64) -> String {
    DateTime::from_timestamp_millis(ms)
        .map(|dt| dt.format("%y-%m-%d").to_string())
        .unwrap_or_default()
}

// ---------------------------------------------------------------------------
// Tooltip formatting
// ---------------------------------------------------------------------------

/// Unit names for the 1 / 10^4 / 10^8 display ladder.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MagnitudeUnits {
    pub base: &'static str,
    pub ten_thousand: &'static str,
    pub hundred_million: &'static str,
}

/// Traded volume in lots (手).
pub const VOLUME_UNITS: MagnitudeUnits = MagnitudeUnits {
    base: "手",
    ten_thousand: "万手",
    hundred_million: "亿手",
};

/// Turnover in yuan (元).
pub const AMOUNT_UNITS: MagnitudeUnits = MagnitudeUnits {
    base: "元",
    ten_thousand: "万元",
    hundred_million: "亿元",
};

/// `>= 1e8` → 2 dp in hundred-millions, `>= 1e4` → 2 dp in ten-thousands,
/// otherwise the integer value in the base unit.
pub fn format_magnitude(value: f64, units: &MagnitudeUnits) -> String {
    if value >= 100_000_000.0 {
        format!("{:.2}{}", value / 100_000_000.0, units.hundred_million)
    } else if value >= 10_000.0 {
        format!("{:.2}{}", value / 10_000.0, units.ten_thousand)
    } else {
        format!("{}{}", value.round() as i64, units.base)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TooltipRow {
    pub label: &'static str,
    pub value: String,
}

/// Hover rows for the bar at `idx`; `None` when out of range.
pub fn tooltip(bars: &[PriceBar], idx: usize) -> Option<Vec<TooltipRow>> {
    let bar = bars.get(idx)?;
    let row = |label, value: String| TooltipRow { label, value };
    let mut rows = vec![
        row("date", date_label(bar.time)),
        row("open", bar.open.to_string()),
        row("close", bar.close.to_string()),
        row("high", bar.high.to_string()),
        row("low", bar.low.to_string()),
        row("volume", format_magnitude(bar.volume, &VOLUME_UNITS)),
    ];
    if let Some(amount) = bar.amount {
        rows.push(row("amount", format_magnitude(amount, &AMOUNT_UNITS)));
    }
    Some(rows)
}
