//! Boundary adapters: loosely shaped backend JSON → the typed core model.
//!
//! The backend (and older versions of it) name the same field several ways.
//! Each field has one fixed priority list below; the first key present with a
//! non-null value wins. Nothing past this module sees raw JSON.
//!
//! | field        | keys, in priority order                    |
//! |--------------|--------------------------------------------|
//! | return       | `return`, `ret`, `total_return`            |
//! | max drawdown | `max_drawdown`, `maxDD`, `MaxDD`, `drawdown`|
//! | sharpe       | `sharpe`, `Sharpe`                          |
//! | bar time     | `Time`, `time`, `timestamp`, `ts`, `date`   |
//! | open/high/.. | `Open`, `open`, `o`, `OpenPrice` (etc.)     |
//! | volume       | `Volume`, `volume`, `v`, `TradeVolume`      |
//! | amount       | `Amount`, `amount`, `Turnover`, `trade_amount` |
//! | trade index  | `index`, `idx`, `bar_index`                 |
//! | trade price  | `price`, `px`, `fill_price`                 |
//! | trade qty    | `qty`, `quantity`, `size`                   |
//! | trade time   | `time`, `timestamp`, `ts`                   |
//! | equity       | `equity`, `Equity`, `nav`                   |
//! | cash         | `cash`, `Cash`                              |
//! | grid fast    | `fast`, `fast_period`                       |
//! | grid slow    | `slow`, `slow_period`                       |

use btdash_core::candle::{EquityCurve, PriceBar, Trade, TradeSide};
use btdash_core::indicators::round_dp;
use btdash_core::report::{BacktestItem, BacktestResult, BackendSummary, BatchResult};
use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::Serialize;
use serde_json::Value;

use crate::error::HubError;

const RETURN_KEYS: &[&str] = &["return", "ret", "total_return"];
const DRAWDOWN_KEYS: &[&str] = &["max_drawdown", "maxDD", "MaxDD", "drawdown"];
const SHARPE_KEYS: &[&str] = &["sharpe", "Sharpe"];
const CODE_KEYS: &[&str] = &["code", "Code"];
const NAME_KEYS: &[&str] = &["name", "Name"];

const TIME_KEYS: &[&str] = &["Time", "time", "timestamp", "ts", "date"];
const OPEN_KEYS: &[&str] = &["Open", "open", "o", "OpenPrice"];
const HIGH_KEYS: &[&str] = &["High", "high", "h", "HighPrice"];
const LOW_KEYS: &[&str] = &["Low", "low", "l", "LowPrice"];
const CLOSE_KEYS: &[&str] = &["Close", "close", "c", "ClosePrice"];
const VOLUME_KEYS: &[&str] = &["Volume", "volume", "v", "TradeVolume"];
const AMOUNT_KEYS: &[&str] = &["Amount", "amount", "Turnover", "trade_amount"];

const TRADE_INDEX_KEYS: &[&str] = &["index", "idx", "bar_index"];
const TRADE_PRICE_KEYS: &[&str] = &["price", "px", "fill_price"];
const TRADE_QTY_KEYS: &[&str] = &["qty", "quantity", "size"];
const TRADE_TIME_KEYS: &[&str] = &["time", "timestamp", "ts"];
const TRADE_SIDE_KEYS: &[&str] = &["side", "Side"];

const EQUITY_KEYS: &[&str] = &["equity", "Equity", "nav"];
const CASH_KEYS: &[&str] = &["cash", "Cash"];
const TRADES_KEYS: &[&str] = &["trades", "Trades"];

const FAST_KEYS: &[&str] = &["fast", "fast_period"];
const SLOW_KEYS: &[&str] = &["slow", "slow_period"];

/// Numbers above this are already milliseconds; below it, seconds.
const MS_THRESHOLD: i64 = 10_000_000_000;

/// How a price feed encodes prices.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PriceScale {
    Unit,
    /// Prices and turnover ×1000 on the wire (the `/klines` feed).
    Milli,
}

/// Strip the `{code, msg, data}` envelope. A non-200 `code` becomes
/// [`HubError::Upstream`] carrying the backend's message.
pub fn unwrap_envelope(body: Value) -> Result<Value, HubError> {
    let is_envelope = body
        .as_object()
        .is_some_and(|o| o.contains_key("code") && o.contains_key("data"));
    if !is_envelope {
        return Ok(body);
    }
    let code = body.get("code").and_then(parse_f64_value).unwrap_or(0.0);
    if code != 200.0 {
        let msg = body
            .get("msg")
            .and_then(Value::as_str)
            .filter(|s| !s.is_empty())
            .unwrap_or("request failed");
        return Err(HubError::Upstream(msg.to_string()));
    }
    let mut body = body;
    Ok(body.get_mut("data").map(Value::take).unwrap_or(Value::Null))
}

/// A bare array, or the first array found under one of `keys`.
pub fn list_body(body: Value, keys: &[&str]) -> Vec<Value> {
    match body {
        Value::Array(items) => items,
        Value::Object(mut obj) => keys
            .iter()
            .find_map(|k| match obj.remove(*k) {
                Some(Value::Array(items)) => Some(items),
                _ => None,
            })
            .unwrap_or_default(),
        _ => Vec::new(),
    }
}

fn parse_f64_value(v: &Value) -> Option<f64> {
    v.as_f64()
        .or_else(|| v.as_str().and_then(|s| s.trim().parse::<f64>().ok()))
}

fn pick<'a>(obj: &'a Value, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|k| obj.get(*k))
        .find(|v| !v.is_null())
}

fn pick_f64(obj: &Value, keys: &[&str]) -> Option<f64> {
    pick(obj, keys).and_then(parse_f64_value)
}

fn pick_string(obj: &Value, keys: &[&str]) -> Option<String> {
    match pick(obj, keys)? {
        Value::String(s) => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn pick_f64_list(obj: &Value, keys: &[&str]) -> Vec<f64> {
    pick(obj, keys)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().map(|v| parse_f64_value(v).unwrap_or(0.0)).collect())
        .unwrap_or_default()
}

/// Normalize a timestamp to ms since epoch (UTC).
pub fn parse_timestamp_ms(v: &Value) -> Option<i64> {
    if let Some(n) = v.as_i64() {
        return Some(scale_epoch(n));
    }
    if let Some(f) = v.as_f64() {
        return Some(scale_epoch(f.round() as i64));
    }
    let s = v.as_str()?.trim();
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(scale_epoch(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%d %H:%M:%S") {
        return Some(dt.and_utc().timestamp_millis());
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}

fn scale_epoch(n: i64) -> i64 {
    if n > MS_THRESHOLD {
        n
    } else {
        n.saturating_mul(1000)
    }
}

/// One bar, or `None` when it has no usable timestamp.
pub fn price_bar(raw: &Value, scale: PriceScale) -> Option<PriceBar> {
    let time = pick(raw, TIME_KEYS).and_then(parse_timestamp_ms)?;
    let price = |keys: &[&str]| {
        let v = pick_f64(raw, keys).unwrap_or(0.0);
        match scale {
            PriceScale::Unit => v,
            PriceScale::Milli => round_dp(v / 1000.0, 4),
        }
    };
    let amount = pick_f64(raw, AMOUNT_KEYS).map(|a| match scale {
        PriceScale::Unit => a,
        PriceScale::Milli => round_dp(a / 1000.0, 2),
    });
    Some(PriceBar {
        time,
        open: price(OPEN_KEYS),
        high: price(HIGH_KEYS),
        low: price(LOW_KEYS),
        close: price(CLOSE_KEYS),
        volume: pick_f64(raw, VOLUME_KEYS).unwrap_or(0.0),
        amount,
    })
}

/// Bars in chronological order; undated bars and duplicate timestamps are
/// dropped.
pub fn price_bars(raw: Vec<Value>, scale: PriceScale) -> Vec<PriceBar> {
    let mut bars: Vec<PriceBar> = raw.iter().filter_map(|v| price_bar(v, scale)).collect();
    bars.sort_by_key(|b| b.time);
    bars.dedup_by_key(|b| b.time);
    bars
}

/// Non-negative integral index; `3`, `3.0` and `"3"` all read as 3.
fn parse_index(v: &Value) -> Option<u64> {
    if let Some(n) = v.as_u64() {
        return Some(n);
    }
    let f = parse_f64_value(v)?;
    (f >= 0.0 && f.fract() == 0.0 && f <= u32::MAX as f64).then_some(f as u64)
}

/// One trade, or `None` when its index or side is missing or invalid.
pub fn trade(raw: &Value) -> Option<Trade> {
    let index = pick(raw, TRADE_INDEX_KEYS).and_then(parse_index)?;
    let side = pick(raw, TRADE_SIDE_KEYS)
        .and_then(Value::as_str)
        .and_then(TradeSide::parse)?;
    Some(Trade {
        sequence_index: usize::try_from(index).ok()?,
        side,
        price: pick_f64(raw, TRADE_PRICE_KEYS).unwrap_or(0.0),
        quantity: pick_f64(raw, TRADE_QTY_KEYS),
        time: pick(raw, TRADE_TIME_KEYS).and_then(parse_timestamp_ms),
    })
}

/// A multi-symbol outcome. Requires a code; the name falls back to it.
pub fn backtest_item(raw: &Value) -> Option<BacktestItem> {
    let code = pick_string(raw, CODE_KEYS).filter(|c| !c.is_empty())?;
    let name = pick_string(raw, NAME_KEYS)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| code.clone());
    Some(BacktestItem {
        code,
        name,
        ret: pick_f64(raw, RETURN_KEYS).unwrap_or(0.0),
        max_drawdown: pick_f64(raw, DRAWDOWN_KEYS).unwrap_or(0.0),
        sharpe: pick_f64(raw, SHARPE_KEYS).unwrap_or(0.0),
    })
}

pub fn backend_summary(raw: &Value) -> BackendSummary {
    BackendSummary {
        avg_return: pick_f64(raw, &["avg_return"]).unwrap_or(0.0),
        avg_max_drawdown: pick_f64(raw, &["avg_max_drawdown"]).unwrap_or(0.0),
        avg_sharpe: pick_f64(raw, &["avg_sharpe"]).unwrap_or(0.0),
        count: pick(raw, &["count"]).and_then(Value::as_u64).map(|c| c as usize),
    }
}

pub fn backtest_result(raw: &Value) -> BacktestResult {
    let trades = pick(raw, TRADES_KEYS)
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(trade).collect())
        .unwrap_or_default();
    BacktestResult {
        curve: EquityCurve {
            equity: pick_f64_list(raw, EQUITY_KEYS),
            cash: pick_f64_list(raw, CASH_KEYS),
        },
        trades,
        ret: pick_f64(raw, RETURN_KEYS).unwrap_or(0.0),
        max_drawdown: pick_f64(raw, DRAWDOWN_KEYS).unwrap_or(0.0),
        sharpe: pick_f64(raw, SHARPE_KEYS).unwrap_or(0.0),
    }
}

pub fn batch_result(raw: Value) -> BatchResult {
    let summary = backend_summary(&raw);
    let items: Vec<BacktestItem> = list_body(raw, &["items"])
        .iter()
        .filter_map(backtest_item)
        .collect();
    BatchResult {
        summary: BackendSummary {
            count: summary.count.or(Some(items.len())),
            ..summary
        },
        items,
    }
}

/// Catalog entry for a tradable symbol.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SymbolInfo {
    pub code: String,
    pub name: String,
}

/// Accepts either a bare code string or a `{code, name}` object.
pub fn symbol_info(raw: &Value) -> Option<SymbolInfo> {
    if let Some(code) = raw.as_str() {
        let code = code.trim();
        return (!code.is_empty()).then(|| SymbolInfo {
            code: code.to_string(),
            name: code.to_string(),
        });
    }
    let code = pick_string(raw, CODE_KEYS).filter(|c| !c.is_empty())?;
    let name = pick_string(raw, NAME_KEYS)
        .filter(|n| !n.is_empty())
        .unwrap_or_else(|| code.clone());
    Some(SymbolInfo { code, name })
}

/// One screener candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScreenerHit {
    pub symbol: String,
    pub score: f64,
    pub price: f64,
    /// 1 buy, -1 sell, 0 hold.
    pub signal: i8,
}

pub fn screener_hit(raw: &Value) -> Option<ScreenerHit> {
    let symbol = pick_string(raw, &["symbol", "ticker", "code"]).filter(|s| !s.is_empty())?;
    let signal = match pick_f64(raw, &["signal", "sig"]).unwrap_or(0.0) {
        s if s > 0.0 => 1,
        s if s < 0.0 => -1,
        _ => 0,
    };
    Some(ScreenerHit {
        symbol,
        score: pick_f64(raw, &["score", "value"]).unwrap_or(0.0),
        price: pick_f64(raw, &["price", "last"]).unwrap_or(0.0),
        signal,
    })
}

/// One parameter combination from a grid sweep.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct GridRow {
    pub fast: u32,
    pub slow: u32,
    #[serde(rename = "return")]
    pub ret: f64,
    pub sharpe: f64,
    pub max_drawdown: f64,
}

pub fn grid_row(raw: &Value) -> GridRow {
    let period = |keys: &[&str]| {
        pick(raw, keys)
            .and_then(parse_index)
            .and_then(|p| u32::try_from(p).ok())
            .unwrap_or(0)
    };
    GridRow {
        fast: period(FAST_KEYS),
        slow: period(SLOW_KEYS),
        ret: pick_f64(raw, RETURN_KEYS).unwrap_or(0.0),
        sharpe: pick_f64(raw, SHARPE_KEYS).unwrap_or(0.0),
        max_drawdown: pick_f64(raw, DRAWDOWN_KEYS).unwrap_or(0.0),
    }
}
