use serde::{Deserialize, Serialize};

/// One OHLCV observation. `time` is the bar open in ms since epoch (UTC).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PriceBar {
    pub time: i64,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub amount: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TradeSide {
    Buy,
    Sell,
}

impl TradeSide {
    /// Case-insensitive parse of the backend's side string.
    pub fn parse(raw: &str) -> Option<Self> {
        match raw.trim().to_ascii_lowercase().as_str() {
            "buy" | "b" | "long" => Some(Self::Buy),
            "sell" | "s" | "short" => Some(Self::Sell),
            _ => None,
        }
    }
}

/// A fill reported by the backtest, positioned by index into the bar/equity
/// sequence it was produced against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Trade {
    pub sequence_index: usize,
    pub side: TradeSide,
    pub price: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub quantity: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub time: Option<i64>,
}

impl Trade {
    pub fn new(sequence_index: usize, side: TradeSide, price: f64) -> Self {
        Self {
            sequence_index,
            side,
            price,
            quantity: None,
            time: None,
        }
    }
}

/// Account equity and cash, aligned by position with the backtest's bars.
/// Index 0 is the starting state.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EquityCurve {
    pub equity: Vec<f64>,
    pub cash: Vec<f64>,
}

/// Everything a per-symbol chart needs.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChartData {
    pub candles: Vec<PriceBar>,
    pub trades: Vec<Trade>,
}

impl ChartData {
    pub fn closes(&self) -> Vec<f64> {
        closes(&self.candles)
    }
}

pub fn closes(bars: &[PriceBar]) -> Vec<f64> {
    bars.iter().map(|b| b.close).collect()
}
