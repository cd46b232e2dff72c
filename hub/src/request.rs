use chrono::NaiveDate;
use serde_json::{json, Map, Value};

use crate::error::HubError;

/// Parameters for a backtest run. Unset fields take the backend's defaults.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct BacktestRequest {
    pub strategy: String,
    /// Required for single-symbol runs, ignored for multi-symbol streams.
    pub symbol: Option<String>,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub cash: Option<f64>,
    pub size: Option<u32>,
    /// Per-ten-thousand, as displayed. Sent divided by 10 000.
    pub fee_rate_bp: Option<f64>,
    pub min_fee: Option<f64>,
    pub slippage: Option<f64>,
    pub stop_loss: Option<f64>,
    pub take_profit: Option<f64>,
}

impl BacktestRequest {
    pub fn for_symbol(&self, symbol: &str) -> Self {
        Self {
            symbol: Some(symbol.to_string()),
            ..self.clone()
        }
    }

    /// Fee rate as a plain fraction.
    pub fn fee_rate(&self) -> Option<f64> {
        self.fee_rate_bp.map(|bp| bp / 10_000.0)
    }

    pub fn validate_batch(&self) -> Result<(), HubError> {
        if self.strategy.trim().is_empty() {
            return Err(HubError::BadRequest("strategy is required".into()));
        }
        check_range(self.start, self.end)
    }

    pub fn validate_single(&self) -> Result<(), HubError> {
        self.validate_batch()?;
        match self.symbol.as_deref().map(str::trim) {
            Some(s) if !s.is_empty() => Ok(()),
            _ => Err(HubError::BadRequest("symbol is required".into())),
        }
    }

    /// Wire parameters in a fixed order, skipping unset fields.
    pub fn params(&self) -> Vec<(&'static str, String)> {
        let mut out = vec![("strategy", self.strategy.trim().to_string())];
        if let Some(sym) = &self.symbol {
            out.push(("symbol", sym.trim().to_string()));
        }
        if let Some(d) = self.start {
            out.push(("start", d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = self.end {
            out.push(("end", d.format("%Y-%m-%d").to_string()));
        }
        let nums = [
            ("cash", self.cash),
            ("size", self.size.map(f64::from)),
            ("fee_rate", self.fee_rate()),
            ("min_fee", self.min_fee),
            ("slippage", self.slippage),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ];
        for (key, val) in nums {
            if let Some(v) = val {
                out.push((key, v.to_string()));
            }
        }
        out
    }

    /// JSON body for the POST endpoints.
    pub fn payload(&self) -> Value {
        let mut body = Map::new();
        body.insert("strategy".into(), json!(self.strategy.trim()));
        if let Some(sym) = &self.symbol {
            body.insert("symbol".into(), json!(sym.trim()));
        }
        if let Some(d) = self.start {
            body.insert("start".into(), json!(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(d) = self.end {
            body.insert("end".into(), json!(d.format("%Y-%m-%d").to_string()));
        }
        if let Some(size) = self.size {
            body.insert("size".into(), json!(size));
        }
        let nums = [
            ("cash", self.cash),
            ("fee_rate", self.fee_rate()),
            ("min_fee", self.min_fee),
            ("slippage", self.slippage),
            ("stop_loss", self.stop_loss),
            ("take_profit", self.take_profit),
        ];
        for (key, val) in nums {
            if let Some(v) = val {
                body.insert(key.into(), json!(v));
            }
        }
        // Older backends read the camelCase spellings.
        let aliases = [
            ("feeRate", self.fee_rate()),
            ("minFee", self.min_fee),
            ("stopLoss", self.stop_loss),
            ("takeProfit", self.take_profit),
        ];
        for (key, val) in aliases {
            if let Some(v) = val {
                body.insert(key.into(), json!(v));
            }
        }
        Value::Object(body)
    }
}

/// Fast/slow moving-average parameter sweep for one symbol.
#[derive(Debug, Clone, PartialEq)]
pub struct GridRequest {
    pub symbol: String,
    pub start: Option<NaiveDate>,
    pub end: Option<NaiveDate>,
    pub cash: Option<f64>,
    pub size: Option<u32>,
    pub fast_min: u32,
    pub fast_max: u32,
    pub slow_min: u32,
    pub slow_max: u32,
    pub step: u32,
    /// Rows to keep, best first.
    pub top_k: u32,
}

impl GridRequest {
    /// Sweep 3..=10 fast against 15..=50 slow in steps of 1, keeping 10.
    pub fn new(symbol: &str) -> Self {
        Self {
            symbol: symbol.trim().to_string(),
            start: None,
            end: None,
            cash: None,
            size: None,
            fast_min: 3,
            fast_max: 10,
            slow_min: 15,
            slow_max: 50,
            step: 1,
            top_k: 10,
        }
    }

    pub fn validate(&self) -> Result<(), HubError> {
        if self.symbol.trim().is_empty() {
            return Err(HubError::BadRequest("symbol is required".into()));
        }
        if self.fast_min > self.fast_max || self.slow_min > self.slow_max {
            return Err(HubError::BadRequest(format!(
                "empty grid: fast {}..{}, slow {}..{}",
                self.fast_min, self.fast_max, self.slow_min, self.slow_max
            )));
        }
        if self.step == 0 {
            return Err(HubError::BadRequest("grid step must be positive".into()));
        }
        check_range(self.start, self.end)
    }

    pub fn payload(&self) -> Value {
        let mut body = json!({
            "symbol": self.symbol.trim(),
            "fast_min": self.fast_min,
            "fast_max": self.fast_max,
            "slow_min": self.slow_min,
            "slow_max": self.slow_max,
            "step": self.step,
            "top_k": self.top_k,
        });
        if let Some(d) = self.start {
            body["start"] = json!(d.format("%Y-%m-%d").to_string());
        }
        if let Some(d) = self.end {
            body["end"] = json!(d.format("%Y-%m-%d").to_string());
        }
        if let Some(cash) = self.cash {
            body["cash"] = json!(cash);
        }
        if let Some(size) = self.size {
            body["size"] = json!(size);
        }
        body
    }
}

fn check_range(start: Option<NaiveDate>, end: Option<NaiveDate>) -> Result<(), HubError> {
    match (start, end) {
        (Some(start), Some(end)) if start > end => Err(HubError::BadRequest(format!(
            "start date {start} is after end date {end}"
        ))),
        _ => Ok(()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base() -> BacktestRequest {
        BacktestRequest {
            strategy: "sma_cross".into(),
            cash: Some(100_000.0),
            size: Some(10),
            fee_rate_bp: Some(5.0),
            ..Default::default()
        }
    }

    #[test]
    fn fee_rate_is_sent_as_fraction() {
        let req = base();
        assert_eq!(req.fee_rate(), Some(0.0005));
        assert_eq!(req.payload()["fee_rate"], json!(0.0005));
        assert!(req.params().contains(&("fee_rate", "0.0005".to_string())));
    }

    #[test]
    fn payload_carries_camel_case_aliases() {
        let req = BacktestRequest {
            min_fee: Some(5.0),
            stop_loss: Some(0.1),
            ..base()
        };
        let body = req.payload();
        assert_eq!(body["feeRate"], json!(0.0005));
        assert_eq!(body["minFee"], body["min_fee"]);
        assert_eq!(body["stopLoss"], json!(0.1));
        assert!(body.get("takeProfit").is_none());
        // query params stay snake_case only
        assert!(!req.params().iter().any(|(k, _)| *k == "feeRate"));
    }

    #[test]
    fn validation_messages_are_readable() {
        let missing = BacktestRequest::default();
        assert_eq!(
            missing.validate_batch(),
            Err(HubError::BadRequest("strategy is required".into()))
        );
        assert_eq!(
            base().validate_single(),
            Err(HubError::BadRequest("symbol is required".into()))
        );
        assert!(base().for_symbol("600000").validate_single().is_ok());

        let inverted = BacktestRequest {
            start: NaiveDate::from_ymd_opt(2024, 5, 1),
            end: NaiveDate::from_ymd_opt(2024, 1, 1),
            ..base()
        };
        assert!(matches!(inverted.validate_batch(), Err(HubError::BadRequest(_))));
    }

    #[test]
    fn params_skip_unset_fields() {
        let keys: Vec<_> = base().params().into_iter().map(|(k, _)| k).collect();
        assert_eq!(keys, ["strategy", "cash", "size", "fee_rate"]);
    }

    #[test]
    fn grid_request_defaults_and_validation() {
        let grid = GridRequest::new(" sz000001 ");
        assert!(grid.validate().is_ok());
        let body = grid.payload();
        assert_eq!(body["symbol"], json!("sz000001"));
        assert_eq!(body["fast_min"], json!(3));
        assert_eq!(body["slow_max"], json!(50));
        assert_eq!(body["top_k"], json!(10));
        assert!(body.get("start").is_none());

        let inverted = GridRequest {
            fast_min: 12,
            ..GridRequest::new("sz000001")
        };
        assert!(matches!(inverted.validate(), Err(HubError::BadRequest(_))));
        let no_step = GridRequest {
            step: 0,
            ..GridRequest::new("sz000001")
        };
        assert!(no_step.validate().is_err());
        assert_eq!(
            GridRequest::new("").validate(),
            Err(HubError::BadRequest("symbol is required".into()))
        );
    }
}
