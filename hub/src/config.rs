use std::env;
use std::time::Duration;

use chrono::NaiveDate;

use crate::error::HubError;
use crate::request::BacktestRequest;

/// Hub configuration derived from environment variables.
#[derive(Debug, Clone, PartialEq)]
pub struct HubConfig {
    /// HTTP base of the backtest service, e.g. `http://localhost:8080/api`.
    pub api_base: String,
    /// Empty ⇒ take the first strategy from the catalog.
    pub strategy: String,
    pub start: Option<String>,
    pub end: Option<String>,

    // ── Backtest parameters ────────────────────────────────────────
    pub cash: f64,
    pub size: u32,
    /// Fee rate in per-ten-thousand units, as entered in the form.
    pub fee_rate_bp: f64,
    pub min_fee: f64,
    pub slippage: f64,
    pub stop_loss: f64,
    pub take_profit: f64,

    // ── Chart backfill ─────────────────────────────────────────────
    pub chart_batch_size: usize,
    pub page_size: usize,

    // ── Timeouts ───────────────────────────────────────────────────
    pub http_timeout_ms: u64,
    pub stream_open_timeout_ms: u64,
    pub stream_idle_timeout_ms: u64,
}

fn lookup_str(get: &dyn Fn(&str) -> Option<String>, name: &str, default: &str) -> String {
    get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .unwrap_or_else(|| default.to_string())
}

fn lookup_opt(get: &dyn Fn(&str) -> Option<String>, name: &str) -> Option<String> {
    get(name)
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

fn lookup_parse<T: std::str::FromStr>(
    get: &dyn Fn(&str) -> Option<String>,
    name: &str,
    default: T,
) -> T {
    get(name)
        .and_then(|s| s.trim().parse().ok())
        .unwrap_or(default)
}

impl HubConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Build from any key lookup; unset, blank or unparsable values fall back
    /// to defaults.
    pub fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let get: &dyn Fn(&str) -> Option<String> = &get;
        Self {
            api_base: lookup_str(get, "BTDASH_API_BASE", "http://localhost:8080/api"),
            strategy: lookup_str(get, "BTDASH_STRATEGY", ""),
            start: lookup_opt(get, "BTDASH_START"),
            end: lookup_opt(get, "BTDASH_END"),
            cash: lookup_parse(get, "BTDASH_CASH", 100_000.0),
            size: lookup_parse(get, "BTDASH_SIZE", 10),
            fee_rate_bp: lookup_parse(get, "BTDASH_FEE_BP", 0.5),
            min_fee: lookup_parse(get, "BTDASH_MIN_FEE", 5.0),
            slippage: lookup_parse(get, "BTDASH_SLIPPAGE", 0.0),
            stop_loss: lookup_parse(get, "BTDASH_STOP_LOSS", 0.0),
            take_profit: lookup_parse(get, "BTDASH_TAKE_PROFIT", 0.0),
            chart_batch_size: lookup_parse(get, "BTDASH_CHART_BATCH", 6usize).max(1),
            page_size: lookup_parse(get, "BTDASH_PAGE_SIZE", 60usize).max(1),
            http_timeout_ms: lookup_parse(get, "BTDASH_HTTP_TIMEOUT_MS", 15_000),
            stream_open_timeout_ms: lookup_parse(get, "BTDASH_STREAM_OPEN_TIMEOUT_MS", 10_000),
            stream_idle_timeout_ms: lookup_parse(get, "BTDASH_STREAM_IDLE_TIMEOUT_MS", 300_000),
        }
    }

    pub fn http_timeout(&self) -> Duration {
        Duration::from_millis(self.http_timeout_ms.max(1))
    }

    pub fn stream_open_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_open_timeout_ms.max(1))
    }

    pub fn stream_idle_timeout(&self) -> Duration {
        Duration::from_millis(self.stream_idle_timeout_ms.max(1))
    }

    /// Request template carrying the configured parameters for `strategy`.
    pub fn request_for(&self, strategy: &str) -> Result<BacktestRequest, HubError> {
        Ok(BacktestRequest {
            strategy: strategy.to_string(),
            symbol: None,
            start: parse_date("start", self.start.as_deref())?,
            end: parse_date("end", self.end.as_deref())?,
            cash: Some(self.cash),
            size: Some(self.size),
            fee_rate_bp: Some(self.fee_rate_bp),
            min_fee: Some(self.min_fee),
            slippage: Some(self.slippage),
            stop_loss: Some(self.stop_loss),
            take_profit: Some(self.take_profit),
        })
    }
}

fn parse_date(which: &str, raw: Option<&str>) -> Result<Option<NaiveDate>, HubError> {
    raw.map(|d| {
        NaiveDate::parse_from_str(d, "%Y-%m-%d").map_err(|_| {
            HubError::BadRequest(format!("invalid {which} date '{d}' (expected YYYY-MM-DD)"))
        })
    })
    .transpose()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn config_from(pairs: &[(&str, &str)]) -> HubConfig {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        HubConfig::from_lookup(|k| map.get(k).cloned())
    }

    #[test]
    fn defaults_match_dashboard_form() {
        let cfg = config_from(&[]);
        assert_eq!(cfg.api_base, "http://localhost:8080/api");
        assert_eq!(cfg.cash, 100_000.0);
        assert_eq!(cfg.size, 10);
        assert_eq!(cfg.fee_rate_bp, 0.5);
        assert_eq!(cfg.min_fee, 5.0);
        assert_eq!(cfg.chart_batch_size, 6);
        assert_eq!(cfg.page_size, 60);
        assert!(cfg.start.is_none());
    }

    #[test]
    fn blank_and_garbage_values_fall_back() {
        let cfg = config_from(&[
            ("BTDASH_CASH", "  "),
            ("BTDASH_SIZE", "ten"),
            ("BTDASH_CHART_BATCH", "0"),
            ("BTDASH_STRATEGY", " rsi "),
        ]);
        assert_eq!(cfg.cash, 100_000.0);
        assert_eq!(cfg.size, 10);
        assert_eq!(cfg.chart_batch_size, 1);
        assert_eq!(cfg.strategy, "rsi");
    }

    #[test]
    fn request_template_carries_dates_and_params() {
        let cfg = config_from(&[("BTDASH_START", "2024-01-02")]);
        let req = cfg.request_for("sma_cross").unwrap();
        assert_eq!(req.strategy, "sma_cross");
        assert_eq!(req.start, NaiveDate::from_ymd_opt(2024, 1, 2));
        assert!(req.end.is_none());
        assert_eq!(req.fee_rate_bp, Some(0.5));
    }

    #[test]
    fn unparsable_date_is_rejected() {
        let cfg = config_from(&[("BTDASH_START", "2024-01-02"), ("BTDASH_END", "not-a-date")]);
        let err = cfg.request_for("sma_cross").unwrap_err();
        assert_eq!(
            err,
            HubError::BadRequest("invalid end date 'not-a-date' (expected YYYY-MM-DD)".into())
        );
        assert_eq!(
            err.user_message(),
            "invalid end date 'not-a-date' (expected YYYY-MM-DD)"
        );
    }
}
