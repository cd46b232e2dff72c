use std::time::Duration;

use btdash_core::candle::PriceBar;
use btdash_core::report::{BacktestResult, BatchResult};
use chrono::NaiveDate;
use serde_json::{json, Value};
use tracing::debug;
use url::Url;

use crate::error::HubError;
use crate::normalize::{self, GridRow, PriceScale, ScreenerHit, SymbolInfo};
use crate::request::{BacktestRequest, GridRequest};

const BAR_LIST_KEYS: &[&str] = &["items", "list"];

/// HTTP client for the backtest service.
///
/// Every response passes through the `{code, msg, data}` envelope check and
/// then the normalizers, so callers only ever see typed values.
#[derive(Clone)]
pub struct BacktestClient {
    http: reqwest::Client,
    base: String,
}

impl BacktestClient {
    pub fn new(base: &str, timeout: Duration) -> Result<Self, HubError> {
        let base = base.trim().trim_end_matches('/').to_string();
        Url::parse(&base)?;
        let http = reqwest::Client::builder()
            .user_agent("btdash-hub/0.1")
            .timeout(timeout)
            .build()?;
        Ok(Self { http, base })
    }

    pub fn base(&self) -> &str {
        &self.base
    }

    async fn get_json(&self, path: &str, query: &[(&str, String)]) -> Result<Value, HubError> {
        let url = format!("{}{path}", self.base);
        debug!(%url, "GET");
        let resp = self
            .http
            .get(&url)
            .query(query)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        normalize::unwrap_envelope(body)
    }

    async fn post_json(&self, path: &str, payload: &Value) -> Result<Value, HubError> {
        let url = format!("{}{path}", self.base);
        debug!(%url, "POST");
        let resp = self
            .http
            .post(&url)
            .json(payload)
            .send()
            .await?
            .error_for_status()?;
        let body: Value = resp.json().await?;
        normalize::unwrap_envelope(body)
    }

    /// Names of the strategies the backend can run.
    pub async fn strategies(&self) -> Result<Vec<String>, HubError> {
        let body = self.get_json("/strategies", &[]).await?;
        Ok(normalize::list_body(body, &["strategies", "Strategies"])
            .into_iter()
            .filter_map(|v| match v {
                Value::String(s) => Some(s),
                Value::Null => None,
                other => Some(other.to_string()),
            })
            .collect())
    }

    pub async fn codes(&self) -> Result<Vec<SymbolInfo>, HubError> {
        let body = self.get_json("/codes", &[]).await?;
        Ok(normalize::list_body(body, &["codes", "Codes"])
            .iter()
            .filter_map(normalize::symbol_info)
            .collect())
    }

    /// Single-symbol run.
    pub async fn backtest(&self, req: &BacktestRequest) -> Result<BacktestResult, HubError> {
        req.validate_single()?;
        let body = self.post_json("/backtest", &req.payload()).await?;
        Ok(normalize::backtest_result(&body))
    }

    /// Multi-symbol run, answered in one response instead of a stream.
    pub async fn backtest_all(&self, req: &BacktestRequest) -> Result<BatchResult, HubError> {
        req.validate_batch()?;
        let body = self.post_json("/backtest_all", &req.payload()).await?;
        Ok(normalize::batch_result(body))
    }

    pub async fn screener(
        &self,
        strategy: &str,
        lookback: Option<u32>,
    ) -> Result<Vec<ScreenerHit>, HubError> {
        if strategy.trim().is_empty() {
            return Err(HubError::BadRequest("strategy is required".into()));
        }
        let mut payload = json!({ "strategy": strategy.trim() });
        if let Some(n) = lookback {
            payload["lookback"] = json!(n);
        }
        let body = self.post_json("/screener", &payload).await?;
        Ok(normalize::list_body(body, &["items", "list"])
            .iter()
            .filter_map(normalize::screener_hit)
            .collect())
    }

    /// Moving-average parameter sweep; rows in the backend's order.
    pub async fn grid(&self, req: &GridRequest) -> Result<Vec<GridRow>, HubError> {
        req.validate()?;
        let body = self.post_json("/backtest/grid", &req.payload()).await?;
        Ok(normalize::list_body(body, &["items", "list"])
            .iter()
            .map(normalize::grid_row)
            .collect())
    }

    /// Exchange-style bars keyed by `code`; prices arrive ×1000.
    pub async fn klines(
        &self,
        code: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, HubError> {
        let query = range_query("code", code, start, end);
        let body = self.get_json("/klines", &query).await?;
        Ok(normalize::price_bars(
            normalize::list_body(body, BAR_LIST_KEYS),
            PriceScale::Milli,
        ))
    }

    /// Plain-priced bars keyed by `symbol`.
    pub async fn candles(
        &self,
        symbol: &str,
        start: Option<NaiveDate>,
        end: Option<NaiveDate>,
    ) -> Result<Vec<PriceBar>, HubError> {
        let query = range_query("symbol", symbol, start, end);
        let body = self.get_json("/candles", &query).await?;
        Ok(normalize::price_bars(
            normalize::list_body(body, BAR_LIST_KEYS),
            PriceScale::Unit,
        ))
    }

    /// WebSocket endpoint for a streamed multi-symbol run.
    pub fn stream_url(&self, req: &BacktestRequest) -> Result<Url, HubError> {
        req.validate_batch()?;
        let mut url = Url::parse(&self.base)?;
        let scheme = match url.scheme() {
            "https" | "wss" => "wss",
            _ => "ws",
        };
        url.set_scheme(scheme)
            .map_err(|()| HubError::BadRequest(format!("cannot stream from {}", self.base)))?;
        let path = format!("{}/backtest_all/ws", url.path().trim_end_matches('/'));
        url.set_path(&path);
        url.query_pairs_mut()
            .clear()
            .extend_pairs(req.params().iter().filter(|(k, _)| *k != "symbol"));
        Ok(url)
    }
}

fn range_query(
    key: &'static str,
    symbol: &str,
    start: Option<NaiveDate>,
    end: Option<NaiveDate>,
) -> Vec<(&'static str, String)> {
    let mut q = vec![(key, symbol.trim().to_string())];
    if let Some(d) = start {
        q.push(("start", d.format("%Y-%m-%d").to_string()));
    }
    if let Some(d) = end {
        q.push(("end", d.format("%Y-%m-%d").to_string()));
    }
    q
}
