use std::future::Future;

use btdash_core::candle::ChartData;

use crate::client::BacktestClient;
use crate::error::HubError;
use crate::request::BacktestRequest;

/// Where per-symbol chart data comes from.
pub trait ChartSource: Send + Sync + 'static {
    fn fetch(&self, symbol: &str) -> impl Future<Output = Result<ChartData, HubError>> + Send;
}

/// Bars from `/klines` plus trade markers from a single-symbol backtest.
pub struct RemoteChartSource {
    client: BacktestClient,
    request: BacktestRequest,
}

impl RemoteChartSource {
    /// `request` supplies the strategy and parameters; the symbol is filled
    /// in per fetch.
    pub fn new(client: BacktestClient, request: BacktestRequest) -> Self {
        Self { client, request }
    }
}

impl ChartSource for RemoteChartSource {
    async fn fetch(&self, symbol: &str) -> Result<ChartData, HubError> {
        let req = self.request.for_symbol(symbol);
        let (candles, result) = tokio::try_join!(
            self.client.klines(symbol, req.start, req.end),
            self.client.backtest(&req),
        )?;
        if candles.is_empty() {
            return Err(HubError::Upstream(format!("no bars for {symbol}")));
        }
        Ok(ChartData {
            candles,
            trades: result.trades,
        })
    }
}
