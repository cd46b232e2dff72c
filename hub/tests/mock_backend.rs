//! End-to-end checks against an in-process stand-in for the backtest service.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Query, State};
use axum::response::IntoResponse;
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};

use btdash_core::candle::TradeSide;
use btdash_core::chart::{compose, ChartInput, ChartOptions};
use btdash_hub::client::BacktestClient;
use btdash_hub::error::HubError;
use btdash_hub::loader::cache::{ChartCache, Provenance};
use btdash_hub::loader::source::RemoteChartSource;
use btdash_hub::loader::BoundedChartLoader;
use btdash_hub::request::{BacktestRequest, GridRequest};
use btdash_hub::stream::{transport, RunState, StreamAggregator};

const DAY_S: i64 = 86_400;
const T0_S: i64 = 1_709_251_200; // 2024-03-01

#[derive(Default)]
struct Backend {
    ws_query: Mutex<Option<HashMap<String, String>>>,
}

async fn spawn_backend() -> (String, Arc<Backend>) {
    let state = Arc::new(Backend::default());
    let app = Router::new()
        .route(
            "/api/strategies",
            get(|| async {
                Json(json!({"code": 200, "msg": "ok", "data": {"Strategies": ["sma_cross", "macd"]}}))
            }),
        )
        .route(
            "/api/codes",
            get(|| async {
                Json(json!({"code": 200, "data": ["600000", {"Code": "000001", "Name": "平安银行"}]}))
            }),
        )
        .route("/api/backtest", post(backtest))
        .route("/api/backtest_all", post(backtest_all))
        .route("/api/backtest/grid", post(grid))
        .route("/api/screener", post(screener))
        .route("/api/klines", get(klines))
        .route("/api/candles", get(candles))
        .route("/api/backtest_all/ws", get(stream))
        .with_state(Arc::clone(&state));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });
    (format!("http://{addr}/api"), state)
}

async fn backtest(Json(body): Json<Value>) -> Json<Value> {
    let symbol = body["symbol"].as_str().unwrap_or_default();
    if symbol == "FAIL" {
        return Json(json!({"code": 500, "msg": "no data for FAIL", "data": null}));
    }
    Json(json!({
        "code": 200,
        "data": {
            "equity": [100000, 101000, 99000, 102000, 103000],
            "cash": [100000, 0, 0, 102000, 102000],
            "trades": [
                {"index": 1, "side": "buy", "price": 10.1, "qty": 100},
                {"idx": 3, "side": "SELL", "px": 10.3},
                {"index": 99, "side": "sell", "price": 11.0}
            ],
            "total_return": 0.03,
            "maxDD": 0.02,
            "Sharpe": 1.4,
            "fee_rate_seen": body["fee_rate"].clone()
        }
    }))
}

async fn backtest_all() -> Json<Value> {
    Json(json!({
        "code": 200,
        "data": {
            "avg_return": 0.2,
            "avg_max_drawdown": 0.1,
            "avg_sharpe": 1.0,
            "items": [
                {"code": "A", "name": "Alpha", "return": 0.1, "max_drawdown": 0.1, "sharpe": 1.0},
                {"code": "B", "name": "Beta", "return": 0.3, "max_drawdown": 0.1, "sharpe": 1.0}
            ]
        }
    }))
}

async fn grid(Json(body): Json<Value>) -> Json<Value> {
    let top_k = body["top_k"].as_u64().unwrap_or(0) as usize;
    let rows: Vec<Value> = [
        json!({"fast_period": 5, "slow_period": 20, "total_return": 0.21, "Sharpe": 1.6, "maxDD": 0.07}),
        json!({"fast": 3.0, "slow": "30", "ret": 0.15, "sharpe": 1.1, "drawdown": 0.09}),
        json!({"fast": 8, "slow": 45, "return": -0.02, "sharpe": -0.1, "max_drawdown": 0.2}),
    ]
    .into_iter()
    .take(top_k)
    .collect();
    Json(json!({"code": 200, "data": {"items": rows, "symbol": body["symbol"].clone()}}))
}

async fn screener(Json(body): Json<Value>) -> Json<Value> {
    let lookback = body["lookback"].as_u64().unwrap_or(0);
    Json(json!({
        "code": 200,
        "data": {"list": [
            {"ticker": "AAA", "value": lookback, "last": "12.5", "sig": 1},
            {"symbol": "BBB", "score": 0.2, "price": 8.0, "signal": 0}
        ]}
    }))
}

async fn klines(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    let code = q.get("code").cloned().unwrap_or_default();
    let bars: Vec<Value> = (0..5)
        .map(|i| {
            json!({
                "Time": T0_S + i * DAY_S,
                "OpenPrice": 10_000 + i * 100,
                "HighPrice": 10_200 + i * 100,
                "LowPrice": 9_900 + i * 100,
                "ClosePrice": 10_000 + i * 100,
                "TradeVolume": 1_000 * (i + 1),
                "Turnover": 12_345_000,
                "code": code,
            })
        })
        .collect();
    Json(json!({"code": 200, "data": bars}))
}

async fn candles(Query(q): Query<HashMap<String, String>>) -> Json<Value> {
    let start = q.get("start").cloned().unwrap_or_else(|| "2024-03-01".into());
    Json(json!({
        "code": 200,
        "data": {"items": [
            {"date": start, "open": 5.0, "high": 5.5, "low": 4.9, "close": 5.2, "volume": 300},
            {"date": "2024-03-04", "open": 5.2, "high": 5.3, "low": 5.0, "close": 5.1, "volume": 200},
            {"date": "2024-03-05T00:00:00Z", "open": 5.1, "high": 5.4, "low": 5.1, "close": 5.3, "volume": 250}
        ]}
    }))
}

async fn stream(
    ws: WebSocketUpgrade,
    Query(q): Query<HashMap<String, String>>,
    State(state): State<Arc<Backend>>,
) -> impl IntoResponse {
    if let Ok(mut slot) = state.ws_query.lock() {
        *slot = Some(q);
    }
    ws.on_upgrade(send_run)
}

async fn send_run(mut socket: WebSocket) {
    let events = [
        json!({"type": "item", "item": {"code": "A", "name": "Alpha", "return": 0.1, "max_drawdown": 0.1, "sharpe": 1.0}}).to_string(),
        "not json at all".to_string(),
        json!({"type": "item", "item": {"code": "FAIL", "name": "Broken", "return": 0.5, "max_drawdown": 0.3, "sharpe": 0.2}}).to_string(),
        json!({"type": "item", "item": {"code": "B", "name": "Beta", "return": 0.3, "max_drawdown": 0.1, "sharpe": 1.0}}).to_string(),
        json!({"type": "summary", "avg_return": 0.3, "avg_max_drawdown": 0.1666, "avg_sharpe": 0.7333}).to_string(),
    ];
    for ev in events {
        if socket.send(Message::Text(ev.into())).await.is_err() {
            return;
        }
    }
    while let Some(Ok(msg)) = socket.recv().await {
        if matches!(msg, Message::Close(_)) {
            break;
        }
    }
}

fn client(base: &str) -> BacktestClient {
    BacktestClient::new(base, Duration::from_secs(5)).unwrap()
}

fn request() -> BacktestRequest {
    BacktestRequest {
        strategy: "sma_cross".into(),
        cash: Some(100_000.0),
        size: Some(10),
        fee_rate_bp: Some(5.0),
        ..Default::default()
    }
}

#[tokio::test]
async fn catalogs_and_price_feeds_are_normalized() {
    let (base, _) = spawn_backend().await;
    let client = client(&base);

    assert_eq!(client.strategies().await.unwrap(), vec!["sma_cross", "macd"]);

    let codes = client.codes().await.unwrap();
    assert_eq!(codes.len(), 2);
    assert_eq!(codes[0].name, "600000");
    assert_eq!(codes[1].name, "平安银行");

    let hits = client.screener("sma_cross", Some(10)).await.unwrap();
    assert_eq!(hits.len(), 2);
    assert_eq!(hits[0].symbol, "AAA");
    assert_eq!(hits[0].score, 10.0);
    assert_eq!(hits[0].price, 12.5);
    assert_eq!(hits[0].signal, 1);

    let bars = client.klines("600000", None, None).await.unwrap();
    assert_eq!(bars.len(), 5);
    assert_eq!(bars[0].time, T0_S * 1000);
    assert_eq!(bars[1].close, 10.1);
    assert_eq!(bars[0].amount, Some(12_345.0));

    let start = chrono::NaiveDate::from_ymd_opt(2024, 3, 1);
    let bars = client.candles("600000", start, None).await.unwrap();
    assert_eq!(bars.len(), 3);
    assert_eq!(bars[0].close, 5.2);
    assert!(bars.windows(2).all(|w| w[0].time < w[1].time));
}

#[tokio::test]
async fn single_and_batch_backtests() {
    let (base, _) = spawn_backend().await;
    let client = client(&base);

    let res = client.backtest(&request().for_symbol("600000")).await.unwrap();
    assert_eq!(res.curve.equity.len(), 5);
    assert_eq!(res.trades.len(), 3);
    assert_eq!(res.trades[1].side, TradeSide::Sell);
    assert_eq!(res.ret, 0.03);
    assert_eq!(res.max_drawdown, 0.02);
    assert_eq!(res.sharpe, 1.4);

    let err = client.backtest(&request().for_symbol("FAIL")).await.unwrap_err();
    assert_eq!(err, HubError::Upstream("no data for FAIL".into()));
    assert_eq!(err.user_message(), "no data for FAIL");

    let err = client.backtest(&request()).await.unwrap_err();
    assert!(matches!(err, HubError::BadRequest(_)));

    let batch = client.backtest_all(&request()).await.unwrap();
    assert_eq!(batch.items.len(), 2);
    assert_eq!(batch.summary.count, Some(2));
    assert_eq!(batch.summary.avg_return, 0.2);
}

#[tokio::test]
async fn grid_sweep_rows_are_normalized() {
    let (base, _) = spawn_backend().await;
    let client = client(&base);

    let req = GridRequest {
        top_k: 2,
        ..GridRequest::new("sz000001")
    };
    let rows = client.grid(&req).await.unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!((rows[0].fast, rows[0].slow), (5, 20));
    assert_eq!(rows[0].ret, 0.21);
    assert_eq!(rows[0].max_drawdown, 0.07);
    assert_eq!((rows[1].fast, rows[1].slow), (3, 30));
    assert_eq!(rows[1].sharpe, 1.1);

    let bad = GridRequest {
        slow_min: 60,
        ..GridRequest::new("sz000001")
    };
    assert!(matches!(client.grid(&bad).await, Err(HubError::BadRequest(_))));
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let client = client(&format!("http://{addr}/api"));
    let err = client.strategies().await.unwrap_err();
    assert!(matches!(err, HubError::Transport(_)), "{err:?}");
    assert_eq!(
        err.user_message(),
        "Could not connect to the backtest service. Please retry."
    );
}

#[tokio::test]
async fn streamed_run_then_chart_backfill() {
    let (base, backend) = spawn_backend().await;
    let client = client(&base);
    let req = request();

    let mut agg = StreamAggregator::new(Duration::from_secs(5), Duration::from_secs(5));
    agg.start(transport::connect(client.stream_url(&req).unwrap()))
        .await;
    let done = agg.wait_terminal().await;

    assert_eq!(done.state, RunState::Completed);
    let (items, snapshot) = agg.view();
    let codes: Vec<&str> = items.iter().map(|i| i.code.as_str()).collect();
    assert_eq!(codes, vec!["A", "FAIL", "B"]);
    assert_eq!(snapshot.count, 3);
    assert!((snapshot.average_return - 0.3).abs() < 1e-12);
    assert_eq!(agg.skipped(), 1);
    assert!(agg.backend_summary().is_some());

    let query = backend.ws_query.lock().unwrap().clone().unwrap();
    assert_eq!(query.get("strategy").map(String::as_str), Some("sma_cross"));
    assert_eq!(query.get("fee_rate").map(String::as_str), Some("0.0005"));
    assert_eq!(query.get("size").map(String::as_str), Some("10"));

    let cache = Arc::new(ChartCache::new());
    let loader = BoundedChartLoader::new(
        RemoteChartSource::new(client.clone(), req.clone()),
        Arc::clone(&cache),
        2,
    );
    let symbols: Vec<String> = items.iter().map(|i| i.code.clone()).collect();
    let report = loader.load_initial(&symbols).await;
    assert_eq!(report.fetched, 3);
    assert_eq!(report.synthetic, 1);
    assert_eq!(cache.get("FAIL").unwrap().provenance, Provenance::Synthetic);

    let chart = cache.get("a").unwrap();
    assert_eq!(chart.provenance, Provenance::Remote);
    let bundle = compose(
        ChartInput {
            bars: &chart.data.candles,
            trades: &chart.data.trades,
            equity: None,
        },
        &ChartOptions::default(),
    );
    // the index-99 sell lies past the 5 bars and is dropped
    assert_eq!(bundle.buy_markers.len(), 1);
    assert_eq!(bundle.sell_markers.len(), 1);
    assert_eq!(bundle.sell_markers[0].index, 3);
}
