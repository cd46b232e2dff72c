use std::sync::Arc;

use anyhow::{Context, Result};
use btdash_core::chart::{compose, compose_equity, tooltip, ChartInput, ChartOptions};
use btdash_core::report::rank_by_return;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use btdash_hub::client::BacktestClient;
use btdash_hub::config::HubConfig;
use btdash_hub::loader::cache::ChartCache;
use btdash_hub::loader::source::RemoteChartSource;
use btdash_hub::loader::BoundedChartLoader;
use btdash_hub::stream::{transport, RunState, StreamAggregator};

/// Used when the catalog endpoint is unreachable or empty.
const FALLBACK_STRATEGIES: &[&str] = &["sma_cross", "rsi"];

/// How many ranked symbols to print.
const TOP_N: usize = 5;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cfg = HubConfig::from_env();
    info!(api_base = %cfg.api_base, "btdash hub starting");

    let client = BacktestClient::new(&cfg.api_base, cfg.http_timeout())
        .context("build backtest client")?;

    let strategies = match client.strategies().await {
        Ok(list) if !list.is_empty() => list,
        Ok(_) => fallback_strategies(),
        Err(e) => {
            warn!("strategy catalog unavailable: {e}");
            fallback_strategies()
        }
    };
    info!(?strategies, "strategy catalog");

    let strategy = if cfg.strategy.is_empty() {
        strategies.first().cloned().unwrap_or_default()
    } else {
        cfg.strategy.clone()
    };
    let req = match cfg.request_for(&strategy).and_then(|req| {
        req.validate_batch()?;
        Ok(req)
    }) {
        Ok(req) => req,
        Err(e) => {
            error!("{}", e.user_message());
            return Err(e.into());
        }
    };

    // ── Streamed multi-symbol run ──────────────────────────────────
    let url = client.stream_url(&req)?;
    let mut agg = StreamAggregator::new(cfg.stream_open_timeout(), cfg.stream_idle_timeout());
    let mut progress = agg.subscribe();
    let run_id = agg.start(transport::connect(url)).await;
    info!(%run_id, %strategy, "streaming backtest");

    let interrupted = tokio::select! {
        _ = watch_progress(&mut progress) => false,
        _ = tokio::signal::ctrl_c() => true,
    };
    if interrupted {
        info!("interrupted, closing stream");
        agg.cancel().await;
    }

    let done = agg.wait_terminal().await;
    if done.state == RunState::Failed {
        let err = agg.error();
        let msg = err
            .as_ref()
            .map(|e| e.user_message())
            .unwrap_or_else(|| "backtest stream failed".to_string());
        error!("{msg}");
        return match err {
            Some(e) => Err(e.into()),
            None => Err(anyhow::anyhow!(msg)),
        };
    }

    let (items, snapshot) = agg.view();
    info!(
        state = ?done.state,
        count = snapshot.count,
        avg_return = snapshot.average_return,
        avg_max_drawdown = snapshot.average_max_drawdown,
        avg_sharpe = snapshot.average_sharpe,
        skipped = agg.skipped(),
        "aggregate"
    );
    if let Some(backend) = agg.backend_summary() {
        info!(
            avg_return = backend.avg_return,
            avg_max_drawdown = backend.avg_max_drawdown,
            avg_sharpe = backend.avg_sharpe,
            "backend summary"
        );
    }
    if items.is_empty() {
        info!("no results to chart");
        return Ok(());
    }

    let ranked = rank_by_return(&items);
    for (rank, item) in ranked.iter().take(TOP_N).enumerate() {
        info!(
            rank = rank + 1,
            code = %item.code,
            name = %item.name,
            ret = item.ret,
            max_drawdown = item.max_drawdown,
            sharpe = item.sharpe,
            "top result"
        );
    }

    // ── Chart backfill for the first page ──────────────────────────
    let codes: Vec<String> = ranked.iter().map(|i| i.code.clone()).collect();
    let cache = Arc::new(ChartCache::new());
    let loader = BoundedChartLoader::new(
        RemoteChartSource::new(client.clone(), req.clone()),
        Arc::clone(&cache),
        cfg.chart_batch_size,
    )
    .with_page_size(cfg.page_size);
    loader.load_initial(&codes).await;

    let top = &ranked[0];
    if let Some(chart) = cache.get(&top.code) {
        let opts = ChartOptions {
            show_volume: true,
            show_bollinger: true,
            window_count: Some(cfg.page_size),
            ..ChartOptions::default()
        };
        let bars = &chart.data.candles;
        let bundle = compose(
            ChartInput {
                bars,
                trades: &chart.data.trades,
                equity: None,
            },
            &opts,
        );
        info!(
            code = %top.code,
            provenance = ?chart.provenance,
            bars = bundle.labels.len(),
            buys = bundle.buy_markers.len(),
            sells = bundle.sell_markers.len(),
            visible = ?bundle.visible_range,
            "top chart"
        );
        if let Some(rows) = tooltip(bars, bars.len().saturating_sub(1)) {
            for row in rows {
                debug!(label = row.label, value = %row.value, "last bar");
            }
        }
    }

    match client.backtest(&req.for_symbol(&top.code)).await {
        Ok(result) => {
            let equity = compose_equity(&result.curve, &result.trades);
            info!(
                code = %top.code,
                points = equity.equity.len(),
                markers = equity.buy_markers.len() + equity.sell_markers.len(),
                ret = result.ret,
                "equity curve"
            );
        }
        Err(e) => warn!(code = %top.code, "single-symbol backtest failed: {}", e.user_message()),
    }

    Ok(())
}

fn fallback_strategies() -> Vec<String> {
    FALLBACK_STRATEGIES.iter().map(|s| s.to_string()).collect()
}

/// Log progress until the run leaves the connecting/streaming states.
async fn watch_progress(rx: &mut tokio::sync::watch::Receiver<btdash_hub::stream::RunProgress>) {
    loop {
        let progress = rx.borrow_and_update().clone();
        if !progress.state.is_active() {
            return;
        }
        debug!(state = ?progress.state, count = progress.count, "progress");
        if rx.changed().await.is_err() {
            return;
        }
    }
}
