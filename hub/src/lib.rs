//! Client side of the backtest dashboard: talks to the backtest service,
//! aggregates streamed multi-symbol runs and backfills chart data.

pub mod client;
pub mod config;
pub mod error;
pub mod loader;
pub mod normalize;
pub mod request;
pub mod stream;
