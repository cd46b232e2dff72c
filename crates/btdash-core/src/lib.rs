pub mod candle;
pub mod chart;
pub mod indicators;
pub mod report;
pub mod synthetic;
