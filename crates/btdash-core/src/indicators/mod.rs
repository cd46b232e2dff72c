//! Single-pass indicator series over a close-price sequence.
//!
//! Every function returns a series exactly as long as its input. Positions
//! where a window is not yet full hold [`UNDEFINED`] (NaN), never zero.

pub mod bollinger;
pub mod returns;
pub mod sma;

pub use bollinger::{bollinger_bands, BollingerBands};
pub use returns::percent_returns;
pub use sma::moving_average;

/// "Not yet computable" marker.
pub const UNDEFINED: f64 = f64::NAN;

/// Round half away from zero to `dp` decimal places.
pub fn round_dp(value: f64, dp: i32) -> f64 {
    let scale = 10f64.powi(dp);
    (value * scale).round() / scale
}

/// Fixed-capacity trailing window with running sum and sum of squares.
///
/// `push` adds the incoming value and subtracts the evicted one, so the
/// aggregates cost O(1) per bar regardless of window size.
#[derive(Debug, Clone)]
pub struct RollingWindow {
    buf: Vec<f64>,
    pos: usize,
    len: usize,
    sum: f64,
    sum_sq: f64,
}

impl RollingWindow {
    /// `capacity` must be non-zero.
    pub fn new(capacity: usize) -> Self {
        Self {
            buf: vec![0.0; capacity.max(1)],
            pos: 0,
            len: 0,
            sum: 0.0,
            sum_sq: 0.0,
        }
    }

    /// Push a value, returning the one that fell out of the window.
    pub fn push(&mut self, val: f64) -> Option<f64> {
        let cap = self.buf.len();
        let evicted = if self.len == cap {
            Some(self.buf[self.pos])
        } else {
            self.len += 1;
            None
        };
        self.buf[self.pos] = val;
        self.pos = (self.pos + 1) % cap;

        self.sum += val;
        self.sum_sq += val * val;
        if let Some(out) = evicted {
            self.sum -= out;
            self.sum_sq -= out * out;
        }
        evicted
    }

    pub fn full(&self) -> bool {
        self.len == self.buf.len()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn mean(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        self.sum / self.len as f64
    }

    /// Population variance (ddof=0), clamped at zero: `sum_sq/n - mean²` can
    /// go slightly negative through cancellation on flat windows.
    pub fn variance_pop(&self) -> f64 {
        if self.len == 0 {
            return 0.0;
        }
        let mean = self.mean();
        (self.sum_sq / self.len as f64 - mean * mean).max(0.0)
    }

    pub fn std_pop(&self) -> f64 {
        self.variance_pop().sqrt()
    }
}

/// True when a window of `n` can ever fill over `len` inputs.
pub(crate) fn window_fits(n: usize, len: usize) -> bool {
    n > 0 && n <= len
}
