use serde::Serialize;

use super::{round_dp, window_fits, RollingWindow, UNDEFINED};

/// Bollinger mid/upper/lower series, aligned with the input closes.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct BollingerBands {
    pub mid: Vec<f64>,
    pub upper: Vec<f64>,
    pub lower: Vec<f64>,
}

impl BollingerBands {
    pub fn len(&self) -> usize {
        self.mid.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mid.is_empty()
    }
}

/// Rolling mean ± `k` population standard deviations over `n` closes.
///
/// Sum and sum of squares slide with the window; variance is clamped at zero
/// before the square root. `mid` is identical to
/// [`moving_average`](super::moving_average).
pub fn bollinger_bands(closes: &[f64], n: usize, k: f64) -> BollingerBands {
    let len = closes.len();
    let mut bands = BollingerBands {
        mid: vec![UNDEFINED; len],
        upper: vec![UNDEFINED; len],
        lower: vec![UNDEFINED; len],
    };
    if !window_fits(n, len) {
        return bands;
    }

    let mut window = RollingWindow::new(n);
    for (i, &close) in closes.iter().enumerate() {
        window.push(close);
        if !window.full() {
            continue;
        }
        let mean = window.mean();
        let std = window.std_pop();
        bands.mid[i] = round_dp(mean, 4);
        bands.upper[i] = round_dp(mean + k * std, 4);
        bands.lower[i] = round_dp(mean - k * std, 4);
    }
    bands
}
