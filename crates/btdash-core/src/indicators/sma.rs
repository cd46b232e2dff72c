use super::{round_dp, window_fits, RollingWindow, UNDEFINED};

/// Simple moving average of `closes` over a trailing window of `n`, rounded
/// to 4 dp. The first `n - 1` positions are [`UNDEFINED`]; `n == 0` or
/// `n > closes.len()` leaves every position undefined.
pub fn moving_average(closes: &[f64], n: usize) -> Vec<f64> {
    let mut out = vec![UNDEFINED; closes.len()];
    if !window_fits(n, closes.len()) {
        return out;
    }

    let mut window = RollingWindow::new(n);
    for (i, &close) in closes.iter().enumerate() {
        window.push(close);
        if window.full() {
            out[i] = round_dp(window.mean(), 4);
        }
    }
    out
}
