use super::round_dp;

/// Percent return of each equity point against the first, rounded to 2 dp.
///
/// A zero (or missing) starting equity uses a base of 1 instead of dividing
/// by zero.
pub fn percent_returns(equity: &[f64]) -> Vec<f64> {
    let base = match equity.first() {
        Some(&first) if first != 0.0 => first,
        _ => 1.0,
    };
    equity
        .iter()
        .map(|&v| round_dp((v / base - 1.0) * 100.0, 2))
        .collect()
}
