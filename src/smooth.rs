//! Smoothing kernels applied to daily time series before publication.

/// Maps an out-of-range index back into `0..len` by reflecting about the
/// array edges (`d c b a | a b c d | d c b a`), bouncing as many times as
/// needed for short inputs.
fn reflect_index(index: isize, len: usize) -> usize {
    let period = 2 * len as isize;
    let folded = index.rem_euclid(period);
    if folded < len as isize {
        folded as usize
    } else {
        (period - 1 - folded) as usize
    }
}

/// One-dimensional Gaussian smoothing with a window truncated at four
/// standard deviations. `sigma <= 0` returns the input unchanged.
pub fn gaussian_smooth(values: &[f64], sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || values.is_empty() {
        return values.to_vec();
    }
    let radius = (4.0 * sigma + 0.5) as usize;
    let mut weights = Vec::with_capacity(2 * radius + 1);
    for offset in -(radius as isize)..=(radius as isize) {
        let x = offset as f64;
        weights.push((-x * x / (2.0 * sigma * sigma)).exp());
    }
    let total: f64 = weights.iter().sum();
    for weight in &mut weights {
        *weight /= total;
    }

    let len = values.len();
    let mut smoothed = Vec::with_capacity(len);
    for center in 0..len {
        let mut acc = 0.0;
        for (tap, weight) in weights.iter().enumerate() {
            let index = center as isize + tap as isize - radius as isize;
            acc += weight * values[reflect_index(index, len)];
        }
        smoothed.push(acc);
    }
    smoothed
}

/// Replaces missing observations with zero, the convention for gap days in
/// upstream feeds.
pub fn fill_missing(values: &[Option<f64>]) -> Vec<f64> {
    values.iter().map(|value| value.unwrap_or(0.0)).collect()
}

/// Converts a cumulative series into daily increments. The first day and any
/// day adjacent to a gap have no defined increment and become zero.
pub fn daily_from_cumulative(values: &[Option<f64>]) -> Vec<f64> {
    let mut daily = Vec::with_capacity(values.len());
    for (position, value) in values.iter().enumerate() {
        let increment = if position == 0 {
            None
        } else {
            match (values[position - 1], value) {
                (Some(previous), Some(current)) => Some(current - previous),
                _ => None,
            }
        };
        daily.push(increment.unwrap_or(0.0));
    }
    daily
}

/// Trailing mean over `window` observations. Positions without a full window
/// yet are reported as zero.
pub fn trailing_mean(values: &[f64], window: usize) -> Vec<f64> {
    if window <= 1 {
        return values.to_vec();
    }
    let mut means = Vec::with_capacity(values.len());
    let mut running = 0.0;
    for (position, value) in values.iter().enumerate() {
        running += value;
        if position >= window {
            running -= values[position - window];
        }
        if position + 1 >= window {
            means.push(running / window as f64);
        } else {
            means.push(0.0);
        }
    }
    means
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn gaussian_zero_sigma_is_identity() {
        let values = vec![1.0, 4.0, 2.0, 8.0];
        assert_eq!(gaussian_smooth(&values, 0.0), values);
    }

    #[test]
    fn gaussian_preserves_constant_series() {
        let values = vec![3.5; 20];
        for smoothed in gaussian_smooth(&values, 7.0) {
            assert!((smoothed - 3.5).abs() < 1e-9);
        }
    }

    #[test]
    fn gaussian_keeps_zeros_at_zero() {
        let values = vec![0.0; 40];
        assert_eq!(gaussian_smooth(&values, 5.0), values);
    }

    #[test]
    fn gaussian_spike_spreads_symmetrically_and_keeps_mass() {
        // sigma 1 gives radius 4; a centered spike in 11 samples keeps the
        // whole window in bounds, so the weights must sum back to one.
        let mut values = vec![0.0; 11];
        values[5] = 1.0;
        let smoothed = gaussian_smooth(&values, 1.0);
        let total: f64 = smoothed.iter().sum();
        assert!((total - 1.0).abs() < 1e-9);
        for offset in 1..=5 {
            assert!((smoothed[5 - offset] - smoothed[5 + offset]).abs() < 1e-12);
        }
        assert!(smoothed[5] > smoothed[4]);
    }

    #[test]
    fn gaussian_single_sample_is_unchanged() {
        let smoothed = gaussian_smooth(&[42.0], 7.0);
        assert!((smoothed[0] - 42.0).abs() < 1e-9);
    }

    #[test]
    fn gaussian_is_deterministic() {
        let values: Vec<f64> = (0..30).map(|n| (n as f64).sin() * 10.0).collect();
        assert_eq!(gaussian_smooth(&values, 7.0), gaussian_smooth(&values, 7.0));
    }

    #[test]
    fn reflect_index_bounces_repeatedly() {
        // len 3 reflects as c b a | a b c | c b a | a b c ...
        assert_eq!(reflect_index(-1, 3), 0);
        assert_eq!(reflect_index(-3, 3), 2);
        assert_eq!(reflect_index(3, 3), 2);
        assert_eq!(reflect_index(4, 3), 1);
        assert_eq!(reflect_index(7, 3), 1);
    }

    #[test]
    fn daily_from_cumulative_diffs_and_zeroes_gaps() {
        let values = vec![Some(10.0), Some(15.0), Some(15.0), Some(22.0)];
        assert_eq!(daily_from_cumulative(&values), vec![0.0, 5.0, 0.0, 7.0]);

        let gappy = vec![Some(10.0), None, Some(18.0)];
        assert_eq!(daily_from_cumulative(&gappy), vec![0.0, 0.0, 0.0]);
    }

    #[test]
    fn fill_missing_zeroes_gaps() {
        let values = vec![Some(1.0), None, Some(3.0)];
        assert_eq!(fill_missing(&values), vec![1.0, 0.0, 3.0]);
    }

    #[test]
    fn trailing_mean_warms_up_with_zeros() {
        let values = vec![1.0, 2.0, 3.0, 4.0];
        assert_eq!(trailing_mean(&values, 2), vec![0.0, 1.5, 2.5, 3.5]);
        assert_eq!(trailing_mean(&values, 3), vec![0.0, 0.0, 2.0, 3.0]);
    }

    #[test]
    fn trailing_mean_window_of_one_is_identity() {
        let values = vec![5.0, 6.0];
        assert_eq!(trailing_mean(&values, 1), values);
    }
}
