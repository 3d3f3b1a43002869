//! Statistical functions: mean, median, standard deviation and 2-D binned statistics.

use strum_macros::{Display, EnumIter};

/// Arithmetic mean. NaN for an empty slice.
#[inline]
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Calculate the median of f64 values in-place.
///
/// Mutates the input buffer (partial sort via quickselect).
#[inline]
pub fn median_mut(data: &mut [f64]) -> f64 {
    debug_assert!(!data.is_empty());

    let len = data.len();
    let mid = len / 2;

    if len & 1 == 1 {
        let (_, median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
        *median
    } else {
        let (left_part, right_median, _) = data.select_nth_unstable_by(mid, f64::total_cmp);
        let right = *right_median;
        let left = left_part.iter().copied().fold(f64::NEG_INFINITY, f64::max);
        (left + right) * 0.5
    }
}

/// Median of a slice. NaN for an empty slice.
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mut scratch = values.to_vec();
    median_mut(&mut scratch)
}

/// Population standard deviation (divides by N). NaN for an empty slice.
pub fn std_dev(values: &[f64]) -> f64 {
    if values.is_empty() {
        return f64::NAN;
    }
    let mu = mean(values);
    let var = values.iter().map(|v| (v - mu).powi(2)).sum::<f64>() / values.len() as f64;
    var.sqrt()
}

/// Reduction applied to the values falling into each bin.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
#[strum(serialize_all = "lowercase")]
pub enum Statistic {
    Mean,
    Median,
    Count,
    Std,
}

impl Statistic {
    fn apply(self, values: &[f64]) -> f64 {
        match self {
            Statistic::Mean => mean(values),
            Statistic::Median => median(values),
            Statistic::Count => values.len() as f64,
            Statistic::Std => std_dev(values),
        }
    }
}

/// Result of [`binned_statistic_2d`].
#[derive(Debug, Clone, PartialEq)]
pub struct BinnedStatistic2d {
    /// `values[ix][iy]`; empty bins are NaN except for counts, which are zero
    pub values: Vec<Vec<f64>>,
    /// Bin edges along x (`bins + 1` entries)
    pub x_edges: Vec<f64>,
    /// Bin edges along y (`bins + 1` entries)
    pub y_edges: Vec<f64>,
}

/// Bin `values` on an even `bins × bins` grid spanning the extent of `x` and `y`.
///
/// Points on the upper edge belong to the last bin.
pub fn binned_statistic_2d(
    x: &[f64],
    y: &[f64],
    values: &[f64],
    statistic: Statistic,
    bins: usize,
) -> BinnedStatistic2d {
    assert_eq!(x.len(), y.len());
    assert_eq!(x.len(), values.len());
    assert!(bins > 0);

    let x_edges = edges(x, bins);
    let y_edges = edges(y, bins);

    let mut buckets: Vec<Vec<Vec<f64>>> = vec![vec![Vec::new(); bins]; bins];
    for ((&px, &py), &v) in x.iter().zip(y).zip(values) {
        let ix = bin_index(px, &x_edges);
        let iy = bin_index(py, &y_edges);
        buckets[ix][iy].push(v);
    }

    let values = buckets
        .iter()
        .map(|column| {
            column
                .iter()
                .map(|bucket| match (statistic, bucket.is_empty()) {
                    (Statistic::Count, _) => bucket.len() as f64,
                    (_, true) => f64::NAN,
                    (s, false) => s.apply(bucket),
                })
                .collect()
        })
        .collect();

    BinnedStatistic2d {
        values,
        x_edges,
        y_edges,
    }
}

fn edges(data: &[f64], bins: usize) -> Vec<f64> {
    let (mut lo, mut hi) = data
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| {
            (lo.min(v), hi.max(v))
        });
    if data.is_empty() {
        (lo, hi) = (0.0, 1.0);
    }
    if lo == hi {
        lo -= 0.5;
        hi += 0.5;
    }
    let step = (hi - lo) / bins as f64;
    (0..=bins).map(|k| lo + k as f64 * step).collect()
}

fn bin_index(value: f64, edges: &[f64]) -> usize {
    let bins = edges.len() - 1;
    let lo = edges[0];
    let step = edges[1] - edges[0];
    (((value - lo) / step).floor().max(0.0) as usize).min(bins - 1)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mean_and_std() {
        let v = [2.0, 4.0, 4.0, 4.0, 5.0, 5.0, 7.0, 9.0];
        assert!((mean(&v) - 5.0).abs() < 1e-12);
        assert!((std_dev(&v) - 2.0).abs() < 1e-12);
    }

    #[test]
    fn test_empty_is_nan() {
        assert!(mean(&[]).is_nan());
        assert!(median(&[]).is_nan());
        assert!(std_dev(&[]).is_nan());
    }

    #[test]
    fn test_median_odd_even() {
        assert!((median(&[3.0, 1.0, 2.0]) - 2.0).abs() < 1e-12);
        assert!((median(&[4.0, 1.0, 3.0, 2.0]) - 2.5).abs() < 1e-12);
    }

    #[test]
    fn test_median_does_not_reorder_input() {
        let v = [5.0, 1.0, 3.0];
        let _ = median(&v);
        assert_eq!(v, [5.0, 1.0, 3.0]);
    }

    #[test]
    fn test_binned_counts_cover_all_points() {
        let x = [0.0, 1.0, 2.0, 3.0, 4.0, 5.0, 6.0, 7.0, 8.0, 9.0];
        let y = [0.0, 9.0, 1.0, 8.0, 2.0, 7.0, 3.0, 6.0, 4.0, 5.0];
        let v = [1.0; 10];

        let counts = binned_statistic_2d(&x, &y, &v, Statistic::Count, 3);
        let total: f64 = counts.values.iter().flatten().sum();
        assert!((total - 10.0).abs() < 1e-12);
        assert_eq!(counts.x_edges.len(), 4);
        assert!((counts.x_edges[3] - 9.0).abs() < 1e-12);
    }

    #[test]
    fn test_binned_upper_edge_in_last_bin() {
        let x = [0.0, 3.0];
        let y = [0.0, 3.0];
        let v = [10.0, 20.0];

        let means = binned_statistic_2d(&x, &y, &v, Statistic::Mean, 3);
        assert!((means.values[0][0] - 10.0).abs() < 1e-12);
        assert!((means.values[2][2] - 20.0).abs() < 1e-12);
        assert!(means.values[1][1].is_nan());
    }

    #[test]
    fn test_binned_median_and_std() {
        let x = [0.1, 0.2, 0.3, 2.9];
        let y = [0.1, 0.2, 0.3, 2.9];
        let v = [1.0, 2.0, 6.0, 0.0];

        let med = binned_statistic_2d(&x, &y, &v, Statistic::Median, 3);
        assert!((med.values[0][0] - 2.0).abs() < 1e-12);

        let std = binned_statistic_2d(&x, &y, &v, Statistic::Std, 3);
        assert!((std.values[0][0] - std_dev(&[1.0, 2.0, 6.0])).abs() < 1e-12);
        assert!(std.values[2][2].abs() < 1e-12);
    }
}
