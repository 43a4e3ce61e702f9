//! Binned-median knots and monotone cubic Hermite interpolation
//!
//! Knots are the per-bin medians of the training pairs over equal-width scan
//! bins. Knot heights are made non-decreasing with weighted PAVA, after which
//! the Fritsch-Carlson derivative rule keeps the interpolant monotone.

use super::{pava, segment, Knot};

/// Build knots from the medians of `num_bins` equal-width bins over `xs`.
///
/// Bins holding fewer than `min_points` pairs are dropped. The maximum `x`
/// belongs to the last bin.
pub(super) fn fit_knots(xs: &[f64], ys: &[f64], num_bins: usize, min_points: usize) -> Vec<Knot> {
    let num_bins = num_bins.max(1);
    let lo = xs.iter().copied().fold(f64::INFINITY, f64::min);
    let hi = xs.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let width = (hi - lo) / num_bins as f64;

    let mut buckets: Vec<(Vec<f64>, Vec<f64>)> = vec![(Vec::new(), Vec::new()); num_bins];
    for (&x, &y) in xs.iter().zip(ys) {
        let idx = if width > 0.0 {
            (((x - lo) / width).floor() as usize).min(num_bins - 1)
        } else {
            0
        };
        buckets[idx].0.push(x);
        buckets[idx].1.push(y);
    }

    let mut knot_x = Vec::new();
    let mut knot_y = Vec::new();
    let mut counts = Vec::new();
    for (bx, by) in buckets {
        if bx.is_empty() || bx.len() < min_points {
            continue;
        }
        let count = bx.len() as f64;
        let (Some(mx), Some(my)) = (median(bx), median(by)) else {
            continue;
        };
        // Medians of disjoint ascending bins ascend; guard against ties anyway
        if knot_x.last().is_some_and(|&last: &f64| mx <= last) {
            continue;
        }
        knot_x.push(mx);
        knot_y.push(my);
        counts.push(count);
    }

    let knot_y = pava(&knot_y, &counts);
    knot_x
        .into_iter()
        .zip(knot_y)
        .map(|(x, y)| Knot::new(x, y))
        .collect()
}

/// Evaluate the cubic Hermite interpolant at `x` inside the knot range
pub(super) fn interpolate(knots: &[Knot], x: f64) -> f64 {
    let k = segment(knots, x);
    let (a, b) = (knots[k], knots[k + 1]);
    let h = b.x - a.x;
    let t = (x - a.x) / h;
    let d0 = derivative(knots, k);
    let d1 = derivative(knots, k + 1);

    // Hermite basis regrouped so flat segments evaluate exactly flat
    a.y + t * t * (3.0 - 2.0 * t) * (b.y - a.y) + h * t * (1.0 - t) * ((1.0 - t) * d0 - t * d1)
}

fn slope(knots: &[Knot], k: usize) -> f64 {
    (knots[k + 1].y - knots[k].y) / (knots[k + 1].x - knots[k].x)
}

fn width(knots: &[Knot], k: usize) -> f64 {
    knots[k + 1].x - knots[k].x
}

/// Derivative at knot `k` (same rule as SciPy's `PchipInterpolator`)
fn derivative(knots: &[Knot], k: usize) -> f64 {
    let n = knots.len();
    if n == 2 {
        return slope(knots, 0);
    }
    if k == 0 {
        return edge_derivative(width(knots, 0), width(knots, 1), slope(knots, 0), slope(knots, 1));
    }
    if k == n - 1 {
        return edge_derivative(
            width(knots, n - 2),
            width(knots, n - 3),
            slope(knots, n - 2),
            slope(knots, n - 3),
        );
    }

    let (m_prev, m_next) = (slope(knots, k - 1), slope(knots, k));
    if m_prev == 0.0 || m_next == 0.0 || m_prev.signum() != m_next.signum() {
        return 0.0;
    }
    let (h_prev, h_next) = (width(knots, k - 1), width(knots, k));
    let w1 = 2.0 * h_next + h_prev;
    let w2 = h_next + 2.0 * h_prev;
    (w1 + w2) / (w1 / m_prev + w2 / m_next)
}

/// One-sided three-point estimate, limited to keep the end segment monotone
fn edge_derivative(h0: f64, h1: f64, m0: f64, m1: f64) -> f64 {
    let d = ((2.0 * h0 + h1) * m0 - h0 * m1) / (h0 + h1);
    if sign(d) != sign(m0) {
        0.0
    } else if sign(m0) != sign(m1) && d.abs() > 3.0 * m0.abs() {
        3.0 * m0
    } else {
        d
    }
}

fn sign(v: f64) -> i8 {
    if v > 0.0 {
        1
    } else if v < 0.0 {
        -1
    } else {
        0
    }
}

fn median(mut values: Vec<f64>) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    values.sort_by(f64::total_cmp);
    let mid = values.len() / 2;
    if values.len() % 2 == 0 {
        Some((values[mid - 1] + values[mid]) / 2.0)
    } else {
        Some(values[mid])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_median() {
        assert_eq!(median(vec![3.0, 1.0, 2.0]), Some(2.0));
        assert_eq!(median(vec![4.0, 1.0, 2.0, 3.0]), Some(2.5));
        assert_eq!(median(vec![]), None);
    }

    #[test]
    fn test_fit_knots_includes_maximum() {
        let xs = [0.0, 10.0];
        let ys = [1.0, 2.0];
        let knots = fit_knots(&xs, &ys, 2, 1);
        assert_eq!(knots, vec![Knot::new(0.0, 1.0), Knot::new(10.0, 2.0)]);
    }

    #[test]
    fn test_fit_knots_drops_sparse_bins() {
        let xs = [0.0, 1.0, 2.0, 9.0, 20.0, 21.0, 22.0];
        let ys = [10.0, 11.0, 12.0, 50.0, 30.0, 31.0, 32.0];
        let knots = fit_knots(&xs, &ys, 3, 2);

        assert_eq!(knots, vec![Knot::new(1.0, 11.0), Knot::new(21.0, 31.0)]);
    }

    #[test]
    fn test_fit_knots_enforces_monotone_heights() {
        let xs = [0.0, 10.0, 20.0];
        let ys = [10.0, 30.0, 20.0];
        let knots = fit_knots(&xs, &ys, 3, 1);

        assert_eq!(knots[0].y, 10.0);
        assert_eq!(knots[1].y, 25.0);
        assert_eq!(knots[2].y, 25.0);
    }

    #[test]
    fn test_interpolate_hits_knots_and_stays_flat() {
        let knots = vec![
            Knot::new(0.0, 0.0),
            Knot::new(1.0, 1.0),
            Knot::new(2.0, 1.0),
            Knot::new(3.0, 2.0),
        ];
        assert_eq!(interpolate(&knots, 1.0), 1.0);
        assert_eq!(interpolate(&knots, 1.5), 1.0);
        assert!((interpolate(&knots, 2.0) - 1.0).abs() < 1e-12);

        let mut prev = 0.0;
        for i in 1..300 {
            let y = interpolate(&knots, i as f64 / 100.0);
            assert!(y >= prev - 1e-12);
            prev = y;
        }
    }

    #[test]
    fn test_two_knots_is_linear() {
        let knots = vec![Knot::new(60.0, 65.0), Knot::new(80.0, 85.0)];
        assert!((interpolate(&knots, 70.0) - 75.0).abs() < 1e-12);
    }
}
