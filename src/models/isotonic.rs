//! Isotonic regression via the pool-adjacent-violators algorithm

use super::{segment, Knot};

/// Fit a non-decreasing step mapping on raw pairs.
///
/// Pairs sharing an `x` are pooled first, so knots sit on the unique `x`
/// values with the fitted (pooled) `y`.
pub(super) fn fit(xs: &[f64], ys: &[f64]) -> Vec<Knot> {
    let mut points: Vec<(f64, f64)> = xs.iter().copied().zip(ys.iter().copied()).collect();
    points.sort_by(|a, b| a.0.total_cmp(&b.0));

    let mut unique_x: Vec<f64> = Vec::new();
    let mut means: Vec<f64> = Vec::new();
    let mut weights: Vec<f64> = Vec::new();

    for (x, y) in points {
        if unique_x.last() == Some(&x) {
            let last = means.len() - 1;
            let w = weights[last];
            means[last] = (means[last] * w + y) / (w + 1.0);
            weights[last] = w + 1.0;
        } else {
            unique_x.push(x);
            means.push(y);
            weights.push(1.0);
        }
    }

    let fitted = pava(&means, &weights);
    unique_x
        .into_iter()
        .zip(fitted)
        .map(|(x, y)| Knot::new(x, y))
        .collect()
}

/// Weighted least-squares non-decreasing fit of `values`
pub(crate) fn pava(values: &[f64], weights: &[f64]) -> Vec<f64> {
    // Each block: (weighted mean, total weight, number of values)
    let mut blocks: Vec<(f64, f64, usize)> = Vec::with_capacity(values.len());

    for (&value, &weight) in values.iter().zip(weights) {
        blocks.push((value, weight, 1));
        while blocks.len() >= 2 {
            let (mean_b, weight_b, len_b) = blocks[blocks.len() - 1];
            let (mean_a, weight_a, len_a) = blocks[blocks.len() - 2];
            if mean_a <= mean_b {
                break;
            }
            blocks.truncate(blocks.len() - 2);
            let total = weight_a + weight_b;
            blocks.push((
                (mean_a * weight_a + mean_b * weight_b) / total,
                total,
                len_a + len_b,
            ));
        }
    }

    blocks
        .into_iter()
        .flat_map(|(mean, _, len)| std::iter::repeat(mean).take(len))
        .collect()
}

/// Linear interpolation between the knots around `x`
pub(super) fn interpolate(knots: &[Knot], x: f64) -> f64 {
    let k = segment(knots, x);
    let (a, b) = (knots[k], knots[k + 1]);
    let t = (x - a.x) / (b.x - a.x);
    a.y + (b.y - a.y) * t
}
