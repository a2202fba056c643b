//! Radius-cluster selection.
//!
//! Embryos on one plate are close in size; well rims, bubbles and debris are
//! not. When the detector returns more circles than wanted, keep the `n`
//! circles whose radii form the tightest group: sort by radius and slide a
//! window of width `n`, minimising `max(radius) - min(radius)`. Ties go to the
//! earliest (smallest-radius) window.

use super::hough::RawCircle;

/// Outcome of a cluster selection.
#[derive(Debug, Clone, PartialEq)]
pub struct ClusterSelection {
    /// Selected circles. Radius-sorted when a window was chosen, otherwise
    /// the input order.
    pub selected: Vec<RawCircle>,
    /// Number of input circles that were left out.
    pub discarded: usize,
    /// Radius spread of the selection (`max - min`), `0.0` when empty.
    pub spread: f64,
}

/// Select at most `n` circles with the most uniform radii.
pub fn select_by_radius_cluster(circles: &[RawCircle], n: usize) -> ClusterSelection {
    if circles.len() <= n {
        return ClusterSelection {
            selected: circles.to_vec(),
            discarded: 0,
            spread: radius_spread(circles),
        };
    }
    if n == 0 {
        return ClusterSelection {
            selected: Vec::new(),
            discarded: circles.len(),
            spread: 0.0,
        };
    }

    let mut sorted = circles.to_vec();
    // Stable sort keeps equal radii in detector order, so ties are reproducible.
    sorted.sort_by(|a, b| a.radius.total_cmp(&b.radius));

    let (best_start, best_spread) = tightest_window(&sorted, n);
    let selected: Vec<RawCircle> = sorted[best_start..best_start + n].to_vec();

    tracing::debug!(
        count = n,
        min_radius = selected[0].radius,
        max_radius = selected[n - 1].radius,
        spread = best_spread,
        discarded = circles.len() - n,
        "Radius cluster selected",
    );

    ClusterSelection {
        selected,
        discarded: circles.len() - n,
        spread: best_spread,
    }
}

/// Start index and spread of the tightest window of width `n` over a
/// radius-sorted slice. Requires `1 <= n <= sorted.len()`.
fn tightest_window(sorted: &[RawCircle], n: usize) -> (usize, f64) {
    let mut best_start = 0;
    let mut best_spread = f64::INFINITY;
    for start in 0..=sorted.len() - n {
        let spread = sorted[start + n - 1].radius - sorted[start].radius;
        // Strict comparison: the earliest window wins ties.
        if spread < best_spread {
            best_spread = spread;
            best_start = start;
        }
    }
    (best_start, best_spread)
}

fn radius_spread(circles: &[RawCircle]) -> f64 {
    let mut min = f64::INFINITY;
    let mut max = f64::NEG_INFINITY;
    for c in circles {
        min = min.min(c.radius);
        max = max.max(c.radius);
    }
    if circles.is_empty() {
        0.0
    } else {
        max - min
    }
}

#[cfg(test)]
mod tests {
    use rand::Rng;

    use super::*;

    fn circle(x: f64, radius: f64) -> RawCircle {
        RawCircle {
            x,
            y: 100.0,
            radius,
            votes: 50,
        }
    }

    fn radii(selection: &ClusterSelection) -> Vec<f64> {
        selection.selected.iter().map(|c| c.radius).collect()
    }

    #[test]
    fn returns_everything_when_under_target() {
        let circles = vec![circle(1.0, 30.0), circle(2.0, 10.0)];
        let selection = select_by_radius_cluster(&circles, 3);
        assert_eq!(selection.selected, circles);
        assert_eq!(selection.discarded, 0);
        assert!((selection.spread - 20.0).abs() < 1e-9);
    }

    #[test]
    fn discards_radius_outlier() {
        let circles = vec![
            circle(100.0, 18.0),
            circle(300.0, 20.0),
            circle(500.0, 95.0),
            circle(700.0, 22.0),
        ];
        let selection = select_by_radius_cluster(&circles, 3);
        assert_eq!(radii(&selection), vec![18.0, 20.0, 22.0]);
        assert_eq!(selection.discarded, 1);
        assert!((selection.spread - 4.0).abs() < 1e-9);
    }

    #[test]
    fn ties_resolve_to_smallest_radii() {
        // Windows [10, 12] and [20, 22] both have spread 2.
        let circles = vec![
            circle(1.0, 20.0),
            circle(2.0, 10.0),
            circle(3.0, 22.0),
            circle(4.0, 12.0),
        ];
        let selection = select_by_radius_cluster(&circles, 2);
        assert_eq!(radii(&selection), vec![10.0, 12.0]);
    }

    #[test]
    fn zero_target_discards_everything() {
        let circles = vec![circle(1.0, 20.0)];
        let selection = select_by_radius_cluster(&circles, 0);
        assert!(selection.selected.is_empty());
        assert_eq!(selection.discarded, 1);
    }

    #[test]
    fn selected_window_is_minimal_for_random_inputs() {
        let mut rng = rand::rng();
        for _ in 0..200 {
            let len = rng.random_range(1..30usize);
            let circles: Vec<RawCircle> = (0..len)
                .map(|i| circle(i as f64, rng.random_range(5.0..120.0f64).round()))
                .collect();
            let n = rng.random_range(1..=len);

            let selection = select_by_radius_cluster(&circles, n);
            assert_eq!(selection.selected.len(), n);
            assert_eq!(selection.discarded, len - n);

            let mut sorted: Vec<f64> = circles.iter().map(|c| c.radius).collect();
            sorted.sort_by(f64::total_cmp);
            let spreads: Vec<f64> = (0..=len - n).map(|s| sorted[s + n - 1] - sorted[s]).collect();
            let best = spreads.iter().cloned().fold(f64::INFINITY, f64::min);
            let first_best = spreads.iter().position(|&s| s == best).unwrap();

            if len > n {
                assert_eq!(radii(&selection), sorted[first_best..first_best + n].to_vec());
                assert!((selection.spread - best).abs() < 1e-9);
            }
        }
    }
}
