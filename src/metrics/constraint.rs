//! Burt structural constraint (brokerage)
//!
//! Measures how much a node's contacts are themselves interconnected:
//! `constraint(i) = Σ_j (p_ij + Σ_q p_iq · p_qj)²` over neighbors j and
//! shared contacts q, where `p_ij` is the tie strength from i to j
//! normalized by i's total tie strength. Densely interlocked neighbors
//! push the score up; disjoint neighbors keep it low, which is what
//! marks a broker. Zero-degree nodes have no defined constraint.

use super::AdjacencyView;

/// Raw constraint per node index; `None` for nodes without neighbors
pub(crate) fn constraint(view: &AdjacencyView) -> Vec<Option<f64>> {
    let n = view.node_count;
    let strengths: Vec<f64> = (0..n).map(|i| view.strength(i)).collect();

    (0..n)
        .map(|i| {
            if view.adjacency[i].is_empty() || strengths[i] <= 0.0 {
                return None;
            }

            let p = |from: usize, to: usize| -> f64 {
                if strengths[from] <= 0.0 {
                    return 0.0;
                }
                view.adjacency[from].get(&to).copied().unwrap_or(0.0) / strengths[from]
            };

            let mut total = 0.0;
            for &j in view.adjacency[i].keys() {
                let mut indirect = 0.0;
                for &q in view.adjacency[i].keys() {
                    if q != j {
                        indirect += p(i, q) * p(q, j);
                    }
                }
                let term = p(i, j) + indirect;
                total += term * term;
            }
            Some(total)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::super::tests::snapshot_of;
    use super::*;

    fn raw(n: usize, edges: &[(usize, usize, f64)]) -> Vec<Option<f64>> {
        constraint(&AdjacencyView::from_snapshot(&snapshot_of(n, edges)))
    }

    fn assert_close(got: Option<f64>, want: f64) {
        let got = got.expect("constraint defined");
        assert!((got - want).abs() < 1e-9, "got {}, want {}", got, want);
    }

    #[test]
    fn test_isolate_has_no_constraint() {
        let values = raw(2, &[]);
        assert_eq!(values, vec![None, None]);
    }

    #[test]
    fn test_dyad_is_fully_constrained() {
        // A single mutual contact means total dependence: c = 1
        let values = raw(2, &[(0, 1, 3.0)]);
        assert_close(values[0], 1.0);
        assert_close(values[1], 1.0);
    }

    #[test]
    fn test_star_center_is_least_constrained() {
        // Center splits attention over three unconnected leaves:
        // c_center = 3·(1/3)² = 1/3; each leaf is fully dependent.
        let values = raw(4, &[(0, 1, 1.0), (0, 2, 1.0), (0, 3, 1.0)]);
        assert_close(values[0], 1.0 / 3.0);
        assert_close(values[1], 1.0);
    }

    #[test]
    fn test_triangle_exceeds_star() {
        // In a closed triad each neighbor also reaches the other:
        // p = 1/2, c_i = 2·(1/2 + 1/4)² = 1.125, denser than the open
        // star center, so brokerage value is lower.
        let values = raw(3, &[(0, 1, 1.0), (1, 2, 1.0), (0, 2, 1.0)]);
        for value in values {
            assert_close(value, 1.125);
        }
    }

    #[test]
    fn test_weights_shift_constraint() {
        // Node 0 leans heavily on 1 (weight 9 vs 1): dependence on a
        // single contact dominates and raises constraint above the
        // balanced star value.
        let values = raw(3, &[(0, 1, 9.0), (0, 2, 1.0)]);
        let lopsided = values[0].unwrap();
        let balanced = raw(3, &[(0, 1, 1.0), (0, 2, 1.0)])[0].unwrap();
        assert!(lopsided > balanced);
    }
}
