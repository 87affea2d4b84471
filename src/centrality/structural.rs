//! Custom structural centralities on dense adjacency matrices.
//!
//! All functions take the engine's adjacency matrix `g` where `g[(i, j)]` is
//! the weight of `i -> j` and return one value per node in matrix order.
//!
//! Bridging centrality costs O(n³·T) per node. It is meant for networks of
//! tens of countries or country-industries, not for large sparse graphs.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::CentralityError;

/// Which missing links make two common predecessors "unconnected"
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GfiSupport {
    /// Neither `j -> k` nor `k -> j` reaches the tolerance
    #[default]
    Mutual,
    /// Only `j -> k` is checked
    Forward,
    /// Only `k -> j` is checked
    Backward,
}

impl GfiSupport {
    fn unconnected(self, g: &DMatrix<f64>, j: usize, k: usize, tol: f64) -> bool {
        match self {
            GfiSupport::Mutual => g[(j, k)] < tol && g[(k, j)] < tol,
            GfiSupport::Forward => g[(j, k)] < tol,
            GfiSupport::Backward => g[(k, j)] < tol,
        }
    }
}

/// How the two-hop weights are summed into a favor score
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FavorMode {
    /// Full row sum of `g²`
    #[default]
    Unmasked,
    /// Row sum of `g²` over entries where both the direct and the two-hop
    /// weight exceed the tolerance
    Masked,
}

fn ensure_non_empty(g: &DMatrix<f64>) -> Result<usize, CentralityError> {
    match g.nrows() {
        0 => Err(CentralityError::EmptyGraph),
        n => Ok(n),
    }
}

/// Godfather index.
///
/// For node `i`, sums `g[j,i]·g[k,i]` over unordered pairs `j > k` of
/// predecessors of `i` that are not linked to each other (per `support`).
pub fn godfather_index(g: &DMatrix<f64>, tol: f64, support: GfiSupport) -> Result<Vec<f64>, CentralityError> {
    let n = ensure_non_empty(g)?;

    let scores = (0..n)
        .map(|i| {
            let backers = g.column(i);
            let mut total = 0.0;
            for j in 0..n {
                let wj = backers[j];
                if wj == 0.0 {
                    continue;
                }
                for k in 0..j {
                    let wk = backers[k];
                    if wk != 0.0 && support.unconnected(g, j, k, tol) {
                        total += wj * wk;
                    }
                }
            }
            total
        })
        .collect();

    Ok(scores)
}

/// Total weight of all walks of length 1..=horizon: Σₜ 1ᵀ mᵗ 1
fn walk_total(m: &DMatrix<f64>, horizon: usize) -> f64 {
    let mut v = DVector::from_element(m.nrows(), 1.0);
    let mut total = 0.0;
    for _ in 0..horizon {
        v = m * v;
        total += v.sum();
    }
    total
}

/// Bridging centrality.
///
/// For every edge `i -> j`, the drop in total walk weight (lengths 1 to
/// `horizon`, matrix scaled by `p`) when that single edge is removed; node
/// `i` scores the sum over its outgoing edges. Absent edges contribute 0.
pub fn bridging_centrality(g: &DMatrix<f64>, p: f64, horizon: usize) -> Result<Vec<f64>, CentralityError> {
    let n = ensure_non_empty(g)?;

    let scaled = g * p;
    let baseline = walk_total(&scaled, horizon);
    let mut scores = vec![0.0; n];
    let mut without_edge = scaled.clone();

    for (i, score) in scores.iter_mut().enumerate() {
        for j in 0..n {
            let w = scaled[(i, j)];
            if w == 0.0 {
                continue;
            }
            without_edge[(i, j)] = 0.0;
            *score += baseline - walk_total(&without_edge, horizon);
            without_edge[(i, j)] = w;
        }
    }

    Ok(scores)
}

/// Favor centrality: row sums of the two-hop matrix `g²`.
///
/// Pass `gᵀ` to obtain the incoming variant.
pub fn favor_centrality(g: &DMatrix<f64>, tol: f64, mode: FavorMode) -> Result<Vec<f64>, CentralityError> {
    ensure_non_empty(g)?;
    let g2 = g * g;

    let scores = match mode {
        FavorMode::Unmasked => g2.row_iter().map(|row| row.sum()).collect(),
        FavorMode::Masked => g2
            .row_iter()
            .zip(g.row_iter())
            .map(|(two_hop, direct)| {
                two_hop
                    .iter()
                    .zip(direct.iter())
                    .filter(|&(&w2, &w1)| w2 > tol && w1 > tol)
                    .map(|(&w2, _)| w2)
                    .sum()
            })
            .collect(),
    };

    Ok(scores)
}

/// Herfindahl–Hirschman index of each node's outgoing weights.
///
/// Nodes without outgoing weight have no distribution and get NaN.
pub fn hhi_index(g: &DMatrix<f64>) -> Result<Vec<f64>, CentralityError> {
    ensure_non_empty(g)?;

    let scores = g
        .row_iter()
        .map(|row| {
            let total = row.sum();
            if total == 0.0 {
                return f64::NAN;
            }
            row.iter().map(|w| (w / total).powi(2)).sum()
        })
        .collect();

    Ok(scores)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn matrix(n: usize, values: &[f64]) -> DMatrix<f64> {
        DMatrix::from_row_slice(n, n, values)
    }

    #[test]
    fn test_diagonal_only_graph_has_no_structural_support() {
        let mut g = DMatrix::from_diagonal(&DVector::from_vec(vec![2.0, 3.0, 4.0]));
        // the engine zeroes the diagonal before these run
        g.fill_diagonal(0.0);
        assert_eq!(godfather_index(&g, 1e-10, GfiSupport::Mutual).unwrap(), vec![0.0; 3]);
        assert_eq!(bridging_centrality(&g, 1.0, 5).unwrap(), vec![0.0; 3]);
        assert_eq!(favor_centrality(&g, 0.0, FavorMode::Unmasked).unwrap(), vec![0.0; 3]);
        assert_eq!(favor_centrality(&g.transpose(), 0.0, FavorMode::Masked).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_godfather_counts_only_unconnected_backer_pairs() {
        // 0 and 1 both feed 2; 1 also feeds 0 in the second case
        let open = matrix(3, &[0.0, 0.0, 2.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0]);
        assert_eq!(godfather_index(&open, 1e-10, GfiSupport::Mutual).unwrap(), vec![0.0, 0.0, 6.0]);

        let linked = matrix(3, &[0.0, 0.0, 2.0, 1.0, 0.0, 3.0, 0.0, 0.0, 0.0]);
        assert_eq!(godfather_index(&linked, 1e-10, GfiSupport::Mutual).unwrap()[2], 0.0);
        // pair (j=1, k=0): forward checks g[1,0] = 1, backward checks g[0,1] = 0
        assert_eq!(godfather_index(&linked, 1e-10, GfiSupport::Forward).unwrap()[2], 0.0);
        assert_eq!(godfather_index(&linked, 1e-10, GfiSupport::Backward).unwrap()[2], 6.0);
    }

    #[test]
    fn test_bridging_single_edge() {
        // one edge 0 -> 1: only one walk of length 1 exists
        let g = matrix(2, &[0.0, 4.0, 0.0, 0.0]);
        let scores = bridging_centrality(&g, 0.5, 5).unwrap();
        assert_relative_eq!(scores[0], 2.0, epsilon = 1e-12);
        assert_eq!(scores[1], 0.0);
    }

    #[test]
    fn test_bridging_chain_counts_longer_walks() {
        // 0 -> 1 -> 2 with unit weights; removing 0->1 kills walks 0-1 and 0-1-2
        let g = matrix(3, &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        let scores = bridging_centrality(&g, 1.0, 5).unwrap();
        assert_relative_eq!(scores[0], 2.0, epsilon = 1e-12);
        assert_relative_eq!(scores[1], 2.0, epsilon = 1e-12);
        assert_relative_eq!(scores[2], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_favor_in_and_out() {
        let g = matrix(3, &[0.0, 2.0, 0.0, 0.0, 0.0, 3.0, 0.0, 0.0, 0.0]);
        let out = favor_centrality(&g, 0.0, FavorMode::Unmasked).unwrap();
        let inn = favor_centrality(&g.transpose(), 0.0, FavorMode::Unmasked).unwrap();
        assert_eq!(out, vec![6.0, 0.0, 0.0]);
        assert_eq!(inn, vec![0.0, 0.0, 6.0]);
        // no direct edge 0 -> 2 supports the two-hop path
        assert_eq!(favor_centrality(&g, 0.0, FavorMode::Masked).unwrap(), vec![0.0; 3]);
    }

    #[test]
    fn test_hhi_single_counterparty_and_spread() {
        let g = matrix(3, &[0.0, 5.0, 0.0, 1.0, 0.0, 1.0, 0.0, 0.0, 0.0]);
        let hhi = hhi_index(&g).unwrap();
        assert_relative_eq!(hhi[0], 1.0);
        assert_relative_eq!(hhi[1], 0.5);
        assert!(hhi[2].is_nan());
    }

    #[test]
    fn test_empty_matrix_is_rejected() {
        let g = DMatrix::<f64>::zeros(0, 0);
        assert_eq!(hhi_index(&g).unwrap_err(), CentralityError::EmptyGraph);
        assert_eq!(
            bridging_centrality(&g, 1.0, 5).unwrap_err(),
            CentralityError::EmptyGraph
        );
    }

    fn weighted_matrix() -> impl Strategy<Value = DMatrix<f64>> {
        (2usize..6).prop_flat_map(|n| {
            proptest::collection::vec(prop_oneof![Just(0.0), 0.0f64..10.0], n * n)
                .prop_map(move |values| DMatrix::from_row_slice(n, n, &values))
        })
    }

    proptest! {
        #[test]
        fn prop_masked_favor_never_exceeds_unmasked(g in weighted_matrix(), tol in 0.0f64..5.0) {
            let masked = favor_centrality(&g, tol, FavorMode::Masked).unwrap();
            let unmasked = favor_centrality(&g, tol, FavorMode::Unmasked).unwrap();
            for (m, u) in masked.iter().zip(&unmasked) {
                prop_assert!(*m <= *u + 1e-9);
            }
        }

        #[test]
        fn prop_hhi_is_scale_invariant(g in weighted_matrix(), scale in 0.01f64..100.0) {
            let base = hhi_index(&g).unwrap();
            let scaled = hhi_index(&(&g * scale)).unwrap();
            for (a, b) in base.iter().zip(&scaled) {
                if a.is_nan() {
                    prop_assert!(b.is_nan());
                } else {
                    prop_assert!((a - b).abs() < 1e-9);
                    prop_assert!(*a <= 1.0 + 1e-12);
                }
            }
        }
    }
}
