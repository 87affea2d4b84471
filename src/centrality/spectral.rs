//! Power-iteration centralities: weighted PageRank and HITS.
//!
//! Both iterate a bounded number of times and report
//! [`CentralityError::NotConverged`] instead of returning a partial result.

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

use super::CentralityError;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PageRankParams {
    /// Damping factor
    pub alpha: f64,
    pub max_iter: usize,
    /// Convergence threshold per node (total L1 change < n * tol)
    pub tol: f64,
}

impl Default for PageRankParams {
    fn default() -> Self {
        Self {
            alpha: 0.85,
            max_iter: 100,
            tol: 1.0e-6,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HitsParams {
    pub max_iter: usize,
    /// Convergence threshold on the L1 change of the hub vector
    pub tol: f64,
}

impl Default for HitsParams {
    fn default() -> Self {
        Self {
            max_iter: 100,
            tol: 1.0e-8,
        }
    }
}

/// Hub and authority scores, each normalised to sum to one
#[derive(Debug, Clone, PartialEq)]
pub struct HitsScores {
    pub hubs: Vec<f64>,
    pub authorities: Vec<f64>,
}

/// Weighted PageRank with uniform teleport and uniform redistribution of
/// dangling-node mass.
pub fn pagerank(g: &DMatrix<f64>, params: &PageRankParams) -> Result<Vec<f64>, CentralityError> {
    let n = g.nrows();
    if n == 0 {
        return Err(CentralityError::EmptyGraph);
    }
    if g.iter().any(|&w| w < 0.0) {
        return Err(CentralityError::NegativeWeight);
    }

    let out: Vec<f64> = g.row_iter().map(|row| row.sum()).collect();
    let mut transition = g.clone();
    for (i, &total) in out.iter().enumerate() {
        if total > 0.0 {
            let mut row = transition.row_mut(i);
            row /= total;
        }
    }
    let transition_t = transition.transpose();
    let dangling: Vec<usize> = (0..n).filter(|&i| out[i] <= 0.0).collect();

    let nf = n as f64;
    let uniform = 1.0 / nf;
    let mut x = DVector::from_element(n, uniform);

    for _ in 0..params.max_iter {
        let dangling_mass: f64 = dangling.iter().map(|&i| x[i]).sum();
        let mut next = &transition_t * &x;
        next.add_scalar_mut(dangling_mass * uniform);
        next *= params.alpha;
        next.add_scalar_mut((1.0 - params.alpha) * uniform);

        let err: f64 = (&next - &x).abs().sum();
        x = next;
        if err < nf * params.tol {
            return Ok(x.iter().copied().collect());
        }
    }

    Err(CentralityError::NotConverged {
        algorithm: "pagerank",
        iterations: params.max_iter,
    })
}

/// Weighted HITS hubs and authorities.
///
/// Authorities are `gᵀ h`, hubs are `g a`; both are max-normalised every
/// iteration and sum-normalised on return. A graph without edges has no
/// dominant direction and is reported as non-convergent.
pub fn hits(g: &DMatrix<f64>, params: &HitsParams) -> Result<HitsScores, CentralityError> {
    let n = g.nrows();
    if n == 0 {
        return Err(CentralityError::EmptyGraph);
    }
    let not_converged = CentralityError::NotConverged {
        algorithm: "hits",
        iterations: params.max_iter,
    };

    let g_t = g.transpose();
    let mut h = DVector::from_element(n, 1.0 / n as f64);

    for _ in 0..params.max_iter {
        let mut a = &g_t * &h;
        let mut next_h = g * &a;

        let h_max = next_h.max();
        let a_max = a.max();
        if !(h_max > 0.0 && a_max > 0.0) {
            return Err(not_converged);
        }
        next_h /= h_max;
        a /= a_max;

        let err: f64 = (&next_h - &h).abs().sum();
        h = next_h;
        if err < params.tol {
            let h_sum = h.sum();
            let a_sum = a.sum();
            return Ok(HitsScores {
                hubs: h.iter().map(|v| v / h_sum).collect(),
                authorities: a.iter().map(|v| v / a_sum).collect(),
            });
        }
    }

    Err(not_converged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_pagerank_symmetric_cycle_is_uniform() {
        let g = DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 0.0, 0.0, 0.0, 1.0, 1.0, 0.0, 0.0]);
        let pr = pagerank(&g, &PageRankParams::default()).unwrap();
        for v in pr {
            assert_relative_eq!(v, 1.0 / 3.0, epsilon = 1e-9);
        }
    }

    #[test]
    fn test_pagerank_dangling_mass_is_redistributed() {
        // A -> B, B dangling
        let g = DMatrix::from_row_slice(2, 2, &[0.0, 1.0, 0.0, 0.0]);
        let pr = pagerank(&g, &PageRankParams::default()).unwrap();
        assert_relative_eq!(pr.iter().sum::<f64>(), 1.0, epsilon = 1e-9);
        assert!(pr[1] > pr[0]);
    }

    #[test]
    fn test_pagerank_rejects_negative_weights() {
        let g = DMatrix::from_row_slice(2, 2, &[0.0, -1.0, 1.0, 0.0]);
        assert_eq!(
            pagerank(&g, &PageRankParams::default()).unwrap_err(),
            CentralityError::NegativeWeight
        );
    }

    #[test]
    fn test_hits_star_graph() {
        // Hub 0 points at 1 and 2
        let g = DMatrix::from_row_slice(3, 3, &[0.0, 1.0, 1.0, 0.0, 0.0, 0.0, 0.0, 0.0, 0.0]);
        let scores = hits(&g, &HitsParams::default()).unwrap();
        assert_relative_eq!(scores.hubs[0], 1.0, epsilon = 1e-9);
        assert_relative_eq!(scores.authorities[1], 0.5, epsilon = 1e-9);
        assert_relative_eq!(scores.authorities[2], 0.5, epsilon = 1e-9);
        assert_relative_eq!(scores.authorities[0], 0.0, epsilon = 1e-12);
    }

    #[test]
    fn test_hits_edgeless_graph_does_not_converge() {
        let g = DMatrix::zeros(3, 3);
        assert!(matches!(
            hits(&g, &HitsParams::default()),
            Err(CentralityError::NotConverged { algorithm: "hits", .. })
        ));
    }
}
