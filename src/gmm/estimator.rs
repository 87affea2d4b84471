//! Two-step linear IV-GMM with cluster-robust weighting.

use std::collections::BTreeMap;

use log::{info, warn};
use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};
use statrs::distribution::{ChiSquared, ContinuousCDF, Normal};

use super::sample::build_sample;
use super::{ArellanoBondConfig, DynamicPanelData, EquationKind, GmmError};

/// Condition number bound below which the score covariance is inverted
/// exactly
const WEIGHT_RCOND: f64 = 1e-12;

/// Raw output of [`iv_gmm`]
#[derive(Debug, Clone)]
pub struct GmmFit {
    pub coefficients: DVector<f64>,
    pub covariance: DMatrix<f64>,
    pub hansen_j: f64,
    pub hansen_df: usize,
    pub n_obs: usize,
    pub n_clusters: usize,
    /// The clustered weight matrix had to be pseudo-inverted
    pub weight_fallback: bool,
}

impl GmmFit {
    pub fn std_errors(&self) -> DVector<f64> {
        self.covariance
            .diagonal()
            .map(|v| if v >= 0.0 { v.sqrt() } else { f64::NAN })
    }
}

/// Sum over clusters of the outer products of the per-cluster scores
/// `Z_g' e_g`
fn clustered_scores(z: &DMatrix<f64>, residuals: &DVector<f64>, clusters: &[usize], n_clusters: usize) -> DMatrix<f64> {
    let m = z.ncols();
    let mut scores = vec![DVector::<f64>::zeros(m); n_clusters];
    for (r, &g) in clusters.iter().enumerate() {
        let e = residuals[r];
        for c in 0..m {
            scores[g][c] += z[(r, c)] * e;
        }
    }

    let mut meat = DMatrix::<f64>::zeros(m, m);
    for s in &scores {
        meat += s * s.transpose();
    }
    meat
}

/// Invert a symmetric weighting matrix, falling back to the pseudo-inverse
/// when it is rank-deficient or badly conditioned
fn invert_weight(matrix: &DMatrix<f64>, what: &'static str, force_pinv: bool) -> Result<(DMatrix<f64>, bool), GmmError> {
    let singular_values = matrix.clone().svd(false, false).singular_values;
    let max = singular_values.max();
    let min = singular_values.min();

    if !force_pinv && max > 0.0 && min / max > WEIGHT_RCOND {
        if let Some(inverse) = matrix.clone().try_inverse() {
            return Ok((inverse, false));
        }
    }

    warn!("{} is singular or ill-conditioned; using the pseudo-inverse", what);
    let inverse = matrix
        .clone()
        .pseudo_inverse(max * WEIGHT_RCOND)
        .map_err(|_| GmmError::Singular(what))?;
    Ok((inverse, true))
}

/// One GMM step for weight `w`: `β = (Q'WQ)⁻¹ Q'W Z'y` with `Q = Z'X`
fn gmm_step(q: &DMatrix<f64>, zy: &DVector<f64>, w: &DMatrix<f64>) -> Result<(DVector<f64>, DMatrix<f64>), GmmError> {
    let qw = q.transpose() * w;
    let bread = (&qw * q)
        .try_inverse()
        .ok_or(GmmError::Singular("GMM normal matrix"))?;
    let beta = &bread * (qw * zy);
    Ok((beta, bread))
}

/// Two-step efficient GMM of `y` on `x` with instruments `z`.
///
/// The first step weights by `(Z'Z)⁻¹`; the second by the inverse of the
/// cluster-summed score covariance of the first-step residuals. The
/// reported covariance is the cluster-robust sandwich around the second
/// step with the small-sample factor `G/(G-1)·(N-1)/(N-K)`.
pub fn iv_gmm(y: &DVector<f64>, x: &DMatrix<f64>, z: &DMatrix<f64>, clusters: &[usize]) -> Result<GmmFit, GmmError> {
    let n = x.nrows();
    let p = x.ncols();
    let m = z.ncols();

    if y.len() != n || z.nrows() != n || clusters.len() != n {
        return Err(GmmError::Validation(format!(
            "row counts differ: y {}, x {}, z {}, clusters {}",
            y.len(),
            n,
            z.nrows(),
            clusters.len()
        )));
    }
    if p == 0 {
        return Err(GmmError::Validation("no regressors".to_string()));
    }
    if m < p {
        return Err(GmmError::Validation(format!(
            "under-identified: {m} instruments for {p} parameters"
        )));
    }
    if n <= p {
        return Err(GmmError::InsufficientData { rows: n, parameters: p });
    }

    let n_clusters = clusters.iter().max().map_or(0, |&c| c + 1);
    let populated = {
        let mut seen = vec![false; n_clusters];
        for &g in clusters {
            seen[g] = true;
        }
        seen.iter().filter(|&&s| s).count()
    };
    if populated < 2 {
        return Err(GmmError::Validation(format!("{populated} cluster(s); at least two are required")));
    }

    let zt = z.transpose();
    let q = &zt * x;
    let zy = &zt * y;

    let (w1, first_fallback) = invert_weight(&(&zt * z), "instrument cross-product", false)?;
    let (beta1, _) = gmm_step(&q, &zy, &w1)?;
    let e1 = y - x * &beta1;

    let s1 = clustered_scores(z, &e1, clusters, n_clusters);
    let (w2, second_fallback) = invert_weight(&s1, "clustered score covariance", populated < m)?;
    let (beta2, bread) = gmm_step(&q, &zy, &w2)?;
    let e2 = y - x * &beta2;

    let s2 = clustered_scores(z, &e2, clusters, n_clusters);
    let qw = q.transpose() * &w2;
    let correction = (populated as f64 / (populated as f64 - 1.0)) * ((n as f64 - 1.0) / (n - p) as f64);
    let covariance = &bread * (&qw * s2 * qw.transpose()) * &bread * correction;

    let moments = &zt * &e2;
    let hansen_j = (moments.transpose() * &w2 * &moments)[(0, 0)];

    Ok(GmmFit {
        coefficients: beta2,
        covariance,
        hansen_j,
        hansen_df: m - p,
        n_obs: n,
        n_clusters: populated,
        weight_fallback: first_fallback || second_fallback,
    })
}

/// Two-sided standard normal p-value of a z statistic
fn normal_p_value(z: f64) -> f64 {
    match Normal::new(0.0, 1.0) {
        Ok(normal) if !z.is_nan() => 2.0 * normal.sf(z.abs()),
        _ => f64::NAN,
    }
}

/// Upper tail of the chi-squared distribution; NaN without degrees of
/// freedom
fn hansen_p_value(j: f64, df: usize) -> f64 {
    if df == 0 || j.is_nan() {
        return f64::NAN;
    }
    ChiSquared::new(df as f64).map_or(f64::NAN, |chi2| chi2.sf(j.max(0.0)))
}

/// Named estimation results
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GmmResult {
    pub dependent: String,
    pub config: ArellanoBondConfig,
    pub names: Vec<String>,
    pub coefficients: Vec<f64>,
    pub std_errors: Vec<f64>,
    pub z_stats: Vec<f64>,
    /// Two-sided normal p-values of `z_stats`
    pub p_values: Vec<f64>,
    pub n_obs: usize,
    pub rows_by_equation: BTreeMap<EquationKind, usize>,
    pub n_clusters: usize,
    pub n_instruments: usize,
    pub instrument_names: Vec<String>,
    pub hansen_j: f64,
    pub hansen_df: usize,
    pub hansen_p_value: f64,
    pub weight_fallback: bool,
    /// Units without a single complete row
    pub dropped_units: Vec<String>,
}

impl GmmResult {
    pub fn coefficient(&self, name: &str) -> Option<f64> {
        self.names
            .iter()
            .position(|n| n == name)
            .map(|i| self.coefficients[i])
    }

    pub fn std_error(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.std_errors[i])
    }

    pub fn p_value(&self, name: &str) -> Option<f64> {
        self.names.iter().position(|n| n == name).map(|i| self.p_values[i])
    }
}

/// Arellano-Bond (or System GMM when `config.system`) estimate of the
/// dynamic panel model in `data`
pub fn arellano_bond(data: &DynamicPanelData, config: &ArellanoBondConfig) -> Result<GmmResult, GmmError> {
    info!(
        "Estimating {} for {} ({} lag(s), {} observations)",
        if config.system { "System GMM" } else { "Arellano-Bond" },
        data.dependent(),
        config.lags,
        data.len()
    );

    let sample = build_sample(data, config)?;
    info!(
        "Sample: {} rows, {} clusters, {} instruments for {} parameters",
        sample.n_obs(),
        sample.n_clusters(),
        sample.n_instruments(),
        sample.n_params()
    );

    let fit = iv_gmm(&sample.y, &sample.x, &sample.z, &sample.clusters)?;
    if fit.weight_fallback {
        warn!("Estimates use a pseudo-inverted weight matrix; standard errors may be unreliable");
    }

    let std_errors = fit.std_errors();
    let z_stats: Vec<f64> = fit
        .coefficients
        .iter()
        .zip(std_errors.iter())
        .map(|(b, se)| b / se)
        .collect();
    let p_values = z_stats.iter().map(|&z| normal_p_value(z)).collect();

    let mut rows_by_equation = BTreeMap::new();
    rows_by_equation.insert(EquationKind::Differenced, sample.count(EquationKind::Differenced));
    if config.system {
        rows_by_equation.insert(EquationKind::Level, sample.count(EquationKind::Level));
    }

    Ok(GmmResult {
        dependent: data.dependent().to_string(),
        config: config.clone(),
        names: sample.names.clone(),
        coefficients: fit.coefficients.iter().copied().collect(),
        std_errors: std_errors.iter().copied().collect(),
        z_stats,
        p_values,
        n_obs: fit.n_obs,
        rows_by_equation,
        n_clusters: fit.n_clusters,
        n_instruments: sample.n_instruments(),
        instrument_names: sample.instrument_names,
        hansen_j: fit.hansen_j,
        hansen_df: fit.hansen_df,
        hansen_p_value: hansen_p_value(fit.hansen_j, fit.hansen_df),
        weight_fallback: fit.weight_fallback,
        dropped_units: sample.dropped_units,
    })
}
