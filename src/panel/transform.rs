//! Column transforms: within-country lags and changes, and the Yeo-Johnson
//! power transform.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};

use super::{Panel, PanelError};

/// Values of `column` shifted by `periods` years within each country.
///
/// Lags follow calendar years, not row positions: a country observed in
/// 2005 and 2007 has no lag for 2007.
pub fn lagged(panel: &Panel, column: &str, periods: i64) -> Result<Vec<f64>, PanelError> {
    let values = panel.require(column)?;
    let index: HashMap<(&str, i64), f64> = panel
        .keys()
        .iter()
        .zip(values)
        .map(|(k, &v)| ((k.country.as_str(), k.year), v))
        .collect();

    Ok(panel
        .keys()
        .iter()
        .map(|k| {
            index
                .get(&(k.country.as_str(), k.year - periods))
                .copied()
                .unwrap_or(f64::NAN)
        })
        .collect())
}

/// Insert `name` holding `column` lagged by `periods` years
pub fn add_lag(panel: &mut Panel, column: &str, periods: i64, name: &str) -> Result<(), PanelError> {
    let values = lagged(panel, column, periods)?;
    panel.insert_column(name, values)
}

/// Insert `lag_{c}`, `delta_{c}` and `per_change_{c}` for column `c`
pub fn add_changes(panel: &mut Panel, column: &str) -> Result<(), PanelError> {
    let lag = lagged(panel, column, 1)?;
    let current = panel.require(column)?;
    let delta: Vec<f64> = current.iter().zip(&lag).map(|(c, l)| c - l).collect();
    let per_change: Vec<f64> = delta.iter().zip(&lag).map(|(d, l)| d / l).collect();

    panel.insert_column(format!("lag_{column}"), lag)?;
    panel.insert_column(format!("delta_{column}"), delta)?;
    panel.insert_column(format!("per_change_{column}"), per_change)?;
    Ok(())
}

/// Yeo-Johnson transform of a single value
pub fn yeo_johnson(x: f64, lambda: f64) -> f64 {
    if x >= 0.0 {
        if lambda.abs() < f64::EPSILON {
            x.ln_1p()
        } else {
            ((x + 1.0).powf(lambda) - 1.0) / lambda
        }
    } else if (lambda - 2.0).abs() < f64::EPSILON {
        -(-x).ln_1p()
    } else {
        -((1.0 - x).powf(2.0 - lambda) - 1.0) / (2.0 - lambda)
    }
}

fn mean_and_variance(values: &[f64]) -> (f64, f64) {
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var)
}

/// Profile log-likelihood of `lambda` under a normal model
fn log_likelihood(values: &[f64], lambda: f64) -> f64 {
    let n = values.len() as f64;
    let transformed: Vec<f64> = values.iter().map(|&x| yeo_johnson(x, lambda)).collect();
    let (_, var) = mean_and_variance(&transformed);
    let jacobian: f64 = values.iter().map(|x| x.signum() * x.abs().ln_1p()).sum();
    -0.5 * n * var.ln() + (lambda - 1.0) * jacobian
}

const LAMBDA_BOUNDS: (f64, f64) = (-5.0, 5.0);

/// Maximum-likelihood lambda by golden-section search. Degenerate inputs
/// (fewer than two distinct values) get the identity transform.
pub fn fit_lambda(values: &[f64]) -> f64 {
    let first = values.first().copied().unwrap_or_default();
    if values.len() < 2 || values.iter().all(|&v| v == first) {
        return 1.0;
    }

    let ratio = (5.0_f64.sqrt() - 1.0) / 2.0;
    let (mut lo, mut hi) = LAMBDA_BOUNDS;
    let mut c = hi - ratio * (hi - lo);
    let mut d = lo + ratio * (hi - lo);
    let mut fc = log_likelihood(values, c);
    let mut fd = log_likelihood(values, d);

    while hi - lo > 1e-9 {
        if fc > fd {
            hi = d;
            d = c;
            fd = fc;
            c = hi - ratio * (hi - lo);
            fc = log_likelihood(values, c);
        } else {
            lo = c;
            c = d;
            fc = fd;
            d = lo + ratio * (hi - lo);
            fd = log_likelihood(values, d);
        }
    }
    (lo + hi) / 2.0
}

/// Fitted parameters of one column
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ColumnTransform {
    pub lambda: f64,
    pub mean: f64,
    pub std: f64,
}

/// Per-column Yeo-Johnson transform followed by standardisation.
/// Missing values are ignored by the fit and stay missing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PowerTransform {
    columns: BTreeMap<String, ColumnTransform>,
}

impl PowerTransform {
    pub fn fit(panel: &Panel, columns: &[String]) -> Result<Self, PanelError> {
        let mut fitted = BTreeMap::new();
        for name in columns {
            let observed: Vec<f64> = panel.require(name)?.iter().copied().filter(|v| v.is_finite()).collect();
            if observed.is_empty() {
                log::warn!("Column {} has no observed values; leaving it untransformed", name);
                continue;
            }
            let lambda = fit_lambda(&observed);
            let transformed: Vec<f64> = observed.iter().map(|&x| yeo_johnson(x, lambda)).collect();
            let (mean, var) = mean_and_variance(&transformed);
            let std = if var > 0.0 { var.sqrt() } else { 1.0 };
            log::debug!("Yeo-Johnson {}: lambda {:.4}", name, lambda);
            fitted.insert(name.clone(), ColumnTransform { lambda, mean, std });
        }
        Ok(Self { columns: fitted })
    }

    pub fn get(&self, column: &str) -> Option<&ColumnTransform> {
        self.columns.get(column)
    }

    pub fn transform(&self, panel: &mut Panel) -> Result<(), PanelError> {
        for (name, params) in &self.columns {
            let values = panel
                .require(name)?
                .iter()
                .map(|&x| {
                    if x.is_finite() {
                        (yeo_johnson(x, params.lambda) - params.mean) / params.std
                    } else {
                        x
                    }
                })
                .collect();
            panel.insert_column(name.clone(), values)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::panel::PanelKey;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    fn series(rows: &[(&str, i64, f64)]) -> Panel {
        let keys = rows.iter().map(|&(c, y, _)| PanelKey::new(c, y)).collect();
        let mut panel = Panel::new(keys).unwrap();
        panel.insert_column("x", rows.iter().map(|r| r.2).collect()).unwrap();
        panel
    }

    #[test]
    fn test_changes_stay_within_country() {
        let mut panel = series(&[("DEU", 2005, 1.0), ("DEU", 2006, 3.0), ("FRA", 2005, 10.0), ("FRA", 2006, 5.0)]);
        add_changes(&mut panel, "x").unwrap();

        let lag = panel.column("lag_x").unwrap();
        assert!(lag[0].is_nan());
        assert_eq!(lag[1], 1.0);
        assert!(lag[2].is_nan());
        assert_eq!(panel.column("delta_x").unwrap()[3], -5.0);
        assert_eq!(panel.column("per_change_x").unwrap()[1], 2.0);
        assert!(panel.column("per_change_x").unwrap()[2].is_nan());
    }

    #[test]
    fn test_lags_follow_calendar_years() {
        let mut panel = series(&[("FRA", 2005, 1.0), ("FRA", 2007, 2.0), ("FRA", 2008, 4.0)]);
        add_lag(&mut panel, "x", 2, "lag2_x").unwrap();
        let lag2 = panel.column("lag2_x").unwrap();
        assert!(lag2[0].is_nan());
        assert_eq!(lag2[1], 1.0);
        assert!(lag2[2].is_nan());
    }

    #[test]
    fn test_yeo_johnson_branches() {
        assert_relative_eq!(yeo_johnson(3.0, 1.0), 3.0);
        assert_relative_eq!(yeo_johnson(-3.0, 1.0), -3.0);
        assert_relative_eq!(yeo_johnson(1.0, 0.0), 2.0_f64.ln());
        assert_relative_eq!(yeo_johnson(-1.0, 2.0), -(2.0_f64.ln()));
        assert_relative_eq!(yeo_johnson(3.0, 0.5), (2.0 - 1.0) / 0.5);
    }

    #[test]
    fn test_right_skewed_data_gets_compressed() {
        let values: Vec<f64> = (0..30).map(|i| (0.3 * i as f64).exp()).collect();
        let lambda = fit_lambda(&values);
        assert!(lambda < 1.0, "lambda {lambda}");
        let best = log_likelihood(&values, lambda);
        assert!(best >= log_likelihood(&values, lambda - 0.1));
        assert!(best >= log_likelihood(&values, lambda + 0.1));
    }

    #[test]
    fn test_power_transform_standardises_and_keeps_missing() {
        let mut panel = series(&[
            ("A", 2005, 0.1),
            ("A", 2006, 0.5),
            ("B", 2005, f64::NAN),
            ("B", 2006, 4.0),
            ("C", 2005, 20.0),
        ]);
        let pt = PowerTransform::fit(&panel, &["x".to_string()]).unwrap();
        pt.transform(&mut panel).unwrap();

        let x = panel.column("x").unwrap();
        assert!(x[2].is_nan());
        let observed: Vec<f64> = x.iter().copied().filter(|v| v.is_finite()).collect();
        let (mean, var) = mean_and_variance(&observed);
        assert_relative_eq!(mean, 0.0, epsilon = 1e-9);
        assert_relative_eq!(var, 1.0, epsilon = 1e-9);
    }

    #[test]
    fn test_constant_column_is_identity_lambda() {
        assert_eq!(fit_lambda(&[2.0, 2.0, 2.0]), 1.0);
    }

    fn gappy_panel() -> impl Strategy<Value = Panel> {
        proptest::collection::btree_map((0usize..3, 2000i64..2010), -100.0f64..100.0, 1..25).prop_map(|cells| {
            let keys = cells.keys().map(|&(c, y)| PanelKey::new(["AUS", "BRA", "CHL"][c], y)).collect();
            let mut panel = Panel::new(keys).unwrap();
            panel.insert_column("x", cells.values().copied().collect()).unwrap();
            panel
        })
    }

    proptest! {
        #[test]
        fn prop_delta_and_per_change_identities(mut panel in gappy_panel()) {
            add_changes(&mut panel, "x").unwrap();
            let x = panel.column("x").unwrap();
            let lag = panel.column("lag_x").unwrap();
            let delta = panel.column("delta_x").unwrap();
            let per_change = panel.column("per_change_x").unwrap();

            for (i, key) in panel.keys().iter().enumerate() {
                let has_previous = panel
                    .keys()
                    .iter()
                    .any(|k| k.country == key.country && k.year == key.year - 1);
                if has_previous {
                    prop_assert_eq!(delta[i], x[i] - lag[i]);
                    if lag[i] != 0.0 {
                        prop_assert_eq!(per_change[i], delta[i] / lag[i]);
                    }
                } else {
                    prop_assert!(lag[i].is_nan() && delta[i].is_nan() && per_change[i].is_nan());
                }
            }
        }
    }
}
