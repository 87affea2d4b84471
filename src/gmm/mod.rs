//! Arellano-Bond / System GMM for dynamic panels.
//!
//! The model is
//!
//! ```text
//! y(i,t) = Σₖ ρₖ·y(i,t-k) + β·x(i,t) + u(i) + e(i,t)
//! ```
//!
//! First differencing removes `u(i)`; lagged levels of `y` then instrument
//! the lagged differences. System GMM adds the equations in levels,
//! instrumented by lagged differences.
//!
//! The pipeline is linear:
//! [`DynamicPanelData`] → [`instruments`] → [`sample::build_sample`] →
//! [`estimator::iv_gmm`].

pub mod estimator;
pub mod instruments;
pub mod sample;

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::panel::Panel;

pub use estimator::{arellano_bond, iv_gmm, GmmFit, GmmResult};
pub use instruments::{InstrumentColumn, InstrumentSet};
pub use sample::{build_sample, EstimationSample};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum GmmError {
    #[error("insufficient data: {rows} usable rows for {parameters} parameters")]
    InsufficientData { rows: usize, parameters: usize },

    #[error("invalid estimation input: {0}")]
    Validation(String),

    #[error("{0} is singular")]
    Singular(&'static str),
}

/// Equation a stacked estimation row belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EquationKind {
    Differenced,
    Level,
}

impl fmt::Display for EquationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EquationKind::Differenced => f.write_str("differenced"),
            EquationKind::Level => f.write_str("level"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArellanoBondConfig {
    /// Number of lags of the dependent variable
    pub lags: usize,
    /// Maximum number of instrument depths beyond `lags + 1`
    pub iv_max_lags: usize,
    /// Stack the level equations (System GMM)
    pub system: bool,
    pub add_intercept: bool,
}

impl Default for ArellanoBondConfig {
    fn default() -> Self {
        Self {
            lags: 1,
            iv_max_lags: 1000,
            system: false,
            add_intercept: false,
        }
    }
}

impl ArellanoBondConfig {
    pub fn validate(&self) -> Result<(), GmmError> {
        if self.lags == 0 {
            return Err(GmmError::Validation("lags must be at least 1".to_string()));
        }
        if self.iv_max_lags == 0 {
            return Err(GmmError::Validation("iv_max_lags must be at least 1".to_string()));
        }
        if self.lags > 1 {
            log::warn!("Instrument construction with lags = {} is covered by property tests only", self.lags);
        }
        Ok(())
    }
}

/// Dependent series and exogenous regressors on a (unit, period) index
#[derive(Debug, Clone)]
pub struct DynamicPanelData {
    units: Vec<String>,
    periods: Vec<i64>,
    dependent: String,
    y: Vec<f64>,
    regressor_names: Vec<String>,
    regressors: Vec<Vec<f64>>,
    index: HashMap<(String, i64), usize>,
}

impl DynamicPanelData {
    pub fn new(
        units: Vec<String>,
        periods: Vec<i64>,
        dependent: &str,
        y: Vec<f64>,
        regressors: Vec<(String, Vec<f64>)>,
    ) -> Result<Self, GmmError> {
        let n = y.len();
        if units.len() != n || periods.len() != n {
            return Err(GmmError::Validation(format!(
                "{} units and {} periods for {} observations",
                units.len(),
                periods.len(),
                n
            )));
        }
        if n == 0 {
            return Err(GmmError::InsufficientData { rows: 0, parameters: 1 });
        }

        let mut index = HashMap::with_capacity(n);
        for (row, (unit, &period)) in units.iter().zip(&periods).enumerate() {
            if index.insert((unit.clone(), period), row).is_some() {
                return Err(GmmError::Validation(format!("duplicate observation for {unit} in {period}")));
            }
        }

        let mut regressor_names = Vec::with_capacity(regressors.len());
        let mut columns = Vec::with_capacity(regressors.len());
        for (name, values) in regressors {
            if values.len() != n {
                return Err(GmmError::Validation(format!(
                    "regressor {name} has {} values for {n} observations",
                    values.len()
                )));
            }
            regressor_names.push(name);
            columns.push(values);
        }

        Ok(Self {
            units,
            periods,
            dependent: dependent.to_string(),
            y,
            regressor_names,
            regressors: columns,
            index,
        })
    }

    /// Take the dependent variable and regressors from panel columns
    pub fn from_panel(panel: &Panel, dependent: &str, regressors: &[String]) -> Result<Self, GmmError> {
        let column = |name: &str| {
            panel
                .column(name)
                .map(<[f64]>::to_vec)
                .ok_or_else(|| GmmError::Validation(format!("unknown panel column {name}")))
        };
        let y = column(dependent)?;
        let regressors = regressors
            .iter()
            .map(|name| column(name.as_str()).map(|values| (name.clone(), values)))
            .collect::<Result<Vec<_>, _>>()?;

        let units = panel.keys().iter().map(|k| k.country.clone()).collect();
        let periods = panel.keys().iter().map(|k| k.year).collect();
        Self::new(units, periods, dependent, y, regressors)
    }

    pub fn len(&self) -> usize {
        self.y.len()
    }

    pub fn is_empty(&self) -> bool {
        self.y.is_empty()
    }

    pub fn dependent(&self) -> &str {
        &self.dependent
    }

    pub fn units(&self) -> &[String] {
        &self.units
    }

    pub fn periods(&self) -> &[i64] {
        &self.periods
    }

    pub fn y(&self) -> &[f64] {
        &self.y
    }

    pub fn regressor_names(&self) -> &[String] {
        &self.regressor_names
    }

    pub fn regressor(&self, i: usize) -> &[f64] {
        &self.regressors[i]
    }

    /// First observed period
    pub fn min_period(&self) -> i64 {
        self.periods.iter().copied().min().unwrap_or_default()
    }

    /// Number of periods spanned, `max - min + 1`
    pub fn span(&self) -> usize {
        match (self.periods.iter().min(), self.periods.iter().max()) {
            (Some(lo), Some(hi)) => (hi - lo + 1) as usize,
            _ => 0,
        }
    }

    /// `values` lagged by `k` periods within each unit, NaN where the
    /// earlier period is not observed
    pub fn lag(&self, values: &[f64], k: usize) -> Vec<f64> {
        self.units
            .iter()
            .zip(&self.periods)
            .map(|(unit, &period)| {
                self.index
                    .get(&(unit.clone(), period - k as i64))
                    .map_or(f64::NAN, |&row| values[row])
            })
            .collect()
    }

    /// First difference within each unit
    pub fn diff(&self, values: &[f64]) -> Vec<f64> {
        values.iter().zip(self.lag(values, 1)).map(|(v, l)| v - l).collect()
    }
}
