//! Estimation sample: stacked equation rows, regressors and instruments.

use std::collections::{BTreeMap, BTreeSet};

use nalgebra::{DMatrix, DVector};

use super::instruments::{difference_instruments, level_instruments, InstrumentSet};
use super::{ArellanoBondConfig, DynamicPanelData, EquationKind, GmmError};

pub const CONSTANT: &str = "constant";

/// Rows that survived selection, ready for [`super::iv_gmm`]
#[derive(Debug, Clone)]
pub struct EstimationSample {
    pub units: Vec<String>,
    pub periods: Vec<i64>,
    pub kinds: Vec<EquationKind>,
    /// Dense cluster id per row, one cluster per unit
    pub clusters: Vec<usize>,
    pub y: DVector<f64>,
    pub x: DMatrix<f64>,
    pub z: DMatrix<f64>,
    /// Column names of `x`
    pub names: Vec<String>,
    /// Column names of `z`
    pub instrument_names: Vec<String>,
    /// Equation each column of `z` belongs to; `None` for included
    /// exogenous columns, which enter every equation
    pub instrument_kinds: Vec<Option<EquationKind>>,
    /// Units of the data without a single complete row
    pub dropped_units: Vec<String>,
}

impl EstimationSample {
    pub fn n_obs(&self) -> usize {
        self.y.len()
    }

    pub fn n_params(&self) -> usize {
        self.x.ncols()
    }

    pub fn n_instruments(&self) -> usize {
        self.z.ncols()
    }

    pub fn n_clusters(&self) -> usize {
        self.clusters.iter().max().map_or(0, |&c| c + 1)
    }

    /// Number of rows of one equation kind
    pub fn count(&self, kind: EquationKind) -> usize {
        self.kinds.iter().filter(|&&k| k == kind).count()
    }
}

/// Dependent variable and regressor columns of one equation kind
struct EquationBlock {
    y: Vec<f64>,
    columns: Vec<Vec<f64>>,
}

fn equation_block(data: &DynamicPanelData, kind: EquationKind, config: &ArellanoBondConfig) -> EquationBlock {
    let transform = |values: &[f64]| match kind {
        EquationKind::Differenced => data.diff(values),
        EquationKind::Level => values.to_vec(),
    };

    let y = transform(data.y());
    let mut columns: Vec<Vec<f64>> = (1..=config.lags).map(|k| data.lag(&y, k)).collect();
    columns.extend((0..data.regressor_names().len()).map(|i| transform(data.regressor(i))));
    if config.add_intercept {
        columns.push(vec![1.0; data.len()]);
    }
    EquationBlock { y, columns }
}

struct Row {
    unit: String,
    period: i64,
    kind: EquationKind,
    y: f64,
    x: Vec<f64>,
    excluded: Vec<f64>,
}

/// Build the stacked sample for `config`.
///
/// The differenced equations are always present; System GMM appends the
/// level equations. Instrument columns of the other equation kind are 0 in
/// each block. Rows with a missing or non-finite value anywhere are
/// dropped, then instrument columns left without a nonzero entry are
/// pruned.
///
/// A unit that is not observed in the first period lacks the deep levels
/// the default `iv_max_lags` asks for and loses every row; such units are
/// reported in [`EstimationSample::dropped_units`].
pub fn build_sample(data: &DynamicPanelData, config: &ArellanoBondConfig) -> Result<EstimationSample, GmmError> {
    config.validate()?;

    let mut excluded = level_instruments(data, config.lags, config.iv_max_lags);
    let mut kinds = vec![EquationKind::Differenced];
    if config.system {
        excluded.extend(difference_instruments(data, config.lags));
        kinds.push(EquationKind::Level);
    }

    let mut names: Vec<String> = (1..=config.lags)
        .map(|k| format!("L{k}.{}", data.dependent()))
        .collect();
    names.extend(data.regressor_names().iter().cloned());
    if config.add_intercept {
        names.push(CONSTANT.to_string());
    }
    let n_params = names.len();

    let mut rows = Vec::new();
    let mut dropped = 0usize;
    for kind in kinds {
        let block = equation_block(data, kind, config);
        for r in 0..data.len() {
            let row = Row {
                unit: data.units()[r].clone(),
                period: data.periods()[r],
                kind,
                y: block.y[r],
                x: block.columns.iter().map(|c| c[r]).collect(),
                excluded: instrument_row(&excluded, kind, r),
            };
            let complete = row.y.is_finite()
                && row.x.iter().all(|v| v.is_finite())
                && row.excluded.iter().all(|v| v.is_finite());
            if complete {
                rows.push(row);
            } else {
                dropped += 1;
            }
        }
    }
    log::debug!("Sample selection kept {} rows, dropped {}", rows.len(), dropped);

    if rows.is_empty() {
        return Err(GmmError::InsufficientData {
            rows: 0,
            parameters: n_params,
        });
    }

    // Columns with no nonzero entry carry no moment condition
    let keep: Vec<usize> = (0..excluded.len())
        .filter(|&c| rows.iter().any(|row| row.excluded[c] != 0.0))
        .collect();
    if keep.len() < excluded.len() {
        log::debug!("Pruned {} empty instrument columns", excluded.len() - keep.len());
    }

    let exog_start = config.lags;
    let mut instrument_names: Vec<String> = names[exog_start..].to_vec();
    let mut instrument_kinds: Vec<Option<EquationKind>> = vec![None; instrument_names.len()];
    for &c in &keep {
        let column = &excluded.columns()[c];
        instrument_names.push(column.name.clone());
        instrument_kinds.push(Some(column.kind));
    }

    let n_instruments = instrument_names.len();
    if n_instruments < n_params {
        return Err(GmmError::Validation(format!(
            "under-identified: {n_instruments} instruments for {n_params} parameters"
        )));
    }
    if rows.len() <= n_params {
        return Err(GmmError::InsufficientData {
            rows: rows.len(),
            parameters: n_params,
        });
    }

    let mut cluster_ids: BTreeMap<&str, usize> = BTreeMap::new();
    for row in &rows {
        let next = cluster_ids.len();
        cluster_ids.entry(row.unit.as_str()).or_insert(next);
    }
    let clusters = rows.iter().map(|row| cluster_ids[row.unit.as_str()]).collect();

    let mut seen = BTreeSet::new();
    let dropped_units: Vec<String> = data
        .units()
        .iter()
        .filter(|unit| seen.insert(unit.as_str()) && !cluster_ids.contains_key(unit.as_str()))
        .cloned()
        .collect();
    if !dropped_units.is_empty() {
        let shown: Vec<&str> = dropped_units.iter().take(5).map(String::as_str).collect();
        log::warn!(
            "{} of {} units have no complete row and leave the sample (iv_max_lags = {}): {}{}",
            dropped_units.len(),
            seen.len(),
            config.iv_max_lags,
            shown.join(", "),
            if dropped_units.len() > shown.len() { ", ..." } else { "" }
        );
    }

    let n = rows.len();
    let y = DVector::from_iterator(n, rows.iter().map(|row| row.y));
    let x = DMatrix::from_fn(n, n_params, |r, c| rows[r].x[c]);
    let n_exog = n_params - exog_start;
    let z = DMatrix::from_fn(n, n_instruments, |r, c| {
        if c < n_exog {
            rows[r].x[exog_start + c]
        } else {
            rows[r].excluded[keep[c - n_exog]]
        }
    });

    Ok(EstimationSample {
        units: rows.iter().map(|row| row.unit.clone()).collect(),
        periods: rows.iter().map(|row| row.period).collect(),
        kinds: rows.iter().map(|row| row.kind).collect(),
        clusters,
        y,
        x,
        z,
        names,
        instrument_names,
        instrument_kinds,
        dropped_units,
    })
}

fn instrument_row(set: &InstrumentSet, kind: EquationKind, row: usize) -> Vec<f64> {
    set.columns()
        .iter()
        .map(|c| if c.kind == kind { c.values[row] } else { 0.0 })
        .collect()
}
