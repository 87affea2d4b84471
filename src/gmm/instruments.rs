//! Period-specific GMM instrument columns.
//!
//! Every column is active in exactly one period: rows of other periods hold
//! an exact 0, so each column contributes the moment condition of its own
//! period only. Active rows whose lag is not observed hold NaN and are
//! removed by sample selection.

use super::{DynamicPanelData, EquationKind};

#[derive(Debug, Clone, PartialEq)]
pub struct InstrumentColumn {
    pub name: String,
    /// Equation the column instruments
    pub kind: EquationKind,
    /// Period in which the column is active
    pub period: i64,
    /// Lag depth of the instrumenting series
    pub depth: usize,
    /// One value per data row
    pub values: Vec<f64>,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct InstrumentSet {
    columns: Vec<InstrumentColumn>,
}

impl InstrumentSet {
    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn columns(&self) -> &[InstrumentColumn] {
        &self.columns
    }

    pub fn names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn extend(&mut self, other: InstrumentSet) {
        self.columns.extend(other.columns);
    }
}

fn active_in(data: &DynamicPanelData, period: i64, shifted: &[f64]) -> Vec<f64> {
    data.periods()
        .iter()
        .zip(shifted)
        .map(|(&p, &v)| if p == period { v } else { 0.0 })
        .collect()
}

/// Lagged levels of the dependent variable for the differenced equations.
///
/// Depths run over `lags+1 .. min(T, lags+1+iv_max_lags)` and, for depth
/// `k`, periods over `k .. T` (relative to the first period).
pub fn level_instruments(data: &DynamicPanelData, lags: usize, iv_max_lags: usize) -> InstrumentSet {
    let span = data.span();
    let first = data.min_period();
    let upper = span.min(lags + 1 + iv_max_lags);

    let mut columns = Vec::new();
    for depth in (lags + 1)..upper {
        let shifted = data.lag(data.y(), depth);
        for t in depth..span {
            let period = first + t as i64;
            columns.push(InstrumentColumn {
                name: format!("lvl_t{period}_L{depth}"),
                kind: EquationKind::Differenced,
                period,
                depth,
                values: active_in(data, period, &shifted),
            });
        }
    }
    InstrumentSet { columns }
}

/// Lagged first differences of the dependent variable for the level
/// equations of System GMM, one column per period from `lags` on.
pub fn difference_instruments(data: &DynamicPanelData, lags: usize) -> InstrumentSet {
    let span = data.span();
    let first = data.min_period();
    let depth = lags + 1;
    let shifted = data.lag(&data.diff(data.y()), depth);

    let columns = (lags..span)
        .map(|t| {
            let period = first + t as i64;
            InstrumentColumn {
                name: format!("dif_t{period}_L{depth}"),
                kind: EquationKind::Level,
                period,
                depth,
                values: active_in(data, period, &shifted),
            }
        })
        .collect();
    InstrumentSet { columns }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn single_unit(y: &[f64]) -> DynamicPanelData {
        let n = y.len();
        DynamicPanelData::new(
            vec!["AUS".to_string(); n],
            (0..n as i64).map(|t| 2010 + t).collect(),
            "y",
            y.to_vec(),
            vec![],
        )
        .unwrap()
    }

    #[test]
    fn test_four_periods_one_lag() {
        let data = single_unit(&[1.0, 2.0, 4.0, 8.0]);
        let set = level_instruments(&data, 1, 1);
        assert_eq!(set.len(), 4 - 1 - 1);
        assert_eq!(set.names(), vec!["lvl_t2012_L2", "lvl_t2013_L2"]);
        for column in set.columns() {
            assert_eq!(column.values.iter().filter(|v| **v != 0.0).count(), 1);
        }
        assert_eq!(set.columns()[0].values, vec![0.0, 0.0, 1.0, 0.0]);
        assert_eq!(set.columns()[1].values, vec![0.0, 0.0, 0.0, 2.0]);
    }

    #[test]
    fn test_default_depth_range_adds_deeper_lags() {
        let data = single_unit(&[1.0, 2.0, 4.0, 8.0]);
        let set = level_instruments(&data, 1, 1000);
        assert_eq!(set.names(), vec!["lvl_t2012_L2", "lvl_t2013_L2", "lvl_t2013_L3"]);
        assert_eq!(set.columns()[2].values, vec![0.0, 0.0, 0.0, 1.0]);
    }

    #[test]
    fn test_difference_instruments() {
        let data = single_unit(&[1.0, 2.0, 4.0, 8.0, 16.0]);
        let set = difference_instruments(&data, 1);
        assert_eq!(set.len(), 4);
        assert!(set.columns().iter().all(|c| c.kind == EquationKind::Level));
        // Dy = [NaN, 1, 2, 4, 8]; depth 2 puts Dy(2011) into 2013
        let t2013 = &set.columns()[2];
        assert_eq!(t2013.period, 2013);
        assert_eq!(t2013.values, vec![0.0, 0.0, 0.0, 1.0, 0.0]);
        assert!(set.columns()[0].values[1].is_nan());
    }

    fn unbalanced_panel() -> impl Strategy<Value = DynamicPanelData> {
        proptest::collection::btree_map((0usize..4, 0i64..8), 0.5f64..10.0, 2..30).prop_map(|cells| {
            let units = cells.keys().map(|&(u, _)| format!("U{u}")).collect();
            let periods = cells.keys().map(|&(_, t)| 1990 + t).collect();
            DynamicPanelData::new(units, periods, "y", cells.values().copied().collect(), vec![]).unwrap()
        })
    }

    proptest! {
        #[test]
        fn prop_instruments_active_only_in_their_period(
            data in unbalanced_panel(),
            lags in 1usize..4,
            iv_max_lags in 1usize..6,
        ) {
            let mut set = level_instruments(&data, lags, iv_max_lags);
            set.extend(difference_instruments(&data, lags));
            for column in set.columns() {
                for (row, v) in column.values.iter().enumerate() {
                    if *v != 0.0 {
                        prop_assert_eq!(data.periods()[row], column.period);
                    }
                }
            }
        }

        #[test]
        fn prop_level_instruments_hold_the_lag(
            data in unbalanced_panel(),
            lags in 1usize..4,
        ) {
            let set = level_instruments(&data, lags, 1000);
            for column in set.columns() {
                prop_assert!(column.depth > lags);
                prop_assert!(column.period - data.min_period() >= column.depth as i64);
                let lagged = data.lag(data.y(), column.depth);
                for (row, v) in column.values.iter().enumerate() {
                    if data.periods()[row] == column.period {
                        prop_assert!(v.to_bits() == lagged[row].to_bits());
                    }
                }
            }
        }
    }
}
