//! Long (country, year) panel.
//!
//! A [`Panel`] is a column store: one key per row and any number of named
//! `f64` columns of the same length, NaN marking missing values. Rows are
//! unique per (country, year).

pub mod assemble;
pub mod transform;

use std::collections::{BTreeMap, BTreeSet, HashMap};

pub use assemble::{assemble_panel, MacroObservation, MacroSeries, PanelOptions, YearFeatures};
pub use transform::{add_changes, add_lag, yeo_johnson, PowerTransform};

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum PanelError {
    #[error("duplicate panel row for {country} in {year}")]
    DuplicateKey { country: String, year: i64 },

    #[error("column {column} has {found} values for {expected} rows")]
    LengthMismatch {
        column: String,
        expected: usize,
        found: usize,
    },

    #[error("unknown panel column {0}")]
    MissingColumn(String),
}

/// Row key of a panel
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PanelKey {
    pub country: String,
    pub year: i64,
}

impl PanelKey {
    pub fn new(country: impl Into<String>, year: i64) -> Self {
        Self {
            country: country.into(),
            year,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Panel {
    keys: Vec<PanelKey>,
    columns: BTreeMap<String, Vec<f64>>,
}

impl Panel {
    pub fn new(keys: Vec<PanelKey>) -> Result<Self, PanelError> {
        let mut seen = BTreeSet::new();
        for key in &keys {
            if !seen.insert(key) {
                return Err(PanelError::DuplicateKey {
                    country: key.country.clone(),
                    year: key.year,
                });
            }
        }
        Ok(Self {
            keys,
            columns: BTreeMap::new(),
        })
    }

    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }

    pub fn keys(&self) -> &[PanelKey] {
        &self.keys
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.keys().map(String::as_str)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.contains_key(name)
    }

    pub fn column(&self, name: &str) -> Option<&[f64]> {
        self.columns.get(name).map(Vec::as_slice)
    }

    pub fn require(&self, name: &str) -> Result<&[f64], PanelError> {
        self.column(name).ok_or_else(|| PanelError::MissingColumn(name.to_string()))
    }

    /// Add or replace a column
    pub fn insert_column(&mut self, name: impl Into<String>, values: Vec<f64>) -> Result<(), PanelError> {
        let name = name.into();
        if values.len() != self.keys.len() {
            return Err(PanelError::LengthMismatch {
                column: name,
                expected: self.keys.len(),
                found: values.len(),
            });
        }
        self.columns.insert(name, values);
        Ok(())
    }

    pub fn remove_column(&mut self, name: &str) -> Option<Vec<f64>> {
        self.columns.remove(name)
    }

    /// Value of one cell
    pub fn value(&self, name: &str, row: usize) -> Option<f64> {
        self.columns.get(name).and_then(|c| c.get(row)).copied()
    }

    /// Sort rows by country, then year
    pub fn sort(&mut self) {
        let mut order: Vec<usize> = (0..self.keys.len()).collect();
        order.sort_by(|&a, &b| self.keys[a].cmp(&self.keys[b]));
        self.reorder(&order);
    }

    fn reorder(&mut self, order: &[usize]) {
        self.keys = order.iter().map(|&i| self.keys[i].clone()).collect();
        for values in self.columns.values_mut() {
            *values = order.iter().map(|&i| values[i]).collect();
        }
    }

    /// Keep the rows for which `keep` holds
    pub fn retain_rows<F>(&mut self, mut keep: F)
    where
        F: FnMut(usize, &PanelKey) -> bool,
    {
        let order: Vec<usize> = self
            .keys
            .iter()
            .enumerate()
            .filter(|(i, key)| keep(*i, key))
            .map(|(i, _)| i)
            .collect();
        self.reorder(&order);
    }

    /// Drop rows with a missing value in any of `columns`
    pub fn drop_missing(&mut self, columns: &[&str]) -> Result<usize, PanelError> {
        let required = columns
            .iter()
            .map(|c| self.require(c).map(<[f64]>::to_vec))
            .collect::<Result<Vec<_>, _>>()?;
        let before = self.len();
        self.retain_rows(|i, _| required.iter().all(|c| !c[i].is_nan()));
        Ok(before - self.len())
    }

    /// Left join: every column of `other` is copied in, NaN where `other` has
    /// no row with the same key. Existing columns with the same name are
    /// replaced.
    pub fn left_join(&mut self, other: &Panel) {
        let index: HashMap<&PanelKey, usize> = other.keys.iter().enumerate().map(|(i, k)| (k, i)).collect();
        let rows: Vec<Option<usize>> = self.keys.iter().map(|k| index.get(k).copied()).collect();
        for (name, values) in &other.columns {
            let joined = rows
                .iter()
                .map(|row| row.map_or(f64::NAN, |r| values[r]))
                .collect();
            self.columns.insert(name.clone(), joined);
        }
    }

    /// Distinct countries, sorted
    pub fn countries(&self) -> BTreeSet<&str> {
        self.keys.iter().map(|k| k.country.as_str()).collect()
    }

    /// Row positions of each country, in row order
    pub fn groups(&self) -> BTreeMap<&str, Vec<usize>> {
        let mut groups: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (i, key) in self.keys.iter().enumerate() {
            groups.entry(key.country.as_str()).or_default().push(i);
        }
        groups
    }
}
