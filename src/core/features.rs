//! Feature windows: the flat numeric map produced once per sampling window.
//!
//! Each collector owns a disjoint set of keys (keyboard timing, `mouse_*`,
//! `eye_*`) so merging the per-collector subsets never overwrites a value.
//! Models never see the map directly; they receive a vector built in their
//! declared column order through [`FeatureWindow::vector_for`].

use serde::Serialize;
use statrs::statistics::Statistics;
use std::collections::HashMap;
use thiserror::Error;

/// Key of the heuristic fatigue score attached by the aggregator.
pub const FATIGUE_SCORE: &str = "fatigue_score";

/// Key of the supervised-collection label.
pub const LABEL: &str = "label";

/// Errors raised when a caller-supplied feature map is malformed.
#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("feature payload must be a JSON object")]
    NotAnObject,
    #[error("feature '{name}' must be numeric")]
    NotNumeric { name: String },
    #[error("label must be an integer")]
    InvalidLabel,
}

/// Mapping from feature name to value for one sampling window.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct FeatureWindow {
    #[serde(flatten)]
    values: HashMap<String, f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    label: Option<i64>,
}

impl FeatureWindow {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a feature, replacing any previous value under the same name.
    pub fn insert(&mut self, name: impl Into<String>, value: f64) {
        self.values.insert(name.into(), value);
    }

    /// Builder-style [`insert`](Self::insert).
    pub fn with(mut self, name: impl Into<String>, value: f64) -> Self {
        self.insert(name, value);
        self
    }

    pub fn get(&self, name: &str) -> Option<f64> {
        self.values.get(name).copied()
    }

    /// Value of `name`, or 0.0 when absent.
    pub fn get_or_zero(&self, name: &str) -> f64 {
        self.get(name).unwrap_or(0.0)
    }

    /// Merge another collector's subset into this window.
    pub fn merge(&mut self, other: FeatureWindow) {
        self.values.extend(other.values);
        if other.label.is_some() {
            self.label = other.label;
        }
    }

    pub fn label(&self) -> Option<i64> {
        self.label
    }

    pub fn set_label(&mut self, label: i64) {
        self.label = Some(label);
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, f64)> {
        self.values.iter().map(|(k, v)| (k.as_str(), *v))
    }

    /// Build the model input vector in the given column order.
    ///
    /// Columns missing from the window contribute 0.0.
    pub fn vector_for(&self, columns: &[String]) -> Vec<f64> {
        columns.iter().map(|c| self.get_or_zero(c)).collect()
    }

    /// Parse a caller-supplied JSON object into a feature window.
    ///
    /// Numbers become features, `null` entries are skipped (and therefore
    /// read as 0.0 by the models), and an integer `label` entry is kept as
    /// the window label.
    pub fn from_json(value: &serde_json::Value) -> Result<Self, FeatureError> {
        let object = value.as_object().ok_or(FeatureError::NotAnObject)?;
        let mut window = FeatureWindow::new();

        for (name, raw) in object {
            if raw.is_null() {
                continue;
            }
            if name == LABEL {
                let label = raw.as_i64().ok_or(FeatureError::InvalidLabel)?;
                window.set_label(label);
                continue;
            }
            let value = raw.as_f64().ok_or_else(|| FeatureError::NotNumeric {
                name: name.clone(),
            })?;
            window.insert(name.clone(), value);
        }

        Ok(window)
    }
}

impl FromIterator<(String, f64)> for FeatureWindow {
    fn from_iter<I: IntoIterator<Item = (String, f64)>>(iter: I) -> Self {
        Self {
            values: iter.into_iter().collect(),
            label: None,
        }
    }
}

/// Arithmetic mean, 0.0 for an empty slice.
pub(crate) fn mean_or_zero(values: &[f64]) -> f64 {
    if values.is_empty() {
        0.0
    } else {
        values.iter().mean()
    }
}
