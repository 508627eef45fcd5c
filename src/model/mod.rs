//! Inference backends behind one `predict` contract.
//!
//! A [`ModelBundle`] is loaded once, validated at load time, and shared
//! read-only afterwards. Its backend never changes at runtime.

pub mod artifact;
pub mod sequential;
pub mod tabular;

use crate::collector::lock_state;
use crate::core::aggregator::Aggregator;
use crate::core::features::FeatureWindow;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Mutex;
use thiserror::Error;
use tracing::debug;

pub use sequential::SequentialModel;
pub use tabular::{Classifier, TabularModel};

/// Errors from loading a model bundle or running inference.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("failed to read model artifact {}: {source}", path.display())]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse model artifact {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error("model artifact is missing required field '{0}'")]
    MissingField(&'static str),
    #[error("unrecognized model artifact kind {0}")]
    UnknownKind(String),
    #[error("invalid model shape: {0}")]
    Shape(String),
    #[error("inference failed: {0}")]
    Inference(String),
}

/// Output of one inference call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Prediction {
    pub label_id: i64,
    pub probabilities: Option<Vec<f64>>,
}

impl Prediction {
    /// Highest class probability, if the backend produced a distribution.
    pub fn confidence(&self) -> Option<f64> {
        self.probabilities
            .as_ref()
            .and_then(|p| p.iter().copied().reduce(f64::max))
    }
}

/// A loaded model, either backend.
#[derive(Debug, Clone)]
pub enum ModelBundle {
    Tabular(TabularModel),
    Sequential(SequentialModel),
}

impl ModelBundle {
    /// Load an artifact, with optional side-car metadata.
    pub fn load(path: &Path, metadata: Option<&Path>) -> Result<Self, ModelError> {
        artifact::load(path, metadata)
    }

    /// Backend name, as used in the artifact `kind` field.
    pub fn backend(&self) -> &'static str {
        match self {
            ModelBundle::Tabular(_) => artifact::KIND_TABULAR,
            ModelBundle::Sequential(_) => artifact::KIND_SEQUENTIAL,
        }
    }

    /// Declared input column order.
    pub fn columns(&self) -> &[String] {
        match self {
            ModelBundle::Tabular(model) => model.columns(),
            ModelBundle::Sequential(model) => model.columns(),
        }
    }

    /// Classify one feature window.
    ///
    /// The input vector is always laid out in [`columns`](Self::columns)
    /// order; missing features read as 0.0. The sequential backend sees the
    /// window as a sequence of length one.
    pub fn predict(&self, features: &FeatureWindow) -> Result<Prediction, ModelError> {
        let x = features.vector_for(self.columns());
        if let Some(i) = x.iter().position(|v| !v.is_finite()) {
            return Err(ModelError::Inference(format!(
                "feature '{}' is not finite",
                self.columns()[i]
            )));
        }

        match self {
            ModelBundle::Tabular(model) => {
                let (label_id, probabilities) = model.infer(&x);
                Ok(Prediction {
                    label_id,
                    probabilities,
                })
            }
            ModelBundle::Sequential(model) => {
                let logits = model.forward(&[x]);
                if logits.iter().any(|v| !v.is_finite()) {
                    return Err(ModelError::Inference(
                        "network produced non-finite logits".to_string(),
                    ));
                }
                let probabilities = softmax(&logits);
                Ok(Prediction {
                    label_id: argmax(&probabilities) as i64,
                    probabilities: Some(probabilities),
                })
            }
        }
    }
}

/// Result of one live aggregation window plus inference.
#[derive(Debug, Clone)]
pub struct LiveResult {
    pub features: FeatureWindow,
    pub prediction: Prediction,
}

/// Model bundle bound to the aggregator that feeds it.
pub struct ModelServer {
    bundle: ModelBundle,
    aggregator: Aggregator,
    /// Serializes live windows so two callers never flush the same
    /// collectors concurrently.
    cycle: Mutex<()>,
}

impl ModelServer {
    pub fn new(bundle: ModelBundle, aggregator: Aggregator) -> Self {
        Self {
            bundle,
            aggregator,
            cycle: Mutex::new(()),
        }
    }

    /// Load the bundle at `path` and bind it to `aggregator`. Fails before
    /// any prediction is attempted when the artifact is unusable.
    pub fn load(
        path: &Path,
        metadata: Option<&Path>,
        aggregator: Aggregator,
    ) -> Result<Self, ModelError> {
        Ok(Self::new(ModelBundle::load(path, metadata)?, aggregator))
    }

    pub fn bundle(&self) -> &ModelBundle {
        &self.bundle
    }

    pub fn aggregator(&self) -> &Aggregator {
        &self.aggregator
    }

    pub fn predict(&self, features: &FeatureWindow) -> Result<Prediction, ModelError> {
        self.bundle.predict(features)
    }

    /// Run one aggregation window, then classify it. Blocks for the window
    /// duration.
    pub fn predict_live(&self) -> Result<LiveResult, ModelError> {
        let _cycle = lock_state(&self.cycle);
        let features = self.aggregator.collect_features(None);
        let prediction = self.bundle.predict(&features)?;
        debug!(label_id = prediction.label_id, "Live window classified");

        Ok(LiveResult {
            features,
            prediction,
        })
    }
}

/// Index of the largest value; the first one on ties, 0 when empty.
pub(crate) fn argmax(values: &[f64]) -> usize {
    values
        .iter()
        .enumerate()
        .fold(None, |best: Option<(usize, f64)>, (i, &v)| match best {
            Some((_, b)) if b >= v => best,
            _ => Some((i, v)),
        })
        .map_or(0, |(i, _)| i)
}

pub(crate) fn softmax(values: &[f64]) -> Vec<f64> {
    let max = values.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let exps: Vec<f64> = values.iter().map(|v| (v - max).exp()).collect();
    let total: f64 = exps.iter().sum();
    exps.into_iter().map(|e| e / total).collect()
}
