//! Tabular backend: one feature vector per window through an optional
//! standard scaler and a classifier.

use crate::model::{argmax, softmax, ModelError};
use serde::{Deserialize, Serialize};

/// Per-column standardization `(x - mean) / scale`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StandardScaler {
    pub mean: Vec<f64>,
    pub scale: Vec<f64>,
}

impl StandardScaler {
    pub fn transform(&self, x: &[f64]) -> Vec<f64> {
        x.iter()
            .zip(self.mean.iter().zip(&self.scale))
            .map(|(v, (m, s))| {
                // Zero-variance columns are only centered.
                let s = if *s == 0.0 { 1.0 } else { *s };
                (v - m) / s
            })
            .collect()
    }

    fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        if self.mean.len() != n_features || self.scale.len() != n_features {
            return Err(ModelError::Shape(format!(
                "scaler has {}/{} mean/scale entries for {} columns",
                self.mean.len(),
                self.scale.len(),
                n_features
            )));
        }
        Ok(())
    }
}

/// One node of a fitted decision tree. Samples go left when
/// `x[feature] <= threshold`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum TreeNode {
    Split {
        feature: usize,
        threshold: f64,
        left: usize,
        right: usize,
    },
    Leaf {
        /// Per-class sample counts or weights at this leaf.
        value: Vec<f64>,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionTree {
    pub nodes: Vec<TreeNode>,
}

impl DecisionTree {
    fn leaf(&self, x: &[f64]) -> &[f64] {
        let mut index = 0;
        loop {
            match &self.nodes[index] {
                TreeNode::Leaf { value } => return value,
                TreeNode::Split {
                    feature,
                    threshold,
                    left,
                    right,
                } => {
                    index = if x[*feature] <= *threshold {
                        *left
                    } else {
                        *right
                    };
                }
            }
        }
    }

    /// Normalized class distribution at the leaf reached by `x`.
    fn proba(&self, x: &[f64]) -> Vec<f64> {
        let value = self.leaf(x);
        let total: f64 = value.iter().sum();
        if total > 0.0 {
            value.iter().map(|v| v / total).collect()
        } else {
            vec![1.0 / value.len() as f64; value.len()]
        }
    }

    fn validate(&self, n_features: usize, n_classes: usize) -> Result<(), ModelError> {
        if self.nodes.is_empty() {
            return Err(ModelError::Shape("decision tree has no nodes".to_string()));
        }
        for (index, node) in self.nodes.iter().enumerate() {
            match node {
                TreeNode::Split {
                    feature,
                    left,
                    right,
                    ..
                } => {
                    if *feature >= n_features {
                        return Err(ModelError::Shape(format!(
                            "tree node {index} splits on feature {feature} of {n_features}"
                        )));
                    }
                    // Children always follow their parent, so traversal
                    // terminates.
                    for child in [*left, *right] {
                        if child <= index || child >= self.nodes.len() {
                            return Err(ModelError::Shape(format!(
                                "tree node {index} has invalid child {child}"
                            )));
                        }
                    }
                }
                TreeNode::Leaf { value } => {
                    if value.len() != n_classes {
                        return Err(ModelError::Shape(format!(
                            "tree leaf {index} has {} values for {n_classes} classes",
                            value.len()
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

/// Fitted classifier exported from the training pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Classifier {
    RandomForest {
        classes: Vec<i64>,
        trees: Vec<DecisionTree>,
    },
    /// Multinomial logistic regression; a single coefficient row with two
    /// classes is the binary form.
    Logistic {
        classes: Vec<i64>,
        coef: Vec<Vec<f64>>,
        intercept: Vec<f64>,
    },
    /// Nearest class centroid. Has no probability output.
    NearestCentroid {
        classes: Vec<i64>,
        centroids: Vec<Vec<f64>>,
    },
}

impl Classifier {
    pub fn classes(&self) -> &[i64] {
        match self {
            Classifier::RandomForest { classes, .. }
            | Classifier::Logistic { classes, .. }
            | Classifier::NearestCentroid { classes, .. } => classes,
        }
    }

    /// Whether [`predict_proba`](Self::predict_proba) returns a distribution.
    pub fn supports_proba(&self) -> bool {
        !matches!(self, Classifier::NearestCentroid { .. })
    }

    pub fn predict(&self, x: &[f64]) -> i64 {
        self.classify(x).0
    }

    /// Label and, when supported, the class distribution it was taken from.
    pub fn classify(&self, x: &[f64]) -> (i64, Option<Vec<f64>>) {
        let classes = self.classes();
        match self {
            Classifier::NearestCentroid { centroids, .. } => {
                let distances: Vec<f64> = centroids
                    .iter()
                    .map(|c| {
                        c.iter()
                            .zip(x)
                            .map(|(a, b)| (a - b).powi(2))
                            .sum::<f64>()
                    })
                    .collect();
                let nearest = distances
                    .iter()
                    .enumerate()
                    .min_by(|a, b| a.1.total_cmp(b.1))
                    .map(|(i, _)| i)
                    .unwrap_or(0);
                (classes[nearest], None)
            }
            _ => {
                let proba = self.predict_proba(x).unwrap_or_default();
                (classes[argmax(&proba)], Some(proba))
            }
        }
    }

    pub fn predict_proba(&self, x: &[f64]) -> Option<Vec<f64>> {
        match self {
            Classifier::RandomForest { classes, trees } => {
                let mut sum = vec![0.0; classes.len()];
                for tree in trees {
                    for (acc, p) in sum.iter_mut().zip(tree.proba(x)) {
                        *acc += p;
                    }
                }
                let n = trees.len() as f64;
                Some(sum.into_iter().map(|p| p / n).collect())
            }
            Classifier::Logistic {
                coef, intercept, ..
            } => {
                let scores: Vec<f64> = coef
                    .iter()
                    .zip(intercept)
                    .map(|(row, b)| row.iter().zip(x).map(|(w, v)| w * v).sum::<f64>() + b)
                    .collect();
                if scores.len() == 1 {
                    let p = 1.0 / (1.0 + (-scores[0]).exp());
                    Some(vec![1.0 - p, p])
                } else {
                    Some(softmax(&scores))
                }
            }
            Classifier::NearestCentroid { .. } => None,
        }
    }

    fn validate(&self, n_features: usize) -> Result<(), ModelError> {
        let n_classes = self.classes().len();
        if n_classes < 2 {
            return Err(ModelError::Shape(format!(
                "classifier needs at least two classes, found {n_classes}"
            )));
        }

        let check_width = |what: &str, width: usize| {
            if width != n_features {
                Err(ModelError::Shape(format!(
                    "{what} has width {width}, expected {n_features}"
                )))
            } else {
                Ok(())
            }
        };

        match self {
            Classifier::RandomForest { trees, .. } => {
                if trees.is_empty() {
                    return Err(ModelError::Shape("random forest has no trees".to_string()));
                }
                for tree in trees {
                    tree.validate(n_features, n_classes)?;
                }
            }
            Classifier::Logistic {
                coef, intercept, ..
            } => {
                let binary = coef.len() == 1 && n_classes == 2;
                if !binary && coef.len() != n_classes {
                    return Err(ModelError::Shape(format!(
                        "logistic model has {} coefficient rows for {n_classes} classes",
                        coef.len()
                    )));
                }
                if intercept.len() != coef.len() {
                    return Err(ModelError::Shape(format!(
                        "logistic model has {} intercepts for {} coefficient rows",
                        intercept.len(),
                        coef.len()
                    )));
                }
                for row in coef {
                    check_width("coefficient row", row.len())?;
                }
            }
            Classifier::NearestCentroid { centroids, .. } => {
                if centroids.len() != n_classes {
                    return Err(ModelError::Shape(format!(
                        "{} centroids for {n_classes} classes",
                        centroids.len()
                    )));
                }
                for centroid in centroids {
                    check_width("centroid", centroid.len())?;
                }
            }
        }
        Ok(())
    }
}

/// Tabular bundle: ordered columns, optional scaler, classifier.
#[derive(Debug, Clone)]
pub struct TabularModel {
    columns: Vec<String>,
    scaler: Option<StandardScaler>,
    classifier: Classifier,
}

impl TabularModel {
    /// Validate and assemble a tabular bundle.
    pub fn new(
        columns: Vec<String>,
        scaler: Option<StandardScaler>,
        classifier: Classifier,
    ) -> Result<Self, ModelError> {
        if columns.is_empty() {
            return Err(ModelError::MissingField("columns"));
        }
        if let Some(ref scaler) = scaler {
            scaler.validate(columns.len())?;
        }
        classifier.validate(columns.len())?;

        Ok(Self {
            columns,
            scaler,
            classifier,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Classify a vector already laid out in column order.
    pub fn infer(&self, x: &[f64]) -> (i64, Option<Vec<f64>>) {
        let scaled;
        let x = match self.scaler {
            Some(ref scaler) => {
                scaled = scaler.transform(x);
                &scaled[..]
            }
            None => x,
        };
        self.classifier.classify(x)
    }
}
