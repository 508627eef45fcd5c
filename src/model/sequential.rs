//! Sequential backend: a stacked LSTM with a dense classification head,
//! evaluated on CPU from exported weights.
//!
//! Weight layout follows the common export convention: `w_ih` is
//! `4H x input`, `w_hh` is `4H x H`, gate blocks ordered input, forget,
//! cell, output. The head applies ReLU between dense layers and returns raw
//! logits from the last one.

use crate::model::ModelError;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LstmLayer {
    pub w_ih: Vec<Vec<f64>>,
    pub w_hh: Vec<Vec<f64>>,
    pub b_ih: Vec<f64>,
    pub b_hh: Vec<f64>,
}

impl LstmLayer {
    fn hidden_size(&self) -> usize {
        self.w_hh.first().map_or(0, Vec::len)
    }

    fn validate(&self, index: usize, input_size: usize) -> Result<usize, ModelError> {
        let hidden = self.hidden_size();
        let gates = 4 * hidden;
        let bad = |what: &str| {
            Err(ModelError::Shape(format!(
                "lstm layer {index}: {what} (input {input_size}, hidden {hidden})"
            )))
        };

        if hidden == 0 {
            return bad("empty recurrent weights");
        }
        if self.w_ih.len() != gates || self.w_ih.iter().any(|r| r.len() != input_size) {
            return bad("w_ih shape mismatch");
        }
        if self.w_hh.len() != gates || self.w_hh.iter().any(|r| r.len() != hidden) {
            return bad("w_hh shape mismatch");
        }
        if self.b_ih.len() != gates || self.b_hh.len() != gates {
            return bad("bias length mismatch");
        }
        Ok(hidden)
    }

    fn step(&self, x: &[f64], h: &[f64], c: &[f64]) -> (Vec<f64>, Vec<f64>) {
        let hidden = h.len();
        let gates: Vec<f64> = (0..4 * hidden)
            .map(|row| {
                dot(&self.w_ih[row], x) + self.b_ih[row] + dot(&self.w_hh[row], h) + self.b_hh[row]
            })
            .collect();

        let mut next_h = vec![0.0; hidden];
        let mut next_c = vec![0.0; hidden];
        for j in 0..hidden {
            let input = sigmoid(gates[j]);
            let forget = sigmoid(gates[hidden + j]);
            let cell = gates[2 * hidden + j].tanh();
            let output = sigmoid(gates[3 * hidden + j]);
            next_c[j] = forget * c[j] + input * cell;
            next_h[j] = output * next_c[j].tanh();
        }
        (next_h, next_c)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DenseLayer {
    pub weight: Vec<Vec<f64>>,
    pub bias: Vec<f64>,
}

impl DenseLayer {
    fn validate(&self, index: usize, input_size: usize) -> Result<usize, ModelError> {
        let outputs = self.weight.len();
        if outputs == 0
            || self.bias.len() != outputs
            || self.weight.iter().any(|r| r.len() != input_size)
        {
            return Err(ModelError::Shape(format!(
                "head layer {index}: expected {outputs} x {input_size} weights with matching bias"
            )));
        }
        Ok(outputs)
    }

    fn apply(&self, x: &[f64]) -> Vec<f64> {
        self.weight
            .iter()
            .zip(&self.bias)
            .map(|(row, b)| dot(row, x) + b)
            .collect()
    }
}

/// Recurrent classifier over sequences of feature vectors.
#[derive(Debug, Clone)]
pub struct SequentialModel {
    columns: Vec<String>,
    input_dim: usize,
    num_classes: usize,
    lstm: Vec<LstmLayer>,
    head: Vec<DenseLayer>,
}

impl SequentialModel {
    /// Validate and assemble a sequential bundle.
    pub fn new(
        columns: Vec<String>,
        input_dim: usize,
        num_classes: usize,
        lstm: Vec<LstmLayer>,
        head: Vec<DenseLayer>,
    ) -> Result<Self, ModelError> {
        if columns.is_empty() {
            return Err(ModelError::MissingField("columns"));
        }
        if input_dim != columns.len() {
            return Err(ModelError::Shape(format!(
                "input_dim {input_dim} does not match {} columns",
                columns.len()
            )));
        }
        if num_classes < 2 {
            return Err(ModelError::Shape(format!(
                "num_classes must be at least 2, found {num_classes}"
            )));
        }
        if lstm.is_empty() {
            return Err(ModelError::MissingField("lstm"));
        }
        if head.is_empty() {
            return Err(ModelError::MissingField("head"));
        }

        let mut width = input_dim;
        for (index, layer) in lstm.iter().enumerate() {
            width = layer.validate(index, width)?;
        }
        for (index, layer) in head.iter().enumerate() {
            width = layer.validate(index, width)?;
        }
        if width != num_classes {
            return Err(ModelError::Shape(format!(
                "head produces {width} outputs for {num_classes} classes"
            )));
        }

        Ok(Self {
            columns,
            input_dim,
            num_classes,
            lstm,
            head,
        })
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn input_dim(&self) -> usize {
        self.input_dim
    }

    pub fn num_classes(&self) -> usize {
        self.num_classes
    }

    /// Class logits for the last time step of `sequence`.
    pub fn forward(&self, sequence: &[Vec<f64>]) -> Vec<f64> {
        let mut steps: Vec<Vec<f64>> = sequence.to_vec();

        for layer in &self.lstm {
            let hidden = layer.hidden_size();
            let mut h = vec![0.0; hidden];
            let mut c = vec![0.0; hidden];
            let mut outputs = Vec::with_capacity(steps.len());
            for x in &steps {
                (h, c) = layer.step(x, &h, &c);
                outputs.push(h.clone());
            }
            steps = outputs;
        }

        let mut x = steps.pop().unwrap_or_default();
        let last = self.head.len() - 1;
        for (index, layer) in self.head.iter().enumerate() {
            x = layer.apply(&x);
            if index < last {
                x.iter_mut().for_each(|v| *v = v.max(0.0));
            }
        }
        x
    }
}

fn dot(a: &[f64], b: &[f64]) -> f64 {
    a.iter().zip(b).map(|(x, y)| x * y).sum()
}

fn sigmoid(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}
