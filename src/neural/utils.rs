// projeto: lstmcotacao
// file: src/neural/utils.rs
// Error taxonomy, Adam optimizer and numeric helpers shared by the pipeline

use ndarray::{Array, Array1, Dimension, ShapeError};
use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum TrainingError {
    #[error("Data unavailable for '{symbol}': {reason}")]
    DataUnavailable { symbol: String, reason: String },

    #[error("Insufficient data: need more than {required} values, got {actual}")]
    InsufficientData { required: usize, actual: usize },

    #[error("Scaler used before being fitted")]
    NotFitted,

    #[error("Shape mismatch: expected {expected}, got {actual}")]
    ShapeMismatch { expected: String, actual: String },

    #[error("Index {index} out of range for dataset of length {len}")]
    IndexOutOfRange { index: usize, len: usize },

    #[error("Model artifact missing: {}", .0.display())]
    ArtifactMissing(PathBuf),

    #[error("Architecture mismatch: {0}")]
    ArchitectureMismatch(String),

    #[error("Numeric instability at epoch {epoch}: loss = {loss}")]
    NumericInstability { epoch: usize, loss: f64 },

    #[error("Model configuration error: {0}")]
    ModelConfiguration(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Shape error: {0}")]
    Shape(String),
}

impl TrainingError {
    /// Stable, machine-readable name of the failure class.
    pub fn kind(&self) -> &'static str {
        match self {
            TrainingError::DataUnavailable { .. } => "data_unavailable",
            TrainingError::InsufficientData { .. } => "insufficient_data",
            TrainingError::NotFitted => "not_fitted",
            TrainingError::ShapeMismatch { .. } => "shape_mismatch",
            TrainingError::IndexOutOfRange { .. } => "index_out_of_range",
            TrainingError::ArtifactMissing(_) => "artifact_missing",
            TrainingError::ArchitectureMismatch(_) => "architecture_mismatch",
            TrainingError::NumericInstability { .. } => "numeric_instability",
            TrainingError::ModelConfiguration(_) => "model_configuration",
            TrainingError::Io(_) => "io",
            TrainingError::Serialization(_) => "serialization",
            TrainingError::Shape(_) => "shape",
        }
    }

    pub(crate) fn shape_mismatch(expected: impl ToString, actual: impl ToString) -> Self {
        TrainingError::ShapeMismatch {
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<ShapeError> for TrainingError {
    fn from(err: ShapeError) -> Self {
        TrainingError::Shape(err.to_string())
    }
}

impl From<serde_json::Error> for TrainingError {
    fn from(err: serde_json::Error) -> Self {
        TrainingError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for TrainingError {
    fn from(err: toml::de::Error) -> Self {
        TrainingError::ModelConfiguration(err.to_string())
    }
}

impl From<csv::Error> for TrainingError {
    fn from(err: csv::Error) -> Self {
        TrainingError::Serialization(format!("CSV: {}", err))
    }
}

impl From<reqwest::Error> for TrainingError {
    fn from(err: reqwest::Error) -> Self {
        TrainingError::DataUnavailable {
            symbol: err
                .url()
                .map(|u| u.path().to_string())
                .unwrap_or_default(),
            reason: err.to_string(),
        }
    }
}

impl From<toml::ser::Error> for TrainingError {
    fn from(err: toml::ser::Error) -> Self {
        TrainingError::Serialization(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TrainingError>;

/// Adam over a flat parameter vector. One `update` call is one optimizer step.
#[derive(Debug, Clone)]
pub struct AdamOptimizer {
    pub learning_rate: f64,
    pub beta1: f64,
    pub beta2: f64,
    pub epsilon: f64,
    pub t: usize,
    m: Array1<f64>,
    v: Array1<f64>,
}

impl AdamOptimizer {
    pub fn new(learning_rate: f64, beta1: f64, beta2: f64, epsilon: f64) -> Self {
        AdamOptimizer {
            learning_rate,
            beta1,
            beta2,
            epsilon,
            t: 0,
            m: Array1::zeros(0),
            v: Array1::zeros(0),
        }
    }

    /// Defaults used by torch.optim.Adam.
    pub fn with_learning_rate(learning_rate: f64) -> Self {
        Self::new(learning_rate, 0.9, 0.999, 1e-8)
    }

    pub fn update(&mut self, weights: &mut Array1<f64>, grads: &Array1<f64>) -> Result<()> {
        if weights.len() != grads.len() {
            return Err(TrainingError::shape_mismatch(
                format!("{} gradients", weights.len()),
                grads.len(),
            ));
        }
        if self.m.len() != weights.len() {
            self.m = Array1::zeros(weights.len());
            self.v = Array1::zeros(weights.len());
            self.t = 0;
        }
        self.t += 1;

        self.m = &self.m * self.beta1 + grads * (1.0 - self.beta1);
        self.v = &self.v * self.beta2 + &grads.mapv(|g| g * g) * (1.0 - self.beta2);

        let bias1 = 1.0 - self.beta1.powi(self.t as i32);
        let bias2 = 1.0 - self.beta2.powi(self.t as i32);

        let lr = self.learning_rate;
        let eps = self.epsilon;
        ndarray::Zip::from(weights)
            .and(&self.m)
            .and(&self.v)
            .for_each(|w, &m, &v| {
                let m_hat = m / bias1;
                let v_hat = v / bias2;
                *w -= lr * m_hat / (v_hat.sqrt() + eps);
            });
        Ok(())
    }
}

pub fn sigmoid<D: Dimension>(x: &Array<f64, D>) -> Array<f64, D> {
    x.mapv(|val| 1.0 / (1.0 + (-val).exp()))
}

pub fn tanh<D: Dimension>(x: &Array<f64, D>) -> Array<f64, D> {
    x.mapv(f64::tanh)
}

pub fn clip_gradient_norm(gradient: &mut Array1<f64>, max_norm: f64) -> f64 {
    let norm = gradient.iter().map(|x| x.powi(2)).sum::<f64>().sqrt();
    if norm > max_norm && norm > 0.0 {
        let scale = max_norm / norm;
        gradient.mapv_inplace(|x| x * scale);
    }
    norm
}

pub fn validate_finite<'a>(values: impl IntoIterator<Item = &'a f64>, name: &str) -> Result<()> {
    for (i, &value) in values.into_iter().enumerate() {
        if !value.is_finite() {
            return Err(TrainingError::ModelConfiguration(format!(
                "{} contains non-finite value {} at position {}",
                name, value, i
            )));
        }
    }
    Ok(())
}
